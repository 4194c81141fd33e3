//! Notification delivery.
//!
//! Defines the `Notifier` trait and a Telegram implementation. Delivery
//! is fire-and-forget from the engine's point of view: a failed send is
//! logged by the caller and never blocks or rolls back a cycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{AlertsConfig, AppConfig};

/// Delivers a formatted, Markdown-flavoured text message.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    http: Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            http,
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_URL, self.bot_token);

        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            .context("Telegram sendMessage request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {status}: {body}");
        }

        debug!(chars = text.len(), "Notification delivered");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// No-op fallback
// ---------------------------------------------------------------------------

/// Used when no alert channel is configured; sends go nowhere.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        debug!(chars = text.len(), "No notifier configured, dropping message");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Construction from config
// ---------------------------------------------------------------------------

/// Build the configured notifier, falling back to no-op when the alert
/// env vars are absent (scan-only setups run fine without alerts).
pub fn from_alerts_config(cfg: &AlertsConfig) -> Box<dyn Notifier> {
    let token = cfg
        .telegram_bot_token_env
        .as_deref()
        .and_then(|env| AppConfig::resolve_env(env).ok());
    let chat_id = cfg
        .telegram_chat_id_env
        .as_deref()
        .and_then(|env| AppConfig::resolve_env(env).ok());

    match (token, chat_id) {
        (Some(token), Some(chat_id)) => match TelegramNotifier::new(token, chat_id) {
            Ok(notifier) => {
                info!("Telegram notifications enabled");
                Box::new(notifier)
            }
            Err(e) => {
                warn!(error = %e, "Failed to build Telegram notifier, alerts disabled");
                Box::new(NoopNotifier)
            }
        },
        _ => {
            info!("Telegram env vars not set, alerts disabled");
            Box::new(NoopNotifier)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
