//! Polymarket gateway implementation.
//!
//! Uses the Data API for trader activity feeds and the Gamma API for
//! market resolution state (both unauthenticated).
//!
//! Data API:  https://data-api.polymarket.com
//! Gamma API: https://gamma-api.polymarket.com
//!
//! Upstream records are deserialized individually and validated into the
//! typed shapes in [`crate::gateway`]; malformed records are dropped with
//! a log line instead of poisoning the whole response. The client owns the
//! rate-limit policy: a minimum interval between HTTP calls, enforced here
//! rather than by sleeps in business logic.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::gateway::{
    normalize_to_millis, ActivityEvent, ActivityKind, ActivitySide, MarketDataGateway,
    MarketResolution,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const DATA_API_URL: &str = "https://data-api.polymarket.com";
const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Gamma rejects overly long query strings; resolutions are looked up in
/// chunks of this many condition ids.
const RESOLUTION_BATCH_SIZE: usize = 20;

// ---------------------------------------------------------------------------
// Raw wire types
// ---------------------------------------------------------------------------

/// One row of the Data API `/activity` response, before validation.
#[derive(Debug, Deserialize)]
struct RawActivity {
    #[serde(default, rename = "transactionHash")]
    transaction_hash: String,
    /// Seconds or milliseconds — the provider does not say which.
    #[serde(default)]
    timestamp: i64,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    size: Option<Decimal>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    asset: String,
    #[serde(default, rename = "conditionId")]
    condition_id: String,
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    slug: String,
}

/// One Gamma market row, reduced to resolution fields.
#[derive(Debug, Deserialize)]
struct RawResolutionMarket {
    #[serde(default, rename = "conditionId")]
    condition_id: String,
    #[serde(default)]
    closed: bool,
    /// Stringified JSON array: "[\"0\",\"1\"]"
    #[serde(default, rename = "outcomePrices")]
    outcome_prices: Option<String>,
    /// Stringified JSON array: "[\"No\",\"Yes\"]"
    #[serde(default)]
    outcomes: Option<String>,
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Minimum-interval pacing between upstream calls.
struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until at least `min_interval` has passed since the last call.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketGateway {
    http: Client,
    limiter: RateLimiter,
    data_api_url: String,
    gamma_api_url: String,
}

impl PolymarketGateway {
    pub fn new(cfg: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("Failed to build Polymarket HTTP client")?;

        Ok(Self {
            http,
            limiter: RateLimiter::new(Duration::from_millis(cfg.min_call_interval_ms)),
            data_api_url: DATA_API_URL.to_string(),
            gamma_api_url: GAMMA_API_URL.to_string(),
        })
    }

    /// Validate one raw activity row into the typed event shape.
    ///
    /// Returns `None` for rows missing required fields. Non-trade rows
    /// (redeems, splits, rewards) routinely lack a side and are skipped
    /// quietly; malformed trade rows are logged.
    fn convert_event(raw: RawActivity) -> Option<ActivityEvent> {
        let kind = parse_kind(&raw.kind);
        let side = parse_side(&raw.side);

        let Some(side) = side else {
            if kind == ActivityKind::Trade {
                warn!(
                    tx = %raw.transaction_hash,
                    side = %raw.side,
                    "Dropping trade activity with unrecognised side"
                );
            } else {
                debug!(kind = %raw.kind, "Skipping sideless activity record");
            }
            return None;
        };

        if raw.transaction_hash.is_empty()
            || raw.asset.is_empty()
            || raw.condition_id.is_empty()
            || raw.timestamp <= 0
        {
            warn!(
                tx = %raw.transaction_hash,
                condition = %raw.condition_id,
                "Dropping activity record with missing identity fields"
            );
            return None;
        }

        let (Some(size), Some(price)) = (raw.size, raw.price) else {
            warn!(tx = %raw.transaction_hash, "Dropping activity record without size/price");
            return None;
        };

        Some(ActivityEvent {
            transaction_hash: raw.transaction_hash,
            timestamp_ms: normalize_to_millis(raw.timestamp),
            kind,
            side,
            size,
            price,
            asset: raw.asset,
            condition_id: raw.condition_id,
            outcome: raw.outcome,
            market: raw.title,
            slug: raw.slug,
        })
    }

    /// Validate one Gamma market row into a typed resolution record.
    fn convert_resolution(raw: RawResolutionMarket) -> Option<MarketResolution> {
        if raw.condition_id.is_empty() {
            return None;
        }

        // Open markets often carry live prices; only closed markets need
        // their terminal pricing to parse.
        let outcome_prices = raw
            .outcome_prices
            .as_deref()
            .and_then(parse_decimal_array)
            .unwrap_or_default();
        let outcomes = raw
            .outcomes
            .as_deref()
            .and_then(parse_string_array)
            .unwrap_or_default();

        if raw.closed && (outcome_prices.is_empty() || outcomes.is_empty()) {
            warn!(
                condition = %raw.condition_id,
                "Closed market with unparseable outcome pricing — treating as unresolved"
            );
            return None;
        }

        Some(MarketResolution {
            condition_id: raw.condition_id,
            closed: raw.closed,
            outcome_prices,
            outcomes,
        })
    }
}

/// Parse a JSON array of rows, converting each independently so one
/// malformed row cannot poison the batch.
fn convert_rows<R, T>(
    rows: Vec<serde_json::Value>,
    convert: impl Fn(R) -> Option<T>,
) -> Vec<T>
where
    R: serde::de::DeserializeOwned,
{
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<R>(row) {
            Ok(raw) => convert(raw),
            Err(e) => {
                warn!(error = %e, "Dropping undeserializable upstream record");
                None
            }
        })
        .collect()
}

fn parse_kind(s: &str) -> ActivityKind {
    match s.to_ascii_uppercase().as_str() {
        "TRADE" => ActivityKind::Trade,
        "SPLIT" => ActivityKind::Split,
        "MERGE" => ActivityKind::Merge,
        "REDEEM" => ActivityKind::Redeem,
        "REWARD" => ActivityKind::Reward,
        "CONVERSION" => ActivityKind::Conversion,
        _ => ActivityKind::Other,
    }
}

fn parse_side(s: &str) -> Option<ActivitySide> {
    match s.to_ascii_uppercase().as_str() {
        "BUY" => Some(ActivitySide::Buy),
        "SELL" => Some(ActivitySide::Sell),
        _ => None,
    }
}

/// Parse Gamma's stringified arrays.
/// Handles: "[\"0.65\",\"0.35\"]" and the bare "0.65, 0.35" variant.
fn parse_string_array(s: &str) -> Option<Vec<String>> {
    if s.trim().is_empty() {
        return None;
    }
    if let Ok(parsed) = serde_json::from_str::<Vec<String>>(s) {
        return if parsed.is_empty() { None } else { Some(parsed) };
    }
    let cleaned = s.replace(['[', ']', '"', '\\'], "");
    let parts: Vec<String> = cleaned
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

/// All-or-nothing decimal parse — a single bad price invalidates the list,
/// which downstream treats as "not yet resolvable".
fn parse_decimal_array(s: &str) -> Option<Vec<Decimal>> {
    parse_string_array(s)?
        .iter()
        .map(|p| p.parse::<Decimal>().ok())
        .collect()
}

// ---------------------------------------------------------------------------
// MarketDataGateway implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataGateway for PolymarketGateway {
    async fn fetch_activity(
        &self,
        trader_address: &str,
        limit: u32,
    ) -> Result<Vec<ActivityEvent>> {
        self.limiter.pace().await;

        let url = format!("{}/activity", self.data_api_url);
        debug!(trader = %trader_address, limit, "Fetching trader activity");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("user", trader_address),
                ("limit", &limit.to_string()),
                ("sortBy", "TIMESTAMP"),
                ("sortDirection", "DESC"),
            ])
            .send()
            .await
            .context("Data API activity request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Data API error {status}: {body}");
        }

        let rows: Vec<serde_json::Value> = resp
            .json()
            .await
            .context("Failed to parse activity response")?;
        let raw_count = rows.len();

        let events = convert_rows(rows, Self::convert_event);
        info!(
            trader = %trader_address,
            raw = raw_count,
            valid = events.len(),
            "Fetched trader activity"
        );
        Ok(events)
    }

    async fn fetch_market_resolutions(
        &self,
        condition_ids: &HashSet<String>,
    ) -> Result<Vec<MarketResolution>> {
        if condition_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/markets", self.gamma_api_url);
        let ids: Vec<&String> = condition_ids.iter().collect();
        let mut resolutions = Vec::with_capacity(condition_ids.len());

        for chunk in ids.chunks(RESOLUTION_BATCH_SIZE) {
            self.limiter.pace().await;

            let query: Vec<(&str, &str)> = chunk
                .iter()
                .map(|id| ("condition_ids", id.as_str()))
                .collect();

            let resp = self
                .http
                .get(&url)
                .query(&query)
                .send()
                .await
                .context("Gamma API markets request failed")?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Gamma API error {status}: {body}");
            }

            let rows: Vec<serde_json::Value> = resp
                .json()
                .await
                .context("Failed to parse Gamma markets response")?;

            resolutions.extend(convert_rows(rows, Self::convert_resolution));
        }

        info!(
            requested = condition_ids.len(),
            returned = resolutions.len(),
            "Fetched market resolutions"
        );
        Ok(resolutions)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
