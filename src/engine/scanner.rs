//! Trade discovery and budget-constrained admission.
//!
//! Pulls a run's trader activity from the gateway, filters to qualifying
//! BUY events not yet mirrored, and admits as many as the run's available
//! budget allows. The scanner never mutates the run — the orchestrator
//! appends the returned trades and persists.

use anyhow::{Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::gateway::{ActivityEvent, MarketDataGateway};
use crate::types::{Run, Trade, TradeStatus};

// ---------------------------------------------------------------------------
// Scan outcome
// ---------------------------------------------------------------------------

/// Result of scanning one run's activity feed.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Newly materialized trades, in feed order.
    pub admitted: Vec<Trade>,
    /// Qualifying events passed over because the budget was exhausted.
    pub skipped_for_budget: usize,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    /// Provider page-size limit for one activity fetch.
    activity_limit: u32,
}

impl Scanner {
    pub fn new(activity_limit: u32) -> Self {
        Self { activity_limit }
    }

    /// Discover and admit new mirrored trades for one run.
    ///
    /// A gateway failure propagates and no partial trade is created.
    pub async fn scan(
        &self,
        run: &Run,
        gateway: &dyn MarketDataGateway,
    ) -> Result<ScanOutcome> {
        let activity = gateway
            .fetch_activity(&run.trader_address, self.activity_limit)
            .await
            .with_context(|| format!("Activity fetch failed for run '{}'", run.id))?;

        // Dedup against trades already mirrored, and against duplicates
        // within this feed page.
        let mut seen = run.dedup_keys();
        let created_at_ms = run.created_at.timestamp_millis();

        let mut qualifying: Vec<&ActivityEvent> = Vec::new();
        for event in &activity {
            if !Self::qualifies(run, event, created_at_ms) {
                continue;
            }
            let key = (event.transaction_hash.clone(), event.asset.clone());
            if !seen.insert(key) {
                debug!(tx = %event.transaction_hash, "Already mirrored, skipping");
                continue;
            }
            qualifying.push(event);
        }

        // Available budget is recomputed from the trade collection; the
        // cached current_budget may have drifted after a partial failure.
        let available = run.available_budget();
        let capacity = (available / run.fixed_bet_amount)
            .floor()
            .to_usize()
            .unwrap_or(0);

        let admitted: Vec<Trade> = qualifying
            .iter()
            .take(capacity)
            .map(|event| Self::materialize(run, event))
            .collect();
        let skipped_for_budget = qualifying.len() - admitted.len();

        info!(
            run = %run.id,
            feed = activity.len(),
            qualifying = qualifying.len(),
            admitted = admitted.len(),
            budget_skipped = skipped_for_budget,
            available = %available,
            "Scan complete"
        );

        Ok(ScanOutcome {
            admitted,
            skipped_for_budget,
        })
    }

    /// Admission filters: BUY trade, strictly positive fill price, at or
    /// after run inception, notional above the trigger, fill price within
    /// the inclusive bounds.
    ///
    /// The positive-price gate holds even when `min_price` is 0: a win
    /// settles as `amount / price`, so a zero-price trade must never enter
    /// the ledger.
    fn qualifies(run: &Run, event: &ActivityEvent, created_at_ms: i64) -> bool {
        if !event.is_buy_trade() {
            return false;
        }
        if event.price <= Decimal::ZERO {
            debug!(tx = %event.transaction_hash, "Non-positive fill price, skipping");
            return false;
        }
        if event.timestamp_ms < created_at_ms {
            debug!(tx = %event.transaction_hash, "Event predates run inception");
            return false;
        }
        if event.notional() < run.min_trigger_amount {
            return false;
        }
        if event.price < run.min_price || event.price > run.max_price {
            return false;
        }
        true
    }

    /// Materialize an admitted event as an open mirrored trade. The stake
    /// is the run's fixed amount; original sizes are normalized away.
    fn materialize(run: &Run, event: &ActivityEvent) -> Trade {
        Trade {
            id: Uuid::new_v4().to_string(),
            transaction_hash: event.transaction_hash.clone(),
            asset: event.asset.clone(),
            condition_id: event.condition_id.clone(),
            outcome: event.outcome.clone(),
            market: event.market.clone(),
            slug: event.slug.clone(),
            price: event.price,
            amount: run.fixed_bet_amount,
            timestamp_ms: event.timestamp_ms,
            status: TradeStatus::Open,
            pnl: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
