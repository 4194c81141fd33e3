//! Resolution settlement.
//!
//! Checks a run's open mirrored trades against resolved markets, computes
//! win/loss P&L, and marks the trades terminal. Markets that are missing
//! from the gateway response, still open, or ambiguously priced leave
//! their trades untouched — the next cycle retries them.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::gateway::{MarketDataGateway, MarketResolution};
use crate::types::{Run, Trade};

/// Result of one settlement pass over a run.
#[derive(Debug, Default)]
pub struct SettlementOutcome {
    /// Trades settled this pass (post-settlement snapshots).
    pub settled: Vec<Trade>,
    /// Sum of win payouts to credit back to the run's budget.
    pub budget_credit: Decimal,
}

pub struct Resolver;

impl Resolver {
    /// Settle whatever has resolved. Mutates the run's trades in place;
    /// the caller applies `budget_credit` and persists.
    ///
    /// A gateway failure aborts the whole batch; no trade is partially
    /// resolved.
    pub async fn resolve(
        run: &mut Run,
        gateway: &dyn MarketDataGateway,
    ) -> Result<SettlementOutcome> {
        let condition_ids: HashSet<String> = run
            .open_trades()
            .map(|t| t.condition_id.clone())
            .collect();

        if condition_ids.is_empty() {
            return Ok(SettlementOutcome::default());
        }

        let resolutions = gateway
            .fetch_market_resolutions(&condition_ids)
            .await
            .with_context(|| format!("Resolution fetch failed for run '{}'", run.id))?;

        let by_condition: HashMap<&str, &MarketResolution> = resolutions
            .iter()
            .map(|r| (r.condition_id.as_str(), r))
            .collect();

        let mut outcome = SettlementOutcome::default();

        for trade in run.trades.iter_mut().filter(|t| t.is_open()) {
            let Some(resolution) = by_condition.get(trade.condition_id.as_str()) else {
                // Lookup miss: not yet resolvable, retry next cycle.
                continue;
            };

            let Some(winner) = resolution.winning_outcome() else {
                if resolution.closed {
                    debug!(
                        condition = %trade.condition_id,
                        "Closed market without a terminal price of 1, leaving trade open"
                    );
                }
                continue;
            };

            if trade.outcome == winner {
                let payout = trade.settle_won();
                outcome.budget_credit += payout;
                info!(
                    trade = %trade.id,
                    market = %trade.market,
                    payout = %payout,
                    pnl = %trade.pnl.unwrap_or_default(),
                    "Trade won"
                );
            } else {
                trade.settle_lost();
                info!(
                    trade = %trade.id,
                    market = %trade.market,
                    winner = %winner,
                    "Trade lost"
                );
            }
            outcome.settled.push(trade.clone());
        }

        info!(
            run = %run.id,
            checked = condition_ids.len(),
            settled = outcome.settled.len(),
            credit = %outcome.budget_credit,
            "Settlement pass complete"
        );

        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
