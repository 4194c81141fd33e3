//! Shared types for the MIMIC engine.
//!
//! These types form the data model used across all modules: the persisted
//! `Run` (one monitored trader and its simulation state), the `Trade`
//! (one mirrored position), and the per-cycle report. They are designed to
//! be stable so that gateway, engine, and store modules can depend on them
//! without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// Lifecycle state of a mirrored position. `Won` and `Lost` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Won,
    Lost,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "open"),
            TradeStatus::Won => write!(f, "won"),
            TradeStatus::Lost => write!(f, "lost"),
        }
    }
}

/// A mirrored position: one simulated stake on one outcome of one market,
/// derived one-to-one from a single qualifying activity event of the
/// followed trader.
///
/// The dedup key is `(transaction_hash, asset)` — the asset component
/// tolerates multi-outcome transactions sharing one hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Synthetic id, unique within the run.
    pub id: String,
    /// Transaction hash of the original on-chain event.
    pub transaction_hash: String,
    /// Outcome token identity (disambiguates multi-outcome markets).
    pub asset: String,
    /// Market identity used for resolution lookup.
    pub condition_id: String,
    /// Human label of the side bet on ("Yes", "No", a team name, ...).
    pub outcome: String,
    /// Market question / title, for reporting.
    pub market: String,
    #[serde(default)]
    pub slug: String,
    /// Fill price of the original trade, in [0, 1].
    pub price: Decimal,
    /// The run's fixed stake — never the original trader's size.
    pub amount: Decimal,
    /// Original event time, canonical milliseconds since epoch.
    pub timestamp_ms: i64,
    pub status: TradeStatus,
    /// Signed profit, populated once settled.
    #[serde(default)]
    pub pnl: Option<Decimal>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// The key that prevents double-mirroring the same real-world event.
    pub fn dedup_key(&self) -> (String, String) {
        (self.transaction_hash.clone(), self.asset.clone())
    }

    /// Settle as a win: payout = amount / price, pnl = payout − amount.
    /// Returns the payout to credit back to the budget.
    pub fn settle_won(&mut self) -> Decimal {
        let payout = self.amount / self.price;
        self.pnl = Some(payout - self.amount);
        self.status = TradeStatus::Won;
        payout
    }

    /// Settle as a loss: pnl = −amount, nothing returned to budget.
    pub fn settle_lost(&mut self) {
        self.pnl = Some(-self.amount);
        self.status = TradeStatus::Lost;
    }

    /// Helper to build a test trade with sensible defaults.
    #[cfg(test)]
    pub fn sample(tx: &str, asset: &str) -> Self {
        use rust_decimal_macros::dec;
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            transaction_hash: tx.to_string(),
            asset: asset.to_string(),
            condition_id: "0xcond".to_string(),
            outcome: "Yes".to_string(),
            market: "Will it happen?".to_string(),
            slug: "will-it-happen".to_string(),
            price: dec!(0.50),
            amount: dec!(10),
            timestamp_ms: 1_700_000_000_000,
            status: TradeStatus::Open,
            pnl: None,
        }
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {:.2} [{}] {} ({})",
            self.outcome, self.price, self.status, self.market, self.transaction_hash,
        )
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// One monitored trader configuration and its simulation state.
///
/// Owns the mirrored trade collection. `current_budget` is a cached value
/// synchronised from [`Run::reconciled_budget`] at the end of every cycle;
/// admission decisions never read it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Opaque id, stable across restarts.
    pub id: String,
    pub name: String,
    /// External identity of the followed trader (opaque string key).
    pub trader_address: String,
    /// Immutable after creation.
    pub initial_budget: Decimal,
    pub current_budget: Decimal,
    /// Constant stake size per mirrored trade, > 0.
    pub fixed_bet_amount: Decimal,
    /// Minimum original trade notional (size × price) to qualify.
    pub min_trigger_amount: Decimal,
    /// Inclusive fill-price bounds, both in [0, 1].
    pub min_price: Decimal,
    pub max_price: Decimal,
    /// Run inception — events before this instant are never eligible.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    /// Extension point; inactive runs are skipped by the orchestrator.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Mirrored trades, most-recent-first by convention. Ordering is
    /// display-only; uniqueness of dedup keys is the invariant.
    #[serde(default)]
    pub trades: Vec<Trade>,
}

impl Run {
    pub fn open_trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(|t| t.is_open())
    }

    pub fn open_trade_count(&self) -> usize {
        self.trades.iter().filter(|t| t.is_open()).count()
    }

    /// Sum of pnl over settled trades.
    pub fn settled_pnl(&self) -> Decimal {
        self.trades.iter().filter_map(|t| t.pnl).sum()
    }

    /// Recompute the budget from the trade collection alone:
    /// `initial + Σ(settled pnl) − fixed_bet_amount × open_count`.
    ///
    /// This is the authoritative value; the cached `current_budget` may
    /// have drifted after a partial failure and is reconciled to this.
    pub fn reconciled_budget(&self) -> Decimal {
        self.initial_budget + self.settled_pnl()
            - self.fixed_bet_amount * Decimal::from(self.open_trade_count() as u64)
    }

    /// Budget available for new admissions, bounded at zero.
    pub fn available_budget(&self) -> Decimal {
        self.reconciled_budget().max(Decimal::ZERO)
    }

    /// All dedup keys currently present in the run.
    pub fn dedup_keys(&self) -> HashSet<(String, String)> {
        self.trades.iter().map(|t| t.dedup_key()).collect()
    }

    /// Aggregate performance over the trade collection.
    pub fn stats(&self) -> RunStats {
        let won = self
            .trades
            .iter()
            .filter(|t| t.status == TradeStatus::Won)
            .count();
        let lost = self
            .trades
            .iter()
            .filter(|t| t.status == TradeStatus::Lost)
            .count();
        let settled = won + lost;
        RunStats {
            open: self.open_trade_count(),
            won,
            lost,
            win_rate: if settled > 0 {
                Some(won as f64 / settled as f64)
            } else {
                None
            },
            total_pnl: self.settled_pnl(),
        }
    }

    /// Helper to build a test run with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        use rust_decimal_macros::dec;
        Run {
            id: "run-001".to_string(),
            name: "Test Whale".to_string(),
            trader_address: "0xwhale".to_string(),
            initial_budget: dec!(100),
            current_budget: dec!(100),
            fixed_bet_amount: dec!(10),
            min_trigger_amount: dec!(5),
            min_price: dec!(0.1),
            max_price: dec!(0.9),
            created_at: Utc::now() - chrono::Duration::days(1),
            last_checked: None,
            is_active: true,
            trades: Vec::new(),
        }
    }
}

/// Point-in-time performance summary for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub open: usize,
    pub won: usize,
    pub lost: usize,
    /// None until at least one trade has settled.
    pub win_rate: Option<f64>,
    pub total_pnl: Decimal,
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of one resolve→scan→resolve cycle for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub run_id: String,
    pub run_name: String,
    pub timestamp: DateTime<Utc>,
    /// Trades admitted by the scanner this cycle.
    pub admitted: usize,
    /// Qualifying events passed over because the budget was exhausted.
    pub skipped_for_budget: usize,
    /// Trades settled across both resolve passes.
    pub settled: usize,
    pub won: usize,
    pub lost: usize,
    pub budget_after: Decimal,
    pub total_pnl: Decimal,
}

impl CycleReport {
    /// Whether anything material happened (drives notification).
    pub fn has_changes(&self) -> bool {
        self.admitted > 0 || self.settled > 0
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] admitted={} budget_skipped={} settled={} (W{}/L{}) budget=${:.2} pnl=${:.2}",
            self.run_name,
            self.admitted,
            self.skipped_for_budget,
            self.settled,
            self.won,
            self.lost,
            self.budget_after,
            self.total_pnl,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for MIMIC.
#[derive(Debug, thiserror::Error)]
pub enum MimicError {
    #[error("Gateway error ({endpoint}): {message}")]
    Gateway { endpoint: String, message: String },

    #[error("Configuration error for run '{run_id}': {message}")]
    Config { run_id: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
