//! Market data gateway.
//!
//! Defines the `MarketDataGateway` trait (read-only access to a trader's
//! chronological activity feed and to market resolution state) plus the
//! typed records crossing that boundary. The upstream provider is a black
//! box; everything it returns is validated into these closed shapes at the
//! gateway, never propagated loosely.

pub mod polymarket;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// Activity record category as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityKind {
    Trade,
    Split,
    Merge,
    Redeem,
    Reward,
    Conversion,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivitySide {
    Buy,
    Sell,
}

/// One event from a trader's activity feed, fully validated.
///
/// `timestamp_ms` is explicit milliseconds since epoch: the provider's
/// seconds-vs-milliseconds ambiguity is resolved once, at the gateway
/// boundary (see [`normalize_to_millis`]), and never re-guessed downstream.
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    pub transaction_hash: String,
    pub timestamp_ms: i64,
    pub kind: ActivityKind,
    pub side: ActivitySide,
    /// Original trader's size (outcome tokens).
    pub size: Decimal,
    /// Fill price in [0, 1].
    pub price: Decimal,
    /// Outcome token identity.
    pub asset: String,
    pub condition_id: String,
    /// Human label of the outcome traded.
    pub outcome: String,
    /// Market question / title.
    pub market: String,
    pub slug: String,
}

impl ActivityEvent {
    pub fn is_buy_trade(&self) -> bool {
        self.kind == ActivityKind::Trade && self.side == ActivitySide::Buy
    }

    /// Original trade notional in USD terms.
    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}

/// Resolution state of one market. `outcome_prices` and `outcomes` are
/// keyed 1:1 by position.
#[derive(Debug, Clone)]
pub struct MarketResolution {
    pub condition_id: String,
    pub closed: bool,
    pub outcome_prices: Vec<Decimal>,
    pub outcomes: Vec<String>,
}

impl MarketResolution {
    /// The winning outcome label: the one whose terminal price is exactly 1.
    ///
    /// Returns `None` for markets that are not closed, whose price/label
    /// lists disagree in length, or whose pricing is ambiguous: no outcome
    /// at exactly 1, or more than one. Callers must treat all of those as
    /// "not yet resolvable" and never guess a winner.
    pub fn winning_outcome(&self) -> Option<&str> {
        if !self.closed || self.outcome_prices.len() != self.outcomes.len() {
            return None;
        }
        let mut at_one = self
            .outcome_prices
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == Decimal::ONE);
        let (index, _) = at_one.next()?;
        if at_one.next().is_some() {
            return None;
        }
        Some(self.outcomes[index].as_str())
    }
}

// ---------------------------------------------------------------------------
// Timestamp normalisation
// ---------------------------------------------------------------------------

/// Timestamps at or above this magnitude are already milliseconds.
/// 10^10 seconds is year 2286; 10^10 milliseconds is November 2001.
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Normalise a provider timestamp to milliseconds since epoch.
/// The feed reports seconds or milliseconds without saying which.
pub fn normalize_to_millis(raw: i64) -> i64 {
    if raw < MILLIS_THRESHOLD {
        raw * 1_000
    } else {
        raw
    }
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Read-only access to upstream market data.
///
/// Implementors own their transport, timeouts, and rate-limit policy; a
/// returned error means the whole fetch failed and nothing downstream may
/// act on partial data.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Fetch a trader's activity feed, most recent first, bounded by the
    /// provider page-size limit.
    async fn fetch_activity(
        &self,
        trader_address: &str,
        limit: u32,
    ) -> Result<Vec<ActivityEvent>>;

    /// Fetch resolution state for a set of markets in one batched lookup.
    /// Markets absent from the response are simply not yet resolvable.
    async fn fetch_market_resolutions(
        &self,
        condition_ids: &HashSet<String>,
    ) -> Result<Vec<MarketResolution>>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_seconds_to_millis() {
        // 2023-11-14 in seconds
        assert_eq!(normalize_to_millis(1_700_000_000), 1_700_000_000_000);
    }

    #[test]
    fn test_normalize_millis_passthrough() {
        assert_eq!(normalize_to_millis(1_700_000_000_000), 1_700_000_000_000);
    }

    #[test]
    fn test_normalize_boundary() {
        assert_eq!(normalize_to_millis(9_999_999_999), 9_999_999_999_000);
        assert_eq!(normalize_to_millis(10_000_000_000), 10_000_000_000);
    }

    #[test]
    fn test_winning_outcome_binary_market() {
        let res = MarketResolution {
            condition_id: "0xc".to_string(),
            closed: true,
            outcome_prices: vec![dec!(0), dec!(1)],
            outcomes: vec!["No".to_string(), "Yes".to_string()],
        };
        assert_eq!(res.winning_outcome(), Some("Yes"));
    }

    #[test]
    fn test_winning_outcome_ambiguous_pricing() {
        let res = MarketResolution {
            condition_id: "0xc".to_string(),
            closed: true,
            outcome_prices: vec![dec!(0.5), dec!(0.5)],
            outcomes: vec!["No".to_string(), "Yes".to_string()],
        };
        assert_eq!(res.winning_outcome(), None);
    }

    #[test]
    fn test_winning_outcome_multiple_at_one_is_ambiguous() {
        // Corrupt terminal pricing: two outcomes both at exactly 1.
        let res = MarketResolution {
            condition_id: "0xc".to_string(),
            closed: true,
            outcome_prices: vec![dec!(1), dec!(1)],
            outcomes: vec!["No".to_string(), "Yes".to_string()],
        };
        assert_eq!(res.winning_outcome(), None);
    }

    #[test]
    fn test_winning_outcome_not_closed() {
        let res = MarketResolution {
            condition_id: "0xc".to_string(),
            closed: false,
            outcome_prices: vec![dec!(0), dec!(1)],
            outcomes: vec!["No".to_string(), "Yes".to_string()],
        };
        assert_eq!(res.winning_outcome(), None);
    }

    #[test]
    fn test_winning_outcome_length_mismatch() {
        let res = MarketResolution {
            condition_id: "0xc".to_string(),
            closed: true,
            outcome_prices: vec![dec!(1)],
            outcomes: vec!["No".to_string(), "Yes".to_string()],
        };
        assert_eq!(res.winning_outcome(), None);
    }

    #[test]
    fn test_is_buy_trade() {
        let ev = ActivityEvent {
            transaction_hash: "0xaaa".to_string(),
            timestamp_ms: 1_700_000_000_000,
            kind: ActivityKind::Trade,
            side: ActivitySide::Buy,
            size: dec!(100),
            price: dec!(0.5),
            asset: "t1".to_string(),
            condition_id: "0xc".to_string(),
            outcome: "Yes".to_string(),
            market: "Q?".to_string(),
            slug: "q".to_string(),
        };
        assert!(ev.is_buy_trade());
        assert_eq!(ev.notional(), dec!(50));

        let sell = ActivityEvent {
            side: ActivitySide::Sell,
            ..ev.clone()
        };
        assert!(!sell.is_buy_trade());

        let redeem = ActivityEvent {
            kind: ActivityKind::Redeem,
            ..ev
        };
        assert!(!redeem.is_buy_trade());
    }

    #[test]
    fn test_activity_kind_deserializes_unknown_as_other() {
        let kind: ActivityKind = serde_json::from_str("\"AIRDROP\"").unwrap();
        assert_eq!(kind, ActivityKind::Other);
        let kind: ActivityKind = serde_json::from_str("\"TRADE\"").unwrap();
        assert_eq!(kind, ActivityKind::Trade);
    }
}
