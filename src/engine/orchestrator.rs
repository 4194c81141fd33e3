//! Per-run cycle orchestration.
//!
//! Each followed trader gets one cycle per pass: settle first, then scan
//! for new mirrored trades, then settle again to catch markets that
//! resolved in between. State is persisted exactly once at the end of the
//! cycle, and a Markdown summary goes out when anything changed. One
//! run's failure never blocks the others.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::FollowedTrader;
use crate::engine::resolver::{Resolver, SettlementOutcome};
use crate::engine::scanner::Scanner;
use crate::gateway::MarketDataGateway;
use crate::notify::Notifier;
use crate::store::RunStore;
use crate::types::{CycleReport, RunStats, TradeStatus};

pub struct CycleOrchestrator {
    scanner: Scanner,
}

impl CycleOrchestrator {
    pub fn new(activity_limit: u32) -> Self {
        Self {
            scanner: Scanner::new(activity_limit),
        }
    }

    /// Run one cycle for every followed trader, sequentially.
    ///
    /// Returns the reports of the cycles that completed. A cycle that
    /// fails is logged and skipped; the next trader still gets its turn.
    pub async fn process_all(
        &self,
        configs: &[FollowedTrader],
        store: &RunStore,
        gateway: &dyn MarketDataGateway,
        notifier: &dyn Notifier,
    ) -> Vec<CycleReport> {
        let mut reports = Vec::new();

        for cfg in configs {
            match self.run_cycle(cfg, store, gateway).await {
                Ok(Some((report, stats))) => {
                    info!(run = %cfg.id, "{report}");
                    if report.has_changes() {
                        let summary = format_summary(&report, &stats);
                        if let Err(e) = notifier.send(&summary).await {
                            warn!(run = %cfg.id, error = %e, "Notification failed");
                        }
                    }
                    reports.push(report);
                }
                Ok(None) => {
                    debug!(run = %cfg.id, "Run inactive, skipped");
                }
                Err(e) => {
                    error!(run = %cfg.id, error = %e, "Cycle failed, continuing with next run");
                }
            }
        }

        reports
    }

    /// One full cycle for one followed trader. Returns `None` when the
    /// run has been deactivated.
    async fn run_cycle(
        &self,
        cfg: &FollowedTrader,
        store: &RunStore,
        gateway: &dyn MarketDataGateway,
    ) -> Result<Option<(CycleReport, RunStats)>> {
        cfg.validate()?;
        store.upsert_from_configs(std::slice::from_ref(cfg))?;

        let mut run = store
            .get_by_id(&cfg.id)?
            .with_context(|| format!("Run '{}' missing after upsert", cfg.id))?;

        if !run.is_active {
            return Ok(None);
        }

        // Settle before scanning so freed budget is available for
        // admission this same cycle.
        let first = Resolver::resolve(&mut run, gateway).await?;
        run.current_budget += first.budget_credit;

        let scan = self.scanner.scan(&run, gateway).await?;
        run.current_budget -= run.fixed_bet_amount * Decimal::from(scan.admitted.len() as u64);

        // Newest first, matching the provider's feed order.
        let existing = std::mem::take(&mut run.trades);
        run.trades = scan.admitted.iter().cloned().chain(existing).collect();

        // Second pass: markets can resolve while we scan, and a trade
        // admitted above may already be settleable.
        let second = Resolver::resolve(&mut run, gateway).await?;
        run.current_budget += second.budget_credit;

        // The cached budget is always re-derived from the trade ledger
        // before persisting; the incremental arithmetic above must agree.
        run.current_budget = run.reconciled_budget();
        run.last_checked = Some(Utc::now());

        store.update_run(&run)?;

        let won = count_won(&first) + count_won(&second);
        let settled = first.settled.len() + second.settled.len();
        let report = CycleReport {
            run_id: run.id.clone(),
            run_name: run.name.clone(),
            timestamp: Utc::now(),
            admitted: scan.admitted.len(),
            skipped_for_budget: scan.skipped_for_budget,
            settled,
            won,
            lost: settled - won,
            budget_after: run.current_budget,
            total_pnl: run.settled_pnl(),
        };

        Ok(Some((report, run.stats())))
    }
}

fn count_won(outcome: &SettlementOutcome) -> usize {
    outcome
        .settled
        .iter()
        .filter(|t| t.status == TradeStatus::Won)
        .count()
}

/// Markdown summary sent after a cycle with activity.
fn format_summary(report: &CycleReport, stats: &RunStats) -> String {
    let win_rate = match stats.win_rate {
        Some(rate) => format!("{:.1}%", rate * 100.0),
        None => "n/a".to_string(),
    };

    format!(
        "*{name}*\n\
         Mirrored: {admitted} new (skipped {skipped} for budget)\n\
         Settled: {settled} ({won}W / {lost}L)\n\
         Open positions: {open}\n\
         Win rate: {win_rate}\n\
         Budget: ${budget:.2}\n\
         Total P&L: ${pnl:.2}",
        name = report.run_name,
        admitted = report.admitted,
        skipped = report.skipped_for_budget,
        settled = report.settled,
        won = report.won,
        lost = report.lost,
        open = stats.open,
        win_rate = win_rate,
        budget = report.budget_after,
        pnl = report.total_pnl,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ActivityEvent, ActivityKind, ActivitySide, MarketResolution, MockMarketDataGateway};
    use crate::notify::MockNotifier;
    use crate::types::TradeStatus;
    use rust_decimal_macros::dec;

    fn temp_store() -> RunStore {
        let path =
            std::env::temp_dir().join(format!("mimic_orch_{}.json", uuid::Uuid::new_v4()));
        RunStore::new(path)
    }

    fn sample_config() -> FollowedTrader {
        FollowedTrader {
            id: "whale-1".to_string(),
            name: "The Whale".to_string(),
            trader_address: "0xabc123".to_string(),
            min_trigger_amount: dec!(5),
            min_price: dec!(0.1),
            max_price: dec!(0.9),
            initial_budget: dec!(100),
            fixed_bet_amount: dec!(10),
        }
    }

    fn buy_event(tx: &str, asset: &str) -> ActivityEvent {
        ActivityEvent {
            transaction_hash: tx.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            kind: ActivityKind::Trade,
            side: ActivitySide::Buy,
            size: dec!(100),
            price: dec!(0.5),
            asset: asset.to_string(),
            condition_id: format!("cond-{asset}"),
            outcome: "Yes".to_string(),
            market: "Test market?".to_string(),
            slug: "test-market".to_string(),
        }
    }

    fn quiet_notifier() -> MockNotifier {
        let mut notifier = MockNotifier::new();
        notifier.expect_send().returning(|_| Ok(()));
        notifier
    }

    #[tokio::test]
    async fn test_first_cycle_creates_run_and_admits_trades() {
        let store = temp_store();
        let mut gateway = MockMarketDataGateway::new();
        gateway
            .expect_fetch_activity()
            .returning(|_, _| Ok(vec![buy_event("0x1", "tok-1"), buy_event("0x2", "tok-2")]));
        gateway
            .expect_fetch_market_resolutions()
            .returning(|_| Ok(vec![]));

        let orchestrator = CycleOrchestrator::new(100);
        let reports = orchestrator
            .process_all(&[sample_config()], &store, &gateway, &quiet_notifier())
            .await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].admitted, 2);
        assert_eq!(reports[0].budget_after, dec!(80));

        let run = store.get_by_id("whale-1").unwrap().unwrap();
        assert_eq!(run.trades.len(), 2);
        assert_eq!(run.current_budget, dec!(80));
        assert!(run.last_checked.is_some());

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_cycle_is_idempotent_across_passes() {
        let store = temp_store();
        let mut gateway = MockMarketDataGateway::new();
        gateway
            .expect_fetch_activity()
            .returning(|_, _| Ok(vec![buy_event("0x1", "tok-1")]));
        gateway
            .expect_fetch_market_resolutions()
            .returning(|_| Ok(vec![]));

        let orchestrator = CycleOrchestrator::new(100);
        let cfg = sample_config();

        orchestrator
            .process_all(&[cfg.clone()], &store, &gateway, &quiet_notifier())
            .await;
        let reports = orchestrator
            .process_all(&[cfg], &store, &gateway, &quiet_notifier())
            .await;

        // Same feed again: nothing new admitted, budget unchanged.
        assert_eq!(reports[0].admitted, 0);
        assert_eq!(reports[0].budget_after, dec!(90));
        let run = store.get_by_id("whale-1").unwrap().unwrap();
        assert_eq!(run.trades.len(), 1);

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_settlement_before_scan_frees_budget() {
        let store = temp_store();
        let cfg = sample_config();
        store.upsert_from_configs(&[cfg.clone()]).unwrap();

        // Seed a run with its whole budget tied up in one open trade.
        let mut run = store.get_by_id("whale-1").unwrap().unwrap();
        let mut open = crate::types::Trade::sample("0x0", "tok-0");
        open.amount = dec!(100);
        open.price = dec!(0.5);
        run.trades.push(open);
        run.current_budget = dec!(0);
        store.update_run(&run).unwrap();

        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_fetch_market_resolutions().returning(|_| {
            Ok(vec![MarketResolution {
                condition_id: "0xcond".to_string(),
                closed: true,
                outcome_prices: vec![dec!(1), dec!(0)],
                outcomes: vec!["Yes".to_string(), "No".to_string()],
            }])
        });
        gateway
            .expect_fetch_activity()
            .returning(|_, _| Ok(vec![buy_event("0x9", "tok-9")]));

        let orchestrator = CycleOrchestrator::new(100);
        let reports = orchestrator
            .process_all(&[cfg], &store, &gateway, &quiet_notifier())
            .await;

        // The win settles first (payout 200, pnl +100), so the scan has
        // budget to admit the new trade.
        assert_eq!(reports[0].settled, 1);
        assert_eq!(reports[0].won, 1);
        assert_eq!(reports[0].admitted, 1);
        // 100 initial + 100 pnl - 10 open stake.
        assert_eq!(reports[0].budget_after, dec!(190));

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_second_resolve_pass_catches_late_resolution() {
        let store = temp_store();
        let cfg = sample_config();

        let mut gateway = MockMarketDataGateway::new();
        gateway
            .expect_fetch_activity()
            .returning(|_, _| Ok(vec![buy_event("0x1", "tok-1")]));

        // First resolve pass sees nothing open; the second pass, after the
        // scan admitted tok-1, finds its market already resolved.
        gateway.expect_fetch_market_resolutions().returning(|_| {
            Ok(vec![MarketResolution {
                condition_id: "cond-tok-1".to_string(),
                closed: true,
                outcome_prices: vec![dec!(1), dec!(0)],
                outcomes: vec!["Yes".to_string(), "No".to_string()],
            }])
        });

        let orchestrator = CycleOrchestrator::new(100);
        let reports = orchestrator
            .process_all(&[cfg], &store, &gateway, &quiet_notifier())
            .await;

        assert_eq!(reports[0].admitted, 1);
        assert_eq!(reports[0].settled, 1);
        assert_eq!(reports[0].won, 1);
        // Stake 10 at 0.5 pays out 20: budget 100 - 10 + 20 = 110.
        assert_eq!(reports[0].budget_after, dec!(110));

        let run = store.get_by_id("whale-1").unwrap().unwrap();
        assert_eq!(run.trades[0].status, TradeStatus::Won);

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_failing_run_does_not_block_others() {
        let store = temp_store();
        let mut bad = sample_config();
        bad.id = "bad".to_string();
        bad.fixed_bet_amount = dec!(0);
        let good = sample_config();

        let mut gateway = MockMarketDataGateway::new();
        gateway
            .expect_fetch_activity()
            .returning(|_, _| Ok(vec![buy_event("0x1", "tok-1")]));
        gateway
            .expect_fetch_market_resolutions()
            .returning(|_| Ok(vec![]));

        let orchestrator = CycleOrchestrator::new(100);
        let reports = orchestrator
            .process_all(&[bad, good], &store, &gateway, &quiet_notifier())
            .await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].run_id, "whale-1");
        // The invalid record never got a run created.
        assert!(store.get_by_id("bad").unwrap().is_none());

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_inactive_run_is_skipped() {
        let store = temp_store();
        let cfg = sample_config();
        store.upsert_from_configs(&[cfg.clone()]).unwrap();

        let mut run = store.get_by_id("whale-1").unwrap().unwrap();
        run.is_active = false;
        store.update_run(&run).unwrap();

        // No gateway expectations set: any call panics the test.
        let gateway = MockMarketDataGateway::new();

        let orchestrator = CycleOrchestrator::new(100);
        let reports = orchestrator
            .process_all(&[cfg], &store, &gateway, &quiet_notifier())
            .await;

        assert!(reports.is_empty());
        let run = store.get_by_id("whale-1").unwrap().unwrap();
        assert!(run.last_checked.is_none());

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_notification_sent_only_on_changes() {
        let store = temp_store();
        let mut gateway = MockMarketDataGateway::new();
        gateway
            .expect_fetch_activity()
            .returning(|_, _| Ok(vec![]));
        gateway
            .expect_fetch_market_resolutions()
            .returning(|_| Ok(vec![]));

        // Empty feed, no settlements: send must never fire.
        let notifier = MockNotifier::new();

        let orchestrator = CycleOrchestrator::new(100);
        let reports = orchestrator
            .process_all(&[sample_config()], &store, &gateway, &notifier)
            .await;

        assert_eq!(reports.len(), 1);
        assert!(!reports[0].has_changes());

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_notification_failure_is_not_fatal() {
        let store = temp_store();
        let mut gateway = MockMarketDataGateway::new();
        gateway
            .expect_fetch_activity()
            .returning(|_, _| Ok(vec![buy_event("0x1", "tok-1")]));
        gateway
            .expect_fetch_market_resolutions()
            .returning(|_| Ok(vec![]));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .returning(|_| Err(anyhow::anyhow!("telegram down")));

        let orchestrator = CycleOrchestrator::new(100);
        let reports = orchestrator
            .process_all(&[sample_config()], &store, &gateway, &notifier)
            .await;

        // The cycle still completed and persisted.
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].admitted, 1);
        let run = store.get_by_id("whale-1").unwrap().unwrap();
        assert_eq!(run.trades.len(), 1);

        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn test_summary_formatting() {
        let report = CycleReport {
            run_id: "whale-1".to_string(),
            run_name: "The Whale".to_string(),
            timestamp: Utc::now(),
            admitted: 3,
            skipped_for_budget: 1,
            settled: 2,
            won: 1,
            lost: 1,
            budget_after: dec!(95.50),
            total_pnl: dec!(5.50),
        };
        let stats = RunStats {
            open: 4,
            won: 1,
            lost: 1,
            win_rate: Some(0.5),
            total_pnl: dec!(5.50),
        };

        let text = format_summary(&report, &stats);
        assert!(text.contains("*The Whale*"));
        assert!(text.contains("Mirrored: 3 new (skipped 1 for budget)"));
        assert!(text.contains("Settled: 2 (1W / 1L)"));
        assert!(text.contains("Win rate: 50.0%"));
        assert!(text.contains("Budget: $95.50"));
        assert!(text.contains("Total P&L: $5.50"));
    }
}
