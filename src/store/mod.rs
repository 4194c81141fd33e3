//! Run persistence — a JSON file holding the full run collection.
//!
//! The file is the single durable artifact of the engine. The whole
//! collection is loaded at the start of a pass and written back once per
//! run cycle; writes go through a temp file and an atomic rename so a
//! crash mid-write never leaves a truncated state file behind.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::FollowedTrader;
use crate::types::{MimicError, Run};

pub struct RunStore {
    path: PathBuf,
}

impl RunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every persisted run. A missing file is a fresh deployment,
    /// not an error.
    pub fn load(&self) -> Result<Vec<Run>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No state file yet, starting empty");
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let runs: Vec<Run> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;
        debug!(count = runs.len(), "Loaded runs from state file");
        Ok(runs)
    }

    /// Persist the full run collection atomically.
    pub fn save(&self, runs: &[Run]) -> Result<()> {
        let json = serde_json::to_string_pretty(runs).context("Failed to serialize runs")?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write temp state file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;

        debug!(count = runs.len(), "Saved runs to state file");
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Run>> {
        let runs = self.load()?;
        Ok(runs.into_iter().find(|r| r.id == id))
    }

    /// Create runs for any followed-trader records not yet present.
    /// Existing runs are left untouched: once created, the persisted run
    /// is authoritative and later edits to its record are ignored.
    /// Returns the number of runs created.
    pub fn upsert_from_configs(&self, configs: &[FollowedTrader]) -> Result<usize> {
        let mut runs = self.load()?;
        let mut created = 0;

        for cfg in configs {
            if runs.iter().any(|r| r.id == cfg.id) {
                continue;
            }
            info!(run_id = %cfg.id, name = %cfg.name, "Creating run for new followed trader");
            runs.push(new_run(cfg));
            created += 1;
        }

        if created > 0 {
            self.save(&runs)?;
        }
        Ok(created)
    }

    /// Replace one run in the collection and persist. The run must
    /// already exist.
    pub fn update_run(&self, run: &Run) -> Result<()> {
        let mut runs = self.load()?;
        let slot = runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or_else(|| MimicError::Storage(format!("Unknown run id: {}", run.id)))?;
        *slot = run.clone();
        self.save(&runs)
    }
}

fn new_run(cfg: &FollowedTrader) -> Run {
    Run {
        id: cfg.id.clone(),
        name: cfg.name.clone(),
        trader_address: cfg.trader_address.clone(),
        initial_budget: cfg.initial_budget,
        current_budget: cfg.initial_budget,
        fixed_bet_amount: cfg.fixed_bet_amount,
        min_trigger_amount: cfg.min_trigger_amount,
        min_price: cfg.min_price,
        max_price: cfg.max_price,
        created_at: Utc::now(),
        last_checked: None,
        is_active: true,
        trades: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
