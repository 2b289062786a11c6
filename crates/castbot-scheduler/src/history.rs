//! Broadcast history — a bounded, append-only ledger of run outcomes.
//!
//! The ledger is one JSON document. Each append is a full
//! read-modify-write under the data-directory file lock, so overlapping runs
//! cannot lose each other's records even when one of them is a manual test
//! started from a separate CLI process. Oldest records are evicted first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::delivery::DeliveryRun;
use crate::store::{HISTORY_FILE, read_json, with_dir_lock, write_json_atomic};

/// Records kept on disk.
pub const DEFAULT_RETENTION: usize = 100;

/// Durable summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub time: DateTime<Utc>,
    pub success_count: usize,
    pub total_count: usize,
    pub campaign_id: String,
    pub success_rate: String,
    pub triggered_by_schedule: bool,
    pub process_incarnation: u64,
}

impl HistoryRecord {
    pub fn from_run(run: &DeliveryRun, triggered_by_schedule: bool, process_incarnation: u64) -> Self {
        Self {
            time: run.start_time,
            success_count: run.success_count,
            total_count: run.total_count,
            campaign_id: run.campaign_id.clone(),
            success_rate: run.success_rate(),
            triggered_by_schedule,
            process_incarnation,
        }
    }
}

/// Aggregate view over the retained records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_runs: usize,
    pub scheduled_runs: usize,
    pub manual_runs: usize,
    pub current_incarnation_runs: usize,
    /// Mean of per-run success percentages, over runs that had destinations.
    pub average_success_rate: Option<f64>,
    pub last: Option<HistoryRecord>,
}

pub struct HistoryLedger {
    dir: PathBuf,
    path: PathBuf,
    retention: usize,
    /// Serializes appends within this process; the file lock covers the rest.
    lock: Mutex<()>,
}

impl HistoryLedger {
    pub fn new(dir: &Path, retention: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            path: dir.join(HISTORY_FILE),
            retention: retention.max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and trim to the retention cap. Never fails the caller:
    /// an unreadable ledger starts over, a failed write is logged.
    pub async fn append(&self, record: HistoryRecord) {
        let _guard = self.lock.lock().await;
        with_dir_lock(&self.dir, || {
            let mut records = self.read_all();
            records.push(record);
            if records.len() > self.retention {
                let excess = records.len() - self.retention;
                records.drain(..excess);
            }
            match write_json_atomic(&self.path, &records) {
                Ok(()) => tracing::debug!("📊 History saved ({} records)", records.len()),
                Err(e) => tracing::error!("❌ Failed to save broadcast history: {e}"),
            }
        });
    }

    /// The most recent `limit` records, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<HistoryRecord> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all();
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
        records
    }

    pub async fn stats(&self, current_incarnation: u64) -> HistoryStats {
        let records = {
            let _guard = self.lock.lock().await;
            self.read_all()
        };
        let scheduled_runs = records.iter().filter(|r| r.triggered_by_schedule).count();
        let rates: Vec<f64> = records
            .iter()
            .filter(|r| r.total_count > 0)
            .map(|r| r.success_count as f64 / r.total_count as f64 * 100.0)
            .collect();
        let average_success_rate =
            (!rates.is_empty()).then(|| rates.iter().sum::<f64>() / rates.len() as f64);

        HistoryStats {
            total_runs: records.len(),
            scheduled_runs,
            manual_runs: records.len() - scheduled_runs,
            current_incarnation_runs: records
                .iter()
                .filter(|r| r.process_incarnation == current_incarnation)
                .count(),
            average_success_rate,
            last: records.last().cloned(),
        }
    }

    fn read_all(&self) -> Vec<HistoryRecord> {
        read_json(&self.path).unwrap_or_default()
    }
}
