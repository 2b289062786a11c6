//! Trigger loop — the polling side of the scheduler.
//!
//! Every tick the loop checks which armed entries are due and pushes a
//! `DeliveryJob` per due entry onto a queue. It never waits for a delivery:
//! the dispatcher drains the queue and spawns one task per job, so runs may
//! overlap freely. Polling (instead of sleeping until the next instant)
//! tolerates wall-clock jumps and schedule edits without timer cancellation.
//! Each tick also adopts settings the admin CLI saved from another process.
//!
//! ```text
//! ScheduleTable ──(re-arm generation)──► TriggerLoop ──DeliveryJob──► dispatcher
//!                                        tick every 1s                 └─ spawn BroadcastService::execute
//! ```

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock;
use crate::schedule::{ScheduleEntry, ScheduleTable};
use crate::service::BroadcastService;

/// One broadcast to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryJob {
    pub campaign_id: String,
    pub triggered_by_schedule: bool,
    pub scheduled_for: DateTime<Utc>,
}

impl DeliveryJob {
    pub fn manual(campaign_id: &str) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            triggered_by_schedule: false,
            scheduled_for: Utc::now(),
        }
    }
}

/// Per-entry trigger state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerState {
    Armed(DateTime<Utc>),
    Firing,
}

#[derive(Debug)]
struct Trigger {
    entry: ScheduleEntry,
    state: TriggerState,
}

/// Source of "now" for the polling loop.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct TriggerLoop {
    table: Arc<ScheduleTable>,
    rearm_rx: watch::Receiver<u64>,
    jobs: mpsc::UnboundedSender<DeliveryJob>,
    tick: Duration,
    triggers: Vec<Trigger>,
    enabled: bool,
    tz: Tz,
    clock: Clock,
}

impl TriggerLoop {
    pub fn new(table: Arc<ScheduleTable>, jobs: mpsc::UnboundedSender<DeliveryJob>, tick: Duration) -> Self {
        let rearm_rx = table.subscribe();
        Self {
            table,
            rearm_rx,
            jobs,
            tick,
            triggers: Vec::new(),
            enabled: false,
            tz: Tz::UTC,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock `run` reads.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Throw away every computed instant and arm each entry afresh.
    pub async fn rearm(&mut self, now: DateTime<Utc>) {
        // Mark seen before reading, so an edit racing the read re-arms again.
        self.rearm_rx.borrow_and_update();
        let config = self.table.snapshot().await;
        self.tz = clock::parse_timezone(&config.timezone).unwrap_or(Tz::UTC);
        self.enabled = config.enabled;
        self.triggers.clear();

        if !self.enabled {
            tracing::info!("⏸️ Broadcasting disabled, nothing armed");
            return;
        }
        for entry in config.entries {
            match clock::next_trigger_instant(&entry.time_of_day, self.tz, now) {
                Ok(next) => {
                    tracing::debug!("⏰ Armed {entry} for {}", next.with_timezone(&self.tz));
                    self.triggers.push(Trigger {
                        entry,
                        state: TriggerState::Armed(next),
                    });
                }
                Err(e) => tracing::warn!("⚠️ Skipping schedule entry {entry}: {e}"),
            }
        }
        tracing::info!("📅 Re-armed {} schedule entries ({})", self.triggers.len(), self.tz.name());
    }

    /// Armed entries and their next instants.
    pub fn armed(&self) -> Vec<(ScheduleEntry, DateTime<Utc>)> {
        self.triggers
            .iter()
            .filter_map(|t| match t.state {
                TriggerState::Armed(next) => Some((t.entry.clone(), next)),
                TriggerState::Firing => None,
            })
            .collect()
    }

    /// Fire every entry due at `now`, then re-arm each for its next day.
    /// Returns how many jobs were enqueued.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> usize {
        if !self.enabled {
            return 0;
        }
        let tz = self.tz;
        let mut fired = 0;
        for trigger in self.triggers.iter_mut() {
            let TriggerState::Armed(due) = trigger.state else {
                continue;
            };
            if now < due {
                continue;
            }

            trigger.state = TriggerState::Firing;
            tracing::info!("🔔 Schedule due: {} (local {})", trigger.entry, now.with_timezone(&tz).format("%H:%M:%S"));
            let job = DeliveryJob {
                campaign_id: trigger.entry.campaign_id.clone(),
                triggered_by_schedule: true,
                scheduled_for: due,
            };
            match self.jobs.send(job) {
                Ok(()) => fired += 1,
                Err(e) => tracing::error!("❌ Failed to enqueue job for {}: {e}", trigger.entry),
            }

            match clock::next_trigger_instant(&trigger.entry.time_of_day, tz, now) {
                Ok(next) => trigger.state = TriggerState::Armed(next),
                Err(e) => tracing::error!("❌ Cannot re-arm {}: {e}", trigger.entry),
            }
        }
        // Entries that failed to re-arm stay out until the next full re-arm.
        self.triggers.retain(|t| t.state != TriggerState::Firing);
        fired
    }

    /// Poll forever. Only process shutdown stops this loop.
    pub async fn run(mut self) {
        tracing::info!("⏰ Trigger loop started (check every {:?})", self.tick);
        self.rearm((self.clock)()).await;

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.table.refresh().await;
            if self.rearm_rx.has_changed().unwrap_or(false) {
                self.rearm((self.clock)()).await;
            }
            self.tick_at((self.clock)());
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Drain the job queue, running each job as its own task.
pub fn spawn_dispatcher(
    service: Arc<BroadcastService>,
    mut jobs: mpsc::UnboundedReceiver<DeliveryJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            let service = service.clone();
            tokio::spawn(async move {
                match service.execute(&job).await {
                    Ok(run) if run.is_aborted() => {
                        tracing::warn!("🚫 Run for '{}' aborted", job.campaign_id);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("❌ Run for '{}' failed: {e}", job.campaign_id),
                }
            });
        }
        tracing::info!("Dispatcher stopped (job queue closed)");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SettingsStore;
    use crate::testing::StaticContent;
    use chrono::TimeZone;

    fn open_table(dir: &std::path::Path) -> ScheduleTable {
        let content = StaticContent::new().with_text("campaignA", "A").with_text("campaignB", "B");
        ScheduleTable::open(SettingsStore::new(dir), Arc::new(content), "campaignA", "Asia/Taipei")
    }

    async fn setup(
        dir: &std::path::Path,
        entries: &[(&str, &str)],
        enabled: bool,
    ) -> (Arc<ScheduleTable>, TriggerLoop, mpsc::UnboundedReceiver<DeliveryJob>) {
        let table = Arc::new(open_table(dir));
        for (time, campaign) in entries {
            table.add(time, campaign).await.unwrap();
        }
        if enabled {
            table.set_enabled(true).await.unwrap();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let trigger_loop = TriggerLoop::new(table.clone(), tx, Duration::from_secs(1));
        (table, trigger_loop, rx)
    }

    fn taipei(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        let tz: Tz = "Asia/Taipei".parse().unwrap();
        tz.with_ymd_and_hms(y, m, d, h, min, s).unwrap().with_timezone(&Utc)
    }

    /// Wall clock that starts at `base` and follows tokio's (pausable) time.
    fn paused_clock(base: DateTime<Utc>) -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
        let start = tokio::time::Instant::now();
        move || base + chrono::Duration::from_std(start.elapsed()).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DeliveryJob>) -> Vec<DeliveryJob> {
        let mut jobs = Vec::new();
        while let Ok(job) = rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    #[tokio::test]
    async fn test_fires_once_at_local_time_and_rearms_for_tomorrow() {
        let dir = tempfile::tempdir().unwrap();
        let (_table, mut trigger_loop, mut rx) = setup(dir.path(), &[("09:00", "campaignA")], true).await;
        trigger_loop.rearm(taipei(2026, 5, 4, 8, 0, 0)).await;

        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 8, 59, 59)), 0);
        assert!(drain(&mut rx).is_empty());

        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 9, 0, 0)), 1);
        let jobs = drain(&mut rx);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].campaign_id, "campaignA");
        assert!(jobs[0].triggered_by_schedule);
        assert_eq!(jobs[0].scheduled_for, taipei(2026, 5, 4, 9, 0, 0));

        let armed = trigger_loop.armed();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].1, taipei(2026, 5, 5, 9, 0, 0));

        // No double fire later the same day.
        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 9, 0, 1)), 0);
        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 23, 0, 0)), 0);
        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 5, 9, 0, 0)), 1);
    }

    #[tokio::test]
    async fn test_disabled_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let (_table, mut trigger_loop, mut rx) = setup(dir.path(), &[("09:00", "campaignA")], false).await;
        trigger_loop.rearm(taipei(2026, 5, 4, 8, 0, 0)).await;

        assert!(trigger_loop.armed().is_empty());
        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 9, 0, 0)), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_entries_due_in_same_tick_fire_independently() {
        let dir = tempfile::tempdir().unwrap();
        let (_table, mut trigger_loop, mut rx) =
            setup(dir.path(), &[("09:00", "campaignA"), ("09:00", "campaignB"), ("10:00", "campaignA")], true).await;
        trigger_loop.rearm(taipei(2026, 5, 4, 8, 0, 0)).await;

        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 9, 0, 1)), 2);
        let mut campaigns: Vec<String> = drain(&mut rx).into_iter().map(|j| j.campaign_id).collect();
        campaigns.sort();
        assert_eq!(campaigns, vec!["campaignA", "campaignB"]);
        assert_eq!(trigger_loop.armed().len(), 3);
    }

    #[tokio::test]
    async fn test_schedule_edit_requests_rearm() {
        let dir = tempfile::tempdir().unwrap();
        let (table, mut trigger_loop, mut rx) = setup(dir.path(), &[("09:00", "campaignA")], true).await;
        trigger_loop.rearm(taipei(2026, 5, 4, 8, 0, 0)).await;
        assert!(!trigger_loop.rearm_rx.has_changed().unwrap());

        table.add("08:30", "campaignB").await.unwrap();
        assert!(trigger_loop.rearm_rx.has_changed().unwrap());
        trigger_loop.rearm(taipei(2026, 5, 4, 8, 0, 0)).await;
        assert_eq!(trigger_loop.armed().len(), 2);

        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 8, 30, 0)), 1);
        assert_eq!(drain(&mut rx)[0].campaign_id, "campaignB");

        table.set_enabled(false).await.unwrap();
        trigger_loop.rearm(taipei(2026, 5, 4, 8, 31, 0)).await;
        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 9, 0, 0)), 0);
    }

    #[tokio::test]
    async fn test_rearm_after_restart_does_not_refire_past_time() {
        let dir = tempfile::tempdir().unwrap();
        let (_table, mut trigger_loop, _rx) = setup(dir.path(), &[("09:00", "campaignA")], true).await;
        // Process came back at 09:00:00.5 after firing at 09:00:00.
        let restarted = taipei(2026, 5, 4, 9, 0, 0) + chrono::Duration::milliseconds(500);
        trigger_loop.rearm(restarted).await;
        assert_eq!(trigger_loop.armed()[0].1, taipei(2026, 5, 5, 9, 0, 0));
        assert_eq!(trigger_loop.tick_at(restarted), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_does_not_stop_ticking() {
        let dir = tempfile::tempdir().unwrap();
        let (_table, mut trigger_loop, rx) = setup(dir.path(), &[("09:00", "campaignA")], true).await;
        drop(rx);
        trigger_loop.rearm(taipei(2026, 5, 4, 8, 0, 0)).await;

        assert_eq!(trigger_loop.tick_at(taipei(2026, 5, 4, 9, 0, 0)), 0);
        // Still re-armed for tomorrow.
        assert_eq!(trigger_loop.armed()[0].1, taipei(2026, 5, 5, 9, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_loop_picks_up_edit_and_fires_at_new_instant() {
        let dir = tempfile::tempdir().unwrap();
        let (table, trigger_loop, mut rx) = setup(dir.path(), &[("09:00", "campaignA")], true).await;
        let handle = trigger_loop.with_clock(paused_clock(taipei(2026, 5, 4, 8, 59, 0))).spawn();

        tokio::time::sleep(Duration::from_secs(5)).await;
        table.add("09:01", "campaignB").await.unwrap();

        tokio::time::sleep(Duration::from_secs(125)).await;
        let jobs = drain(&mut rx);
        let fired: Vec<(&str, DateTime<Utc>)> = jobs.iter().map(|j| (j.campaign_id.as_str(), j.scheduled_for)).collect();
        assert_eq!(
            fired,
            vec![
                ("campaignA", taipei(2026, 5, 4, 9, 0, 0)),
                ("campaignB", taipei(2026, 5, 4, 9, 1, 0)),
            ]
        );
        assert!(jobs.iter().all(|j| j.triggered_by_schedule));

        // Still polling after both fired.
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_loop_adopts_edit_saved_by_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let (_table, trigger_loop, mut rx) = setup(dir.path(), &[], false).await;
        let handle = trigger_loop.with_clock(paused_clock(taipei(2026, 5, 4, 8, 59, 0))).spawn();

        tokio::time::sleep(Duration::from_secs(2)).await;
        // Same data directory, separate table: what the admin CLI does.
        let cli = open_table(dir.path());
        cli.add("09:00", "campaignB").await.unwrap();
        cli.set_enabled(true).await.unwrap();

        tokio::time::sleep(Duration::from_secs(70)).await;
        let jobs = drain(&mut rx);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].campaign_id, "campaignB");
        assert_eq!(jobs[0].scheduled_for, taipei(2026, 5, 4, 9, 0, 0));
        handle.abort();
    }
}
