//! `BroadcastService` — one handle over the table, ledger, reporter and
//! delivery engine. The trigger loop's dispatcher and the CLI both go
//! through it.

use std::sync::Arc;

use castbot_core::{BotConfig, ContentPayload, ContentSource, Destination, MessageSender, Result};

use crate::delivery::{self, DeliveryPolicy, DeliveryRun};
use crate::engine::DeliveryJob;
use crate::history::{HistoryLedger, HistoryRecord, HistoryStats};
use crate::report::{ReportEmitter, StartupInfo};
use crate::schedule::{ScheduleConfig, ScheduleTable};
use crate::store::{RuntimeState, SettingsStore};

pub struct BroadcastService {
    table: Arc<ScheduleTable>,
    content: Arc<dyn ContentSource>,
    sender: Arc<dyn MessageSender>,
    ledger: HistoryLedger,
    reporter: ReportEmitter,
    policy: DeliveryPolicy,
    runtime: RuntimeState,
}

impl BroadcastService {
    /// Wire the service over the data directory named by `config`.
    pub fn open(
        config: &BotConfig,
        sender: Arc<dyn MessageSender>,
        content: Arc<dyn ContentSource>,
        runtime: RuntimeState,
    ) -> Self {
        let data_dir = config.data_path();
        let table = Arc::new(ScheduleTable::open(
            SettingsStore::new(&data_dir),
            content.clone(),
            &runtime.default_campaign_id,
            &config.default_timezone,
        ));
        Self {
            table,
            content,
            ledger: HistoryLedger::new(&data_dir, config.history_limit),
            reporter: ReportEmitter::new(sender.clone(), config.control_destination()),
            sender,
            policy: DeliveryPolicy::from(&config.delivery),
            runtime,
        }
    }

    pub fn table(&self) -> &Arc<ScheduleTable> {
        &self.table
    }

    pub fn process_incarnation(&self) -> u64 {
        self.runtime.process_incarnation
    }

    /// Resolve, deliver, record and report one job.
    ///
    /// An unresolvable campaign is an error; an undeliverable payload comes
    /// back as an aborted run. Neither is written to history, both produce
    /// an abort notice on the control destination.
    pub async fn execute(&self, job: &DeliveryJob) -> Result<DeliveryRun> {
        let payload = match self.content.resolve(&job.campaign_id).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(campaign = %job.campaign_id, "❌ Cannot resolve campaign: {e}");
                self.reporter.send_abort_notice(&job.campaign_id, &e.to_string()).await;
                return Err(e);
            }
        };

        // Held for the whole run; target edits made meanwhile apply to the next one.
        let targets = self.table.targets().await;
        let run = delivery::deliver(self.sender.as_ref(), &job.campaign_id, &payload, &targets, &self.policy).await;

        if let Some(reason) = &run.aborted {
            self.reporter.send_abort_notice(&job.campaign_id, reason).await;
            return Ok(run);
        }

        let incarnation = self.runtime.process_incarnation;
        self.ledger
            .append(HistoryRecord::from_run(&run, job.triggered_by_schedule, incarnation))
            .await;
        self.reporter.format_and_send(&run, incarnation).await;
        Ok(run)
    }

    /// Broadcast `campaign_id` now, outside the schedule.
    pub async fn run_test_broadcast(&self, campaign_id: &str) -> Result<DeliveryRun> {
        tracing::info!("🧪 Test broadcast: {campaign_id}");
        self.execute(&DeliveryJob::manual(campaign_id)).await
    }

    pub async fn get_schedule_state(&self) -> ScheduleConfig {
        self.table.snapshot().await
    }

    pub async fn get_history(&self, limit: usize) -> Vec<HistoryRecord> {
        self.ledger.recent(limit).await
    }

    pub async fn history_stats(&self) -> HistoryStats {
        self.ledger.stats(self.runtime.process_incarnation).await
    }

    pub async fn list_campaigns(&self) -> Result<Vec<String>> {
        self.content.list_campaigns().await
    }

    /// Render what `campaign_id` would send, without sending it.
    pub async fn preview(&self, campaign_id: &str) -> Result<String> {
        let payload = self.content.resolve(campaign_id).await?;
        let mut text = format!("📁 Campaign: {campaign_id}\n");
        match &payload {
            ContentPayload::TextOnly(_) => text.push_str("📝 Type: text\n"),
            ContentPayload::Media { kind, path, .. } => {
                text.push_str(&format!("🖼️ Type: {kind} ({})\n", path.display()));
            }
        }
        if !payload.is_deliverable() {
            text.push_str("⚠️ Nothing to send: the text is empty\n");
        }
        text.push('\n');
        text.push_str(payload.text_body());
        Ok(text)
    }

    /// Add a target by id, looking up its display name first.
    pub async fn add_target_by_id(&self, destination_id: i64) -> Result<Destination> {
        let destination = self.sender.resolve_destination(destination_id).await?;
        self.table.add_target(destination.clone()).await?;
        Ok(destination)
    }

    pub async fn send_startup_notice(&self) {
        let config = self.table.snapshot().await;
        let info = StartupInfo {
            enabled: config.enabled,
            entries: config.entries.len(),
            targets: self.table.targets().await.len(),
            timezone: config.timezone,
            process_incarnation: self.runtime.process_incarnation,
        };
        self.reporter.send_startup_notice(&info).await;
    }
}
