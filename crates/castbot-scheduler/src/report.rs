//! Report emitter — human-readable summaries sent to the control destination.
//! Best-effort only: a report that fails to send is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use castbot_core::MessageSender;

use crate::delivery::DeliveryRun;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Failed destinations listed by name before the list is cut.
const MAX_LISTED_FAILURES: usize = 10;

/// Facts for the startup notice.
#[derive(Debug, Clone)]
pub struct StartupInfo {
    pub enabled: bool,
    pub entries: usize,
    pub targets: usize,
    pub timezone: String,
    pub process_incarnation: u64,
}

pub struct ReportEmitter {
    sender: Arc<dyn MessageSender>,
    control: Option<i64>,
}

impl ReportEmitter {
    pub fn new(sender: Arc<dyn MessageSender>, control: Option<i64>) -> Self {
        Self { sender, control }
    }

    pub fn control(&self) -> Option<i64> {
        self.control
    }

    pub async fn format_and_send(&self, run: &DeliveryRun, process_incarnation: u64) {
        self.send_control(&format_report(run, process_incarnation)).await;
    }

    pub async fn send_abort_notice(&self, campaign_id: &str, reason: &str) {
        let text = format!("⚠️ Broadcast aborted\n\n📁 Campaign: {campaign_id}\nReason: {reason}");
        self.send_control(&text).await;
    }

    pub async fn send_startup_notice(&self, info: &StartupInfo) {
        let text = format!(
            "🤖 Broadcast bot started\n\n\
             - Status: {}\n\
             - Schedule entries: {}\n\
             - Targets: {}\n\
             - Timezone: {}\n\
             - Incarnation: R{}",
            if info.enabled { "enabled" } else { "disabled" },
            info.entries,
            info.targets,
            info.timezone,
            info.process_incarnation
        );
        self.send_control(&text).await;
    }

    async fn send_control(&self, text: &str) {
        let Some(control) = self.control else {
            tracing::debug!("No control destination configured, report skipped");
            return;
        };
        match tokio::time::timeout(SEND_TIMEOUT, self.sender.send_text(control, text)).await {
            Ok(Ok(())) => tracing::debug!("📨 Report sent to control destination {control}"),
            Ok(Err(e)) => tracing::warn!("⚠️ Failed to send report to control destination {control}: {e}"),
            Err(_) => tracing::warn!("⚠️ Report to control destination {control} timed out"),
        }
    }
}

/// Fixed-layout summary of one run.
pub fn format_report(run: &DeliveryRun, process_incarnation: u64) -> String {
    let mut text = format!(
        "📊 Broadcast report\n\n\
         ✅ Success: {}\n\
         ❌ Failed: {}\n\
         📋 Total: {}\n\
         📁 Campaign: {}\n\
         📈 Success rate: {}\n\
         🔄 Incarnation: R{}\n\
         🕐 Started: {}",
        run.success_count,
        run.failure_count(),
        run.total_count,
        run.campaign_id,
        run.success_rate(),
        process_incarnation,
        run.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    let failed: Vec<_> = run.failed().collect();
    if !failed.is_empty() {
        text.push_str("\n\nFailed destinations:");
        for outcome in failed.iter().take(MAX_LISTED_FAILURES) {
            text.push_str(&format!(
                "\n• {} — {}",
                outcome.destination,
                outcome.last_error.as_deref().unwrap_or("unknown error")
            ));
        }
        if failed.len() > MAX_LISTED_FAILURES {
            text.push_str(&format!("\n• … and {} more", failed.len() - MAX_LISTED_FAILURES));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryPolicy, deliver};
    use crate::testing::MockSender;
    use castbot_core::{ContentPayload, Destination};

    async fn sample_run(sender: &MockSender) -> DeliveryRun {
        let policy = DeliveryPolicy {
            max_retries: 1,
            inter_send_delay: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            send_timeout: Duration::from_secs(1),
        };
        let targets = vec![Destination::new(1, "Alpha"), Destination::new(2, "Beta")];
        deliver(sender, "promo", &ContentPayload::text("hi"), &targets, &policy).await
    }

    #[tokio::test]
    async fn test_report_layout() {
        let sender = MockSender::new().failing(2);
        let run = sample_run(&sender).await;
        let text = format_report(&run, 7);

        assert!(text.contains("✅ Success: 1"));
        assert!(text.contains("❌ Failed: 1"));
        assert!(text.contains("📋 Total: 2"));
        assert!(text.contains("📁 Campaign: promo"));
        assert!(text.contains("📈 Success rate: 50.0%"));
        assert!(text.contains("🔄 Incarnation: R7"));
        assert!(text.contains("Beta (2)"));
        assert!(!text.contains("Alpha (1)"));
    }

    #[tokio::test]
    async fn test_report_goes_to_control_only() {
        let delivery_sender = MockSender::new();
        let run = sample_run(&delivery_sender).await;

        let control_sender = Arc::new(MockSender::new());
        let emitter = ReportEmitter::new(control_sender.clone(), Some(-900));
        emitter.format_and_send(&run, 3).await;

        let sent = control_sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to(), -900);
        assert!(sent[0].body().starts_with("📊 Broadcast report"));
    }

    #[tokio::test]
    async fn test_report_failure_is_swallowed() {
        let run = sample_run(&MockSender::new()).await;
        let control_sender = Arc::new(MockSender::new().failing(-900));
        let emitter = ReportEmitter::new(control_sender.clone(), Some(-900));

        emitter.format_and_send(&run, 1).await;
        emitter.send_abort_notice("promo", "no content").await;
        assert_eq!(control_sender.attempts(-900), 2);
        assert!(control_sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_no_control_destination() {
        let run = sample_run(&MockSender::new()).await;
        let control_sender = Arc::new(MockSender::new());
        let emitter = ReportEmitter::new(control_sender.clone(), None);
        emitter.format_and_send(&run, 1).await;
        assert!(control_sender.sent().is_empty());
    }
}
