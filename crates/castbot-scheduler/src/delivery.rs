//! Delivery engine — fan-out of one payload to a destination list.
//!
//! Per destination: up to `max_retries` strictly sequential attempts, each
//! bounded by `send_timeout`, separated by `retry_backoff`. Between
//! destinations (not after the last): `inter_send_delay`, which keeps the
//! transport's flood protection quiet. One destination failing for good
//! never stops the run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use castbot_core::config::DeliveryConfig;
use castbot_core::{CastError, ContentPayload, Destination, MessageSender, Result};

/// Retry and pacing knobs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPolicy {
    pub max_retries: u32,
    pub inter_send_delay: Duration,
    pub retry_backoff: Duration,
    pub send_timeout: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            inter_send_delay: config.inter_send_delay(),
            retry_backoff: config.retry_backoff(),
            send_timeout: config.send_timeout(),
        }
    }
}

/// How one destination fared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationOutcome {
    pub destination: Destination,
    pub success: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// One broadcast execution, start to finish.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRun {
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    pub campaign_id: String,
    pub outcomes: BTreeMap<i64, DestinationOutcome>,
    pub success_count: usize,
    pub total_count: usize,
    /// Set when the run stopped before any send.
    pub aborted: Option<String>,
}

impl DeliveryRun {
    fn aborted(campaign_id: &str, start_time: DateTime<Utc>, reason: String) -> Self {
        Self {
            start_time,
            finish_time: Utc::now(),
            campaign_id: campaign_id.to_string(),
            outcomes: BTreeMap::new(),
            success_count: 0,
            total_count: 0,
            aborted: Some(reason),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn failure_count(&self) -> usize {
        self.total_count - self.success_count
    }

    pub fn success_rate(&self) -> String {
        format_success_rate(self.success_count, self.total_count)
    }

    pub fn failed(&self) -> impl Iterator<Item = &DestinationOutcome> {
        self.outcomes.values().filter(|o| !o.success)
    }
}

/// `success / total` as a one-decimal percentage; `"0%"` when nothing was attempted.
pub fn format_success_rate(success: usize, total: usize) -> String {
    if total == 0 {
        return "0%".into();
    }
    format!("{:.1}%", success as f64 / total as f64 * 100.0)
}

/// Send `payload` to every destination in list order.
pub async fn deliver(
    sender: &dyn MessageSender,
    campaign_id: &str,
    payload: &ContentPayload,
    destinations: &[Destination],
    policy: &DeliveryPolicy,
) -> DeliveryRun {
    let start_time = Utc::now();
    if !payload.is_deliverable() {
        let err = CastError::InvalidPayload(campaign_id.to_string());
        tracing::warn!("🚫 Broadcast aborted before any send: {err}");
        return DeliveryRun::aborted(campaign_id, start_time, err.to_string());
    }

    let total = destinations.len();
    tracing::info!(
        campaign = campaign_id,
        via = sender.name(),
        "📢 Broadcasting to {total} destinations"
    );

    let mut outcomes = BTreeMap::new();
    let mut success_count = 0;
    for (i, destination) in destinations.iter().enumerate() {
        let position = i + 1;
        let outcome = deliver_one(sender, payload, destination, policy, position, total).await;
        if outcome.success {
            success_count += 1;
        }
        outcomes.insert(destination.id, outcome);

        if position < total && !policy.inter_send_delay.is_zero() {
            tokio::time::sleep(policy.inter_send_delay).await;
        }
    }

    let run = DeliveryRun {
        start_time,
        finish_time: Utc::now(),
        campaign_id: campaign_id.to_string(),
        outcomes,
        success_count,
        total_count: total,
        aborted: None,
    };
    tracing::info!(
        campaign = campaign_id,
        "📊 Broadcast finished: {}/{} ({})",
        run.success_count,
        run.total_count,
        run.success_rate()
    );
    run
}

async fn deliver_one(
    sender: &dyn MessageSender,
    payload: &ContentPayload,
    destination: &Destination,
    policy: &DeliveryPolicy,
    position: usize,
    total: usize,
) -> DestinationOutcome {
    let max_attempts = policy.max_retries.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match send_once(sender, payload, destination.id, policy.send_timeout).await {
            Ok(()) => {
                tracing::info!("✅ [{position}/{total}] Sent to {destination}");
                return DestinationOutcome {
                    destination: destination.clone(),
                    success: true,
                    attempts: attempt,
                    last_error: None,
                };
            }
            Err(e) => {
                tracing::warn!(
                    "❌ [{position}/{total}] Send to {destination} failed (attempt {attempt}/{max_attempts}): {e}"
                );
                last_error = Some(e.to_string());
                if attempt < max_attempts {
                    tokio::time::sleep(policy.retry_backoff).await;
                }
            }
        }
    }

    DestinationOutcome {
        destination: destination.clone(),
        success: false,
        attempts: max_attempts,
        last_error,
    }
}

async fn send_once(
    sender: &dyn MessageSender,
    payload: &ContentPayload,
    destination_id: i64,
    limit: Duration,
) -> Result<()> {
    let send = async {
        match payload {
            ContentPayload::TextOnly(text) => sender.send_text(destination_id, text).await,
            ContentPayload::Media { caption, kind, path } => {
                sender.send_media(destination_id, *kind, path, caption).await
            }
        }
    };
    tokio::time::timeout(limit, send)
        .await
        .unwrap_or(Err(CastError::Timeout(limit)))
}
