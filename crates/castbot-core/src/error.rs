//! Error types for Castbot.

use std::time::Duration;

use thiserror::Error;

/// The error type shared by every Castbot crate.
#[derive(Debug, Error)]
pub enum CastError {
    /// Time-of-day string is not a valid 24-hour `HH:MM`.
    #[error("malformed time '{0}': expected HH:MM (24-hour)")]
    MalformedTime(String),

    #[error("schedule entry {time} → {campaign_id} already exists")]
    DuplicateEntry { time: String, campaign_id: String },

    #[error("schedule entry {time} → {campaign_id} not found")]
    EntryNotFound { time: String, campaign_id: String },

    /// Campaign could not be resolved by the content source.
    #[error("unknown campaign: {0}")]
    UnknownCampaign(String),

    /// `enabled` cannot be switched on while there are no entries.
    #[error("cannot enable broadcasting: the schedule is empty")]
    EmptySchedule,

    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("destination {0} is already a target")]
    DuplicateDestination(i64),

    #[error("destination {0} is not a target")]
    DestinationNotFound(i64),

    /// A single send attempt failed at the transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single send attempt exceeded its time budget.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// Campaign has neither text nor media.
    #[error("campaign '{0}' has no deliverable content")]
    InvalidPayload(String),

    /// Durable write failed. The in-memory change still stands.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CastError {
    /// Synchronous rejections that leave state untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CastError::MalformedTime(_)
                | CastError::DuplicateEntry { .. }
                | CastError::EntryNotFound { .. }
                | CastError::UnknownCampaign(_)
                | CastError::EmptySchedule
                | CastError::InvalidTimezone(_)
                | CastError::DuplicateDestination(_)
                | CastError::DestinationNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(CastError::EmptySchedule.is_validation());
        assert!(CastError::MalformedTime("25:00".into()).is_validation());
        assert!(!CastError::Transport("boom".into()).is_validation());
        assert!(!CastError::Persistence("disk full".into()).is_validation());
    }

    #[test]
    fn test_messages() {
        let err = CastError::DuplicateEntry {
            time: "09:00".into(),
            campaign_id: "promo".into(),
        };
        assert_eq!(err.to_string(), "schedule entry 09:00 → promo already exists");
        assert_eq!(
            CastError::Timeout(Duration::from_secs(30)).to_string(),
            "send timed out after 30s"
        );
    }
}
