//! Collaborator seams consumed by the scheduling-and-delivery engine.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::types::{ContentPayload, Destination, MediaKind};

/// Sends messages to chat destinations.
///
/// Implementations make exactly one attempt per call. Retrying, pacing and
/// timeouts belong to the delivery engine.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send_text(&self, destination_id: i64, text: &str) -> Result<()>;

    async fn send_media(
        &self,
        destination_id: i64,
        kind: MediaKind,
        file_path: &Path,
        caption: &str,
    ) -> Result<()>;

    /// Look up a destination's display name by id.
    async fn resolve_destination(&self, destination_id: i64) -> Result<Destination>;
}

/// Resolves campaign identifiers into deliverable content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fails with `CastError::UnknownCampaign` when the campaign does not exist.
    async fn resolve(&self, campaign_id: &str) -> Result<ContentPayload>;

    async fn list_campaigns(&self) -> Result<Vec<String>>;
}
