//! Test doubles: a scripted sender and an in-memory content source.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use castbot_core::{CastError, ContentPayload, ContentSource, Destination, MediaKind, MessageSender, Result};

/// What a successful send carried.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text { to: i64, text: String },
    Media { to: i64, kind: MediaKind, path: PathBuf, caption: String },
}

impl Sent {
    pub fn to(&self) -> i64 {
        match self {
            Sent::Text { to, .. } | Sent::Media { to, .. } => *to,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Sent::Text { text, .. } => text,
            Sent::Media { caption, .. } => caption,
        }
    }
}

/// Sender whose per-destination behaviour is scripted up front.
#[derive(Default)]
pub struct MockSender {
    failing: HashSet<i64>,
    flaky: Mutex<HashMap<i64, u32>>,
    hanging: HashSet<i64>,
    sent: Mutex<Vec<Sent>>,
    attempts: Mutex<HashMap<i64, u32>>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `id` fails.
    pub fn failing(mut self, id: i64) -> Self {
        self.failing.insert(id);
        self
    }

    /// The first `times` sends to `id` fail, later ones succeed.
    pub fn flaky(self, id: i64, times: u32) -> Self {
        self.flaky.lock().unwrap().insert(id, times);
        self
    }

    /// Sends to `id` never complete.
    pub fn hanging(mut self, id: i64) -> Self {
        self.hanging.insert(id);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, id: i64) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.to() == id).collect()
    }

    pub fn attempts(&self, id: i64) -> u32 {
        self.attempts.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    async fn attempt(&self, to: i64, sent: Sent) -> Result<()> {
        *self.attempts.lock().unwrap().entry(to).or_default() += 1;
        if self.hanging.contains(&to) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&to) {
            return Err(CastError::Transport(format!("chat {to} unreachable")));
        }
        {
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(left) = flaky.get_mut(&to)
                && *left > 0
            {
                *left -= 1;
                return Err(CastError::Transport(format!("chat {to} flaked")));
            }
        }
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }
}

#[async_trait]
impl MessageSender for MockSender {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_text(&self, destination_id: i64, text: &str) -> Result<()> {
        let sent = Sent::Text {
            to: destination_id,
            text: text.to_string(),
        };
        self.attempt(destination_id, sent).await
    }

    async fn send_media(&self, destination_id: i64, kind: MediaKind, file_path: &Path, caption: &str) -> Result<()> {
        let sent = Sent::Media {
            to: destination_id,
            kind,
            path: file_path.to_path_buf(),
            caption: caption.to_string(),
        };
        self.attempt(destination_id, sent).await
    }

    async fn resolve_destination(&self, destination_id: i64) -> Result<Destination> {
        if self.failing.contains(&destination_id) {
            return Err(CastError::Transport(format!("chat {destination_id} unreachable")));
        }
        Ok(Destination::new(destination_id, format!("chat {destination_id}")))
    }
}

/// Campaigns held in memory.
#[derive(Default)]
pub struct StaticContent {
    campaigns: HashMap<String, ContentPayload>,
}

impl StaticContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, campaign: &str, text: &str) -> Self {
        self.with(campaign, ContentPayload::text(text))
    }

    pub fn with(mut self, campaign: &str, payload: ContentPayload) -> Self {
        self.campaigns.insert(campaign.to_string(), payload);
        self
    }
}

#[async_trait]
impl ContentSource for StaticContent {
    async fn resolve(&self, campaign_id: &str) -> Result<ContentPayload> {
        self.campaigns
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| CastError::UnknownCampaign(campaign_id.to_string()))
    }

    async fn list_campaigns(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.campaigns.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
