//! Schedule table — the single writer for schedule entries, the enabled flag,
//! the timezone and the target list.
//!
//! Every mutation takes the data-directory lock, adopts whatever another
//! process wrote since, applies the change, persists the whole settings
//! document and bumps the re-arm generation that the trigger loop watches.
//! A failed write is logged and the in-memory change stands for the life of
//! the process.
//!
//! The admin CLI edits settings from its own process; the running bot picks
//! those edits up through [`ScheduleTable::refresh`], which the trigger loop
//! calls every tick.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

use castbot_core::{CastError, ContentSource, Destination, Result};

use crate::clock;
use crate::store::{self, Settings, SettingsStore};

/// One `(time-of-day, campaign)` pair. Ordered by time, then campaign.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScheduleEntry {
    #[serde(rename = "time")]
    pub time_of_day: String,
    #[serde(alias = "campaign")]
    pub campaign_id: String,
}

impl ScheduleEntry {
    pub fn new(time_of_day: impl Into<String>, campaign_id: impl Into<String>) -> Self {
        Self {
            time_of_day: time_of_day.into(),
            campaign_id: campaign_id.into(),
        }
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.time_of_day, self.campaign_id)
    }
}

/// Read-only view of the schedule state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleConfig {
    pub entries: Vec<ScheduleEntry>,
    pub enabled: bool,
    pub timezone: String,
}

/// An entry together with its next trigger instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Upcoming {
    pub entry: ScheduleEntry,
    pub next: DateTime<Utc>,
    pub countdown: Duration,
}

struct TableState {
    settings: Settings,
    /// Shared with in-flight runs; replaced, never mutated.
    targets: Arc<[Destination]>,
}

pub struct ScheduleTable {
    state: Mutex<TableState>,
    store: SettingsStore,
    content: Arc<dyn ContentSource>,
    rearm: watch::Sender<u64>,
    default_campaign: String,
    default_timezone: String,
}

/// An unknown persisted timezone falls back to UTC.
fn fallback_timezone(settings: &mut Settings) {
    if clock::parse_timezone(&settings.timezone).is_err() {
        tracing::warn!("⚠️ Timezone '{}' is invalid, using UTC", settings.timezone);
        settings.timezone = "UTC".into();
    }
}

impl ScheduleTable {
    /// Load persisted settings. An unknown persisted timezone falls back to UTC.
    pub fn open(
        store: SettingsStore,
        content: Arc<dyn ContentSource>,
        default_campaign: &str,
        default_timezone: &str,
    ) -> Self {
        let mut settings = store.load(default_campaign, default_timezone);
        fallback_timezone(&mut settings);
        tracing::info!(
            "📅 Schedule loaded: {} entries, {} targets, {} ({})",
            settings.schedule_entries.len(),
            settings.target_destinations.len(),
            if settings.enabled { "enabled" } else { "disabled" },
            settings.timezone
        );
        let targets: Arc<[Destination]> = settings.target_destinations.clone().into();
        let (rearm, _) = watch::channel(0);
        Self {
            state: Mutex::new(TableState { settings, targets }),
            store,
            content,
            rearm,
            default_campaign: default_campaign.to_string(),
            default_timezone: default_timezone.to_string(),
        }
    }

    /// Adopt settings another process saved since our last read or write.
    /// Returns whether anything was adopted; adoption re-arms.
    pub async fn refresh(&self) -> bool {
        let adopted = {
            let mut state = self.state.lock().await;
            self.adopt_newer(&mut state)
        };
        if adopted {
            tracing::info!("🔁 Settings changed on disk, schedule reloaded");
            self.signal_rearm();
        }
        adopted
    }

    /// Receiver that changes whenever the trigger loop must re-arm.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.rearm.subscribe()
    }

    pub async fn snapshot(&self) -> ScheduleConfig {
        let state = self.state.lock().await;
        ScheduleConfig {
            entries: state.settings.schedule_entries.clone(),
            enabled: state.settings.enabled,
            timezone: state.settings.timezone.clone(),
        }
    }

    pub async fn list(&self) -> Vec<ScheduleEntry> {
        self.state.lock().await.settings.schedule_entries.clone()
    }

    pub async fn timezone(&self) -> Tz {
        let state = self.state.lock().await;
        clock::parse_timezone(&state.settings.timezone).unwrap_or(Tz::UTC)
    }

    /// Add an entry. The campaign must resolve now rather than at fire time.
    pub async fn add(&self, time_of_day: &str, campaign_id: &str) -> Result<ScheduleEntry> {
        clock::parse_time_of_day(time_of_day)?;
        if let Err(e) = self.content.resolve(campaign_id).await {
            tracing::debug!("Campaign '{campaign_id}' failed to resolve: {e}");
            return Err(CastError::UnknownCampaign(campaign_id.to_string()));
        }

        let entry = ScheduleEntry::new(time_of_day, campaign_id);
        self.commit(|settings| {
            let entries = &mut settings.schedule_entries;
            if entries.contains(&entry) {
                return Err(CastError::DuplicateEntry {
                    time: entry.time_of_day.clone(),
                    campaign_id: entry.campaign_id.clone(),
                });
            }
            entries.push(entry.clone());
            entries.sort();
            Ok(())
        })
        .await?;
        tracing::info!("📅 Schedule entry added: {entry}");
        self.signal_rearm();
        Ok(entry)
    }

    /// Remove an entry. Removing the last one also disables broadcasting.
    pub async fn remove(&self, time_of_day: &str, campaign_id: &str) -> Result<()> {
        self.commit(|settings| {
            let before = settings.schedule_entries.len();
            settings
                .schedule_entries
                .retain(|e| !(e.time_of_day == time_of_day && e.campaign_id == campaign_id));
            if settings.schedule_entries.len() == before {
                return Err(CastError::EntryNotFound {
                    time: time_of_day.to_string(),
                    campaign_id: campaign_id.to_string(),
                });
            }
            if settings.schedule_entries.is_empty() && settings.enabled {
                tracing::info!("⏸️ Last entry removed, broadcasting disabled");
                settings.enabled = false;
            }
            Ok(())
        })
        .await?;
        tracing::info!("🗑️ Schedule entry removed: {time_of_day} → {campaign_id}");
        self.signal_rearm();
        Ok(())
    }

    /// Drop every entry and disable broadcasting. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let removed = self
            .commit(|settings| {
                let removed = settings.schedule_entries.len();
                settings.schedule_entries.clear();
                settings.enabled = false;
                Ok(removed)
            })
            .await
            .unwrap_or_default();
        tracing::info!("🧹 Schedule cleared ({removed} entries), broadcasting disabled");
        self.signal_rearm();
        removed
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.commit(|settings| {
            if enabled && settings.schedule_entries.is_empty() {
                return Err(CastError::EmptySchedule);
            }
            settings.enabled = enabled;
            Ok(())
        })
        .await?;
        tracing::info!("{}", if enabled { "▶️ Broadcasting enabled" } else { "⏸️ Broadcasting disabled" });
        self.signal_rearm();
        Ok(())
    }

    pub async fn set_timezone(&self, timezone: &str) -> Result<()> {
        let tz = clock::parse_timezone(timezone)?;
        self.commit(|settings| {
            settings.timezone = tz.name().to_string();
            Ok(())
        })
        .await?;
        tracing::info!("🌐 Timezone set to {}", tz.name());
        self.signal_rearm();
        Ok(())
    }

    /// Entries with their next trigger instant, soonest first.
    pub async fn upcoming(&self, now: DateTime<Utc>) -> Vec<Upcoming> {
        let (entries, tz) = {
            let state = self.state.lock().await;
            let tz = clock::parse_timezone(&state.settings.timezone).unwrap_or(Tz::UTC);
            (state.settings.schedule_entries.clone(), tz)
        };
        let mut upcoming: Vec<Upcoming> = entries
            .into_iter()
            .filter_map(|entry| {
                let next = clock::next_trigger_instant(&entry.time_of_day, tz, now).ok()?;
                Some(Upcoming {
                    entry,
                    next,
                    countdown: next - now,
                })
            })
            .collect();
        upcoming.sort_by_key(|u| u.next);
        upcoming
    }

    // ─── Targets ──────────────────────────────────────────────

    /// Current target list, shared by reference with delivery runs.
    pub async fn targets(&self) -> Arc<[Destination]> {
        self.state.lock().await.targets.clone()
    }

    pub async fn add_target(&self, destination: Destination) -> Result<()> {
        self.commit(|settings| {
            if settings.target_destinations.iter().any(|d| d.id == destination.id) {
                return Err(CastError::DuplicateDestination(destination.id));
            }
            settings.target_destinations.push(destination.clone());
            Ok(())
        })
        .await?;
        tracing::info!("🎯 Target added: {destination}");
        Ok(())
    }

    pub async fn remove_target(&self, destination_id: i64) -> Result<Destination> {
        let removed = self
            .commit(|settings| {
                let idx = settings
                    .target_destinations
                    .iter()
                    .position(|d| d.id == destination_id)
                    .ok_or(CastError::DestinationNotFound(destination_id))?;
                Ok(settings.target_destinations.remove(idx))
            })
            .await?;
        tracing::info!("🎯 Target removed: {removed}");
        Ok(removed)
    }

    /// Apply `change` to the latest settings while holding the directory lock.
    /// A rejected change leaves the document untouched.
    async fn commit<T>(&self, change: impl FnOnce(&mut Settings) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut adopted = false;
        let result = store::with_dir_lock(self.store.dir(), || -> Result<T> {
            adopted = self.adopt_newer(&mut state);
            let value = change(&mut state.settings)?;
            state.targets = state.settings.target_destinations.clone().into();
            self.persist(&mut state.settings);
            Ok(value)
        });
        drop(state);
        if adopted && result.is_err() {
            self.signal_rearm();
        }
        result
    }

    fn adopt_newer(&self, state: &mut TableState) -> bool {
        let Some(mut settings) =
            self.store
                .load_newer(state.settings.revision, &self.default_campaign, &self.default_timezone)
        else {
            return false;
        };
        fallback_timezone(&mut settings);
        tracing::debug!("Adopting settings revision {}", settings.revision);
        state.targets = settings.target_destinations.clone().into();
        state.settings = settings;
        true
    }

    fn persist(&self, settings: &mut Settings) {
        settings.revision += 1;
        settings.last_updated = Some(Utc::now());
        if let Err(e) = self.store.save(settings) {
            tracing::error!("❌ Failed to persist settings (change kept in memory): {e}");
        }
    }

    fn signal_rearm(&self) {
        self.rearm.send_modify(|generation| *generation += 1);
    }
}
