//! File-based stores — one JSON document per concern.
//! Documents are rewritten whole (temp file + rename), never appended to.
//! Absent or unparseable documents load as defaults.
//!
//! The bot and the admin CLI run as separate processes over the same data
//! directory. Read-modify-write cycles hold an exclusive lock on
//! [`LOCK_FILE`] so neither side loses the other's write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use castbot_core::{CastError, Destination, Result};

use crate::schedule::ScheduleEntry;

pub const SETTINGS_FILE: &str = "settings.json";
pub const RUNTIME_FILE: &str = "runtime.json";
pub const HISTORY_FILE: &str = "history.json";
pub const LOCK_FILE: &str = ".castbot.lock";

/// Persisted schedule + target configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub target_destinations: Vec<Destination>,
    pub schedule_entries: Vec<ScheduleEntry>,
    pub enabled: bool,
    pub timezone: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Bumped on every save; a higher value on disk means another process wrote.
    #[serde(default)]
    pub revision: u64,
}

impl Settings {
    pub fn empty(timezone: &str) -> Self {
        Self {
            target_destinations: Vec::new(),
            schedule_entries: Vec::new(),
            enabled: false,
            timezone: timezone.to_string(),
            last_updated: None,
            revision: 0,
        }
    }
}

/// Every shape the settings document has had on disk.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default, alias = "target_groups")]
    target_destinations: Vec<Destination>,
    #[serde(default, alias = "schedules")]
    schedule_entries: Option<Vec<ScheduleEntry>>,
    #[serde(default)]
    broadcast_times: Option<Vec<String>>,
    #[serde(default)]
    broadcast_time: Option<String>,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default, deserialize_with = "lenient_instant")]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    revision: u64,
}

impl RawSettings {
    /// Returns the current form plus whether the document needs rewriting.
    fn upgrade(self, default_campaign: &str, default_timezone: &str) -> (Settings, bool) {
        let bind = |time: String| ScheduleEntry::new(time, default_campaign);
        let (mut entries, upgraded) = match (self.schedule_entries, self.broadcast_times, self.broadcast_time) {
            (Some(entries), _, _) => (entries, false),
            (None, Some(times), _) => (times.into_iter().map(bind).collect(), true),
            (None, None, Some(time)) if !time.trim().is_empty() => (vec![bind(time)], true),
            (None, None, _) => (Vec::new(), false),
        };
        entries.sort();
        entries.dedup();

        // One outcome per destination id; the first listing wins.
        let mut targets = self.target_destinations;
        let listed = targets.len();
        let mut seen = HashSet::new();
        targets.retain(|d| seen.insert(d.id));
        if targets.len() != listed {
            tracing::warn!("⚠️ Dropped {} duplicate target(s)", listed - targets.len());
        }

        let settings = Settings {
            target_destinations: targets,
            schedule_entries: entries,
            enabled: self.enabled,
            timezone: self.timezone.unwrap_or_else(|| default_timezone.to_string()),
            last_updated: self.last_updated,
            revision: self.revision,
        };
        let rewrite = upgraded || settings.target_destinations.len() != listed;
        (settings, rewrite)
    }
}

/// Process-wide runtime document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    #[serde(default = "default_campaign", alias = "default_message_file")]
    pub default_campaign_id: String,
    #[serde(default, alias = "total_restarts")]
    pub process_incarnation: u64,
    #[serde(default, alias = "last_startup", deserialize_with = "lenient_instant")]
    pub last_start: Option<DateTime<Utc>>,
}

fn default_campaign() -> String {
    "default".into()
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            default_campaign_id: default_campaign(),
            process_incarnation: 0,
            last_start: None,
        }
    }
}

/// Older documents carry naive local timestamps; those read as absent.
fn lenient_instant<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc))))
}

/// Serialize and replace `path` in one rename. Each write gets its own temp
/// file so concurrent writers never share one.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CastError::Persistence(format!("create {}: {e}", parent.display())))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
    if let Err(e) = std::fs::write(&tmp, json) {
        let _ = std::fs::remove_file(&tmp);
        return Err(CastError::Persistence(format!("write {}: {e}", tmp.display())));
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(CastError::Persistence(format!("rename {}: {e}", path.display())));
    }
    Ok(())
}

/// Run `f` holding the exclusive lock on `dir`'s [`LOCK_FILE`].
///
/// Blocks until any other holder, in this process or another, releases it.
/// If the lock file cannot be opened or locked, `f` still runs unlocked.
pub(crate) fn with_dir_lock<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
    let file = std::fs::create_dir_all(dir).and_then(|()| {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
    });
    let mut lock = match file {
        Ok(file) => fd_lock::RwLock::new(file),
        Err(e) => {
            tracing::warn!("⚠️ Cannot open lock file in {}: {e}", dir.display());
            return f();
        }
    };
    match lock.write() {
        Ok(_guard) => f(),
        Err(e) => {
            tracing::warn!("⚠️ Cannot lock {}: {e}", dir.display());
            f()
        }
    }
}

/// Read a JSON document; `None` if absent or unparseable.
pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(json) => match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("⚠️ Failed to parse {}: {e}", path.display());
                None
            }
        },
        Err(e) => {
            tracing::warn!("⚠️ Failed to read {}: {e}", path.display());
            None
        }
    }
}

/// Settings document store (`settings.json`).
pub struct SettingsStore {
    dir: PathBuf,
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            path: dir.join(SETTINGS_FILE),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load, upgrading legacy shapes. An upgraded document is rewritten at once.
    pub fn load(&self, default_campaign: &str, default_timezone: &str) -> Settings {
        let Some(raw) = read_json::<RawSettings>(&self.path) else {
            return Settings::empty(default_timezone);
        };
        let (settings, rewrite) = raw.upgrade(default_campaign, default_timezone);
        if rewrite {
            tracing::info!(
                "🔁 Rewrote settings in the current form: {} entries (default campaign '{}'), {} targets",
                settings.schedule_entries.len(),
                default_campaign,
                settings.target_destinations.len()
            );
            if let Err(e) = self.save(&settings) {
                tracing::warn!("⚠️ Failed to rewrite upgraded settings: {e}");
            }
        }
        settings
    }

    /// The document on disk if its revision is above `revision`.
    /// Missing or unreadable documents count as unchanged.
    pub fn load_newer(&self, revision: u64, default_campaign: &str, default_timezone: &str) -> Option<Settings> {
        let json = std::fs::read_to_string(&self.path).ok()?;
        let raw: RawSettings = match serde_json::from_str(&json) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("Skipping unparseable {}: {e}", self.path.display());
                return None;
            }
        };
        if raw.revision <= revision {
            return None;
        }
        Some(raw.upgrade(default_campaign, default_timezone).0)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        write_json_atomic(&self.path, settings)?;
        tracing::debug!(
            "💾 Saved {} entries / {} targets to {}",
            settings.schedule_entries.len(),
            settings.target_destinations.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Runtime document store (`runtime.json`).
pub struct RuntimeStore {
    path: PathBuf,
}

impl RuntimeStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(RUNTIME_FILE),
        }
    }

    pub fn load(&self) -> RuntimeState {
        read_json(&self.path).unwrap_or_default()
    }

    pub fn save(&self, state: &RuntimeState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }

    /// Bump the incarnation counter and stamp the start time.
    pub fn record_startup(&self, now: DateTime<Utc>) -> RuntimeState {
        let mut state = self.load();
        state.process_incarnation += 1;
        state.last_start = Some(now);
        if let Err(e) = self.save(&state) {
            tracing::warn!("⚠️ Failed to persist runtime state: {e}");
        }
        tracing::info!("🔄 Process incarnation R{}", state.process_incarnation);
        state
    }
}
