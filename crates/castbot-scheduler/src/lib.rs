//! # Castbot Scheduler
//!
//! Daily broadcast scheduling and delivery for group chats.
//! File-based state, tokio timers, no external services.
//!
//! ## Design Principles
//! - JSON documents on disk, rewritten atomically — survives restarts
//! - Edits take a file lock on the data directory and re-arm the trigger loop,
//!   also when they come from the admin CLI in another process
//! - The trigger loop never waits on a delivery — runs overlap freely
//! - Reports are best-effort; history is bounded to the newest records
//!
//! ## Architecture
//! ```text
//! ScheduleTable (settings.json)
//!   ├── entries: "09:00" → promo, "18:00" → spring
//!   ├── enabled, timezone, targets
//!   └── on edit → re-arm signal
//!
//! TriggerLoop (tokio interval, 1s)
//!   ├── ScheduleTable::refresh — adopt newer settings.json revisions
//!   └── due entry → DeliveryJob → dispatcher → BroadcastService::execute
//!                                                ├── ContentSource::resolve
//!                                                ├── deliver (retry, pacing, timeout)
//!                                                ├── HistoryLedger (history.json)
//!                                                └── ReportEmitter → control chat
//! ```

pub mod clock;
pub mod delivery;
pub mod engine;
pub mod history;
pub mod report;
pub mod schedule;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

pub use delivery::{DeliveryPolicy, DeliveryRun, DestinationOutcome, deliver};
pub use engine::{Clock, DeliveryJob, TriggerLoop, spawn_dispatcher};
pub use history::{HistoryLedger, HistoryRecord, HistoryStats};
pub use report::ReportEmitter;
pub use schedule::{ScheduleConfig, ScheduleEntry, ScheduleTable, Upcoming};
pub use service::BroadcastService;
pub use store::{RuntimeState, RuntimeStore, Settings, SettingsStore};
