//! # Castbot Core
//!
//! Shared building blocks for the broadcast bot:
//! - `error` — the single error taxonomy used across crates
//! - `config` — `config.toml` + environment overrides
//! - `types` — destinations and campaign payloads
//! - `traits` — the `MessageSender` / `ContentSource` seams

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::BotConfig;
pub use error::{CastError, Result};
pub use traits::{ContentSource, MessageSender};
pub use types::{ContentPayload, Destination, MediaKind};
