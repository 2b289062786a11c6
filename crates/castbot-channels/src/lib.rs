//! # Castbot Channels
//!
//! Concrete collaborators for the scheduler:
//! - `telegram` — `MessageSender` over the Telegram Bot API
//! - `content` — `ContentSource` reading campaign folders from disk

pub mod content;
pub mod telegram;

pub use content::FolderContentSource;
pub use telegram::TelegramSender;
