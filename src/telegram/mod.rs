mod commands;
mod format;
mod sender;

use async_trait::async_trait;

use crate::error::SendError;

pub use commands::run_bot;
pub use format::format_alert;
pub use sender::TelegramSender;

/// Delivers one text message to one chat.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> std::result::Result<(), SendError>;
}
