use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::{ApiError, RequestError};

use crate::error::SendError;

use super::Sender;

pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Sender for TelegramSender {
    async fn send(&self, chat_id: i64, text: &str) -> std::result::Result<(), SendError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

fn classify(err: RequestError) -> SendError {
    match err {
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::BotKicked
            | ApiError::UserDeactivated
            | ApiError::ChatNotFound
            | ApiError::CantInitiateConversation,
        ) => SendError::BlockedByUser,
        RequestError::RetryAfter(wait) => SendError::Transient {
            reason: format!("rate limited for {}s", wait.seconds()),
            retry_after: Some(wait.duration()),
        },
        other => SendError::transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_and_missing_chats_are_definitive() {
        assert_eq!(
            classify(RequestError::Api(ApiError::BotBlocked)),
            SendError::BlockedByUser
        );
        assert_eq!(
            classify(RequestError::Api(ApiError::ChatNotFound)),
            SendError::BlockedByUser
        );
    }

    #[test]
    fn other_api_errors_are_transient() {
        let err = classify(RequestError::Api(ApiError::MessageTextIsEmpty));
        assert!(matches!(err, SendError::Transient { retry_after: None, .. }));
    }
}
