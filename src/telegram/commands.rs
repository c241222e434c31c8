//! Subscription commands users send to the bot.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

use crate::db::SubscriberStore;
use crate::error::Result;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Subscribe to AI news alerts")]
    Start,

    #[command(description = "Unsubscribe from alerts")]
    Stop,

    #[command(description = "Show your subscription status")]
    Status,

    #[command(description = "Show this help message")]
    Help,
}

/// Who sent the command.
#[derive(Debug, Clone, Default)]
pub struct ChatInfo {
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

/// Runs the long-polling dispatcher until the process is interrupted.
pub async fn run_bot(bot: Bot, subscribers: Arc<dyn SubscriberStore>, max_subscribers: u32) {
    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
            let subscribers = Arc::clone(&subscribers);
            async move { handle_command(bot, msg, cmd, subscribers, max_subscribers).await }
        });

    info!("Telegram bot is polling for commands");

    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    subscribers: Arc<dyn SubscriberStore>,
    max_subscribers: u32,
) -> ResponseResult<()> {
    let chat = ChatInfo {
        chat_id: msg.chat.id.0,
        username: msg.from.as_ref().and_then(|u| u.username.clone()),
        first_name: msg.from.as_ref().map(|u| u.first_name.clone()),
    };

    let reply = match reply_for(&cmd, &chat, subscribers.as_ref(), max_subscribers).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(chat_id = chat.chat_id, ?cmd, error = %e, "command failed");
            "⚠️ Sorry, something went wrong. Please try again.".to_string()
        }
    };

    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Applies the command to the subscriber table and returns the reply text.
pub async fn reply_for(
    cmd: &Command,
    chat: &ChatInfo,
    subscribers: &dyn SubscriberStore,
    max_subscribers: u32,
) -> Result<String> {
    let chat_id = chat.chat_id;

    let reply = match cmd {
        Command::Start => match subscribers.get(chat_id).await? {
            Some(existing) if existing.active => {
                "✅ You're already subscribed to AI news alerts.\n\nUse /stop to unsubscribe.".to_string()
            }
            Some(_) => {
                subscribers.reactivate(chat_id).await?;
                info!(chat_id, "subscriber reactivated");
                "🎉 Welcome back! Your subscription has been reactivated.".to_string()
            }
            None => {
                if subscribers.count_active().await? >= max_subscribers {
                    return Ok(
                        "⚠️ The bot has reached its subscriber limit. Please try again later."
                            .to_string(),
                    );
                }
                subscribers
                    .add_with_profile(
                        chat_id,
                        chat.username.clone(),
                        chat.first_name.clone(),
                    )
                    .await?;
                info!(chat_id, username = ?chat.username, "new subscriber");
                "🤖 <b>Welcome to AI News Alert!</b>\n\n\
                 You'll receive notifications for verified, highly relevant AI news.\n\n\
                 Use /help to see all commands."
                    .to_string()
            }
        },
        Command::Stop => {
            if subscribers.deactivate(chat_id).await? {
                info!(chat_id, "subscriber left");
                "👋 You've been unsubscribed. Send /start anytime to come back.".to_string()
            } else {
                "You're not currently subscribed. Send /start to subscribe.".to_string()
            }
        }
        Command::Status => match subscribers.get(chat_id).await? {
            Some(sub) if sub.active => format!(
                "✅ <b>Subscription active</b>\n\nSubscribed since: {}",
                sub.joined_at.format("%Y-%m-%d %H:%M UTC")
            ),
            Some(_) => "❌ <b>Subscription inactive</b>".to_string(),
            None => "📭 <b>Not subscribed</b>".to_string(),
        },
        Command::Help => Command::descriptions().to_string(),
    };

    Ok(reply)
}
