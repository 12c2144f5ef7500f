pub mod conflict;
pub mod handlers;
pub mod menu;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use teloxide::utils::command::BotCommands;
use teloxide::{ApiError, RequestError};
use tracing::{error, info, warn};

use conflict::{ConflictTracker, PollingErrorHandler};
use menu::BotContent;

pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

const POLL_TIMEOUT: Duration = Duration::from_secs(30);
const CONFLICT_RETRY_DELAY: Duration = Duration::from_secs(10);
const CONFLICT_MAX_ATTEMPTS: usize = 5;
// Conflicts further apart than this no longer count as one streak.
const CONFLICT_STREAK_WINDOW: Duration = Duration::from_secs(60);

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "show the main menu")]
    Start,
    #[command(description = "list the available commands")]
    Help,
    #[command(description = "contact details and share-your-number button")]
    Contact,
    #[command(description = "link to the online portfolio")]
    Portfolio,
    #[command(description = "design services on offer")]
    Services,
    #[command(description = "starting prices")]
    Pricing,
    #[command(description = "social media links")]
    Social,
}

#[derive(Clone)]
pub struct BotState {
    pub content: Arc<BotContent>,
    pub admin_chat_id: Option<ChatId>,
}

impl BotState {
    pub fn new(content: BotContent, admin_chat_id: Option<ChatId>) -> Self {
        BotState {
            content: Arc::new(content),
            admin_chat_id,
        }
    }
}

// false when the conflict outlives every attempt
async fn wait_for_exclusive_polling(bot: &Bot) -> bool {
    for attempt in 1..=CONFLICT_MAX_ATTEMPTS {
        match bot.get_updates().timeout(0).limit(1).await {
            Ok(_) => return true,
            Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                warn!(
                    "Another bot instance is polling (attempt {attempt}/{CONFLICT_MAX_ATTEMPTS}); retrying in {}s",
                    CONFLICT_RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(CONFLICT_RETRY_DELAY).await;
            }
            Err(err) => {
                warn!("getUpdates check failed: {err}; starting anyway");
                return true;
            }
        }
    }
    false
}

pub async fn run_bot(bot: Bot, state: BotState) {
    if let Err(err) = bot.delete_webhook().await {
        warn!("Failed to delete webhook: {err}");
    }
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {err}");
    }

    if !wait_for_exclusive_polling(&bot).await {
        error!(
            "Bot still conflicts with another instance after {CONFLICT_MAX_ATTEMPTS} attempts; stopping the bot"
        );
        return;
    }

    let message_handler = Update::filter_message()
        .branch(
            dptree::filter(|msg: Message| msg.contact().is_some())
                .endpoint(handlers::handle_contact),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handlers::handle_text),
        )
        .endpoint(handlers::ignore_message);

    let listener = Polling::builder(bot.clone())
        .timeout(POLL_TIMEOUT)
        .delete_webhook()
        .await
        .build();

    let mut dispatcher = Dispatcher::builder(bot, message_handler)
        .dependencies(dptree::deps![state])
        .build();
    let error_handler = Arc::new(PollingErrorHandler::new(
        ConflictTracker::new(CONFLICT_MAX_ATTEMPTS, CONFLICT_STREAK_WINDOW),
        CONFLICT_RETRY_DELAY,
        dispatcher.shutdown_token(),
    ));

    info!("Bot polling started");
    dispatcher
        .dispatch_with_listener(listener, error_handler)
        .await;
    info!("Bot polling stopped");
}
