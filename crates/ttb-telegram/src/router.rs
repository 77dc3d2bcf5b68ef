use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use ttb_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use ttb_core::{config::Config, messaging::port::MessagingPort, service::RelayService};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RelayService>,
    pub messenger: Arc<dyn MessagingPort>,
}

/// Telegram messenger wrapped in the throttling decorator.
///
/// Forwarded tweets and command replies share it, so a burst of tweets for one
/// chat is paced the same way as everything else. The adapter still retries
/// once on `RetryAfter`.
pub fn throttled_messenger(bot: &Bot) -> Arc<dyn MessagingPort> {
    let raw: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    Arc::new(ThrottledMessenger::new(raw, ThrottleConfig::default()))
}

pub async fn run_polling(
    cfg: Arc<Config>,
    bot: Bot,
    service: Arc<RelayService>,
    messenger: Arc<dyn MessagingPort>,
) -> anyhow::Result<()> {
    let me = bot.get_me().await?;
    info!(username = %me.username(), "ttb started");

    // Updates received while the bot was down are dropped.
    if let Err(e) = bot.delete_webhook().drop_pending_updates(true).await {
        warn!(error = %e, "failed to drop pending updates");
    }

    let restored = service.start().await;
    info!(
        chats = restored,
        chats_path = %cfg.chats_path.display(),
        "restored stream subscriptions"
    );

    let state = Arc::new(AppState {
        service: service.clone(),
        messenger,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped, closing stream listeners");
    service.shutdown().await;
    Ok(())
}
