use std::sync::Arc;

use teloxide::Bot;
use tracing::info;

use ttb_core::{
    chats::ChatStore, config::Config, dispatcher::Dispatcher, service::RelayService,
    subscriptions::SubscriptionManager, twitter::TwitterPort,
};
use ttb_twitter::TwitterClient;

#[tokio::main]
async fn main() -> Result<(), ttb_core::Error> {
    ttb_core::logging::init("ttb")?;

    let cfg = Arc::new(Config::load()?);

    let store = ChatStore::open(&cfg.chats_path)?;
    info!(
        chats = store.len(),
        path = %store.path().display(),
        "loaded chat store"
    );

    let twitter: Arc<dyn TwitterPort> = Arc::new(TwitterClient::new(&cfg)?);

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let messenger = ttb_telegram::router::throttled_messenger(&bot);

    let subscriptions =
        SubscriptionManager::new(cfg.clone(), twitter.clone(), Dispatcher::new(messenger.clone()));
    let service = Arc::new(RelayService::new(cfg.clone(), twitter, store, subscriptions));

    ttb_telegram::router::run_polling(cfg, bot, service, messenger)
        .await
        .map_err(|e| ttb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
