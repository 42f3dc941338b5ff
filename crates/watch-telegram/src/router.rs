use std::{collections::HashMap, sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use watch_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use watch_core::{
    config::Config,
    messaging::port::MessagingPort,
    pipeline::AnalystPipeline,
    ports::LanguageModel,
    preferences::PreferencesStore,
    security::RateLimiter,
};

use crate::conversation::Conversations;
use crate::handlers;
use crate::TelegramMessenger;

/// Pause between the natural-query progress edits.
pub const PROGRESS_STEP: Duration = Duration::from_millis(300);

pub struct AppState {
    pub cfg: Arc<Config>,
    pub analyst: Arc<AnalystPipeline>,
    /// Used for preference extraction.
    pub model: Arc<dyn LanguageModel>,
    pub prefs: Arc<PreferencesStore>,
    pub messenger: Arc<dyn MessagingPort>,
    pub rate_limiter: Mutex<RateLimiter>,
    pub chat_locks: ChatLocks,
    pub conversations: Conversations,
    pub progress_step: Duration,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        analyst: Arc<AnalystPipeline>,
        model: Arc<dyn LanguageModel>,
        prefs: Arc<PreferencesStore>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        );
        Self {
            cfg,
            analyst,
            model,
            prefs,
            messenger,
            rate_limiter: Mutex::new(rate_limiter),
            chat_locks: ChatLocks::default(),
            conversations: Conversations::default(),
            progress_step: PROGRESS_STEP,
        }
    }
}

#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(
    cfg: Arc<Config>,
    analyst: Arc<AnalystPipeline>,
    model: Arc<dyn LanguageModel>,
    prefs: Arc<PreferencesStore>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token()?);

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), id = me.id.0, "bot authenticated"),
        Err(e) => warn!("get_me failed: {e}"),
    }
    if cfg.telegram_allowed_users.is_empty() {
        info!("no allow-list configured, bot is public");
    } else {
        info!(users = cfg.telegram_allowed_users.len(), "allow-list active");
    }

    // Progress edits are bursty; the throttle keeps them under Telegram's flood
    // limits while the adapter still retries a single RetryAfter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let state = Arc::new(AppState::new(cfg, analyst, model, prefs, messenger));

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    info!("bot is listening for messages");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("bot stopped");
    Ok(())
}
