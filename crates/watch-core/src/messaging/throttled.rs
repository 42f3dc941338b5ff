use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Per-chat limiters kept before idle ones are dropped.
const PRUNE_AT_CHATS: usize = 256;

type ChatLimiters = HashMap<i64, Arc<Mutex<IntervalLimiter>>>;

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Spacing between any two Bot API calls.
    pub global_min_interval: Duration,
    /// Spacing between calls that target the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Claim the next slot; returns how long the caller must wait for it.
    fn reserve_at(&mut self, now: Instant) -> Duration {
        let start = self.next.max(now);
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Drop limiters no caller holds whose next slot has passed; a fresh one behaves the same.
fn prune_idle(chats: &mut ChatLimiters, now: Instant) {
    chats.retain(|_, lim| {
        Arc::strong_count(lim) > 1 || lim.try_lock().map_or(true, |l| l.next > now)
    });
}

/// [`MessagingPort`] decorator that spaces out outbound calls so progress edits
/// on a busy bot stay under Telegram's flood limits.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<ChatLimiters>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn chat_limiter(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut chats = self.per_chat.lock().await;
        if chats.len() >= PRUNE_AT_CHATS && !chats.contains_key(&chat_id) {
            prune_idle(&mut chats, Instant::now());
        }
        Arc::clone(chats.entry(chat_id).or_insert_with(|| {
            Arc::new(Mutex::new(IntervalLimiter::new(
                self.cfg.per_chat_min_interval,
            )))
        }))
    }

    async fn wait_for_chat(&self, chat_id: ChatId) {
        let now = Instant::now();
        let global_wait = self.global.lock().await.reserve_at(now);
        let limiter = self.chat_limiter(chat_id.0).await;
        let chat_wait = limiter.lock().await.reserve_at(now);
        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn wait_global(&self) {
        let wait = self.global.lock().await.reserve_at(Instant::now());
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.wait_for_chat(chat_id).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.wait_for_chat(msg.chat_id).await;
        self.inner.edit_html(msg, html).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.wait_for_chat(chat_id).await;
        self.inner.send_inline_keyboard(chat_id, html, keyboard).await
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.wait_for_chat(msg.chat_id).await;
        self.inner.edit_inline_keyboard(msg, html, keyboard).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.wait_for_chat(chat_id).await;
        self.inner.send_chat_action(chat_id, action).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // Callback answers carry no chat id.
        self.wait_global().await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
