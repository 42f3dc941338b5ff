//! In-memory state of users walking through preference setup.

use std::collections::HashMap;

use tokio::sync::Mutex;
use watch_core::{domain::UserId, preferences::PreferenceUpdate};

/// Replies that abort the setup.
pub const CANCEL_KEYWORDS: [&str; 4] = ["cancel", "ביטול", "exit", "יציאה"];

pub fn is_cancel(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    CANCEL_KEYWORDS.contains(&t.as_str())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Asking,
    Confirming,
}

#[derive(Clone, Debug)]
pub struct Conversation {
    pub stage: Stage,
    pub messages: Vec<String>,
    pub pending: Option<PreferenceUpdate>,
}

impl Conversation {
    fn new() -> Self {
        Self {
            stage: Stage::Asking,
            messages: Vec::new(),
            pending: None,
        }
    }
}

#[derive(Default)]
pub struct Conversations {
    inner: Mutex<HashMap<UserId, Conversation>>,
}

impl Conversations {
    /// Start (or restart) a conversation for `user`.
    pub async fn start(&self, user: UserId) {
        self.inner.lock().await.insert(user, Conversation::new());
    }

    pub async fn is_active(&self, user: UserId) -> bool {
        self.inner.lock().await.contains_key(&user)
    }

    pub async fn get(&self, user: UserId) -> Option<Conversation> {
        self.inner.lock().await.get(&user).cloned()
    }

    pub async fn end(&self, user: UserId) -> Option<Conversation> {
        self.inner.lock().await.remove(&user)
    }

    pub async fn record_message(&self, user: UserId, text: &str) {
        if let Some(c) = self.inner.lock().await.get_mut(&user) {
            c.messages.push(text.to_string());
        }
    }

    /// Hold extracted preferences until the user confirms them.
    pub async fn propose(&self, user: UserId, update: PreferenceUpdate) {
        if let Some(c) = self.inner.lock().await.get_mut(&user) {
            c.pending = Some(update);
            c.stage = Stage::Confirming;
        }
    }

    /// Back to asking; false when there is no conversation.
    pub async fn reset(&self, user: UserId) -> bool {
        match self.inner.lock().await.get_mut(&user) {
            Some(c) => {
                c.stage = Stage::Asking;
                true
            }
            None => false,
        }
    }
}
