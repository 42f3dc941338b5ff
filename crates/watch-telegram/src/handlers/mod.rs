//! Telegram update handlers.
//!
//! The teloxide endpoints only translate updates into [`IncomingText`] and
//! core [`Callback`]s; everything after that talks to the MessagingPort, so the
//! flows run unchanged against a fake messenger in tests.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{debug, warn};

use watch_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    formatting::{markdown_to_html, split_message},
    messaging::types::{CallbackQuery as Callback, InlineKeyboard},
    security::{is_allowed, RateDecision},
};

use crate::router::AppState;
use crate::views;

mod callback;
mod commands;
mod preferences;
mod text;

pub use callback::on_callback;

/// A text message as the handlers see it.
#[derive(Clone, Debug)]
pub struct IncomingText {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub is_private: bool,
    pub text: String,
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let (Some(user), Some(text)) = (msg.from(), msg.text()) else {
        return Ok(());
    };
    let input = IncomingText {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        is_private: msg.chat.is_private(),
        text: text.to_string(),
    };
    on_text(&state, input).await;
    Ok(())
}

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(msg) = q.message.as_ref() else {
        let _ = state.messenger.answer_callback_query(&q.id, None).await;
        return Ok(());
    };
    let chat_id = ChatId(msg.chat.id.0);
    let cb = Callback {
        chat_id,
        user_id: UserId(q.from.id.0 as i64),
        callback_id: q.id.clone(),
        data: q.data.clone().unwrap_or_default(),
        message: Some(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }),
    };
    callback::on_callback(&state, cb).await;
    Ok(())
}

/// Route one text message: commands, an open preference conversation, then
/// natural-language queries in private chats.
pub async fn on_text(state: &AppState, input: IncomingText) {
    if !is_allowed(input.user_id, &state.cfg.telegram_allowed_users) {
        debug!(user = input.user_id.0, "rejecting user not on the allow-list");
        send_md(state, input.chat_id, views::UNAUTHORIZED, None).await;
        return;
    }
    let text = input.text.trim();
    if text.is_empty() {
        return;
    }
    if text.starts_with('/') {
        commands::handle_command(state, &input).await;
        return;
    }
    if state.conversations.is_active(input.user_id).await {
        preferences::handle_reply(state, &input).await;
        return;
    }
    if !input.is_private {
        debug!(chat = input.chat_id.0, "skipping non-private message");
        return;
    }

    let _guard = state.chat_locks.lock_chat(input.chat_id.0).await;
    text::handle_query(state, &input).await;
}

fn chunks(state: &AppState, md: &str) -> Vec<String> {
    let limit = state
        .cfg
        .telegram_message_limit
        .min(state.messenger.capabilities().max_message_len);
    split_message(&markdown_to_html(md), limit)
}

/// Send Markdown as one or more HTML messages; the keyboard goes on the last.
pub(crate) async fn send_md(
    state: &AppState,
    chat_id: ChatId,
    md: &str,
    keyboard: Option<InlineKeyboard>,
) -> Option<MessageRef> {
    let parts = chunks(state, md);
    let last = parts.len().saturating_sub(1);
    let mut first = None;
    for (i, part) in parts.iter().enumerate() {
        let sent = match (&keyboard, i == last) {
            (Some(kb), true) => {
                state
                    .messenger
                    .send_inline_keyboard(chat_id, part, kb.clone())
                    .await
            }
            _ => state.messenger.send_html(chat_id, part).await,
        };
        match sent {
            Ok(r) => {
                first.get_or_insert(r);
            }
            Err(e) => warn!(chat = chat_id.0, "send failed: {e}"),
        }
    }
    first
}

/// Replace an earlier message with Markdown. Overflow goes out as new
/// messages; a failed edit falls back to sending.
pub(crate) async fn replace_md(
    state: &AppState,
    msg: MessageRef,
    md: &str,
    keyboard: Option<InlineKeyboard>,
) {
    let mut parts = chunks(state, md).into_iter();
    let Some(head) = parts.next() else {
        return;
    };
    let rest: Vec<String> = parts.collect();
    let head_keyboard = if rest.is_empty() { keyboard.clone() } else { None };

    let edited = match head_keyboard {
        Some(kb) => state.messenger.edit_inline_keyboard(msg, &head, kb).await,
        None => state.messenger.edit_html(msg, &head).await,
    };
    if let Err(e) = edited {
        warn!(chat = msg.chat_id.0, "edit failed, sending new message: {e}");
        let sent = match (&keyboard, rest.is_empty()) {
            (Some(kb), true) => {
                state
                    .messenger
                    .send_inline_keyboard(msg.chat_id, &head, kb.clone())
                    .await
            }
            _ => state.messenger.send_html(msg.chat_id, &head).await,
        };
        if let Err(e) = sent {
            warn!(chat = msg.chat_id.0, "send failed: {e}");
        }
    }

    let last = rest.len().saturating_sub(1);
    for (i, part) in rest.iter().enumerate() {
        let sent = match (&keyboard, i == last) {
            (Some(kb), true) => {
                state
                    .messenger
                    .send_inline_keyboard(msg.chat_id, part, kb.clone())
                    .await
            }
            _ => state.messenger.send_html(msg.chat_id, part).await,
        };
        if let Err(e) = sent {
            warn!(chat = msg.chat_id.0, "send failed: {e}");
        }
    }
}

/// Spend one token of the user's LLM budget, telling them when it is empty.
pub(crate) async fn allow_request(state: &AppState, chat_id: ChatId, user_id: UserId) -> bool {
    let decision = state.rate_limiter.lock().await.check(user_id);
    match decision {
        RateDecision::Allowed => true,
        RateDecision::Limited { retry_after } => {
            debug!(user = user_id.0, ?retry_after, "rate limited");
            let secs = retry_after.as_secs_f64().ceil() as u64;
            send_md(state, chat_id, &views::rate_limited(secs.max(1)), None).await;
            false
        }
    }
}

#[cfg(test)]
mod tests;
