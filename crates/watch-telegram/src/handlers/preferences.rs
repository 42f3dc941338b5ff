//! LLM-assisted preference setup.

use tracing::{info, warn};

use watch_core::{
    domain::{ChatId, UserId},
    preferences::extract_preferences,
};

use crate::conversation::is_cancel;
use crate::router::AppState;
use crate::views;

use super::{allow_request, send_md, IncomingText};

pub(crate) async fn start(state: &AppState, chat_id: ChatId, user_id: UserId) {
    state.conversations.start(user_id).await;
    send_md(
        state,
        chat_id,
        views::PREFS_WELCOME,
        Some(views::cancel_keyboard()),
    )
    .await;
}

/// `/prefs`: show saved places, or start the setup when there are none.
pub(crate) async fn show_or_start(state: &AppState, chat_id: ChatId, user_id: UserId) {
    if state.conversations.is_active(user_id).await {
        start(state, chat_id, user_id).await;
        return;
    }
    match state.prefs.get(user_id) {
        Ok(p) if p.has_preferences() => {
            send_md(
                state,
                chat_id,
                &views::current_preferences(&p),
                Some(views::current_preferences_keyboard()),
            )
            .await;
        }
        Ok(_) => start(state, chat_id, user_id).await,
        Err(e) => {
            warn!("preferences lookup failed: {e}");
            send_md(state, chat_id, &format!("❌ Error: {e}"), None).await;
        }
    }
}

/// A message from a user who is in the middle of setup.
pub(crate) async fn handle_reply(state: &AppState, input: &IncomingText) {
    let text = input.text.trim();
    if is_cancel(text) {
        state.conversations.end(input.user_id).await;
        send_md(state, input.chat_id, views::PREFS_CANCELLED, None).await;
        return;
    }
    if !allow_request(state, input.chat_id, input.user_id).await {
        return;
    }

    state.conversations.record_message(input.user_id, text).await;
    let extracted = extract_preferences(
        state.model.as_ref(),
        text,
        state.cfg.extraction_temperature,
    )
    .await;

    match extracted {
        Some(update) => {
            let body = views::preferences_understood(&update);
            state.conversations.propose(input.user_id, update).await;
            send_md(
                state,
                input.chat_id,
                &body,
                Some(views::confirm_keyboard()),
            )
            .await;
        }
        None => {
            send_md(state, input.chat_id, views::PREFS_CLARIFY, None).await;
        }
    }
}

/// Persist the pending proposal. Returns the callback answer text.
pub(crate) async fn save(state: &AppState, chat_id: ChatId, user_id: UserId) -> String {
    let Some(update) = state
        .conversations
        .get(user_id)
        .await
        .and_then(|c| c.pending)
    else {
        return "No pending preferences to save.".to_string();
    };
    match state.prefs.apply(user_id, update) {
        Ok(saved) => {
            state.conversations.end(user_id).await;
            info!(user = user_id.0, "preferences saved");
            send_md(state, chat_id, &views::preferences_saved(&saved), None).await;
            "Saving preferences...".to_string()
        }
        Err(e) => {
            warn!("saving preferences failed: {e}");
            format!("Error: {e}")
        }
    }
}

pub(crate) async fn clear(state: &AppState, chat_id: ChatId, user_id: UserId) {
    if let Err(e) = state.prefs.clear(user_id) {
        warn!("clearing preferences failed: {e}");
    }
    state.conversations.end(user_id).await;
    send_md(state, chat_id, views::PREFS_CLEARED, None).await;
}
