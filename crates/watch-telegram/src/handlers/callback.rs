use tracing::{info, warn};

use watch_core::{
    formatting::truncate_chars,
    messaging::types::CallbackQuery as Callback,
    schemas::Incident,
    security::is_allowed,
};

use crate::router::AppState;
use crate::views;

use super::{allow_request, commands::NEWS_WINDOW_HOURS, preferences, send_md};

async fn answer(state: &AppState, cb: &Callback, text: &str) {
    if let Err(e) = state
        .messenger
        .answer_callback_query(&cb.callback_id, Some(text))
        .await
    {
        warn!("answer_callback_query failed: {e}");
    }
}

/// Inline button presses. Every branch answers the query exactly once.
pub async fn on_callback(state: &AppState, cb: Callback) {
    if cb.data.is_empty() {
        let _ = state
            .messenger
            .answer_callback_query(&cb.callback_id, None)
            .await;
        return;
    }
    if !is_allowed(cb.user_id, &state.cfg.telegram_allowed_users) {
        answer(state, &cb, "Unauthorized").await;
        return;
    }
    info!(user = cb.user_id.0, data = %cb.data, "button clicked");

    let (chat, user) = (cb.chat_id, cb.user_id);
    match cb.data.as_str() {
        "start" => {
            answer(state, &cb, "Returning to start...").await;
            send_md(state, chat, views::READY, None).await;
        }
        "news" => {
            answer(state, &cb, "Refreshing news...").await;
            let incidents = latest(state).and_then(|all| {
                state
                    .prefs
                    .filter_incidents(user, all)
                    .map_err(|e| e.to_string())
            });
            let body = match incidents {
                Ok(list) if list.is_empty() => {
                    "No incidents in your preferred areas (last 24h).".to_string()
                }
                Ok(list) => views::news_list("Personalized News", &list),
                Err(e) => format!("❌ Error: {e}"),
            };
            send_md(state, chat, &body, None).await;
        }
        "news_all" => {
            answer(state, &cb, "Fetching all news...").await;
            let body = match latest(state) {
                Ok(list) if list.is_empty() => "No incidents in the last 24 hours.".to_string(),
                Ok(list) => views::news_list("All News", &list),
                Err(e) => format!("❌ Error: {e}"),
            };
            send_md(state, chat, &body, None).await;
        }
        "set_preferences" | "start_preferences_conversation" => {
            answer(state, &cb, "Starting preferences setup...").await;
            preferences::start(state, chat, user).await;
        }
        "save_preferences" => {
            let reply = preferences::save(state, chat, user).await;
            answer(state, &cb, &reply).await;
        }
        "edit_preferences" => {
            answer(state, &cb, "Continue editing...").await;
            if state.conversations.reset(user).await {
                send_md(state, chat, views::PREFS_RETRY, None).await;
            }
        }
        "cancel_preferences" => {
            answer(state, &cb, "Cancelled").await;
            state.conversations.end(user).await;
            send_md(state, chat, views::PREFS_CANCELLED, None).await;
        }
        "clear_preferences" => {
            answer(state, &cb, "Clearing preferences...").await;
            preferences::clear(state, chat, user).await;
        }
        "stats" => {
            answer(state, &cb, "Loading statistics...").await;
            let body = match state.analyst.store().get_statistics() {
                Ok(s) => views::stats_short(&s),
                Err(e) => format!("❌ Error: {e}"),
            };
            send_md(state, chat, &body, None).await;
        }
        data => match data.strip_prefix("refresh:") {
            Some(location) => {
                answer(
                    state,
                    &cb,
                    &format!("Refreshing {}...", truncate_chars(location, 40)),
                )
                .await;
                if !allow_request(state, chat, user).await {
                    return;
                }
                let report = state
                    .analyst
                    .query_safety_status(&format!("מה המצב ב{location}?"))
                    .await;
                send_md(state, chat, &views::badged_response(&report), None).await;
            }
            None => answer(state, &cb, "Unknown action").await,
        },
    }
}

fn latest(state: &AppState) -> Result<Vec<Incident>, String> {
    let news = state.analyst.get_breaking_news(NEWS_WINDOW_HOURS);
    match news.error {
        Some(e) => Err(e),
        None => Ok(news.incidents),
    }
}
