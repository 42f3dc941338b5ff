use tracing::{debug, info, warn};

use watch_core::domain::{ChatId, UserId};

use crate::router::AppState;
use crate::views;

use super::{allow_request, preferences, replace_md, send_md, IncomingText};

/// Hours of history behind `/news`.
pub(crate) const NEWS_WINDOW_HOURS: i64 = 24;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub(crate) async fn handle_command(state: &AppState, input: &IncomingText) {
    let (cmd, args) = parse_command(&input.text);
    info!(user = input.user_id.0, command = %cmd, "command received");
    match cmd.as_str() {
        "start" | "help" => {
            send_md(state, input.chat_id, views::WELCOME, None).await;
        }
        "safety" => safety(state, input.chat_id, input.user_id, &args).await,
        "news" => news(state, input.chat_id, input.user_id).await,
        "prefs" => preferences::show_or_start(state, input.chat_id, input.user_id).await,
        "stats" => stats(state, input.chat_id).await,
        _ => debug!(command = %cmd, "ignoring unknown command"),
    }
}

async fn safety(state: &AppState, chat_id: ChatId, user_id: UserId, location: &str) {
    if location.is_empty() {
        send_md(state, chat_id, views::SAFETY_USAGE, None).await;
        return;
    }
    if !allow_request(state, chat_id, user_id).await {
        return;
    }

    let progress = send_md(state, chat_id, &views::safety_checking(location), None).await;
    let report = state
        .analyst
        .query_safety_status(&format!("מה המצב ב{location}?"))
        .await;

    let body = match &report.error {
        Some(e) => {
            warn!("safety query failed: {e}");
            format!("❌ שגיאה: {e}")
        }
        None => views::safety_result(&report),
    };
    match progress {
        Some(msg) => replace_md(state, msg, &body, None).await,
        None => {
            send_md(state, chat_id, &body, None).await;
        }
    }
}

/// `/news`: last 24 hours filtered by the user's saved places.
pub(crate) async fn news(state: &AppState, chat_id: ChatId, user_id: UserId) {
    let prefs = match state.prefs.get(user_id) {
        Ok(p) => p,
        Err(e) => {
            warn!("preferences lookup failed: {e}");
            send_md(state, chat_id, &format!("❌ Error: {e}"), None).await;
            return;
        }
    };
    if !prefs.has_preferences() {
        send_md(
            state,
            chat_id,
            views::NEWS_NEEDS_PREFERENCES,
            Some(views::needs_preferences_keyboard()),
        )
        .await;
        return;
    }

    let Some(progress) = send_md(state, chat_id, views::NEWS_LOADING, None).await else {
        return;
    };
    let news = state.analyst.get_breaking_news(NEWS_WINDOW_HOURS);
    if let Some(e) = news.error {
        replace_md(state, progress, &format!("❌ Error: {e}"), None).await;
        return;
    }

    let total = news.incidents.len();
    let filtered: Vec<_> = news
        .incidents
        .into_iter()
        .filter(|i| prefs.matches(i))
        .collect();
    debug!(total, matched = filtered.len(), "personalized news");

    if filtered.is_empty() {
        replace_md(
            state,
            progress,
            &views::no_preferred_incidents(total, &prefs),
            None,
        )
        .await;
        return;
    }
    replace_md(
        state,
        progress,
        &views::personalized_news(&prefs, total, &filtered),
        Some(views::news_keyboard()),
    )
    .await;
}

async fn stats(state: &AppState, chat_id: ChatId) {
    let body = match state.analyst.store().get_statistics() {
        Ok(s) => views::stats(&s),
        Err(e) => {
            warn!("stats failed: {e}");
            format!("❌ Error: {e}")
        }
    };
    send_md(state, chat_id, &body, None).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bot_suffix_and_arguments() {
        assert_eq!(
            parse_command("/safety@TheWatchBot  רחוב הרצל, תל אביב "),
            ("safety".to_string(), "רחוב הרצל, תל אביב".to_string())
        );
        assert_eq!(parse_command("/NEWS"), ("news".to_string(), String::new()));
    }
}
