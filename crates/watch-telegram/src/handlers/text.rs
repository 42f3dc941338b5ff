use tracing::{info, warn};

use watch_core::{formatting::markdown_to_html, messaging::types::ChatAction};

use crate::router::AppState;
use crate::views;

use super::{allow_request, replace_md, send_md, IncomingText};

/// Answer a free-text question, editing one progress message into the result.
pub(crate) async fn handle_query(state: &AppState, input: &IncomingText) {
    let query = input.text.trim();
    if !allow_request(state, input.chat_id, input.user_id).await {
        return;
    }
    let preview: String = query.chars().take(50).collect();
    info!(user = input.user_id.0, "processing natural query: {preview}");

    let _ = state
        .messenger
        .send_chat_action(input.chat_id, ChatAction::Typing)
        .await;

    let progress = send_md(state, input.chat_id, views::QUERY_PROGRESS[0], None).await;
    if let Some(msg) = progress {
        for step in &views::QUERY_PROGRESS[1..] {
            tokio::time::sleep(state.progress_step).await;
            if let Err(e) = state.messenger.edit_html(msg, &markdown_to_html(step)).await {
                warn!("progress edit failed: {e}");
            }
        }
    }

    let report = state.analyst.query_safety_status(query).await;
    let (body, keyboard) = match &report.error {
        Some(e) => (views::query_failed(e), views::restart_keyboard()),
        None => {
            let target = report.location.as_deref().unwrap_or(query);
            (views::badged_response(&report), views::query_keyboard(target))
        }
    };

    match progress {
        Some(msg) => replace_md(state, msg, &body, Some(keyboard)).await,
        None => {
            send_md(state, input.chat_id, &body, Some(keyboard)).await;
        }
    }
}
