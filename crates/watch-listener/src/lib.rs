//! MTProto user-client adapter (grammers).
//!
//! Bots cannot read arbitrary public channels, so the listener signs in as a
//! regular user, keeps the login in `<session_name>.session`, and feeds every
//! new channel post to [`ChannelListener`].

pub mod auth;

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use grammers_client::{
    types::{Chat, Media, Message},
    Client, Update,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use watch_core::{
    listener::{normalize_channel_id, ChannelListener, ChatKind, IncomingPost, BACKFILL_PAUSE},
    Result,
};

pub use auth::ListenerOptions;
use auth::{connect, ensure_authorized, save_session, tg_err};

/// Sign in, optionally backfill, then stream updates until `cancel` fires.
pub async fn run(
    opts: ListenerOptions,
    listener: Arc<ChannelListener>,
    cancel: CancellationToken,
) -> Result<()> {
    let client = connect(&opts).await?;
    ensure_authorized(&client, &opts).await?;

    let me = client.get_me().await.map_err(tg_err("get_me failed"))?;
    info!(
        user_id = me.id(),
        username = me.username().unwrap_or(""),
        "telegram listener connected"
    );

    listener.mark_started(Utc::now());

    if opts.backfill_limit > 0 {
        match backfill(&client, &listener, opts.backfill_limit, &cancel).await {
            Ok(n) => info!(delivered = n, "history backfill complete"),
            Err(e) => warn!("history backfill failed: {e}"),
        }
    }

    info!("listening for new messages, press Ctrl+C to stop");
    let result = update_loop(&client, &listener, &cancel).await;

    if let Err(e) = save_session(client.session(), &opts.session_file) {
        warn!("failed to save session: {e}");
    }
    listener.log_summary();
    result
}

async fn update_loop(
    client: &Client,
    listener: &ChannelListener,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            u = client.next_update() => u,
        };
        match update {
            Ok(Update::NewMessage(msg)) if !msg.outgoing() => {
                listener.handle(to_post(&msg)).await;
            }
            Ok(_) => {}
            Err(e) => {
                error!("update stream failed: {e}");
                return Err(tg_err("update stream failed")(e));
            }
        }
    }
}

/// The monitored channels present in the account's dialogs.
async fn monitored_chats(client: &Client, listener: &ChannelListener) -> Result<Vec<Chat>> {
    let mut wanted: HashSet<i64> = listener
        .channels()
        .iter()
        .filter(|c| c.enabled)
        .map(|c| normalize_channel_id(c.channel_id))
        .collect();

    let mut found = Vec::new();
    let mut dialogs = client.iter_dialogs();
    while let Some(dialog) = dialogs.next().await.map_err(tg_err("dialog scan failed"))? {
        let chat = dialog.chat();
        if matches!(chat, Chat::Channel(_)) && wanted.remove(&normalize_channel_id(chat.id())) {
            found.push(chat.clone());
        }
        if wanted.is_empty() {
            break;
        }
    }
    for id in wanted {
        warn!(id, "monitored channel not found in dialogs; join it to backfill");
    }
    Ok(found)
}

async fn backfill(
    client: &Client,
    listener: &ChannelListener,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<usize> {
    let chats = monitored_chats(client, listener).await?;
    let mut delivered = 0;
    for (i, chat) in chats.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        if i > 0 {
            tokio::time::sleep(BACKFILL_PAUSE).await;
        }

        info!(channel = chat.name(), limit, "fetching channel history");
        let mut posts = Vec::new();
        let mut history = client.iter_messages(chat.pack()).limit(limit);
        loop {
            match history.next().await {
                Ok(Some(msg)) => posts.push(to_post(&msg)),
                Ok(None) => break,
                Err(e) => {
                    warn!(channel = chat.name(), "history fetch stopped: {e}");
                    break;
                }
            }
        }
        delivered += listener.backfill(posts).await;
    }
    Ok(delivered)
}

fn to_post(msg: &Message) -> IncomingPost {
    let chat = msg.chat();
    let kind = match &chat {
        Chat::Channel(_) => ChatKind::Channel,
        Chat::Group(_) => ChatKind::Group,
        Chat::User(_) => ChatKind::User,
    };
    IncomingPost {
        kind,
        chat_id: chat.id(),
        chat_name: chat.name().to_string(),
        message_id: i64::from(msg.id()),
        text: msg.text().to_string(),
        date: msg.date(),
        media_type: msg.media().map(|m| media_label(&m).to_string()),
        reply_to: msg.reply_to_message_id().map(i64::from),
    }
}

fn media_label(media: &Media) -> &'static str {
    match media {
        Media::Photo(_) => "photo",
        Media::Document(_) => "document",
        Media::Sticker(_) => "sticker",
        _ => "other",
    }
}
