use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
    ApiError, RequestError,
};
use tokio::time::sleep;
use tracing::debug;

use watch_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Bot API limit for one text message.
const MAX_MESSAGE_LEN: usize = 4096;

/// Flood-wait retries before giving up on a request.
const MAX_RETRIES: usize = 1;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

fn tg_message(message_id: MessageId) -> teloxide::types::MessageId {
    teloxide::types::MessageId(message_id.0)
}

fn to_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.into_iter().map(|row| {
        row.into_iter()
            .map(|b| InlineKeyboardButton::callback(b.label, b.callback_data))
            .collect::<Vec<_>>()
    }))
}

/// Progress edits and refreshes often resend identical text.
fn is_unchanged(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::MessageNotModified))
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Run `op`, sleeping through at most [`MAX_RETRIES`] flood waits.
    async fn call<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Err(RequestError::RetryAfter(wait)) if retries < MAX_RETRIES => {
                    retries += 1;
                    debug!(?wait, "telegram flood wait");
                    sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    async fn edit(
        &self,
        msg: MessageRef,
        html: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<()> {
        let res = self
            .call(|| {
                let req = self
                    .bot
                    .edit_message_text(
                        tg_chat(msg.chat_id),
                        tg_message(msg.message_id),
                        html.to_string(),
                    )
                    .parse_mode(ParseMode::Html);
                match markup.clone() {
                    Some(m) => req.reply_markup(m),
                    None => req,
                }
            })
            .await;
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unchanged(&e) => Ok(()),
            Err(e) => Err(Error::Telegram(e.to_string())),
        }
    }

    async fn send(
        &self,
        chat_id: ChatId,
        html: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageRef> {
        let sent = self
            .call(|| {
                let req = self
                    .bot
                    .send_message(tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html);
                match markup.clone() {
                    Some(m) => req.reply_markup(m),
                    None => req,
                }
            })
            .await
            .map_err(|e| Error::Telegram(e.to_string()))?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(sent.id.0),
        })
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.send(chat_id, html, None).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.edit(msg, html, None).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.send(chat_id, html, Some(to_markup(keyboard))).await
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.edit(msg, html, Some(to_markup(keyboard))).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let action = match action {
            ChatAction::Typing => teloxide::types::ChatAction::Typing,
        };
        self.call(|| self.bot.send_chat_action(tg_chat(chat_id), action))
            .await
            .map_err(|e| Error::Telegram(e.to_string()))?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.call(|| {
            let req = self.bot.answer_callback_query(callback_id.to_string());
            match text {
                Some(t) => req.text(t.to_string()),
                None => req,
            }
        })
        .await
        .map_err(|e| Error::Telegram(e.to_string()))?;
        Ok(())
    }
}
