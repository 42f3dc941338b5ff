//! Telegram bot adapter (teloxide).
//!
//! [`TelegramMessenger`] implements the `watch-core` MessagingPort over the Bot
//! API; [`router`] wires the dispatcher and [`handlers`] answer users.

pub mod conversation;
pub mod handlers;
mod messenger;
pub mod router;
pub mod views;

pub use messenger::TelegramMessenger;
