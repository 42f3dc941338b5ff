//! Core domain + application logic for The Watch.
//!
//! Framework-agnostic: Gemini, Google Maps, the Telegram Bot API and the MTProto
//! user client live behind ports (traits) implemented in adapter crates.

pub mod analyst_cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod geocoder;
pub mod listener;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod ports;
pub mod preferences;
pub mod risk;
pub mod samples;
pub mod schemas;
pub mod security;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use errors::{Error, Result};
