use std::{env, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

pub const DEFAULT_SESSION_NAME: &str = "the_watch_session";
pub const DEFAULT_PERSIST_DIR: &str = "data/chroma_db";
pub const DEFAULT_COLLECTION: &str = "the_watch_incidents";
pub const DEFAULT_PREFERENCES_FILE: &str = "data/user_preferences.json";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// Typed configuration for every watch mode.
///
/// Only `GOOGLE_API_KEY` is required up front; Telegram credentials are
/// checked by the mode that needs them.
#[derive(Clone, Debug)]
pub struct Config {
    // Google
    pub google_api_key: String,
    pub gemini_model: String,
    pub gemini_embedding_model: String,
    pub extraction_temperature: f32,
    pub response_temperature: f32,
    pub http_timeout: Duration,

    // Telegram client (listener)
    pub telegram_api_id: Option<i32>,
    pub telegram_api_hash: Option<String>,
    pub telegram_phone: Option<String>,
    pub telegram_password: Option<String>,
    pub session_name: String,

    // Telegram bot
    pub telegram_bot_token: Option<String>,
    pub telegram_allowed_users: Vec<i64>,
    pub telegram_message_limit: usize,

    // Storage
    pub persist_directory: PathBuf,
    pub collection_name: String,
    pub preferences_file: PathBuf,

    // Runtime
    pub backfill_limit: usize,
    pub queue_capacity: usize,

    // Rate limiting (bot)
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    /// Load `.env` (existing variables win) and build from the process environment.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_str = |key: &str| lookup(key).and_then(non_empty);

        let google_api_key = env_str("GOOGLE_API_KEY").ok_or_else(|| {
            Error::Config(
                "GOOGLE_API_KEY environment variable is required (Gemini LLM and geocoding)"
                    .to_string(),
            )
        })?;

        let telegram_api_id = match env_str("TELEGRAM_API_ID") {
            Some(raw) => Some(raw.trim().parse::<i32>().map_err(|_| {
                Error::Config(format!("TELEGRAM_API_ID must be an integer, got {raw:?}"))
            })?),
            None => None,
        };

        let session_name =
            env_str("TELEGRAM_SESSION_NAME").unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string());

        Ok(Self {
            google_api_key,
            gemini_model: env_str("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_embedding_model: env_str("GEMINI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            extraction_temperature: 0.2,
            response_temperature: 0.7,
            http_timeout: Duration::from_secs(
                parse_u64(env_str("HTTP_TIMEOUT_SECS")).unwrap_or(30),
            ),

            telegram_api_id,
            telegram_api_hash: env_str("TELEGRAM_API_HASH"),
            telegram_phone: env_str("TELEGRAM_PHONE"),
            telegram_password: env_str("TELEGRAM_PASSWORD"),
            session_name,

            telegram_bot_token: env_str("TELEGRAM_BOT_TOKEN"),
            telegram_allowed_users: parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS")),
            telegram_message_limit: parse_u64(env_str("TELEGRAM_MESSAGE_LIMIT"))
                .map(|v| v as usize)
                .unwrap_or(4096),

            persist_directory: PathBuf::from(
                env_str("CHROMA_PERSIST_DIRECTORY")
                    .unwrap_or_else(|| DEFAULT_PERSIST_DIR.to_string()),
            ),
            collection_name: env_str("CHROMA_COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            preferences_file: PathBuf::from(
                env_str("USER_PREFERENCES_FILE")
                    .unwrap_or_else(|| DEFAULT_PREFERENCES_FILE.to_string()),
            ),

            backfill_limit: parse_u64(env_str("WATCH_BACKFILL_LIMIT")).unwrap_or(0) as usize,
            queue_capacity: parse_u64(env_str("WATCH_QUEUE_CAPACITY"))
                .unwrap_or(256)
                .max(1) as usize,

            rate_limit_enabled: parse_bool(env_str("RATE_LIMIT_ENABLED")).unwrap_or(true),
            rate_limit_requests: parse_u64(env_str("RATE_LIMIT_REQUESTS")).unwrap_or(20) as u32,
            rate_limit_window: Duration::from_secs(
                parse_u64(env_str("RATE_LIMIT_WINDOW")).unwrap_or(60),
            ),
        })
    }

    /// `TELEGRAM_API_ID` + `TELEGRAM_API_HASH`, required by the listener.
    pub fn listener_credentials(&self) -> Result<(i32, &str)> {
        match (self.telegram_api_id, self.telegram_api_hash.as_deref()) {
            (Some(id), Some(hash)) => Ok((id, hash)),
            _ => Err(Error::Config(
                "TELEGRAM_API_ID and TELEGRAM_API_HASH environment variables are required \
(get them from https://my.telegram.org)"
                    .to_string(),
            )),
        }
    }

    pub fn has_listener_credentials(&self) -> bool {
        self.listener_credentials().is_ok()
    }

    /// `TELEGRAM_BOT_TOKEN`, required by `--bot`.
    pub fn bot_token(&self) -> Result<&str> {
        self.telegram_bot_token.as_deref().ok_or_else(|| {
            Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required (create a bot via @BotFather)"
                    .to_string(),
            )
        })
    }

    /// The MTProto session file: `<session_name>.session` in the working directory.
    pub fn session_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.session", self.session_name))
    }

    /// Optional variables that are unset, with what they enable.
    pub fn missing_optional(&self) -> Vec<(&'static str, &'static str)> {
        let mut out = Vec::new();
        if self.telegram_api_id.is_none() {
            out.push(("TELEGRAM_API_ID", "Required for Telegram listener"));
        }
        if self.telegram_api_hash.is_none() {
            out.push(("TELEGRAM_API_HASH", "Required for Telegram listener"));
        }
        if self.telegram_bot_token.is_none() {
            out.push(("TELEGRAM_BOT_TOKEN", "Required for the bot interface"));
        }
        out
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn google_key_is_required() {
        let err = cfg(&[]).unwrap_err();
        assert!(err.to_string().contains("GOOGLE_API_KEY"));
        let err = cfg(&[("GOOGLE_API_KEY", "   ")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn defaults() {
        let c = cfg(&[("GOOGLE_API_KEY", "k")]).unwrap();
        assert_eq!(c.persist_directory, PathBuf::from("data/chroma_db"));
        assert_eq!(c.collection_name, "the_watch_incidents");
        assert_eq!(c.session_file(), PathBuf::from("the_watch_session.session"));
        assert_eq!(c.gemini_model, "gemini-2.0-flash");
        assert_eq!(c.backfill_limit, 0);
        assert_eq!(c.queue_capacity, 256);
        assert!(c.telegram_allowed_users.is_empty());
        assert!(!c.has_listener_credentials());
        assert!(c.bot_token().is_err());
        assert_eq!(c.missing_optional().len(), 3);
    }

    #[test]
    fn telegram_credentials() {
        let c = cfg(&[
            ("GOOGLE_API_KEY", "k"),
            ("TELEGRAM_API_ID", "12345"),
            ("TELEGRAM_API_HASH", "abc"),
            ("TELEGRAM_BOT_TOKEN", "1:xyz"),
            ("TELEGRAM_ALLOWED_USERS", "1, 2,x,3"),
            ("TELEGRAM_SESSION_NAME", "ops"),
        ])
        .unwrap();
        assert_eq!(c.listener_credentials().unwrap(), (12345, "abc"));
        assert_eq!(c.bot_token().unwrap(), "1:xyz");
        assert_eq!(c.telegram_allowed_users, vec![1, 2, 3]);
        assert_eq!(c.session_file(), PathBuf::from("ops.session"));
        assert!(c.missing_optional().is_empty());
    }

    #[test]
    fn bad_api_id_is_a_config_error() {
        let err = cfg(&[("GOOGLE_API_KEY", "k"), ("TELEGRAM_API_ID", "abc")]).unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_API_ID"));
    }
}
