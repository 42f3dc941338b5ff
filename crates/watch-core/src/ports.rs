//! Outbound ports. Adapter crates implement these; pipelines only see the traits.

use async_trait::async_trait;

use crate::{schemas::TelegramMessage, Result};

/// Text generation backend (Gemini in production).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;
}

/// Text embedding backend used by the incident store.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// One candidate returned by a geocoding service.
#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    pub name: Option<String>,
    pub formatted_address: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Remote geocoding (Google Geocoding + Places Text Search in production).
#[async_trait]
pub trait GeocodingBackend: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Vec<Place>>;
    async fn text_search(&self, query: &str) -> Result<Vec<Place>>;
}

/// Where the listener hands accepted channel messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, message: TelegramMessage) -> Result<()>;
}
