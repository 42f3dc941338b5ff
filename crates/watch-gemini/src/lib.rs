//! Google adapters: Gemini (generation + embeddings) and Google Maps (geocoding).
//!
//! Both talk plain JSON over HTTPS with an API key; the response parsing is
//! split into free functions so it can be tested without the network.

mod gemini;
mod maps;

use std::time::Duration;

use watch_core::{errors::Error, Result};

pub use gemini::GeminiClient;
pub use maps::GoogleMapsClient;

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::External(format!("http client build error: {e}")))
}

/// Turn a non-2xx response into an error carrying the start of the body.
pub(crate) async fn ensure_success(
    service: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::External(format!(
        "{service} request failed: {status} {}",
        body.chars().take(200).collect::<String>()
    )))
}
