use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use watch_core::{
    errors::Error,
    ports::{Embedder, LanguageModel},
    Result,
};

use crate::{ensure_success, http_client};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone, Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    embedding_model: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        embedding_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: embedding_model.into(),
            http: http_client(timeout)?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{API_BASE}/{}:{method}", model_path(model))
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::External(format!("gemini request error: {e}")))?;
        ensure_success("gemini", resp)
            .await?
            .json()
            .await
            .map_err(|e| Error::External(format!("gemini json error: {e}")))
    }
}

/// `gemini-2.0-flash` and `models/gemini-2.0-flash` both address the same model.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn generate_body(prompt: &str, temperature: f32) -> serde_json::Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "temperature": temperature },
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn parse_generate(v: serde_json::Value) -> Result<String> {
    let resp: GenerateResponse = serde_json::from_value(v)?;
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(Error::External(format!("gemini blocked the prompt: {reason}")));
    }
    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Err(Error::External("gemini returned no candidates".to_string()));
    };
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(Error::External(format!(
            "gemini returned empty text (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        )));
    }
    Ok(text)
}

fn embed_body(model: &str, text: &str) -> serde_json::Value {
    json!({
        "model": model_path(model),
        "content": { "parts": [{ "text": text }] },
    })
}

fn parse_embedding(v: &serde_json::Value) -> Result<Vec<f32>> {
    let values = v
        .pointer("/embedding/values")
        .and_then(|x| x.as_array())
        .ok_or_else(|| Error::External("gemini embedding missing values".to_string()))?;
    let out: Vec<f32> = values
        .iter()
        .filter_map(|x| x.as_f64())
        .map(|x| x as f32)
        .collect();
    if out.is_empty() || out.len() != values.len() {
        return Err(Error::External("gemini embedding malformed".to_string()));
    }
    Ok(out)
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        debug!(model = %self.model, chars = prompt.chars().count(), temperature, "gemini generate");
        let url = self.endpoint(&self.model, "generateContent");
        let v = self.post(&url, generate_body(prompt, temperature)).await?;
        parse_generate(v)
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = self.endpoint(&self.embedding_model, "embedContent");
        let v = self
            .post(&url, embed_body(&self.embedding_model, text))
            .await?;
        parse_embedding(&v)
    }
}
