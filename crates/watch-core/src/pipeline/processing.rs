//! Channel message → incident: extract, geocode, store.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    domain::Coordinates,
    geocoder::Geocoder,
    ports::LanguageModel,
    schemas::{EventType, NewIncident, TelegramMessage},
    store::{IncidentStore, SimilarityProbe},
};

use super::{llm_json, prompts};

const DEFAULT_SEVERITY: i64 = 5;
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// How far a message got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeStatus {
    Stored,
    /// The model judged the message irrelevant.
    Skipped,
    Duplicate,
    Failed,
}

#[derive(Clone, Debug)]
pub struct ProcessingOutcome {
    pub status: OutcomeStatus,
    pub incident_id: Option<String>,
    pub summary: String,
    pub city: String,
    pub event_type: Option<EventType>,
    pub severity: i64,
    pub coordinates: Coordinates,
    pub error: Option<String>,
}

impl ProcessingOutcome {
    fn empty() -> Self {
        Self {
            status: OutcomeStatus::Failed,
            incident_id: None,
            summary: String::new(),
            city: String::new(),
            event_type: None,
            severity: 0,
            coordinates: Coordinates::default(),
            error: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == OutcomeStatus::Stored
    }

    fn stop(mut self, status: OutcomeStatus, error: impl Into<String>) -> Self {
        self.status = status;
        self.error = Some(error.into());
        self
    }
}

/// Structured fields pulled out of a channel message.
#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub summary: String,
    pub location_description: String,
    pub city: String,
    pub street: String,
    pub neighborhood: String,
    pub event_type: EventType,
    pub severity: i64,
    pub confidence: f64,
}

enum ExtractError {
    Skipped(String),
    Failed(String),
}

pub struct ProcessingPipeline {
    model: Arc<dyn LanguageModel>,
    geocoder: Arc<Geocoder>,
    store: Arc<IncidentStore>,
    temperature: f32,
}

impl ProcessingPipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        geocoder: Arc<Geocoder>,
        store: Arc<IncidentStore>,
    ) -> Self {
        Self {
            model,
            geocoder,
            store,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn store(&self) -> &Arc<IncidentStore> {
        &self.store
    }

    /// Run one message through the pipeline. Never fails; the first failing
    /// stage is reported in the outcome.
    pub async fn process_message(&self, msg: &TelegramMessage) -> ProcessingOutcome {
        let mut out = ProcessingOutcome::empty();

        let extraction = match self.extract(msg).await {
            Ok(x) => x,
            Err(ExtractError::Skipped(reason)) => {
                debug!(message_id = msg.message_id, %reason, "message skipped");
                return out.stop(OutcomeStatus::Skipped, format!("Skipped: {reason}"));
            }
            Err(ExtractError::Failed(e)) => {
                warn!(message_id = msg.message_id, "extraction failed: {e}");
                return out.stop(OutcomeStatus::Failed, e);
            }
        };
        out.summary = extraction.summary.clone();
        out.city = extraction.city.clone();
        out.event_type = Some(extraction.event_type);
        out.severity = extraction.severity;

        if extraction.location_description.is_empty() && extraction.city.is_empty() {
            return out.stop(OutcomeStatus::Failed, "No location to geocode");
        }
        let query = geocode_query(&extraction);
        let city_hint = Some(extraction.city.as_str()).filter(|c| !c.is_empty());
        let location = self.geocoder.geocode(&query, city_hint).await;
        out.coordinates = location.coordinates();
        debug!(
            message_id = msg.message_id,
            method = %location.method,
            confidence = location.confidence,
            "incident geocoded"
        );

        self.store_stage(msg, &extraction, out).await
    }

    async fn extract(&self, msg: &TelegramMessage) -> Result<Extraction, ExtractError> {
        if msg.text.trim().is_empty() {
            return Err(ExtractError::Failed("No message text provided".to_string()));
        }
        let prompt = prompts::extract_incident(&msg.text, &msg.channel_name);
        let reply = self
            .model
            .generate(&prompt, self.temperature)
            .await
            .map_err(|e| ExtractError::Failed(format!("Extraction failed: {e}")))?;
        parse_extraction(&reply)
    }

    async fn store_stage(
        &self,
        msg: &TelegramMessage,
        x: &Extraction,
        mut out: ProcessingOutcome,
    ) -> ProcessingOutcome {
        if x.summary.is_empty() {
            return out.stop(OutcomeStatus::Failed, "No summary to store");
        }
        if out.coordinates.is_unset() {
            return out.stop(OutcomeStatus::Failed, "No valid coordinates");
        }

        match self.store.check_duplicate(msg.message_id, &msg.channel_name) {
            Ok(true) => {
                return out.stop(OutcomeStatus::Duplicate, "Duplicate incident - already stored")
            }
            Ok(false) => {}
            Err(e) => return out.stop(OutcomeStatus::Failed, format!("Storage failed: {e}")),
        }

        let probe = SimilarityProbe {
            summary: &x.summary,
            city: &x.city,
            lat: out.coordinates.lat,
            lon: out.coordinates.lon,
            event_type: x.event_type,
            timestamp: msg.timestamp,
            street: &x.street,
        };
        match self.store.check_similar_incident(&probe).await {
            Ok(Some(existing)) => {
                info!(
                    similar_to = %existing,
                    city = %x.city,
                    "skipping duplicate incident from another channel"
                );
                return out.stop(
                    OutcomeStatus::Duplicate,
                    format!("Similar incident already exists (ID: {existing})"),
                );
            }
            Ok(None) => {}
            Err(e) => return out.stop(OutcomeStatus::Failed, format!("Storage failed: {e}")),
        }

        let new = NewIncident {
            summary: x.summary.clone(),
            raw_text: msg.text.clone(),
            timestamp: msg.timestamp,
            severity: x.severity,
            event_type: x.event_type,
            location: out.coordinates,
            city: x.city.clone(),
            street: x.street.clone(),
            neighborhood: x.neighborhood.clone(),
            source_channel: msg.channel_name.clone(),
            message_id: msg.message_id,
        };
        match self.store.store_incident(new).await {
            Ok(id) => {
                info!(
                    incident_id = %id,
                    event_type = %x.event_type,
                    severity = x.severity,
                    city = %x.city,
                    "incident stored"
                );
                out.status = OutcomeStatus::Stored;
                out.incident_id = Some(id);
                out
            }
            Err(e) => out.stop(OutcomeStatus::Failed, format!("Storage failed: {e}")),
        }
    }
}

fn parse_extraction(reply: &str) -> Result<Extraction, ExtractError> {
    let obj = llm_json::parse_object(reply)
        .map_err(|e| ExtractError::Failed(format!("Failed to parse LLM response: {e}")))?;

    if llm_json::bool_field(&obj, "skip") {
        let reason =
            llm_json::str_field(&obj, &["reason"]).unwrap_or_else(|| "Not relevant".to_string());
        return Err(ExtractError::Skipped(reason));
    }

    let event_type = llm_json::str_field(&obj, &["event_type"])
        .map(|s| EventType::parse_lenient(&s))
        .unwrap_or(EventType::Unknown);
    Ok(Extraction {
        summary: llm_json::str_field(&obj, &["summary", "summary_en"]).unwrap_or_default(),
        location_description: llm_json::str_field(&obj, &["location_description"])
            .unwrap_or_default(),
        city: llm_json::str_field(&obj, &["city", "city_en"]).unwrap_or_default(),
        street: llm_json::str_field(&obj, &["street"]).unwrap_or_default(),
        neighborhood: llm_json::str_field(&obj, &["neighborhood"]).unwrap_or_default(),
        event_type,
        severity: llm_json::int_field(&obj, "severity")
            .unwrap_or(DEFAULT_SEVERITY)
            .clamp(1, 10),
        confidence: llm_json::float_field(&obj, "confidence").unwrap_or(DEFAULT_CONFIDENCE),
    })
}

/// `street, neighborhood, city` when any is known, else the free-text location.
fn geocode_query(x: &Extraction) -> String {
    let parts: Vec<&str> = [&x.street, &x.neighborhood, &x.city]
        .into_iter()
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        x.location_description.clone()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{channel_message, FakeEmbedder, FakeModel};

    const LOD_SHOOTING: &str = r#"```json
{"skip": false, "summary": "ירי בלוד", "summary_en": "Shooting in Lod",
 "location_description": "לוד", "street": null, "neighborhood": null,
 "city": "lod", "city_en": "Lod", "event_type": "shooting", "severity": 7, "confidence": 0.9}
```"#;

    fn pipeline(model: FakeModel) -> ProcessingPipeline {
        let store = IncidentStore::open_in_memory("test", Arc::new(FakeEmbedder)).unwrap();
        ProcessingPipeline::new(
            Arc::new(model),
            Arc::new(Geocoder::offline()),
            Arc::new(store),
        )
    }

    #[test]
    fn extraction_defaults_and_fallbacks() {
        let x = match parse_extraction(
            r#"{"summary_en":"Shots fired","city_en":"Lod","event_type":"Police Activity","severity":42}"#,
        ) {
            Ok(x) => x,
            Err(_) => panic!("expected extraction"),
        };
        assert_eq!(x.summary, "Shots fired");
        assert_eq!(x.city, "Lod");
        assert_eq!(x.event_type, EventType::PoliceActivity);
        assert_eq!(x.severity, 10);
        assert_eq!(x.confidence, 0.8);
        assert_eq!(x.street, "");

        let x = match parse_extraction(r#"{"summary":"s","city":"c","event_type":"riot"}"#) {
            Ok(x) => x,
            Err(_) => panic!("expected extraction"),
        };
        assert_eq!(x.event_type, EventType::Unknown);
        assert_eq!(x.severity, 5);
    }

    #[test]
    fn geocode_query_prefers_address_parts() {
        let mut x = match parse_extraction(
            r#"{"summary":"s","location_description":"near the market","city":"Lod","street":"Herzl"}"#,
        ) {
            Ok(x) => x,
            Err(_) => panic!("expected extraction"),
        };
        assert_eq!(geocode_query(&x), "Herzl, Lod");
        x.street.clear();
        x.city.clear();
        assert_eq!(geocode_query(&x), "near the market");
    }

    #[tokio::test]
    async fn stores_then_reports_duplicates() {
        let p = pipeline(FakeModel::new().respond_when("MESSAGE:", LOD_SHOOTING));
        let msg = channel_message(10, "🚨 ירי בלוד");

        let out = p.process_message(&msg).await;
        assert!(out.success(), "{:?}", out.error);
        assert_eq!(out.summary, "ירי בלוד");
        assert_eq!(out.event_type, Some(EventType::Shooting));
        assert_eq!(out.severity, 7);
        assert_eq!((out.coordinates.lat, out.coordinates.lon), (31.9514, 34.8917));
        let id = out.incident_id.clone().unwrap();
        let stored = p.store().get_incident_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.raw_text, "🚨 ירי בלוד");
        assert_eq!(stored.source_channel, "Test Channel");

        let again = p.process_message(&msg).await;
        assert_eq!(again.status, OutcomeStatus::Duplicate);
        assert_eq!(again.error.as_deref(), Some("Duplicate incident - already stored"));

        // Same event reported by another channel.
        let mut other = channel_message(11, "ירי בלוד, פרטים נוספים");
        other.channel_name = "MDA".to_string();
        let similar = p.process_message(&other).await;
        assert_eq!(similar.status, OutcomeStatus::Duplicate);
        assert_eq!(
            similar.error,
            Some(format!("Similar incident already exists (ID: {id})"))
        );
        assert_eq!(p.store().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn skip_and_failures_stop_the_pipeline() {
        let p = pipeline(
            FakeModel::new()
                .respond_when("msg-weather", r#"{"skip": true, "reason": "Weather"}"#)
                .respond_when("msg-birthday", r#"{"skip": true}"#)
                .respond_when("msg-garbled", "sorry, I cannot")
                .respond_when("msg-nowhere", r#"{"summary":"s","event_type":"shooting"}"#)
                .fail_when("msg-outage", "quota exceeded"),
        );

        let cases = [
            ("msg-weather report", OutcomeStatus::Skipped, "Skipped: Weather".to_string()),
            ("msg-birthday", OutcomeStatus::Skipped, "Skipped: Not relevant".to_string()),
            ("msg-nowhere", OutcomeStatus::Failed, "No location to geocode".to_string()),
            ("   ", OutcomeStatus::Failed, "No message text provided".to_string()),
            (
                "msg-outage",
                OutcomeStatus::Failed,
                "Extraction failed: external error: quota exceeded".to_string(),
            ),
        ];
        for (text, status, error) in cases {
            let out = p.process_message(&channel_message(1, text)).await;
            assert_eq!(out.status, status, "{text}");
            assert_eq!(out.error.as_deref(), Some(error.as_str()), "{text}");
        }

        let out = p.process_message(&channel_message(2, "msg-garbled")).await;
        assert!(out
            .error
            .unwrap()
            .starts_with("Failed to parse LLM response:"));
        assert_eq!(p.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_summary_is_not_stored() {
        let p = pipeline(FakeModel::new().respond_when("MESSAGE:", r#"{"city":"Lod"}"#));
        let out = p.process_message(&channel_message(3, "x")).await;
        assert_eq!(out.error.as_deref(), Some("No summary to store"));
    }

    #[tokio::test]
    async fn uses_extraction_temperature() {
        let model = Arc::new(FakeModel::new().respond_when("MESSAGE:", LOD_SHOOTING));
        let store = IncidentStore::open_in_memory("t", Arc::new(FakeEmbedder)).unwrap();
        let p = ProcessingPipeline::new(
            model.clone(),
            Arc::new(Geocoder::offline()),
            Arc::new(store),
        )
        .with_temperature(0.1);
        p.process_message(&channel_message(4, "ירי")).await;
        assert_eq!(model.prompts()[0].1, 0.1);
    }
}
