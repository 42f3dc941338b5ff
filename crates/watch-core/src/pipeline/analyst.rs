//! Question → answer: classify, geocode, retrieve, assess risk, respond.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    domain::Coordinates,
    geocoder::Geocoder,
    ports::LanguageModel,
    risk::RiskCalculator,
    schemas::{Incident, QueryIntent, RiskAssessment},
    store::IncidentStore,
};

use super::{llm_json, prompts};

const AREA_RADIUS_KM: f64 = 2.0;
const AREA_LIMIT: usize = 50;
const DEFAULT_DAYS: i64 = 30;
const MIN_DAYS_FOR_CURRENT_EVENTS: i64 = 7;
const MAX_DAYS: i64 = 3650;
const MAX_LOCATIONS_PER_TYPE: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub intent: QueryIntent,
    pub location: Option<String>,
    pub time_range_days: i64,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            intent: QueryIntent::General,
            location: None,
            time_range_days: DEFAULT_DAYS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnalystReport {
    pub response: String,
    pub intent: QueryIntent,
    /// Location as the user named it.
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub risk_assessment: Option<RiskAssessment>,
    pub incident_count: usize,
    /// Set when no answer could be generated.
    pub error: Option<String>,
    /// Stages that failed but did not stop the pipeline.
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct BreakingNews {
    pub incidents: Vec<Incident>,
    pub count: usize,
    pub time_window_hours: i64,
    pub error: Option<String>,
}

pub struct AnalystPipeline {
    model: Arc<dyn LanguageModel>,
    geocoder: Arc<Geocoder>,
    store: Arc<IncidentStore>,
    risk: RiskCalculator,
    classify_temperature: f32,
    response_temperature: f32,
}

impl AnalystPipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        geocoder: Arc<Geocoder>,
        store: Arc<IncidentStore>,
    ) -> Self {
        Self {
            model,
            geocoder,
            store,
            risk: RiskCalculator::default(),
            classify_temperature: 0.2,
            response_temperature: 0.7,
        }
    }

    pub fn with_temperatures(mut self, classify: f32, respond: f32) -> Self {
        self.classify_temperature = classify;
        self.response_temperature = respond;
        self
    }

    pub fn store(&self) -> &Arc<IncidentStore> {
        &self.store
    }

    pub fn risk(&self) -> &RiskCalculator {
        &self.risk
    }

    pub async fn query_safety_status(&self, query: &str) -> AnalystReport {
        let mut warnings = Vec::new();

        let classification = match self.classify(query).await {
            Ok(c) => c,
            Err(e) => {
                warn!("query classification failed: {e}");
                warnings.push(e);
                Classification::default()
            }
        };
        debug!(
            intent = %classification.intent,
            location = classification.location.as_deref().unwrap_or(""),
            days = classification.time_range_days,
            "query classified"
        );

        let coordinates = match classification.location.as_deref() {
            Some(location) => {
                let geo = self.geocoder.geocode(location, None).await;
                Some(geo.coordinates()).filter(|c| c.lat != 0.0 && c.lon != 0.0)
            }
            None => None,
        };

        let incidents = match self.retrieve(&classification, coordinates) {
            Ok(incidents) => incidents,
            Err(e) => {
                warn!("incident retrieval failed: {e}");
                warnings.push(format!("Retrieval failed: {e}"));
                Vec::new()
            }
        };

        let risk_assessment = coordinates
            .map(|c| self.risk.assess(&incidents, c.lat, c.lon, Some(AREA_RADIUS_KM)));

        let risk_block = match &risk_assessment {
            Some(a) => risk_block(a),
            None => "No specific location risk assessment available.".to_string(),
        };
        let prompt = prompts::generate_response(
            query,
            classification.intent.as_str(),
            classification.location.as_deref().unwrap_or("the area"),
            &risk_block,
            &aggregate_incidents(&incidents),
        );

        let (response, error) = match self
            .model
            .generate(&prompt, self.response_temperature)
            .await
        {
            Ok(text) => (text, None),
            Err(e) => {
                warn!("response generation failed: {e}");
                (
                    format!(
                        "I apologize, but I encountered an error processing your query. \
                         Please try rephrasing your question. Error: {e}"
                    ),
                    Some(e.to_string()),
                )
            }
        };

        AnalystReport {
            response,
            intent: classification.intent,
            location: classification.location,
            coordinates,
            risk_assessment,
            incident_count: incidents.len(),
            error,
            warnings,
        }
    }

    /// Incidents from the last `hours`, newest first.
    pub fn get_breaking_news(&self, hours: i64) -> BreakingNews {
        match self.store.get_incidents_by_time(hours, None, &[]) {
            Ok(incidents) => BreakingNews {
                count: incidents.len(),
                incidents,
                time_window_hours: hours,
                error: None,
            },
            Err(e) => {
                warn!("breaking news lookup failed: {e}");
                BreakingNews {
                    incidents: Vec::new(),
                    count: 0,
                    time_window_hours: hours,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn classify(&self, query: &str) -> Result<Classification, String> {
        if query.trim().is_empty() {
            return Err("No query provided".to_string());
        }
        let reply = self
            .model
            .generate(&prompts::classify_query(query), self.classify_temperature)
            .await
            .map_err(|e| format!("Classification failed: {e}"))?;
        parse_classification(&reply).map_err(|e| format!("Classification failed: {e}"))
    }

    fn retrieve(
        &self,
        c: &Classification,
        coordinates: Option<Coordinates>,
    ) -> crate::Result<Vec<Incident>> {
        match coordinates {
            Some(p) => self.store.get_incidents_in_area(
                p.lat,
                p.lon,
                AREA_RADIUS_KM,
                c.time_range_days,
                AREA_LIMIT,
            ),
            None if c.intent == QueryIntent::BreakingNews => {
                self.store.get_incidents_by_time(24, None, &[])
            }
            None => self
                .store
                .get_incidents_by_time(c.time_range_days.saturating_mul(24), None, &[]),
        }
    }
}

fn parse_classification(reply: &str) -> serde_json::Result<Classification> {
    let obj = llm_json::parse_object(reply)?;
    let intent = llm_json::str_field(&obj, &["intent"])
        .map(|s| QueryIntent::parse_lenient(&s))
        .unwrap_or(QueryIntent::General);
    let location = llm_json::str_field(&obj, &["location"])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"));
    let mut days = llm_json::int_field(&obj, "time_range_days")
        .filter(|d| *d > 0)
        .map_or(DEFAULT_DAYS, |d| d.min(MAX_DAYS));
    if matches!(intent, QueryIntent::BreakingNews | QueryIntent::SafetyStatus) {
        days = days.max(MIN_DAYS_FOR_CURRENT_EVENTS);
    }
    Ok(Classification {
        intent,
        location,
        time_range_days: days,
    })
}

fn risk_block(a: &RiskAssessment) -> String {
    format!(
        "Risk Score: {:.1}/10\nRisk Level: {}\nTotal Incidents (30 days): {}\nLast 24 Hours: {}\nLast 7 Days: {}",
        a.risk_score,
        a.risk_level.as_str().to_uppercase(),
        a.total_events,
        a.events_last_24h,
        a.events_last_7d,
    )
}

fn is_unknown_place(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("unknown") || s == "לא ידוע"
}

struct TypeGroup {
    event_type: String,
    count: usize,
    max_severity: i64,
    locations: Vec<String>,
}

/// One line per event type, in order of first appearance.
pub fn aggregate_incidents(incidents: &[Incident]) -> String {
    let mut groups: Vec<TypeGroup> = Vec::new();
    for inc in incidents {
        if is_unknown_place(&inc.city) {
            continue;
        }
        let location = if is_unknown_place(&inc.street) {
            inc.city.clone()
        } else {
            format!("{}, {}", inc.street, inc.city)
        };
        let key = inc.event_type.as_str();
        let idx = match groups.iter().position(|g| g.event_type == key) {
            Some(i) => i,
            None => {
                groups.push(TypeGroup {
                    event_type: key.to_string(),
                    count: 0,
                    max_severity: 0,
                    locations: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let g = &mut groups[idx];
        g.count += 1;
        g.max_severity = g.max_severity.max(inc.severity_score);
        if !g.locations.contains(&location) {
            g.locations.push(location);
        }
    }

    if groups.is_empty() {
        return "No recent incidents found.".to_string();
    }

    groups
        .iter()
        .map(|g| {
            let mut line = if g.count == 1 {
                format!("- {} incident", g.event_type)
            } else {
                format!("- {} {} incidents", g.count, g.event_type)
            };
            let shown: Vec<&str> = g
                .locations
                .iter()
                .take(MAX_LOCATIONS_PER_TYPE)
                .map(String::as_str)
                .collect();
            if !shown.is_empty() {
                line.push_str(&format!(" in {}", shown.join(", ")));
            }
            if g.max_severity >= 7 {
                line.push_str(&format!(" (max severity: {}/10)", g.max_severity));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::{
        schemas::EventType,
        testing::{incident, new_incident, FakeEmbedder, FakeModel},
    };

    fn pipeline(model: Arc<FakeModel>) -> AnalystPipeline {
        let store = IncidentStore::open_in_memory("test", Arc::new(FakeEmbedder)).unwrap();
        AnalystPipeline::new(model, Arc::new(Geocoder::offline()), Arc::new(store))
    }

    #[test]
    fn classification_floors_days_for_current_events() {
        let c = parse_classification(
            r#"{"intent":"safety_status","location":"Lod","time_range_days":1}"#,
        )
        .unwrap();
        assert_eq!(c.intent, QueryIntent::SafetyStatus);
        assert_eq!(c.location.as_deref(), Some("Lod"));
        assert_eq!(c.time_range_days, 7);

        let c = parse_classification(r#"{"intent":"historical","location":null}"#).unwrap();
        assert_eq!(c.time_range_days, 30);
        assert_eq!(c.location, None);

        let c = parse_classification(r#"{"intent":"gossip","time_range_days":3}"#).unwrap();
        assert_eq!(c.intent, QueryIntent::General);
        assert_eq!(c.time_range_days, 3);
    }

    #[test]
    fn classification_caps_huge_day_ranges() {
        let c = parse_classification(r#"{"intent":"historical","time_range_days":1e12}"#).unwrap();
        assert_eq!(c.time_range_days, MAX_DAYS);
        let c = parse_classification(r#"{"intent":"historical","time_range_days":"-5"}"#).unwrap();
        assert_eq!(c.time_range_days, DEFAULT_DAYS);
    }

    #[tokio::test]
    async fn huge_day_ranges_still_answer() {
        let model = Arc::new(
            FakeModel::new()
                .respond_when(
                    "Classify this user query",
                    r#"{"intent":"historical","location":null,"time_range_days":1e12}"#,
                )
                .respond_when("Generate response", "Here is the history."),
        );
        let p = pipeline(model);
        p.store()
            .store_incident(new_incident("Shots fired in Lod", "Lod", EventType::Shooting, 8))
            .await
            .unwrap();
        let report = p.query_safety_status("everything ever").await;
        assert!(report.error.is_none());
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.incident_count, 1);

        let model = Arc::new(
            FakeModel::new()
                .respond_when(
                    "Classify this user query",
                    r#"{"intent":"safety_status","location":"Lod","time_range_days":999999999}"#,
                )
                .respond_when("Generate response", "Stay alert in Lod."),
        );
        let p = pipeline(model);
        p.store()
            .store_incident(new_incident("Shots fired in Lod", "Lod", EventType::Shooting, 8))
            .await
            .unwrap();
        let report = p.query_safety_status("Lod since forever?").await;
        assert!(report.error.is_none());
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.incident_count, 1);
    }

    #[test]
    fn aggregates_by_type_and_skips_unknown_cities() {
        let now = Utc::now();
        let mut a = incident("a", EventType::Shooting, 8, 0.0, 0.0, now);
        a.street = "Herzl".to_string();
        let b = incident("b", EventType::Shooting, 5, 0.0, 0.0, now);
        let mut c = incident("c", EventType::Roadblock, 3, 0.0, 0.0, now);
        c.city = "Tamra".to_string();
        let mut d = incident("d", EventType::Arson, 9, 0.0, 0.0, now);
        d.city = "Unknown".to_string();

        let text = aggregate_incidents(&[a, b, c, d]);
        assert_eq!(
            text,
            "- 2 shooting incidents in Herzl, Lod, Lod (max severity: 8/10)\n- roadblock incident in Tamra"
        );
        assert_eq!(aggregate_incidents(&[]), "No recent incidents found.");
    }

    #[tokio::test]
    async fn location_query_uses_area_and_risk() {
        let model = Arc::new(
            FakeModel::new()
                .respond_when(
                    "Classify this user query",
                    r#"{"intent":"safety_status","location":"Lod","time_range_days":7}"#,
                )
                .respond_when("Generate response", "Stay alert in Lod."),
        );
        let p = pipeline(model.clone());
        p.store()
            .store_incident(new_incident("Shots fired in Lod", "Lod", EventType::Shooting, 8))
            .await
            .unwrap();

        let report = p.query_safety_status("Is Lod safe?").await;
        assert_eq!(report.response, "Stay alert in Lod.");
        assert_eq!(report.intent, QueryIntent::SafetyStatus);
        assert_eq!(report.location.as_deref(), Some("Lod"));
        assert_eq!(report.incident_count, 1);
        assert!(report.error.is_none());
        let risk = report.risk_assessment.unwrap();
        assert_eq!(risk.total_events, 1);
        assert_eq!(risk.events_last_24h, 1);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].1, 0.2);
        let (respond, temp) = &prompts[1];
        assert_eq!(*temp, 0.7);
        assert!(respond.contains("LOCATION: Lod"));
        assert!(respond.contains("Risk Level:"));
        assert!(respond.contains("- shooting incident in Lod (max severity: 8/10)"));
    }

    #[tokio::test]
    async fn classification_failure_falls_back_to_general() {
        let model = Arc::new(
            FakeModel::new()
                .fail_when("Classify this user query", "timeout")
                .respond_when("Generate response", "Nothing notable."),
        );
        let p = pipeline(model.clone());
        let mut old = new_incident("Old brawl", "Lod", EventType::Brawl, 4);
        old.timestamp = Utc::now() - Duration::days(40);
        p.store().store_incident(old).await.unwrap();

        let report = p.query_safety_status("anything?").await;
        assert_eq!(report.intent, QueryIntent::General);
        assert!(report.risk_assessment.is_none());
        assert_eq!(report.incident_count, 0);
        assert_eq!(
            report.warnings,
            vec!["Classification failed: external error: timeout".to_string()]
        );
        assert!(report.error.is_none());
        let respond = &model.prompts()[1].0;
        assert!(respond.contains("LOCATION: the area"));
        assert!(respond.contains("No specific location risk assessment available."));
        assert!(respond.contains("No recent incidents found."));
    }

    #[tokio::test]
    async fn response_failure_becomes_apology() {
        let model = Arc::new(FakeModel::new().respond_when(
            "Classify this user query",
            r#"{"intent":"breaking_news","location":null}"#,
        ));
        let p = pipeline(model);
        let report = p.query_safety_status("what's happening?").await;
        assert!(report
            .response
            .starts_with("I apologize, but I encountered an error processing your query."));
        assert!(report.response.ends_with("Error: external error: no scripted response"));
        assert_eq!(
            report.error.as_deref(),
            Some("external error: no scripted response")
        );
    }

    #[tokio::test]
    async fn breaking_news_window() {
        let p = pipeline(Arc::new(FakeModel::new()));
        p.store()
            .store_incident(new_incident("Fresh", "Lod", EventType::Shooting, 6))
            .await
            .unwrap();
        let mut stale = new_incident("Stale", "Lod", EventType::Shooting, 6);
        stale.timestamp = Utc::now() - Duration::hours(30);
        p.store().store_incident(stale).await.unwrap();

        let news = p.get_breaking_news(24);
        assert_eq!(news.count, 1);
        assert_eq!(news.incidents[0].summary, "Fresh");
        assert_eq!(news.time_window_hours, 24);
        assert_eq!(p.get_breaking_news(48).count, 2);
    }
}
