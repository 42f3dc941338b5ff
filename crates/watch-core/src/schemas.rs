//! Data model shared by the pipelines, the store and the front-ends.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Coordinates;

/// Classification of safety incident types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Shooting,
    PoliceActivity,
    Roadblock,
    Accident,
    Brawl,
    Stabbing,
    Arson,
    Explosion,
    TerroristAttack,
    ViolentCrime,
    SuspiciousObject,
    Unknown,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::Shooting,
        EventType::PoliceActivity,
        EventType::Roadblock,
        EventType::Accident,
        EventType::Brawl,
        EventType::Stabbing,
        EventType::Arson,
        EventType::Explosion,
        EventType::TerroristAttack,
        EventType::ViolentCrime,
        EventType::SuspiciousObject,
        EventType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Shooting => "shooting",
            EventType::PoliceActivity => "police_activity",
            EventType::Roadblock => "roadblock",
            EventType::Accident => "accident",
            EventType::Brawl => "brawl",
            EventType::Stabbing => "stabbing",
            EventType::Arson => "arson",
            EventType::Explosion => "explosion",
            EventType::TerroristAttack => "terrorist_attack",
            EventType::ViolentCrime => "violent_crime",
            EventType::SuspiciousObject => "suspicious_object",
            EventType::Unknown => "unknown",
        }
    }

    /// Lenient parse of model output: case and spaces are normalized, anything
    /// unrecognized becomes `Unknown`.
    pub fn parse_lenient(raw: &str) -> Self {
        let norm = raw.trim().to_lowercase().replace(' ', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == norm)
            .unwrap_or(EventType::Unknown)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a user query is after.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    BreakingNews,
    SafetyStatus,
    Historical,
    General,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::BreakingNews => "breaking_news",
            QueryIntent::SafetyStatus => "safety_status",
            QueryIntent::Historical => "historical",
            QueryIntent::General => "general",
        }
    }

    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "breaking_news" => QueryIntent::BreakingNews,
            "safety_status" => QueryIntent::SafetyStatus,
            "historical" => QueryIntent::Historical,
            _ => QueryIntent::General,
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Critical,
    High,
    Moderate,
    Low,
    Minimal,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            RiskLevel::Critical
        } else if score >= 7.0 {
            RiskLevel::High
        } else if score >= 5.0 {
            RiskLevel::Moderate
        } else if score >= 3.0 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Low => "low",
            RiskLevel::Minimal => "minimal",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "extremely dangerous with active incidents",
            RiskLevel::High => "significantly elevated with recent serious incidents",
            RiskLevel::Moderate => "moderately elevated with some recent activity",
            RiskLevel::Low => "relatively calm with minimal recent activity",
            RiskLevel::Minimal => "very safe with no significant recent incidents",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw message received from a monitored Telegram channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub channel_id: i64,
    pub channel_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
}

/// A monitored channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: i64,
    pub channel_name: String,
    pub enabled: bool,
    /// 1 (highest) ..= 5.
    pub priority: u8,
}

impl ChannelConfig {
    pub fn new(channel_id: i64, channel_name: impl Into<String>, priority: u8) -> Self {
        Self {
            channel_id,
            channel_name: channel_name.into(),
            enabled: true,
            priority: priority.clamp(1, 5),
        }
    }
}

/// Channels the listener monitors out of the box.
pub fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::new(-1001177174722, "Magen David Adom (MDA)", 1),
        ChannelConfig::new(-1001352866222, "United Hatzalah", 1),
        ChannelConfig::new(-1001277927787, "Amar Assadi News", 2),
        ChannelConfig::new(-1001872012288, "Ariel Idan", 2),
        ChannelConfig::new(-1001601174656, "News Channel", 2),
        ChannelConfig::new(-1003766716578, "Test Channel", 3),
    ]
}

/// A stored incident. `summary` is the embedded document; the rest is metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    pub severity_score: i64,
    pub event_type: EventType,
    pub lat: f64,
    pub lon: f64,
    pub city: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub neighborhood: String,
    pub source_channel: String,
    pub message_id: i64,
    #[serde(default)]
    pub raw_text: String,
    /// Set by area queries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// Input for [`crate::store::IncidentStore::store_incident`].
#[derive(Clone, Debug)]
pub struct NewIncident {
    pub summary: String,
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
    pub severity: i64,
    pub event_type: EventType,
    pub location: Coordinates,
    pub city: String,
    pub street: String,
    pub neighborhood: String,
    pub source_channel: String,
    pub message_id: i64,
}

/// Result of geocoding.
#[derive(Clone, Debug, PartialEq)]
pub struct GeocodedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub formatted_address: String,
    pub method: String,
    pub confidence: f64,
    pub success: bool,
}

impl GeocodedLocation {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Output of the risk engine for one point and radius.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub total_events: usize,
    pub events_last_24h: usize,
    pub events_last_7d: usize,
    pub total_severity_sum: i64,
    pub weighted_severity: f64,
    pub event_type_counts: BTreeMap<String, usize>,
    pub most_recent_event: Option<DateTime<Utc>>,
    pub analysis_start: DateTime<Utc>,
    pub analysis_end: DateTime<Utc>,
}
