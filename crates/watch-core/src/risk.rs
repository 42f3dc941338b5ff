//! Deterministic 0-10 risk score for a point and radius.
//!
//! The score has three capped components: how many incidents happened nearby,
//! how severe they were (weighted by recency and event type), and whether any
//! of them are from the last day or week.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::schemas::{EventType, Incident, RiskAssessment, RiskLevel};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

#[derive(Clone, Debug)]
pub struct RiskConfig {
    pub recent_hours: i64,
    pub week_hours: i64,
    pub analysis_days: i64,
    pub default_radius_km: f64,
    pub weight_last_24h: f64,
    pub weight_last_week: f64,
    pub weight_older: f64,
    pub events_for_base_score: f64,
    pub max_base_score: f64,
    pub max_severity_score: f64,
    pub max_recency_score: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            recent_hours: 24,
            week_hours: 168,
            analysis_days: 30,
            default_radius_km: 2.0,
            weight_last_24h: 3.0,
            weight_last_week: 2.0,
            weight_older: 1.0,
            events_for_base_score: 5.0,
            max_base_score: 4.0,
            max_severity_score: 4.0,
            max_recency_score: 2.0,
        }
    }
}

/// Multiplier applied to an incident's severity by type.
pub fn event_weight(event_type: EventType) -> f64 {
    match event_type {
        EventType::Shooting | EventType::Explosion => 1.5,
        EventType::Stabbing => 1.4,
        EventType::Arson => 1.3,
        EventType::Brawl => 1.0,
        EventType::PoliceActivity => 0.8,
        EventType::Roadblock => 0.5,
        EventType::Accident => 0.6,
        EventType::Unknown => 0.7,
        _ => 1.0,
    }
}

#[derive(Clone, Debug, Default)]
pub struct RiskCalculator {
    cfg: RiskConfig,
}

#[derive(Default)]
struct Metrics {
    events_24h: usize,
    events_7d: usize,
    severity_sum: i64,
    weighted_severity: f64,
    type_counts: BTreeMap<String, usize>,
    most_recent: Option<DateTime<Utc>>,
}

impl RiskCalculator {
    pub fn new(cfg: RiskConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    pub fn assess(
        &self,
        incidents: &[Incident],
        lat: f64,
        lon: f64,
        radius_km: Option<f64>,
    ) -> RiskAssessment {
        self.assess_at(incidents, lat, lon, radius_km, None, Utc::now())
    }

    pub fn assess_at(
        &self,
        incidents: &[Incident],
        lat: f64,
        lon: f64,
        radius_km: Option<f64>,
        analysis_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let radius_km = radius_km
            .filter(|r| *r > 0.0)
            .unwrap_or(self.cfg.default_radius_km);
        let days = analysis_days
            .filter(|d| *d > 0)
            .unwrap_or(self.cfg.analysis_days);
        let analysis_start = now - Duration::days(days);

        let nearby: Vec<&Incident> = incidents
            .iter()
            .filter(|i| i.timestamp >= analysis_start)
            .filter(|i| haversine_km(lat, lon, i.lat, i.lon) <= radius_km)
            .collect();

        let m = self.metrics(&nearby, now);
        let raw = self.score(&m, nearby.len());

        RiskAssessment {
            location: format!("{lat:.4}, {lon:.4}"),
            latitude: lat,
            longitude: lon,
            radius_km,
            risk_score: round_to(raw, 1),
            risk_level: RiskLevel::from_score(raw),
            total_events: nearby.len(),
            events_last_24h: m.events_24h,
            events_last_7d: m.events_7d,
            total_severity_sum: m.severity_sum,
            weighted_severity: round_to(m.weighted_severity, 2),
            event_type_counts: m.type_counts,
            most_recent_event: m.most_recent,
            analysis_start,
            analysis_end: now,
        }
    }

    fn metrics(&self, incidents: &[&Incident], now: DateTime<Utc>) -> Metrics {
        let cutoff_24h = now - Duration::hours(self.cfg.recent_hours);
        let cutoff_7d = now - Duration::hours(self.cfg.week_hours);
        let mut m = Metrics::default();

        for inc in incidents {
            m.most_recent = Some(match m.most_recent {
                Some(t) if t >= inc.timestamp => t,
                _ => inc.timestamp,
            });

            let time_weight = if inc.timestamp >= cutoff_24h {
                m.events_24h += 1;
                self.cfg.weight_last_24h
            } else if inc.timestamp >= cutoff_7d {
                m.events_7d += 1;
                self.cfg.weight_last_week
            } else {
                self.cfg.weight_older
            };

            m.severity_sum += inc.severity_score;
            m.weighted_severity +=
                inc.severity_score as f64 * time_weight * event_weight(inc.event_type);
            *m.type_counts
                .entry(inc.event_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        // The weekly count includes the last day.
        m.events_7d += m.events_24h;
        m
    }

    fn score(&self, m: &Metrics, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let n = total as f64;
        let event_score =
            ((1.0 + n / self.cfg.events_for_base_score).log2() * 2.0).min(self.cfg.max_base_score);
        let severity_score =
            ((m.weighted_severity / n) / 5.0 * 2.0).min(self.cfg.max_severity_score);
        let recency_score = if m.events_24h > 0 {
            ((1.0 + m.events_24h as f64).log2() * 1.5).min(self.cfg.max_recency_score)
        } else if m.events_7d > 0 {
            ((1.0 + m.events_7d as f64).log2() * 0.5).min(self.cfg.max_recency_score / 2.0)
        } else {
            0.0
        };
        (event_score + severity_score + recency_score).clamp(0.0, 10.0)
    }

    /// Human-readable block describing an assessment (Markdown).
    pub fn risk_summary(&self, a: &RiskAssessment, location_name: Option<&str>) -> String {
        self.risk_summary_at(a, location_name, Utc::now())
    }

    pub fn risk_summary_at(
        &self,
        a: &RiskAssessment,
        location_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let location = location_name.unwrap_or(&a.location);
        let mut parts = vec![
            format!("🛡️ **Risk Assessment for {location}**"),
            String::new(),
            format!(
                "**Risk Level:** {} ({:.1}/10)",
                a.risk_level.as_str().to_uppercase(),
                a.risk_score
            ),
            format!("The area is currently {}.", a.risk_level.description()),
            String::new(),
        ];

        if a.total_events == 0 {
            parts.push("No incidents recorded in the specified area and time window.".to_string());
            return parts.join("\n");
        }

        parts.push(format!(
            "**Incident Summary (last {} days):**",
            self.cfg.analysis_days
        ));
        parts.push(format!("• Total incidents: {}", a.total_events));
        if a.events_last_24h > 0 {
            parts.push(format!("• ⚠️ Last 24 hours: {} incidents", a.events_last_24h));
        }
        if a.events_last_7d > 0 {
            parts.push(format!("• Last 7 days: {} incidents", a.events_last_7d));
        }
        if !a.event_type_counts.is_empty() {
            let types: Vec<String> = a
                .event_type_counts
                .iter()
                .map(|(t, c)| format!("{}: {c}", title_case(&t.replace('_', " "))))
                .collect();
            parts.push(format!("• Types: {}", types.join(", ")));
        }
        if let Some(recent) = a.most_recent_event {
            parts.push(format!("• Most recent incident: {}", time_ago(now - recent)));
        }
        parts.join("\n")
    }
}

fn time_ago(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86_400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86_400)
    }
}

/// Upper-case the first letter of every whitespace-separated word.
pub fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}
