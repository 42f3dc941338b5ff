//! Disk-backed vector store for incidents.
//!
//! One SQLite file under the persist directory; every row belongs to a named
//! collection. The summary embedding is stored as little-endian `f32`s and
//! similarity is squared L2 distance between unit vectors (0 = identical,
//! 4 = opposite), scanned in process.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    errors::Error,
    ports::Embedder,
    risk::haversine_km,
    schemas::{EventType, Incident, NewIncident},
    Result,
};

pub const DB_FILE_NAME: &str = "incidents.sqlite3";
const RAW_TEXT_MAX_CHARS: usize = 1000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS incidents (
    incident_id     TEXT PRIMARY KEY,
    collection      TEXT NOT NULL,
    summary         TEXT NOT NULL,
    embedding       BLOB NOT NULL,
    timestamp       TEXT NOT NULL,
    ts_epoch        INTEGER NOT NULL,
    severity_score  INTEGER NOT NULL,
    event_type      TEXT NOT NULL,
    lat             REAL NOT NULL,
    lon             REAL NOT NULL,
    city            TEXT NOT NULL,
    street          TEXT NOT NULL DEFAULT '',
    neighborhood    TEXT NOT NULL DEFAULT '',
    source_channel  TEXT NOT NULL,
    message_id      INTEGER NOT NULL,
    raw_text        TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_incidents_time ON incidents(collection, ts_epoch);
CREATE INDEX IF NOT EXISTS idx_incidents_source ON incidents(collection, message_id, source_channel);
";

const COLUMNS: &str = "incident_id, summary, embedding, ts_epoch, severity_score, event_type, \
lat, lon, city, street, neighborhood, source_channel, message_id, raw_text";

/// Optional filters for [`IncidentStore::search_similar`].
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    pub min_severity: Option<i64>,
    pub event_types: Vec<EventType>,
    pub city: Option<String>,
    /// Inclusive bounds on the incident timestamp.
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Candidate for semantic de-duplication.
#[derive(Clone, Debug)]
pub struct SimilarityProbe<'a> {
    pub summary: &'a str,
    pub city: &'a str,
    pub lat: f64,
    pub lon: f64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub street: &'a str,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoreStats {
    pub total_incidents: usize,
    /// Most frequent first.
    pub incidents_by_city: Vec<(String, usize)>,
    /// Most frequent first.
    pub incidents_by_type: Vec<(String, usize)>,
    pub avg_severity: f64,
    pub max_severity: i64,
}

pub struct IncidentStore {
    conn: Mutex<Connection>,
    collection: String,
    embedder: Arc<dyn Embedder>,
    path: Option<PathBuf>,
}

impl IncidentStore {
    /// Open (or create) the store under `persist_dir`.
    pub fn open(
        persist_dir: &Path,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        std::fs::create_dir_all(persist_dir)?;
        let path = persist_dir.join(DB_FILE_NAME);
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let store = Self::with_connection(conn, collection, embedder, Some(path))?;
        info!(
            path = %persist_dir.display(),
            collection,
            incidents = store.count()?,
            "incident store ready"
        );
        Ok(store)
    }

    /// Non-persistent store, for demos and tests.
    pub fn open_in_memory(collection: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, collection, embedder, None)
    }

    fn with_connection(
        conn: Connection,
        collection: &str,
        embedder: Arc<dyn Embedder>,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
            embedder,
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("incident store lock poisoned".to_string()))
    }

    async fn embed_unit(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = self.embedder.embed(text).await?;
        normalize(&mut v);
        Ok(v)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM incidents WHERE collection = ?1",
            params![self.collection],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    /// Embed the summary and insert a new incident. Returns its id.
    pub async fn store_incident(&self, new: NewIncident) -> Result<String> {
        let embedding = self.embed_unit(&new.summary).await?;
        let incident_id = Uuid::new_v4().to_string();
        let raw_text: String = new.raw_text.chars().take(RAW_TEXT_MAX_CHARS).collect();

        self.conn()?.execute(
            "INSERT INTO incidents (incident_id, collection, summary, embedding, timestamp, \
             ts_epoch, severity_score, event_type, lat, lon, city, street, neighborhood, \
             source_channel, message_id, raw_text) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                incident_id,
                self.collection,
                new.summary,
                encode_embedding(&embedding),
                new.timestamp.to_rfc3339(),
                new.timestamp.timestamp_millis(),
                new.severity,
                new.event_type.as_str(),
                new.location.lat,
                new.location.lon,
                new.city,
                new.street,
                new.neighborhood,
                new.source_channel,
                new.message_id,
                raw_text,
            ],
        )?;
        debug!(incident_id = %incident_id, city = %new.city, "incident stored");
        Ok(incident_id)
    }

    /// Nearest incidents to `query` by embedding distance, closest first.
    pub async fn search_similar(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(Incident, f32)>> {
        let probe = self.embed_unit(query).await?;

        let mut clauses = vec!["collection = ?".to_string()];
        let mut values = vec![Value::Text(self.collection.clone())];
        if let Some(min) = filter.min_severity.filter(|m| *m > 0) {
            clauses.push("severity_score >= ?".to_string());
            values.push(Value::Integer(min));
        }
        if !filter.event_types.is_empty() {
            let marks = vec!["?"; filter.event_types.len()].join(", ");
            clauses.push(format!("event_type IN ({marks})"));
            values.extend(
                filter
                    .event_types
                    .iter()
                    .map(|t| Value::Text(t.as_str().to_string())),
            );
        }
        if let Some(city) = filter.city.as_ref().filter(|c| !c.is_empty()) {
            clauses.push("city = ?".to_string());
            values.push(Value::Text(city.clone()));
        }
        if let Some(since) = filter.since {
            clauses.push("ts_epoch >= ?".to_string());
            values.push(Value::Integer(since.timestamp_millis()));
        }
        if let Some(until) = filter.until {
            clauses.push("ts_epoch <= ?".to_string());
            values.push(Value::Integer(until.timestamp_millis()));
        }

        let rows = self.select(&clauses.join(" AND "), values)?;
        let mut scored: Vec<(Incident, f32)> = rows
            .into_iter()
            .map(|(inc, emb)| {
                let d = squared_l2(&probe, &emb);
                (inc, d)
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }

    /// Incidents within `radius_km` of a point over the last `days`, newest first.
    pub fn get_incidents_in_area(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
        days: i64,
        limit: usize,
    ) -> Result<Vec<Incident>> {
        let rows = self.select(
            "collection = ? AND ts_epoch >= ?",
            vec![
                Value::Text(self.collection.clone()),
                Value::Integer(cutoff_millis(Duration::try_days(days))),
            ],
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|(mut inc, _)| {
                let d = haversine_km(lat, lon, inc.lat, inc.lon);
                (d <= radius_km).then(|| {
                    inc.distance_km = Some((d * 100.0).round() / 100.0);
                    inc
                })
            })
            .take(limit)
            .collect())
    }

    /// Incidents from the last `hours`, newest first.
    pub fn get_incidents_by_time(
        &self,
        hours: i64,
        city: Option<&str>,
        event_types: &[EventType],
    ) -> Result<Vec<Incident>> {
        let mut clauses = vec!["collection = ?", "ts_epoch >= ?"];
        let mut values = vec![
            Value::Text(self.collection.clone()),
            Value::Integer(cutoff_millis(Duration::try_hours(hours))),
        ];
        if let Some(city) = city.filter(|c| !c.is_empty()) {
            clauses.push("city = ?");
            values.push(Value::Text(city.to_string()));
        }
        let rows = self.select(&clauses.join(" AND "), values)?;
        Ok(rows
            .into_iter()
            .map(|(inc, _)| inc)
            .filter(|inc| event_types.is_empty() || event_types.contains(&inc.event_type))
            .collect())
    }

    pub fn get_incident_by_id(&self, incident_id: &str) -> Result<Option<Incident>> {
        let mut rows = self.select(
            "collection = ? AND incident_id = ?",
            vec![
                Value::Text(self.collection.clone()),
                Value::Text(incident_id.to_string()),
            ],
        )?;
        Ok(rows.pop().map(|(inc, _)| inc))
    }

    /// Returns whether a row was removed.
    pub fn delete_incident(&self, incident_id: &str) -> Result<bool> {
        let n = self.conn()?.execute(
            "DELETE FROM incidents WHERE collection = ?1 AND incident_id = ?2",
            params![self.collection, incident_id],
        )?;
        Ok(n > 0)
    }

    pub fn get_statistics(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT city, event_type, severity_score FROM incidents WHERE collection = ?1",
        )?;
        let rows = stmt.query_map(params![self.collection], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })?;

        let mut total = 0usize;
        let mut by_city: HashMap<String, usize> = HashMap::new();
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut severities = Vec::new();
        for row in rows {
            let (city, event_type, severity) = row?;
            total += 1;
            *by_city.entry(city).or_default() += 1;
            *by_type.entry(event_type).or_default() += 1;
            if severity != 0 {
                severities.push(severity);
            }
        }

        let avg = if severities.is_empty() {
            0.0
        } else {
            let mean = severities.iter().sum::<i64>() as f64 / severities.len() as f64;
            (mean * 100.0).round() / 100.0
        };
        Ok(StoreStats {
            total_incidents: total,
            incidents_by_city: ranked(by_city),
            incidents_by_type: ranked(by_type),
            avg_severity: avg,
            max_severity: severities.iter().copied().max().unwrap_or(0),
        })
    }

    /// Whether this exact channel message was already stored.
    pub fn check_duplicate(&self, message_id: i64, source_channel: &str) -> Result<bool> {
        let n: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM incidents \
             WHERE collection = ?1 AND message_id = ?2 AND source_channel = ?3",
            params![self.collection, message_id, source_channel],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Look for the same event reported by another channel.
    ///
    /// Among the 10 nearest summaries of the same event type with a timestamp in
    /// `[ts - 6h, ts + 1h]`, a match needs embedding distance ≤ 0.4, a matching
    /// city and either a matching street or a location under 2 km away.
    pub async fn check_similar_incident(&self, p: &SimilarityProbe<'_>) -> Result<Option<String>> {
        const MAX_DISTANCE: f32 = 0.4;
        const NEAR_KM: f64 = 2.0;

        let window = SearchFilter {
            event_types: vec![p.event_type],
            since: Some(p.timestamp - Duration::hours(6)),
            until: Some(p.timestamp + Duration::hours(1)),
            ..Default::default()
        };
        let city = p.city.to_lowercase();

        let candidates = self.search_similar(p.summary, 10, &window).await?;
        for (existing, distance) in candidates {
            if distance > MAX_DISTANCE {
                continue;
            }

            let existing_city = existing.city.to_lowercase();
            let city_match = existing_city.contains(&city) || city.contains(&existing_city);
            let street_match = streets_match(p.street, &existing.street);
            let near = haversine_km(p.lat, p.lon, existing.lat, existing.lon) < NEAR_KM;

            if city_match && (street_match || near) {
                debug!(existing = %existing.incident_id, distance, "similar incident found");
                return Ok(Some(existing.incident_id));
            }
        }
        Ok(None)
    }

    fn select(&self, where_clause: &str, values: Vec<Value>) -> Result<Vec<(Incident, Vec<f32>)>> {
        let conn = self.conn()?;
        let sql =
            format!("SELECT {COLUMNS} FROM incidents WHERE {where_clause} ORDER BY ts_epoch DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Epoch millis `span` before now; an out-of-range span reaches back past every row.
fn cutoff_millis(span: Option<Duration>) -> i64 {
    span.and_then(|d| Utc::now().checked_sub_signed(d))
        .map_or(i64::MIN, |t| t.timestamp_millis())
}

fn read_row(r: &Row<'_>) -> rusqlite::Result<(Incident, Vec<f32>)> {
    let blob: Vec<u8> = r.get(2)?;
    let millis: i64 = r.get(3)?;
    let event_type: String = r.get(5)?;
    let incident = Incident {
        incident_id: r.get(0)?,
        summary: r.get(1)?,
        timestamp: DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default(),
        severity_score: r.get(4)?,
        event_type: EventType::parse_lenient(&event_type),
        lat: r.get(6)?,
        lon: r.get(7)?,
        city: r.get(8)?,
        street: r.get(9)?,
        neighborhood: r.get(10)?,
        source_channel: r.get(11)?,
        message_id: r.get(12)?,
        raw_text: r.get(13)?,
        distance_km: None,
    };
    Ok((incident, decode_embedding(&blob)))
}

/// Street comparison used by de-duplication: missing information never rules a match out.
fn streets_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
    if a.is_empty() || b.is_empty() {
        return true;
    }
    a.contains(&b) || b.contains(&a)
}

fn ranked(counts: HashMap<String, usize>) -> Vec<(String, usize)> {
    let mut v: Vec<(String, usize)> = counts.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::Coordinates,
        testing::{new_incident, FakeEmbedder},
    };

    fn store() -> IncidentStore {
        IncidentStore::open_in_memory("test", Arc::new(FakeEmbedder)).unwrap()
    }

    #[test]
    fn embedding_blob_layout() {
        let v = vec![1.0f32, -0.5, 0.25];
        let bytes = encode_embedding(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_embedding(&bytes), v);
    }

    #[test]
    fn distance_of_unit_vectors() {
        let mut a = vec![3.0, 4.0];
        normalize(&mut a);
        assert!((a[0] - 0.6).abs() < 1e-6);
        assert_eq!(squared_l2(&a, &a), 0.0);
        assert!((squared_l2(&[1.0, 0.0], &[-1.0, 0.0]) - 4.0).abs() < 1e-6);
        assert_eq!(squared_l2(&[1.0], &[1.0, 0.0]), f32::INFINITY);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let s = IncidentStore::open(dir.path(), "c", Arc::new(FakeEmbedder)).unwrap();
            s.store_incident(new_incident("Shots fired in Lod", "Lod", EventType::Shooting, 7))
                .await
                .unwrap()
        };
        assert!(dir.path().join(DB_FILE_NAME).exists());

        let s = IncidentStore::open(dir.path(), "c", Arc::new(FakeEmbedder)).unwrap();
        let inc = s.get_incident_by_id(&id).unwrap().unwrap();
        assert_eq!(inc.summary, "Shots fired in Lod");
        assert_eq!(inc.event_type, EventType::Shooting);

        // Collections are isolated.
        let other = IncidentStore::open(dir.path(), "other", Arc::new(FakeEmbedder)).unwrap();
        assert_eq!(other.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_check_and_delete() {
        let s = store();
        let mut n = new_incident("Roadblock on route 6", "Kafr Qasim", EventType::Roadblock, 4);
        n.message_id = 77;
        n.source_channel = "News".into();
        n.raw_text = "x".repeat(1500);
        let id = s.store_incident(n).await.unwrap();

        assert!(s.check_duplicate(77, "News").unwrap());
        assert!(!s.check_duplicate(77, "Other").unwrap());
        assert_eq!(
            s.get_incident_by_id(&id).unwrap().unwrap().raw_text.chars().count(),
            1000
        );

        assert!(s.delete_incident(&id).unwrap());
        assert!(!s.delete_incident(&id).unwrap());
        assert!(!s.check_duplicate(77, "News").unwrap());
    }

    #[tokio::test]
    async fn search_orders_by_distance_and_filters() {
        let s = store();
        s.store_incident(new_incident("shooting near market in lod", "Lod", EventType::Shooting, 8))
            .await
            .unwrap();
        s.store_incident(new_incident("car accident on highway", "Haifa", EventType::Accident, 3))
            .await
            .unwrap();

        let hits = s
            .search_similar("shooting in lod", 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.city, "Lod");
        assert!(hits[0].1 < hits[1].1);

        let filter = SearchFilter {
            min_severity: Some(5),
            ..Default::default()
        };
        let hits = s.search_similar("accident", 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.city, "Lod");

        let filter = SearchFilter {
            event_types: vec![EventType::Accident],
            city: Some("Haifa".into()),
            ..Default::default()
        };
        let hits = s.search_similar("anything", 1, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.event_type, EventType::Accident);
    }

    #[tokio::test]
    async fn area_and_time_queries() {
        let s = store();
        let now = Utc::now();

        let mut recent = new_incident("recent lod event", "Lod", EventType::Brawl, 5);
        recent.timestamp = now - Duration::hours(2);
        let mut older = new_incident("older lod event", "Lod", EventType::Shooting, 7);
        older.timestamp = now - Duration::days(3);
        let mut far = new_incident("haifa event", "Haifa", EventType::Arson, 6);
        far.location = Coordinates::new(32.794, 34.9896);
        far.timestamp = now - Duration::hours(1);
        let mut stale = new_incident("stale lod event", "Lod", EventType::Brawl, 5);
        stale.timestamp = now - Duration::days(45);
        for n in [recent, older, far, stale] {
            s.store_incident(n).await.unwrap();
        }

        let area = s
            .get_incidents_in_area(31.9514, 34.8917, 2.0, 30, 50)
            .unwrap();
        assert_eq!(area.len(), 2);
        assert_eq!(area[0].summary, "recent lod event");
        assert_eq!(area[0].distance_km, Some(0.0));

        let last_day = s.get_incidents_by_time(24, None, &[]).unwrap();
        let summaries: Vec<_> = last_day.iter().map(|i| i.summary.as_str()).collect();
        assert_eq!(summaries, vec!["haifa event", "recent lod event"]);

        let lod_week = s
            .get_incidents_by_time(24 * 7, Some("Lod"), &[EventType::Shooting])
            .unwrap();
        assert_eq!(lod_week.len(), 1);
        assert_eq!(lod_week[0].summary, "older lod event");

        // Spans past the calendar's range return everything instead of failing.
        assert_eq!(s.get_incidents_by_time(i64::MAX, None, &[]).unwrap().len(), 4);
        assert_eq!(s.get_incidents_by_time(999_999_999 * 24, None, &[]).unwrap().len(), 4);
        let all_lod = s
            .get_incidents_in_area(31.9514, 34.8917, 2.0, i64::MAX, 50)
            .unwrap();
        assert_eq!(all_lod.len(), 3);
    }

    #[tokio::test]
    async fn statistics() {
        let s = store();
        for (city, t, sev) in [
            ("Lod", EventType::Shooting, 8),
            ("Lod", EventType::Brawl, 4),
            ("Haifa", EventType::Shooting, 0),
        ] {
            s.store_incident(new_incident("x", city, t, sev)).await.unwrap();
        }
        let st = s.get_statistics().unwrap();
        assert_eq!(st.total_incidents, 3);
        assert_eq!(st.incidents_by_city[0], ("Lod".to_string(), 2));
        assert_eq!(st.incidents_by_type[0], ("shooting".to_string(), 2));
        // Zero severities are left out of the average.
        assert_eq!(st.avg_severity, 6.0);
        assert_eq!(st.max_severity, 8);
    }

    #[tokio::test]
    async fn similar_incident_rules() {
        let s = store();
        let now = Utc::now();
        let mut first = new_incident("shots fired herzl street lod", "Lod", EventType::Shooting, 8);
        first.street = "Herzl".into();
        first.timestamp = now - Duration::hours(2);
        let id = s.store_incident(first).await.unwrap();

        let probe = SimilarityProbe {
            summary: "shots fired herzl street lod",
            city: "lod",
            lat: 31.9514,
            lon: 34.8917,
            event_type: EventType::Shooting,
            timestamp: now,
            street: "herzl st",
        };
        assert_eq!(s.check_similar_incident(&probe).await.unwrap(), Some(id.clone()));

        // Different type.
        let p = SimilarityProbe {
            event_type: EventType::Stabbing,
            ..probe.clone()
        };
        assert_eq!(s.check_similar_incident(&p).await.unwrap(), None);

        // Outside the time window.
        let p = SimilarityProbe {
            timestamp: now + Duration::hours(10),
            ..probe.clone()
        };
        assert_eq!(s.check_similar_incident(&p).await.unwrap(), None);

        // Different street, but close enough.
        let p = SimilarityProbe {
            street: "Jabotinsky",
            ..probe.clone()
        };
        assert_eq!(s.check_similar_incident(&p).await.unwrap(), Some(id));

        // Different street and far away.
        let p = SimilarityProbe {
            street: "Jabotinsky",
            lat: 32.2,
            ..probe.clone()
        };
        assert_eq!(s.check_similar_incident(&p).await.unwrap(), None);

        // Different city.
        let p = SimilarityProbe {
            city: "Haifa",
            ..probe
        };
        assert_eq!(s.check_similar_incident(&p).await.unwrap(), None);
    }

    #[tokio::test]
    async fn similar_incident_ignores_closer_matches_outside_the_window() {
        let s = store();
        let now = Utc::now();
        for _ in 0..12 {
            let mut old = new_incident("shots fired near the market", "Lod", EventType::Shooting, 6);
            old.timestamp = now - Duration::days(3);
            s.store_incident(old).await.unwrap();
        }
        let mut recent =
            new_incident("shots fired near the market today", "Lod", EventType::Shooting, 6);
        recent.timestamp = now - Duration::hours(1);
        let id = s.store_incident(recent).await.unwrap();

        let probe = SimilarityProbe {
            summary: "shots fired near the market",
            city: "Lod",
            lat: 31.9514,
            lon: 34.8917,
            event_type: EventType::Shooting,
            timestamp: now,
            street: "",
        };
        assert_eq!(s.check_similar_incident(&probe).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn search_honours_time_bounds() {
        let s = store();
        let now = Utc::now();
        let mut old = new_incident("old brawl", "Lod", EventType::Brawl, 4);
        old.timestamp = now - Duration::days(2);
        s.store_incident(old).await.unwrap();
        s.store_incident(new_incident("new brawl", "Lod", EventType::Brawl, 4))
            .await
            .unwrap();

        let filter = SearchFilter {
            since: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        let hits = s.search_similar("brawl", 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.summary, "new brawl");

        let filter = SearchFilter {
            until: Some(now - Duration::days(1)),
            ..Default::default()
        };
        let hits = s.search_similar("brawl", 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.summary, "old brawl");
    }

    #[test]
    fn street_matching() {
        assert!(streets_match("", "Herzl"));
        assert!(streets_match("Herzl St", "herzl"));
        assert!(!streets_match("Herzl", "Jabotinsky"));
    }
}
