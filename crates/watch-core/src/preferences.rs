//! Per-user location preferences used to personalise `/news`.
//!
//! Persisted as one pretty-printed JSON object keyed by the decimal user id.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    domain::UserId,
    errors::Error,
    pipeline::{llm_json, prompts::render},
    ports::LanguageModel,
    schemas::Incident,
    Result,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: i64,
    #[serde(default)]
    pub preferred_cities: Vec<String>,
    #[serde(default)]
    pub preferred_streets: Vec<String>,
    #[serde(default)]
    pub preferred_neighborhoods: Vec<String>,
}

impl UserPreferences {
    pub fn empty(user: UserId) -> Self {
        Self {
            user_id: user.0,
            ..Default::default()
        }
    }

    pub fn has_preferences(&self) -> bool {
        !(self.preferred_cities.is_empty()
            && self.preferred_streets.is_empty()
            && self.preferred_neighborhoods.is_empty())
    }

    /// Whether an incident falls in one of the preferred places.
    ///
    /// Matching is case-insensitive substring in either direction; incidents
    /// without a known city never match.
    pub fn matches(&self, incident: &Incident) -> bool {
        let city = incident.city.trim().to_lowercase();
        if city.is_empty() || city == "unknown" || city == "לא ידוע" {
            return false;
        }
        any_overlap(&self.preferred_cities, &city)
            || any_overlap(&self.preferred_streets, &incident.street.trim().to_lowercase())
            || any_overlap(
                &self.preferred_neighborhoods,
                &incident.neighborhood.trim().to_lowercase(),
            )
    }

    pub fn street_matches(&self, street: &str) -> bool {
        let street = street.trim().to_lowercase();
        if street == "unknown" || street == "לא ידוע" {
            return false;
        }
        any_overlap(&self.preferred_streets, &street)
    }
}

fn any_overlap(prefs: &[String], value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    prefs.iter().any(|p| {
        let p = p.to_lowercase();
        p.contains(value) || value.contains(&p)
    })
}

/// Places pulled out of a free-text reply.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreferenceUpdate {
    pub cities: Vec<String>,
    pub streets: Vec<String>,
    pub neighborhoods: Vec<String>,
}

impl PreferenceUpdate {
    pub fn is_empty(&self) -> bool {
        self.cities.is_empty() && self.streets.is_empty() && self.neighborhoods.is_empty()
    }
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub struct PreferencesStore {
    path: PathBuf,
    cache: Mutex<HashMap<i64, UserPreferences>>,
}

impl PreferencesStore {
    /// Load from `path`. A missing file is an empty store; an unreadable one is
    /// logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = match load(&path) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), "failed to load preferences: {e}");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), users = cache.len(), "preferences loaded");
        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cache(&self) -> Result<MutexGuard<'_, HashMap<i64, UserPreferences>>> {
        self.cache
            .lock()
            .map_err(|_| Error::Storage("preferences lock poisoned".to_string()))
    }

    pub fn get(&self, user: UserId) -> Result<UserPreferences> {
        Ok(self
            .cache()?
            .get(&user.0)
            .cloned()
            .unwrap_or_else(|| UserPreferences::empty(user)))
    }

    /// Replace the lists that are `Some`, trimming and dropping blanks.
    pub fn set(
        &self,
        user: UserId,
        cities: Option<Vec<String>>,
        streets: Option<Vec<String>>,
        neighborhoods: Option<Vec<String>>,
    ) -> Result<UserPreferences> {
        let mut cache = self.cache()?;
        let prefs = cache
            .entry(user.0)
            .or_insert_with(|| UserPreferences::empty(user));
        if let Some(c) = cities {
            prefs.preferred_cities = clean(c);
        }
        if let Some(s) = streets {
            prefs.preferred_streets = clean(s);
        }
        if let Some(n) = neighborhoods {
            prefs.preferred_neighborhoods = clean(n);
        }
        let updated = prefs.clone();
        save(&self.path, &cache)?;
        Ok(updated)
    }

    pub fn apply(&self, user: UserId, update: PreferenceUpdate) -> Result<UserPreferences> {
        self.set(
            user,
            Some(update.cities),
            Some(update.streets),
            Some(update.neighborhoods),
        )
    }

    pub fn clear(&self, user: UserId) -> Result<()> {
        let mut cache = self.cache()?;
        if let Some(prefs) = cache.get_mut(&user.0) {
            *prefs = UserPreferences::empty(user);
            save(&self.path, &cache)?;
        }
        Ok(())
    }

    /// All incidents when the user has no preferences, else only matching ones.
    pub fn filter_incidents(&self, user: UserId, incidents: Vec<Incident>) -> Result<Vec<Incident>> {
        let prefs = self.get(user)?;
        if !prefs.has_preferences() {
            return Ok(incidents);
        }
        Ok(incidents.into_iter().filter(|i| prefs.matches(i)).collect())
    }
}

fn load(path: &Path) -> Result<HashMap<i64, UserPreferences>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let raw: HashMap<String, UserPreferences> = serde_json::from_str(&txt)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| k.parse::<i64>().ok().map(|id| (id, v)))
        .collect())
}

fn save(path: &Path, cache: &HashMap<i64, UserPreferences>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut ids: Vec<&i64> = cache.keys().collect();
    ids.sort();
    let mut data = serde_json::Map::new();
    for id in ids {
        data.insert(id.to_string(), serde_json::to_value(&cache[id])?);
    }
    let txt = serde_json::to_string_pretty(&data)?;
    std::fs::write(path, txt)?;
    Ok(())
}

/// First `limit` incidents, preferred-street matches first, then by severity.
pub fn rank_for_news<'a>(
    prefs: &UserPreferences,
    incidents: &'a [Incident],
    limit: usize,
) -> Vec<&'a Incident> {
    let mut out: Vec<&Incident> = incidents.iter().take(limit).collect();
    out.sort_by_key(|i| (!prefs.street_matches(&i.street), -i.severity_score));
    out
}

/// `a, b` or `None`.
pub fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

const EXTRACT_PREFERENCES: &str = r#"You are a helpful assistant extracting location preferences from user messages.

The user wants to set up preferences for monitoring safety news. Extract cities, streets, and neighborhoods from their message.

USER MESSAGE: {user_input}

Extract locations mentioned. Return ONLY a JSON object with this structure:
{
    "cities": ["תל אביב", "ירושלים"],
    "streets": ["רחוב הרצל", "שדרות רוטשילד"],
    "neighborhoods": ["שכונת התקווה", "עיר עתיקה"]
}

**Guidelines:**
- Extract city names in Hebrew when possible (תל אביב, ירושלים, חיפה, etc.)
- Extract street names as mentioned (רחוב הרצל, שדרות רוטשילד, etc.)
- Extract neighborhood names if mentioned
- If a street is mentioned with a city (e.g., "רחוב הרצל בתל אביב"), extract both
- Return empty arrays [] if nothing found in that category
- Be flexible with language - accept Hebrew, English, or mixed

**Common Israeli cities:** תל אביב, ירושלים, חיפה, באר שבע, נתניה, אשדוד, ראשון לציון, פתח תקווה, נצרת, כפר קאסם, רהט, אום אל-פחם

Return ONLY the JSON object, no additional text.
"#;

/// Ask the model which places the user named. `None` when nothing usable came back.
pub async fn extract_preferences(
    model: &dyn LanguageModel,
    user_input: &str,
    temperature: f32,
) -> Option<PreferenceUpdate> {
    let prompt = render(EXTRACT_PREFERENCES, &[("user_input", user_input)]);
    let reply = match model.generate(&prompt, temperature).await {
        Ok(r) => r,
        Err(e) => {
            warn!("preference extraction failed: {e}");
            return None;
        }
    };
    let obj = match llm_json::parse_object(&reply) {
        Ok(o) => o,
        Err(e) => {
            warn!("preference extraction returned invalid JSON: {e}");
            return None;
        }
    };
    let list = |key: &str| -> Vec<String> {
        obj.get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    let update = PreferenceUpdate {
        cities: clean(list("cities")),
        streets: clean(list("streets")),
        neighborhoods: clean(list("neighborhoods")),
    };
    (!update.is_empty()).then_some(update)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        schemas::EventType,
        testing::{incident, FakeModel},
    };

    fn at(city: &str, street: &str, severity: i64) -> Incident {
        let mut i = incident(city, EventType::Shooting, severity, 32.0, 35.0, Utc::now());
        i.city = city.to_string();
        i.street = street.to_string();
        i
    }

    #[test]
    fn persists_pretty_json_keyed_by_user() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("user_preferences.json");
        let store = PreferencesStore::open(&path);
        assert!(!store.get(UserId(5)).unwrap().has_preferences());

        store
            .set(
                UserId(5),
                Some(vec![" תל אביב ".to_string(), "  ".to_string()]),
                None,
                None,
            )
            .unwrap();
        let txt = std::fs::read_to_string(&path).unwrap();
        assert!(txt.contains("\"5\": {"));
        assert!(txt.contains("\"תל אביב\""));
        assert!(txt.contains("\n  "));

        let reopened = PreferencesStore::open(&path);
        let prefs = reopened.get(UserId(5)).unwrap();
        assert_eq!(prefs.preferred_cities, vec!["תל אביב".to_string()]);
        assert!(prefs.preferred_streets.is_empty());

        reopened.clear(UserId(5)).unwrap();
        assert!(!PreferencesStore::open(&path)
            .get(UserId(5))
            .unwrap()
            .has_preferences());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = PreferencesStore::open(&path);
        assert!(!store.get(UserId(1)).unwrap().has_preferences());
    }

    #[test]
    fn filters_by_city_street_or_neighborhood() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::open(dir.path().join("p.json"));
        let all = vec![
            at("Tel Aviv-Yafo", "", 5),
            at("Haifa", "Herzl St", 6),
            at("Unknown", "Herzl", 9),
            at("Lod", "", 4),
        ];
        assert_eq!(store.filter_incidents(UserId(1), all.clone()).unwrap().len(), 4);

        store
            .set(
                UserId(1),
                Some(vec!["tel aviv".to_string()]),
                Some(vec!["herzl".to_string()]),
                None,
            )
            .unwrap();
        let got = store.filter_incidents(UserId(1), all).unwrap();
        let cities: Vec<&str> = got.iter().map(|i| i.city.as_str()).collect();
        assert_eq!(cities, vec!["Tel Aviv-Yafo", "Haifa"]);
    }

    #[test]
    fn news_ranking_puts_street_matches_first() {
        let prefs = UserPreferences {
            user_id: 1,
            preferred_streets: vec!["הרצל".to_string()],
            ..Default::default()
        };
        let incidents = vec![at("A", "", 9), at("B", "רחוב הרצל", 3), at("C", "", 6)];
        let ranked: Vec<&str> = rank_for_news(&prefs, &incidents, 15)
            .iter()
            .map(|i| i.city.as_str())
            .collect();
        assert_eq!(ranked, vec!["B", "A", "C"]);
        assert_eq!(rank_for_news(&prefs, &incidents, 2).len(), 2);
    }

    #[tokio::test]
    async fn extracts_preferences_from_model_reply() {
        let model = FakeModel::new()
            .respond_when(
                "USER MESSAGE: Herzl",
                "```json\n{\"cities\": [\"תל אביב\"], \"streets\": [\"רחוב הרצל\", \" \"], \"neighborhoods\": []}\n```",
            )
            .respond_when("USER MESSAGE: hello", r#"{"cities": [], "streets": [], "neighborhoods": []}"#);

        let got = extract_preferences(&model, "Herzl street in Tel Aviv", 0.2)
            .await
            .unwrap();
        assert_eq!(got.cities, vec!["תל אביב".to_string()]);
        assert_eq!(got.streets, vec!["רחוב הרצל".to_string()]);
        assert!(got.neighborhoods.is_empty());

        assert!(extract_preferences(&model, "hello", 0.2).await.is_none());
        assert!(extract_preferences(&model, "unscripted", 0.2).await.is_none());
    }

    #[test]
    fn list_formatting() {
        assert_eq!(list_or_none(&[]), "None");
        assert_eq!(list_or_none(&["a".to_string(), "b".to_string()]), "a, b");
    }
}
