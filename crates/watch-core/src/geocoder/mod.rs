//! Multi-strategy location resolution.
//!
//! Free-text locations from Israeli news channels are often landmarks or
//! village names without street addresses, so resolution falls through:
//! Google Geocoding → Geocoding of the city alone → Places text search →
//! the built-in known-locations table → a substring scan → a fixed default.

pub mod known_locations;

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    ports::{GeocodingBackend, Place},
    risk::title_case,
    schemas::GeocodedLocation,
};

use known_locations::KNOWN_LOCATIONS;

pub const METHOD_GOOGLE_GEOCODING: &str = "google_geocoding";
pub const METHOD_GOOGLE_PLACES: &str = "google_places";
pub const METHOD_KNOWN: &str = "known_locations";
pub const METHOD_KNOWN_PARTIAL: &str = "known_locations_partial";
pub const METHOD_TEXT_EXTRACTION: &str = "text_extraction_fallback";
pub const METHOD_QUERY_EXTRACTION: &str = "query_extraction";
pub const METHOD_DEFAULT: &str = "default_fallback";

/// Rough bounding box for results we accept from remote services.
fn in_israel(lat: f64, lon: f64) -> bool {
    (29.0..=34.0).contains(&lat) && (34.0..=36.0).contains(&lon)
}

pub struct Geocoder {
    backend: Option<Arc<dyn GeocodingBackend>>,
    cache: Mutex<HashMap<String, GeocodedLocation>>,
}

impl Geocoder {
    /// Without a backend only the offline strategies run.
    pub fn new(backend: Option<Arc<dyn GeocodingBackend>>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn offline() -> Self {
        Self::new(None)
    }

    pub async fn geocode(&self, description: &str, city: Option<&str>) -> GeocodedLocation {
        let description = description.trim();
        let city = city.map(str::trim).filter(|c| !c.is_empty());

        let key = format!("{description}|{}", city.unwrap_or_default()).to_lowercase();
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!(key = %key, "geocode cache hit");
            return hit.clone();
        }

        let mut result = match &self.backend {
            Some(backend) => self.try_remote(backend.as_ref(), description, city).await,
            None => None,
        };

        if result.is_none() {
            result = self.try_known_chain(description, city);
        }
        let result = result.unwrap_or_else(|| extract_and_fallback(description));

        debug!(
            description,
            city = city.unwrap_or(""),
            method = %result.method,
            lat = result.latitude,
            lon = result.longitude,
            "geocoded"
        );
        self.cache.lock().await.insert(key, result.clone());
        result
    }

    /// Resolve the location named in a user's question.
    pub async fn geocode_query(&self, query: &str) -> GeocodedLocation {
        let lower = query.to_lowercase();
        if let Some((name, lat, lon)) = KNOWN_LOCATIONS
            .iter()
            .find(|(name, _, _)| lower.contains(name))
        {
            return GeocodedLocation {
                latitude: *lat,
                longitude: *lon,
                formatted_address: title_case(name),
                method: METHOD_QUERY_EXTRACTION.to_string(),
                confidence: 0.7,
                success: true,
            };
        }
        self.geocode(query, None).await
    }

    async fn try_remote(
        &self,
        backend: &dyn GeocodingBackend,
        description: &str,
        city: Option<&str>,
    ) -> Option<GeocodedLocation> {
        if let Some(hit) = google_geocode(backend, description, city).await {
            return Some(hit);
        }
        if let Some(city) = city {
            if let Some(hit) = google_geocode(backend, city, None).await {
                return Some(hit);
            }
        }
        google_places(backend, description, city).await
    }

    fn try_known_chain(&self, description: &str, city: Option<&str>) -> Option<GeocodedLocation> {
        let mut candidates = Vec::new();
        if let Some(city) = city.filter(|_| !description.is_empty()) {
            candidates.push(format!("{description} {city}"));
        }
        if let Some(city) = city {
            candidates.push(city.to_string());
        }
        if !description.is_empty() {
            candidates.push(description.to_string());
        }
        candidates.iter().find_map(|c| known_location(c))
    }
}

async fn google_geocode(
    backend: &dyn GeocodingBackend,
    query: &str,
    city: Option<&str>,
) -> Option<GeocodedLocation> {
    let mut search = query.to_string();
    if let Some(city) = city {
        if !query.to_lowercase().contains(&city.to_lowercase()) {
            search = format!("{query}, {city}");
        }
    }
    if !search.to_lowercase().contains("israel") && !search.contains("ישראל") {
        search.push_str(", Israel");
    }

    match backend.geocode(&search).await {
        Ok(places) => places
            .into_iter()
            .next()
            .filter(|p| in_israel(p.latitude, p.longitude))
            .map(|p| GeocodedLocation {
                latitude: p.latitude,
                longitude: p.longitude,
                formatted_address: p.formatted_address,
                method: METHOD_GOOGLE_GEOCODING.to_string(),
                confidence: 0.9,
                success: true,
            }),
        Err(e) => {
            warn!(query = %search, "geocoding request failed: {e}");
            None
        }
    }
}

async fn google_places(
    backend: &dyn GeocodingBackend,
    landmark: &str,
    city: Option<&str>,
) -> Option<GeocodedLocation> {
    let search = match city {
        Some(city) => format!("{landmark} in {city}"),
        None => landmark.to_string(),
    };
    match backend.text_search(&search).await {
        Ok(places) => places
            .into_iter()
            .next()
            .filter(|p| in_israel(p.latitude, p.longitude))
            .map(|p: Place| {
                let formatted_address = match p.name.as_deref().filter(|n| !n.is_empty()) {
                    Some(name) => format!("{name}, {}", p.formatted_address),
                    None => p.formatted_address.clone(),
                };
                GeocodedLocation {
                    latitude: p.latitude,
                    longitude: p.longitude,
                    formatted_address,
                    method: METHOD_GOOGLE_PLACES.to_string(),
                    confidence: 0.85,
                    success: true,
                }
            }),
        Err(e) => {
            warn!(query = %search, "places search failed: {e}");
            None
        }
    }
}

/// Exact table match (0.7), else the first entry that contains or is contained in the input (0.6).
fn known_location(input: &str) -> Option<GeocodedLocation> {
    let lower = input.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if let Some((lat, lon)) = known_locations::lookup(&lower) {
        return Some(GeocodedLocation {
            latitude: lat,
            longitude: lon,
            formatted_address: title_case(input.trim()),
            method: METHOD_KNOWN.to_string(),
            confidence: 0.7,
            success: true,
        });
    }
    KNOWN_LOCATIONS
        .iter()
        .find(|(name, _, _)| lower.contains(name) || name.contains(lower.as_str()))
        .map(|(name, lat, lon)| GeocodedLocation {
            latitude: *lat,
            longitude: *lon,
            formatted_address: title_case(name),
            method: METHOD_KNOWN_PARTIAL.to_string(),
            confidence: 0.6,
            success: true,
        })
}

fn extract_and_fallback(text: &str) -> GeocodedLocation {
    let lower = text.to_lowercase();
    if let Some((name, lat, lon)) = KNOWN_LOCATIONS
        .iter()
        .find(|(name, _, _)| lower.contains(name))
    {
        return GeocodedLocation {
            latitude: *lat,
            longitude: *lon,
            formatted_address: format!("{} (approximate)", title_case(name)),
            method: METHOD_TEXT_EXTRACTION.to_string(),
            confidence: 0.4,
            success: true,
        };
    }
    GeocodedLocation {
        latitude: 32.0,
        longitude: 35.0,
        formatted_address: "Israel (location unknown)".to_string(),
        method: METHOD_DEFAULT.to_string(),
        confidence: 0.1,
        success: false,
    }
}
