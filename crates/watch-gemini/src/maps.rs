use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use watch_core::{
    errors::Error,
    ports::{GeocodingBackend, Place},
    Result,
};

use crate::{ensure_success, http_client};

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const TEXT_SEARCH_URL: &str = "https://maps.googleapis.com/maps/api/place/textsearch/json";
const REGION: &str = "il";
const LANGUAGE: &str = "en";

#[derive(Clone, Debug)]
pub struct GoogleMapsClient {
    api_key: String,
    http: reqwest::Client,
}

impl GoogleMapsClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            http: http_client(timeout)?,
        })
    }

    async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Vec<Place>> {
        let resp = self
            .http
            .get(url)
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Error::External(format!("maps request error: {e}")))?;
        let body: MapsResponse = ensure_success("maps", resp)
            .await?
            .json()
            .await
            .map_err(|e| Error::External(format!("maps json error: {e}")))?;
        into_places(body)
    }
}

#[derive(Deserialize)]
struct MapsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<MapsResult>,
}

#[derive(Deserialize)]
struct MapsResult {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    formatted_address: String,
    geometry: Geometry,
}

#[derive(Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

fn into_places(body: MapsResponse) -> Result<Vec<Place>> {
    match body.status.as_str() {
        "OK" => Ok(body
            .results
            .into_iter()
            .map(|r| Place {
                name: r.name,
                formatted_address: r.formatted_address,
                latitude: r.geometry.location.lat,
                longitude: r.geometry.location.lng,
            })
            .collect()),
        "ZERO_RESULTS" => Ok(Vec::new()),
        other => Err(Error::External(format!(
            "maps status {other}: {}",
            body.error_message.as_deref().unwrap_or("no message")
        ))),
    }
}

#[async_trait]
impl GeocodingBackend for GoogleMapsClient {
    async fn geocode(&self, address: &str) -> Result<Vec<Place>> {
        debug!(address, "maps geocode");
        self.get(
            GEOCODE_URL,
            &[("address", address), ("region", REGION), ("language", LANGUAGE)],
        )
        .await
    }

    async fn text_search(&self, query: &str) -> Result<Vec<Place>> {
        debug!(query, "maps text search");
        self.get(TEXT_SEARCH_URL, &[("query", query), ("region", REGION)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Vec<Place>> {
        into_places(serde_json::from_str(raw).unwrap())
    }

    #[test]
    fn parses_geocoding_results() {
        let places = parse(
            r#"{
                "status": "OK",
                "results": [{
                    "formatted_address": "Herzl St, Lod, Israel",
                    "geometry": { "location": { "lat": 31.95, "lng": 34.89 }, "location_type": "ROOFTOP" },
                    "place_id": "abc"
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(
            places,
            vec![Place {
                name: None,
                formatted_address: "Herzl St, Lod, Israel".into(),
                latitude: 31.95,
                longitude: 34.89,
            }]
        );
    }

    #[test]
    fn text_search_keeps_place_names() {
        let places = parse(
            r#"{"status":"OK","results":[{"name":"Old Bakery","formatted_address":"Umm al-Fahm","geometry":{"location":{"lat":32.51,"lng":35.15}}}]}"#,
        )
        .unwrap();
        assert_eq!(places[0].name.as_deref(), Some("Old Bakery"));
    }

    #[test]
    fn zero_results_is_empty_and_denials_are_errors() {
        assert!(parse(r#"{"status":"ZERO_RESULTS","results":[]}"#)
            .unwrap()
            .is_empty());
        let err = parse(r#"{"status":"REQUEST_DENIED","error_message":"bad key"}"#).unwrap_err();
        assert_eq!(err.to_string(), "external error: maps status REQUEST_DENIED: bad key");
    }
}
