//! Text-search geocoding biased towards a police district.
//!
//! Uses the Places "find place from text" endpoint. A district name selects
//! a bias point from [`crate::districts`]; unknown districts fall back to an
//! unbiased query with a warning.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GeocodingConfig;
use crate::districts::bias_point;
use crate::models::Coordinates;
use crate::traits::Geocoder;

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Option<Coordinates>,
}

impl PlacesResponse {
    fn best_location(&self) -> Option<Coordinates> {
        if self.status != "OK" {
            return None;
        }
        self.candidates
            .first()
            .and_then(|c| c.geometry.as_ref())
            .and_then(|g| g.location)
    }
}

pub struct PlacesGeocoder {
    client: reqwest::Client,
    endpoint: String,
    language: String,
    api_key: String,
}

impl PlacesGeocoder {
    pub fn new(config: &GeocodingConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            language: config.language.clone(),
            api_key: api_key.into(),
        })
    }

    /// Build from config, reading `GOOGLE_PLACES_API_KEY` from the environment.
    pub fn from_env(config: &GeocodingConfig) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_PLACES_API_KEY")
            .map_err(|_| anyhow::anyhow!("GOOGLE_PLACES_API_KEY environment variable not set"))?;
        Self::new(config, api_key)
    }

    fn query_params(&self, district: &str, text: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("inputtype", "textquery".to_string()),
            ("fields", "geometry".to_string()),
            ("language", self.language.clone()),
        ];
        match bias_point(district) {
            Some(point) => params.push(("locationbias", point.to_param())),
            None => {
                tracing::warn!(%district, "no bias point for district, using no bias");
            }
        }
        params.push(("key", self.api_key.clone()));
        params.push(("input", text.to_string()));
        params
    }
}

#[async_trait]
impl Geocoder for PlacesGeocoder {
    async fn locate(&self, district: &str, query: &str) -> Result<Option<Coordinates>> {
        let params = self.query_params(district, query);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .context("place lookup request failed")?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, %query, "place lookup returned an error status");
            return Ok(None);
        }

        let body: PlacesResponse = response
            .json()
            .await
            .context("Invalid place lookup response")?;

        let location = body.best_location();
        if location.is_none() {
            tracing::warn!(
                status = %body.status,
                error = body.error_message.as_deref().unwrap_or(""),
                %query,
                %district,
                "place lookup gave no usable candidate"
            );
        }
        Ok(location)
    }
}

/// CLI entry point for `blip geocode`: one lookup, printed.
pub async fn run_geocode(config: &crate::config::Config, district: &str, text: &str) -> Result<()> {
    let geocoder = PlacesGeocoder::from_env(&config.geocoding)?;

    println!("district: {}", district);
    match bias_point(district) {
        Some(point) => println!("bias: {}", point.to_param()),
        None => println!("bias: none (unknown district)"),
    }

    match geocoder.locate(district, text).await? {
        Some(c) => println!("result: {}, {}", c.lat, c.lng),
        None => println!("result: no match"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoder() -> PlacesGeocoder {
        PlacesGeocoder::new(&GeocodingConfig::default(), "test-key").unwrap()
    }

    #[test]
    fn test_params_include_bias_for_known_district() {
        let params = geocoder().query_params("Oslo Politidistrikt", "Karl Johans gate, Oslo");
        let bias = params.iter().find(|(k, _)| *k == "locationbias").unwrap();
        assert_eq!(bias.1, "point:59.9138688,10.75224541");
        let input = params.iter().find(|(k, _)| *k == "input").unwrap();
        assert_eq!(input.1, "Karl Johans gate, Oslo");
    }

    #[test]
    fn test_params_omit_bias_for_unknown_district() {
        let params = geocoder().query_params("Nowhere", "Somewhere");
        assert!(params.iter().all(|(k, _)| *k != "locationbias"));
        assert!(params.iter().any(|(k, v)| *k == "language" && v == "no"));
    }

    #[test]
    fn test_best_location() {
        let ok: PlacesResponse = serde_json::from_value(serde_json::json!({
            "status": "OK",
            "candidates": [{"geometry": {"location": {"lat": 63.4, "lng": 10.3}}}]
        }))
        .unwrap();
        assert_eq!(ok.best_location(), Some(Coordinates { lat: 63.4, lng: 10.3 }));

        let zero: PlacesResponse = serde_json::from_value(serde_json::json!({
            "status": "ZERO_RESULTS",
            "candidates": []
        }))
        .unwrap();
        assert_eq!(zero.best_location(), None);

        let no_geometry: PlacesResponse = serde_json::from_value(serde_json::json!({
            "status": "OK",
            "candidates": [{}]
        }))
        .unwrap();
        assert_eq!(no_geometry.best_location(), None);
    }
}
