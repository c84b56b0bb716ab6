use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::surface::Coordinate;

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Qualifier appended to addresses that do not name the city already.
pub const CITY_QUALIFIER: &str = "Amsterdam, Netherlands";

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Google Maps API key not configured")]
    MissingApiKey,

    #[error("Geocoding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid geocoding URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Geocoding returned status {0}")]
    Status(String),
}

/// Resolves a free-text address to a coordinate.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Coordinate, GeocodeError>;
}

/// Build the lookup query for an address, adding the city when it is missing.
pub fn search_query(address: &str) -> String {
    if address.to_lowercase().contains("amsterdam") {
        address.to_string()
    } else {
        format!("{}, {}", address, CITY_QUALIFIER)
    }
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

/// Geocoder backed by the Google Geocoding web service.
pub struct GoogleGeocoder {
    api_key: String,
    client: reqwest::Client,
}

impl GoogleGeocoder {
    pub fn new(api_key: Option<&str>) -> Result<Self, GeocodeError> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(GeocodeError::MissingApiKey)?;

        Ok(Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, query: &str) -> Result<Coordinate, GeocodeError> {
        let url = Url::parse_with_params(
            GEOCODE_URL,
            &[("address", query), ("key", self.api_key.as_str())],
        )?;

        debug!("Geocoding address: {}", query);
        let response: GeocodeResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_response(response)
    }
}

fn parse_response(response: GeocodeResponse) -> Result<Coordinate, GeocodeError> {
    if response.status != "OK" {
        return Err(GeocodeError::Status(response.status));
    }
    response
        .results
        .into_iter()
        .next()
        .map(|r| Coordinate {
            lat: r.geometry.location.lat,
            lng: r.geometry.location.lng,
        })
        .ok_or_else(|| GeocodeError::Status("ZERO_RESULTS".to_string()))
}
