use chrono::NaiveDate;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    cache::TtlCache,
    location::{search_term, select_best, Coordinates, LocationQuery, Place, ResolvedLocation},
    params,
};
use crate::{
    config::WeatherConfig,
    error::{Error, Result},
};

/// Number of geocoding candidates fetched for re-ranking.
const GEOCODE_CANDIDATES: u32 = 5;

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct UpstreamError {
    reason: String,
}

/// Client for the Open-Meteo forecast, archive and geocoding endpoints.
///
/// Constructed explicitly and shared by reference (usually in an `Arc`) by
/// every operation handler in a process.
pub struct WeatherClient {
    http: HttpClient,
    config: WeatherConfig,
    cache: Option<TtlCache>,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        let cache = config.cache_ttl.map(TtlCache::new);
        Ok(Self {
            http,
            config,
            cache,
        })
    }

    pub fn config(&self) -> &WeatherConfig {
        &self.config
    }

    /// Raw geocoding results for `name`, in provider order.
    pub async fn search_locations(&self, name: &str, count: u32) -> Result<Vec<Place>> {
        let params = vec![
            ("name".to_string(), name.to_string()),
            ("count".to_string(), count.to_string()),
            ("language".to_string(), "en".to_string()),
            ("format".to_string(), "json".to_string()),
        ];
        let value = self.get_json(&self.config.geocoding_url, params).await?;
        let response: GeocodingResponse = serde_json::from_value(value)
            .map_err(|e| Error::Provider(format!("Unexpected geocoding response: {e}")))?;
        Ok(response.results)
    }

    /// Resolve a free-text place name to its best-ranked match.
    pub async fn geocode(&self, query: &str) -> Result<ResolvedLocation> {
        let places = self
            .search_locations(search_term(query), GEOCODE_CANDIDATES)
            .await?;
        let (place, confidence) =
            select_best(query, &places).ok_or_else(|| Error::LocationNotFound(query.to_string()))?;
        debug!(
            "Geocoded '{}' to {} ({:?})",
            query,
            place.display_name(),
            confidence
        );
        Ok(ResolvedLocation {
            name: place.display_name(),
            coordinates: Coordinates::new(place.latitude, place.longitude)?,
            confidence,
        })
    }

    pub async fn resolve(&self, query: &LocationQuery) -> Result<ResolvedLocation> {
        match query {
            LocationQuery::Named(name) => self.geocode(name).await,
            LocationQuery::Coordinates { coordinates, name } => Ok(
                ResolvedLocation::from_coordinates(*coordinates, name.as_deref()),
            ),
        }
    }

    /// Daily forecast plus a short hourly block and current conditions.
    pub async fn forecast(&self, location: &ResolvedLocation, days: u32) -> Result<Value> {
        let mut query = coordinate_params(location);
        query.extend([
            ("forecast_days".to_string(), days.to_string()),
            ("daily".to_string(), params::join(params::FORECAST_DAILY)),
            ("hourly".to_string(), params::join(params::FORECAST_HOURLY)),
            ("current".to_string(), params::join(params::CURRENT)),
        ]);
        let data = self.get_json(&self.config.forecast_url, query).await?;
        Ok(with_location(data, location))
    }

    /// Daily archive data for an inclusive date range.
    pub async fn archive(
        &self,
        location: &ResolvedLocation,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Value> {
        let mut query = coordinate_params(location);
        query.extend([
            ("start_date".to_string(), start.to_string()),
            ("end_date".to_string(), end.to_string()),
            ("daily".to_string(), params::join(params::HISTORICAL_DAILY)),
        ]);
        let data = self.get_json(&self.config.archive_url, query).await?;
        Ok(with_location(data, location))
    }

    /// Soil, evapotranspiration and growing-condition forecast.
    pub async fn agricultural(&self, location: &ResolvedLocation, days: u32) -> Result<Value> {
        let mut query = coordinate_params(location);
        query.extend([
            ("forecast_days".to_string(), days.to_string()),
            ("daily".to_string(), params::join(params::AGRICULTURAL_DAILY)),
            ("hourly".to_string(), params::join(params::AGRICULTURAL_HOURLY)),
        ]);
        let data = self.get_json(&self.config.forecast_url, query).await?;
        Ok(with_location(data, location))
    }

    async fn get_json(&self, url: &str, params: Vec<(String, String)>) -> Result<Value> {
        let key = TtlCache::key(url, &params);
        if let Some(value) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            debug!("Cache hit for {}", url);
            return Ok(value);
        }

        debug!("GET {} {:?}", url, params);
        let response = self
            .http
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::Provider(describe_request_error(url, &e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<UpstreamError>(&text)
                .map(|e| e.reason)
                .unwrap_or(text);
            warn!("{} returned {}: {}", url, status, message);
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Invalid JSON from {url}: {e}")))?;
        if let Some(cache) = &self.cache {
            cache.insert(key, value.clone());
        }
        Ok(value)
    }
}

fn coordinate_params(location: &ResolvedLocation) -> Vec<(String, String)> {
    vec![
        (
            "latitude".to_string(),
            location.coordinates.latitude.to_string(),
        ),
        (
            "longitude".to_string(),
            location.coordinates.longitude.to_string(),
        ),
        ("timezone".to_string(), "auto".to_string()),
    ]
}

fn with_location(mut data: Value, location: &ResolvedLocation) -> Value {
    if let Value::Object(map) = &mut data {
        map.insert("location_info".to_string(), location.to_json());
    }
    data
}

fn describe_request_error(url: &str, e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request to {url} timed out")
    } else if e.is_connect() {
        format!("could not connect to {url}")
    } else {
        format!("request to {url} failed: {e}")
    }
}
