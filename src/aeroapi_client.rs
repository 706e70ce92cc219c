use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use moka::sync::Cache;
use rand::RngExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::flight_status::FlightSnapshot;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const CACHE_CAPACITY: u64 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

/// Outcome of one flight-status fetch at the provider boundary.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(FlightSnapshot),
    /// Provider has no flight for this ident/day; cached negatively
    NotFound,
    /// 5xx or network trouble that outlived the in-call retries; the caller
    /// shortens its next-check cadence instead of failing the trip
    Transient(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
    pub entries: u64,
}

/// AeroAPI-shaped flight entry. Only the fields the snapshot needs; the raw
/// payload is retained separately.
#[derive(Debug, Deserialize)]
struct ProviderFlight {
    ident: Option<String>,
    status: Option<String>,
    estimated_out: Option<DateTime<Utc>>,
    actual_out: Option<DateTime<Utc>>,
    // AeroAPI names the arrival-side fields "on" (wheels-on)
    estimated_on: Option<DateTime<Utc>>,
    actual_on: Option<DateTime<Utc>>,
    gate_origin: Option<String>,
    gate_destination: Option<String>,
    #[serde(default)]
    departure_delay: i32,
    #[serde(default)]
    arrival_delay: i32,
    #[serde(default)]
    cancelled: bool,
    #[serde(default)]
    diverted: bool,
    #[serde(default)]
    progress_percent: i32,
    origin: Option<ProviderAirport>,
    destination: Option<ProviderAirport>,
    aircraft_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderAirport {
    code_iata: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    flights: Vec<serde_json::Value>,
}

/// Flight-data provider client with a small in-process TTL cache.
///
/// One outbound call per cache miss; 404s are cached as negative entries for
/// the same TTL so unknown flights don't burn the request budget.
#[derive(Clone)]
pub struct AeroApiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    cache: Cache<String, Option<FlightSnapshot>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl AeroApiClient {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("AERO_API_KEY").ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("AERO_API_KEY not set - flight tracking will be disabled");
        }
        let base_url = std::env::var("AERO_API_BASE_URL")
            .unwrap_or_else(|_| "https://aeroapi.flightaware.com/aeroapi".to_string());
        Self::new(api_key, base_url)
    }

    pub fn new(api_key: Option<String>, base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build flight-data HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        })
    }

    fn cache_key(flight_number: &str, departure_day: NaiveDate) -> String {
        format!("{}:{}", flight_number, departure_day)
    }

    pub fn cache_stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate_percent: if total > 0 {
                (hits as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
            } else {
                0.0
            },
            entries: self.cache.entry_count(),
        }
    }

    /// Fetch the current status of a flight on a given departure day.
    ///
    /// Permanent provider rejections (4xx other than 404) surface as `Err`;
    /// the polling engine logs those and keeps its normal cadence.
    pub async fn get_flight_status(
        &self,
        flight_number: &str,
        departure_day: NaiveDate,
    ) -> Result<FetchOutcome> {
        let key = Self::cache_key(flight_number, departure_day);

        if let Some(entry) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("aeroapi.cache.hit").increment(1);
            debug!("Flight data cache hit for {}", key);
            return Ok(match entry {
                Some(snapshot) => FetchOutcome::Found(snapshot),
                None => FetchOutcome::NotFound,
            });
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aeroapi.cache.miss").increment(1);

        let Some(api_key) = self.api_key.clone() else {
            // No key: behave like an unknown flight so polling degrades
            // gracefully instead of erroring every cycle.
            self.cache.insert(key, None);
            return Ok(FetchOutcome::NotFound);
        };

        let url = format!("{}/flights/{}", self.base_url, flight_number);
        let end_day = departure_day + ChronoDuration::days(1);
        let params = [
            ("start", departure_day.format("%Y-%m-%d").to_string()),
            ("end", end_day.format("%Y-%m-%d").to_string()),
            ("max_pages", "1".to_string()),
        ];

        let mut last_transient = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let ceiling = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                let jittered = rand::rng().random_range(0..=ceiling);
                tokio::time::sleep(Duration::from_millis(jittered)).await;
            }

            let response = self
                .client
                .get(&url)
                .header("x-apikey", &api_key)
                .header("Accept", "application/json")
                .query(&params)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let body: ProviderResponse = resp
                        .json()
                        .await
                        .context("Failed to parse flight-data response")?;
                    let outcome = match self.normalize(body, flight_number) {
                        Some(snapshot) => {
                            self.cache.insert(key, Some(snapshot.clone()));
                            FetchOutcome::Found(snapshot)
                        }
                        None => {
                            info!("No flights returned for {}", flight_number);
                            self.cache.insert(key, None);
                            FetchOutcome::NotFound
                        }
                    };
                    return Ok(outcome);
                }
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    info!("Flight {} not found for {}", flight_number, departure_day);
                    self.cache.insert(key, None);
                    return Ok(FetchOutcome::NotFound);
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_transient = format!("provider returned {}", resp.status());
                    warn!(
                        "Transient flight-data error for {} (attempt {}/{}): {}",
                        flight_number,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        last_transient
                    );
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    metrics::counter!("aeroapi.permanent_error").increment(1);
                    anyhow::bail!(
                        "Flight-data provider rejected request for {}: {} {}",
                        flight_number,
                        status,
                        body.chars().take(200).collect::<String>()
                    );
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_transient = e.to_string();
                    warn!(
                        "Flight-data request failed for {} (attempt {}/{}): {}",
                        flight_number,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        last_transient
                    );
                }
                Err(e) => {
                    return Err(e).context("Flight-data request failed");
                }
            }
        }

        metrics::counter!("aeroapi.transient_error").increment(1);
        Ok(FetchOutcome::Transient(last_transient))
    }

    /// Map the provider payload to the canonical snapshot, keeping the raw
    /// flight entry for forensics.
    fn normalize(&self, body: ProviderResponse, flight_number: &str) -> Option<FlightSnapshot> {
        let raw = body.flights.into_iter().next()?;
        let flight: ProviderFlight = match serde_json::from_value(raw.clone()) {
            Ok(f) => f,
            Err(e) => {
                warn!("Unparseable flight entry for {}: {}", flight_number, e);
                return None;
            }
        };

        Some(FlightSnapshot {
            ident: flight.ident.unwrap_or_else(|| flight_number.to_string()),
            status: flight.status.unwrap_or_else(|| "Unknown".to_string()),
            estimated_out: flight.estimated_out,
            actual_out: flight.actual_out,
            estimated_in: flight.estimated_on,
            actual_in: flight.actual_on,
            gate_origin: flight.gate_origin,
            gate_destination: flight.gate_destination,
            departure_delay_minutes: flight.departure_delay,
            arrival_delay_minutes: flight.arrival_delay,
            cancelled: flight.cancelled,
            diverted: flight.diverted,
            progress_percent: flight.progress_percent.clamp(0, 100),
            origin_iata: flight.origin.and_then(|a| a.code_iata),
            destination_iata: flight.destination.and_then(|a| a.code_iata),
            aircraft_type: flight.aircraft_type,
            raw: Some(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AeroApiClient {
        AeroApiClient::new(None, "http://localhost:0".to_string()).unwrap()
    }

    #[test]
    fn normalize_maps_arrival_fields() {
        let body: ProviderResponse = serde_json::from_value(json!({
            "flights": [{
                "ident": "AA123",
                "status": "En Route",
                "estimated_out": "2025-12-01T19:30:00Z",
                "estimated_on": "2025-12-02T01:10:00Z",
                "actual_on": null,
                "gate_origin": "D16",
                "departure_delay": 10,
                "progress_percent": 42,
                "origin": {"code_iata": "JFK"},
                "destination": {"code_iata": "LAX"}
            }]
        }))
        .unwrap();

        let snapshot = client().normalize(body, "AA123").unwrap();
        assert_eq!(snapshot.status, "En Route");
        assert_eq!(
            snapshot.estimated_in.unwrap().to_rfc3339(),
            "2025-12-02T01:10:00+00:00"
        );
        assert_eq!(snapshot.actual_in, None);
        assert_eq!(snapshot.origin_iata.as_deref(), Some("JFK"));
        assert_eq!(snapshot.progress_percent, 42);
        assert!(snapshot.raw.is_some());
    }

    #[test]
    fn normalize_empty_payload_is_none() {
        let body: ProviderResponse = serde_json::from_value(json!({"flights": []})).unwrap();
        assert!(client().normalize(body, "AA123").is_none());
    }

    #[tokio::test]
    async fn missing_api_key_degrades_to_not_found_and_caches() {
        let c = client();
        let day = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();

        let first = c.get_flight_status("AA123", day).await.unwrap();
        assert!(matches!(first, FetchOutcome::NotFound));

        // Second lookup is served from the negative cache entry
        let second = c.get_flight_status("AA123", day).await.unwrap();
        assert!(matches!(second, FetchOutcome::NotFound));

        let stats = c.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
