//! Location enrichment: "city, state" text to coordinates.
//!
//! Resolution order:
//! 1. exact key lookup in the built-in table and the persisted cache
//! 2. the same lookup with parenthetical suffixes stripped from the city
//! 3. the external service, when one is configured
//!
//! Unresolvable locations stay without coordinates. The cache owns every
//! learned entry and is written once per batch.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use casefile_common::config::GeocoderConfig;
use casefile_common::types::{has_text, IncidentRecord};
use casefile_common::CasefileError;

use crate::rate_limit::RequestGate;

/// Known city coordinates, keyed by lower-cased "city, state".
const SEED_LOCATIONS: &[(&str, f64, f64)] = &[
    ("atlanta, georgia", 33.7490, -84.3880),
    ("austin, texas", 30.2672, -97.7431),
    ("baltimore, maryland", 39.2904, -76.6122),
    ("boston, massachusetts", 42.3601, -71.0589),
    ("brownsville, texas", 25.9017, -97.4975),
    ("charlotte, north carolina", 35.2271, -80.8431),
    ("chicago, illinois", 41.8781, -87.6298),
    ("dallas, texas", 32.7767, -96.7970),
    ("denver, colorado", 39.7392, -104.9903),
    ("detroit, michigan", 42.3314, -83.0458),
    ("el paso, texas", 31.7619, -106.4850),
    ("houston, texas", 29.7604, -95.3698),
    ("laredo, texas", 27.5306, -99.4803),
    ("las vegas, nevada", 36.1699, -115.1398),
    ("los angeles, california", 34.0522, -118.2437),
    ("mcallen, texas", 26.2034, -98.2300),
    ("miami, florida", 25.7617, -80.1918),
    ("minneapolis, minnesota", 44.9778, -93.2650),
    ("nashville, tennessee", 36.1627, -86.7816),
    ("new orleans, louisiana", 29.9511, -90.0715),
    ("new york, new york", 40.7128, -74.0060),
    ("newark, new jersey", 40.7357, -74.1724),
    ("oakland, california", 37.8044, -122.2712),
    ("orlando, florida", 28.5383, -81.3792),
    ("philadelphia, pennsylvania", 39.9526, -75.1652),
    ("phoenix, arizona", 33.4484, -112.0740),
    ("portland, oregon", 45.5152, -122.6784),
    ("raleigh, north carolina", 35.7796, -78.6382),
    ("sacramento, california", 38.5816, -121.4944),
    ("salt lake city, utah", 40.7608, -111.8910),
    ("san antonio, texas", 29.4241, -98.4936),
    ("san diego, california", 32.7157, -117.1611),
    ("san francisco, california", 37.7749, -122.4194),
    ("san jose, california", 37.3382, -121.8863),
    ("seattle, washington", 47.6062, -122.3321),
    ("st. paul, minnesota", 44.9537, -93.0900),
    ("tucson, arizona", 32.2226, -110.9747),
    ("washington, district of columbia", 38.9072, -77.0369),
];

static SEED_TABLE: LazyLock<HashMap<&'static str, (f64, f64)>> = LazyLock::new(|| {
    SEED_LOCATIONS
        .iter()
        .map(|(key, lat, lon)| (*key, (*lat, *lon)))
        .collect()
});

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").expect("valid regex"));

/// Cache key for a location. `None` when there is nothing to look up.
pub fn location_key(city: Option<&str>, state: &str) -> Option<String> {
    let city = city.map(str::trim).filter(|c| !c.is_empty());
    let state = state.trim();
    match (city, state.is_empty()) {
        (Some(city), false) => Some(format!("{city}, {state}").to_lowercase()),
        (Some(city), true) => Some(city.to_lowercase()),
        (None, false) => Some(state.to_lowercase()),
        (None, true) => None,
    }
}

fn strip_parentheticals(text: &str) -> String {
    PARENTHETICAL.replace_all(text, "").trim().to_string()
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CachedPoint {
    lat: f64,
    lon: f64,
}

/// Learned "city, state" → coordinates, persisted as a JSON object
/// independently of incident data. The built-in seed table is consulted
/// on lookup but never written out.
#[derive(Debug, Default)]
pub struct GeoCache {
    entries: HashMap<String, (f64, f64)>,
    path: Option<PathBuf>,
    dirty: bool,
}

impl GeoCache {
    /// Cache with no backing file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load a persisted cache. A missing file is an empty cache; a corrupt
    /// one is logged and ignored so geocoding can still run.
    pub fn load(path: &Path) -> Self {
        let mut cache = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return cache,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read geocode cache, starting empty");
                return cache;
            }
        };

        match serde_json::from_str::<HashMap<String, CachedPoint>>(&content) {
            Ok(entries) => {
                cache.entries = entries
                    .into_iter()
                    .map(|(k, p)| (k.to_lowercase(), (p.lat, p.lon)))
                    .collect();
                info!(path = %path.display(), entries = cache.entries.len(), "Loaded geocode cache");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt geocode cache, starting empty");
            }
        }
        cache
    }

    pub fn get(&self, key: &str) -> Option<(f64, f64)> {
        self.entries
            .get(key)
            .copied()
            .or_else(|| SEED_TABLE.get(key).copied())
    }

    pub fn insert(&mut self, key: &str, coords: (f64, f64)) {
        if SEED_TABLE.contains_key(key) {
            return;
        }
        self.entries.insert(key.to_string(), coords);
        self.dirty = true;
    }

    /// Learned entries, excluding the seed table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write learned entries if anything changed since the last write.
    /// Returns the number of entries written.
    pub fn persist(&mut self) -> casefile_common::Result<usize> {
        let Some(path) = self.path.as_ref() else {
            return Ok(0);
        };
        if !self.dirty {
            return Ok(0);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let sorted: BTreeMap<&str, CachedPoint> = self
            .entries
            .iter()
            .map(|(k, (lat, lon))| (k.as_str(), CachedPoint { lat: *lat, lon: *lon }))
            .collect();
        let json = serde_json::to_string_pretty(&sorted)?;
        std::fs::write(path, json).map_err(|e| {
            CasefileError::Geocode(format!("Failed to write cache {}: {e}", path.display()))
        })?;

        self.dirty = false;
        Ok(sorted.len())
    }
}

// ---------------------------------------------------------------------------
// External service
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GeocodingService: Send + Sync {
    /// Resolve free-text location to (lat, lon). `Ok(None)` means the
    /// service answered but found nothing.
    async fn lookup(&self, query: &str) -> Result<Option<(f64, f64)>>;
}

#[derive(Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
}

/// Nominatim search client, throttled by a [`RequestGate`].
pub struct NominatimService {
    client: reqwest::Client,
    endpoint: String,
    user_agent: String,
    gate: RequestGate,
}

impl NominatimService {
    pub fn new(config: &GeocoderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            user_agent: config.user_agent.clone(),
            gate: RequestGate::new(Duration::from_millis(config.min_interval_ms)),
        })
    }
}

#[async_trait]
impl GeocodingService for NominatimService {
    async fn lookup(&self, query: &str) -> Result<Option<(f64, f64)>> {
        if query.len() > 200 {
            anyhow::bail!("Location input too long (max 200 chars)");
        }
        self.gate.wait().await;

        let results: Vec<NominatimResult> = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", "us"),
            ])
            .header("User-Agent", &self.user_agent)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(first) = results.into_iter().next() else {
            return Ok(None);
        };
        let lat: f64 = first.lat.parse()?;
        let lon: f64 = first.lon.parse()?;
        Ok(Some((lat, lon)))
    }
}

// ---------------------------------------------------------------------------
// Geocoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocodeOutcome {
    /// Coordinates already present, or no location text.
    Skipped,
    /// Resolved from the seed table or cache.
    Cached,
    /// Resolved by the external service.
    Service,
    Unresolved,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GeocodeStats {
    pub skipped: usize,
    pub resolved: usize,
    pub from_service: usize,
    pub unresolved: usize,
}

pub struct Geocoder {
    cache: GeoCache,
    service: Option<Box<dyn GeocodingService>>,
    /// Keys the service could not resolve during this geocoder's lifetime.
    misses: HashSet<String>,
}

impl Geocoder {
    pub fn new(cache: GeoCache, service: Option<Box<dyn GeocodingService>>) -> Self {
        Self {
            cache,
            service,
            misses: HashSet::new(),
        }
    }

    /// Build from configuration: persisted cache at `cache_path`, plus the
    /// Nominatim client when external geocoding is enabled.
    pub fn from_config(config: &GeocoderConfig, cache_path: &Path) -> Result<Self> {
        let service: Option<Box<dyn GeocodingService>> = if config.external_enabled {
            Some(Box::new(NominatimService::new(config)?))
        } else {
            None
        };
        Ok(Self::new(GeoCache::load(cache_path), service))
    }

    pub async fn geocode(&mut self, record: &mut IncidentRecord) -> GeocodeOutcome {
        if record.has_coordinates() {
            return GeocodeOutcome::Skipped;
        }
        let city = has_text(&record.city).then(|| record.city.as_deref().unwrap_or_default());
        let Some(key) = location_key(city, &record.state) else {
            return GeocodeOutcome::Skipped;
        };

        if let Some(coords) = self.cache.get(&key) {
            record.set_coordinates(coords);
            return GeocodeOutcome::Cached;
        }

        let stripped_city = city.map(strip_parentheticals);
        let stripped_key = location_key(stripped_city.as_deref(), &record.state)
            .filter(|k| *k != key);
        if let Some(coords) = stripped_key.as_deref().and_then(|k| self.cache.get(k)) {
            record.set_coordinates(coords);
            return GeocodeOutcome::Cached;
        }

        let Some(service) = self.service.as_ref() else {
            return GeocodeOutcome::Unresolved;
        };
        if self.misses.contains(&key) {
            return GeocodeOutcome::Unresolved;
        }

        let query = match stripped_city.as_deref().filter(|c| !c.is_empty()) {
            Some(city) if !record.state.trim().is_empty() => {
                format!("{city}, {}, USA", record.state.trim())
            }
            Some(city) => format!("{city}, USA"),
            None => format!("{}, USA", record.state.trim()),
        };

        match service.lookup(&query).await {
            Ok(Some(coords)) => {
                debug!(query = query.as_str(), lat = coords.0, lon = coords.1, "Geocoded via service");
                self.cache.insert(&key, coords);
                if let Some(stripped) = stripped_key.as_deref() {
                    self.cache.insert(stripped, coords);
                }
                record.set_coordinates(coords);
                GeocodeOutcome::Service
            }
            Ok(None) => {
                debug!(query = query.as_str(), "No geocoding results");
                self.misses.insert(key);
                GeocodeOutcome::Unresolved
            }
            Err(e) => {
                warn!(id = record.id.as_str(), query = query.as_str(), error = %e, "Geocoding service failed");
                GeocodeOutcome::Unresolved
            }
        }
    }

    /// Geocode every record, then persist newly learned cache entries once.
    pub async fn geocode_batch(&mut self, records: &mut [IncidentRecord]) -> GeocodeStats {
        let mut stats = GeocodeStats::default();
        for record in records.iter_mut() {
            match self.geocode(record).await {
                GeocodeOutcome::Skipped => stats.skipped += 1,
                GeocodeOutcome::Cached => stats.resolved += 1,
                GeocodeOutcome::Service => {
                    stats.resolved += 1;
                    stats.from_service += 1;
                }
                GeocodeOutcome::Unresolved => stats.unresolved += 1,
            }
        }

        match self.cache.persist() {
            Ok(0) => {}
            Ok(written) => debug!(entries = written, "Persisted geocode cache"),
            Err(e) => warn!(error = %e, "Failed to persist geocode cache"),
        }

        info!(
            resolved = stats.resolved,
            from_service = stats.from_service,
            unresolved = stats.unresolved,
            skipped = stats.skipped,
            "Geocoding complete"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGeocodingService;
    use casefile_common::Tier;

    fn record(city: Option<&str>, state: &str) -> IncidentRecord {
        let mut r = IncidentRecord::new("2025-03-01", state, "arrest", Tier::Manual);
        r.city = city.map(String::from);
        r
    }

    #[tokio::test]
    async fn chicago_resolves_from_seed_table() {
        let service = MockGeocodingService::new();
        let calls = service.calls();
        let mut geocoder = Geocoder::new(GeoCache::in_memory(), Some(Box::new(service)));

        let mut r = record(Some("Chicago"), "Illinois");
        assert_eq!(geocoder.geocode(&mut r).await, GeocodeOutcome::Cached);
        assert_eq!(r.coordinates(), Some((41.8781, -87.6298)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skips_records_with_coordinates_or_no_location() {
        let mut geocoder = Geocoder::new(GeoCache::in_memory(), None);

        let mut located = record(Some("Chicago"), "Illinois");
        located.set_coordinates((1.0, 2.0));
        assert_eq!(geocoder.geocode(&mut located).await, GeocodeOutcome::Skipped);
        assert_eq!(located.coordinates(), Some((1.0, 2.0)));

        let mut nowhere = record(None, "");
        assert_eq!(geocoder.geocode(&mut nowhere).await, GeocodeOutcome::Skipped);
    }

    #[tokio::test]
    async fn strips_parentheticals_before_giving_up() {
        let mut geocoder = Geocoder::new(GeoCache::in_memory(), None);
        let mut r = record(Some("Chicago (South Side)"), "Illinois");
        assert_eq!(geocoder.geocode(&mut r).await, GeocodeOutcome::Cached);
        assert_eq!(r.coordinates(), Some((41.8781, -87.6298)));
    }

    #[tokio::test]
    async fn unresolved_without_service_is_not_an_error() {
        let mut geocoder = Geocoder::new(GeoCache::in_memory(), None);
        let mut r = record(Some("Nowhere"), "Kansas");
        assert_eq!(geocoder.geocode(&mut r).await, GeocodeOutcome::Unresolved);
        assert!(!r.has_coordinates());
    }

    #[tokio::test]
    async fn service_results_are_cached_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode_cache.json");

        let service = MockGeocodingService::new().with("Dayton, Ohio, USA", (39.7589, -84.1916));
        let calls = service.calls();
        let mut geocoder = Geocoder::new(GeoCache::load(&path), Some(Box::new(service)));

        let mut batch = vec![
            record(Some("Dayton"), "Ohio"),
            record(Some("Dayton"), "Ohio"),
            record(Some("Chicago"), "Illinois"),
        ];
        let stats = geocoder.geocode_batch(&mut batch).await;
        assert_eq!(stats.resolved, 3);
        assert_eq!(stats.from_service, 1);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let reloaded = GeoCache::load(&path);
        assert_eq!(reloaded.len(), 1, "seed entries are not persisted");
        assert_eq!(reloaded.get("dayton, ohio"), Some((39.7589, -84.1916)));
    }

    #[tokio::test]
    async fn service_misses_are_not_retried() {
        let service = MockGeocodingService::new();
        let calls = service.calls();
        let mut geocoder = Geocoder::new(GeoCache::in_memory(), Some(Box::new(service)));

        let mut a = record(Some("Atlantis"), "Florida");
        let mut b = record(Some("Atlantis"), "Florida");
        assert_eq!(geocoder.geocode(&mut a).await, GeocodeOutcome::Unresolved);
        assert_eq!(geocoder.geocode(&mut b).await, GeocodeOutcome::Unresolved);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn service_failure_leaves_record_untouched() {
        let service = MockGeocodingService::failing();
        let mut geocoder = Geocoder::new(GeoCache::in_memory(), Some(Box::new(service)));
        let mut r = record(Some("Dayton"), "Ohio");
        assert_eq!(geocoder.geocode(&mut r).await, GeocodeOutcome::Unresolved);
        assert!(!r.has_coordinates());
    }

    #[test]
    fn corrupt_cache_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "not json").unwrap();
        let cache = GeoCache::load(&path);
        assert!(cache.is_empty());
        assert_eq!(cache.get("chicago, illinois"), Some((41.8781, -87.6298)));
    }

    #[test]
    fn location_keys() {
        assert_eq!(
            location_key(Some(" Chicago "), "Illinois").as_deref(),
            Some("chicago, illinois")
        );
        assert_eq!(location_key(None, "Texas").as_deref(), Some("texas"));
        assert_eq!(location_key(Some("  "), "  "), None);
    }
}
