// Test doubles for the pipeline's trait boundaries.
//
// - MockGeocodingService (GeocodingService): query → coordinates map, counts calls
// - MockSource (IncidentSource): fixed records or a forced failure
// - MemoryStore (RecordStore): in-memory tier/category outputs
//
// Plus record fixtures shared by unit and integration tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;

use casefile_common::types::{IncidentRecord, Tier};

use crate::fetch::IncidentSource;
use crate::geocoder::GeocodingService;
use crate::store::{output_name, OutputSummary, RecordStore};

/// Chicago, IL coordinates as seeded in the geocoder.
pub const CHICAGO: (f64, f64) = (41.8781, -87.6298);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub mod fixtures {
    use super::*;

    fn with_subject(mut record: IncidentRecord, name: &str) -> IncidentRecord {
        record.subject_name = Some(name.to_string());
        record.assign_identity();
        record
    }

    /// Tier 3 news report of a shooting in Illinois, no city.
    pub fn smith_news_report() -> IncidentRecord {
        let record =
            IncidentRecord::new("2025-03-01", "Illinois", "shooting_by_agent", Tier::SystematicNews);
        with_subject(record, "John Smith")
    }

    /// Tier 2 investigative report of the same shooting, one day later,
    /// with the city and the raw "shooting" type.
    pub fn smith_investigation() -> IncidentRecord {
        let mut record =
            IncidentRecord::new("2025-03-02", "Illinois", "shooting", Tier::Investigative);
        record.city = Some("Chicago".to_string());
        with_subject(record, "John Smith")
    }

    /// Unrelated tier 4 arrest in Texas.
    pub fn texas_arrest() -> IncidentRecord {
        let record = IncidentRecord::new("2025-03-01", "Texas", "arrest", Tier::Manual);
        with_subject(record, "Jane Doe")
    }

    /// Tier 1 death in custody with an outcome and an agency.
    pub fn death_in_custody() -> IncidentRecord {
        let mut record =
            IncidentRecord::new("2025-02-10", "Georgia", "death_in_custody", Tier::Official);
        record.outcome = Some("Died in custody after medical emergency".to_string());
        record.agency = Some("ICE".to_string());
        with_subject(record, "Carlos Mendez")
    }

    /// The three raw records of the end-to-end scenario.
    pub fn end_to_end_batch() -> Vec<IncidentRecord> {
        vec![smith_news_report(), smith_investigation(), texas_arrest()]
    }
}

// ---------------------------------------------------------------------------
// MockGeocodingService
// ---------------------------------------------------------------------------

/// Map-backed geocoding service. Unknown queries resolve to `None`.
pub struct MockGeocodingService {
    results: HashMap<String, (f64, f64)>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockGeocodingService {
    pub fn new() -> Self {
        Self {
            results: HashMap::new(),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Service whose every lookup errors.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with(mut self, query: &str, coords: (f64, f64)) -> Self {
        self.results.insert(query.to_string(), coords);
        self
    }

    /// Shared call counter, readable after the service is boxed.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Default for MockGeocodingService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeocodingService for MockGeocodingService {
    async fn lookup(&self, query: &str) -> Result<Option<(f64, f64)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("geocoding service unavailable");
        }
        Ok(self.results.get(query).copied())
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

pub struct MockSource {
    name: String,
    tier: Tier,
    records: Vec<IncidentRecord>,
    fail: bool,
}

impl MockSource {
    pub fn new(name: &str, tier: Tier, records: Vec<IncidentRecord>) -> Self {
        Self {
            name: name.to_string(),
            tier,
            records,
            fail: false,
        }
    }

    pub fn failing(name: &str, tier: Tier) -> Self {
        Self {
            fail: true,
            ..Self::new(name, tier, Vec::new())
        }
    }
}

#[async_trait]
impl IncidentSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    async fn fetch(&self) -> Result<Vec<IncidentRecord>> {
        if self.fail {
            bail!("{} is unreachable", self.name);
        }
        Ok(self.records.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory record store. Thread-safe via interior Mutex.
#[derive(Default)]
pub struct MemoryStore {
    outputs: Mutex<BTreeMap<(Tier, String), Vec<IncidentRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a previously persisted output.
    pub fn with_output(self, tier: Tier, category: &str, records: Vec<IncidentRecord>) -> Self {
        self.outputs
            .lock()
            .unwrap()
            .insert((tier, category.to_string()), records);
        self
    }

    pub fn get(&self, tier: Tier, category: &str) -> Option<Vec<IncidentRecord>> {
        self.outputs
            .lock()
            .unwrap()
            .get(&(tier, category.to_string()))
            .cloned()
    }

    pub fn total_records(&self) -> usize {
        self.outputs.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl RecordStore for MemoryStore {
    fn load_existing(
        &self,
        tier: Tier,
        category: &str,
    ) -> casefile_common::Result<Option<Vec<IncidentRecord>>> {
        Ok(self.get(tier, category))
    }

    fn write_output(
        &self,
        tier: Tier,
        category: &str,
        records: &[IncidentRecord],
    ) -> casefile_common::Result<String> {
        self.outputs
            .lock()
            .unwrap()
            .insert((tier, category.to_string()), records.to_vec());
        Ok(format!("memory://{}", output_name(tier, category)))
    }

    fn list_outputs(&self) -> casefile_common::Result<Vec<OutputSummary>> {
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .iter()
            .map(|((tier, category), records)| OutputSummary {
                tier: *tier,
                category: category.clone(),
                location: format!("memory://{}", output_name(*tier, category)),
                records: records.len(),
            })
            .collect())
    }
}
