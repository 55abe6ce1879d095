//! Pipeline orchestrator.
//!
//! Holds one working collection per tier, fed by fetch, import and
//! `add_records`. `process` runs Validator → Normalizer → Deduplicator →
//! Geocoder over each tier independently. `save` splits each tier into
//! output categories and optionally re-deduplicates against what was
//! persisted by earlier runs.

pub mod stats;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use casefile_common::types::{IncidentRecord, Tier};
use casefile_common::CasefileConfig;

use crate::dedup::Deduplicator;
use crate::fetch::{self, FetchStats, IncidentSource};
use crate::geocoder::Geocoder;
use crate::ingest::{self, ImportReport};
use crate::normalizer::Normalizer;
use crate::store::{JsonFileStore, RecordStore};
use crate::validator::{ValidationReport, Validator};

pub use stats::{ProcessStats, StageStats, StatusReport};

pub const CATEGORY_DEATHS: &str = "deaths";
pub const CATEGORY_SHOOTINGS: &str = "shootings";
pub const CATEGORY_INCIDENTS: &str = "incidents";

/// Output category for a record of the given tier.
pub fn output_category(tier: Tier, record: &IncidentRecord) -> &'static str {
    match tier {
        Tier::Official => CATEGORY_DEATHS,
        Tier::Investigative if record.incident_type.to_lowercase().contains("shooting") => {
            CATEGORY_SHOOTINGS
        }
        Tier::Investigative | Tier::SystematicNews | Tier::Manual => CATEGORY_INCIDENTS,
    }
}

/// Which stages `process` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageFlags {
    pub validate: bool,
    pub normalize: bool,
    pub deduplicate: bool,
    pub geocode: bool,
}

impl StageFlags {
    pub fn all() -> Self {
        Self {
            validate: true,
            normalize: true,
            deduplicate: true,
            geocode: true,
        }
    }
}

impl Default for StageFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Components the pipeline is assembled from.
#[derive(TypedBuilder)]
pub struct PipelineDeps {
    pub validator: Validator,
    pub normalizer: Normalizer,
    pub deduplicator: Deduplicator,
    pub geocoder: Geocoder,
    pub store: Arc<dyn RecordStore>,
    #[builder(default = 4)]
    pub fetch_concurrency: usize,
}

impl PipelineDeps {
    /// Production wiring: JSON file store under `paths.data_dir`, geocode
    /// cache at `paths.geocode_cache`.
    pub fn from_config(config: &CasefileConfig) -> anyhow::Result<Self> {
        let vocab = config.vocabulary.build();
        let geocoder = Geocoder::from_config(&config.geocoder, &config.paths.geocode_cache)
            .context("Failed to build geocoder")?;
        Ok(Self::builder()
            .validator(Validator::new(vocab.clone()))
            .normalizer(Normalizer::new(vocab))
            .deduplicator(Deduplicator::new(
                config.dedup.threshold,
                config.dedup.similarity_rules(),
            ))
            .geocoder(geocoder)
            .store(Arc::new(JsonFileStore::new(&config.paths.data_dir)))
            .build())
    }
}

pub struct Pipeline {
    validator: Validator,
    normalizer: Normalizer,
    deduplicator: Deduplicator,
    geocoder: Geocoder,
    store: Arc<dyn RecordStore>,
    fetch_concurrency: usize,
    collections: BTreeMap<Tier, Vec<IncidentRecord>>,
    /// Records merged away during `process`, kept for traceability.
    absorbed: Vec<IncidentRecord>,
    /// Reports with at least one issue, from `add_records` and `process`.
    reports: Vec<ValidationReport>,
    /// Outputs loaded by `load_persisted`; rewritten by `save` even if empty.
    loaded_outputs: BTreeSet<(Tier, String)>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            validator: deps.validator,
            normalizer: deps.normalizer,
            deduplicator: deps.deduplicator,
            geocoder: deps.geocoder,
            store: deps.store,
            fetch_concurrency: deps.fetch_concurrency,
            collections: BTreeMap::new(),
            absorbed: Vec::new(),
            reports: Vec::new(),
            loaded_outputs: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &CasefileConfig) -> anyhow::Result<Self> {
        Ok(Self::new(PipelineDeps::from_config(config)?))
    }

    /// Route records into their tier's collection. Records with an
    /// out-of-range tier cannot be routed; they are reported as invalid
    /// and dropped. Returns the number routed.
    pub fn add_records(&mut self, records: Vec<IncidentRecord>) -> usize {
        let mut routed = 0;
        for record in records {
            match record.tier_level() {
                Some(tier) => {
                    self.collections.entry(tier).or_default().push(record);
                    routed += 1;
                }
                None => {
                    warn!(id = record.id.as_str(), tier = record.tier, "Dropping record with invalid tier");
                    self.reports.push(self.validator.validate(&record));
                }
            }
        }
        routed
    }

    pub async fn fetch(&mut self, sources: &[Arc<dyn IncidentSource>]) -> FetchStats {
        let (records, stats) = fetch::fetch_all(sources, self.fetch_concurrency).await;
        self.add_records(records);
        stats
    }

    /// Import every file. An unreadable or unparseable file aborts the
    /// import with nothing added from that file.
    pub fn import(&mut self, paths: &[PathBuf]) -> casefile_common::Result<ImportReport> {
        let mut report = ImportReport::default();
        for path in paths {
            let (records, file_report) = ingest::import_file(path)?;
            self.add_records(records);
            report.merge(file_report);
        }
        Ok(report)
    }

    /// Load every persisted output into the working collections, so a
    /// later `save(false)` rewrites them in place.
    pub fn load_persisted(&mut self) -> casefile_common::Result<usize> {
        let mut loaded = 0;
        for output in self.store.list_outputs()? {
            let records = self
                .store
                .load_existing(output.tier, &output.category)?
                .unwrap_or_default();
            loaded += records.len();
            self.collections.entry(output.tier).or_default().extend(records);
            self.loaded_outputs.insert((output.tier, output.category));
        }
        info!(records = loaded, outputs = self.loaded_outputs.len(), "Loaded persisted outputs");
        Ok(loaded)
    }

    /// Run the enabled stages over each tier's collection independently.
    pub async fn process(&mut self, flags: StageFlags) -> ProcessStats {
        let mut stats = ProcessStats::new();
        info!(run_id = %stats.run_id, ?flags, "Processing");

        let tiers: Vec<Tier> = self.collections.keys().copied().collect();
        for tier in tiers {
            let records = self.collections.remove(&tier).unwrap_or_default();
            let (records, tier_stats) = self.run_stages(records, flags).await;
            info!(
                run_id = %stats.run_id,
                tier = tier.number(),
                original = tier_stats.original,
                invalid = tier_stats.validation_errors,
                removed = tier_stats.duplicates_removed,
                geocoded = tier_stats.geocoded,
                "Tier processed"
            );
            stats.record(tier, tier_stats);
            self.collections.insert(tier, records);
        }

        stats
    }

    /// The stage sequence over an arbitrary batch, regardless of tier.
    pub async fn run_stages(
        &mut self,
        records: Vec<IncidentRecord>,
        flags: StageFlags,
    ) -> (Vec<IncidentRecord>, StageStats) {
        let mut stats = StageStats {
            original: records.len(),
            ..StageStats::default()
        };
        let mut records = records;

        if flags.validate {
            let (valid, reports) = self.validator.validate_batch(records);
            stats.validation_errors = reports.iter().filter(|r| !r.is_valid()).count();
            self.reports.extend(reports.into_iter().filter(|r| !r.is_clean()));
            records = valid;
        }

        if flags.normalize {
            self.normalizer.normalize_batch(&mut records);
        }

        if flags.deduplicate {
            let outcome = self.deduplicator.run(records);
            stats.duplicates_removed = outcome.removed();
            self.absorbed.extend(outcome.absorbed);
            records = outcome.records;
        }

        if flags.geocode {
            let geocoded = self.geocoder.geocode_batch(&mut records).await;
            stats.geocoded = geocoded.resolved;
            stats.geocode_failed = geocoded.unresolved;
        }

        stats.final_count = records.len();
        (records, stats)
    }

    /// Persist each tier's collection by output category. With
    /// `merge_existing`, previously persisted records for the same output
    /// are deduplicated together with the new ones before writing.
    /// Returns the written locations.
    pub fn save(&mut self, merge_existing: bool) -> casefile_common::Result<Vec<String>> {
        let mut groups: BTreeMap<(Tier, &'static str), Vec<IncidentRecord>> = BTreeMap::new();
        for (tier, records) in &self.collections {
            for record in records {
                groups
                    .entry((*tier, output_category(*tier, record)))
                    .or_default()
                    .push(record.clone());
            }
        }

        let mut written = Vec::new();
        for ((tier, category), records) in groups {
            let new_count = records.len();
            let records = if merge_existing {
                match self.store.load_existing(tier, category)? {
                    Some(mut existing) => {
                        let existing_count = existing.len();
                        existing.extend(records);
                        let outcome = self.deduplicator.run(existing);
                        info!(
                            tier = tier.number(),
                            category,
                            existing = existing_count,
                            new = new_count,
                            removed = outcome.removed(),
                            "Merged with existing output"
                        );
                        self.absorbed.extend(outcome.absorbed);
                        outcome.records
                    }
                    None => records,
                }
            } else {
                records
            };
            self.loaded_outputs.remove(&(tier, category.to_string()));
            written.push(self.store.write_output(tier, category, &records)?);
        }

        // Loaded outputs that no longer have any record are emptied.
        for (tier, category) in std::mem::take(&mut self.loaded_outputs) {
            written.push(self.store.write_output(tier, &category, &[])?);
        }

        Ok(written)
    }

    pub fn status(&self) -> casefile_common::Result<StatusReport> {
        Ok(StatusReport {
            working: self
                .collections
                .iter()
                .map(|(tier, records)| (*tier, records.len()))
                .collect(),
            persisted: self.store.list_outputs()?,
        })
    }

    pub fn records(&self, tier: Tier) -> &[IncidentRecord] {
        self.collections.get(&tier).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn absorbed(&self) -> &[IncidentRecord] {
        &self.absorbed
    }

    pub fn validation_reports(&self) -> &[ValidationReport] {
        &self.reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocoder::GeoCache;
    use crate::testing::{fixtures, MemoryStore, MockGeocodingService, CHICAGO};
    use casefile_common::{SimilarityRules, Vocabulary};

    fn pipeline(store: Arc<MemoryStore>) -> Pipeline {
        let deps = PipelineDeps::builder()
            .validator(Validator::new(Vocabulary::default()))
            .normalizer(Normalizer::new(Vocabulary::default()))
            .deduplicator(Deduplicator::new(0.8, SimilarityRules::default()))
            .geocoder(Geocoder::new(
                GeoCache::in_memory(),
                Some(Box::new(MockGeocodingService::new())),
            ))
            .store(store)
            .build();
        Pipeline::new(deps)
    }

    #[test]
    fn output_categories() {
        let shooting = fixtures::smith_investigation();
        let arrest = fixtures::texas_arrest();
        assert_eq!(output_category(Tier::Official, &arrest), "deaths");
        assert_eq!(output_category(Tier::Investigative, &shooting), "shootings");
        assert_eq!(output_category(Tier::Investigative, &arrest), "incidents");
        assert_eq!(output_category(Tier::SystematicNews, &shooting), "incidents");
        assert_eq!(output_category(Tier::Manual, &arrest), "incidents");
    }

    #[test]
    fn add_records_routes_by_tier() {
        let mut p = pipeline(Arc::new(MemoryStore::new()));
        let mut bad = fixtures::texas_arrest();
        bad.tier = 7;
        let routed = p.add_records(vec![
            fixtures::death_in_custody(),
            fixtures::texas_arrest(),
            bad,
        ]);
        assert_eq!(routed, 2);
        assert_eq!(p.records(Tier::Official).len(), 1);
        assert_eq!(p.records(Tier::Manual).len(), 1);
        assert!(p.records(Tier::Investigative).is_empty());
        assert_eq!(p.validation_reports().len(), 1);
        assert!(!p.validation_reports()[0].is_valid());
    }

    #[tokio::test]
    async fn end_to_end_batch_through_all_stages() {
        let mut p = pipeline(Arc::new(MemoryStore::new()));
        let (records, stats) = p.run_stages(fixtures::end_to_end_batch(), StageFlags::all()).await;

        assert_eq!(records.len(), 2);
        assert_eq!(stats.original, 3);
        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(stats.final_count, 2);

        let smith = records.iter().find(|r| r.state == "Illinois").unwrap();
        assert_eq!(smith.tier, 2);
        assert_eq!(smith.city.as_deref(), Some("Chicago"));
        assert_eq!(smith.coordinates(), Some(CHICAGO));
        assert_eq!(smith.linked_ids.len(), 1);
        assert!(smith.is_primary);

        let doe = records.iter().find(|r| r.state == "Texas").unwrap();
        assert!(doe.linked_ids.is_empty());
        assert_eq!(p.absorbed().len(), 1);
    }

    #[tokio::test]
    async fn process_keeps_tiers_separate() {
        let mut p = pipeline(Arc::new(MemoryStore::new()));
        p.add_records(fixtures::end_to_end_batch());
        let stats = p.process(StageFlags::all()).await;

        assert_eq!(stats.totals.original, 3);
        assert_eq!(stats.totals.duplicates_removed, 0);
        assert_eq!(stats.tiers.len(), 3);
        assert_eq!(p.records(Tier::Investigative)[0].coordinates(), Some(CHICAGO));
    }

    #[tokio::test]
    async fn disabled_stages_are_skipped() {
        let mut p = pipeline(Arc::new(MemoryStore::new()));
        let flags = StageFlags {
            deduplicate: false,
            geocode: false,
            ..StageFlags::all()
        };
        let (records, stats) = p.run_stages(fixtures::end_to_end_batch(), flags).await;
        assert_eq!(records.len(), 3);
        assert_eq!(stats.geocoded, 0);
        assert!(records.iter().all(|r| !r.has_coordinates()));
        assert_eq!(records[1].incident_type, "shooting_by_agent");
    }

    #[tokio::test]
    async fn invalid_records_never_reach_the_store() {
        let store = Arc::new(MemoryStore::new());
        let mut p = pipeline(store.clone());
        let mut undated = fixtures::texas_arrest();
        undated.date = "sometime in March".into();
        p.add_records(vec![undated, fixtures::death_in_custody()]);

        let stats = p.process(StageFlags::all()).await;
        assert_eq!(stats.totals.validation_errors, 1);
        p.save(false).unwrap();

        assert_eq!(store.total_records(), 1);
        assert!(store.get(Tier::Official, "deaths").is_some());
        assert!(store.get(Tier::Manual, "incidents").is_none());
    }

    #[tokio::test]
    async fn rows_with_unreadable_tiers_are_reported_not_relabelled() {
        let store = Arc::new(MemoryStore::new());
        let mut p = pipeline(store.clone());
        let (records, _) = crate::ingest::parse_json(
            r#"[{"date": "2025-03-01", "state": "Ohio", "incident_type": "raid", "tier": 300},
                {"date": "2025-03-01", "state": "Ohio", "incident_type": "raid", "tier": -1}]"#,
        )
        .unwrap();

        assert_eq!(p.add_records(records), 0);
        assert_eq!(p.validation_reports().len(), 2);
        assert!(p.validation_reports().iter().all(|r| !r.is_valid()));

        p.process(StageFlags::all()).await;
        p.save(false).unwrap();
        assert_eq!(store.total_records(), 0);
        assert!(p.records(Tier::Manual).is_empty());
    }

    #[tokio::test]
    async fn lone_latitude_does_not_survive_the_stages() {
        let mut p = pipeline(Arc::new(MemoryStore::new()));
        let mut r = IncidentRecord::new("2025-03-01", "Kansas", "arrest", Tier::Manual);
        r.city = Some("Nowhere".into());
        r.latitude = Some(38.5);

        let (records, stats) = p.run_stages(vec![r], StageFlags::all()).await;
        assert_eq!(stats.geocode_failed, 1);
        assert_eq!(records[0].latitude, None);
        assert_eq!(records[0].longitude, None);
    }

    #[tokio::test]
    async fn save_merges_with_existing_outputs() {
        let mut previous = fixtures::texas_arrest();
        previous.city = Some("Houston".into());
        previous.retrieved_at = Some(chrono::Utc::now() - chrono::Duration::days(30));
        let store = Arc::new(MemoryStore::new().with_output(Tier::Manual, "incidents", vec![previous.clone()]));

        let mut p = pipeline(store.clone());
        p.add_records(vec![fixtures::texas_arrest()]);
        p.process(StageFlags::all()).await;
        let written = p.save(true).unwrap();

        assert_eq!(written, vec!["memory://tier4_incidents.json".to_string()]);
        let saved = store.get(Tier::Manual, "incidents").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].city.as_deref(), Some("Houston"));
    }

    #[tokio::test]
    async fn save_without_merge_overwrites() {
        let store = Arc::new(
            MemoryStore::new().with_output(Tier::Manual, "incidents", vec![fixtures::texas_arrest()]),
        );
        let mut p = pipeline(store.clone());
        p.add_records(vec![fixtures::texas_arrest()]);
        p.save(false).unwrap();
        assert_eq!(store.get(Tier::Manual, "incidents").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reprocessing_persisted_outputs_rewrites_in_place() {
        let a = fixtures::smith_investigation();
        let mut b = fixtures::smith_investigation();
        b.subject_name = Some("J. Smith".into());
        b.source_name = Some("Second outlet".into());
        b.assign_identity();
        let store = Arc::new(MemoryStore::new().with_output(Tier::Investigative, "shootings", vec![a, b]));

        let mut p = pipeline(store.clone());
        assert_eq!(p.load_persisted().unwrap(), 2);
        let stats = p.process(StageFlags::all()).await;
        assert_eq!(stats.totals.duplicates_removed, 1);
        p.save(false).unwrap();

        let saved = store.get(Tier::Investigative, "shootings").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].linked_ids.len(), 1);
    }

    #[tokio::test]
    async fn status_reports_working_and_persisted() {
        let store = Arc::new(MemoryStore::new().with_output(Tier::Official, "deaths", vec![fixtures::death_in_custody()]));
        let mut p = pipeline(store);
        p.add_records(vec![fixtures::texas_arrest()]);

        let status = p.status().unwrap();
        assert_eq!(status.working.get(&Tier::Manual), Some(&1));
        assert_eq!(status.persisted.len(), 1);
        assert_eq!(status.persisted[0].records, 1);
    }
}
