//! Source fetch driver.
//!
//! Sources are independent failure domains: they run concurrently and a
//! source that errors is logged and contributes zero records.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use casefile_common::config::{GeocoderConfig, SourceConfig};
use casefile_common::types::{IncidentRecord, Tier};

use crate::ingest::{self, RowDefaults};
use crate::rate_limit::RequestGate;

pub const FETCH_COLLECTION_METHOD: &str = "fetch";

const FEED_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait IncidentSource: Send + Sync {
    fn name(&self) -> &str;

    /// Reliability tier of this source.
    fn tier(&self) -> Tier;

    async fn fetch(&self) -> Result<Vec<IncidentRecord>>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub sources: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records: usize,
}

impl std::fmt::Display for FetchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Fetched {} records from {}/{} sources ({} failed)",
            self.records, self.succeeded, self.sources, self.failed
        )
    }
}

/// Run every source, at most `concurrency` at a time. Output is grouped
/// by source in the order the sources were given.
pub async fn fetch_all(
    sources: &[Arc<dyn IncidentSource>],
    concurrency: usize,
) -> (Vec<IncidentRecord>, FetchStats) {
    let mut stats = FetchStats {
        sources: sources.len(),
        ..FetchStats::default()
    };

    let mut results: Vec<_> = stream::iter(sources.iter().enumerate().map(|(index, source)| {
        async move { (index, source, source.fetch().await) }
    }))
    .buffer_unordered(concurrency.max(1))
    .collect()
    .await;
    results.sort_by_key(|(index, _, _)| *index);

    let mut records = Vec::new();
    for (_, source, result) in results {
        match result {
            Ok(batch) => {
                info!(source = source.name(), tier = source.tier().number(), records = batch.len(), "Source fetched");
                stats.succeeded += 1;
                records.extend(batch.into_iter().map(|r| stamp(r, source.as_ref())));
            }
            Err(e) => {
                warn!(source = source.name(), error = %e, "Source fetch failed");
                stats.failed += 1;
            }
        }
    }
    stats.records = records.len();
    (records, stats)
}

/// Provenance defaults. An out-of-range tier is left as is for the
/// validator to reject.
fn stamp(mut record: IncidentRecord, source: &dyn IncidentSource) -> IncidentRecord {
    if record.retrieved_at.is_none() {
        record.retrieved_at = Some(Utc::now());
    }
    if record.source_tier.is_none() {
        record.source_tier = Some(source.tier().number());
    }
    if record.source_name.as_deref().map_or(true, |s| s.trim().is_empty()) {
        record.source_name = Some(source.name().to_string());
    }
    if record.id.trim().is_empty() {
        record.assign_identity();
    }
    record
}

/// A remote JSON document in any shape the JSON importer accepts.
pub struct JsonFeedSource {
    name: String,
    url: String,
    tier: Tier,
    client: reqwest::Client,
    user_agent: String,
    gate: RequestGate,
}

impl JsonFeedSource {
    pub fn new(config: &SourceConfig, http: &GeocoderConfig) -> Result<Self> {
        let tier = Tier::from_number(config.tier)
            .with_context(|| format!("source {:?} has invalid tier {}", config.name, config.tier))?;
        let client = reqwest::Client::builder()
            .timeout(FEED_TIMEOUT)
            .build()?;
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            tier,
            client,
            user_agent: http.user_agent.clone(),
            gate: RequestGate::new(Duration::from_millis(config.min_interval_ms)),
        })
    }
}

#[async_trait]
impl IncidentSource for JsonFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    async fn fetch(&self) -> Result<Vec<IncidentRecord>> {
        self.gate.wait().await;
        let body = self
            .client
            .get(&self.url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let defaults = RowDefaults {
            tier: self.tier,
            collection_method: FETCH_COLLECTION_METHOD,
        };
        let (records, report) = ingest::parse_json_with(&body, defaults)
            .map_err(|e| anyhow::anyhow!("{}: {e}", self.url))?;
        if report.rejected > 0 || report.unknown_fields > 0 {
            warn!(
                source = self.name.as_str(),
                rejected = report.rejected,
                unknown_fields = report.unknown_fields,
                "Feed rows needed cleanup"
            );
        }
        Ok(records)
    }
}

/// Build the configured feed sources, skipping any that fail to construct.
pub fn configured_sources(
    sources: &[SourceConfig],
    http: &GeocoderConfig,
) -> Vec<Arc<dyn IncidentSource>> {
    sources
        .iter()
        .filter_map(|config| match JsonFeedSource::new(config, http) {
            Ok(source) => Some(Arc::new(source) as Arc<dyn IncidentSource>),
            Err(e) => {
                warn!(source = config.name.as_str(), error = %e, "Skipping source");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockSource};

    #[tokio::test]
    async fn failing_source_does_not_abort_others() {
        let sources: Vec<Arc<dyn IncidentSource>> = vec![
            Arc::new(MockSource::new("a", Tier::Official, vec![fixtures::death_in_custody()])),
            Arc::new(MockSource::failing("b", Tier::Investigative)),
            Arc::new(MockSource::new(
                "c",
                Tier::Manual,
                vec![fixtures::texas_arrest(), fixtures::texas_arrest()],
            )),
        ];

        let (records, stats) = fetch_all(&sources, 2).await;
        assert_eq!(records.len(), 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.records, 3);
        assert_eq!(records[0].source_name.as_deref(), Some("a"));
        assert_eq!(records[2].source_name.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn stamps_provenance_defaults() {
        let mut bare = fixtures::texas_arrest();
        bare.source_name = None;
        bare.source_tier = None;
        bare.retrieved_at = None;
        bare.id.clear();
        let sources: Vec<Arc<dyn IncidentSource>> =
            vec![Arc::new(MockSource::new("feed", Tier::SystematicNews, vec![bare]))];

        let (records, _) = fetch_all(&sources, 1).await;
        let r = &records[0];
        assert_eq!(r.source_name.as_deref(), Some("feed"));
        assert_eq!(r.source_tier, Some(3));
        assert!(r.retrieved_at.is_some());
        assert!(!r.id.is_empty());
    }

    #[tokio::test]
    async fn no_sources_no_records() {
        let (records, stats) = fetch_all(&[], 4).await;
        assert!(records.is_empty());
        assert_eq!(stats, FetchStats::default());
    }

    #[test]
    fn feed_source_rejects_bad_tier() {
        let config = SourceConfig {
            name: "x".into(),
            url: "https://example.org".into(),
            tier: 0,
            min_interval_ms: 0,
        };
        assert!(JsonFeedSource::new(&config, &GeocoderConfig::default()).is_err());
        assert!(configured_sources(&[config], &GeocoderConfig::default()).is_empty());
    }
}
