//! Cross-source deduplication.
//!
//! 1. Partition records into (year-month, state) buckets.
//! 2. Within a bucket, join every pair that matches into a union-find
//!    forest. Components are transitive: A~B and B~C merges all three.
//! 3. Pick a primary per component (lowest tier, then most complete, then
//!    earliest retrieved) and backfill its empty fields from the siblings.
//! 4. Siblings are marked non-primary and returned separately.
//!
//! Cross-bucket duplicates (a date recorded across a month boundary, a
//! misrecorded state) are not caught.

pub mod union_find;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, info};

use casefile_common::types::{has_text, IncidentRecord};
use casefile_common::SimilarityRules;

pub use union_find::UnionFind;

const NOTES_SEPARATOR: &str = " | ";

/// Result of a deduplication pass.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Primaries and untouched singletons, in input order.
    pub records: Vec<IncidentRecord>,
    /// Records merged away, each pointing at its primary via `canonical_id`.
    pub absorbed: Vec<IncidentRecord>,
    /// Number of components with two or more members.
    pub clusters: usize,
}

impl DedupOutcome {
    pub fn removed(&self) -> usize {
        self.absorbed.len()
    }
}

pub struct Deduplicator {
    threshold: f64,
    rules: SimilarityRules,
}

impl Deduplicator {
    pub fn new(threshold: f64, rules: SimilarityRules) -> Self {
        Self { threshold, rules }
    }

    /// Merged record set without the absorbed duplicates.
    pub fn deduplicate(&self, records: Vec<IncidentRecord>) -> Vec<IncidentRecord> {
        self.run(records).records
    }

    pub fn run(&self, records: Vec<IncidentRecord>) -> DedupOutcome {
        let input = records.len();
        if input == 0 {
            return DedupOutcome::default();
        }

        let buckets = bucketize(&records);
        let mut clusters: Vec<Vec<usize>> = Vec::new();

        for members in buckets.values() {
            if members.len() < 2 {
                continue;
            }
            let mut forest = UnionFind::new(members.len());
            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    let (a, b) = (&records[members[i]], &records[members[j]]);
                    if self.rules.matches(a, b, self.threshold) {
                        forest.union(i, j);
                    }
                }
            }
            clusters.extend(
                forest
                    .groups()
                    .into_iter()
                    .filter(|g| g.len() > 1)
                    .map(|g| g.into_iter().map(|local| members[local]).collect()),
            );
        }

        let mut slots: Vec<Option<IncidentRecord>> = records.into_iter().map(Some).collect();
        let mut absorbed = Vec::new();

        for mut cluster in clusters.iter().cloned() {
            cluster.sort_by(|&a, &b| primary_order(&slots, a, b));
            let primary_idx = cluster[0];
            let Some(mut primary) = slots[primary_idx].take() else {
                continue;
            };

            let siblings: Vec<IncidentRecord> = cluster[1..]
                .iter()
                .filter_map(|&idx| slots[idx].take())
                .collect();

            merge_into(&mut primary, &siblings);
            debug!(
                primary = primary.id.as_str(),
                merged = siblings.len(),
                "Merged duplicate cluster"
            );

            for mut sibling in siblings {
                sibling.is_primary = false;
                sibling.canonical_id = Some(primary.id.clone());
                absorbed.push(sibling);
            }
            slots[primary_idx] = Some(primary);
        }

        let records: Vec<IncidentRecord> = slots.into_iter().flatten().collect();
        info!(
            input,
            output = records.len(),
            buckets = buckets.len(),
            clusters = clusters.len(),
            removed = absorbed.len(),
            "Deduplication complete"
        );

        DedupOutcome {
            records,
            absorbed,
            clusters: clusters.len(),
        }
    }
}

/// Group record indices by (year-month, lower-cased state).
fn bucketize(records: &[IncidentRecord]) -> BTreeMap<(String, String), Vec<usize>> {
    let mut buckets: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        buckets.entry(bucket_key(record)).or_default().push(idx);
    }
    buckets
}

fn bucket_key(record: &IncidentRecord) -> (String, String) {
    let month = match record.parsed_date() {
        Some(date) => date.format("%Y-%m").to_string(),
        // Unparseable dates bucket on their leading text.
        None => record.date.trim().chars().take(7).collect(),
    };
    (month, record.state.trim().to_lowercase())
}

/// Ascending tier, descending completeness, ascending retrieval time
/// (unknown last), then input order.
fn primary_order(slots: &[Option<IncidentRecord>], a: usize, b: usize) -> Ordering {
    let (Some(ra), Some(rb)) = (&slots[a], &slots[b]) else {
        return a.cmp(&b);
    };
    ra.tier
        .cmp(&rb.tier)
        .then_with(|| rb.completeness_score().cmp(&ra.completeness_score()))
        .then_with(|| match (ra.retrieved_at, rb.retrieved_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.cmp(&b))
}

/// Backfill empty fields on `primary` from `siblings` (already in
/// priority order), concatenate distinct notes, and record linkage.
pub fn merge_into(primary: &mut IncidentRecord, siblings: &[IncidentRecord]) {
    for sibling in siblings {
        fill_text(&mut primary.subject_name, &sibling.subject_name);
        fill(&mut primary.subject_age, &sibling.subject_age);
        fill_text(&mut primary.subject_nationality, &sibling.subject_nationality);
        fill_text(&mut primary.subject_category, &sibling.subject_category);
        fill(&mut primary.is_citizen, &sibling.is_citizen);
        fill_text(&mut primary.city, &sibling.city);
        fill_text(&mut primary.county, &sibling.county);
        fill_text(&mut primary.agency, &sibling.agency);
        fill_text(&mut primary.circumstances, &sibling.circumstances);
        fill_text(&mut primary.outcome, &sibling.outcome);
        fill_text(&mut primary.source_url, &sibling.source_url);
        fill_text(&mut primary.source_name, &sibling.source_name);

        if !primary.has_known_outcome() && sibling.has_known_outcome() {
            primary.outcome_category = sibling.outcome_category.clone();
        }

        if !primary.has_coordinates() {
            if let Some(coords) = sibling.coordinates() {
                primary.set_coordinates(coords);
            }
        }

        // Linkage from earlier merges carries over to the new primary.
        for id in std::iter::once(&sibling.id).chain(&sibling.linked_ids) {
            if *id != primary.id && !primary.linked_ids.contains(id) {
                primary.linked_ids.push(id.clone());
            }
        }
    }

    primary.notes = merged_notes(primary, siblings);
    primary.is_primary = true;
    primary.canonical_id = None;
}

fn merged_notes(primary: &IncidentRecord, siblings: &[IncidentRecord]) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for notes in std::iter::once(&primary.notes).chain(siblings.iter().map(|s| &s.notes)) {
        let Some(text) = notes.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            continue;
        };
        // Previously merged notes are split so re-merging stays stable.
        for part in text.split(NOTES_SEPARATOR).map(str::trim) {
            if !part.is_empty() && !parts.contains(&part) {
                parts.push(part);
            }
        }
    }
    (!parts.is_empty()).then(|| parts.join(NOTES_SEPARATOR))
}

fn fill<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
    if target.is_none() {
        target.clone_from(source);
    }
}

fn fill_text(target: &mut Option<String>, source: &Option<String>) {
    if !has_text(target) && has_text(source) {
        target.clone_from(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casefile_common::Tier;
    use chrono::{TimeZone, Utc};

    fn dedup() -> Deduplicator {
        Deduplicator::new(0.8, SimilarityRules::default())
    }

    fn record(date: &str, state: &str, name: &str, tier: Tier) -> IncidentRecord {
        let mut r = IncidentRecord::new(date, state, "shooting_by_agent", tier);
        r.subject_name = Some(name.to_string());
        r.assign_identity();
        r
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let outcome = dedup().run(Vec::new());
        assert!(outcome.records.is_empty());
        assert!(outcome.absorbed.is_empty());
    }

    #[test]
    fn single_record_passes_through_unchanged() {
        let r = record("2025-03-01", "Illinois", "John Smith", Tier::Official);
        let out = dedup().deduplicate(vec![r.clone()]);
        assert_eq!(out, vec![r]);
        assert!(out[0].linked_ids.is_empty());
    }

    #[test]
    fn same_subject_merges_to_lowest_tier() {
        let a = record("2025-03-01", "Illinois", "John Smith", Tier::SystematicNews);
        let b = record("2025-03-01", "Illinois", "John Smith", Tier::Investigative);
        let outcome = dedup().run(vec![a.clone(), b.clone()]);

        assert_eq!(outcome.records.len(), 1);
        let primary = &outcome.records[0];
        assert_eq!(primary.tier, 2);
        assert_eq!(primary.id, b.id);
        assert_eq!(primary.linked_ids, vec![a.id.clone()]);

        assert_eq!(outcome.absorbed.len(), 1);
        assert!(!outcome.absorbed[0].is_primary);
        assert_eq!(outcome.absorbed[0].canonical_id.as_deref(), Some(b.id.as_str()));
    }

    #[test]
    fn primary_keeps_identity_and_gains_sibling_fields() {
        let a = record("2025-03-01", "Illinois", "John Smith", Tier::Official);
        let mut b = record("2025-03-01", "Illinois", "John Smith", Tier::Investigative);
        b.subject_age = Some(34);
        b.subject_nationality = Some("Mexico".into());
        b.city = Some("Chicago".into());
        b.agency = Some("ICE".into());
        b.circumstances = Some("Traffic stop".into());
        b.source_url = Some("https://example.com/b".into());
        b.source_name = Some("Example Times".into());
        b.outcome_category = Some("injury".into());
        b.set_coordinates((41.8781, -87.6298));

        let out = dedup().deduplicate(vec![a.clone(), b]);
        assert_eq!(out.len(), 1);
        let merged = &out[0];
        assert_eq!(merged.id, a.id);
        assert_eq!(merged.tier, 1);
        assert_eq!(merged.subject_age, Some(34));
        assert_eq!(merged.subject_nationality.as_deref(), Some("Mexico"));
        assert_eq!(merged.city.as_deref(), Some("Chicago"));
        assert_eq!(merged.agency.as_deref(), Some("ICE"));
        assert_eq!(merged.circumstances.as_deref(), Some("Traffic stop"));
        assert_eq!(merged.source_url.as_deref(), Some("https://example.com/b"));
        assert_eq!(merged.source_name.as_deref(), Some("Example Times"));
        assert_eq!(merged.outcome_category.as_deref(), Some("injury"));
        assert_eq!(merged.coordinates(), Some((41.8781, -87.6298)));
    }

    #[test]
    fn completeness_then_retrieval_time_break_tier_ties() {
        let mut sparse = record("2025-03-01", "Ohio", "Ana Ruiz", Tier::SystematicNews);
        let mut rich = record("2025-03-01", "Ohio", "Ana Ruiz", Tier::SystematicNews);
        rich.agency = Some("CBP".into());
        rich.source_url = Some("https://example.com".into());
        sparse.retrieved_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        rich.retrieved_at = Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        rich.city = Some("Dayton".into());
        rich.assign_identity();

        let out = dedup().deduplicate(vec![sparse.clone(), rich.clone()]);
        assert_eq!(out[0].id, rich.id);

        // Equal tier and completeness: earliest retrieval wins.
        let mut early = sparse.clone();
        early.retrieved_at = Some(Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        early.subject_name = Some("Ana  Ruiz".into());
        early.assign_identity();
        assert_ne!(early.id, sparse.id);
        let out = dedup().deduplicate(vec![sparse, early.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, early.id);
    }

    #[test]
    fn transitive_chain_merges_into_one_cluster() {
        // a~b by substring, b~c by last name + initial, a~c alone falls short.
        let mut a = record("2025-03-01", "Texas", "Maria Garcia", Tier::SystematicNews);
        let mut b = record("2025-03-02", "Texas", "Maria Garcia Lopez", Tier::SystematicNews);
        let mut c = record("2025-03-04", "Texas", "M. Lopez", Tier::SystematicNews);
        for r in [&mut a, &mut b, &mut c] {
            r.incident_type = "arrest".into();
            r.assign_identity();
        }

        let rules = SimilarityRules::default();
        assert!(rules.matches(&a, &b, 0.8));
        assert!(rules.matches(&b, &c, 0.8));
        assert!(!rules.matches(&a, &c, 0.8));

        let outcome = dedup().run(vec![a, b, c]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.clusters, 1);
        assert_eq!(outcome.records[0].linked_ids.len(), 2);
    }

    #[test]
    fn different_months_or_states_never_compare() {
        let a = record("2025-03-31", "Illinois", "John Smith", Tier::Official);
        let b = record("2025-04-01", "Illinois", "John Smith", Tier::Official);
        let c = record("2025-03-31", "Indiana", "John Smith", Tier::Official);
        assert_eq!(dedup().deduplicate(vec![a, b, c]).len(), 3);
    }

    #[test]
    fn notes_are_concatenated_without_repeats() {
        let mut a = record("2025-03-01", "Illinois", "John Smith", Tier::Official);
        a.notes = Some("Confirmed by family".into());
        let mut b = record("2025-03-01", "Illinois", "John Smith", Tier::Investigative);
        b.notes = Some("Bodycam requested".into());
        let mut c = record("2025-03-02", "Illinois", "John Smith", Tier::SystematicNews);
        c.notes = Some("Confirmed by family".into());

        let out = dedup().deduplicate(vec![a, b, c]);
        assert_eq!(
            out[0].notes.as_deref(),
            Some("Confirmed by family | Bodycam requested")
        );
    }

    #[test]
    fn identical_ids_do_not_self_link() {
        let a = record("2025-03-01", "Illinois", "John Smith", Tier::Official);
        let out = dedup().deduplicate(vec![a.clone(), a.clone()]);
        assert_eq!(out.len(), 1);
        assert!(out[0].linked_ids.is_empty());
    }

    #[test]
    fn malformed_records_do_not_panic() {
        let blank = IncidentRecord {
            id: "blank".into(),
            ..IncidentRecord::default()
        };
        let mut bad_date = record("someday", "", "John Smith", Tier::Manual);
        bad_date.state = String::new();
        let out = dedup().deduplicate(vec![blank.clone(), blank, bad_date]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn output_preserves_input_order() {
        let a = record("2025-05-01", "Texas", "Jane Doe", Tier::Manual);
        let b = record("2025-03-01", "Illinois", "John Smith", Tier::Official);
        let c = record("2025-01-01", "Ohio", "Ana Ruiz", Tier::Official);
        let ids: Vec<String> = dedup()
            .deduplicate(vec![a.clone(), b.clone(), c.clone()])
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn earlier_linkage_carries_over() {
        let mut previous = record("2025-03-01", "Illinois", "John Smith", Tier::SystematicNews);
        previous.linked_ids = vec!["T3-SA-older".into()];
        let better = record("2025-03-02", "Illinois", "John Smith", Tier::Official);

        let out = dedup().deduplicate(vec![previous.clone(), better.clone()]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, better.id);
        assert_eq!(out[0].linked_ids, vec![previous.id, "T3-SA-older".to_string()]);
    }
}
