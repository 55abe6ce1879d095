//! Field canonicalization against the controlled vocabularies.
//!
//! Every rule is a pure rewrite and idempotent on its own, so normalizing
//! an already-normalized batch is a no-op.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use casefile_common::types::{IncidentRecord, IncidentScale, OutcomeCategory};
use casefile_common::Vocabulary;

/// Fallback for records that reach normalization without a type.
const FALLBACK_INCIDENT_TYPE: &str = "other";

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-]+").expect("valid regex"));

pub struct Normalizer {
    vocab: Vocabulary,
}

impl Normalizer {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    pub fn normalize(&self, record: &mut IncidentRecord) {
        if let Some(state) = self.vocab.canonical_state(&record.state) {
            record.state = state.to_string();
        }

        if let Some(city) = record.city.as_deref() {
            record.city = Some(normalize_city(city)).filter(|c| !c.is_empty());
        }

        // Coordinates come in pairs; a lone value is cleared so geocoding
        // can fill both.
        if record.latitude.is_some() != record.longitude.is_some() {
            debug!(id = record.id.as_str(), "Clearing lone coordinate");
            record.latitude = None;
            record.longitude = None;
        }

        record.incident_type = self.normalize_incident_type(&record.incident_type);
        record.outcome_category = Some(self.outcome_category(record).to_string());

        if let Some(category) = record.subject_category.as_deref() {
            record.subject_category = Some(self.subject_category(category));
        }

        let scale = IncidentScale::from_count(record.affected_count);
        record.incident_scale = Some(scale.as_str().to_string());

        if record.source_tier.is_none() {
            record.source_tier = Some(record.tier);
        }

        if record.id.is_empty() {
            record.assign_identity();
        }
    }

    pub fn normalize_batch(&self, records: &mut [IncidentRecord]) {
        for record in records.iter_mut() {
            self.normalize(record);
        }
        info!(records = records.len(), "Normalization complete");
    }

    /// Alias table, then keyword containment, then a synthesized
    /// snake_case type. Always yields a non-empty type.
    pub fn normalize_incident_type(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return FALLBACK_INCIDENT_TYPE.to_string();
        }
        if self.vocab.is_incident_type(trimmed) {
            return trimmed.to_string();
        }
        if let Some(canonical) = self.vocab.type_alias(trimmed) {
            return canonical.to_string();
        }
        if let Some(canonical) = self.vocab.type_by_keyword(trimmed) {
            return canonical.to_string();
        }
        SEPARATORS
            .replace_all(trimmed, "_")
            .trim_matches('_')
            .to_lowercase()
    }

    fn outcome_category(&self, record: &IncidentRecord) -> &'static str {
        if let Some(outcome) = record.outcome.as_deref().filter(|o| !o.trim().is_empty()) {
            return self
                .vocab
                .outcome_by_keyword(outcome)
                .unwrap_or(OutcomeCategory::Unknown.as_str());
        }
        record
            .outcome_category
            .as_deref()
            .and_then(OutcomeCategory::parse)
            .unwrap_or(OutcomeCategory::Unknown)
            .as_str()
    }

    /// Unmatched categories pass through unchanged.
    fn subject_category(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if self.vocab.is_subject_category(trimmed) {
            return trimmed.to_string();
        }
        self.vocab
            .subject_category_by_keyword(trimmed)
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string())
    }
}

/// Title-case a city name and fix common abbreviations.
pub fn normalize_city(raw: &str) -> String {
    let mut words: Vec<String> = raw.split_whitespace().map(title_case_word).collect();

    for word in words.iter_mut() {
        match word.as_str() {
            "St" => *word = "St.".to_string(),
            "Ft" | "Ft." => *word = "Fort".to_string(),
            _ => {}
        }
    }
    if let Some(last) = words.last_mut() {
        if last == "Dc" || last == "D.c." {
            *last = "DC".to_string();
        }
    }

    words.join(" ")
}

fn title_case_word(word: &str) -> String {
    word.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use casefile_common::Tier;

    fn normalizer() -> Normalizer {
        Normalizer::new(Vocabulary::default())
    }

    fn record() -> IncidentRecord {
        IncidentRecord::new("2025-03-01", "il", "Shooting", Tier::SystematicNews)
    }

    #[test]
    fn canonicalizes_state() {
        let mut r = record();
        normalizer().normalize(&mut r);
        assert_eq!(r.state, "Illinois");

        r.state = "Ontario".into();
        normalizer().normalize(&mut r);
        assert_eq!(r.state, "Ontario");
    }

    #[test]
    fn city_title_case_and_abbreviations() {
        assert_eq!(normalize_city("  saint   louis "), "Saint Louis");
        assert_eq!(normalize_city("st paul"), "St. Paul");
        assert_eq!(normalize_city("FT worth"), "Fort Worth");
        assert_eq!(normalize_city("washington dc"), "Washington DC");
        assert_eq!(normalize_city("winston-salem"), "Winston-Salem");
        assert_eq!(normalize_city("St. Paul"), "St. Paul");
    }

    #[test]
    fn incident_type_resolution_order() {
        let n = normalizer();
        assert_eq!(n.normalize_incident_type("arrest"), "arrest");
        assert_eq!(n.normalize_incident_type("Shooting"), "shooting_by_agent");
        assert_eq!(n.normalize_incident_type("Tear gas used on crowd"), "chemical_agent");
        assert_eq!(n.normalize_incident_type("Home  Visit - Knock"), "home_visit_knock");
        assert_eq!(n.normalize_incident_type(""), "other");
    }

    #[test]
    fn outcome_category_from_text() {
        let n = normalizer();
        let mut r = record();
        r.outcome = Some("Pronounced dead at scene".into());
        n.normalize(&mut r);
        assert_eq!(r.outcome_category.as_deref(), Some("death"));

        let mut r = record();
        r.outcome = Some("Case pending".into());
        n.normalize(&mut r);
        assert_eq!(r.outcome_category.as_deref(), Some("unknown"));

        let mut r = record();
        r.outcome_category = Some("Deportation".into());
        n.normalize(&mut r);
        assert_eq!(r.outcome_category.as_deref(), Some("deportation"));
    }

    #[test]
    fn subject_category_passes_unmatched_through() {
        let n = normalizer();
        let mut r = record();
        r.subject_category = Some("Asylum applicant".into());
        n.normalize(&mut r);
        assert_eq!(r.subject_category.as_deref(), Some("asylum_seeker"));

        r.subject_category = Some("tourist".into());
        n.normalize(&mut r);
        assert_eq!(r.subject_category.as_deref(), Some("tourist"));
    }

    #[test]
    fn negated_citizenship_is_not_us_citizen() {
        let n = normalizer();
        for raw in ["non-citizen", "Noncitizen", "not a citizen", "Non citizen"] {
            let mut r = record();
            r.subject_category = Some(raw.into());
            n.normalize(&mut r);
            assert_eq!(r.subject_category.as_deref(), Some(raw), "{raw}");
        }

        let mut r = record();
        r.subject_category = Some("non-citizen on a student visa".into());
        n.normalize(&mut r);
        assert_eq!(r.subject_category.as_deref(), Some("visa_holder"));

        r.subject_category = Some("U.S. citizen".into());
        n.normalize(&mut r);
        assert_eq!(r.subject_category.as_deref(), Some("us_citizen"));
    }

    #[test]
    fn lone_coordinate_is_cleared() {
        let n = normalizer();
        let mut r = record();
        r.latitude = Some(38.5);
        n.normalize(&mut r);
        assert_eq!(r.coordinates(), None);
        assert_eq!(r.latitude, None);

        r.set_coordinates((38.5, -98.0));
        n.normalize(&mut r);
        assert_eq!(r.coordinates(), Some((38.5, -98.0)));
    }

    #[test]
    fn scale_always_recomputed() {
        let n = normalizer();
        for (count, expected) in [
            (1, "single"),
            (3, "small"),
            (20, "medium"),
            (100, "large"),
            (500, "mass"),
        ] {
            let mut r = record();
            r.affected_count = count;
            r.incident_scale = Some("single".into());
            n.normalize(&mut r);
            assert_eq!(r.incident_scale.as_deref(), Some(expected), "count {count}");
        }
    }

    #[test]
    fn source_tier_defaults_to_collection_tier() {
        let n = normalizer();
        let mut r = record();
        n.normalize(&mut r);
        assert_eq!(r.source_tier, Some(3));

        r.source_tier = Some(1);
        n.normalize(&mut r);
        assert_eq!(r.source_tier, Some(1));
    }

    #[test]
    fn normalize_batch_is_idempotent() {
        let n = normalizer();
        let mut a = record();
        a.city = Some("ft lauderdale".into());
        a.outcome = Some("released after 3 days".into());
        a.subject_category = Some("green card holder".into());
        a.affected_count = 12;
        let mut b = IncidentRecord::new("2025-04-02", "new york", "Knock-and-talk visit", Tier::Manual);
        b.city = Some("new york".into());
        b.subject_category = Some("tourist".into());

        let mut batch = vec![a, b];
        n.normalize_batch(&mut batch);
        let once = batch.clone();
        n.normalize_batch(&mut batch);
        assert_eq!(batch, once);
    }
}
