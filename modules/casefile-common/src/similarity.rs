//! Weighted field matching used to decide whether two records describe the
//! same event.
//!
//! Each field contributes only when both records populate it:
//!
//! | field | weight | rule |
//! |---|---|---|
//! | date | 1.0 | exact = 1.0, within the date window = 0.5 |
//! | state | 1.0 | case-insensitive equality |
//! | subject name | 2.0 | name rule (see [`NameMatching`]) |
//! | city | 0.5 | case-insensitive equality |
//! | incident type | 0.5 | exact equality |
//!
//! The score is achieved / possible weight. No comparable fields means no
//! match, whatever the threshold.

use crate::types::{parse_date, IncidentRecord};

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.8;
pub const DEFAULT_DATE_WINDOW_DAYS: i64 = 3;

const DATE_WEIGHT: f64 = 1.0;
const STATE_WEIGHT: f64 = 1.0;
const NAME_WEIGHT: f64 = 2.0;
const CITY_WEIGHT: f64 = 0.5;
const TYPE_WEIGHT: f64 = 0.5;

/// How subject names are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NameMatching {
    /// Exact, substring, or same last name with the same first initial.
    /// Known to over-merge common surnames.
    #[default]
    Loose,
    /// Levenshtein distance on the full lower-cased names.
    Strict { max_distance: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub achieved: f64,
    pub possible: f64,
}

impl MatchScore {
    /// `None` when the records had no comparable fields.
    pub fn ratio(&self) -> Option<f64> {
        (self.possible > 0.0).then(|| self.achieved / self.possible)
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.ratio().is_some_and(|r| r >= threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityRules {
    pub date_window_days: i64,
    pub name_matching: NameMatching,
}

impl Default for SimilarityRules {
    fn default() -> Self {
        Self {
            date_window_days: DEFAULT_DATE_WINDOW_DAYS,
            name_matching: NameMatching::Loose,
        }
    }
}

impl SimilarityRules {
    pub fn score(&self, a: &IncidentRecord, b: &IncidentRecord) -> MatchScore {
        let mut score = MatchScore {
            achieved: 0.0,
            possible: 0.0,
        };

        if !a.date.trim().is_empty() && !b.date.trim().is_empty() {
            score.possible += DATE_WEIGHT;
            score.achieved += DATE_WEIGHT * self.date_factor(&a.date, &b.date);
        }

        if !a.state.trim().is_empty() && !b.state.trim().is_empty() {
            score.possible += STATE_WEIGHT;
            if eq_ignore_case(&a.state, &b.state) {
                score.achieved += STATE_WEIGHT;
            }
        }

        if let (Some(na), Some(nb)) = (text(&a.subject_name), text(&b.subject_name)) {
            score.possible += NAME_WEIGHT;
            if self.names_match(na, nb) {
                score.achieved += NAME_WEIGHT;
            }
        }

        if let (Some(ca), Some(cb)) = (text(&a.city), text(&b.city)) {
            score.possible += CITY_WEIGHT;
            if eq_ignore_case(ca, cb) {
                score.achieved += CITY_WEIGHT;
            }
        }

        if !a.incident_type.trim().is_empty() && !b.incident_type.trim().is_empty() {
            score.possible += TYPE_WEIGHT;
            if a.incident_type.trim() == b.incident_type.trim() {
                score.achieved += TYPE_WEIGHT;
            }
        }

        score
    }

    pub fn matches(&self, a: &IncidentRecord, b: &IncidentRecord, threshold: f64) -> bool {
        self.score(a, b).meets(threshold)
    }

    pub fn names_match(&self, a: &str, b: &str) -> bool {
        match self.name_matching {
            NameMatching::Loose => loose_names_match(a, b),
            NameMatching::Strict { max_distance } => {
                let a = normalize_name(a);
                let b = normalize_name(b);
                !a.is_empty() && strsim::levenshtein(&a, &b) <= max_distance
            }
        }
    }

    fn date_factor(&self, a: &str, b: &str) -> f64 {
        match (parse_date(a), parse_date(b)) {
            (Some(da), Some(db)) => {
                let days = (da - db).num_days().abs();
                if days == 0 {
                    1.0
                } else if days <= self.date_window_days {
                    0.5
                } else {
                    0.0
                }
            }
            // Unparseable dates only match on identical text.
            _ if a.trim() == b.trim() => 1.0,
            _ => 0.0,
        }
    }
}

/// Score two records with the default rules.
pub fn similarity(a: &IncidentRecord, b: &IncidentRecord) -> MatchScore {
    SimilarityRules::default().score(a, b)
}

/// True iff the default-rule score reaches `threshold`.
pub fn matches(a: &IncidentRecord, b: &IncidentRecord, threshold: f64) -> bool {
    SimilarityRules::default().matches(a, b, threshold)
}

fn loose_names_match(a: &str, b: &str) -> bool {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b || a.contains(&b) || b.contains(&a) {
        return true;
    }

    let ta: Vec<&str> = a.split(' ').collect();
    let tb: Vec<&str> = b.split(' ').collect();
    if ta.len() < 2 || tb.len() < 2 {
        return false;
    }
    let last_a = ta[ta.len() - 1].trim_matches(|c: char| !c.is_alphanumeric());
    let last_b = tb[tb.len() - 1].trim_matches(|c: char| !c.is_alphanumeric());
    !last_a.is_empty() && last_a == last_b && ta[0].chars().next() == tb[0].chars().next()
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn text(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}
