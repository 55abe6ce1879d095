use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// --- Tier ---

/// Source reliability tier. Lower numbers are more authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Official reports.
    Official = 1,
    /// Investigative journalism.
    Investigative = 2,
    /// Systematic news search.
    SystematicNews = 3,
    /// Manual imports and everything else.
    Manual = 4,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::Official,
        Tier::Investigative,
        Tier::SystematicNews,
        Tier::Manual,
    ];

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Tier::Official),
            2 => Some(Tier::Investigative),
            3 => Some(Tier::SystematicNews),
            4 => Some(Tier::Manual),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }

    /// Prefix used in record identities.
    pub fn code(self) -> &'static str {
        match self {
            Tier::Official => "T1",
            Tier::Investigative => "T2",
            Tier::SystematicNews => "T3",
            Tier::Manual => "T4",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier{}", self.number())
    }
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePrecision {
    #[default]
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentScale {
    Single,
    Small,
    Medium,
    Large,
    Mass,
}

impl IncidentScale {
    pub const ALL: [IncidentScale; 5] = [
        IncidentScale::Single,
        IncidentScale::Small,
        IncidentScale::Medium,
        IncidentScale::Large,
        IncidentScale::Mass,
    ];

    /// Fixed thresholds: 1, 2-5, 6-50, 51-200, >200. A count of zero is
    /// treated as a single affected person.
    pub fn from_count(count: u32) -> Self {
        match count {
            0..=1 => IncidentScale::Single,
            2..=5 => IncidentScale::Small,
            6..=50 => IncidentScale::Medium,
            51..=200 => IncidentScale::Large,
            _ => IncidentScale::Mass,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentScale::Single => "single",
            IncidentScale::Small => "small",
            IncidentScale::Medium => "medium",
            IncidentScale::Large => "large",
            IncidentScale::Mass => "mass",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for IncidentScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    Death,
    Injury,
    Arrest,
    Detention,
    Deportation,
    Release,
    Unknown,
}

impl OutcomeCategory {
    pub const ALL: [OutcomeCategory; 7] = [
        OutcomeCategory::Death,
        OutcomeCategory::Injury,
        OutcomeCategory::Arrest,
        OutcomeCategory::Detention,
        OutcomeCategory::Deportation,
        OutcomeCategory::Release,
        OutcomeCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeCategory::Death => "death",
            OutcomeCategory::Injury => "injury",
            OutcomeCategory::Arrest => "arrest",
            OutcomeCategory::Detention => "detention",
            OutcomeCategory::Deportation => "deportation",
            OutcomeCategory::Release => "release",
            OutcomeCategory::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Incident Record ---

/// The canonical incident record shared by every pipeline stage.
///
/// Raw producer values are kept as strings/integers where validation needs
/// to see malformed input (`date`, `tier`, `incident_scale`). Empty and
/// absent fields are omitted when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentRecord {
    pub id: String,

    // Temporal
    pub date: String,
    pub date_precision: DatePrecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieved_at: Option<DateTime<Utc>>,

    // Location
    pub state: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub county: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    // Subject
    #[serde(skip_serializing_if = "is_blank")]
    pub subject_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_age: Option<i32>,
    #[serde(skip_serializing_if = "is_blank")]
    pub subject_nationality: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub subject_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_citizen: Option<bool>,

    // Incident semantics
    pub incident_type: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub outcome_category: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub circumstances: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub agency: Option<String>,

    // Scale
    pub affected_count: u32,
    #[serde(skip_serializing_if = "is_blank")]
    pub incident_scale: Option<String>,

    // Provenance
    pub tier: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tier: Option<u8>,
    #[serde(skip_serializing_if = "is_blank")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub source_name: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub collection_method: Option<String>,
    pub verified: bool,

    // Relational
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub linked_ids: Vec<String>,
    pub is_primary: bool,
    #[serde(skip_serializing_if = "is_blank")]
    pub canonical_id: Option<String>,
}

impl Default for IncidentRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            date: String::new(),
            date_precision: DatePrecision::Day,
            retrieved_at: None,
            state: String::new(),
            city: None,
            county: None,
            latitude: None,
            longitude: None,
            subject_name: None,
            subject_age: None,
            subject_nationality: None,
            subject_category: None,
            is_citizen: None,
            incident_type: String::new(),
            outcome: None,
            outcome_category: None,
            circumstances: None,
            notes: None,
            agency: None,
            affected_count: 1,
            incident_scale: None,
            tier: Tier::Manual.number(),
            source_tier: None,
            source_url: None,
            source_name: None,
            collection_method: None,
            verified: false,
            linked_ids: Vec::new(),
            is_primary: true,
            canonical_id: None,
        }
    }
}

impl IncidentRecord {
    /// Minimal record as a producer would emit it. The identity is derived
    /// from the given fields.
    pub fn new(date: &str, state: &str, incident_type: &str, tier: Tier) -> Self {
        let mut record = Self {
            date: date.to_string(),
            state: state.to_string(),
            incident_type: incident_type.to_string(),
            tier: tier.number(),
            retrieved_at: Some(Utc::now()),
            ..Self::default()
        };
        record.assign_identity();
        record
    }

    /// Recompute and store the content-derived identity.
    pub fn assign_identity(&mut self) {
        self.id = crate::identity::generate_identity(self);
    }

    pub fn tier_level(&self) -> Option<Tier> {
        Tier::from_number(self.tier)
    }

    /// Calendar date, accepting `YYYY-MM-DD` or a full RFC 3339 timestamp.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_date(&self.date)
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    pub fn set_coordinates(&mut self, (lat, lon): (f64, f64)) {
        self.latitude = Some(lat);
        self.longitude = Some(lon);
    }

    /// Number of populated fields from the fixed completeness list.
    /// Breaks tier ties when selecting a cluster's primary record.
    pub fn completeness_score(&self) -> usize {
        let text_fields = [
            &self.subject_name,
            &self.subject_nationality,
            &self.city,
            &self.agency,
            &self.circumstances,
            &self.notes,
            &self.source_url,
            &self.source_name,
        ];
        let populated = text_fields.iter().filter(|f| has_text(f)).count();
        populated
            + usize::from(self.subject_age.is_some())
            + usize::from(self.has_known_outcome())
    }

    /// An outcome category other than empty or `unknown`.
    pub fn has_known_outcome(&self) -> bool {
        match self.outcome_category.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(value) => OutcomeCategory::parse(value) != Some(OutcomeCategory::Unknown),
        }
    }
}

/// Parse an ISO calendar date, tolerating a trailing time component.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.date_naive())
    })
}

/// True when the optional string holds non-whitespace text.
pub fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn is_blank(value: &Option<String>) -> bool {
    !has_text(value)
}
