//! Controlled vocabularies shared by the validator and normalizer.
//!
//! The built-in tables are static; `Vocabulary` layers configured
//! extensions on top of them so new incident types or aliases can be
//! added without a release.

use std::collections::{BTreeSet, HashMap};

/// Canonical state names with their postal abbreviations.
pub const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("PR", "Puerto Rico"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// Informal spellings that should resolve to a canonical state.
const STATE_ALIASES: &[(&str, &str)] = &[
    ("d.c.", "District of Columbia"),
    ("washington dc", "District of Columbia"),
    ("washington d.c.", "District of Columbia"),
    ("calif.", "California"),
    ("mass.", "Massachusetts"),
    ("penn.", "Pennsylvania"),
    ("tex.", "Texas"),
];

/// Canonical incident types with their 2-character identity codes.
pub const INCIDENT_TYPES: &[(&str, &str)] = &[
    ("death_in_custody", "DC"),
    ("death_during_operation", "DO"),
    ("shooting_by_agent", "SA"),
    ("shooting_at_agent", "SG"),
    ("less_lethal", "LL"),
    ("physical_force", "PF"),
    ("chemical_agent", "CA"),
    ("taser", "TS"),
    ("vehicle_pursuit", "VP"),
    ("medical_neglect", "MN"),
    ("wrongful_detention", "WD"),
    ("wrongful_arrest", "WA"),
    ("raid", "RD"),
    ("arrest", "AR"),
    ("detention", "DT"),
    ("deportation", "DP"),
    ("protest_clash", "PC"),
    ("other", "OT"),
];

/// Direct alias → canonical incident type. Keys are lower-case.
const INCIDENT_TYPE_ALIASES: &[(&str, &str)] = &[
    ("shooting", "shooting_by_agent"),
    ("agent shooting", "shooting_by_agent"),
    ("officer involved shooting", "shooting_by_agent"),
    ("ois", "shooting_by_agent"),
    ("death", "death_in_custody"),
    ("custody death", "death_in_custody"),
    ("in-custody death", "death_in_custody"),
    ("pepper spray", "chemical_agent"),
    ("tear gas", "chemical_agent"),
    ("rubber bullets", "less_lethal"),
    ("stun gun", "taser"),
    ("car chase", "vehicle_pursuit"),
    ("use of force", "physical_force"),
    ("excessive force", "physical_force"),
    ("detained", "detention"),
    ("arrested", "arrest"),
    ("deported", "deportation"),
    ("workplace raid", "raid"),
];

/// Keyword containment fallback for incident types. First match wins, so
/// more specific keywords come first.
const INCIDENT_TYPE_KEYWORDS: &[(&str, &str)] = &[
    ("died in custody", "death_in_custody"),
    ("death in custody", "death_in_custody"),
    ("shot at agent", "shooting_at_agent"),
    ("shooting", "shooting_by_agent"),
    ("shot", "shooting_by_agent"),
    ("gunfire", "shooting_by_agent"),
    ("pepper ball", "less_lethal"),
    ("rubber bullet", "less_lethal"),
    ("tear gas", "chemical_agent"),
    ("pepper", "chemical_agent"),
    ("taser", "taser"),
    ("pursuit", "vehicle_pursuit"),
    ("chase", "vehicle_pursuit"),
    ("medical", "medical_neglect"),
    ("neglect", "medical_neglect"),
    ("force", "physical_force"),
    ("beaten", "physical_force"),
    ("raid", "raid"),
    ("protest", "protest_clash"),
    ("deport", "deportation"),
    ("detain", "detention"),
    ("arrest", "arrest"),
    ("death", "death_during_operation"),
    ("killed", "death_during_operation"),
];

/// Keyword containment table for outcome categories.
pub const OUTCOME_KEYWORDS: &[(&str, &str)] = &[
    ("died", "death"),
    ("death", "death"),
    ("dead", "death"),
    ("killed", "death"),
    ("fatal", "death"),
    ("deceased", "death"),
    ("injur", "injury"),
    ("wound", "injury"),
    ("hospital", "injury"),
    ("hurt", "injury"),
    ("arrest", "arrest"),
    ("detain", "detention"),
    ("detention", "detention"),
    ("custody", "detention"),
    ("deport", "deportation"),
    ("removed", "deportation"),
    ("removal", "deportation"),
    ("released", "release"),
    ("release", "release"),
    ("freed", "release"),
];

/// Canonical subject categories.
pub const SUBJECT_CATEGORIES: &[&str] = &[
    "us_citizen",
    "lawful_permanent_resident",
    "visa_holder",
    "asylum_seeker",
    "refugee",
    "undocumented",
    "protester",
    "journalist",
    "bystander",
    "officer",
];

/// Negated citizenship phrases. These are removed before keyword matching
/// so they never read as `us_citizen`.
const NEGATED_CITIZENSHIP: &[&str] = &[
    "non-citizen",
    "non citizen",
    "noncitizen",
    "not a u.s. citizen",
    "not a us citizen",
    "not a citizen",
    "not citizen",
];

/// Keyword containment table for subject categories.
const SUBJECT_CATEGORY_KEYWORDS: &[(&str, &str)] = &[
    ("citizen", "us_citizen"),
    ("green card", "lawful_permanent_resident"),
    ("permanent resident", "lawful_permanent_resident"),
    ("visa", "visa_holder"),
    ("asylum", "asylum_seeker"),
    ("refugee", "refugee"),
    ("undocumented", "undocumented"),
    ("unauthorized", "undocumented"),
    ("protest", "protester"),
    ("demonstrator", "protester"),
    ("journalist", "journalist"),
    ("reporter", "journalist"),
    ("bystander", "bystander"),
    ("officer", "officer"),
    ("agent", "officer"),
];

/// Built-in vocabulary plus configured extensions.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    incident_types: BTreeSet<String>,
    type_aliases: HashMap<String, String>,
    state_lookup: HashMap<String, &'static str>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(&[], &HashMap::new())
    }
}

impl Vocabulary {
    /// Build the vocabulary, adding extra incident types and aliases.
    /// Alias keys are matched case-insensitively.
    pub fn new(extra_types: &[String], extra_aliases: &HashMap<String, String>) -> Self {
        let mut incident_types: BTreeSet<String> = INCIDENT_TYPES
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        incident_types.extend(extra_types.iter().map(|t| t.trim().to_lowercase()));

        let mut type_aliases: HashMap<String, String> = INCIDENT_TYPE_ALIASES
            .iter()
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect();
        for (alias, canonical) in extra_aliases {
            type_aliases.insert(alias.trim().to_lowercase(), canonical.trim().to_string());
        }

        let mut state_lookup = HashMap::new();
        for (abbr, name) in STATES {
            state_lookup.insert(abbr.to_lowercase(), *name);
            state_lookup.insert(name.to_lowercase(), *name);
        }
        for (alias, name) in STATE_ALIASES {
            state_lookup.insert(alias.to_string(), *name);
        }

        Self {
            incident_types,
            type_aliases,
            state_lookup,
        }
    }

    /// Canonical state name for an abbreviation, alias or any casing of
    /// the full name.
    pub fn canonical_state(&self, raw: &str) -> Option<&'static str> {
        self.state_lookup.get(&raw.trim().to_lowercase()).copied()
    }

    pub fn is_incident_type(&self, value: &str) -> bool {
        self.incident_types.contains(value)
    }

    pub fn type_alias(&self, raw: &str) -> Option<&str> {
        self.type_aliases
            .get(&raw.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn type_by_keyword(&self, raw: &str) -> Option<&'static str> {
        keyword_match(INCIDENT_TYPE_KEYWORDS, raw)
    }

    pub fn outcome_by_keyword(&self, raw: &str) -> Option<&'static str> {
        keyword_match(OUTCOME_KEYWORDS, raw)
    }

    pub fn is_subject_category(&self, value: &str) -> bool {
        SUBJECT_CATEGORIES.contains(&value)
    }

    pub fn subject_category_by_keyword(&self, raw: &str) -> Option<&'static str> {
        let lowered = NEGATED_CITIZENSHIP
            .iter()
            .fold(raw.to_lowercase(), |text, phrase| text.replace(phrase, " "));
        keyword_match(SUBJECT_CATEGORY_KEYWORDS, &lowered)
    }
}

/// 2-character identity code for an incident type. Unknown types fall
/// back to their first two alphanumeric characters.
pub fn type_code(incident_type: &str) -> String {
    let normalized = incident_type.trim().to_lowercase();
    if let Some((_, code)) = INCIDENT_TYPES.iter().find(|(name, _)| *name == normalized) {
        return (*code).to_string();
    }
    let code: String = normalized
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(2)
        .collect::<String>()
        .to_uppercase();
    match code.len() {
        2 => code,
        1 => format!("{code}X"),
        _ => "XX".to_string(),
    }
}

fn keyword_match(table: &[(&str, &'static str)], raw: &str) -> Option<&'static str> {
    let lowered = raw.to_lowercase();
    table
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, value)| *value)
}
