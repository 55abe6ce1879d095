use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::{CasefileError, Result};
use crate::similarity::{
    NameMatching, SimilarityRules, DEFAULT_DATE_WINDOW_DAYS, DEFAULT_MATCH_THRESHOLD,
};
use crate::types::Tier;
use crate::vocab::Vocabulary;

/// Nominatim search endpoint used when external geocoding is enabled.
pub const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";

/// TOML-backed configuration. Every field has a default, so an empty or
/// missing file yields a usable config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CasefileConfig {
    pub paths: PathsConfig,
    pub dedup: DedupConfig,
    pub geocoder: GeocoderConfig,
    pub vocabulary: VocabularyConfig,
    /// Remote JSON feeds fetched by `casefile fetch` and `casefile run`.
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    /// Directory holding `tier{N}_{category}.json` outputs.
    pub data_dir: PathBuf,
    pub geocode_cache: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            geocode_cache: PathBuf::from("data/geocode_cache.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatchingMode {
    #[default]
    Loose,
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DedupConfig {
    pub threshold: f64,
    pub date_window_days: i64,
    pub name_matching: NameMatchingMode,
    /// Only used in strict mode.
    pub max_name_distance: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            date_window_days: DEFAULT_DATE_WINDOW_DAYS,
            name_matching: NameMatchingMode::Loose,
            max_name_distance: 2,
        }
    }
}

impl DedupConfig {
    pub fn similarity_rules(&self) -> SimilarityRules {
        let name_matching = match self.name_matching {
            NameMatchingMode::Loose => NameMatching::Loose,
            NameMatchingMode::Strict => NameMatching::Strict {
                max_distance: self.max_name_distance,
            },
        };
        SimilarityRules {
            date_window_days: self.date_window_days,
            name_matching,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GeocoderConfig {
    pub external_enabled: bool,
    pub endpoint: String,
    pub user_agent: String,
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            external_enabled: false,
            endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            user_agent: "casefile/0.1".to_string(),
            min_interval_ms: 1000,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    /// Reliability tier stamped on rows that do not carry one.
    pub tier: u8,
    #[serde(default = "default_source_interval_ms")]
    pub min_interval_ms: u64,
}

fn default_source_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VocabularyConfig {
    pub extra_incident_types: Vec<String>,
    pub extra_type_aliases: HashMap<String, String>,
}

impl VocabularyConfig {
    pub fn build(&self) -> Vocabulary {
        Vocabulary::new(&self.extra_incident_types, &self.extra_type_aliases)
    }
}

impl CasefileConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CasefileError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| CasefileError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CasefileError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Load from `CASEFILE_CONFIG` (if set) and apply environment
    /// overrides. A `.env` file is honoured.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(None)
    }

    /// Like [`from_env`](Self::from_env), but an explicit `path` takes
    /// precedence over `CASEFILE_CONFIG`.
    pub fn from_env_with(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match (path, env::var("CASEFILE_CONFIG")) {
            (Some(path), _) => Self::load(path)?,
            (None, Ok(path)) => Self::load(Path::new(&path))?,
            (None, Err(_)) => Self::default(),
        };

        if let Ok(dir) = env::var("CASEFILE_DATA_DIR") {
            config.paths.data_dir = PathBuf::from(dir);
        }
        if let Ok(flag) = env::var("CASEFILE_GEOCODER_EXTERNAL") {
            config.geocoder.external_enabled = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(raw) = env::var("CASEFILE_DEDUP_THRESHOLD") {
            config.dedup.threshold = raw.parse().map_err(|_| {
                CasefileError::Config(format!("CASEFILE_DEDUP_THRESHOLD must be a number, got {raw:?}"))
            })?;
        }

        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.dedup.threshold) {
            return Err(CasefileError::Config(format!(
                "dedup.threshold must be within [0, 1], got {}",
                self.dedup.threshold
            )));
        }
        for source in &self.sources {
            if Tier::from_number(source.tier).is_none() {
                return Err(CasefileError::Config(format!(
                    "source {:?}: tier must be 1-4, got {}",
                    source.name, source.tier
                )));
            }
        }
        if self.dedup.date_window_days < 0 {
            return Err(CasefileError::Config(
                "dedup.date_window_days must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Log the effective configuration. Contains no secrets.
    pub fn log_redacted(&self) {
        info!(
            data_dir = %self.paths.data_dir.display(),
            geocode_cache = %self.paths.geocode_cache.display(),
            threshold = self.dedup.threshold,
            date_window_days = self.dedup.date_window_days,
            name_matching = ?self.dedup.name_matching,
            external_geocoding = self.geocoder.external_enabled,
            sources = self.sources.len(),
            "Loaded configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = CasefileConfig::parse("").unwrap();
        assert_eq!(config.dedup.threshold, 0.8);
        assert_eq!(config.dedup.date_window_days, 3);
        assert!(!config.geocoder.external_enabled);
        assert_eq!(config.geocoder.min_interval_ms, 1000);
        assert_eq!(config.paths.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn parses_sections() {
        let config = CasefileConfig::parse(
            r#"
            [dedup]
            threshold = 0.9
            name_matching = "strict"
            max_name_distance = 1

            [geocoder]
            external_enabled = true

            [vocabulary]
            extra_incident_types = ["crowd_control"]
            extra_type_aliases = { kettling = "crowd_control" }
            "#,
        )
        .unwrap();

        assert_eq!(config.dedup.threshold, 0.9);
        assert_eq!(
            config.dedup.similarity_rules().name_matching,
            NameMatching::Strict { max_distance: 1 }
        );
        assert!(config.geocoder.external_enabled);
        let vocab = config.vocabulary.build();
        assert_eq!(vocab.type_alias("Kettling"), Some("crowd_control"));
    }

    #[test]
    fn parses_sources() {
        let config = CasefileConfig::parse(
            r#"
            [[sources]]
            name = "county-feed"
            url = "https://example.org/incidents.json"
            tier = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].tier, 2);
        assert_eq!(config.sources[0].min_interval_ms, 1000);

        let bad = "[[sources]]\nname = \"x\"\nurl = \"https://x\"\ntier = 9\n";
        assert!(CasefileConfig::parse(bad).is_err());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(CasefileConfig::parse("[dedup]\nthreshhold = 0.5\n").is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        assert!(CasefileConfig::parse("[dedup]\nthreshold = 1.5\n").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casefile.toml");
        std::fs::write(&path, "[paths]\ndata_dir = \"out\"\n").unwrap();

        let config = CasefileConfig::load(&path).unwrap();
        assert_eq!(config.paths.data_dir, PathBuf::from("out"));
        assert!(CasefileConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
