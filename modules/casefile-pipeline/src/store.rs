//! Persistence of final record sets, one location per (tier, category).

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use casefile_common::types::{IncidentRecord, Tier};
use casefile_common::{CasefileError, Result};

/// Logical name of a tier/category output.
pub fn output_name(tier: Tier, category: &str) -> String {
    format!("tier{}_{category}.json", tier.number())
}

/// Inverse of [`output_name`].
pub fn parse_output_name(name: &str) -> Option<(Tier, String)> {
    let stem = name.strip_suffix(".json")?.strip_prefix("tier")?;
    let (number, category) = stem.split_once('_')?;
    let tier = Tier::from_number(number.parse().ok()?)?;
    (!category.is_empty()).then(|| (tier, category.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSummary {
    pub tier: Tier,
    pub category: String,
    pub location: String,
    pub records: usize,
}

pub trait RecordStore: Send + Sync {
    /// Previously persisted records, or `None` when nothing was written yet.
    fn load_existing(&self, tier: Tier, category: &str) -> Result<Option<Vec<IncidentRecord>>>;

    /// Replace the output for `(tier, category)`. Returns its location.
    fn write_output(&self, tier: Tier, category: &str, records: &[IncidentRecord]) -> Result<String>;

    fn list_outputs(&self) -> Result<Vec<OutputSummary>>;
}

/// Pretty-printed JSON arrays under `<dir>/tier{N}_{category}.json`.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, tier: Tier, category: &str) -> PathBuf {
        self.dir.join(output_name(tier, category))
    }

    fn read_records(path: &Path) -> Result<Vec<IncidentRecord>> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CasefileError::Store(format!("Corrupt output {}: {e}", path.display())))
    }
}

impl RecordStore for JsonFileStore {
    fn load_existing(&self, tier: Tier, category: &str) -> Result<Option<Vec<IncidentRecord>>> {
        let path = self.path_for(tier, category);
        if !path.exists() {
            return Ok(None);
        }
        let records = Self::read_records(&path)?;
        debug!(path = %path.display(), records = records.len(), "Loaded existing output");
        Ok(Some(records))
    }

    fn write_output(&self, tier: Tier, category: &str, records: &[IncidentRecord]) -> Result<String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            CasefileError::Store(format!("Output directory {} not writable: {e}", self.dir.display()))
        })?;

        let path = self.path_for(tier, category);
        let tmp = self.dir.join(format!(".{}.tmp", output_name(tier, category)));
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&tmp, json)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|e| CasefileError::Store(format!("Failed to write {}: {e}", path.display())))?;

        info!(path = %path.display(), records = records.len(), "Wrote output");
        Ok(path.display().to_string())
    }

    fn list_outputs(&self) -> Result<Vec<OutputSummary>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut outputs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((tier, category)) = name.to_str().and_then(parse_output_name) else {
                continue;
            };
            let path = entry.path();
            let records = Self::read_records(&path)?.len();
            outputs.push(OutputSummary {
                tier,
                category,
                location: path.display().to_string(),
                records,
            });
        }
        outputs.sort_by(|a, b| (a.tier, &a.category).cmp(&(b.tier, &b.category)));
        Ok(outputs)
    }
}
