//! Import boundary for external JSON and CSV files.
//!
//! Input is untrusted. Every row is a loose key/value map that is checked
//! against an explicit field allow-list before a canonical record is built:
//! unknown keys are dropped, values are coerced per field, and a value that
//! fails coercion drops only that field.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use casefile_common::types::{DatePrecision, IncidentRecord, Tier};
use casefile_common::{CasefileError, Result};

pub const IMPORT_COLLECTION_METHOD: &str = "import";

/// Stand-in for a tier value that could not be coerced.
const INVALID_TIER: u8 = 0;

/// Values stamped on rows that do not carry them.
#[derive(Debug, Clone, Copy)]
pub struct RowDefaults {
    pub tier: Tier,
    pub collection_method: &'static str,
}

impl Default for RowDefaults {
    fn default() -> Self {
        Self {
            tier: Tier::Manual,
            collection_method: IMPORT_COLLECTION_METHOD,
        }
    }
}

/// Accepted input keys that map onto a record field under another name.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("victim_name", "subject_name"),
    ("lat", "latitude"),
    ("lng", "longitude"),
    ("lon", "longitude"),
    ("url", "source_url"),
    ("source", "source_name"),
    ("type", "incident_type"),
];

const RECORD_FIELDS: &[&str] = &[
    "id",
    "date",
    "date_precision",
    "retrieved_at",
    "state",
    "city",
    "county",
    "latitude",
    "longitude",
    "subject_name",
    "subject_age",
    "subject_nationality",
    "subject_category",
    "is_citizen",
    "incident_type",
    "outcome",
    "outcome_category",
    "circumstances",
    "notes",
    "agency",
    "affected_count",
    "incident_scale",
    "tier",
    "source_tier",
    "source_url",
    "source_name",
    "collection_method",
    "verified",
    "linked_ids",
    "is_primary",
    "canonical_id",
];

/// Counts for one or more imported files.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub rejected: usize,
    pub unknown_fields: usize,
    pub coercion_failures: usize,
    /// Dropped key → occurrences, for the console report.
    pub unknown_keys: BTreeMap<String, usize>,
}

impl ImportReport {
    pub fn merge(&mut self, other: ImportReport) {
        self.imported += other.imported;
        self.rejected += other.rejected;
        self.unknown_fields += other.unknown_fields;
        self.coercion_failures += other.coercion_failures;
        for (key, count) in other.unknown_keys {
            *self.unknown_keys.entry(key).or_default() += count;
        }
    }
}

impl std::fmt::Display for ImportReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Imported:           {}", self.imported)?;
        writeln!(f, "Rejected rows:      {}", self.rejected)?;
        writeln!(f, "Unknown fields:     {}", self.unknown_fields)?;
        write!(f, "Coercion failures:  {}", self.coercion_failures)?;
        for (key, count) in &self.unknown_keys {
            write!(f, "\n  dropped {key:<18} x{count}")?;
        }
        Ok(())
    }
}

/// Dispatch on file extension (`.json` or `.csv`).
pub fn import_file(path: &Path) -> Result<(Vec<IncidentRecord>, ImportReport)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("json") => import_json(path),
        Some("csv") => import_csv(path),
        _ => Err(CasefileError::Import(format!(
            "{}: unsupported file type (expected .json or .csv)",
            path.display()
        ))),
    }
}

pub fn import_json(path: &Path) -> Result<(Vec<IncidentRecord>, ImportReport)> {
    let content = read_input(path)?;
    let result = parse_json(&content)
        .map_err(|e| CasefileError::Import(format!("{}: {e}", path.display())))?;
    log_import(path, &result.1);
    Ok(result)
}

pub fn import_csv(path: &Path) -> Result<(Vec<IncidentRecord>, ImportReport)> {
    let content = read_input(path)?;
    let result = parse_csv(&content)
        .map_err(|e| CasefileError::Import(format!("{}: {e}", path.display())))?;
    log_import(path, &result.1);
    Ok(result)
}

fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| CasefileError::Import(format!("Failed to read {}: {e}", path.display())))
}

fn log_import(path: &Path, report: &ImportReport) {
    info!(
        path = %path.display(),
        imported = report.imported,
        rejected = report.rejected,
        unknown_fields = report.unknown_fields,
        coercion_failures = report.coercion_failures,
        "Import complete"
    );
}

/// Parse a JSON document: a top-level array of objects, or an object
/// holding such an array under `records` or `incidents`.
pub fn parse_json(content: &str) -> std::result::Result<(Vec<IncidentRecord>, ImportReport), String> {
    parse_json_with(content, RowDefaults::default())
}

pub fn parse_json_with(
    content: &str,
    defaults: RowDefaults,
) -> std::result::Result<(Vec<IncidentRecord>, ImportReport), String> {
    let document: Value =
        serde_json::from_str(content).map_err(|e| format!("invalid JSON: {e}"))?;

    let rows = match document {
        Value::Array(rows) => rows,
        Value::Object(mut object) => match object
            .remove("records")
            .or_else(|| object.remove("incidents"))
        {
            Some(Value::Array(rows)) => rows,
            _ => return Err("expected a `records` or `incidents` array".to_string()),
        },
        _ => return Err("expected an array of records".to_string()),
    };

    let mut report = ImportReport::default();
    let mut records = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        match row {
            Value::Object(fields) => {
                if let Some(record) = record_from_row(fields, defaults, &mut report) {
                    records.push(record);
                } else {
                    warn!(row = index, "Rejected import row with no usable fields");
                    report.rejected += 1;
                }
            }
            other => {
                warn!(row = index, kind = value_kind(&other), "Rejected non-object import row");
                report.rejected += 1;
            }
        }
    }
    report.imported = records.len();
    Ok((records, report))
}

/// Parse CSV with a header row. Quoted fields may contain commas, escaped
/// quotes (`""`) and newlines. Blank lines are skipped.
pub fn parse_csv(content: &str) -> std::result::Result<(Vec<IncidentRecord>, ImportReport), String> {
    let defaults = RowDefaults::default();
    let content = content.trim_start_matches('\u{feff}');
    let mut rows = csv_rows(content)?.into_iter();

    let header: Vec<String> = rows
        .next()
        .ok_or_else(|| "missing header row".to_string())?
        .into_iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let mut report = ImportReport::default();
    let mut records = Vec::new();
    for (index, row) in rows.enumerate() {
        let fields: Map<String, Value> = header
            .iter()
            .zip(row)
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.clone(), Value::String(value)))
            .collect();
        if let Some(record) = record_from_row(fields, defaults, &mut report) {
            records.push(record);
        } else {
            warn!(row = index + 1, "Rejected import row with no usable fields");
            report.rejected += 1;
        }
    }
    report.imported = records.len();
    Ok((records, report))
}

fn csv_rows(content: &str) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut rows = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            '\r' if !in_quotes => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
                push_row(&mut rows, std::mem::take(&mut fields));
            }
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if !current.is_empty() || !fields.is_empty() {
        fields.push(current);
        push_row(&mut rows, fields);
    }
    Ok(rows)
}

fn push_row(rows: &mut Vec<Vec<String>>, fields: Vec<String>) {
    if fields.iter().any(|f| !f.trim().is_empty()) {
        rows.push(fields);
    }
}

fn canonical_field(key: &str) -> Option<&'static str> {
    let key = key.trim();
    RECORD_FIELDS
        .iter()
        .find(|f| f.eq_ignore_ascii_case(key))
        .copied()
        .or_else(|| {
            FIELD_ALIASES
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(key))
                .map(|(_, field)| *field)
        })
}

/// Build a record from an allow-listed row. `None` when the row carries
/// no usable field at all.
fn record_from_row(
    row: Map<String, Value>,
    defaults: RowDefaults,
    report: &mut ImportReport,
) -> Option<IncidentRecord> {
    let mut record = IncidentRecord {
        tier: defaults.tier.number(),
        ..IncidentRecord::default()
    };
    let mut populated = 0usize;

    for (key, value) in row {
        let Some(field) = canonical_field(&key) else {
            debug!(key = key.as_str(), "Dropping unknown import field");
            report.unknown_fields += 1;
            *report.unknown_keys.entry(key).or_default() += 1;
            continue;
        };
        if is_empty_value(&value) {
            continue;
        }
        match assign_field(&mut record, field, &value) {
            Ok(()) => populated += 1,
            Err(message) => {
                warn!(field, error = message.as_str(), "Dropping field that failed coercion");
                report.coercion_failures += 1;
                // An unreadable tier stays out of range instead of taking the default.
                match field {
                    "tier" => record.tier = INVALID_TIER,
                    "source_tier" => record.source_tier = Some(INVALID_TIER),
                    _ => {}
                }
            }
        }
    }

    if populated == 0 {
        return None;
    }

    if record.collection_method.is_none() {
        record.collection_method = Some(defaults.collection_method.to_string());
    }
    if record.retrieved_at.is_none() {
        record.retrieved_at = Some(Utc::now());
    }
    if record.id.trim().is_empty() {
        record.assign_identity();
    }
    Some(record)
}

fn assign_field(record: &mut IncidentRecord, field: &str, value: &Value) -> std::result::Result<(), String> {
    match field {
        "id" => record.id = required_text(value)?,
        "date" => record.date = required_text(value)?,
        "state" => record.state = required_text(value)?,
        "incident_type" => record.incident_type = required_text(value)?,
        "date_precision" => record.date_precision = precision(value)?,
        "retrieved_at" => record.retrieved_at = Some(timestamp(value)?),
        "city" => record.city = text(value)?,
        "county" => record.county = text(value)?,
        "latitude" => record.latitude = Some(float(value)?),
        "longitude" => record.longitude = Some(float(value)?),
        "subject_name" => record.subject_name = text(value)?,
        "subject_age" => record.subject_age = Some(integer(value)?),
        "subject_nationality" => record.subject_nationality = text(value)?,
        "subject_category" => record.subject_category = text(value)?,
        "is_citizen" => record.is_citizen = Some(boolean(value)?),
        "outcome" => record.outcome = text(value)?,
        "outcome_category" => record.outcome_category = text(value)?,
        "circumstances" => record.circumstances = text(value)?,
        "notes" => record.notes = text(value)?,
        "agency" => record.agency = text(value)?,
        "affected_count" => record.affected_count = small_int(value)?,
        "incident_scale" => record.incident_scale = text(value)?,
        "tier" => record.tier = small_int(value)?,
        "source_tier" => record.source_tier = Some(small_int(value)?),
        "source_url" => record.source_url = text(value)?,
        "source_name" => record.source_name = text(value)?,
        "collection_method" => record.collection_method = text(value)?,
        "verified" => record.verified = boolean(value)?,
        "linked_ids" => record.linked_ids = id_list(value)?,
        "is_primary" => record.is_primary = boolean(value)?,
        "canonical_id" => record.canonical_id = text(value)?,
        other => return Err(format!("no handler for field `{other}`")),
    }
    Ok(())
}

// --- Coercion ---

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn text(value: &Value) -> std::result::Result<Option<String>, String> {
    match value {
        Value::String(s) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(format!("expected text, got {}", value_kind(other))),
    }
}

fn required_text(value: &Value) -> std::result::Result<String, String> {
    text(value)?.ok_or_else(|| "empty value".to_string())
}

fn float(value: &Value) -> std::result::Result<f64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| format!("expected a number, got {value}"))
}

fn integer(value: &Value) -> std::result::Result<i32, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| format!("expected an integer, got {value}"))
}

fn small_int<T: TryFrom<i64>>(value: &Value) -> std::result::Result<T, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| format!("expected a non-negative integer, got {value}"))
}

fn boolean(value: &Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(true),
            "false" | "no" | "n" | "0" => Ok(false),
            _ => Err(format!("expected a boolean, got {s:?}")),
        },
        other => Err(format!("expected a boolean, got {}", value_kind(other))),
    }
}

fn timestamp(value: &Value) -> std::result::Result<DateTime<Utc>, String> {
    let raw = required_text(value)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
}

fn precision(value: &Value) -> std::result::Result<DatePrecision, String> {
    let raw = required_text(value)?.to_lowercase();
    serde_json::from_value(Value::String(raw.clone()))
        .map_err(|_| format!("unknown date precision {raw:?}"))
}

/// Array of ids, or a single string separated by `;` or `,`.
fn id_list(value: &Value) -> std::result::Result<Vec<String>, String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|v| !is_empty_value(v))
            .map(required_text)
            .collect(),
        Value::String(s) => Ok(s
            .split([';', ','])
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()),
        other => Err(format!("expected a list of ids, got {}", value_kind(other))),
    }
}
