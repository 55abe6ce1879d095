//! Schema, range and vocabulary checks.
//!
//! Errors block a record from persistence; warnings and info are advisory
//! and only reported. The validator never mutates records.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use casefile_common::types::{has_text, IncidentRecord, IncidentScale, OutcomeCategory, Tier};
use casefile_common::Vocabulary;

const MAX_AGE: i32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub field: &'static str,
    pub message: String,
}

/// Every issue found on one record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub record_id: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.by_severity(Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.by_severity(Severity::Warning)
    }

    pub fn info(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.by_severity(Severity::Info)
    }

    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn by_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    fn push(&mut self, severity: Severity, field: &'static str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity,
            field,
            message: message.into(),
        });
    }
}

/// Aggregate counts over a batch of reports.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub with_warnings: usize,
    pub with_info: usize,
}

impl ValidationSummary {
    pub fn from_reports(reports: &[ValidationReport]) -> Self {
        let mut summary = Self {
            total: reports.len(),
            ..Self::default()
        };
        for report in reports {
            if report.is_valid() {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
            }
            if report.warnings().next().is_some() {
                summary.with_warnings += 1;
            }
            if report.info().next().is_some() {
                summary.with_info += 1;
            }
        }
        summary
    }
}

impl std::fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Records checked:    {}", self.total)?;
        writeln!(f, "Valid:              {}", self.valid)?;
        writeln!(f, "Invalid:            {}", self.invalid)?;
        writeln!(f, "With warnings:      {}", self.with_warnings)?;
        write!(f, "With info notes:    {}", self.with_info)
    }
}

pub struct Validator {
    vocab: Vocabulary,
    today: NaiveDate,
}

impl Validator {
    pub fn new(vocab: Vocabulary) -> Self {
        Self {
            vocab,
            today: Utc::now().date_naive(),
        }
    }

    /// Pin "today" for future-date checks.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn validate(&self, record: &IncidentRecord) -> ValidationReport {
        let mut report = ValidationReport {
            record_id: record.id.clone(),
            issues: Vec::new(),
        };

        self.check_required(record, &mut report);
        self.check_date(record, &mut report);
        self.check_location(record, &mut report);
        self.check_semantics(record, &mut report);
        self.check_scale(record, &mut report);
        self.check_provenance(record, &mut report);

        report
    }

    /// Returns the error-free records plus a report for every input record.
    pub fn validate_batch(
        &self,
        records: Vec<IncidentRecord>,
    ) -> (Vec<IncidentRecord>, Vec<ValidationReport>) {
        let mut valid = Vec::with_capacity(records.len());
        let mut reports = Vec::with_capacity(records.len());

        for record in records {
            let report = self.validate(&record);
            if report.is_valid() {
                valid.push(record);
            } else {
                debug!(
                    id = record.id.as_str(),
                    errors = report.errors().count(),
                    "Record failed validation"
                );
            }
            reports.push(report);
        }

        let summary = ValidationSummary::from_reports(&reports);
        info!(
            total = summary.total,
            valid = summary.valid,
            invalid = summary.invalid,
            warnings = summary.with_warnings,
            "Validation complete"
        );
        (valid, reports)
    }

    fn check_required(&self, record: &IncidentRecord, report: &mut ValidationReport) {
        for (field, value) in [
            ("date", &record.date),
            ("state", &record.state),
            ("incident_type", &record.incident_type),
        ] {
            if value.trim().is_empty() {
                report.push(Severity::Error, field, format!("Missing required field: {field}"));
            }
        }

        if record.tier_level().is_none() {
            report.push(
                Severity::Error,
                "tier",
                format!("Tier must be 1-4, got {}", record.tier),
            );
        }
        if let Some(source_tier) = record.source_tier {
            if Tier::from_number(source_tier).is_none() {
                report.push(
                    Severity::Error,
                    "source_tier",
                    format!("Source tier must be 1-4, got {source_tier}"),
                );
            }
        }
    }

    fn check_date(&self, record: &IncidentRecord, report: &mut ValidationReport) {
        if record.date.trim().is_empty() {
            return;
        }
        match record.parsed_date() {
            None => report.push(
                Severity::Error,
                "date",
                format!("Unparseable date: {:?}", record.date),
            ),
            Some(date) if date > self.today => report.push(
                Severity::Warning,
                "date",
                format!("Date {date} is in the future"),
            ),
            Some(_) => {}
        }
    }

    fn check_location(&self, record: &IncidentRecord, report: &mut ValidationReport) {
        if !record.state.trim().is_empty() && self.vocab.canonical_state(&record.state).is_none() {
            report.push(
                Severity::Warning,
                "state",
                format!("Unrecognized state: {:?}", record.state),
            );
        }

        match (record.latitude, record.longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                    report.push(
                        Severity::Warning,
                        "coordinates",
                        format!("Coordinates out of range: ({lat}, {lon})"),
                    );
                }
            }
            (None, None) => {}
            _ => report.push(
                Severity::Warning,
                "coordinates",
                "Only one of latitude/longitude is present",
            ),
        }
    }

    fn check_semantics(&self, record: &IncidentRecord, report: &mut ValidationReport) {
        let incident_type = record.incident_type.trim();
        if !incident_type.is_empty()
            && !self.vocab.is_incident_type(incident_type)
            && self.vocab.type_alias(incident_type).is_none()
        {
            report.push(
                Severity::Warning,
                "incident_type",
                format!("Non-standard incident type: {incident_type:?}"),
            );
        }

        if let Some(age) = record.subject_age {
            if !(0..=MAX_AGE).contains(&age) {
                report.push(
                    Severity::Warning,
                    "subject_age",
                    format!("Age {age} outside 0-{MAX_AGE}"),
                );
            }
        }

        if let Some(category) = record.outcome_category.as_deref().filter(|c| !c.trim().is_empty()) {
            if OutcomeCategory::parse(category).is_none() {
                report.push(
                    Severity::Info,
                    "outcome_category",
                    format!("Non-standard outcome category: {category:?}"),
                );
            }
        }

        if let Some(category) = record.subject_category.as_deref().filter(|c| !c.trim().is_empty()) {
            if !self.vocab.is_subject_category(category) {
                report.push(
                    Severity::Info,
                    "subject_category",
                    format!("Non-standard subject category: {category:?}"),
                );
            }
        }
    }

    fn check_scale(&self, record: &IncidentRecord, report: &mut ValidationReport) {
        if record.affected_count == 0 {
            report.push(
                Severity::Warning,
                "affected_count",
                "Affected count must be at least 1",
            );
        }

        let Some(raw) = record.incident_scale.as_deref().filter(|s| !s.trim().is_empty()) else {
            return;
        };
        match IncidentScale::parse(raw) {
            None => report.push(
                Severity::Warning,
                "incident_scale",
                format!("Invalid incident scale: {raw:?}"),
            ),
            Some(scale) => {
                let expected = IncidentScale::from_count(record.affected_count);
                if scale != expected {
                    report.push(
                        Severity::Info,
                        "incident_scale",
                        format!(
                            "Scale {scale} does not match affected count {} (expected {expected})",
                            record.affected_count
                        ),
                    );
                }
            }
        }
    }

    fn check_provenance(&self, record: &IncidentRecord, report: &mut ValidationReport) {
        if !has_text(&record.source_url) && !has_text(&record.source_name) {
            report.push(
                Severity::Warning,
                "source",
                "Missing both source URL and source name",
            );
        }
    }
}
