use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use casefile_common::types::Tier;

use crate::store::OutputSummary;

/// Counts for one run of the stage sequence over one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub original: usize,
    pub validation_errors: usize,
    pub duplicates_removed: usize,
    pub geocoded: usize,
    pub geocode_failed: usize,
    pub final_count: usize,
}

impl StageStats {
    fn absorb(&mut self, other: &StageStats) {
        self.original += other.original;
        self.validation_errors += other.validation_errors;
        self.duplicates_removed += other.duplicates_removed;
        self.geocoded += other.geocoded;
        self.geocode_failed += other.geocode_failed;
        self.final_count += other.final_count;
    }
}

/// Stats from a `process` call.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStats {
    pub run_id: Uuid,
    pub tiers: BTreeMap<Tier, StageStats>,
    pub totals: StageStats,
}

impl ProcessStats {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tiers: BTreeMap::new(),
            totals: StageStats::default(),
        }
    }

    pub fn record(&mut self, tier: Tier, stats: StageStats) {
        self.totals.absorb(&stats);
        self.tiers.entry(tier).or_default().absorb(&stats);
    }
}

impl Default for ProcessStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Run {} ===", self.run_id)?;
        writeln!(
            f,
            "{:<6} {:>9} {:>8} {:>11} {:>9} {:>7}",
            "Tier", "Original", "Invalid", "Duplicates", "Geocoded", "Final"
        )?;
        for (tier, stats) in &self.tiers {
            write_row(f, tier.code(), stats)?;
        }
        write_row(f, "Total", &self.totals)?;
        if self.totals.geocode_failed > 0 {
            write!(f, "Locations not geocoded: {}", self.totals.geocode_failed)?;
        }
        Ok(())
    }
}

fn write_row(f: &mut std::fmt::Formatter<'_>, label: &str, s: &StageStats) -> std::fmt::Result {
    writeln!(
        f,
        "{:<6} {:>9} {:>8} {:>11} {:>9} {:>7}",
        label, s.original, s.validation_errors, s.duplicates_removed, s.geocoded, s.final_count
    )
}

/// Working-set and persisted counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub working: BTreeMap<Tier, usize>,
    pub persisted: Vec<OutputSummary>,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Working set:")?;
        for tier in Tier::ALL {
            writeln!(f, "  {}: {}", tier.code(), self.working.get(&tier).copied().unwrap_or(0))?;
        }
        write!(f, "Persisted:")?;
        if self.persisted.is_empty() {
            write!(f, " none")?;
        }
        for output in &self.persisted {
            write!(f, "\n  {:<28} {:>6} records", output.location, output.records)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate_across_tiers() {
        let mut stats = ProcessStats::new();
        stats.record(
            Tier::Official,
            StageStats { original: 3, final_count: 2, duplicates_removed: 1, ..StageStats::default() },
        );
        stats.record(
            Tier::Manual,
            StageStats { original: 4, validation_errors: 1, final_count: 3, ..StageStats::default() },
        );
        assert_eq!(stats.totals.original, 7);
        assert_eq!(stats.totals.final_count, 5);
        assert_eq!(stats.tiers.len(), 2);

        let rendered = stats.to_string();
        assert!(rendered.contains("T1"));
        assert!(rendered.contains("Total"));
        assert!(rendered.contains(&stats.run_id.to_string()));
    }

    #[test]
    fn run_ids_differ() {
        assert_ne!(ProcessStats::new().run_id, ProcessStats::new().run_id);
    }
}
