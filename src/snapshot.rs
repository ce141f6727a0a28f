//! Periodic JSON snapshots of stand statistics.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{context::RunStatistics, landscape::Landscape, resource_unit::StandStatistics, snag::SnagLedger};

#[derive(Debug, Clone, Serialize)]
pub struct UnitSnapshot {
    pub index: usize,
    pub column: usize,
    pub row: usize,
    pub stand: StandStatistics,
    pub stocked_area: f64,
    pub effective_area: f64,
    pub average_aging: f64,
    pub snags: SnagLedger,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub scenario: String,
    pub year: u32,
    pub written_at: DateTime<Utc>,
    pub run: RunStatistics,
    pub units: Vec<UnitSnapshot>,
}

impl Snapshot {
    pub fn capture(landscape: &Landscape, scenario_name: &str) -> Self {
        Self {
            scenario: scenario_name.to_string(),
            year: landscape.year(),
            written_at: Utc::now(),
            run: landscape.context.statistics(),
            units: landscape
                .units
                .iter()
                .map(|unit| UnitSnapshot {
                    index: unit.index(),
                    column: unit.column(),
                    row: unit.row(),
                    stand: *unit.statistics(),
                    stocked_area: unit.stocked_area(),
                    effective_area: unit.effective_area(),
                    average_aging: unit.average_aging(),
                    snags: *unit.snags(),
                })
                .collect(),
        }
    }
}

/// Just the header, for tools listing snapshot files.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotHeader {
    pub scenario: String,
    pub year: u32,
    pub written_at: DateTime<Utc>,
}

pub struct SnapshotWriter {
    output_dir: PathBuf,
    interval_years: u32,
}

impl SnapshotWriter {
    pub fn new(output_dir: impl AsRef<Path>, interval_years: u32) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            interval_years,
        }
    }

    pub fn should_write(&self, year: u32) -> bool {
        self.interval_years != 0 && year > 0 && year % self.interval_years == 0
    }

    /// Writes `<dir>/<scenario>/year_NNNNNN.json` when the landscape's year
    /// falls on the interval.
    pub fn maybe_write(&self, landscape: &Landscape, scenario_name: &str) -> Result<Option<PathBuf>> {
        let year = landscape.year();
        if !self.should_write(year) {
            return Ok(None);
        }
        let dir = self.output_dir.join(scenario_name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;
        let path = dir.join(format!("year_{year:06}.json"));
        let json = serde_json::to_string_pretty(&Snapshot::capture(landscape, scenario_name))?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        Ok(Some(path))
    }
}

pub fn read_header(path: impl AsRef<Path>) -> Result<SnapshotHeader> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landscape::tests::landscape;

    #[test]
    fn snapshots_follow_the_interval() {
        let writer = SnapshotWriter::new("unused", 5);
        assert!(!writer.should_write(0));
        assert!(!writer.should_write(4));
        assert!(writer.should_write(5));
        assert!(writer.should_write(10));
        assert!(!SnapshotWriter::new("unused", 0).should_write(5));
    }

    #[test]
    fn snapshot_is_written_and_readable() {
        let temp = tempfile::tempdir().unwrap();
        let mut landscape = landscape(2, 1, false, false);
        for _ in 0..3 {
            landscape.advance_time();
        }
        let writer = SnapshotWriter::new(temp.path(), 3);
        let path = writer.maybe_write(&landscape, "demo").unwrap().unwrap();
        assert_eq!(path, temp.path().join("demo").join("year_000003.json"));
        let header = read_header(&path).unwrap();
        assert_eq!(header.year, 3);
        assert_eq!(header.scenario, "demo");

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["units"].as_array().unwrap().len(), 2);
    }
}
