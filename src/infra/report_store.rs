// ============================================================
// Layer 6 — Parity Report Store
// ============================================================
// Persists the outcome of each parity run:
//
//   report_dir/
//     parity_report.json   ← full report of the latest run
//     parity_history.csv   ← one row per run, appended
//
// Example CSV output:
//   seed,hidden_size,num_layers,num_heads,checks,failed,worst_max_abs_diff,passed
//   0,768,12,12,3,0,0.000004,true
//   1,768,12,12,3,1,0.031250,false
//
// The JSON is the thing to read when a run fails: every failed
// check carries the harness message with both tensor summaries.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

use crate::application::parity_use_case::ParityReport;

const HISTORY_HEADER: &str = "seed,hidden_size,num_layers,num_heads,checks,failed,worst_max_abs_diff,passed";

pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    /// Create the directory and the CSV header if they are missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create report dir '{}'", dir.display()))?;

        let store = Self { dir };
        let history = store.history_path();
        if !history.exists() {
            let mut f = fs::File::create(&history)
                .with_context(|| format!("Cannot create '{}'", history.display()))?;
            writeln!(f, "{HISTORY_HEADER}")?;
            tracing::debug!("Created parity history CSV: '{}'", history.display());
        }
        Ok(store)
    }

    pub fn report_path(&self) -> PathBuf {
        self.dir.join("parity_report.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join("parity_history.csv")
    }

    /// Overwrite the latest report.
    pub fn save(&self, report: &ParityReport) -> Result<PathBuf> {
        let path = self.report_path();
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write report to '{}'", path.display()))?;
        tracing::debug!("Saved parity report to '{}'", path.display());
        Ok(path)
    }

    #[cfg(test)]
    pub fn load(&self) -> Result<ParityReport> {
        let path = self.report_path();
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read report from '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Append one summary row for `report`.
    pub fn append_history(&self, report: &ParityReport) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(self.history_path())?;

        writeln!(
            f,
            "{},{},{},{},{},{},{:.6},{}",
            report.seed,
            report.config.hidden_size,
            report.config.num_layers,
            report.config.num_heads,
            report.checks.len(),
            report.failed().count(),
            report.worst_max_abs_diff(),
            report.passed(),
        )?;
        Ok(())
    }
}
