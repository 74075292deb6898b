//! Ambient configuration (§10): per-dataset paths and the research window
//! that `--snapshots all` expands to. The teacher takes its one
//! input/output directory pair as bare CLI flags; this pipeline has a
//! stage directory per step and per dataset, so paths move into a layered
//! `pipeline.toml` read with the `config` crate, with CLI flags free to
//! override individual values (the crate's standard builder idiom).

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub hierarchy_dir: PathBuf,
    pub output_dir: PathBuf,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub us: DatasetConfig,
    pub de: DatasetConfig,
}

impl Settings {
    /// Loads `pipeline.toml` (or whatever path is given) via the `config`
    /// crate's builder, then deserializes into `Settings`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let builder = config::Config::builder().add_source(config::File::from(path.as_ref()).required(true));
        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Us,
    De,
}

impl DatasetConfig {
    /// Expands `--snapshots all` into the dataset's configured research
    /// window (§6 "`--snapshots all` expands to the configured research
    /// window", §9 MODULE cli). Discovering the *actual* available
    /// snapshot dates on disk is a hierarchy-ingestion concern (out of
    /// scope, per spec.md Non-goals); this models the window arithmetically
    /// from the configured bounds and `interval`.
    pub fn expand_all(&self, dataset: Dataset, interval: u32) -> Vec<String> {
        let interval = interval.max(1);
        match dataset {
            Dataset::Us => {
                let start = self.start_year.unwrap_or(1994);
                let end = self.end_year.unwrap_or(start);
                (start..=end)
                    .step_by(interval as usize)
                    .map(|y| y.to_string())
                    .collect()
            }
            Dataset::De => {
                let start = self
                    .start_date
                    .unwrap_or_else(|| NaiveDate::from_ymd_opt(1994, 1, 1).unwrap());
                let end = self.end_date.unwrap_or(start);
                let mut dates = Vec::new();
                let mut cur = start;
                while cur <= end {
                    dates.push(cur.format("%Y-%m-%d").to_string());
                    let Some(next) = cur.checked_add_signed(chrono::Duration::days(365 * interval as i64)) else {
                        break;
                    };
                    cur = next;
                }
                dates
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_us_window_by_interval() {
        let cfg = DatasetConfig {
            hierarchy_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            start_year: Some(2000),
            end_year: Some(2006),
            start_date: None,
            end_date: None,
        };
        let years = cfg.expand_all(Dataset::Us, 2);
        assert_eq!(years, vec!["2000", "2002", "2004", "2006"]);
    }

    #[test]
    fn expands_de_window_yearly_by_default() {
        let cfg = DatasetConfig {
            hierarchy_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            start_year: None,
            end_year: None,
            start_date: NaiveDate::from_ymd_opt(2000, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2002, 1, 1),
        };
        let dates = cfg.expand_all(Dataset::De, 1);
        assert_eq!(dates, vec!["2000-01-01", "2001-01-01", "2002-01-01"]);
    }
}
