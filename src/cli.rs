//! CLI surface (§6 "CLI surface", §9 MODULE cli): a thin front end over
//! `clap::Parser`, mirroring the teacher's `Args` struct
//! (`#[derive(Parser)]` with doc-comment help text).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Dataset {
    Us,
    De,
}

impl From<Dataset> for crate::config::Dataset {
    fn from(d: Dataset) -> Self {
        match d {
            Dataset::Us => crate::config::Dataset::Us,
            Dataset::De => crate::config::Dataset::De,
        }
    }
}

/// Closed set of step names (§6), in the order a full run would execute
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Step {
    LawNames,
    ReferenceAreas,
    CitationParse,
    CrossreferenceLookup,
    CrossreferenceEdgelist,
    AuthorityEdgelist,
    SnapshotMappingEdgelist,
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Dataset to run the pipeline over.
    #[clap(value_enum)]
    pub dataset: Dataset,

    /// One or more stage names to execute, in the given order.
    #[clap(value_enum, required = true, num_args = 1..)]
    pub steps: Vec<Step>,

    /// Snapshot literals (`YYYY` for US, `YYYY-MM-DD` for DE), or `all` to
    /// expand the configured research window.
    #[clap(long, value_delimiter = ',', default_value = "all")]
    pub snapshots: Vec<String>,

    /// Re-run stages even if their output already exists.
    #[clap(long)]
    pub overwrite: bool,

    /// Run the worker pool with a single thread (useful for debugging).
    #[clap(long)]
    pub single_process: bool,

    /// Include regulation documents alongside statutes.
    #[clap(long)]
    pub regulations: bool,

    /// Snapshot-mapping stride.
    #[clap(long, default_value_t = 1)]
    pub interval: u32,

    /// Path to the pipeline's `pipeline.toml`.
    #[clap(long, default_value = "pipeline.toml", value_parser)]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let args = Args::parse_from(["statute-graph-pipeline", "us", "crossreference-lookup"]);
        assert_eq!(args.dataset, Dataset::Us);
        assert_eq!(args.steps, vec![Step::CrossreferenceLookup]);
        assert_eq!(args.interval, 1);
        assert!(!args.overwrite);
    }

    #[test]
    fn parses_multiple_steps_and_flags() {
        let args = Args::parse_from([
            "statute-graph-pipeline",
            "de",
            "reference-areas",
            "citation-parse",
            "--snapshots",
            "2000-01-01,2001-01-01",
            "--overwrite",
            "--interval",
            "2",
        ]);
        assert_eq!(args.dataset, Dataset::De);
        assert_eq!(args.steps, vec![Step::ReferenceAreas, Step::CitationParse]);
        assert_eq!(args.snapshots, vec!["2000-01-01", "2001-01-01"]);
        assert!(args.overwrite);
        assert_eq!(args.interval, 2);
    }
}
