//! Citation detection, cross-reference resolution, and cross-snapshot
//! identity mapping for national statute corpora (US Code; German federal
//! statutes/regulations).
//!
//! `main.rs` is a thin `clap::Parser` front end over the stages exposed
//! here; everything else is a library a caller can also drive directly.

pub mod citation;
pub mod cli;
pub mod config;
pub mod edgelist;
pub mod error;
pub mod hierarchy;
pub mod law_names;
pub mod lookup;
pub mod pipeline;
pub mod reference_areas;
pub mod snapshot_mapping;
pub mod stage_log;
pub mod stages;
