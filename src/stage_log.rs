//! Per-stage log aggregation (§7: "all recoverable failures are aggregated by
//! stage into a single log file keyed by input item").
//!
//! Mirrors the teacher corpus's `*_finish` step shape (e.g.
//! `de_reference_areas_finish`): workers return a `Vec<Diagnostic>` per item,
//! the driver concatenates them, sorts case-insensitively, and writes one log
//! file for the whole stage.

use std::path::Path;

use tracing::{info, warn};

use crate::error::{Diagnostic, Result};

#[derive(Debug, Default)]
pub struct Log {
    entries: Vec<Diagnostic>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, item: impl Into<String>, message: impl Into<String>) {
        let item = item.into();
        let message = message.into();
        info!(item = %item, "{}", message);
        self.entries.push(Diagnostic::new(item, message));
    }

    pub fn warn(&mut self, item: impl Into<String>, message: impl Into<String>) {
        let item = item.into();
        let message = message.into();
        warn!(item = %item, "{}", message);
        self.entries.push(Diagnostic::new(item, message));
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        self.entries.extend(other);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Sorts entries case-insensitively (as `de_reference_areas_finish` sorts
    /// with `key=lambda x: x.lower()`) and writes them newline-joined.
    pub fn write(mut self, path: impl AsRef<Path>) -> Result<()> {
        self.entries
            .sort_by(|a, b| a.to_string().to_lowercase().cmp(&b.to_string().to_lowercase()));
        let body = self
            .entries
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(path.as_ref(), body).map_err(|source| crate::error::PipelineError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })
    }
}
