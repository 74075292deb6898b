use thiserror::Error;

/// Errors that must abort processing of a single pipeline item (§7: "fail the
/// item, delete any partial output, propagate to dispatcher").
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed input XML in {path}: {source}")]
    MalformedXml {
        path: String,
        #[source]
        source: quick_xml::Error,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("no alias valid at the requested date for document {0}")]
    NoValidAlias(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A recoverable problem recorded per §7's "aggregated by stage into a single
/// log file keyed by input item" rule. Never an `Err` — pushed onto a
/// [`crate::stage_log::Log`] and flushed at the end of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub item: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(item: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.item, self.message)
    }
}
