use thiserror::Error;

use crate::mapping::PositionIssue;

/// Fatal engine failures. Per-position and per-field problems are not errors; they travel in
/// reports next to a best-effort result.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("incompatible mapping schema: found {found:?}, supported {supported}")]
    IncompatibleMappingSchema { found: String, supported: String },

    #[error("invalid mapping json: {0}")]
    InvalidMapping(#[from] serde_json::Error),

    #[error("merge failed: none of {} mapped positions resolved", .issues.len())]
    TotalMergeFailure { issues: Vec<PositionIssue> },

    #[error("document structure changed outside text runs in {part}")]
    StructureDrift { part: String },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedDocument(msg.into())
    }
}

impl From<quick_xml::Error> for EngineError {
    fn from(e: quick_xml::Error) -> Self {
        Self::MalformedDocument(format!("xml: {e}"))
    }
}

impl From<quick_xml::events::attributes::AttrError> for EngineError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Self::MalformedDocument(format!("xml attribute: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
