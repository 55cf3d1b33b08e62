use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by an export attempt.
///
/// `RenderTimeout` and `EncodingFailure` are raised after the view was scaled;
/// the orchestrator restores the on-screen state before returning them. The
/// other variants are raised before anything is touched.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("view has no usable pixel size ({width}x{height})")]
    InvalidViewState { width: u32, height: u32 },

    #[error("unknown page format '{0}'")]
    UnknownPageFormat(String),

    #[error("print resolution must be positive, got {0}")]
    InvalidResolution(f64),

    #[error("another export is already running")]
    ExportInProgress,

    #[error("renderer did not signal completion within {0:?}")]
    RenderTimeout(Duration),

    #[error("document encoding failed: {0:#}")]
    EncodingFailure(#[source] anyhow::Error),
}

impl ExportError {
    /// Short machine-readable name, used in API responses and events
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::InvalidViewState { .. } => "invalid_view_state",
            ExportError::UnknownPageFormat(_) => "unknown_page_format",
            ExportError::InvalidResolution(_) => "invalid_resolution",
            ExportError::ExportInProgress => "export_in_progress",
            ExportError::RenderTimeout(_) => "render_timeout",
            ExportError::EncodingFailure(_) => "encoding_failure",
        }
    }
}

/// A tabular input row that could not become a marker. The row is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("line {line}: {reason}")]
pub struct RowError {
    pub line: usize,
    pub reason: String,
}
