use serde::{Deserialize, Serialize};

/// Where the export pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPhase {
    Idle,
    Preparing,
    Rendering,
    Restoring,
    Failed,
}

impl ExportPhase {
    pub fn name(self) -> &'static str {
        match self {
            ExportPhase::Idle => "idle",
            ExportPhase::Preparing => "preparing",
            ExportPhase::Rendering => "rendering",
            ExportPhase::Restoring => "restoring",
            ExportPhase::Failed => "failed",
        }
    }

    /// Whether a new export may start from this phase
    pub fn is_settled(self) -> bool {
        matches!(self, ExportPhase::Idle | ExportPhase::Failed)
    }
}

// SSE event published on every phase change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEvent {
    pub phase: ExportPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportEvent {
    pub fn new(phase: ExportPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            file: None,
            error: None,
        }
    }
}
