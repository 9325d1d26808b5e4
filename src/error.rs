use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChronorateError>;

/// Failure modes of the calibration pipeline. Everything here is caught at
/// the per-family boundary; only output/cache I/O failures abort a batch.
#[derive(Error, Debug)]
pub enum ChronorateError {
    /// Malformed tree, record, or tool-output text
    #[error("parse error: {0}")]
    Parse(String),

    /// Pathological branch-length statistics collapsed a tree
    #[error("prune error: {0}")]
    Prune(String),

    /// The external calibration tool could not be run or produced no output
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// The tool ran but the analysis did not pass
    #[error("calibration failed: {0}")]
    CalibrationFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("table error: {0}")]
    Table(#[from] csv::Error),
}

impl ChronorateError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn prune(msg: impl Into<String>) -> Self {
        Self::Prune(msg.into())
    }

    pub fn external_tool(msg: impl Into<String>) -> Self {
        Self::ExternalTool(msg.into())
    }

    pub fn calibration_failed(msg: impl Into<String>) -> Self {
        Self::CalibrationFailed(msg.into())
    }
}
