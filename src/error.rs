use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MagvalError {
    #[error("invalid ISO-8601 datetime: {0}")]
    InvalidDatetime(String),

    #[error("invalid ISO-8601 duration: {0}")]
    InvalidDuration(String),

    #[error("invalid model identifier: {0}")]
    InvalidModelId(String),

    #[error("invalid model expression: {0}")]
    InvalidModelExpression(String),

    #[error("local evaluation of model expressions is not supported: {0}")]
    UnsupportedModelExpression(String),

    #[error("unsupported CDF time type: {0}")]
    UnsupportedCdfTimeType(u32),

    #[error("missing auxiliary input {0}")]
    MissingAuxiliary(&'static str),

    #[error("missing config file magval.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("HAPI request failed: {0}")]
    HapiHttp(String),

    #[error("HAPI server returned status {status}: {message}")]
    HapiStatus { status: u16, message: String },

    #[error("HAPI response decode failed: {0}")]
    HapiDecode(String),

    #[error("OWS request failed: {0}")]
    OwsHttp(String),

    #[error("OWS server returned status {status}: {message}")]
    OwsStatus { status: u16, message: String },

    #[error("data decode failed: {0}")]
    TableDecode(String),

    #[error("missing column {0} in response data")]
    MissingColumn(String),

    #[error("model source download failed: {0}")]
    SourceDownload(String),

    #[error("no member matching {member} found in archive {archive}")]
    ArchiveMemberNotFound { archive: String, member: String },

    #[error("model coefficient file error: {0}")]
    ModelFile(String),

    #[error("{field} mismatch ({collection}, {start}/{end})")]
    Validation {
        field: String,
        collection: String,
        start: String,
        end: String,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("report serialization failed: {0}")]
    Report(String),
}

impl MagvalError {
    /// Per-item failures a batch driver logs and skips rather than aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MagvalError::HapiHttp(_)
                | MagvalError::HapiStatus { .. }
                | MagvalError::HapiDecode(_)
                | MagvalError::OwsHttp(_)
                | MagvalError::OwsStatus { .. }
                | MagvalError::TableDecode(_)
                | MagvalError::MissingColumn(_)
                | MagvalError::Validation { .. }
                | MagvalError::InvalidDatetime(_)
                | MagvalError::InvalidDuration(_)
        )
    }
}
