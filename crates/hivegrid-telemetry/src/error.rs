use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to write metrics export {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize metrics: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unsupported export format: {0} (expected json or csv)")]
    UnsupportedFormat(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
