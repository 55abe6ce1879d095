use thiserror::Error;

/// Result type alias for casefile operations.
pub type Result<T> = std::result::Result<T, CasefileError>;

#[derive(Error, Debug)]
pub enum CasefileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Geocoding error: {0}")]
    Geocode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
