use thiserror::Error;

/// Failures raised by a feed store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Every way a gateway operation can be rejected.
#[derive(Debug, Error)]
pub enum Error {
    #[error("App interface configuration not found")]
    ConfigurationMissing,

    #[error("API is not active")]
    ApiInactive,

    #[error("API was shut down at {0}")]
    ShutdownWindow(chrono::DateTime<chrono::Utc>),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Cursor item {0} not found")]
    CursorNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl Error {
    /// Stable machine-readable identifier, used in error bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigurationMissing => "configuration_missing",
            Error::ApiInactive => "api_inactive",
            Error::ShutdownWindow(_) => "shutdown_window",
            Error::Unauthorized(_) => "unauthorized",
            Error::MalformedPayload(_) => "malformed_payload",
            Error::MissingFields(_) => "missing_fields",
            Error::CursorNotFound(_) => "cursor_not_found",
            Error::Storage(_) => "storage_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedPayload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
