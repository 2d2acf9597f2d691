use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to resolve query text for '{query}': {message}")]
    Resolution { query: String, message: String },

    #[error("error when executing '{query}': {message}")]
    Execution { query: String, message: String },

    #[error("failed to encode row for '{query}': {message}")]
    Encoding { query: String, message: String },

    #[error("failed to persist '{name}': {message}")]
    Persist { name: String, message: String },

    #[error("failed to build bundle: {0}")]
    Bundle(String),

    #[error("export cancelled before '{query}' completed")]
    Cancelled { query: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExportError {
    /// The catalog entry this error is scoped to, if any. Bundle and
    /// configuration errors are not attributable to a single query.
    pub fn query_name(&self) -> Option<&str> {
        match self {
            ExportError::Resolution { query, .. }
            | ExportError::Execution { query, .. }
            | ExportError::Encoding { query, .. }
            | ExportError::Cancelled { query } => Some(query),
            ExportError::Persist { name, .. } => Some(name),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
