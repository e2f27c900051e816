//! Error types for the station registry tool.
//!
//! Uses `thiserror` for structured error definitions that provide
//! clear context about what went wrong.

use thiserror::Error;

/// Error type for fetching and parsing source pages.
#[derive(Error, Debug)]
pub enum ScraperError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to parse HTML content
    #[error("Failed to parse HTML: {0}")]
    ParseError(String),

    /// The required element isn't found in HTML
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// URL parsing or validation failed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Page does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ScraperError {
    /// Returns true if the error comes from the document structure rather than transport.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ScraperError::ParseError(_) | ScraperError::ElementNotFound(_)
        )
    }
}

/// Error type for geocoding service lookups.
#[derive(Error, Debug)]
pub enum GeocodeError {
    /// HTTP request to the service failed
    #[error("Geocoding request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Service answered with an error status
    #[error("Geocoding service error: {0}")]
    ApiError(String),

    /// Failed to build the request URL
    #[error("Invalid geocoding URL: {0}")]
    InvalidUrl(String),
}

/// Error type for registry file operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Failed to read or write the registry file
    #[error("Registry I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A row could not be understood
    #[error("Invalid registry row at line {line}: {message}")]
    InvalidRow { line: usize, message: String },

    /// A field cannot be stored in the tab-separated format
    #[error("Field '{field}' of station {key} {reason}")]
    InvalidField {
        key: String,
        field: &'static str,
        reason: &'static str,
    },
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Missing required configuration value
    #[error("Missing required config value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Error type for the GeoJSON export.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Registry could not be loaded
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Failed to serialize features
    #[error("Failed to serialize GeoJSON: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Failed to write output file
    #[error("Failed to write GeoJSON: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Run-fatal errors of the update pipeline.
///
/// Anything reported here means the previous registry file was left untouched.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Prefecture index could not be fetched or parsed
    #[error("Failed to read prefecture index: {0}")]
    Index(#[source] ScraperError),

    /// A prefecture listing could not be fetched or parsed
    #[error("Failed to read station list of {pref_id}: {source}")]
    Listing {
        pref_id: String,
        #[source]
        source: ScraperError,
    },

    /// Registry could not be loaded or saved
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
