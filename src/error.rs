use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Diagnostic)]
pub enum SptError {
    #[error("invalid service endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("missing config file spt-dm.json")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing config section: {0}")]
    MissingConfigSection(&'static str),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("unexpected catalog response: {0}")]
    CatalogResponse(String),

    #[error("dataset creation for {0} returned no id")]
    MissingDatasetId(String),

    #[error("GeoServer request failed: {0}")]
    GeoServerHttp(String),

    #[error("GeoServer returned status {status}: {message}")]
    GeoServerStatus { status: u16, message: String },

    #[error("archive member escapes extraction directory: {0}")]
    #[diagnostic(help("treat the destination directory as untrusted and re-create it"))]
    PathTraversal(String),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid date {value:?} for format {format:?}")]
    InvalidDate { value: String, format: String },

    #[error("invalid watershed folder name: {0}")]
    InvalidFolderName(String),

    #[error("invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("shapefile missing files with extensions: {0}")]
    ShapefileIncomplete(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SptError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SptError::InvalidEndpoint(_)
                | SptError::MissingConfig
                | SptError::ConfigRead(_)
                | SptError::ConfigParse(_)
                | SptError::MissingConfigSection(_)
                | SptError::MissingDatasetId(_)
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SptError::CatalogHttp(_)
                | SptError::CatalogStatus { .. }
                | SptError::CatalogResponse(_)
                | SptError::GeoServerHttp(_)
                | SptError::GeoServerStatus { .. }
        )
    }
}

pub(crate) fn tolerate<T>(result: Result<T, SptError>, what: &str) -> Result<Option<T>, SptError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(error = %err, "{what} failed");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SptError::MissingDatasetId("x".to_string()).is_fatal());
        assert!(!SptError::CatalogHttp("timeout".to_string()).is_fatal());
        assert!(SptError::CatalogHttp("timeout".to_string()).is_remote());
        assert!(!SptError::PathTraversal("../evil".to_string()).is_remote());
    }

    #[test]
    fn tolerate_propagates_only_fatal() {
        let transient: Result<u8, SptError> = Err(SptError::CatalogHttp("reset".to_string()));
        assert!(tolerate(transient, "search").unwrap().is_none());
        let fatal: Result<u8, SptError> = Err(SptError::MissingDatasetId("x".to_string()));
        assert!(tolerate(fatal, "create").is_err());
    }
}
