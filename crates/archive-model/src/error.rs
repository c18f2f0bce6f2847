use std::path::PathBuf;

use module_core::InvalidName;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("invalid module name: {0}")]
    InvalidName(#[from] InvalidName),

    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(#[from] serde_json::Error),

    #[error("archive I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip archive error at {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive root does not exist: {0}")]
    RootNotFound(PathBuf),
}
