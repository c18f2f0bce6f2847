use module_core::InvalidName;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("invalid module name: {0}")]
    InvalidName(#[from] InvalidName),

    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("archive I/O error: {0}")]
    ArchiveIoException(#[from] std::io::Error),

    #[error("no compiler plugin claims this archive")]
    NoCompiler,

    #[error("compile failed: {0}")]
    CompileFailure(String),

    #[error("dependency could not be resolved: {0}")]
    LinkageFailure(String),

    #[error("candidate is older than the currently published revision")]
    HigherRevisionAvailable,

    #[error("archive content hash did not match the stored digest")]
    HashMismatch,

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<archive_model::ArchiveError> for LoaderError {
    fn from(err: archive_model::ArchiveError) -> Self {
        match err {
            archive_model::ArchiveError::InvalidName(e) => LoaderError::InvalidName(e),
            archive_model::ArchiveError::MalformedDescriptor(e) => {
                LoaderError::MalformedDescriptor(e.to_string())
            }
            other => LoaderError::ArchiveIoException(std::io::Error::other(other.to_string())),
        }
    }
}
