#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("archive error: {0}")]
    Archive(#[from] archive_model::ArchiveError),

    #[error("repository I/O error: {0}")]
    Io(#[from] std::io::Error),
}
