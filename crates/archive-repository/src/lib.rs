//! Persisted archive storage and the timer-driven poller that feeds new
//! and deleted archives into a `ModuleLoader`.

mod error;
mod poller;
mod repository;

pub use error::RepositoryError;
pub use poller::{RepositoryPoller, RepositorySource};
pub use repository::{ArchiveRepository, ArchiveSummary, RepositorySummary};
