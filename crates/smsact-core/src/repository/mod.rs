//! Activation persistence.
//!
//! The core only needs point lookups, a correlation-id lookup and the
//! "all non-terminal" query, so that is the whole trait. Two
//! implementations: an in-memory map for tests and ephemeral runs, and a
//! SQLite store for anything that must survive a restart.
//!
//! Records move through the repository by value: `save` stores a copy and
//! lookups return copies, so no caller ever holds an alias into the store.
//! No transactional guarantees beyond per-call atomicity.

mod memory;
mod sqlite;

pub use memory::InMemoryActivationRepository;
pub use sqlite::SqliteActivationRepository;

use thiserror::Error;

use crate::activation::Activation;

/// Storage failures. Everything maps onto one variant: callers do not
/// branch on storage details, they surface them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The underlying store rejected or failed the operation.
    #[error("storage error: {message}")]
    Storage {
        /// What the store reported.
        message: String,
    },
}

impl RepositoryError {
    fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(error: rusqlite::Error) -> Self {
        Self::storage(error.to_string())
    }
}

/// Persistence operations the core consumes.
pub trait ActivationRepository: Send + Sync {
    /// Saves or updates an activation, keyed by its remote id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError`] when the store rejects the write (including a
    /// duplicate `external_id` on a different record).
    fn save(&self, activation: &Activation) -> Result<(), RepositoryError>;

    /// Looks an activation up by its remote id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError`] on storage failure; an unknown id is `Ok(None)`.
    fn find_by_id(&self, id: &str) -> Result<Option<Activation>, RepositoryError>;

    /// Looks an activation up by the caller-assigned correlation id.
    ///
    /// # Errors
    ///
    /// [`RepositoryError`] on storage failure; an unknown id is `Ok(None)`.
    fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Activation>, RepositoryError>;

    /// Returns every record not yet in a terminal state — the working set
    /// of a poll pass.
    ///
    /// # Errors
    ///
    /// [`RepositoryError`] on storage failure.
    fn find_active(&self) -> Result<Vec<Activation>, RepositoryError>;
}
