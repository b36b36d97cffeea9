//! In-memory repository.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{ActivationRepository, RepositoryError};
use crate::activation::Activation;

/// Map-backed repository for tests and ephemeral runs.
///
/// Values are cloned on the way in and out, so callers never share a
/// record with the store.
#[derive(Debug, Default)]
pub struct InMemoryActivationRepository {
    records: RwLock<HashMap<String, Activation>>,
}

impl InMemoryActivationRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActivationRepository for InMemoryActivationRepository {
    fn save(&self, activation: &Activation) -> Result<(), RepositoryError> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(external_id) = activation.external_id.as_deref() {
            let duplicate = records.values().any(|existing| {
                existing.id != activation.id
                    && existing.external_id.as_deref() == Some(external_id)
            });
            if duplicate {
                return Err(RepositoryError::storage(format!(
                    "external_id {external_id} already bound to another activation"
                )));
            }
        }

        records.insert(activation.id.clone(), activation.clone());
        Ok(())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Activation>, RepositoryError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(id).cloned())
    }

    fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Activation>, RepositoryError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .values()
            .find(|record| record.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    fn find_active(&self) -> Result<Vec<Activation>, RepositoryError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<Activation> = records
            .values()
            .filter(|record| record.is_active())
            .cloned()
            .collect();
        // Deterministic iteration order for poll passes.
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }
}
