//! Natural-key resolution: per-run indexes from business keys to the
//! surrogate ids assigned during the same reconciliation pass.
//!
//! The indexes are scoped to one run and never shared across runs; matching
//! is exact on trimmed strings, no fuzzy matching.

use std::collections::HashMap;

use uuid::Uuid;

use crate::model::{RegistrationKey, ServiceKey, ServiceRef};

/// Outcome of a short-ref lookup. Sibling services may collide on the ref
/// (description excluded); a collided ref never resolves to an arbitrary
/// service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefMatch {
    None,
    Unique(Uuid),
    Ambiguous,
}

/// In-memory natural-key index built incrementally as rows are planned.
#[derive(Debug, Default)]
pub struct KeyIndex {
    registrations: HashMap<RegistrationKey, Uuid>,
    services: HashMap<ServiceKey, Uuid>,
    service_refs: HashMap<ServiceRef, RefMatch>,
}

impl KeyIndex {
    pub fn new() -> KeyIndex {
        KeyIndex::default()
    }

    /// Assigns an id to a registration key; `Err` carries the id already
    /// holding the key (duplicate).
    pub fn insert_registration(&mut self, key: RegistrationKey) -> Result<Uuid, Uuid> {
        if let Some(&existing) = self.registrations.get(&key) {
            return Err(existing);
        }
        let id = Uuid::new_v4();
        self.registrations.insert(key, id);
        Ok(id)
    }

    /// Assigns an id to a full service key; `Err` on duplicate. Also feeds
    /// the short-ref index, marking refs shared by siblings as ambiguous.
    pub fn insert_service(&mut self, key: ServiceKey) -> Result<Uuid, Uuid> {
        if let Some(&existing) = self.services.get(&key) {
            return Err(existing);
        }
        let id = Uuid::new_v4();
        let slot = self
            .service_refs
            .entry(key.service_ref())
            .or_insert(RefMatch::Unique(id));
        if let RefMatch::Unique(existing) = *slot {
            if existing != id {
                *slot = RefMatch::Ambiguous;
            }
        }
        self.services.insert(key, id);
        Ok(id)
    }

    pub fn find_registration(&self, key: &RegistrationKey) -> Option<Uuid> {
        self.registrations.get(key).copied()
    }

    pub fn find_service(&self, key: &ServiceKey) -> Option<Uuid> {
        self.services.get(key).copied()
    }

    pub fn find_service_by_ref(&self, service_ref: &ServiceRef) -> RefMatch {
        self.service_refs
            .get(service_ref)
            .copied()
            .unwrap_or(RefMatch::None)
    }
}

// =============================================================================
// TESTS
// =============================================================================
