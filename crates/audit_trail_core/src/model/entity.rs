//! Static per-type audit descriptors.
//!
//! # Responsibility
//! - Declare, per entity type, which scalar fields are auditable and which
//!   one is the primary key.
//! - Replace runtime property introspection with an explicit field list.
//!
//! # Invariants
//! - `entity_name` and every field name are plain SQL identifiers.
//! - `key_field` is one of `fields`.
//! - A snapshot produced by `HasAuditableFields::snapshot` lists exactly
//!   `fields`, in the same order.

use crate::model::validation::ValidationError;
use crate::model::value::Snapshot;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

pub(crate) static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Who assigns the primary-key value of a new entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGeneration {
    /// Assigned by the store during the primary write (e.g. SQLite rowid).
    Store,
    /// Assigned by the caller before the entity is tracked.
    Caller,
}

/// Static audit metadata for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Logical entity-type name; also the table name.
    pub entity_name: &'static str,
    pub key_field: &'static str,
    pub key_generation: KeyGeneration,
    /// Auditable scalar fields, key included.
    pub fields: &'static [&'static str],
}

impl EntityDescriptor {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entity_name.trim().is_empty() {
            return Err(ValidationError::EmptyEntityName);
        }
        self.check_identifier(self.entity_name)?;

        let mut seen = BTreeSet::new();
        for field in self.fields {
            self.check_identifier(field)?;
            if !seen.insert(*field) {
                return Err(ValidationError::DuplicateField {
                    entity_name: self.entity_name.to_string(),
                    field: (*field).to_string(),
                });
            }
        }

        if !seen.contains(self.key_field) {
            return Err(ValidationError::MissingKeyField {
                entity_name: self.entity_name.to_string(),
                key_field: self.key_field.to_string(),
            });
        }

        Ok(())
    }

    /// Checks that a snapshot matches the declared field list exactly.
    pub fn check_snapshot(&self, snapshot: &Snapshot) -> Result<(), ValidationError> {
        if snapshot.field_names().eq(self.fields.iter().copied()) {
            return Ok(());
        }
        Err(ValidationError::SnapshotShape {
            entity_name: self.entity_name.to_string(),
            expected: self.fields.iter().map(|f| (*f).to_string()).collect(),
            actual: snapshot.field_names().map(str::to_string).collect(),
        })
    }

    /// Auditable fields other than the key, in declaration order.
    pub fn value_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        let key = self.key_field;
        self.fields.iter().copied().filter(move |field| *field != key)
    }

    fn check_identifier(&self, identifier: &str) -> Result<(), ValidationError> {
        if IDENTIFIER_RE.is_match(identifier) {
            return Ok(());
        }
        Err(ValidationError::InvalidIdentifier {
            entity_name: self.entity_name.to_string(),
            identifier: identifier.to_string(),
        })
    }
}

/// Capability implemented by every entity type under audit.
pub trait HasAuditableFields {
    const DESCRIPTOR: EntityDescriptor;

    /// Current scalar state, one value per `DESCRIPTOR.fields` entry.
    fn snapshot(&self) -> Snapshot;
}
