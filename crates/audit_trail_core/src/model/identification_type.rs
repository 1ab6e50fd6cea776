//! Identification type: reference entity under audit.
//!
//! Its key is an SQLite-assigned integer, so new instances have no id until
//! the primary write completes.

use crate::model::entity::{EntityDescriptor, HasAuditableFields, KeyGeneration};
use crate::model::value::Snapshot;
use serde::{Deserialize, Serialize};

/// Kind of identity document accepted by the system (passport, national id...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationType {
    /// `None` until the store assigns a key.
    pub id: Option<i64>,
    pub name: String,
    pub description: String,
    /// ISO 3166-1 alpha-2 code.
    pub country_code: String,
    pub max_length: i64,
    pub validation_pattern: String,
    pub is_active: bool,
}

impl IdentificationType {
    pub fn new(name: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: String::new(),
            country_code: country_code.into(),
            max_length: 20,
            validation_pattern: String::new(),
            is_active: true,
        }
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

impl HasAuditableFields for IdentificationType {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        entity_name: "identification_types",
        key_field: "id",
        key_generation: KeyGeneration::Store,
        fields: &[
            "id",
            "name",
            "description",
            "country_code",
            "max_length",
            "validation_pattern",
            "is_active",
        ],
    };

    fn snapshot(&self) -> Snapshot {
        Snapshot::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("description", self.description.as_str())
            .with("country_code", self.country_code.as_str())
            .with("max_length", self.max_length)
            .with("validation_pattern", self.validation_pattern.as_str())
            .with("is_active", self.is_active)
    }
}
