//! Change snapshot extractor.
//!
//! # Responsibility
//! - Classify tracked entities as Created/Updated/Deleted/Unchanged.
//! - Produce per-property old/new pairs for the classified entities.
//!
//! # Invariants
//! - Pure: no I/O, no mutation of the tracked set.
//! - Unchanged and detached entities never reach downstream stages.
//! - The audit subsystem's own tables are never classified as changed.

use crate::config::AuditConfig;
use crate::model::audit::PropertyChange;
use crate::model::tracking::{EntityState, TrackedEntity, TrackingToken};
use crate::model::value::Snapshot;

/// Table holding audit entries.
pub const AUDIT_ENTRIES_TABLE: &str = "audit_entries";
/// Table holding per-property audit rows.
pub const AUDIT_ENTRY_PROPERTIES_TABLE: &str = "audit_entry_properties";

/// Classified entity with its property diff.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedChange {
    pub token: TrackingToken,
    pub entity_name: String,
    pub state: EntityState,
    pub changes: Vec<PropertyChange>,
}

/// Extraction switches derived from `AuditConfig`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions<'a> {
    pub excluded_entities: &'a [String],
    pub capture_created_values: bool,
}

impl<'a> ExtractOptions<'a> {
    pub fn from_config(config: &'a AuditConfig) -> Self {
        Self {
            excluded_entities: &config.excluded_entities,
            capture_created_values: config.capture_created_values,
        }
    }

    fn is_excluded(&self, entity_name: &str) -> bool {
        is_audit_entity(entity_name)
            || self
                .excluded_entities
                .iter()
                .any(|excluded| excluded == entity_name)
    }
}

/// Returns whether the name belongs to the audit subsystem itself.
pub fn is_audit_entity(entity_name: &str) -> bool {
    entity_name == AUDIT_ENTRIES_TABLE || entity_name == AUDIT_ENTRY_PROPERTIES_TABLE
}

/// Classifies one tracked entity.
///
/// An entity created and removed inside the same unit of work was never
/// persisted and is reported as `Unchanged`.
pub fn classify(entity: &TrackedEntity) -> EntityState {
    if entity.is_detached() {
        return EntityState::Unchanged;
    }
    match (entity.original(), entity.is_pending_removal()) {
        (None, true) => EntityState::Unchanged,
        (None, false) => EntityState::Created,
        (Some(_), true) => EntityState::Deleted,
        (Some(original), false) => {
            if has_differences(original, entity.current()) {
                EntityState::Updated
            } else {
                EntityState::Unchanged
            }
        }
    }
}

/// Classifies the tracked set and extracts property diffs.
pub fn extract_changes(
    tracked: &[TrackedEntity],
    options: &ExtractOptions<'_>,
) -> Vec<ClassifiedChange> {
    tracked
        .iter()
        .filter(|entity| !options.is_excluded(entity.entity_name()))
        .filter_map(|entity| {
            let state = classify(entity);
            let changes = match state {
                EntityState::Unchanged => return None,
                EntityState::Created => created_changes(entity, options.capture_created_values),
                EntityState::Updated => updated_changes(entity),
                EntityState::Deleted => deleted_changes(entity),
            };
            Some(ClassifiedChange {
                token: entity.token(),
                entity_name: entity.entity_name().to_string(),
                state,
                changes,
            })
        })
        .collect()
}

fn has_differences(original: &Snapshot, current: &Snapshot) -> bool {
    current
        .iter()
        .any(|(name, value)| original.get(name) != Some(value))
}

fn created_changes(entity: &TrackedEntity, capture_values: bool) -> Vec<PropertyChange> {
    if !capture_values {
        return Vec::new();
    }
    entity
        .current()
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| PropertyChange::new(name, None, value.to_audit_string()))
        .collect()
}

fn updated_changes(entity: &TrackedEntity) -> Vec<PropertyChange> {
    let Some(original) = entity.original() else {
        return Vec::new();
    };
    entity
        .current()
        .iter()
        .filter_map(|(name, current)| {
            let previous = original.get(name);
            if previous == Some(current) {
                return None;
            }
            Some(PropertyChange::new(
                name,
                previous.and_then(|value| value.to_audit_string()),
                current.to_audit_string(),
            ))
        })
        .collect()
}

fn deleted_changes(entity: &TrackedEntity) -> Vec<PropertyChange> {
    let last_known = entity.original().unwrap_or_else(|| entity.current());
    last_known
        .iter()
        .map(|(name, value)| PropertyChange::new(name, value.to_audit_string(), None))
        .collect()
}
