//! Unit-of-work change tracking.
//!
//! # Responsibility
//! - Hold the original and current snapshot of every entity taking part in
//!   one commit.
//! - Hand out a stable `TrackingToken` per entity so audit records can be
//!   correlated with their entity after the primary write.
//!
//! # Invariants
//! - A token is the arena index of its entity and is never reused within one
//!   `UnitOfWork`.
//! - Snapshots always match the entity descriptor field list.
//! - Detached entities (removed by an earlier commit) take no further part in
//!   writes or audits.

use crate::model::entity::{EntityDescriptor, HasAuditableFields};
use crate::model::validation::ValidationError;
use crate::model::value::{FieldValue, Snapshot};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Correlation token carried from tracking through audit finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackingToken(usize);

impl TrackingToken {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for TrackingToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Change classification of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    Unchanged,
    Created,
    Updated,
    Deleted,
}

impl EntityState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// One entity under change management.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    token: TrackingToken,
    descriptor: EntityDescriptor,
    original: Option<Snapshot>,
    current: Snapshot,
    pending_removal: bool,
    detached: bool,
}

impl TrackedEntity {
    pub fn token(&self) -> TrackingToken {
        self.token
    }

    pub fn entity_name(&self) -> &'static str {
        self.descriptor.entity_name
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Last persisted state; `None` when the entity was never persisted.
    pub fn original(&self) -> Option<&Snapshot> {
        self.original.as_ref()
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn is_pending_removal(&self) -> bool {
        self.pending_removal
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn key_value(&self) -> Option<&FieldValue> {
        self.current
            .get(self.descriptor.key_field)
            .filter(|value| !value.is_null())
    }

    /// Stringified primary key, when one is known.
    pub fn key(&self) -> Option<String> {
        self.key_value().and_then(FieldValue::to_audit_string)
    }

    /// Stores a key materialized by the primary write.
    pub fn assign_key(&mut self, key: FieldValue) {
        let key_field = self.descriptor.key_field;
        self.current.set(key_field, key.clone());
        if let Some(original) = self.original.as_mut() {
            original.set(key_field, key);
        }
    }
}

/// Arena of tracked entities for one logical commit.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    entries: Vec<TrackedEntity>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks an entity with no prior persisted state.
    pub fn track_new<E: HasAuditableFields>(
        &mut self,
        entity: &E,
    ) -> Result<TrackingToken, ValidationError> {
        self.push(E::DESCRIPTOR, None, entity.snapshot())
    }

    /// Tracks an entity as loaded from storage; its current state becomes the
    /// original snapshot.
    pub fn track_loaded<E: HasAuditableFields>(
        &mut self,
        entity: &E,
    ) -> Result<TrackingToken, ValidationError> {
        let snapshot = entity.snapshot();
        self.push(E::DESCRIPTOR, Some(snapshot.clone()), snapshot)
    }

    /// Replaces the current snapshot with the entity's latest in-memory state.
    ///
    /// # Errors
    /// - `KeyChanged` when the refreshed key differs from the stored key.
    pub fn refresh<E: HasAuditableFields>(
        &mut self,
        token: TrackingToken,
        entity: &E,
    ) -> Result<(), ValidationError> {
        let mut snapshot = entity.snapshot();
        E::DESCRIPTOR.check_snapshot(&snapshot)?;
        let tracked = self.live_mut(token)?;
        if tracked.descriptor.entity_name != E::DESCRIPTOR.entity_name {
            return Err(ValidationError::EntityTypeChanged {
                token,
                tracked_as: tracked.descriptor.entity_name.to_string(),
                refreshed_as: E::DESCRIPTOR.entity_name.to_string(),
            });
        }
        // A store-assigned key survives refreshes from callers that never
        // copied it back.
        let key_field = tracked.descriptor.key_field;
        if snapshot.get(key_field).map_or(true, FieldValue::is_null) {
            if let Some(assigned) = tracked.key_value().cloned() {
                snapshot.set(key_field, assigned);
            }
        }
        if let Some(stored) = tracked
            .original
            .as_ref()
            .and_then(|original| original.get(key_field))
            .filter(|key| !key.is_null())
        {
            if snapshot.get(key_field) != Some(stored) {
                return Err(ValidationError::KeyChanged {
                    token,
                    entity_name: tracked.descriptor.entity_name.to_string(),
                    stored: stored.to_string(),
                    requested: snapshot
                        .get(key_field)
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                });
            }
        }
        tracked.current = snapshot;
        Ok(())
    }

    /// Schedules the entity for removal in the next commit.
    pub fn mark_deleted(&mut self, token: TrackingToken) -> Result<(), ValidationError> {
        self.live_mut(token)?.pending_removal = true;
        Ok(())
    }

    pub fn entity(&self, token: TrackingToken) -> Option<&TrackedEntity> {
        self.entries.get(token.index())
    }

    pub fn key_of(&self, token: TrackingToken) -> Option<String> {
        self.entity(token).and_then(TrackedEntity::key)
    }

    pub fn entities(&self) -> &[TrackedEntity] {
        &self.entries
    }

    /// Mutable view handed to the persistence collaborator.
    pub fn entities_mut(&mut self) -> &mut [TrackedEntity] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks the tracked state as persisted.
    ///
    /// Current snapshots become the new originals; removed entities are
    /// detached. Called after a successful primary write.
    pub fn accept_changes(&mut self) {
        for tracked in self.entries.iter_mut().filter(|t| !t.detached) {
            if tracked.pending_removal {
                tracked.detached = true;
                tracked.pending_removal = false;
            } else {
                tracked.original = Some(tracked.current.clone());
            }
        }
    }

    fn push(
        &mut self,
        descriptor: EntityDescriptor,
        original: Option<Snapshot>,
        current: Snapshot,
    ) -> Result<TrackingToken, ValidationError> {
        descriptor.validate()?;
        descriptor.check_snapshot(&current)?;

        let token = TrackingToken(self.entries.len());
        self.entries.push(TrackedEntity {
            token,
            descriptor,
            original,
            current,
            pending_removal: false,
            detached: false,
        });
        Ok(token)
    }

    fn live_mut(&mut self, token: TrackingToken) -> Result<&mut TrackedEntity, ValidationError> {
        self.entries
            .get_mut(token.index())
            .filter(|tracked| !tracked.detached)
            .ok_or(ValidationError::UnknownToken(token))
    }
}
