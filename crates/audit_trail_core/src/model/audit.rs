//! Audit record shapes: actor, action, property diffs, pending and finalized
//! records.
//!
//! # Invariants
//! - Created changes never carry an old value; Deleted changes never carry a
//!   new value.
//! - `FinalizedAuditRecord::changes_json` is present only when the change list
//!   is non-empty.
//! - The tracking token of a pending record is transient and is dropped on
//!   finalization.

use crate::model::tracking::{EntityState, TrackingToken};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Identity responsible for a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
}

impl Actor {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Default identity used when no actor is established: nil id, empty name.
    pub fn anonymous() -> Self {
        Self {
            id: Uuid::nil(),
            name: String::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_nil() && self.name.is_empty()
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Supplies the actor for the calling context.
pub trait ActorProvider {
    fn current_actor(&self) -> Option<Actor>;

    /// Current actor, or the anonymous identity when none is established.
    fn actor_or_anonymous(&self) -> Actor {
        self.current_actor().unwrap_or_default()
    }
}

impl ActorProvider for Actor {
    fn current_actor(&self) -> Option<Actor> {
        Some(self.clone())
    }
}

impl ActorProvider for Option<Actor> {
    fn current_actor(&self) -> Option<Actor> {
        self.clone()
    }
}

/// Audited mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

impl AuditAction {
    /// Stable string stored in `audit_entries.action`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Created" => Some(Self::Created),
            "Updated" => Some(Self::Updated),
            "Deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Maps a change classification; `Unchanged` has no audit action.
    pub fn from_state(state: EntityState) -> Option<Self> {
        match state {
            EntityState::Unchanged => None,
            EntityState::Created => Some(Self::Created),
            EntityState::Updated => Some(Self::Updated),
            EntityState::Deleted => Some(Self::Deleted),
        }
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Old/new value pair for one scalar property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyChange {
    pub property_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl PropertyChange {
    pub fn new(
        property_name: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            old_value,
            new_value,
        }
    }
}

/// Audit record built before the primary write; the entity id is not known
/// yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAuditRecord {
    /// Back-reference to the originating tracked entity. Never persisted.
    pub token: TrackingToken,
    pub entity_name: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub changes: Vec<PropertyChange>,
}

/// Audit record with its resolved entity id, ready for the audit store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedAuditRecord {
    pub entity_name: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub changes: Vec<PropertyChange>,
    pub changes_json: Option<String>,
}

impl FinalizedAuditRecord {
    pub fn from_pending(pending: PendingAuditRecord, entity_id: impl Into<String>) -> Self {
        let changes_json = serialize_changes(&pending);
        Self {
            entity_name: pending.entity_name,
            entity_id: entity_id.into(),
            action: pending.action,
            timestamp: pending.timestamp,
            actor: pending.actor,
            changes: pending.changes,
            changes_json,
        }
    }
}

fn serialize_changes(pending: &PendingAuditRecord) -> Option<String> {
    if pending.changes.is_empty() {
        return None;
    }
    match serde_json::to_string(&pending.changes) {
        Ok(json) => Some(json),
        Err(err) => {
            // Property rows are still persisted individually.
            error!(
                "event=changes_json module=audit status=error entity={} token={} error={}",
                pending.entity_name, pending.token, err
            );
            None
        }
    }
}
