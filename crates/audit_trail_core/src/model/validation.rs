//! Validation errors for tracked entities and entity descriptors.

use crate::model::tracking::TrackingToken;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Malformed input to the classification/build steps.
///
/// Raised before any write happens; a commit that hits one of these is
/// aborted without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyEntityName,
    InvalidIdentifier {
        entity_name: String,
        identifier: String,
    },
    DuplicateField {
        entity_name: String,
        field: String,
    },
    MissingKeyField {
        entity_name: String,
        key_field: String,
    },
    SnapshotShape {
        entity_name: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    EntityTypeChanged {
        token: TrackingToken,
        tracked_as: String,
        refreshed_as: String,
    },
    UnknownToken(TrackingToken),
    /// A persisted entity's key was modified; keys are immutable once stored.
    KeyChanged {
        token: TrackingToken,
        entity_name: String,
        stored: String,
        requested: String,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyEntityName => write!(f, "entity name must not be empty"),
            Self::InvalidIdentifier {
                entity_name,
                identifier,
            } => write!(
                f,
                "invalid identifier `{identifier}` declared by entity `{entity_name}`"
            ),
            Self::DuplicateField { entity_name, field } => {
                write!(f, "entity `{entity_name}` declares field `{field}` twice")
            }
            Self::MissingKeyField {
                entity_name,
                key_field,
            } => write!(
                f,
                "entity `{entity_name}` key field `{key_field}` is not an auditable field"
            ),
            Self::SnapshotShape {
                entity_name,
                expected,
                actual,
            } => write!(
                f,
                "snapshot of `{entity_name}` has fields [{}], expected [{}]",
                actual.join(", "),
                expected.join(", ")
            ),
            Self::EntityTypeChanged {
                token,
                tracked_as,
                refreshed_as,
            } => write!(
                f,
                "tracked entity {token} is `{tracked_as}`, cannot refresh it as `{refreshed_as}`"
            ),
            Self::UnknownToken(token) => write!(f, "no tracked entity for token {token}"),
            Self::KeyChanged {
                token,
                entity_name,
                stored,
                requested,
            } => write!(
                f,
                "`{entity_name}` entity {token} has stored key `{stored}`; cannot change it to `{requested}`"
            ),
        }
    }
}

impl Error for ValidationError {}
