//! Identifier resolver.
//!
//! # Responsibility
//! - After the primary write, read each originating entity's now-materialized
//!   primary key and finalize the pending record with it.
//!
//! # Invariants
//! - Matching goes through the tracking token only; entity name and
//!   classification are cross-checked, never used to search.
//! - Resolution never fails the commit: unmatched records are finalized with
//!   the configured placeholder id.

use crate::audit::extract::classify;
use crate::model::audit::{AuditAction, FinalizedAuditRecord, PendingAuditRecord};
use crate::model::tracking::{EntityState, TrackedEntity, TrackingToken};
use crate::repo::entity_repo::PersistenceGateway;
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Recoverable failure to match a pending record to its entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionIssue {
    MissingEntity {
        token: TrackingToken,
        entity_name: String,
    },
    EntityMismatch {
        token: TrackingToken,
        expected: String,
        found: String,
    },
    KeyUnavailable {
        token: TrackingToken,
        entity_name: String,
    },
}

impl ResolutionIssue {
    pub fn token(&self) -> TrackingToken {
        match self {
            Self::MissingEntity { token, .. }
            | Self::EntityMismatch { token, .. }
            | Self::KeyUnavailable { token, .. } => *token,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::MissingEntity { .. } => "missing_entity",
            Self::EntityMismatch { .. } => "entity_mismatch",
            Self::KeyUnavailable { .. } => "key_unavailable",
        }
    }
}

impl Display for ResolutionIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEntity { token, entity_name } => {
                write!(f, "no tracked `{entity_name}` entity for token {token}")
            }
            Self::EntityMismatch {
                token,
                expected,
                found,
            } => write!(
                f,
                "token {token} points at {found}, audit record expects {expected}"
            ),
            Self::KeyUnavailable { token, entity_name } => {
                write!(f, "`{entity_name}` entity {token} has no primary key after write")
            }
        }
    }
}

impl Error for ResolutionIssue {}

/// Finalized records plus the issues recovered along the way.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resolution {
    pub records: Vec<FinalizedAuditRecord>,
    pub issues: Vec<ResolutionIssue>,
}

/// Resolves entity ids for all pending records.
///
/// `post_write` is the tracked set as left by the primary write, before
/// changes are accepted.
pub fn resolve_identifiers<G: PersistenceGateway + ?Sized>(
    pending: Vec<PendingAuditRecord>,
    post_write: &[TrackedEntity],
    gateway: &G,
    unresolved_id: &str,
) -> Resolution {
    let mut resolution = Resolution::default();

    for record in pending {
        let entity_id = match match_entity(&record, post_write)
            .and_then(|entity| read_key(&record, entity, gateway))
        {
            Ok(key) => key,
            Err(issue) => {
                warn!(
                    "event=identifier_resolution module=audit status=warn entity={} token={} reason={}",
                    record.entity_name,
                    record.token,
                    issue.code()
                );
                resolution.issues.push(issue);
                unresolved_id.to_string()
            }
        };
        resolution
            .records
            .push(FinalizedAuditRecord::from_pending(record, entity_id));
    }

    resolution
}

fn match_entity<'a>(
    record: &PendingAuditRecord,
    post_write: &'a [TrackedEntity],
) -> Result<&'a TrackedEntity, ResolutionIssue> {
    let entity = post_write
        .get(record.token.index())
        .filter(|entity| entity.token() == record.token)
        .ok_or_else(|| ResolutionIssue::MissingEntity {
            token: record.token,
            entity_name: record.entity_name.clone(),
        })?;

    let state = classify(entity);
    let consistent = entity.entity_name() == record.entity_name
        && match record.action {
            AuditAction::Deleted => state == EntityState::Deleted,
            AuditAction::Created | AuditAction::Updated => !entity.is_pending_removal(),
        };
    if !consistent {
        return Err(ResolutionIssue::EntityMismatch {
            token: record.token,
            expected: format!("{} {}", record.action, record.entity_name),
            found: format!("{} {}", state.as_str(), entity.entity_name()),
        });
    }

    Ok(entity)
}

fn read_key<G: PersistenceGateway + ?Sized>(
    record: &PendingAuditRecord,
    entity: &TrackedEntity,
    gateway: &G,
) -> Result<String, ResolutionIssue> {
    gateway
        .load_current_key(entity)
        .ok_or_else(|| ResolutionIssue::KeyUnavailable {
            token: record.token,
            entity_name: record.entity_name.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::{resolve_identifiers, ResolutionIssue};
    use crate::audit::build::build_records;
    use crate::audit::clock::SystemClock;
    use crate::audit::extract::{extract_changes, ExtractOptions};
    use crate::model::audit::Actor;
    use crate::model::identification_type::IdentificationType;
    use crate::model::tracking::{TrackedEntity, UnitOfWork};
    use crate::model::value::FieldValue;
    use crate::repo::entity_repo::{PersistenceGateway, PrimaryWriteError};

    struct KeyOnlyGateway;

    impl PersistenceGateway for KeyOnlyGateway {
        fn execute_primary_write(
            &self,
            _tracked: &mut [TrackedEntity],
        ) -> Result<usize, PrimaryWriteError> {
            Ok(0)
        }
    }

    fn pending_for(uow: &UnitOfWork) -> Vec<crate::model::audit::PendingAuditRecord> {
        let classified = extract_changes(uow.entities(), &ExtractOptions::default());
        build_records(classified, &Actor::anonymous(), &SystemClock).unwrap()
    }

    #[test]
    fn same_type_records_resolve_to_their_own_keys() {
        let mut uow = UnitOfWork::new();
        for name in ["A", "B", "C"] {
            uow.track_new(&IdentificationType::new(name, "US")).unwrap();
        }
        let pending = pending_for(&uow);
        // Keys assigned out of tracking order on purpose.
        for (entity, key) in uow.entities_mut().iter_mut().zip([30_i64, 10, 20]) {
            entity.assign_key(FieldValue::Integer(key));
        }

        let resolution = resolve_identifiers(pending, uow.entities(), &KeyOnlyGateway, "N/A");

        assert!(resolution.issues.is_empty());
        let ids: Vec<_> = resolution
            .records
            .iter()
            .map(|r| r.entity_id.as_str())
            .collect();
        assert_eq!(ids, vec!["30", "10", "20"]);
    }

    #[test]
    fn missing_key_finalizes_with_placeholder() {
        let mut uow = UnitOfWork::new();
        uow.track_new(&IdentificationType::new("A", "US")).unwrap();
        let pending = pending_for(&uow);

        let resolution = resolve_identifiers(pending, uow.entities(), &KeyOnlyGateway, "N/A");

        assert_eq!(resolution.records[0].entity_id, "N/A");
        assert!(matches!(
            resolution.issues[0],
            ResolutionIssue::KeyUnavailable { .. }
        ));
    }

    #[test]
    fn token_outside_post_write_set_is_missing() {
        let mut uow = UnitOfWork::new();
        uow.track_new(&IdentificationType::new("A", "US")).unwrap();
        let pending = pending_for(&uow);

        let resolution = resolve_identifiers(pending, &[], &KeyOnlyGateway, "unknown");

        assert_eq!(resolution.records[0].entity_id, "unknown");
        assert!(matches!(
            resolution.issues[0],
            ResolutionIssue::MissingEntity { .. }
        ));
    }
}
