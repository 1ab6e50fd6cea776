//! Audit record builder.
//!
//! Turns classified changes into pending records. Every record of one commit
//! shares a single timestamp taken from the clock.

use crate::audit::clock::Clock;
use crate::audit::extract::ClassifiedChange;
use crate::model::audit::{Actor, AuditAction, PendingAuditRecord};
use crate::model::tracking::EntityState;
use crate::model::validation::ValidationError;

/// Builds one pending record per classified change.
///
/// `Unchanged` entries and `Updated` entries without a differing property
/// produce no record.
///
/// # Errors
/// - `ValidationError::EmptyEntityName` for a change without entity name.
pub fn build_records<C: Clock + ?Sized>(
    classified: Vec<ClassifiedChange>,
    actor: &Actor,
    clock: &C,
) -> Result<Vec<PendingAuditRecord>, ValidationError> {
    let emitted: Vec<_> = classified
        .into_iter()
        .filter_map(|change| {
            let action = AuditAction::from_state(change.state)?;
            if change.state == EntityState::Updated && change.changes.is_empty() {
                return None;
            }
            Some((action, change))
        })
        .collect();

    if emitted.is_empty() {
        return Ok(Vec::new());
    }

    let timestamp = clock.now();
    emitted
        .into_iter()
        .map(|(action, change)| {
            if change.entity_name.trim().is_empty() {
                return Err(ValidationError::EmptyEntityName);
            }
            Ok(PendingAuditRecord {
                token: change.token,
                entity_name: change.entity_name,
                action,
                timestamp,
                actor: actor.clone(),
                changes: change.changes,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::build_records;
    use crate::audit::clock::Clock;
    use crate::audit::extract::{extract_changes, ClassifiedChange, ExtractOptions};
    use crate::model::audit::{Actor, AuditAction};
    use crate::model::identification_type::IdentificationType;
    use crate::model::tracking::{EntityState, UnitOfWork};
    use crate::model::validation::ValidationError;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::cell::Cell;
    use uuid::Uuid;

    struct CountingClock {
        calls: Cell<u32>,
        base: DateTime<Utc>,
    }

    impl Clock for CountingClock {
        fn now(&self) -> DateTime<Utc> {
            let calls = self.calls.get();
            self.calls.set(calls + 1);
            self.base + Duration::seconds(i64::from(calls))
        }
    }

    fn counting_clock() -> CountingClock {
        CountingClock {
            calls: Cell::new(0),
            base: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn one_clock_read_per_commit() {
        let mut uow = UnitOfWork::new();
        for name in ["Passport", "Visa", "Driver License"] {
            uow.track_new(&IdentificationType::new(name, "US")).unwrap();
        }
        let classified = extract_changes(uow.entities(), &ExtractOptions::default());
        let clock = counting_clock();
        let actor = Actor::new(Uuid::new_v4(), "auditor");

        let records = build_records(classified, &actor, &clock).unwrap();

        assert_eq!(clock.calls.get(), 1);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.timestamp == clock.base));
        assert!(records.iter().all(|r| r.actor == actor));
        assert!(records.iter().all(|r| r.action == AuditAction::Created));
    }

    #[test]
    fn nothing_to_build_reads_no_clock() {
        let clock = counting_clock();
        let records = build_records(Vec::new(), &Actor::anonymous(), &clock).unwrap();
        assert!(records.is_empty());
        assert_eq!(clock.calls.get(), 0);
    }

    #[test]
    fn updated_without_diff_is_dropped() {
        let mut uow = UnitOfWork::new();
        let token = uow.track_new(&IdentificationType::new("Passport", "US")).unwrap();
        let classified = vec![ClassifiedChange {
            token,
            entity_name: "identification_types".to_string(),
            state: EntityState::Updated,
            changes: Vec::new(),
        }];

        let records = build_records(classified, &Actor::anonymous(), &counting_clock()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn blank_entity_name_is_rejected() {
        let mut uow = UnitOfWork::new();
        let token = uow.track_new(&IdentificationType::new("Passport", "US")).unwrap();
        let classified = vec![ClassifiedChange {
            token,
            entity_name: " ".to_string(),
            state: EntityState::Created,
            changes: Vec::new(),
        }];

        let err = build_records(classified, &Actor::anonymous(), &counting_clock())
            .expect_err("blank name must fail");
        assert_eq!(err, ValidationError::EmptyEntityName);
    }
}
