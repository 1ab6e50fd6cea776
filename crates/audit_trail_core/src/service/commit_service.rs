//! Commit coordinator: business write plus audit append as one unit of work.
//!
//! # Responsibility
//! - Drive `Preparing -> PrimaryWritten -> IdentifiersResolved ->
//!   AuditPersisted -> Done` for one `UnitOfWork`.
//! - Keep business-write failures and audit-append failures distinct.
//!
//! # Invariants
//! - The audit store is never called unless the primary write succeeded.
//! - All records of one commit share one timestamp.
//! - Once the primary write succeeded `commit` returns `Ok`; an audit append
//!   failure is attached to the report instead.
//! - Cancellation is honored before the primary write only.

use crate::audit::build::build_records;
use crate::audit::clock::{Clock, SystemClock};
use crate::audit::extract::{extract_changes, ExtractOptions};
use crate::audit::resolve::{resolve_identifiers, ResolutionIssue};
use crate::config::AuditConfig;
use crate::model::audit::{ActorProvider, FinalizedAuditRecord};
use crate::model::tracking::UnitOfWork;
use crate::model::validation::ValidationError;
use crate::repo::audit_repo::{AuditEntryId, AuditStore, AuditStoreError};
use crate::repo::entity_repo::{PersistenceGateway, PrimaryWriteError};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Phase of one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Preparing,
    PrimaryWritten,
    IdentifiersResolved,
    AuditPersisted,
    Done,
    Aborted,
}

impl CommitPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::PrimaryWritten => "primary_written",
            Self::IdentifiersResolved => "identifiers_resolved",
            Self::AuditPersisted => "audit_persisted",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Returns whether `next` may follow `self`.
    ///
    /// `IdentifiersResolved -> Done` is the path taken when the audit append
    /// failed after a committed business write.
    pub fn can_transition_to(self, next: CommitPhase) -> bool {
        match (self, next) {
            (current, Self::Aborted) => !current.is_terminal(),
            (Self::Preparing, Self::PrimaryWritten)
            | (Self::PrimaryWritten, Self::IdentifiersResolved)
            | (Self::IdentifiersResolved, Self::AuditPersisted)
            | (Self::IdentifiersResolved, Self::Done)
            | (Self::AuditPersisted, Self::Done) => true,
            _ => false,
        }
    }
}

impl Display for CommitPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation signal for a commit.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Failures that leave business data untouched.
#[derive(Debug)]
pub enum CommitError {
    /// Tracked set or descriptors were malformed; nothing was written.
    Validation(ValidationError),
    /// The business write failed; no audit record was written.
    PrimaryWrite(PrimaryWriteError),
    /// Cancelled before the business write; nothing was written.
    Cancelled,
}

impl Display for CommitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "commit rejected: {err}"),
            Self::PrimaryWrite(err) => write!(f, "primary write failed: {err}"),
            Self::Cancelled => write!(f, "commit cancelled before primary write"),
        }
    }
}

impl Error for CommitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::PrimaryWrite(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}

impl From<ValidationError> for CommitError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<PrimaryWriteError> for CommitError {
    fn from(value: PrimaryWriteError) -> Self {
        Self::PrimaryWrite(value)
    }
}

/// Audit append failed after the business write committed.
#[derive(Debug)]
pub struct AuditPersistError {
    /// Records that could not be appended.
    pub record_count: usize,
    pub source: AuditStoreError,
}

impl Display for AuditPersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "business write committed but {} audit record(s) were not persisted: {}",
            self.record_count, self.source
        )
    }
}

impl Error for AuditPersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Outcome of a commit whose business write succeeded.
#[derive(Debug)]
pub struct CommitReport {
    pub commit_id: Uuid,
    /// Rows affected by the business write.
    pub write_count: usize,
    /// Ids of appended audit entries, in record order.
    pub audit_entry_ids: Vec<AuditEntryId>,
    /// Records finalized with the unresolved placeholder.
    pub unresolved: Vec<ResolutionIssue>,
    pub audit_error: Option<AuditPersistError>,
}

impl CommitReport {
    /// True when every record was appended with a resolved identifier.
    pub fn is_fully_audited(&self) -> bool {
        self.audit_error.is_none() && self.unresolved.is_empty()
    }
}

/// Tracks and logs phase transitions of one commit.
struct PhaseTracker {
    commit_id: Uuid,
    phase: CommitPhase,
    started: Instant,
}

impl PhaseTracker {
    fn start(commit_id: Uuid) -> Self {
        debug!(
            "event=commit_phase module=service status=start commit_id={} phase={}",
            commit_id,
            CommitPhase::Preparing
        );
        Self {
            commit_id,
            phase: CommitPhase::Preparing,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: CommitPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal commit transition {} -> {}",
            self.phase,
            next
        );
        debug!(
            "event=commit_phase module=service status=ok commit_id={} from={} to={} elapsed_ms={}",
            self.commit_id,
            self.phase,
            next,
            self.started.elapsed().as_millis()
        );
        self.phase = next;
    }

    fn abort(&mut self, reason: &str) {
        warn!(
            "event=commit_phase module=service status=error commit_id={} from={} to={} reason={} elapsed_ms={}",
            self.commit_id,
            self.phase,
            CommitPhase::Aborted,
            reason,
            self.started.elapsed().as_millis()
        );
        self.phase = CommitPhase::Aborted;
    }
}

/// Commit coordinator over a persistence gateway and an audit store.
pub struct CommitService<G, S, C = SystemClock> {
    gateway: G,
    store: S,
    clock: C,
    config: AuditConfig,
}

impl<G: PersistenceGateway, S: AuditStore> CommitService<G, S, SystemClock> {
    /// Creates a coordinator reading the system clock with default config.
    pub fn new(gateway: G, store: S) -> Self {
        Self::with_clock(gateway, store, SystemClock, AuditConfig::default())
    }
}

impl<G: PersistenceGateway, S: AuditStore, C: Clock> CommitService<G, S, C> {
    pub fn with_clock(gateway: G, store: S, clock: C, config: AuditConfig) -> Self {
        Self {
            gateway,
            store,
            clock,
            config,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Commits all tracked changes and appends their audit records.
    ///
    /// # Errors
    /// - `CommitError::Validation` when a tracked entity is malformed.
    /// - `CommitError::PrimaryWrite` when the business write fails.
    ///
    /// An audit append failure is reported through
    /// `CommitReport::audit_error`.
    pub fn commit<A: ActorProvider + ?Sized>(
        &self,
        uow: &mut UnitOfWork,
        actor: &A,
    ) -> Result<CommitReport, CommitError> {
        self.commit_with_cancellation(uow, actor, &CancellationFlag::new())
    }

    /// Same as [`Self::commit`], aborting cleanly when `cancel` is raised
    /// before the business write starts.
    pub fn commit_with_cancellation<A: ActorProvider + ?Sized>(
        &self,
        uow: &mut UnitOfWork,
        actor: &A,
        cancel: &CancellationFlag,
    ) -> Result<CommitReport, CommitError> {
        let commit_id = Uuid::new_v4();
        let mut phase = PhaseTracker::start(commit_id);
        let actor = actor.actor_or_anonymous();

        let options = ExtractOptions::from_config(&self.config);
        let classified = extract_changes(uow.entities(), &options);
        let pending = match build_records(classified, &actor, &self.clock) {
            Ok(pending) => pending,
            Err(err) => {
                phase.abort("validation");
                return Err(CommitError::Validation(err));
            }
        };

        if cancel.is_cancelled() {
            phase.abort("cancelled");
            return Err(CommitError::Cancelled);
        }

        let write_started = Instant::now();
        let write_count = match self.gateway.execute_primary_write(uow.entities_mut()) {
            Ok(count) => count,
            Err(err) => {
                error!(
                    "event=primary_write module=service status=error commit_id={} discarded_records={} duration_ms={} error={}",
                    commit_id,
                    pending.len(),
                    write_started.elapsed().as_millis(),
                    err
                );
                phase.abort("primary_write");
                return Err(CommitError::PrimaryWrite(err));
            }
        };
        info!(
            "event=primary_write module=service status=ok commit_id={} write_count={} duration_ms={}",
            commit_id,
            write_count,
            write_started.elapsed().as_millis()
        );
        phase.advance(CommitPhase::PrimaryWritten);

        let resolution = resolve_identifiers(
            pending,
            uow.entities(),
            &self.gateway,
            &self.config.unresolved_entity_id,
        );
        phase.advance(CommitPhase::IdentifiersResolved);

        let (audit_entry_ids, audit_error) = self.append_records(commit_id, &resolution.records);
        if audit_error.is_none() {
            phase.advance(CommitPhase::AuditPersisted);
        }

        uow.accept_changes();
        phase.advance(CommitPhase::Done);

        Ok(CommitReport {
            commit_id,
            write_count,
            audit_entry_ids,
            unresolved: resolution.issues,
            audit_error,
        })
    }

    fn append_records(
        &self,
        commit_id: Uuid,
        records: &[FinalizedAuditRecord],
    ) -> (Vec<AuditEntryId>, Option<AuditPersistError>) {
        if records.is_empty() {
            return (Vec::new(), None);
        }

        let started = Instant::now();
        match self.store.append(records) {
            Ok(ids) => {
                info!(
                    "event=audit_append module=service status=ok commit_id={} records={} duration_ms={}",
                    commit_id,
                    ids.len(),
                    started.elapsed().as_millis()
                );
                (ids, None)
            }
            Err(source) => {
                error!(
                    "event=audit_append module=service status=error commit_id={} records={} duration_ms={} error={}",
                    commit_id,
                    records.len(),
                    started.elapsed().as_millis(),
                    source
                );
                (
                    Vec::new(),
                    Some(AuditPersistError {
                        record_count: records.len(),
                        source,
                    }),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CancellationFlag, CommitPhase};

    #[test]
    fn phase_transitions_follow_commit_order() {
        use CommitPhase::*;
        assert!(Preparing.can_transition_to(PrimaryWritten));
        assert!(PrimaryWritten.can_transition_to(IdentifiersResolved));
        assert!(IdentifiersResolved.can_transition_to(AuditPersisted));
        assert!(IdentifiersResolved.can_transition_to(Done));
        assert!(AuditPersisted.can_transition_to(Done));

        assert!(!Preparing.can_transition_to(IdentifiersResolved));
        assert!(!PrimaryWritten.can_transition_to(Done));
        assert!(!Done.can_transition_to(Preparing));
    }

    #[test]
    fn aborted_is_reachable_from_every_live_phase() {
        use CommitPhase::*;
        for phase in [Preparing, PrimaryWritten, IdentifiersResolved, AuditPersisted] {
            assert!(phase.can_transition_to(Aborted), "{phase}");
        }
        assert!(!Done.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Aborted));
    }

    #[test]
    fn cancellation_flag_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_cancelled());
        flag.cancel();
        assert!(observer.is_cancelled());
    }
}
