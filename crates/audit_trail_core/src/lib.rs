//! Change-tracking audit trail core.
//!
//! A commit classifies the tracked entities, writes business rows, resolves
//! store-assigned keys and appends an immutable audit entry per mutation.

pub mod audit;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use audit::clock::{Clock, FixedClock, SystemClock};
pub use audit::resolve::ResolutionIssue;
pub use config::{AuditConfig, ConfigError, LoggingConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, logging_status, LoggingError,
};
pub use model::audit::{
    Actor, ActorProvider, AuditAction, FinalizedAuditRecord, PendingAuditRecord, PropertyChange,
};
pub use model::entity::{EntityDescriptor, HasAuditableFields, KeyGeneration};
pub use model::identification_type::IdentificationType;
pub use model::tracking::{EntityState, TrackedEntity, TrackingToken, UnitOfWork};
pub use model::validation::ValidationError;
pub use model::value::{FieldValue, Snapshot};
pub use repo::audit_repo::{
    AuditEntry, AuditEntryId, AuditEntryProperty, AuditQuery, AuditStore, AuditStoreError,
    SqliteAuditStore,
};
pub use repo::entity_repo::{PersistenceGateway, PrimaryWriteError, SqliteEntityGateway};
pub use service::commit_service::{
    AuditPersistError, CancellationFlag, CommitError, CommitPhase, CommitReport, CommitService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
