//! Storage contracts consumed by the commit pipeline and their SQLite
//! implementations.
//!
//! # Responsibility
//! - `PersistenceGateway`: the business-data write.
//! - `AuditStore`: the append-only audit trail.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`RowNotFound`, `InvalidData`)
//!   in addition to DB transport errors.

pub mod audit_repo;
pub mod entity_repo;
