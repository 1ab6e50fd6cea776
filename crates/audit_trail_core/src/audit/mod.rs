//! Audit pipeline stages.
//!
//! ```text
//! UnitOfWork ─ extract_changes ─ build_records ─ (primary write)
//!            ─ resolve_identifiers ─ AuditStore
//! ```
//!
//! Every stage here is free of I/O except through the collaborators passed
//! in; commit orchestration lives in `service::commit_service`.

pub mod build;
pub mod clock;
pub mod extract;
pub mod resolve;
