//! Domain model for change tracking and audit records.
//!
//! # Responsibility
//! - Define scalar snapshots, per-type descriptors and the unit-of-work arena.
//! - Define the pending/finalized audit record shapes.
//!
//! # Invariants
//! - Only declared scalar fields are ever diffed.
//! - All pipeline state lives inside one `UnitOfWork`; nothing is global.

pub mod audit;
pub mod entity;
pub mod identification_type;
pub mod tracking;
pub mod validation;
pub mod value;
