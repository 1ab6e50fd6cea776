//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate pipeline stages and storage contracts into one commit API.
//! - Keep callers decoupled from SQLite details.

pub mod commit_service;
