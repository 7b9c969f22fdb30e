//! service-core: Shared infrastructure for the funding reconciliation workspace.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;
