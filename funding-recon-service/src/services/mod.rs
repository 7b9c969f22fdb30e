//! Services module for funding-recon-service.

pub mod database;
pub mod embedding;
pub mod engine;
pub mod matcher;
pub mod metrics;
pub mod status;
pub mod suggestions;
pub mod sync;

pub use database::{Database, QueueSortColumn, ReceivedPaymentFilter, RecordFilter, SortDir};
pub use engine::ReconEngine;
pub use matcher::FundingMatcher;
pub use metrics::{get_metrics, init_metrics};
pub use sync::SyncOrchestrator;
