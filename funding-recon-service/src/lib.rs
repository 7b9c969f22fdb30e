//! Funding reconciliation service.
//!
//! Triangulates payment truth across four independent feeds describing
//! the same financial event under a shared correlation code: remittance
//! notices, ledger invoices, outbound payments and inbound funding.

pub mod config;
pub mod models;
pub mod services;
pub mod sources;
pub mod startup;
