//! Common test utilities for funding-recon-service integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use funding_recon_service::models::{
    FundingLink, InvoiceLeg, Leg, PaymentLeg, RemittanceLeg,
};
use funding_recon_service::services::{Database, ReconEngine};
use std::sync::{Arc, Once};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,funding_recon_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Test application wrapper: a file-backed store in a temp directory and
/// an engine over it.
pub struct TestApp {
    pub db: Arc<Database>,
    pub engine: ReconEngine,
    // Keeps the store directory alive for the duration of the test.
    _store_dir: TempDir,
}

/// Spawn a fresh store + engine with migrations applied.
pub async fn spawn_engine() -> TestApp {
    init_tracing();

    let store_dir = tempfile::tempdir().expect("Failed to create temp store dir");
    let url = format!("sqlite://{}/recon.db", store_dir.path().display());

    let db = Arc::new(
        Database::new(&url, 2, 1)
            .await
            .expect("Failed to connect to test store"),
    );
    db.run_migrations().await.expect("Failed to run migrations");

    let engine = ReconEngine::new(Arc::clone(&db));

    TestApp {
        db,
        engine,
        _store_dir: store_dir,
    }
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, d).expect("valid test date")
}

pub fn remittance(amount: f64) -> Leg {
    remittance_in_group(amount, "msg-1", "Acme Industries LLC")
}

pub fn remittance_in_group(amount: f64, message_id: &str, payer: &str) -> Leg {
    Leg::Remittance(RemittanceLeg {
        amount,
        date: Some(day(8)),
        source: "remittance_csv".to_string(),
        message_id: message_id.to_string(),
        payer: payer.to_string(),
    })
}

pub fn invoice(amount: f64) -> Leg {
    invoice_for_tenant(amount, "acme")
}

pub fn invoice_for_tenant(amount: f64, tenant: &str) -> Leg {
    Leg::Invoice(InvoiceLeg {
        amount,
        status: "approved".to_string(),
        tenant: tenant.to_string(),
        batch_ref: "pr-100".to_string(),
        currency: "USD".to_string(),
    })
}

pub fn payment(amount: f64) -> Leg {
    Leg::Payment(PaymentLeg {
        amount,
        account_id: "acct-1".to_string(),
        date: Some(day(9)),
        currency: "USD".to_string(),
        status: "Cleared".to_string(),
        recipient: "Jane Contractor".to_string(),
        recipient_country: "US".to_string(),
    })
}

pub fn funding(amount: f64, payment_id: &str) -> Leg {
    Leg::Funding(FundingLink {
        payment_id: payment_id.to_string(),
        amount,
        date: Some(day(8)),
    })
}
