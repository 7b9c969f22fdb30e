//! Integration tests for the priority queue.

mod common;

use common::{funding, invoice, invoice_for_tenant, payment, remittance, spawn_engine, TestApp};
use funding_recon_service::models::MatchStatus;
use funding_recon_service::services::RecordFilter;

/// Seed one record per interesting state and return the app.
async fn seed(app: &TestApp) {
    // amount_mismatch
    app.engine.upsert_leg("NVC-MIS", &remittance(1000.0)).await.unwrap();
    app.engine.upsert_leg("NVC-MIS", &invoice(900.0)).await.unwrap();

    // remittance_only
    app.engine.upsert_leg("NVC-REM", &remittance(50.0)).await.unwrap();

    // full_4way
    app.engine.upsert_leg("NVC-FULL", &remittance(200.0)).await.unwrap();
    app.engine.upsert_leg("NVC-FULL", &invoice(200.0)).await.unwrap();
    app.engine.upsert_leg("NVC-FULL", &funding(200.0, "rp-9")).await.unwrap();
    app.engine.upsert_leg("NVC-FULL", &payment(200.0)).await.unwrap();

    // resolved — must never appear in the queue
    app.engine.upsert_leg("NVC-RES", &remittance(75.0)).await.unwrap();
    app.engine.resolve("NVC-RES", "ops", "done").await.unwrap();
}

#[tokio::test]
async fn queue_orders_by_severity_and_excludes_resolved() {
    let app = spawn_engine().await;
    seed(&app).await;

    let (records, total) = app
        .engine
        .list_queue(&RecordFilter::default(), None, None, 50, 0)
        .await
        .unwrap();

    assert_eq!(total, 3);
    let codes: Vec<&str> = records.iter().map(|r| r.correlation_code.as_str()).collect();
    assert_eq!(codes, vec!["NVC-MIS", "NVC-REM", "NVC-FULL"]);
    assert!(records.iter().all(|r| r.status() != MatchStatus::Resolved));
}

#[tokio::test]
async fn queue_total_ignores_the_page_limit() {
    let app = spawn_engine().await;
    seed(&app).await;

    let (records, total) = app
        .engine
        .list_queue(&RecordFilter::default(), None, None, 1, 0)
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(total, 3);
    assert_eq!(records[0].correlation_code, "NVC-MIS");
}

#[tokio::test]
async fn queue_filters_by_status_tenant_and_search() {
    let app = spawn_engine().await;
    seed(&app).await;
    app.engine
        .upsert_leg("NVC-TEN", &invoice_for_tenant(10.0, "globex"))
        .await
        .unwrap();

    let filter = RecordFilter {
        status: Some(MatchStatus::RemittanceOnly),
        ..Default::default()
    };
    let (records, total) = app.engine.list_queue(&filter, None, None, 50, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(records[0].correlation_code, "NVC-REM");

    let filter = RecordFilter {
        tenant: Some("globex".to_string()),
        ..Default::default()
    };
    let (records, _) = app.engine.list_queue(&filter, None, None, 50, 0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].correlation_code, "NVC-TEN");

    let filter = RecordFilter {
        search: Some("MIS".to_string()),
        ..Default::default()
    };
    let (records, _) = app.engine.list_queue(&filter, None, None, 50, 0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].correlation_code, "NVC-MIS");
}

#[tokio::test]
async fn queue_secondary_sort_uses_allow_listed_columns() {
    let app = spawn_engine().await;
    app.engine.upsert_leg("NVC-A", &remittance(10.0)).await.unwrap();
    app.engine.upsert_leg("NVC-B", &remittance(30.0)).await.unwrap();
    app.engine.upsert_leg("NVC-C", &remittance(20.0)).await.unwrap();

    let (records, _) = app
        .engine
        .list_queue(
            &RecordFilter::default(),
            Some("remittance_amount"),
            Some("asc"),
            50,
            0,
        )
        .await
        .unwrap();

    let amounts: Vec<f64> = records.iter().filter_map(|r| r.remittance_amount).collect();
    assert_eq!(amounts, vec![10.0, 20.0, 30.0]);
}

#[tokio::test]
async fn queue_ignores_unknown_sort_columns() {
    let app = spawn_engine().await;
    seed(&app).await;

    // An unknown (or hostile) column never reaches ORDER BY; the queue
    // falls back to the default secondary sort and still answers.
    let (records, total) = app
        .engine
        .list_queue(
            &RecordFilter::default(),
            Some("notes; DROP TABLE reconciliation_records"),
            Some("asc"),
            50,
            0,
        )
        .await
        .unwrap();

    assert_eq!(total, 3);
    assert_eq!(records[0].correlation_code, "NVC-MIS");
}

#[tokio::test]
async fn list_records_returns_everything_including_resolved() {
    let app = spawn_engine().await;
    seed(&app).await;

    let records = app
        .engine
        .list_records(&RecordFilter::default(), 50, 0)
        .await
        .unwrap();
    assert_eq!(records.len(), 4);

    let filter = RecordFilter {
        status: Some(MatchStatus::Resolved),
        ..Default::default()
    };
    let records = app.engine.list_records(&filter, 50, 0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].correlation_code, "NVC-RES");
}
