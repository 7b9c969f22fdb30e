//! Integration tests for received payment storage and listing.

mod common;

use common::{day, spawn_engine};
use funding_recon_service::services::ReceivedPaymentFilter;
use funding_recon_service::sources::InboundPayment;
use service_core::error::AppError;

fn inbound(payment_id: &str, amount: f64, payer: &str) -> InboundPayment {
    InboundPayment {
        payment_id: payment_id.to_string(),
        account_id: "acct-1".to_string(),
        account_name: "Settlement USD".to_string(),
        amount,
        currency: "USD".to_string(),
        date: Some(day(8)),
        status: "Cleared".to_string(),
        raw_payer_info: format!("ACH CREDIT {payer}"),
        payer_name: payer.to_string(),
    }
}

#[tokio::test]
async fn resync_refreshes_fields_but_preserves_match_state() {
    let app = spawn_engine().await;

    app.db
        .upsert_received_payment(&inbound("rp-1", 1000.0, "BBDO"))
        .await
        .unwrap();
    app.db
        .mark_received_payment_matched("rp-1", "msg-1", 0.92, "auto_amount_date_payer")
        .await
        .unwrap();

    // The provider re-serves the same payment with an amended amount.
    app.db
        .upsert_received_payment(&inbound("rp-1", 1000.50, "BBDO"))
        .await
        .unwrap();

    let payment = app.engine.get_received_payment("rp-1").await.unwrap();
    assert_eq!(payment.amount, 1000.50);
    // Match state belongs to the matcher and manual actions, not the sync.
    assert_eq!(payment.match_status, "matched");
    assert_eq!(payment.matched_group_id.as_deref(), Some("msg-1"));
    assert_eq!(payment.confidence, Some(0.92));
}

#[tokio::test]
async fn listing_filters_and_counts() {
    let app = spawn_engine().await;

    app.db.upsert_received_payment(&inbound("rp-1", 100.0, "BBDO USA")).await.unwrap();
    app.db.upsert_received_payment(&inbound("rp-2", 200.0, "Globex")).await.unwrap();
    app.db.upsert_received_payment(&inbound("rp-3", 300.0, "BBDO Canada")).await.unwrap();
    app.db
        .mark_received_payment_matched("rp-2", "msg-9", 1.0, "manual")
        .await
        .unwrap();

    let (all, total) = app
        .engine
        .list_received_payments(&ReceivedPaymentFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(total, 3);

    let filter = ReceivedPaymentFilter {
        payer: Some("BBDO".to_string()),
        ..Default::default()
    };
    let (bbdo, total) = app.engine.list_received_payments(&filter, 10, 0).await.unwrap();
    assert_eq!(total, 2);
    assert!(bbdo.iter().all(|p| p.payer_name.as_deref().unwrap_or("").contains("BBDO")));

    let filter = ReceivedPaymentFilter {
        match_status: Some(funding_recon_service::models::ReceivedPaymentStatus::Matched),
        ..Default::default()
    };
    let (matched, total) = app.engine.list_received_payments(&filter, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(matched[0].payment_id, "rp-2");

    // Paging: limit 1 still reports the full total.
    let (page, total) = app
        .engine
        .list_received_payments(&ReceivedPaymentFilter::default(), 1, 0)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(total, 3);
}

#[tokio::test]
async fn unknown_payment_is_not_found() {
    let app = spawn_engine().await;

    let result = app.engine.get_received_payment("rp-missing").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let result = app.engine.unmatch_received_payment("rp-missing").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
