//! Integration tests for the suggestion engine.

mod common;

use common::{invoice_for_tenant, remittance, spawn_engine};
use service_core::error::AppError;

#[tokio::test]
async fn amount_window_surfaces_nearby_invoices() {
    let app = spawn_engine().await;

    // A: remittance only, $1000. B: invoice only, $1005 (within 1%).
    // C: invoice only, $9999 (way outside the window). Distinct prefixes
    // so the code-prefix search stays out of this scenario.
    app.engine.upsert_leg("AAA1000X", &remittance(1000.0)).await.unwrap();
    app.engine
        .upsert_leg("BBB1005X", &invoice_for_tenant(1005.0, "acme"))
        .await
        .unwrap();
    app.engine
        .upsert_leg("CCC9999X", &invoice_for_tenant(9999.0, "acme"))
        .await
        .unwrap();

    let suggestions = app.engine.get_suggestions("AAA1000X").await.unwrap();

    let b = suggestions
        .iter()
        .find(|s| s.correlation_code == "BBB1005X")
        .expect("BBB1005X should be suggested");
    // Base 0.7 plus the tenant-compatibility boost.
    assert!((b.confidence - 0.85).abs() < 1e-9);
    assert_eq!(b.leg_kind, "invoice");
    assert_eq!(b.amount, Some(1005.0));

    assert!(suggestions.iter().all(|s| s.correlation_code != "CCC9999X"));
}

#[tokio::test]
async fn tenant_mismatch_drops_the_boost() {
    let app = spawn_engine().await;

    app.engine
        .upsert_leg("NVC-SRC", &invoice_for_tenant(500.0, "acme"))
        .await
        .unwrap();
    app.engine.upsert_leg("NVC-SRC", &remittance(500.0)).await.unwrap();

    // Candidate payment legs within the window, different tenants.
    app.engine
        .upsert_leg("NVC-OTHER", &invoice_for_tenant(501.0, "globex"))
        .await
        .unwrap();
    app.engine
        .upsert_leg("NVC-OTHER", &common::payment(502.0))
        .await
        .unwrap();

    let suggestions = app.engine.get_suggestions("NVC-SRC").await.unwrap();
    let other = suggestions
        .iter()
        .find(|s| s.correlation_code == "NVC-OTHER")
        .expect("NVC-OTHER should be suggested for its payment leg");
    assert!((other.confidence - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn prefix_match_has_fixed_low_confidence() {
    let app = spawn_engine().await;

    app.engine.upsert_leg("NVC7KTPCPVVV", &remittance(100.0)).await.unwrap();
    // Shares the prefix NVC7KTPCPV, far away in amount.
    app.engine
        .upsert_leg("NVC7KTPCPVXX", &invoice_for_tenant(77777.0, "acme"))
        .await
        .unwrap();

    let suggestions = app.engine.get_suggestions("NVC7KTPCPVVV").await.unwrap();
    let twin = suggestions
        .iter()
        .find(|s| s.correlation_code == "NVC7KTPCPVXX")
        .expect("prefix twin should be suggested");
    assert!((twin.confidence - 0.5).abs() < 1e-9);
    assert_eq!(twin.leg_kind, "code_prefix");
}

#[tokio::test]
async fn candidates_are_deduplicated_keeping_the_best_confidence() {
    let app = spawn_engine().await;

    // The twin matches both by prefix (0.5) and by invoice amount (0.85);
    // it must appear once, at 0.85.
    app.engine.upsert_leg("NVC8000AA", &remittance(1000.0)).await.unwrap();
    app.engine
        .upsert_leg("NVC8000BB", &invoice_for_tenant(1000.0, "acme"))
        .await
        .unwrap();

    let suggestions = app.engine.get_suggestions("NVC8000AA").await.unwrap();
    let hits: Vec<_> = suggestions
        .iter()
        .filter(|s| s.correlation_code == "NVC8000BB")
        .collect();
    assert_eq!(hits.len(), 1);
    assert!((hits[0].confidence - 0.85).abs() < 1e-9);
}

#[tokio::test]
async fn suggestions_cap_at_five() {
    let app = spawn_engine().await;

    app.engine.upsert_leg("NVC-MANY", &remittance(1000.0)).await.unwrap();
    for i in 0..8 {
        let code = format!("NVC-CAND-{i}");
        app.engine
            .upsert_leg(&code, &invoice_for_tenant(1000.0 + i as f64, "acme"))
            .await
            .unwrap();
    }

    let suggestions = app.engine.get_suggestions("NVC-MANY").await.unwrap();
    assert_eq!(suggestions.len(), 5);
    // Ranked by confidence descending.
    for pair in suggestions.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
}

#[tokio::test]
async fn suggestions_for_unknown_code_are_not_found() {
    let app = spawn_engine().await;
    let result = app.engine.get_suggestions("NVC-NONE").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
