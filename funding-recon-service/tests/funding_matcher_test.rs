//! Integration tests for the funding matcher and received-payment
//! match/unmatch cascades.

mod common;

use chrono::NaiveDate;
use common::{day, remittance_in_group, spawn_engine, TestApp};
use funding_recon_service::models::{MatchMethod, MatchStatus};
use funding_recon_service::services::FundingMatcher;
use funding_recon_service::sources::InboundPayment;
use service_core::error::AppError;
use std::collections::HashMap;

fn inbound(payment_id: &str, amount: f64, date: Option<NaiveDate>, payer: &str) -> InboundPayment {
    InboundPayment {
        payment_id: payment_id.to_string(),
        account_id: "acct-1".to_string(),
        account_name: "Settlement USD".to_string(),
        amount,
        currency: "USD".to_string(),
        date,
        status: "Cleared".to_string(),
        raw_payer_info: payer.to_string(),
        payer_name: payer.to_string(),
    }
}

fn matcher_for(app: &TestApp) -> FundingMatcher {
    FundingMatcher::new(app.engine.clone(), app.db.clone(), HashMap::new())
}

/// Three records sharing one remittance message, totalling $1000.
async fn seed_group(app: &TestApp, message_id: &str, payer: &str) {
    app.engine
        .upsert_leg("NVC-G1", &remittance_in_group(400.0, message_id, payer))
        .await
        .unwrap();
    app.engine
        .upsert_leg("NVC-G2", &remittance_in_group(350.0, message_id, payer))
        .await
        .unwrap();
    app.engine
        .upsert_leg("NVC-G3", &remittance_in_group(250.0, message_id, payer))
        .await
        .unwrap();
}

#[tokio::test]
async fn exact_amount_same_day_payer_auto_commits_and_cascades() {
    let app = spawn_engine().await;
    seed_group(&app, "msg-bbdo", "BBDO").await;

    app.db
        .upsert_received_payment(&inbound("rp-1", 1000.0, Some(day(8)), "BBDO USA LLC"))
        .await
        .unwrap();

    let outcome = matcher_for(&app).run().await.unwrap();
    assert_eq!(outcome.scanned, 1);
    assert_eq!(outcome.matched, 1);
    assert_eq!(outcome.suggested, 0);

    let payment = app.engine.get_received_payment("rp-1").await.unwrap();
    assert_eq!(payment.match_status, "matched");
    assert_eq!(payment.matched_group_id.as_deref(), Some("msg-bbdo"));
    assert_eq!(payment.match_method.as_deref(), Some("auto_amount_date_payer"));
    assert!(payment.confidence.unwrap() >= 0.8);

    // Every code in the group carries the funding leg now.
    for code in ["NVC-G1", "NVC-G2", "NVC-G3"] {
        let record = app.engine.get_record(code).await.unwrap();
        assert_eq!(record.funding_payment_id.as_deref(), Some("rp-1"));
        assert_eq!(record.funding_amount, Some(1000.0));
        // remittance + funding, nothing else
        assert_eq!(record.status(), MatchStatus::Unmatched);
    }
}

#[tokio::test]
async fn matcher_reruns_are_idempotent_for_matched_payments() {
    let app = spawn_engine().await;
    seed_group(&app, "msg-bbdo", "BBDO").await;
    app.db
        .upsert_received_payment(&inbound("rp-1", 1000.0, Some(day(8)), "BBDO USA LLC"))
        .await
        .unwrap();

    let matcher = matcher_for(&app);
    let first = matcher.run().await.unwrap();
    assert_eq!(first.matched, 1);

    // A second pass sees no unmatched candidates at all.
    let second = matcher.run().await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(second.matched, 0);
}

#[tokio::test]
async fn mid_band_scores_suggest_without_linking() {
    let app = spawn_engine().await;
    seed_group(&app, "msg-mid", "Some Payer").await;

    // Exact amount (0.5) + three-day drift (0.1), anonymous payer: 0.6.
    app.db
        .upsert_received_payment(&inbound("rp-2", 1000.0, Some(day(11)), ""))
        .await
        .unwrap();

    let outcome = matcher_for(&app).run().await.unwrap();
    assert_eq!(outcome.matched, 0);
    assert_eq!(outcome.suggested, 1);

    let payment = app.engine.get_received_payment("rp-2").await.unwrap();
    assert_eq!(payment.match_status, "suggested");
    assert!(payment.notes.unwrap_or_default().contains("msg-mid"));
    assert!(payment.matched_group_id.is_none());

    // No cascade happened.
    let record = app.engine.get_record("NVC-G1").await.unwrap();
    assert!(record.funding_payment_id.is_none());
}

#[tokio::test]
async fn weak_candidates_stay_unmatched() {
    let app = spawn_engine().await;
    seed_group(&app, "msg-weak", "Some Payer").await;

    // 4% off on amount (0.15), a month late, anonymous payer.
    app.db
        .upsert_received_payment(&inbound("rp-3", 1040.0, Some(day(28)), ""))
        .await
        .unwrap();

    let outcome = matcher_for(&app).run().await.unwrap();
    assert_eq!(outcome.matched, 0);
    assert_eq!(outcome.suggested, 0);

    let payment = app.engine.get_received_payment("rp-3").await.unwrap();
    assert_eq!(payment.match_status, "unmatched");
}

#[tokio::test]
async fn alias_table_lifts_known_payer_spellings() {
    let app = spawn_engine().await;
    seed_group(&app, "msg-alias", "Precision Marketing").await;

    let mut aliases = HashMap::new();
    aliases.insert(
        "Precision Marketing".to_string(),
        vec!["Precision Mktg Group".to_string()],
    );
    let matcher = FundingMatcher::new(app.engine.clone(), app.db.clone(), aliases);

    // Amount 0.5 + same day 0.2 + alias payer 0.3 * 0.9 = 0.97.
    app.db
        .upsert_received_payment(&inbound(
            "rp-4",
            1000.0,
            Some(day(8)),
            "Precision Mktg Group",
        ))
        .await
        .unwrap();

    let outcome = matcher.run().await.unwrap();
    assert_eq!(outcome.matched, 1);
    let payment = app.engine.get_received_payment("rp-4").await.unwrap();
    assert!(payment.confidence.unwrap() > 0.9);
}

#[tokio::test]
async fn manual_match_cascades_and_unmatch_reverses_it() {
    let app = spawn_engine().await;
    seed_group(&app, "msg-manual", "Whoever").await;
    app.db
        .upsert_received_payment(&inbound("rp-5", 1000.0, Some(day(8)), ""))
        .await
        .unwrap();

    let linked = app
        .engine
        .match_received_payment("rp-5", "msg-manual", MatchMethod::Manual)
        .await
        .unwrap();
    assert_eq!(linked, 3);

    let payment = app.engine.get_received_payment("rp-5").await.unwrap();
    assert_eq!(payment.match_status, "matched");
    assert_eq!(payment.match_method.as_deref(), Some("manual"));

    for code in ["NVC-G1", "NVC-G2", "NVC-G3"] {
        let record = app.engine.get_record(code).await.unwrap();
        assert_eq!(record.funding_payment_id.as_deref(), Some("rp-5"));
    }

    // Unmatch clears the funding leg everywhere and recomputes.
    let unlinked = app.engine.unmatch_received_payment("rp-5").await.unwrap();
    assert_eq!(unlinked, 3);

    let payment = app.engine.get_received_payment("rp-5").await.unwrap();
    assert_eq!(payment.match_status, "unmatched");
    assert!(payment.matched_group_id.is_none());

    for code in ["NVC-G1", "NVC-G2", "NVC-G3"] {
        let record = app.engine.get_record(code).await.unwrap();
        assert!(record.funding_payment_id.is_none());
        assert_eq!(record.status(), MatchStatus::RemittanceOnly);
    }
}

#[tokio::test]
async fn manual_match_against_unknown_group_is_not_found() {
    let app = spawn_engine().await;
    app.db
        .upsert_received_payment(&inbound("rp-6", 10.0, Some(day(8)), ""))
        .await
        .unwrap();

    let result = app
        .engine
        .match_received_payment("rp-6", "msg-ghost", MatchMethod::Manual)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    // The payment is untouched.
    let payment = app.engine.get_received_payment("rp-6").await.unwrap();
    assert_eq!(payment.match_status, "unmatched");
}

#[tokio::test]
async fn funding_suggestions_rank_groups_for_triage() {
    let app = spawn_engine().await;
    seed_group(&app, "msg-near", "BBDO").await;
    app.engine
        .upsert_leg("NVC-FAR", &remittance_in_group(50_000.0, "msg-far", "Globex"))
        .await
        .unwrap();

    app.db
        .upsert_received_payment(&inbound("rp-7", 1000.0, Some(day(8)), "BBDO USA LLC"))
        .await
        .unwrap();

    let scores = matcher_for(&app).funding_suggestions("rp-7").await.unwrap();
    assert!(!scores.is_empty());
    assert_eq!(scores[0].group_id, "msg-near");
    assert!(scores[0].score >= 0.8);
    assert!(scores.iter().all(|s| s.group_id != "msg-far" || s.score < 0.5));
}
