//! Suggestion engine: association candidates for records missing legs.
//!
//! Two recall-favoring searches, merged and ranked:
//! amount-window — other records whose *missing-leg* amount lies within
//! ±1% of any amount already on the source record (base confidence 0.7,
//! +0.15 when tenants are compatible); prefix — correlation codes sharing
//! the source code minus its last two characters (fixed 0.5).
//! Output only ever feeds the manual associate action.

use crate::models::{LegKind, ReconRecord, Suggestion};
use crate::services::database::Database;
use service_core::error::AppError;
use std::collections::BTreeMap;

/// Relative half-width of the amount search window.
const AMOUNT_WINDOW: f64 = 0.01;
const BASE_CONFIDENCE: f64 = 0.7;
const TENANT_BOOST: f64 = 0.15;
const PREFIX_CONFIDENCE: f64 = 0.5;
const MAX_SUGGESTIONS: usize = 5;

/// Leg kinds a record can donate or lack.
const LEG_KINDS: [LegKind; 4] = [
    LegKind::Remittance,
    LegKind::Invoice,
    LegKind::Payment,
    LegKind::Funding,
];

pub async fn suggestions_for(
    db: &Database,
    record: &ReconRecord,
) -> Result<Vec<Suggestion>, AppError> {
    // Best suggestion per candidate code wins.
    let mut by_code: BTreeMap<String, Suggestion> = BTreeMap::new();

    let present: Vec<(LegKind, f64)> = LEG_KINDS
        .iter()
        .filter_map(|&kind| record.leg_amount(kind).map(|amount| (kind, amount)))
        .collect();

    for &missing in LEG_KINDS.iter() {
        if record.leg_amount(missing).is_some() {
            continue;
        }

        for &(present_kind, amount) in &present {
            let (min, max) = amount_window(amount);
            let candidates = db
                .find_leg_amount_candidates(missing, min, max, &record.correlation_code)
                .await?;

            for candidate in candidates {
                let confidence = amount_confidence(record, &candidate);
                let reason = format!(
                    "{} amount {:.2} within 1% of {} {:.2}",
                    missing.as_str(),
                    candidate.leg_amount(missing).unwrap_or_default(),
                    present_kind.as_str(),
                    amount
                );
                merge(
                    &mut by_code,
                    Suggestion {
                        correlation_code: candidate.correlation_code.clone(),
                        leg_kind: missing.as_str(),
                        amount: candidate.leg_amount(missing),
                        tenant: candidate.invoice_tenant.clone(),
                        confidence,
                        reason,
                    },
                );
            }
        }
    }

    // Prefix similarity on correlation codes: strip the last two
    // characters, match the remainder as a prefix.
    if let Some(prefix) = code_prefix(&record.correlation_code) {
        let candidates = db
            .find_code_prefix(prefix, &record.correlation_code)
            .await?;
        for candidate in candidates {
            merge(
                &mut by_code,
                Suggestion {
                    correlation_code: candidate.correlation_code.clone(),
                    leg_kind: "code_prefix",
                    amount: None,
                    tenant: candidate.invoice_tenant.clone(),
                    confidence: PREFIX_CONFIDENCE,
                    reason: format!("correlation code shares prefix {prefix}"),
                },
            );
        }
    }

    let mut suggestions: Vec<Suggestion> = by_code.into_values().collect();
    suggestions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.correlation_code.cmp(&b.correlation_code))
    });
    suggestions.truncate(MAX_SUGGESTIONS);
    Ok(suggestions)
}

fn merge(by_code: &mut BTreeMap<String, Suggestion>, suggestion: Suggestion) {
    match by_code.get(&suggestion.correlation_code) {
        Some(existing) if existing.confidence >= suggestion.confidence => {}
        _ => {
            by_code.insert(suggestion.correlation_code.clone(), suggestion);
        }
    }
}

fn amount_window(amount: f64) -> (f64, f64) {
    let half_width = amount.abs() * AMOUNT_WINDOW;
    (amount - half_width, amount + half_width)
}

/// Confidence for an amount-window hit. Tenants are compatible when they
/// match, or when the source record has no tenant yet — the engine favors
/// recall and a human confirms every association.
fn amount_confidence(source: &ReconRecord, candidate: &ReconRecord) -> f64 {
    let compatible = match (&source.invoice_tenant, &candidate.invoice_tenant) {
        (Some(a), Some(b)) => a == b,
        (None, _) => true,
        (Some(_), None) => false,
    };
    if compatible {
        BASE_CONFIDENCE + TENANT_BOOST
    } else {
        BASE_CONFIDENCE
    }
}

fn code_prefix(code: &str) -> Option<&str> {
    if code.len() <= 2 {
        return None;
    }
    // Codes are opaque but ASCII in practice; guard the slice anyway.
    let cut = code
        .char_indices()
        .rev()
        .nth(1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    if cut == 0 {
        None
    } else {
        Some(&code[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bare_record(code: &str) -> ReconRecord {
        ReconRecord {
            correlation_code: code.to_string(),
            remittance_amount: None,
            remittance_date: None,
            remittance_source: None,
            remittance_message_id: None,
            remittance_payer: None,
            invoice_amount: None,
            invoice_status: None,
            invoice_tenant: None,
            invoice_batch_ref: None,
            invoice_currency: None,
            payment_amount: None,
            payment_account_id: None,
            payment_date: None,
            payment_currency: None,
            payment_status: None,
            payment_recipient: None,
            payment_recipient_country: None,
            funding_payment_id: None,
            funding_amount: None,
            funding_date: None,
            match_status: "unmatched".to_string(),
            match_flags: "[]".to_string(),
            first_seen_at: Utc::now(),
            last_updated_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            notes: None,
            flag: None,
            flag_notes: None,
        }
    }

    #[test]
    fn amount_window_is_one_percent_each_side() {
        let (min, max) = amount_window(1000.0);
        assert!((min - 990.0).abs() < 1e-9);
        assert!((max - 1010.0).abs() < 1e-9);
    }

    #[test]
    fn tenant_boost_applies_when_source_tenant_is_unknown() {
        let source = bare_record("A1");
        let mut candidate = bare_record("B1");
        candidate.invoice_tenant = Some("acme".to_string());
        assert!((amount_confidence(&source, &candidate) - 0.85).abs() < 1e-9);
    }

    #[test]
    fn tenant_mismatch_keeps_base_confidence() {
        let mut source = bare_record("A1");
        source.invoice_tenant = Some("acme".to_string());
        let mut candidate = bare_record("B1");
        candidate.invoice_tenant = Some("globex".to_string());
        assert!((amount_confidence(&source, &candidate) - 0.7).abs() < 1e-9);

        candidate.invoice_tenant = Some("acme".to_string());
        assert!((amount_confidence(&source, &candidate) - 0.85).abs() < 1e-9);
    }

    #[test]
    fn code_prefix_strips_two_characters() {
        assert_eq!(code_prefix("NVC7KTPCPVVV"), Some("NVC7KTPCPV"));
        assert_eq!(code_prefix("AB"), None);
        assert_eq!(code_prefix(""), None);
    }
}
