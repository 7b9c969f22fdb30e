//! Match-status state machine.
//!
//! A pure, total function from leg presence + amount agreement +
//! resolution to `(MatchStatus, Vec<MatchFlag>)`. The stored status is
//! only a cache of this computation and must be reproducible from
//! scratch at any time.

use crate::models::{MatchFlag, MatchStatus};

/// Absolute agreement tolerance between remittance and invoice amounts,
/// in currency units.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

// The tolerance is inclusive: a difference of exactly 0.01 must agree.
// The epsilon absorbs f64 rounding at that boundary.
const TOLERANCE_EPSILON: f64 = 1e-9;

/// Whether two leg amounts agree within the absolute tolerance.
pub fn amounts_agree(a: f64, b: f64) -> bool {
    (a - b).abs() <= AMOUNT_TOLERANCE + TOLERANCE_EPSILON
}

/// Snapshot of a record's legs, as the state machine sees them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegSnapshot {
    pub remittance_amount: Option<f64>,
    pub invoice_amount: Option<f64>,
    pub has_payment: bool,
    pub has_funding: bool,
}

/// Derive status and flags for a record.
///
/// Evaluates the decision table top to bottom, first match wins. A record
/// with `resolved` set stays `resolved` regardless of its legs until an
/// explicit reopen.
pub fn derive(legs: &LegSnapshot, resolved: bool) -> (MatchStatus, Vec<MatchFlag>) {
    if resolved {
        return (MatchStatus::Resolved, Vec::new());
    }

    let has_remittance = legs.remittance_amount.is_some();
    let has_invoice = legs.invoice_amount.is_some();
    let has_funding = legs.has_funding;
    let has_payment = legs.has_payment;

    let agree = match (legs.remittance_amount, legs.invoice_amount) {
        (Some(a), Some(b)) => amounts_agree(a, b),
        _ => false,
    };

    let status = match (has_remittance, has_invoice, has_funding, has_payment) {
        (true, true, true, true) if agree => MatchStatus::Full4Way,
        (true, true, true, true) => MatchStatus::AmountMismatch,
        (true, true, true, false) if agree => MatchStatus::ThreeWayAwaitingPayment,
        (true, true, false, true) if agree => MatchStatus::ThreeWayNoFunding,
        (true, true, false, false) if agree => MatchStatus::TwoWayMatched,
        (true, true, _, _) => MatchStatus::AmountMismatch,
        (false, true, false, true) => MatchStatus::InvoicePaymentOnly,
        (true, false, false, false) => MatchStatus::RemittanceOnly,
        (false, true, false, false) => MatchStatus::InvoiceOnly,
        (false, false, false, true) => MatchStatus::PaymentOnly,
        _ => MatchStatus::Unmatched,
    };

    let mut flags = Vec::new();
    if has_remittance && has_invoice && !agree {
        flags.push(MatchFlag::RemittanceInvoiceMismatch);
    }
    if !has_remittance {
        flags.push(MatchFlag::MissingRemittance);
    }
    if !has_invoice {
        flags.push(MatchFlag::MissingInvoice);
    }
    if !has_funding {
        flags.push(MatchFlag::MissingFunding);
    }
    if !has_payment {
        flags.push(MatchFlag::MissingPayment);
    }

    (status, flags)
}
