//! Domain models for funding-recon-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::FromRow;

// ============================================================================
// Match Status
// ============================================================================

/// Derived reconciliation state of a record.
///
/// Always a pure function of leg presence, amount agreement and
/// `resolved_at` — never the source of truth (see `services::status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStatus {
    Unmatched,
    RemittanceOnly,
    InvoiceOnly,
    PaymentOnly,
    InvoicePaymentOnly,
    TwoWayMatched,
    ThreeWayNoFunding,
    ThreeWayAwaitingPayment,
    Full4Way,
    AmountMismatch,
    Resolved,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 11] = [
        Self::Unmatched,
        Self::RemittanceOnly,
        Self::InvoiceOnly,
        Self::PaymentOnly,
        Self::InvoicePaymentOnly,
        Self::TwoWayMatched,
        Self::ThreeWayNoFunding,
        Self::ThreeWayAwaitingPayment,
        Self::Full4Way,
        Self::AmountMismatch,
        Self::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::RemittanceOnly => "remittance_only",
            Self::InvoiceOnly => "invoice_only",
            Self::PaymentOnly => "payment_only",
            Self::InvoicePaymentOnly => "invoice_payment_only",
            Self::TwoWayMatched => "2way_matched",
            Self::ThreeWayNoFunding => "3way_no_funding",
            Self::ThreeWayAwaitingPayment => "3way_awaiting_payment",
            Self::Full4Way => "full_4way",
            Self::AmountMismatch => "amount_mismatch",
            Self::Resolved => "resolved",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "unmatched" => Self::Unmatched,
            "remittance_only" => Self::RemittanceOnly,
            "invoice_only" => Self::InvoiceOnly,
            "payment_only" => Self::PaymentOnly,
            "invoice_payment_only" => Self::InvoicePaymentOnly,
            "2way_matched" => Self::TwoWayMatched,
            "3way_no_funding" => Self::ThreeWayNoFunding,
            "3way_awaiting_payment" => Self::ThreeWayAwaitingPayment,
            "full_4way" => Self::Full4Way,
            "amount_mismatch" => Self::AmountMismatch,
            "resolved" => Self::Resolved,
            _ => Self::Unmatched,
        }
    }

    /// Triage severity for the priority queue; lower sorts first.
    /// `Resolved` is excluded from the queue entirely and has no rank.
    pub fn severity_rank(&self) -> i64 {
        match self {
            Self::AmountMismatch => 1,
            Self::RemittanceOnly => 2,
            Self::InvoiceOnly => 3,
            Self::PaymentOnly => 4,
            Self::InvoicePaymentOnly => 5,
            Self::TwoWayMatched => 6,
            Self::ThreeWayNoFunding => 7,
            Self::ThreeWayAwaitingPayment => 8,
            Self::Full4Way => 9,
            Self::Unmatched | Self::Resolved => 10,
        }
    }
}

// ============================================================================
// Match Flags
// ============================================================================

/// Reason tags recomputed alongside `match_status`; never hand-edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchFlag {
    RemittanceInvoiceMismatch,
    MissingRemittance,
    MissingInvoice,
    MissingFunding,
    MissingPayment,
}

impl MatchFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemittanceInvoiceMismatch => "remittance_invoice_mismatch",
            Self::MissingRemittance => "missing_remittance",
            Self::MissingInvoice => "missing_invoice",
            Self::MissingFunding => "missing_funding",
            Self::MissingPayment => "missing_payment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "remittance_invoice_mismatch" => Some(Self::RemittanceInvoiceMismatch),
            "missing_remittance" => Some(Self::MissingRemittance),
            "missing_invoice" => Some(Self::MissingInvoice),
            "missing_funding" => Some(Self::MissingFunding),
            "missing_payment" => Some(Self::MissingPayment),
            _ => None,
        }
    }

    /// Serialize a flag set to the stored JSON array form.
    pub fn to_json(flags: &[MatchFlag]) -> String {
        let tags: Vec<&str> = flags.iter().map(|f| f.as_str()).collect();
        serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(json: &str) -> Vec<MatchFlag> {
        serde_json::from_str::<Vec<String>>(json)
            .unwrap_or_default()
            .iter()
            .filter_map(|s| MatchFlag::from_str(s))
            .collect()
    }
}

// ============================================================================
// Operator Flag
// ============================================================================

/// Operator triage annotation, independent of `match_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorFlag {
    NeedsOutreach,
    Investigating,
    Escalated,
}

impl OperatorFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsOutreach => "needs_outreach",
            Self::Investigating => "investigating",
            Self::Escalated => "escalated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "needs_outreach" => Some(Self::NeedsOutreach),
            "investigating" => Some(Self::Investigating),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }
}

// ============================================================================
// Leg Kinds and Leg Inputs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegKind {
    Remittance,
    Invoice,
    Payment,
    Funding,
}

impl LegKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remittance => "remittance",
            Self::Invoice => "invoice",
            Self::Payment => "payment",
            Self::Funding => "funding",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "remittance" => Some(Self::Remittance),
            "invoice" => Some(Self::Invoice),
            "payment" => Some(Self::Payment),
            "funding" => Some(Self::Funding),
            _ => None,
        }
    }
}

/// Remittance leg input: what the payer claims to have sent.
#[derive(Debug, Clone)]
pub struct RemittanceLeg {
    pub amount: f64,
    pub date: Option<NaiveDate>,
    pub source: String,
    pub message_id: String,
    /// Payer descriptor carried from the notice; feeds the funding matcher's
    /// group description.
    pub payer: String,
}

/// Invoice leg input: what the ledger expects.
#[derive(Debug, Clone)]
pub struct InvoiceLeg {
    pub amount: f64,
    pub status: String,
    pub tenant: String,
    pub batch_ref: String,
    pub currency: String,
}

/// Outbound payment leg input: what was actually disbursed.
#[derive(Debug, Clone)]
pub struct PaymentLeg {
    pub amount: f64,
    pub account_id: String,
    pub date: Option<NaiveDate>,
    pub currency: String,
    pub status: String,
    pub recipient: String,
    pub recipient_country: String,
}

/// Inbound funding link: a reference to a `ReceivedPayment`, with
/// denormalized amount/date for fast filtering.
#[derive(Debug, Clone)]
pub struct FundingLink {
    pub payment_id: String,
    pub amount: f64,
    pub date: Option<NaiveDate>,
}

/// One upstream source's claim about a financial event. A leg, once set,
/// is only ever replaced whole by a newer upsert of the same kind.
#[derive(Debug, Clone)]
pub enum Leg {
    Remittance(RemittanceLeg),
    Invoice(InvoiceLeg),
    Payment(PaymentLeg),
    Funding(FundingLink),
}

impl Leg {
    pub fn kind(&self) -> LegKind {
        match self {
            Self::Remittance(_) => LegKind::Remittance,
            Self::Invoice(_) => LegKind::Invoice,
            Self::Payment(_) => LegKind::Payment,
            Self::Funding(_) => LegKind::Funding,
        }
    }
}

// ============================================================================
// Reconciliation Record
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReconRecord {
    pub correlation_code: String,

    pub remittance_amount: Option<f64>,
    pub remittance_date: Option<NaiveDate>,
    pub remittance_source: Option<String>,
    pub remittance_message_id: Option<String>,
    pub remittance_payer: Option<String>,

    pub invoice_amount: Option<f64>,
    pub invoice_status: Option<String>,
    pub invoice_tenant: Option<String>,
    pub invoice_batch_ref: Option<String>,
    pub invoice_currency: Option<String>,

    pub payment_amount: Option<f64>,
    pub payment_account_id: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub payment_currency: Option<String>,
    pub payment_status: Option<String>,
    pub payment_recipient: Option<String>,
    pub payment_recipient_country: Option<String>,

    pub funding_payment_id: Option<String>,
    pub funding_amount: Option<f64>,
    pub funding_date: Option<NaiveDate>,

    pub match_status: String,
    pub match_flags: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub notes: Option<String>,
    pub flag: Option<String>,
    pub flag_notes: Option<String>,
}

impl ReconRecord {
    pub fn has_remittance(&self) -> bool {
        self.remittance_amount.is_some()
    }

    pub fn has_invoice(&self) -> bool {
        self.invoice_amount.is_some()
    }

    pub fn has_payment(&self) -> bool {
        self.payment_amount.is_some()
    }

    pub fn has_funding(&self) -> bool {
        self.funding_payment_id.is_some()
    }

    pub fn status(&self) -> MatchStatus {
        MatchStatus::from_str(&self.match_status)
    }

    pub fn flags(&self) -> Vec<MatchFlag> {
        MatchFlag::from_json(&self.match_flags)
    }

    /// Amount carried by a leg, if that leg is present.
    pub fn leg_amount(&self, kind: LegKind) -> Option<f64> {
        match kind {
            LegKind::Remittance => self.remittance_amount,
            LegKind::Invoice => self.invoice_amount,
            LegKind::Payment => self.payment_amount,
            LegKind::Funding => self.funding_amount,
        }
    }

    /// Extract one leg as an upsert input, if present. Used by the manual
    /// associate action to copy a donor's leg onto another record.
    pub fn extract_leg(&self, kind: LegKind) -> Option<Leg> {
        match kind {
            LegKind::Remittance => self.remittance_amount.map(|amount| {
                Leg::Remittance(RemittanceLeg {
                    amount,
                    date: self.remittance_date,
                    source: self.remittance_source.clone().unwrap_or_default(),
                    message_id: self.remittance_message_id.clone().unwrap_or_default(),
                    payer: self.remittance_payer.clone().unwrap_or_default(),
                })
            }),
            LegKind::Invoice => self.invoice_amount.map(|amount| {
                Leg::Invoice(InvoiceLeg {
                    amount,
                    status: self.invoice_status.clone().unwrap_or_default(),
                    tenant: self.invoice_tenant.clone().unwrap_or_default(),
                    batch_ref: self.invoice_batch_ref.clone().unwrap_or_default(),
                    currency: self.invoice_currency.clone().unwrap_or_default(),
                })
            }),
            LegKind::Payment => self.payment_amount.map(|amount| {
                Leg::Payment(PaymentLeg {
                    amount,
                    account_id: self.payment_account_id.clone().unwrap_or_default(),
                    date: self.payment_date,
                    currency: self.payment_currency.clone().unwrap_or_default(),
                    status: self.payment_status.clone().unwrap_or_default(),
                    recipient: self.payment_recipient.clone().unwrap_or_default(),
                    recipient_country: self
                        .payment_recipient_country
                        .clone()
                        .unwrap_or_default(),
                })
            }),
            LegKind::Funding => self.funding_payment_id.clone().map(|payment_id| {
                Leg::Funding(FundingLink {
                    payment_id,
                    amount: self.funding_amount.unwrap_or_default(),
                    date: self.funding_date,
                })
            }),
        }
    }
}

// ============================================================================
// Received Payment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivedPaymentStatus {
    Unmatched,
    Suggested,
    Matched,
}

impl ReceivedPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Suggested => "suggested",
            Self::Matched => "matched",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "suggested" => Self::Suggested,
            "matched" => Self::Matched,
            _ => Self::Unmatched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Manual,
    AutoAmountDatePayer,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoAmountDatePayer => "auto_amount_date_payer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "auto_amount_date_payer" => Some(Self::AutoAmountDatePayer),
            _ => None,
        }
    }
}

/// Bank-confirmed inbound cash movement, keyed by provider payment id.
/// Carries no correlation code at creation; linked to a remittance group
/// by the funding matcher or a manual match action.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReceivedPayment {
    pub payment_id: String,
    pub account_id: String,
    pub account_name: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub payment_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub raw_payer_info: Option<String>,
    pub payer_name: Option<String>,
    pub match_status: String,
    pub matched_group_id: Option<String>,
    pub confidence: Option<f64>,
    pub match_method: Option<String>,
    pub notes: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

// ============================================================================
// Remittance Group
// ============================================================================

/// All records sharing one originating remittance message, aggregated to
/// the unit of funding linkage.
#[derive(Debug, Clone)]
pub struct RemittanceGroup {
    /// The originating message id.
    pub group_id: String,
    pub total_amount: f64,
    pub date: Option<NaiveDate>,
    /// Payer descriptor (falls back to the source tag).
    pub description: String,
    pub code_count: i64,
}

// ============================================================================
// Sync State
// ============================================================================

/// One row per upstream source; mutated only by the sync orchestrator.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SyncState {
    pub source: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_count: i64,
    pub status: String,
}

// ============================================================================
// Suggestions
// ============================================================================

/// A candidate record for a manual association; recall-favoring, never
/// merged automatically.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub correlation_code: String,
    pub leg_kind: &'static str,
    pub amount: Option<f64>,
    pub tenant: Option<String>,
    pub confidence: f64,
    pub reason: String,
}

// ============================================================================
// Sync Cycle Report
// ============================================================================

/// Per-step outcome of one sync cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StepOutcome {
    Ok { count: usize },
    Error { error: String },
}

/// Result map of one `run_cycle` invocation, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub steps: Vec<(String, StepOutcome)>,
}

impl CycleReport {
    pub fn record_ok(&mut self, source: &str, count: usize) {
        self.steps
            .push((source.to_string(), StepOutcome::Ok { count }));
    }

    pub fn record_error(&mut self, source: &str, error: String) {
        self.steps
            .push((source.to_string(), StepOutcome::Error { error }));
    }

    pub fn outcome(&self, source: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(name, _)| name == source)
            .map(|(_, outcome)| outcome)
    }

    pub fn error_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, o)| matches!(o, StepOutcome::Error { .. }))
            .count()
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Counts by match_status plus the grand total.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSummary {
    pub counts: std::collections::BTreeMap<String, i64>,
    pub total: i64,
}
