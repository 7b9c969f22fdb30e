//! Upstream source boundary.
//!
//! Each upstream feed is reached through a narrow trait yielding
//! normalized records; the sync orchestrator only ever sees these.
//! Vendor-specific depth (mail APIs, provider auth) stays behind the
//! trait implementations.

pub mod payments_api;
pub mod remittance;
pub mod tenant_db;

use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;

pub use payments_api::PaymentsApiClient;
pub use remittance::{parse_remittance_csv, FileDropInbox};
pub use tenant_db::TenantDbInvoiceSource;

/// One line item of a remittance notice.
#[derive(Debug, Clone)]
pub struct RemittanceLine {
    pub correlation_code: String,
    pub description: String,
    pub amount: f64,
}

/// A normalized remittance notice: what a payer claims to have sent,
/// with one line per correlation code.
#[derive(Debug, Clone)]
pub struct RemittanceNotice {
    /// Originating message id; the unit of funding linkage.
    pub message_id: String,
    /// Source-type tag (which feed produced this notice).
    pub source: String,
    /// Payer descriptor as stated by the notice.
    pub payer: String,
    pub payment_date: Option<NaiveDate>,
    /// Header total as stated by the notice, when present.
    pub payment_amount: Option<f64>,
    pub lines: Vec<RemittanceLine>,
}

/// A normalized invoice record from the tenant ledger.
#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub correlation_code: String,
    pub amount: f64,
    pub status: String,
    pub tenant: String,
    pub batch_ref: String,
    pub currency: String,
}

/// A normalized outbound payment (disbursement to a third party).
#[derive(Debug, Clone)]
pub struct OutboundPayment {
    pub correlation_code: String,
    pub payment_id: String,
    pub account_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub date: Option<NaiveDate>,
    pub recipient: String,
    pub recipient_country: String,
}

/// A normalized inbound funding payment. Carries no correlation code;
/// linkage is the funding matcher's job.
#[derive(Debug, Clone)]
pub struct InboundPayment {
    pub payment_id: String,
    pub account_id: String,
    pub account_name: String,
    pub amount: f64,
    pub currency: String,
    pub date: Option<NaiveDate>,
    pub status: String,
    pub raw_payer_info: String,
    pub payer_name: String,
}

#[async_trait]
pub trait RemittanceSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RemittanceNotice>, AppError>;
}

#[async_trait]
pub trait InvoiceSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<InvoiceRecord>, AppError>;
}

#[async_trait]
pub trait PaymentSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<OutboundPayment>, AppError>;
}

#[async_trait]
pub trait FundingSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<InboundPayment>, AppError>;
}
