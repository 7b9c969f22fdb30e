//! Invoice source over the remote tenant ledger database.
//!
//! Read-only mirror access: a bounded lookback window over the payment
//! documents of an allow-listed set of tenants. The pool is lazy so a
//! down ledger surfaces as a per-cycle source error, never a startup
//! failure.

use super::{InvoiceRecord, InvoiceSource};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Canonical ledger payment status codes.
fn status_label(code: i32) -> String {
    match code {
        0 => "draft".to_string(),
        1 => "approved".to_string(),
        2 => "processing".to_string(),
        3 => "in_flight".to_string(),
        4 => "paid".to_string(),
        5 => "rejected".to_string(),
        6 => "cancelled".to_string(),
        other => format!("unknown({other})"),
    }
}

/// Tenant hostnames become short tags (`acme.example.com` → `acme`).
fn tenant_tag(tenant: &str) -> String {
    tenant.split('.').next().unwrap_or(tenant).to_string()
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    tenant: String,
    invoice_id: Option<String>,
    total_amount: Option<f64>,
    currency: Option<String>,
    status: Option<i32>,
    payrun_id: Option<String>,
}

pub struct TenantDbInvoiceSource {
    pool: PgPool,
    tenants: Vec<String>,
    lookback_days: i64,
}

impl TenantDbInvoiceSource {
    pub fn connect_lazy(
        url: &str,
        tenants: Vec<String>,
        lookback_days: i64,
        max_connections: u32,
    ) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_lazy(url)?;

        Ok(Self {
            pool,
            tenants,
            lookback_days,
        })
    }
}

#[async_trait]
impl InvoiceSource for TenantDbInvoiceSource {
    async fn fetch(&self) -> Result<Vec<InvoiceRecord>, AppError> {
        let cutoff = Utc::now() - Duration::days(self.lookback_days);

        let rows: Vec<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT tenant,
                   invoice_id,
                   total_amount::float8 AS total_amount,
                   currency,
                   status,
                   payrun_id::text AS payrun_id
            FROM documents_payment
            WHERE tenant = ANY($1)
              AND created_at >= $2
            ORDER BY tenant, created_at DESC
            "#,
        )
        .bind(&self.tenants)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Upstream(anyhow::Error::new(e)))?;

        let fetched = rows.len();
        let mut skipped = 0usize;

        let invoices: Vec<InvoiceRecord> = rows
            .into_iter()
            .filter_map(|row| {
                // A payment document without a correlation code cannot be
                // reconciled; skip, never abort the batch.
                let Some(code) = row.invoice_id.filter(|c| !c.trim().is_empty()) else {
                    skipped += 1;
                    return None;
                };
                Some(InvoiceRecord {
                    correlation_code: code.trim().to_string(),
                    amount: row.total_amount.unwrap_or_default(),
                    status: row.status.map(status_label).unwrap_or_default(),
                    tenant: tenant_tag(&row.tenant),
                    batch_ref: row.payrun_id.unwrap_or_default(),
                    currency: row.currency.unwrap_or_default(),
                })
            })
            .collect();

        info!(
            fetched,
            skipped,
            invoices = invoices.len(),
            lookback_days = self.lookback_days,
            "fetched tenant ledger invoices"
        );
        Ok(invoices)
    }
}
