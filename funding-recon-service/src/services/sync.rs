//! Sync orchestrator.
//!
//! One cycle pulls from each upstream source in fixed order — remittance
//! notices, tenant invoices, inbound received payments, outbound
//! payments — then runs the funding matcher once. Steps run sequentially
//! so two sources never interleave writes into a half-updated record.
//! Each step is isolated: a failure is recorded in that source's
//! `sync_state` row and the cycle moves on. A single in-progress guard is
//! shared by the periodic timer and manual triggers; a second trigger is
//! rejected, never queued.

use crate::models::{CycleReport, InvoiceLeg, Leg, PaymentLeg, RemittanceLeg};
use crate::services::database::Database;
use crate::services::engine::ReconEngine;
use crate::services::matcher::FundingMatcher;
use crate::services::metrics;
use crate::sources::{FundingSource, InvoiceSource, PaymentSource, RemittanceSource};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub const SOURCE_REMITTANCES: &str = "remittances";
pub const SOURCE_INVOICES: &str = "invoices";
pub const SOURCE_RECEIVED_PAYMENTS: &str = "received_payments";
pub const SOURCE_PAYMENTS: &str = "payments";
pub const STEP_FUNDING_MATCHER: &str = "funding_matcher";

pub struct SyncOrchestrator {
    engine: ReconEngine,
    db: Arc<Database>,
    matcher: FundingMatcher,
    remittances: Arc<dyn RemittanceSource>,
    invoices: Arc<dyn InvoiceSource>,
    funding: Arc<dyn FundingSource>,
    payments: Arc<dyn PaymentSource>,
    in_progress: Mutex<()>,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: ReconEngine,
        db: Arc<Database>,
        matcher: FundingMatcher,
        remittances: Arc<dyn RemittanceSource>,
        invoices: Arc<dyn InvoiceSource>,
        funding: Arc<dyn FundingSource>,
        payments: Arc<dyn PaymentSource>,
    ) -> Self {
        Self {
            engine,
            db,
            matcher,
            remittances,
            invoices,
            funding,
            payments,
            in_progress: Mutex::new(()),
        }
    }

    /// Run one sync cycle. Returns `Conflict` when a cycle is already in
    /// flight, whatever triggered it.
    pub async fn run_cycle(&self) -> Result<CycleReport, AppError> {
        let _guard = self.in_progress.try_lock().map_err(|_| {
            metrics::record_sync_cycle("rejected");
            AppError::Conflict(anyhow::anyhow!("sync cycle already in progress"))
        })?;

        let cycle_id = Uuid::new_v4();
        info!(%cycle_id, "sync cycle started");
        let mut report = CycleReport::default();

        let result = self.sync_remittances().await;
        self.finish_step(SOURCE_REMITTANCES, result, &mut report)
            .await;

        let result = self.sync_invoices().await;
        self.finish_step(SOURCE_INVOICES, result, &mut report).await;

        let result = self.sync_received_payments().await;
        self.finish_step(SOURCE_RECEIVED_PAYMENTS, result, &mut report)
            .await;

        let result = self.sync_payments().await;
        self.finish_step(SOURCE_PAYMENTS, result, &mut report).await;

        // Matcher runs last, over whatever the cycle managed to ingest.
        match self.matcher.run().await {
            Ok(outcome) => report.record_ok(STEP_FUNDING_MATCHER, outcome.matched),
            Err(e) => {
                error!(error = %e, "funding matcher failed");
                metrics::record_error("funding_matcher");
                report.record_error(STEP_FUNDING_MATCHER, truncate_error(&e));
            }
        }

        let outcome = if report.error_count() == 0 { "ok" } else { "partial" };
        metrics::record_sync_cycle(outcome);
        info!(%cycle_id, outcome, errors = report.error_count(), "sync cycle complete");
        Ok(report)
    }

    /// Spawn the periodic cycle driver. The first cycle fires immediately,
    /// then every `interval`. A tick that lands while a manual cycle holds
    /// the guard is skipped.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match orchestrator.run_cycle().await {
                    Ok(report) => {
                        debug!(errors = report.error_count(), "periodic sync cycle finished");
                    }
                    Err(AppError::Conflict(_)) => {
                        debug!("periodic tick skipped, cycle already running");
                    }
                    Err(e) => {
                        error!(error = %e, "periodic sync cycle failed");
                    }
                }
            }
        })
    }

    async fn finish_step(
        &self,
        source: &str,
        result: Result<usize, AppError>,
        report: &mut CycleReport,
    ) {
        match result {
            Ok(count) => {
                metrics::record_sync_source(source, "ok");
                if let Err(e) = self.db.update_sync_state(source, count as i64, "ok").await {
                    warn!(source, error = %e, "failed to record sync state");
                }
                report.record_ok(source, count);
            }
            Err(e) => {
                error!(source, error = %e, "sync step failed");
                metrics::record_sync_source(source, "error");
                metrics::record_error("sync_step");
                let status = format!("error: {}", truncate_error(&e));
                if let Err(state_err) = self.db.update_sync_state(source, 0, &status).await {
                    warn!(source, error = %state_err, "failed to record sync state");
                }
                report.record_error(source, e.to_string());
            }
        }
    }

    #[instrument(skip(self))]
    async fn sync_remittances(&self) -> Result<usize, AppError> {
        let notices = self.remittances.fetch().await?;
        let mut count = 0usize;
        let mut skipped = 0usize;

        for notice in &notices {
            for line in &notice.lines {
                if line.correlation_code.trim().is_empty() {
                    skipped += 1;
                    continue;
                }
                let leg = Leg::Remittance(RemittanceLeg {
                    amount: line.amount,
                    date: notice.payment_date,
                    source: notice.source.clone(),
                    message_id: notice.message_id.clone(),
                    payer: notice.payer.clone(),
                });
                self.engine.upsert_leg(&line.correlation_code, &leg).await?;
                count += 1;
            }
        }

        if skipped > 0 {
            warn!(skipped, "remittance lines without correlation codes skipped");
        }
        info!(notices = notices.len(), upserted = count, "remittance sync complete");
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn sync_invoices(&self) -> Result<usize, AppError> {
        let invoices = self.invoices.fetch().await?;
        let mut count = 0usize;

        for invoice in &invoices {
            let leg = Leg::Invoice(InvoiceLeg {
                amount: invoice.amount,
                status: invoice.status.clone(),
                tenant: invoice.tenant.clone(),
                batch_ref: invoice.batch_ref.clone(),
                currency: invoice.currency.clone(),
            });
            self.engine
                .upsert_leg(&invoice.correlation_code, &leg)
                .await?;
            count += 1;
        }

        info!(upserted = count, "invoice sync complete");
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn sync_received_payments(&self) -> Result<usize, AppError> {
        let payments = self.funding.fetch().await?;
        let mut count = 0usize;

        for payment in &payments {
            self.db.upsert_received_payment(payment).await?;
            count += 1;
        }

        info!(upserted = count, "received payment sync complete");
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn sync_payments(&self) -> Result<usize, AppError> {
        let payments = self.payments.fetch().await?;
        let mut count = 0usize;
        let mut skipped = 0usize;

        for payment in &payments {
            if payment.correlation_code.trim().is_empty() {
                skipped += 1;
                continue;
            }
            let leg = Leg::Payment(PaymentLeg {
                amount: payment.amount,
                account_id: payment.account_id.clone(),
                date: payment.date,
                currency: payment.currency.clone(),
                status: payment.status.clone(),
                recipient: payment.recipient.clone(),
                recipient_country: payment.recipient_country.clone(),
            });
            self.engine
                .upsert_leg(&payment.correlation_code, &leg)
                .await?;
            count += 1;
        }

        if skipped > 0 {
            warn!(skipped, "outbound payments without correlation codes skipped");
        }
        info!(upserted = count, "outbound payment sync complete");
        Ok(count)
    }
}

fn truncate_error(err: &AppError) -> String {
    let text = err.to_string();
    if text.len() > 200 {
        let mut cut = 200;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &text[..cut])
    } else {
        text
    }
}
