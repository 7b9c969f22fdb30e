//! Core reconciliation operations.
//!
//! `ReconEngine` is the surface a transport layer consumes: leg upserts
//! with synchronous recompute, record reads, the priority queue,
//! suggestions, and the manual operator actions (associate, flag,
//! resolve/reopen, received-payment match/unmatch). Manual actions
//! validate everything up front; a failed action leaves no partial
//! mutation behind.

use crate::models::{
    FundingLink, Leg, LegKind, MatchFlag, MatchMethod, MatchStatus, OperatorFlag, ReceivedPayment,
    ReconRecord, StatusSummary, Suggestion, SyncState,
};
use crate::services::database::{
    Database, QueueSortColumn, ReceivedPaymentFilter, RecordFilter, SortDir,
};
use crate::services::{metrics, suggestions};
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct ReconEngine {
    db: Arc<Database>,
}

impl ReconEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // =========================================================================
    // Upsert & Recompute
    // =========================================================================

    /// Insert-or-replace one leg and synchronously recompute the record's
    /// cached status before returning. Callers never observe a record whose
    /// status is stale relative to its stored legs.
    #[instrument(skip(self, leg), fields(leg = leg.kind().as_str()))]
    pub async fn upsert_leg(
        &self,
        correlation_code: &str,
        leg: &Leg,
    ) -> Result<ReconRecord, AppError> {
        self.db.write_leg(correlation_code, leg).await?;
        metrics::record_leg_upsert(leg.kind().as_str());
        self.db.recompute_status(correlation_code).await?;
        self.db
            .get_record(correlation_code)
            .await?
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "record {correlation_code} missing after upsert"
                ))
            })
    }

    /// Recompute status and flags from the stored legs.
    #[instrument(skip(self))]
    pub async fn recompute(
        &self,
        correlation_code: &str,
    ) -> Result<(MatchStatus, Vec<MatchFlag>), AppError> {
        self.db
            .recompute_status(correlation_code)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "correlation code {correlation_code} not found"
                ))
            })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn get_record(&self, correlation_code: &str) -> Result<ReconRecord, AppError> {
        self.db.get_record(correlation_code).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "correlation code {correlation_code} not found"
            ))
        })
    }

    #[instrument(skip(self, filter))]
    pub async fn list_records(
        &self,
        filter: &RecordFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ReconRecord>, AppError> {
        self.db
            .list_records(filter, limit.clamp(1, 1000), offset.max(0))
            .await
    }

    /// Priority queue of unresolved records: fixed severity rank first,
    /// then a caller-chosen secondary column. Unknown sort columns fall
    /// back to `last_updated_at DESC`; only the allow-listed set ever
    /// reaches ORDER BY.
    #[instrument(skip(self, filter))]
    pub async fn list_queue(
        &self,
        filter: &RecordFilter,
        sort_by: Option<&str>,
        sort_dir: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ReconRecord>, i64), AppError> {
        let sort = sort_by
            .and_then(QueueSortColumn::parse)
            .unwrap_or(QueueSortColumn::LastUpdatedAt);
        let dir = match sort_dir {
            Some(d) => SortDir::parse(d),
            None => SortDir::Desc,
        };

        self.db
            .queue(filter, sort, dir, limit.clamp(1, 500), offset.max(0))
            .await
    }

    #[instrument(skip(self))]
    pub async fn summary(&self) -> Result<StatusSummary, AppError> {
        self.db.summary().await
    }

    #[instrument(skip(self))]
    pub async fn sync_status(&self) -> Result<Vec<SyncState>, AppError> {
        self.db.sync_state().await
    }

    // =========================================================================
    // Suggestions
    // =========================================================================

    /// Ranked association candidates for a record. Recall-favoring; only
    /// ever feeds the manual associate action.
    #[instrument(skip(self))]
    pub async fn get_suggestions(
        &self,
        correlation_code: &str,
    ) -> Result<Vec<Suggestion>, AppError> {
        let record = self.get_record(correlation_code).await?;
        suggestions::suggestions_for(&self.db, &record).await
    }

    // =========================================================================
    // Manual Actions
    // =========================================================================

    /// Copy one leg from a donor record onto a target record, with an
    /// audit note, and recompute the target.
    #[instrument(skip(self, note))]
    pub async fn associate(
        &self,
        target_code: &str,
        donor_code: &str,
        leg_kind: LegKind,
        note: &str,
    ) -> Result<ReconRecord, AppError> {
        // Validate both ends before touching anything.
        self.get_record(target_code).await?;
        let donor = self.get_record(donor_code).await?;

        let leg = donor.extract_leg(leg_kind).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "record {donor_code} has no {} leg to associate",
                leg_kind.as_str()
            ))
        })?;

        self.upsert_leg(target_code, &leg).await?;

        let audit = format!(
            "[{}] associated {} leg from {}. {}",
            Utc::now().to_rfc3339(),
            leg_kind.as_str(),
            donor_code,
            note
        );
        self.db.append_note(target_code, &audit).await?;

        info!(
            target = target_code,
            donor = donor_code,
            leg = leg_kind.as_str(),
            "associated leg"
        );
        self.get_record(target_code).await
    }

    /// Set or clear the operator triage flag. Independent of match_status.
    #[instrument(skip(self, notes))]
    pub async fn set_flag(
        &self,
        correlation_code: &str,
        flag: Option<OperatorFlag>,
        notes: &str,
    ) -> Result<ReconRecord, AppError> {
        let updated = self.db.set_flag(correlation_code, flag, notes).await?;
        if !updated {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "correlation code {correlation_code} not found"
            )));
        }
        self.get_record(correlation_code).await
    }

    /// Append a timestamped line to the record's audit notes.
    #[instrument(skip(self, text))]
    pub async fn append_note(&self, correlation_code: &str, text: &str) -> Result<(), AppError> {
        let line = format!("[{}] {}", Utc::now().to_rfc3339(), text);
        let updated = self.db.append_note(correlation_code, &line).await?;
        if !updated {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "correlation code {correlation_code} not found"
            )));
        }
        Ok(())
    }

    /// Manual terminal override. The status pins at `resolved` until an
    /// explicit reopen, regardless of further leg upserts.
    #[instrument(skip(self, note))]
    pub async fn resolve(
        &self,
        correlation_code: &str,
        resolved_by: &str,
        note: &str,
    ) -> Result<ReconRecord, AppError> {
        let updated = self.db.set_resolved(correlation_code, resolved_by).await?;
        if !updated {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "correlation code {correlation_code} not found"
            )));
        }

        let audit = format!(
            "[{}] resolved by {}. {}",
            Utc::now().to_rfc3339(),
            resolved_by,
            note
        );
        self.db.append_note(correlation_code, &audit).await?;
        self.db.recompute_status(correlation_code).await?;
        self.get_record(correlation_code).await
    }

    /// Clear the manual override and re-derive status from the legs.
    #[instrument(skip(self))]
    pub async fn reopen(&self, correlation_code: &str) -> Result<ReconRecord, AppError> {
        let updated = self.db.clear_resolved(correlation_code).await?;
        if !updated {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "correlation code {correlation_code} not found"
            )));
        }

        let audit = format!("[{}] reopened", Utc::now().to_rfc3339());
        self.db.append_note(correlation_code, &audit).await?;
        self.db.recompute_status(correlation_code).await?;
        self.get_record(correlation_code).await
    }

    // =========================================================================
    // Received Payment Actions
    // =========================================================================

    /// Link a received payment to a remittance group and cascade the
    /// funding leg onto every correlation code in that group.
    #[instrument(skip(self))]
    pub async fn match_received_payment(
        &self,
        payment_id: &str,
        group_id: &str,
        method: MatchMethod,
    ) -> Result<usize, AppError> {
        let payment = self
            .db
            .get_received_payment(payment_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("received payment {payment_id} not found"))
            })?;

        let codes = self.db.codes_in_group(group_id).await?;
        if codes.is_empty() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "remittance group {group_id} has no records"
            )));
        }

        self.db
            .mark_received_payment_matched(payment_id, group_id, 1.0, method.as_str())
            .await?;

        self.cascade_funding_leg(&payment, &codes).await?;
        metrics::record_funding_match(method.as_str());

        info!(
            payment_id,
            group_id,
            linked = codes.len(),
            method = method.as_str(),
            "received payment matched"
        );
        Ok(codes.len())
    }

    /// Reverse a received-payment link: clear the funding leg from every
    /// record the cascade touched and recompute each.
    #[instrument(skip(self))]
    pub async fn unmatch_received_payment(&self, payment_id: &str) -> Result<usize, AppError> {
        self.db
            .get_received_payment(payment_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("received payment {payment_id} not found"))
            })?;

        self.db.clear_received_payment_match(payment_id).await?;

        let codes = self.db.clear_funding_leg(payment_id).await?;
        for code in &codes {
            self.db.recompute_status(code).await?;
        }

        info!(payment_id, unlinked = codes.len(), "received payment unmatched");
        Ok(codes.len())
    }

    /// Write the funding leg onto every code in a group. Shared by the
    /// manual match action and the funding matcher's auto-commit.
    pub(crate) async fn cascade_funding_leg(
        &self,
        payment: &ReceivedPayment,
        codes: &[String],
    ) -> Result<(), AppError> {
        let leg = Leg::Funding(FundingLink {
            payment_id: payment.payment_id.clone(),
            amount: payment.amount,
            date: payment.payment_date,
        });
        for code in codes {
            self.upsert_leg(code, &leg).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, filter))]
    pub async fn list_received_payments(
        &self,
        filter: &ReceivedPaymentFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ReceivedPayment>, i64), AppError> {
        self.db
            .list_received_payments(filter, limit.clamp(1, 1000), offset.max(0))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_received_payment(
        &self,
        payment_id: &str,
    ) -> Result<ReceivedPayment, AppError> {
        self.db
            .get_received_payment(payment_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("received payment {payment_id} not found"))
            })
    }
}
