//! Database service for funding-recon-service.
//!
//! Single relational store of record. Every write is a single-row
//! upsert (or targeted update) so concurrent readers never observe a
//! half-written record.

use crate::models::{
    Leg, LegKind, MatchFlag, MatchStatus, OperatorFlag, ReceivedPayment, ReceivedPaymentStatus,
    ReconRecord, RemittanceGroup, StatusSummary, SyncState,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::status::{self, LegSnapshot};
use crate::sources::InboundPayment;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Typed filter over reconciliation records; compiled to a parameterized
/// query, never assembled from raw caller strings.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<MatchStatus>,
    pub tenant: Option<String>,
    pub flag: Option<OperatorFlag>,
    /// Substring match on the correlation code.
    pub search: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

/// Allow-listed secondary sort columns for the priority queue. Anything
/// outside this set never reaches ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSortColumn {
    LastUpdatedAt,
    FirstSeenAt,
    CorrelationCode,
    RemittanceAmount,
    InvoiceAmount,
    PaymentAmount,
    FundingAmount,
}

impl QueueSortColumn {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "last_updated_at" => Some(Self::LastUpdatedAt),
            "first_seen_at" => Some(Self::FirstSeenAt),
            "correlation_code" => Some(Self::CorrelationCode),
            "remittance_amount" => Some(Self::RemittanceAmount),
            "invoice_amount" => Some(Self::InvoiceAmount),
            "payment_amount" => Some(Self::PaymentAmount),
            "funding_amount" => Some(Self::FundingAmount),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::LastUpdatedAt => "last_updated_at",
            Self::FirstSeenAt => "first_seen_at",
            Self::CorrelationCode => "correlation_code",
            Self::RemittanceAmount => "remittance_amount",
            Self::InvoiceAmount => "invoice_amount",
            Self::PaymentAmount => "payment_amount",
            Self::FundingAmount => "funding_amount",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Typed filter over received payments.
#[derive(Debug, Clone, Default)]
pub struct ReceivedPaymentFilter {
    pub account_id: Option<String>,
    pub match_status: Option<ReceivedPaymentStatus>,
    /// Substring match on the parsed payer name.
    pub payer: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "funding-recon-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to reconciliation store"
        );

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        info!("Reconciliation store connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1").execute(&self.pool).await?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Leg Upserts
    // =========================================================================

    /// Insert-or-replace one leg on a record, creating the record when
    /// absent. The leg is replaced whole; fields from a previous upsert of
    /// the same kind never survive piecemeal. The caller is responsible for
    /// triggering recompute afterwards (see `ReconEngine::upsert_leg`).
    #[instrument(skip(self, leg), fields(leg = leg.kind().as_str()))]
    pub async fn write_leg(&self, correlation_code: &str, leg: &Leg) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["write_leg"])
            .start_timer();

        let now = Utc::now();

        match leg {
            Leg::Remittance(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO reconciliation_records
                        (correlation_code, remittance_amount, remittance_date, remittance_source,
                         remittance_message_id, remittance_payer, first_seen_at, last_updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(correlation_code) DO UPDATE SET
                        remittance_amount = excluded.remittance_amount,
                        remittance_date = excluded.remittance_date,
                        remittance_source = excluded.remittance_source,
                        remittance_message_id = excluded.remittance_message_id,
                        remittance_payer = excluded.remittance_payer,
                        last_updated_at = excluded.last_updated_at
                    "#,
                )
                .bind(correlation_code)
                .bind(r.amount)
                .bind(r.date)
                .bind(&r.source)
                .bind(&r.message_id)
                .bind(&r.payer)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            Leg::Invoice(i) => {
                sqlx::query(
                    r#"
                    INSERT INTO reconciliation_records
                        (correlation_code, invoice_amount, invoice_status, invoice_tenant,
                         invoice_batch_ref, invoice_currency, first_seen_at, last_updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(correlation_code) DO UPDATE SET
                        invoice_amount = excluded.invoice_amount,
                        invoice_status = excluded.invoice_status,
                        invoice_tenant = excluded.invoice_tenant,
                        invoice_batch_ref = excluded.invoice_batch_ref,
                        invoice_currency = excluded.invoice_currency,
                        last_updated_at = excluded.last_updated_at
                    "#,
                )
                .bind(correlation_code)
                .bind(i.amount)
                .bind(&i.status)
                .bind(&i.tenant)
                .bind(&i.batch_ref)
                .bind(&i.currency)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            Leg::Payment(p) => {
                sqlx::query(
                    r#"
                    INSERT INTO reconciliation_records
                        (correlation_code, payment_amount, payment_account_id, payment_date,
                         payment_currency, payment_status, payment_recipient,
                         payment_recipient_country, first_seen_at, last_updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(correlation_code) DO UPDATE SET
                        payment_amount = excluded.payment_amount,
                        payment_account_id = excluded.payment_account_id,
                        payment_date = excluded.payment_date,
                        payment_currency = excluded.payment_currency,
                        payment_status = excluded.payment_status,
                        payment_recipient = excluded.payment_recipient,
                        payment_recipient_country = excluded.payment_recipient_country,
                        last_updated_at = excluded.last_updated_at
                    "#,
                )
                .bind(correlation_code)
                .bind(p.amount)
                .bind(&p.account_id)
                .bind(p.date)
                .bind(&p.currency)
                .bind(&p.status)
                .bind(&p.recipient)
                .bind(&p.recipient_country)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            Leg::Funding(f) => {
                sqlx::query(
                    r#"
                    INSERT INTO reconciliation_records
                        (correlation_code, funding_payment_id, funding_amount, funding_date,
                         first_seen_at, last_updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(correlation_code) DO UPDATE SET
                        funding_payment_id = excluded.funding_payment_id,
                        funding_amount = excluded.funding_amount,
                        funding_date = excluded.funding_date,
                        last_updated_at = excluded.last_updated_at
                    "#,
                )
                .bind(correlation_code)
                .bind(&f.payment_id)
                .bind(f.amount)
                .bind(f.date)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
        }

        timer.observe_duration();
        Ok(())
    }

    /// Recompute the cached `match_status` and `match_flags` from the
    /// stored legs. Returns `None` when the record does not exist.
    #[instrument(skip(self))]
    pub async fn recompute_status(
        &self,
        correlation_code: &str,
    ) -> Result<Option<(MatchStatus, Vec<MatchFlag>)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["recompute_status"])
            .start_timer();

        let Some(record) = self.get_record(correlation_code).await? else {
            timer.observe_duration();
            return Ok(None);
        };

        let snapshot = LegSnapshot {
            remittance_amount: record.remittance_amount,
            invoice_amount: record.invoice_amount,
            has_payment: record.has_payment(),
            has_funding: record.has_funding(),
        };
        let (status, flags) = status::derive(&snapshot, record.resolved_at.is_some());

        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET match_status = ?, match_flags = ?, last_updated_at = ?
            WHERE correlation_code = ?
            "#,
        )
        .bind(status.as_str())
        .bind(MatchFlag::to_json(&flags))
        .bind(Utc::now())
        .bind(correlation_code)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(Some((status, flags)))
    }

    // =========================================================================
    // Record Reads
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn get_record(
        &self,
        correlation_code: &str,
    ) -> Result<Option<ReconRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_record"])
            .start_timer();

        let record = sqlx::query_as::<_, ReconRecord>(
            "SELECT * FROM reconciliation_records WHERE correlation_code = ?",
        )
        .bind(correlation_code)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self, filter))]
    pub async fn list_records(
        &self,
        filter: &RecordFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ReconRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_records"])
            .start_timer();

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM reconciliation_records WHERE 1 = 1",
        );
        push_record_filters(&mut qb, filter);
        qb.push(" ORDER BY last_updated_at DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let records = qb
            .build_query_as::<ReconRecord>()
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(records)
    }

    /// Unresolved records ordered by severity rank, then by an allow-listed
    /// secondary column. Returns `(records, total)` where the total ignores
    /// limit/offset for pagination UIs.
    #[instrument(skip(self, filter))]
    pub async fn queue(
        &self,
        filter: &RecordFilter,
        sort: QueueSortColumn,
        dir: SortDir,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ReconRecord>, i64), AppError> {
        let timer = DB_QUERY_DURATION.with_label_values(&["queue"]).start_timer();

        let mut count_qb = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM reconciliation_records WHERE match_status != 'resolved'",
        );
        push_record_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM reconciliation_records WHERE match_status != 'resolved'",
        );
        push_record_filters(&mut qb, filter);
        qb.push(" ORDER BY ");
        qb.push(severity_case_sql());
        qb.push(" ASC, ");
        qb.push(sort.column());
        qb.push(" ");
        qb.push(dir.sql());
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let records = qb
            .build_query_as::<ReconRecord>()
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok((records, total))
    }

    /// Counts by match_status.
    #[instrument(skip(self))]
    pub async fn summary(&self) -> Result<StatusSummary, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["summary"])
            .start_timer();

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT match_status, COUNT(*) FROM reconciliation_records GROUP BY match_status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = StatusSummary::default();
        for (status, count) in rows {
            summary.total += count;
            summary.counts.insert(status, count);
        }

        timer.observe_duration();
        Ok(summary)
    }

    // =========================================================================
    // Record Annotations
    // =========================================================================

    /// Append a line to the record's audit notes. Notes are append-only;
    /// existing content is never rewritten.
    #[instrument(skip(self, note))]
    pub async fn append_note(&self, correlation_code: &str, note: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_note"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET notes = COALESCE(notes || char(10), '') || ?, last_updated_at = ?
            WHERE correlation_code = ?
            "#,
        )
        .bind(note)
        .bind(Utc::now())
        .bind(correlation_code)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn set_flag(
        &self,
        correlation_code: &str,
        flag: Option<OperatorFlag>,
        flag_notes: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_flag"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET flag = ?, flag_notes = ?, last_updated_at = ?
            WHERE correlation_code = ?
            "#,
        )
        .bind(flag.map(|f| f.as_str()))
        .bind(flag_notes)
        .bind(Utc::now())
        .bind(correlation_code)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn set_resolved(
        &self,
        correlation_code: &str,
        resolved_by: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_resolved"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET resolved_at = ?, resolved_by = ?, last_updated_at = ?
            WHERE correlation_code = ?
            "#,
        )
        .bind(Utc::now())
        .bind(resolved_by)
        .bind(Utc::now())
        .bind(correlation_code)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn clear_resolved(&self, correlation_code: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clear_resolved"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET resolved_at = NULL, resolved_by = NULL, last_updated_at = ?
            WHERE correlation_code = ?
            "#,
        )
        .bind(Utc::now())
        .bind(correlation_code)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Remittance Groups
    // =========================================================================

    /// Aggregate remittance legs into groups keyed by originating message.
    #[instrument(skip(self))]
    pub async fn remittance_groups(&self) -> Result<Vec<RemittanceGroup>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remittance_groups"])
            .start_timer();

        let rows: Vec<(String, f64, Option<NaiveDate>, String, i64)> = sqlx::query_as(
            r#"
            SELECT remittance_message_id,
                   SUM(remittance_amount),
                   MIN(remittance_date),
                   COALESCE(MAX(remittance_payer), MAX(remittance_source), ''),
                   COUNT(*)
            FROM reconciliation_records
            WHERE remittance_message_id IS NOT NULL AND remittance_amount IS NOT NULL
            GROUP BY remittance_message_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let groups = rows
            .into_iter()
            .map(
                |(group_id, total_amount, date, description, code_count)| RemittanceGroup {
                    group_id,
                    total_amount,
                    date,
                    description,
                    code_count,
                },
            )
            .collect();

        timer.observe_duration();
        Ok(groups)
    }

    /// Correlation codes belonging to one remittance group.
    #[instrument(skip(self))]
    pub async fn codes_in_group(&self, group_id: &str) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["codes_in_group"])
            .start_timer();

        let codes: Vec<String> = sqlx::query_scalar(
            "SELECT correlation_code FROM reconciliation_records WHERE remittance_message_id = ?",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(codes)
    }

    /// Clear the funding leg from every record linked to the given received
    /// payment. Returns the affected codes so the caller can recompute them.
    #[instrument(skip(self))]
    pub async fn clear_funding_leg(&self, payment_id: &str) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clear_funding_leg"])
            .start_timer();

        let codes: Vec<String> = sqlx::query_scalar(
            "SELECT correlation_code FROM reconciliation_records WHERE funding_payment_id = ?",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;

        sqlx::query(
            r#"
            UPDATE reconciliation_records
            SET funding_payment_id = NULL, funding_amount = NULL, funding_date = NULL,
                last_updated_at = ?
            WHERE funding_payment_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(codes)
    }

    // =========================================================================
    // Suggestion Queries
    // =========================================================================

    /// Records whose given leg amount falls inside `[min, max]`, excluding
    /// the source record. Bounded; the suggestion engine only keeps a
    /// handful anyway.
    #[instrument(skip(self))]
    pub async fn find_leg_amount_candidates(
        &self,
        kind: LegKind,
        min: f64,
        max: f64,
        exclude_code: &str,
    ) -> Result<Vec<ReconRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_leg_amount_candidates"])
            .start_timer();

        let column = match kind {
            LegKind::Remittance => "remittance_amount",
            LegKind::Invoice => "invoice_amount",
            LegKind::Payment => "payment_amount",
            LegKind::Funding => "funding_amount",
        };

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM reconciliation_records WHERE ");
        qb.push(column);
        qb.push(" >= ");
        qb.push_bind(min);
        qb.push(" AND ");
        qb.push(column);
        qb.push(" <= ");
        qb.push_bind(max);
        qb.push(" AND correlation_code != ");
        qb.push_bind(exclude_code.to_string());
        qb.push(" ORDER BY ");
        qb.push(column);
        qb.push(" LIMIT 50");

        let records = qb
            .build_query_as::<ReconRecord>()
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(records)
    }

    /// Records whose correlation code shares the given prefix.
    #[instrument(skip(self))]
    pub async fn find_code_prefix(
        &self,
        prefix: &str,
        exclude_code: &str,
    ) -> Result<Vec<ReconRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_code_prefix"])
            .start_timer();

        let records = sqlx::query_as::<_, ReconRecord>(
            r#"
            SELECT * FROM reconciliation_records
            WHERE correlation_code LIKE ? AND correlation_code != ?
            LIMIT 25
            "#,
        )
        .bind(format!("{prefix}%"))
        .bind(exclude_code)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(records)
    }

    // =========================================================================
    // Received Payments
    // =========================================================================

    /// Insert-or-refresh a received payment from the funding sync step.
    /// Only the observational fields are updated on conflict; match state
    /// belongs to the matcher and manual actions, and re-syncing must not
    /// disturb it.
    #[instrument(skip(self, payment), fields(payment_id = %payment.payment_id))]
    pub async fn upsert_received_payment(
        &self,
        payment: &InboundPayment,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_received_payment"])
            .start_timer();

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO received_payments
                (payment_id, account_id, account_name, amount, currency, payment_date,
                 status, raw_payer_info, payer_name, first_seen_at, last_updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(payment_id) DO UPDATE SET
                account_id = excluded.account_id,
                account_name = excluded.account_name,
                amount = excluded.amount,
                currency = excluded.currency,
                payment_date = excluded.payment_date,
                status = excluded.status,
                raw_payer_info = excluded.raw_payer_info,
                payer_name = excluded.payer_name,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(&payment.payment_id)
        .bind(&payment.account_id)
        .bind(&payment.account_name)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.date)
        .bind(&payment.status)
        .bind(&payment.raw_payer_info)
        .bind(&payment.payer_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_received_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<ReceivedPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_received_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, ReceivedPayment>(
            "SELECT * FROM received_payments WHERE payment_id = ?",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(payment)
    }

    /// Candidates for the funding matcher; already-matched rows are
    /// excluded so reruns are idempotent.
    #[instrument(skip(self))]
    pub async fn unmatched_received_payments(&self) -> Result<Vec<ReceivedPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["unmatched_received_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, ReceivedPayment>(
            "SELECT * FROM received_payments WHERE match_status = 'unmatched'",
        )
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(payments)
    }

    #[instrument(skip(self, filter))]
    pub async fn list_received_payments(
        &self,
        filter: &ReceivedPaymentFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ReceivedPayment>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_received_payments"])
            .start_timer();

        let mut count_qb =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM received_payments WHERE 1 = 1");
        push_received_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM received_payments WHERE 1 = 1");
        push_received_filters(&mut qb, filter);
        qb.push(" ORDER BY payment_date DESC, payment_id LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let payments = qb
            .build_query_as::<ReceivedPayment>()
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok((payments, total))
    }

    #[instrument(skip(self))]
    pub async fn mark_received_payment_matched(
        &self,
        payment_id: &str,
        group_id: &str,
        confidence: f64,
        method: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_received_payment_matched"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE received_payments
            SET match_status = 'matched', matched_group_id = ?, confidence = ?,
                match_method = ?, last_updated_at = ?
            WHERE payment_id = ?
            "#,
        )
        .bind(group_id)
        .bind(confidence)
        .bind(method)
        .bind(Utc::now())
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, note))]
    pub async fn mark_received_payment_suggested(
        &self,
        payment_id: &str,
        note: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_received_payment_suggested"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE received_payments
            SET match_status = 'suggested', notes = ?, last_updated_at = ?
            WHERE payment_id = ?
            "#,
        )
        .bind(note)
        .bind(Utc::now())
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn clear_received_payment_match(&self, payment_id: &str) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["clear_received_payment_match"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE received_payments
            SET match_status = 'unmatched', matched_group_id = NULL, confidence = NULL,
                match_method = NULL, notes = NULL, last_updated_at = ?
            WHERE payment_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Sync State
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn sync_state(&self) -> Result<Vec<SyncState>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sync_state"])
            .start_timer();

        let rows = sqlx::query_as::<_, SyncState>("SELECT * FROM sync_state ORDER BY source")
            .fetch_all(&self.pool)
            .await?;

        timer.observe_duration();
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn update_sync_state(
        &self,
        source: &str,
        count: i64,
        status: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_sync_state"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO sync_state (source, last_sync_at, last_count, status)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET
                last_sync_at = excluded.last_sync_at,
                last_count = excluded.last_count,
                status = excluded.status
            "#,
        )
        .bind(source)
        .bind(Utc::now())
        .bind(count)
        .bind(status)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }
}

fn push_record_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RecordFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND match_status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(tenant) = &filter.tenant {
        qb.push(" AND invoice_tenant LIKE ");
        qb.push_bind(format!("%{tenant}%"));
    }
    if let Some(flag) = filter.flag {
        qb.push(" AND flag = ");
        qb.push_bind(flag.as_str());
    }
    if let Some(search) = &filter.search {
        qb.push(" AND correlation_code LIKE ");
        qb.push_bind(format!("%{search}%"));
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND first_seen_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND first_seen_at <= ");
        qb.push_bind(to);
    }
}

fn push_received_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ReceivedPaymentFilter) {
    if let Some(account_id) = &filter.account_id {
        qb.push(" AND account_id = ");
        qb.push_bind(account_id.clone());
    }
    if let Some(status) = filter.match_status {
        qb.push(" AND match_status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(payer) = &filter.payer {
        qb.push(" AND payer_name LIKE ");
        qb.push_bind(format!("%{payer}%"));
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND payment_date >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND payment_date <= ");
        qb.push_bind(to);
    }
}

/// Severity ranking for the queue, generated from the status enum so the
/// SQL and `MatchStatus::severity_rank` cannot drift apart.
fn severity_case_sql() -> String {
    let mut sql = String::from("CASE match_status");
    for status in MatchStatus::ALL {
        if status == MatchStatus::Resolved {
            continue;
        }
        sql.push_str(&format!(
            " WHEN '{}' THEN {}",
            status.as_str(),
            status.severity_rank()
        ));
    }
    sql.push_str(" ELSE 99 END");
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_case_covers_all_unresolved_statuses() {
        let sql = severity_case_sql();
        assert!(sql.contains("WHEN 'amount_mismatch' THEN 1"));
        assert!(sql.contains("WHEN 'full_4way' THEN 9"));
        assert!(!sql.contains("'resolved'"));
    }

    #[test]
    fn queue_sort_column_allow_list() {
        assert_eq!(
            QueueSortColumn::parse("invoice_amount"),
            Some(QueueSortColumn::InvoiceAmount)
        );
        // Anything outside the allow-list never reaches ORDER BY.
        assert_eq!(QueueSortColumn::parse("notes; DROP TABLE"), None);
        assert_eq!(QueueSortColumn::parse(""), None);
    }

    #[test]
    fn sort_dir_defaults_to_desc() {
        assert_eq!(SortDir::parse("asc"), SortDir::Asc);
        assert_eq!(SortDir::parse("ASC"), SortDir::Asc);
        assert_eq!(SortDir::parse("sideways"), SortDir::Desc);
    }
}
