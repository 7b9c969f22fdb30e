//! Application startup and lifecycle management.

use crate::config::FundingReconConfig;
use crate::services::{Database, FundingMatcher, ReconEngine, SyncOrchestrator};
use crate::sources::{FileDropInbox, FundingSource, PaymentsApiClient, TenantDbInvoiceSource};
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;

/// Application container wiring the store, the engine and the sync
/// orchestrator together.
pub struct Application {
    config: FundingReconConfig,
    db: Arc<Database>,
    engine: ReconEngine,
    orchestrator: Arc<SyncOrchestrator>,
}

impl Application {
    pub async fn build(config: FundingReconConfig) -> Result<Self, AppError> {
        let db = Arc::new(
            Database::new(
                &config.database.url,
                config.database.max_connections,
                config.database.min_connections,
            )
            .await?,
        );
        db.run_migrations().await?;

        let engine = ReconEngine::new(Arc::clone(&db));

        let inbox = Arc::new(FileDropInbox::new(
            config.inbox.drop_dir.clone(),
            config.inbox.source_tag.clone(),
        ));
        // Lazy pool: a down ledger surfaces as a per-cycle source error,
        // never a startup failure.
        let invoices = Arc::new(TenantDbInvoiceSource::connect_lazy(
            &config.tenant_db.url,
            config.tenant_db.tenants.clone(),
            config.sync.lookback_days,
            config.tenant_db.max_connections,
        )?);
        let payments_api = Arc::new(PaymentsApiClient::new(
            config.payments_api.clone(),
            RetryConfig::default(),
        )?);
        let funding: Arc<dyn FundingSource> = payments_api.clone();

        let matcher = FundingMatcher::new(
            engine.clone(),
            Arc::clone(&db),
            config.payer_aliases.clone(),
        );

        let orchestrator = Arc::new(SyncOrchestrator::new(
            engine.clone(),
            Arc::clone(&db),
            matcher,
            inbox,
            invoices,
            funding,
            payments_api,
        ));

        Ok(Self {
            config,
            db,
            engine,
            orchestrator,
        })
    }

    pub fn engine(&self) -> &ReconEngine {
        &self.engine
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Drive the periodic sync until the process is stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let interval = Duration::from_secs(self.config.sync.interval_secs);
        tracing::info!(
            interval_secs = self.config.sync.interval_secs,
            "starting periodic sync driver"
        );
        let handle = self.orchestrator.spawn_periodic(interval);
        handle
            .await
            .map_err(|e| std::io::Error::other(format!("sync driver terminated: {e}")))
    }
}
