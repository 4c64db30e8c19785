//! Shared application state: the stores, the catalog services built on
//! them and the notification sinks.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::info;

use shelf_catalog::{
    CatalogStore, EligibilityGate, GlobalPolicyCache, LockResolver, LockStore,
    MemoryCatalogStore, MemoryLockStore, MemoryOverrideStore, MergeEngine, OverrideStore,
    PairingPolicy, PgCatalogStore, PgLockStore, PgOverrideStore,
};
use shelf_core::config::NotifyConfig;
use shelf_core::Config;
use shelf_ingest::{Fetcher, WorkerDeps};
use shelf_notify::{
    LogSink, ModerationSink, NotificationSink, NotifyError, TemplateRenderer, WebhookNotifier,
};
use shelf_queue::{JobStore, MemoryJobStore, PgJobStore};

pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub locks: Arc<LockResolver>,
    pub gate: Arc<EligibilityGate>,
    pub merge: Arc<MergeEngine>,
    pub notifier: Arc<dyn NotificationSink>,
    pub moderation: Arc<dyn ModerationSink>,
    /// `"memory"` or `"postgres"`.
    pub backend: &'static str,
}

/// The four stores, whichever backend they come from.
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub locks: Arc<dyn LockStore>,
    pub overrides: Arc<dyn OverrideStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            jobs: Arc::new(MemoryJobStore::new()),
            catalog: Arc::new(MemoryCatalogStore::new()),
            locks: Arc::new(MemoryLockStore::new()),
            overrides: Arc::new(MemoryOverrideStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            catalog: Arc::new(PgCatalogStore::new(pool.clone())),
            locks: Arc::new(PgLockStore::new(pool.clone())),
            overrides: Arc::new(PgOverrideStore::new(pool)),
        }
    }
}

impl AppState {
    pub fn new(
        stores: Stores,
        config: &Config,
        notifier: Arc<dyn NotificationSink>,
        moderation: Arc<dyn ModerationSink>,
        backend: &'static str,
    ) -> Self {
        let cache = Arc::new(GlobalPolicyCache::new(stores.locks.clone()));
        let locks = Arc::new(LockResolver::new(stores.locks, cache));
        let gate = Arc::new(EligibilityGate::new(
            stores.overrides,
            Arc::new(PairingPolicy::from_config(&config.eligibility)),
        ));
        let merge = Arc::new(MergeEngine::new(stores.catalog.clone(), locks.clone()));
        Self {
            jobs: stores.jobs,
            catalog: stores.catalog,
            locks,
            gate,
            merge,
            notifier,
            moderation,
            backend,
        }
    }

    /// Build the state from config, on PostgreSQL when a pool is given.
    pub fn from_config(config: &Config, pool: Option<PgPool>) -> Result<Self, NotifyError> {
        let (notifier, moderation) = build_sinks(&config.notify)?;
        Ok(match pool {
            Some(pool) => Self::new(Stores::postgres(pool), config, notifier, moderation, "postgres"),
            None => Self::new(Stores::memory(), config, notifier, moderation, "memory"),
        })
    }

    pub fn worker_deps(&self, fetcher: Arc<dyn Fetcher>) -> WorkerDeps {
        WorkerDeps {
            jobs: self.jobs.clone(),
            fetcher,
            gate: self.gate.clone(),
            merge: self.merge.clone(),
            notifier: self.notifier.clone(),
            moderation: self.moderation.clone(),
        }
    }
}

/// Webhook sinks where a URL is configured, log-only sinks otherwise.
fn build_sinks(
    config: &NotifyConfig,
) -> Result<(Arc<dyn NotificationSink>, Arc<dyn ModerationSink>), NotifyError> {
    let renderer = Arc::new(TemplateRenderer::new());
    let log = Arc::new(LogSink::new(renderer.clone()));

    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let authorization = config.webhook_authorization.as_deref();

    let notifier: Arc<dyn NotificationSink> = match &config.requester_webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url, authorization, timeout, renderer.clone())?;
            info!(timeout_secs = timeout.as_secs(), "requester notifications via webhook");
            Arc::new(webhook)
        }
        None => log.clone(),
    };
    let moderation: Arc<dyn ModerationSink> = match &config.moderation_webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url, authorization, timeout, renderer)?;
            info!(timeout_secs = timeout.as_secs(), "moderation alerts via webhook");
            Arc::new(webhook)
        }
        None => log,
    };
    Ok((notifier, moderation))
}
