use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::error::ErrorKind;
use crate::registry::{Registry, Tenant, TenantState};
use crate::upstream::SyncOutcome;

/// Pacing knobs for the background sync worker.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Gap between per-tenant sync steps, so N tenants produce at most one
    /// upstream request per step.
    pub refresh_interval: Duration,
    /// Re-snapshot delay while no tenants exist yet.
    pub empty_snapshot_interval: Duration,
    /// Back-off after the upstream reports 429.
    pub rate_limit_backoff: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            empty_snapshot_interval: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(30),
        }
    }
}

/// Background worker that keeps every tenant's cache in step with its
/// upstream and evicts tenants whose credentials will never work again.
pub struct RefreshWorker {
    registry: Arc<Registry>,
    config: RefreshConfig,
}

impl RefreshWorker {
    pub fn new(registry: Arc<Registry>, config: RefreshConfig) -> Self {
        Self { registry, config }
    }

    /// Runs for process lifetime; spawn it as a background task.
    pub async fn run(self) {
        loop {
            let tenants = self.registry.snapshot();
            if tenants.is_empty() {
                tokio::time::sleep(self.config.empty_snapshot_interval).await;
                continue;
            }
            for tenant in tenants {
                self.refresh_tenant(&tenant).await;
                tokio::time::sleep(self.config.refresh_interval).await;
            }
        }
    }

    /// One sync step for one tenant. Fatal classifications evict the tenant;
    /// transient ones leave it for the next cycle.
    pub async fn refresh_tenant(&self, tenant: &Arc<Tenant>) {
        let proposed_watermark = Utc::now();
        match tenant.sync_changes().await {
            Ok(SyncOutcome::Changed(entries)) if entries.is_empty() => {
                tenant.set_state(TenantState::Healthy);
                tenant.cache.advance_watermark(proposed_watermark);
            }
            Ok(SyncOutcome::Changed(entries)) => {
                tenant.set_state(TenantState::Healthy);
                // Any change set invalidates the whole cache: the upstream
                // reports deltas without deletes, and a rename under a stale
                // key map must not leave both keys resolvable.
                let evicted = tenant.cache.reset();
                let installed = entries.len();
                tenant.cache.install(entries);
                tenant.cache.advance_watermark(proposed_watermark);
                debug!(
                    fingerprint = %tenant.fingerprint(),
                    evicted = evicted.secret_cache_size,
                    installed,
                    "applied upstream changes"
                );
            }
            Ok(SyncOutcome::Unchanged) => {
                tenant.set_state(TenantState::Healthy);
                tenant.cache.advance_watermark(proposed_watermark);
            }
            Err(err) => match err.kind() {
                ErrorKind::RateLimited => {
                    warn!(
                        fingerprint = %tenant.fingerprint(),
                        "upstream rate limited the refresh; backing off"
                    );
                    tenant.set_state(TenantState::Quarantined);
                    tokio::time::sleep(self.config.rate_limit_backoff).await;
                }
                ErrorKind::InvalidToken | ErrorKind::UnknownOrg => {
                    warn!(
                        fingerprint = %tenant.fingerprint(),
                        error = %err,
                        "credential will never work; evicting tenant"
                    );
                    self.registry.remove(tenant);
                }
                ErrorKind::Transport => {
                    warn!(
                        fingerprint = %tenant.fingerprint(),
                        error = %err,
                        "upstream unreachable; will retry next cycle"
                    );
                }
                _ => {
                    // Retaining tenants with unclassified upstream failures
                    // floods the log under credential-rotation storms.
                    error!(
                        fingerprint = %tenant.fingerprint(),
                        error = %err,
                        "unclassified refresh failure; evicting tenant"
                    );
                    self.registry.remove(tenant);
                }
            },
        }
    }
}
