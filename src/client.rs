use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorKind, UpstreamError};
use crate::metrics::{Metrics, LOOKUP_KEY, LOOKUP_SECRET};
use crate::models::{CacheStats, SecretEntry};
use crate::pacer::RequestPacer;
use crate::registry::Tenant;

/// Cache-first lookups for one tenant, with pacer fallthrough on miss. This
/// is the surface the HTTP layer talks to.
pub struct CachedTenantClient {
    tenant: Arc<Tenant>,
    pacer: Arc<RequestPacer>,
    metrics: Arc<Metrics>,
}

impl CachedTenantClient {
    pub fn new(tenant: Arc<Tenant>, pacer: Arc<RequestPacer>, metrics: Arc<Metrics>) -> Self {
        Self {
            tenant,
            pacer,
            metrics,
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<SecretEntry, UpstreamError> {
        if let Some(entry) = self.tenant.cache.lookup_by_id(id) {
            debug!(fingerprint = %self.tenant.fingerprint(), %id, "cache hit for secret");
            self.metrics.tick_cache_hit(LOOKUP_SECRET);
            return Ok(entry);
        }

        debug!(fingerprint = %self.tenant.fingerprint(), %id, "cache miss for secret");
        self.metrics.tick_cache_miss(LOOKUP_SECRET);
        match self.pacer.submit(self.tenant.clone(), id).await? {
            Some(entry) => {
                self.tenant.cache.install([entry.clone()]);
                Ok(entry)
            }
            None => Err(UpstreamError::new(
                ErrorKind::MissingSecret,
                "Secret not found",
            )),
        }
    }

    /// Key lookups resolve through the key map. The map is only rebuilt when
    /// empty; the background refresher is the source of truth for staleness,
    /// so an unknown key misses without touching the upstream.
    pub async fn get_by_key(&self, key: &str) -> Result<SecretEntry, UpstreamError> {
        if self.tenant.cache.key_map_is_empty() {
            debug!(fingerprint = %self.tenant.fingerprint(), "cache miss for key map");
            self.metrics.tick_cache_miss(LOOKUP_KEY);
            self.rebuild_key_map().await?;
        } else {
            self.metrics.tick_cache_hit(LOOKUP_KEY);
        }

        let id = self
            .tenant
            .cache
            .lookup_key(key)
            .ok_or_else(|| UpstreamError::new(ErrorKind::UnknownKey, "Unknown key"))?;
        self.get_by_id(id).await
    }

    /// Full enumeration to build the key map. Concurrent misses coalesce on
    /// the tenant's rebuild mutex; only the first does upstream work.
    async fn rebuild_key_map(&self) -> Result<(), UpstreamError> {
        let _guard = self.tenant.keymap_rebuild.lock().await;
        if !self.tenant.cache.key_map_is_empty() {
            return Ok(());
        }
        let entries = self.tenant.fetch_all().await?;
        self.tenant.cache.install(entries);
        Ok(())
    }

    pub fn reset(&self) -> CacheStats {
        debug!(fingerprint = %self.tenant.fingerprint(), "resetting tenant cache");
        self.tenant.cache.reset()
    }

    pub fn stats(&self) -> CacheStats {
        self.tenant.cache.stats()
    }
}
