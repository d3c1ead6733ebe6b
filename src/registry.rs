use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use crate::cache::TenantCache;
use crate::error::UpstreamError;
use crate::models::{Region, SecretEntry};
use crate::upstream::{BwsRestAdapter, SyncOutcome, UpstreamAdapter};

/// Builds the upstream adapter for a freshly created tenant. Injectable so
/// tests can swap the REST adapter for a scripted double.
pub type UpstreamFactory = Arc<dyn Fn(&Region) -> Arc<dyn UpstreamAdapter> + Send + Sync>;

/// Stable tenant identifier. The same token against two upstream deployments
/// yields two distinct tenants, and unlike the token itself the hash is safe
/// to surface in logs and metrics labels.
pub fn fingerprint(token: &str, region: &Region) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(region.api_url.as_bytes());
    hasher.update(region.identity_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Coarse per-tenant health marker. A quarantined tenant is backing off
/// after an upstream rate limit; fatal failures remove the tenant outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantState {
    Healthy,
    Quarantined,
}

/// A logical client: one access token against one upstream deployment, with
/// its own isolated cache and upstream session.
pub struct Tenant {
    fingerprint: String,
    token: String,
    region: Region,
    upstream: Arc<dyn UpstreamAdapter>,
    pub cache: TenantCache,
    auth_state_path: PathBuf,
    auth: OnceCell<()>,
    state: std::sync::Mutex<TenantState>,
    /// Serializes whole-key-map rebuilds so concurrent key misses produce a
    /// single upstream enumeration.
    pub(crate) keymap_rebuild: Mutex<()>,
}

impl Tenant {
    fn new(
        fingerprint: String,
        token: String,
        region: Region,
        upstream: Arc<dyn UpstreamAdapter>,
        auth_state_path: PathBuf,
    ) -> Self {
        Self {
            fingerprint,
            token,
            region,
            upstream,
            cache: TenantCache::new(),
            auth_state_path,
            auth: OnceCell::new(),
            state: std::sync::Mutex::new(TenantState::Healthy),
            keymap_rebuild: Mutex::new(()),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn state(&self) -> TenantState {
        *self.state.lock().expect("tenant state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: TenantState) {
        *self.state.lock().expect("tenant state lock poisoned") = state;
    }

    /// Authenticates at most once for the lifetime of this tenant. The
    /// upstream login hangs under rapid concurrent calls with an expired
    /// token, so every caller awaits the same attempt.
    pub async fn ensure_authenticated(&self) -> Result<(), UpstreamError> {
        self.auth
            .get_or_try_init(|| async {
                self.upstream
                    .authenticate(&self.token, &self.auth_state_path)
                    .await
            })
            .await
            .map(|_| ())
    }

    pub async fn fetch_by_id(&self, id: Uuid) -> Result<Option<SecretEntry>, UpstreamError> {
        self.ensure_authenticated().await?;
        self.upstream.get_by_id(id).await
    }

    pub async fn fetch_all(&self) -> Result<Vec<SecretEntry>, UpstreamError> {
        self.ensure_authenticated().await?;
        self.upstream.list_all().await
    }

    /// Incremental changes since this tenant's watermark.
    pub async fn sync_changes(&self) -> Result<SyncOutcome, UpstreamError> {
        self.ensure_authenticated().await?;
        self.upstream.sync_since(self.cache.last_sync()).await
    }
}

/// All live tenants, keyed by fingerprint. The map's own locking is never
/// held across an upstream call or a cache-lock acquisition.
pub struct Registry {
    tenants: DashMap<String, Arc<Tenant>>,
    factory: UpstreamFactory,
    auth_state_dir: PathBuf,
}

impl Registry {
    pub fn new(auth_state_dir: PathBuf) -> Self {
        Self::with_factory(
            auth_state_dir,
            Arc::new(|region: &Region| {
                Arc::new(BwsRestAdapter::new(region.clone())) as Arc<dyn UpstreamAdapter>
            }),
        )
    }

    pub fn with_factory(auth_state_dir: PathBuf, factory: UpstreamFactory) -> Self {
        Self {
            tenants: DashMap::new(),
            factory,
            auth_state_dir,
        }
    }

    /// At most one tenant ever exists per fingerprint; concurrent calls with
    /// the same credentials converge on the same instance. Construction does
    /// not touch the network.
    pub fn get_or_create(&self, token: &str, region: &Region) -> Arc<Tenant> {
        let fingerprint = fingerprint(token, region);
        self.tenants
            .entry(fingerprint.clone())
            .or_insert_with(|| {
                tracing::debug!(fingerprint = %fingerprint, "creating tenant");
                let upstream = (self.factory)(region);
                let auth_state_path = self.auth_state_dir.join(format!("token_{fingerprint}"));
                Arc::new(Tenant::new(
                    fingerprint,
                    token.to_string(),
                    region.clone(),
                    upstream,
                    auth_state_path,
                ))
            })
            .value()
            .clone()
    }

    /// Idempotent removal by fingerprint.
    pub fn remove(&self, tenant: &Tenant) {
        if self.tenants.remove(tenant.fingerprint()).is_some() {
            tracing::info!(fingerprint = %tenant.fingerprint(), "tenant removed");
        }
    }

    /// Copy of the live tenant list, sufficient for iteration without
    /// holding the registry lock.
    pub fn snapshot(&self) -> Vec<Arc<Tenant>> {
        self.tenants.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct NullUpstream;

    #[async_trait]
    impl UpstreamAdapter for NullUpstream {
        async fn authenticate(&self, _token: &str, _path: &Path) -> Result<(), UpstreamError> {
            Ok(())
        }

        async fn list_all(&self) -> Result<Vec<SecretEntry>, UpstreamError> {
            Ok(Vec::new())
        }

        async fn sync_since(
            &self,
            _watermark: DateTime<Utc>,
        ) -> Result<SyncOutcome, UpstreamError> {
            Ok(SyncOutcome::Unchanged)
        }

        async fn get_by_id(&self, _id: Uuid) -> Result<Option<SecretEntry>, UpstreamError> {
            Ok(None)
        }
    }

    fn test_registry() -> Registry {
        Registry::with_factory(
            std::env::temp_dir(),
            Arc::new(|_region: &Region| Arc::new(NullUpstream) as Arc<dyn UpstreamAdapter>),
        )
    }

    fn region(api: &str) -> Region {
        Region {
            api_url: api.to_string(),
            identity_url: "https://identity".to_string(),
        }
    }

    #[test]
    fn fingerprints_isolate_token_and_region() {
        let base = fingerprint("tok", &region("https://a"));
        assert_eq!(base, fingerprint("tok", &region("https://a")));
        assert_ne!(base, fingerprint("tok", &region("https://b")));
        assert_ne!(base, fingerprint("other", &region("https://a")));
        // Safe for labels: lowercase hex, fixed width.
        assert_eq!(base.len(), 64);
        assert!(base.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn get_or_create_returns_the_same_instance() {
        let registry = test_registry();
        let a = registry.get_or_create("tok", &region("https://a"));
        let b = registry.get_or_create("tok", &region("https://a"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_regions_get_distinct_tenants() {
        let registry = test_registry();
        let a = registry.get_or_create("tok", &region("https://a"));
        let b = registry.get_or_create("tok", &region("https://b"));

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = test_registry();
        let tenant = registry.get_or_create("tok", &region("https://a"));

        registry.remove(&tenant);
        registry.remove(&tenant);
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_copies_the_tenant_list() {
        let registry = test_registry();
        registry.get_or_create("tok1", &region("https://a"));
        registry.get_or_create("tok2", &region("https://a"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);

        // Mutating the registry afterwards does not affect the copy.
        registry.remove(&snapshot[0]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }
}
