//! Shared scaffolding for integration tests: a scriptable upstream double
//! and a registry wired to hand it out.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use bws_cache::error::UpstreamError;
use bws_cache::models::{Region, SecretEntry};
use bws_cache::registry::Registry;
use bws_cache::upstream::{SyncOutcome, UpstreamAdapter};

pub fn entry(id: u128, key: &str, value: &str) -> SecretEntry {
    SecretEntry {
        id: Uuid::from_u128(id),
        key: key.to_string(),
        value: value.to_string(),
    }
}

pub fn test_region() -> Region {
    Region {
        api_url: "https://a".to_string(),
        identity_url: "https://i".to_string(),
    }
}

/// Upstream double. `get_by_id`/`list_all` serve from a fixture map; sync and
/// auth responses are scripted per call. Call counts are recorded for
/// assertions.
#[derive(Default)]
pub struct MockUpstream {
    secrets: Mutex<HashMap<Uuid, SecretEntry>>,
    sync_script: Mutex<VecDeque<Result<SyncOutcome, UpstreamError>>>,
    auth_script: Mutex<VecDeque<Result<(), UpstreamError>>>,
    pub auth_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_secrets(entries: impl IntoIterator<Item = SecretEntry>) -> Arc<Self> {
        let mock = Self::default();
        {
            let mut secrets = mock.secrets.lock().unwrap();
            for entry in entries {
                secrets.insert(entry.id, entry);
            }
        }
        Arc::new(mock)
    }

    /// Queue the next `sync_since` response.
    pub fn push_sync(&self, outcome: Result<SyncOutcome, UpstreamError>) {
        self.sync_script.lock().unwrap().push_back(outcome);
    }

    /// Queue the next `authenticate` response; unscripted calls succeed.
    pub fn push_auth(&self, outcome: Result<(), UpstreamError>) {
        self.auth_script.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl UpstreamAdapter for MockUpstream {
    async fn authenticate(&self, _token: &str, _state_path: &Path) -> Result<(), UpstreamError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        self.auth_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn list_all(&self) -> Result<Vec<SecretEntry>, UpstreamError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.secrets.lock().unwrap().values().cloned().collect())
    }

    async fn sync_since(&self, _watermark: DateTime<Utc>) -> Result<SyncOutcome, UpstreamError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        self.sync_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SyncOutcome::Unchanged))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<SecretEntry>, UpstreamError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.secrets.lock().unwrap().get(&id).cloned())
    }
}

/// Registry whose tenants all talk to the given mock.
pub fn registry_with(upstream: Arc<MockUpstream>) -> Arc<Registry> {
    Arc::new(Registry::with_factory(
        std::env::temp_dir(),
        Arc::new(move |_region: &Region| upstream.clone() as Arc<dyn UpstreamAdapter>),
    ))
}
