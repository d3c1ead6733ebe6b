use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::error;
use uuid::Uuid;

use crate::error::UpstreamError;
use crate::models::SecretEntry;
use crate::registry::Tenant;

type Reply = Result<Option<SecretEntry>, UpstreamError>;

struct Ticket {
    tenant: Arc<Tenant>,
    id: Uuid,
    reply: oneshot::Sender<Reply>,
}

/// Serializes every on-demand upstream fetch through a single worker with a
/// fixed gap between dispatches. The upstream login hangs under rapid
/// concurrent calls on an expired token; one request in flight at a time is
/// the mitigation.
pub struct RequestPacer {
    /// Covers one full submit/reply rendezvous, which makes submissions
    /// strict FIFO across tenants.
    submit_lock: Mutex<()>,
    requests: mpsc::Sender<Ticket>,
    crashed: Arc<AtomicBool>,
}

impl RequestPacer {
    /// Spawns the worker and returns the handle shared by all submitters.
    pub fn start(interval: Duration) -> Arc<Self> {
        let (requests, ticket_rx) = mpsc::channel(1);
        let crashed = Arc::new(AtomicBool::new(false));
        tokio::spawn(worker(ticket_rx, interval, crashed.clone()));

        Arc::new(Self {
            submit_lock: Mutex::new(()),
            requests,
            crashed,
        })
    }

    /// Dispatches one upstream fetch and waits for its reply. Errors raised
    /// by the upstream call come back as the reply payload and are re-raised
    /// here, never swallowed.
    pub async fn submit(&self, tenant: Arc<Tenant>, id: Uuid) -> Reply {
        let _guard = self.submit_lock.lock().await;

        if self.crashed.load(Ordering::SeqCst) {
            die("request pacer worker is gone; refusing to serve further misses");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let ticket = Ticket {
            tenant,
            id,
            reply: reply_tx,
        };
        if self.requests.send(ticket).await.is_err() {
            self.crashed.store(true, Ordering::SeqCst);
            die("request pacer worker dropped its channel");
        }

        match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => {
                self.crashed.store(true, Ordering::SeqCst);
                die("request pacer worker died mid-rendezvous");
            }
        }
    }
}

/// After a broken rendezvous replies can be dropped silently; the loop
/// invariant no longer holds, so the process stops.
fn die(reason: &str) -> ! {
    error!("{reason}");
    std::process::exit(1);
}

async fn worker(
    mut requests: mpsc::Receiver<Ticket>,
    interval: Duration,
    crashed: Arc<AtomicBool>,
) {
    while let Some(ticket) = requests.recv().await {
        let result = ticket.tenant.fetch_by_id(ticket.id).await;
        if ticket.reply.send(result).is_err() {
            // The submitter vanished before taking its reply; the loop
            // invariant no longer holds.
            crashed.store(true, Ordering::SeqCst);
            error!("pacer submitter went away before taking its reply; stopping worker");
            return;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::models::Region;
    use crate::registry::Registry;
    use crate::upstream::{SyncOutcome, UpstreamAdapter};

    struct CountingUpstream {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamAdapter for CountingUpstream {
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

        async fn get_by_id(&self, id: Uuid) -> Result<Option<SecretEntry>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(SecretEntry {
                id,
                key: format!("key-{id}"),
                value: "value".to_string(),
            }))
        }
    }

    fn registry_with(upstream: Arc<CountingUpstream>) -> Registry {
        Registry::with_factory(
            std::env::temp_dir(),
            Arc::new(move |_region: &Region| upstream.clone() as Arc<dyn UpstreamAdapter>),
        )
    }

    #[tokio::test]
    async fn replies_carry_the_fetched_entry() {
        let upstream = Arc::new(CountingUpstream {
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with(upstream.clone());
        let tenant = registry.get_or_create("tok", &Region::bitwarden_com());

        let pacer = RequestPacer::start(Duration::from_millis(1));
        let id = Uuid::from_u128(7);
        let entry = pacer.submit(tenant, id).await.unwrap().unwrap();

        assert_eq!(entry.id, id);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_submissions_are_serialized_and_spaced() {
        let upstream = Arc::new(CountingUpstream {
            calls: AtomicUsize::new(0),
        });
        let registry = registry_with(upstream.clone());
        let tenant = registry.get_or_create("tok", &Region::bitwarden_com());

        let interval = Duration::from_millis(100);
        let pacer = RequestPacer::start(interval);

        let start = Instant::now();
        let first = tokio::spawn({
            let pacer = pacer.clone();
            let tenant = tenant.clone();
            async move { pacer.submit(tenant, Uuid::from_u128(1)).await }
        });
        let second = tokio::spawn({
            let pacer = pacer.clone();
            let tenant = tenant.clone();
            async move { pacer.submit(tenant, Uuid::from_u128(2)).await }
        });

        assert!(first.await.unwrap().unwrap().is_some());
        assert!(second.await.unwrap().unwrap().is_some());

        // Exactly two upstream calls, separated by at least one interval.
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= interval);
    }
}
