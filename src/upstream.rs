use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, UpstreamError};
use crate::models::{Region, SecretEntry};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("bws-cache/", env!("CARGO_PKG_VERSION"));

/// Outcome of an incremental sync. The upstream reports explicitly whether
/// anything changed since the watermark, so an empty change set is
/// distinguishable from "nothing to report".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Changed(Vec<SecretEntry>),
    Unchanged,
}

/// Narrow capability surface the caching core needs from the secrets API.
/// Implementations classify every failure before returning it; no wire
/// details leak past this trait.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Performs the access-token handshake. May block; callers arrange for
    /// at most one concurrent attempt per tenant. `state_path` points into a
    /// volatile directory where the adapter may persist an auth blob.
    async fn authenticate(&self, token: &str, state_path: &Path) -> Result<(), UpstreamError>;

    /// Full enumeration of the organization's secrets.
    async fn list_all(&self) -> Result<Vec<SecretEntry>, UpstreamError>;

    /// Changes since `watermark`.
    async fn sync_since(&self, watermark: DateTime<Utc>) -> Result<SyncOutcome, UpstreamError>;

    /// Single secret fetch; `None` when the upstream has no such secret.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<SecretEntry>, UpstreamError>;
}

// ============================================================================
// REST adapter
// ============================================================================

/// Authenticated upstream session. Persisted as the auth blob so a restart
/// within the token lifetime skips the identity handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    bearer: String,
    organization_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// Talks to a Bitwarden Secrets Manager deployment over REST.
pub struct BwsRestAdapter {
    http: Client,
    region: Region,
    session: RwLock<Option<Session>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct SecretIdentifierList {
    secrets: Vec<SecretIdentifier>,
}

#[derive(Debug, Deserialize)]
struct SecretIdentifier {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SecretList {
    secrets: Vec<SecretPayload>,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    id: Uuid,
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    has_changes: bool,
    #[serde(default)]
    secrets: Vec<SecretPayload>,
}

impl From<SecretPayload> for SecretEntry {
    fn from(payload: SecretPayload) -> Self {
        Self {
            id: payload.id,
            key: payload.key,
            value: payload.value,
        }
    }
}

impl BwsRestAdapter {
    pub fn new(region: Region) -> Self {
        let http = Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            region,
            session: RwLock::new(None),
        }
    }

    async fn session(&self) -> Result<Session, UpstreamError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| UpstreamError::classify("upstream adapter used before authentication"))
    }
}

#[async_trait]
impl UpstreamAdapter for BwsRestAdapter {
    async fn authenticate(&self, token: &str, state_path: &Path) -> Result<(), UpstreamError> {
        if let Some(session) = load_cached_session(state_path).await {
            debug!("reusing persisted upstream session");
            *self.session.write().await = Some(session);
            return Ok(());
        }

        let (client_id, client_secret) = parse_access_token(token)?;

        let response = self
            .http
            .post(format!("{}/connect/token", self.region.identity_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", "api.secrets"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(UpstreamError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let token_response: TokenResponse = response.json().await.map_err(UpstreamError::from)?;
        let organization_id = decode_organization_claim(&token_response.access_token)?;
        let session = Session {
            bearer: token_response.access_token,
            organization_id,
            expires_at: Utc::now() + chrono::Duration::seconds(token_response.expires_in),
        };

        persist_session(state_path, &session).await;
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<SecretEntry>, UpstreamError> {
        let session = self.session().await?;

        let response = self
            .http
            .get(format!(
                "{}/organizations/{}/secrets",
                self.region.api_url, session.organization_id
            ))
            .bearer_auth(&session.bearer)
            .send()
            .await
            .map_err(UpstreamError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let identifiers: SecretIdentifierList =
            response.json().await.map_err(UpstreamError::from)?;
        if identifiers.secrets.is_empty() {
            return Ok(Vec::new());
        }

        // The enumeration endpoint returns ids and keys only; values come
        // from a second batched call.
        let ids: Vec<Uuid> = identifiers.secrets.into_iter().map(|s| s.id).collect();
        let response = self
            .http
            .post(format!("{}/secrets/get-by-ids", self.region.api_url))
            .bearer_auth(&session.bearer)
            .json(&serde_json::json!({ "ids": ids }))
            .send()
            .await
            .map_err(UpstreamError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let secrets: SecretList = response.json().await.map_err(UpstreamError::from)?;
        Ok(secrets.secrets.into_iter().map(SecretEntry::from).collect())
    }

    async fn sync_since(&self, watermark: DateTime<Utc>) -> Result<SyncOutcome, UpstreamError> {
        let session = self.session().await?;

        let response = self
            .http
            .get(format!(
                "{}/organizations/{}/secrets/sync",
                self.region.api_url, session.organization_id
            ))
            .query(&[("lastSyncedDate", watermark.to_rfc3339())])
            .bearer_auth(&session.bearer)
            .send()
            .await
            .map_err(UpstreamError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let sync: SyncResponse = response.json().await.map_err(UpstreamError::from)?;
        if sync.has_changes {
            Ok(SyncOutcome::Changed(
                sync.secrets.into_iter().map(SecretEntry::from).collect(),
            ))
        } else {
            Ok(SyncOutcome::Unchanged)
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<SecretEntry>, UpstreamError> {
        let session = self.session().await?;

        let response = self
            .http
            .get(format!("{}/secrets/{}", self.region.api_url, id))
            .bearer_auth(&session.bearer)
            .send()
            .await
            .map_err(UpstreamError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = status_error(status, &body);
            if err.kind() == ErrorKind::MissingSecret {
                return Ok(None);
            }
            return Err(err);
        }

        let payload: SecretPayload = response.json().await.map_err(UpstreamError::from)?;
        Ok(Some(payload.into()))
    }
}

/// Access tokens look like `0.<client_id>.<client_secret>:<encryption_key>`.
/// The encryption key is only needed for payload decryption, which the
/// upstream performs server-side for machine accounts.
fn parse_access_token(token: &str) -> Result<(&str, &str), UpstreamError> {
    let core = token.split(':').next().unwrap_or(token);
    let mut parts = core.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("0"), Some(client_id), Some(client_secret), None)
            if !client_id.is_empty() && !client_secret.is_empty() =>
        {
            Ok((client_id, client_secret))
        }
        _ => Err(UpstreamError::classify(
            "Access token is not in a valid format",
        )),
    }
}

/// Folds an HTTP failure into the message shape the classifier table keys on.
fn status_error(status: StatusCode, body: &str) -> UpstreamError {
    let reason = status.canonical_reason().unwrap_or("");
    UpstreamError::classify(format!("{} {}: {}", status.as_u16(), reason, body))
}

/// The org context is carried as a claim inside the bearer token payload.
fn decode_organization_claim(bearer: &str) -> Result<Uuid, UpstreamError> {
    let payload = bearer
        .split('.')
        .nth(1)
        .and_then(|segment| {
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(segment)
                .ok()
        })
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok());

    payload
        .as_ref()
        .and_then(|claims| claims.get("organization"))
        .and_then(|claim| claim.as_str())
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| UpstreamError::classify("token response carries no organization claim"))
}

async fn load_cached_session(path: &Path) -> Option<Session> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    let session: Session = serde_json::from_str(&raw).ok()?;
    // Leave a margin so a session about to expire is not reused.
    (session.expires_at > Utc::now() + chrono::Duration::seconds(60)).then_some(session)
}

/// Best effort: the blob only saves a handshake after a restart.
async fn persist_session(path: &Path, session: &Session) {
    let Ok(raw) = serde_json::to_string(session) else {
        return;
    };
    if let Err(err) = tokio::fs::write(path, raw).await {
        warn!(error = %err, path = %path.display(), "failed to persist auth state");
    }
}
