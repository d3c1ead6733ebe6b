use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// An upstream deployment: which API and identity endpoints a tenant talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub api_url: String,
    pub identity_url: String,
}

impl Region {
    pub fn bitwarden_com() -> Self {
        Self {
            api_url: "https://api.bitwarden.com".to_string(),
            identity_url: "https://identity.bitwarden.com".to_string(),
        }
    }

    pub fn bitwarden_eu() -> Self {
        Self {
            api_url: "https://api.bitwarden.eu".to_string(),
            identity_url: "https://identity.bitwarden.eu".to_string(),
        }
    }
}

/// One decrypted secret as served by the upstream. `value` is the raw string
/// payload; structured decoding happens per-read in `decode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub id: Uuid,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CacheStats {
    pub secret_cache_size: usize,
    pub keymap_cache_size: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SecretResponse {
    pub id: String,
    pub key: String,
    /// String unless value decoding is enabled and the payload parsed.
    #[schema(value_type = Object)]
    pub value: Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResetResponse {
    pub status: String,
    pub before: CacheStats,
    pub after: CacheStats,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub num_clients: usize,
    /// Per-tenant sizes keyed by fingerprint, the only tenant identifier
    /// that may leave the process.
    pub client_stats: BTreeMap<String, CacheStats>,
    pub total_stats: CacheStats,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthcheckResponse {
    pub status: String,
}

impl HealthcheckResponse {
    pub fn alive() -> Self {
        Self {
            status: "I'm alive".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub detail: String,
}
