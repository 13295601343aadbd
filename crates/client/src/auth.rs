//! Token acquisition against the identity authority.
//!
//! Two grant flows produce the same [`Credential`]: an on-behalf-of exchange
//! of the caller's own bearer assertion, and a client-credentials grant for
//! the service's application identity. Both go through the tenant's
//! `oauth2/v2.0/token` endpoint as a form POST.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geniebridge_core::config::IdentityConfig;
use geniebridge_core::GenieError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_AUTHORITY_BASE: &str = "https://login.microsoftonline.com";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Cached tokens are considered expired this long before the issuer says so.
const EXPIRY_SKEW_SECS: u64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantKind {
    Delegated,
    Service,
}

/// A downstream bearer token plus the flow that produced it. Never persisted;
/// lives only as long as the operation it was acquired for.
#[derive(Clone, Debug)]
pub struct Credential {
    token: SecretString,
    grant: GrantKind,
}

impl Credential {
    pub fn new(token: SecretString, grant: GrantKind) -> Self {
        Self { token, grant }
    }

    pub fn grant(&self) -> GrantKind {
        self.grant
    }

    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn downstream_token(&self) -> Result<Credential, GenieError>;
}

#[derive(Clone, Debug)]
struct AuthorityEndpoint {
    client: reqwest::Client,
    identity: IdentityConfig,
    token_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthorityErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

fn authority_error_detail(status: u16, body: &str) -> String {
    match serde_json::from_str::<AuthorityErrorBody>(body) {
        Ok(parsed) => parsed
            .error_description
            .or(parsed.error)
            .unwrap_or_else(|| format!("token endpoint returned status {status}")),
        Err(_) => format!("token endpoint returned status {status}"),
    }
}

impl AuthorityEndpoint {
    fn new(client: reqwest::Client, identity: IdentityConfig, authority_base: &str) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            authority_base.trim_end_matches('/'),
            identity.tenant_id
        );
        Self { client, identity, token_url }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenGrant, GenieError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|error| GenieError::Connection(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| GenieError::Connection(error.to_string()))?;

        if !status.is_success() {
            let detail = authority_error_detail(status.as_u16(), &body);
            warn!(event_name = "auth.exchange_rejected", status = status.as_u16(), "identity authority rejected token request");
            return Err(GenieError::AuthExchange { detail });
        }

        let grant: TokenGrant = serde_json::from_str(&body)
            .map_err(|error| GenieError::Decode(error.to_string()))?;
        if grant.access_token.is_empty() {
            return Err(GenieError::AuthExchange {
                detail: "token endpoint returned an empty access token".to_string(),
            });
        }

        Ok(grant)
    }
}

/// On-behalf-of exchange: trades the caller's bearer assertion for a
/// downstream token carrying the caller's identity. One provider per request.
#[derive(Debug)]
pub struct DelegatedTokenProvider {
    endpoint: AuthorityEndpoint,
    assertion: SecretString,
}

impl DelegatedTokenProvider {
    pub fn new(
        client: reqwest::Client,
        identity: IdentityConfig,
        assertion: &str,
    ) -> Result<Self, GenieError> {
        Self::with_authority_base(client, identity, DEFAULT_AUTHORITY_BASE, assertion)
    }

    pub fn with_authority_base(
        client: reqwest::Client,
        identity: IdentityConfig,
        authority_base: &str,
        assertion: &str,
    ) -> Result<Self, GenieError> {
        let assertion = assertion.trim();
        if assertion.is_empty() {
            return Err(GenieError::AuthExchange {
                detail: "caller assertion is empty".to_string(),
            });
        }

        Ok(Self {
            endpoint: AuthorityEndpoint::new(client, identity, authority_base),
            assertion: assertion.to_string().into(),
        })
    }
}

#[async_trait]
impl TokenProvider for DelegatedTokenProvider {
    async fn downstream_token(&self) -> Result<Credential, GenieError> {
        let scope = format!("{}/user_impersonation", self.endpoint.identity.resource_id);
        let grant = self
            .endpoint
            .request_token(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("client_id", &self.endpoint.identity.client_id),
                ("client_secret", self.endpoint.identity.client_secret.expose_secret()),
                ("assertion", self.assertion.expose_secret()),
                ("scope", &scope),
                ("requested_token_use", "on_behalf_of"),
            ])
            .await?;

        debug!(event_name = "auth.delegated_token_acquired", "acquired delegated downstream token");
        Ok(Credential::new(grant.access_token.into(), GrantKind::Delegated))
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

/// Client-credentials grant for the application's own identity, fronted by an
/// in-process cache keyed by `(resource_id, scope)`. Holding the cache lock
/// across the remote call means concurrent misses collapse into one request.
pub struct ServiceTokenProvider {
    endpoint: AuthorityEndpoint,
    cache: Mutex<HashMap<(String, String), CachedToken>>,
}

impl ServiceTokenProvider {
    pub fn new(client: reqwest::Client, identity: IdentityConfig) -> Self {
        Self::with_authority_base(client, identity, DEFAULT_AUTHORITY_BASE)
    }

    pub fn with_authority_base(
        client: reqwest::Client,
        identity: IdentityConfig,
        authority_base: &str,
    ) -> Self {
        Self {
            endpoint: AuthorityEndpoint::new(client, identity, authority_base),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TokenProvider for ServiceTokenProvider {
    async fn downstream_token(&self) -> Result<Credential, GenieError> {
        let scope = format!("{}/.default", self.endpoint.identity.resource_id);
        let key = (self.endpoint.identity.resource_id.clone(), scope.clone());

        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get(&key) {
            if entry.expires_at > Instant::now() {
                return Ok(Credential::new(entry.token.clone(), GrantKind::Service));
            }
        }

        let grant = self
            .endpoint
            .request_token(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.endpoint.identity.client_id),
                ("client_secret", self.endpoint.identity.client_secret.expose_secret()),
                ("scope", &scope),
            ])
            .await?;

        let lifetime_secs = grant.expires_in.unwrap_or(0).saturating_sub(EXPIRY_SKEW_SECS);
        let token: SecretString = grant.access_token.into();
        cache.insert(
            key,
            CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + Duration::from_secs(lifetime_secs),
            },
        );
        debug!(event_name = "auth.service_token_acquired", "acquired service downstream token");

        Ok(Credential::new(token, GrantKind::Service))
    }
}
