//! OIDC token validation.
//!
//! Discovery runs once at startup against
//! `<issuer>/.well-known/openid-configuration`; the JWKS is cached and
//! refreshed on expiry or on an unknown `kid` (key rotation). A token is
//! accepted when its signature, `exp`, `iss` and `aud` all check out;
//! the subject is the `sub` claim.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::OidcConfig;
use crate::errors::{PoiesisError, Result};

use super::Subject;

const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Deserialize)]
struct JwkKey {
    kid: Option<String>,
    kty: String,
    n: Option<String>,
    e: Option<String>,
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct OidcValidator {
    issuer: String,
    client_id: String,
    jwks_uri: String,
    client: reqwest::Client,
    cache: Arc<RwLock<Option<JwksCache>>>,
}

impl std::fmt::Debug for OidcValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcValidator")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

impl OidcValidator {
    /// Run discovery and prime the key cache.
    pub async fn discover(cfg: &OidcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PoiesisError::Auth(format!("failed to build HTTP client: {e}")))?;

        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            cfg.issuer.trim_end_matches('/')
        );
        let discovery: DiscoveryDocument = client
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| PoiesisError::Auth(format!("OIDC discovery failed: {e}")))?
            .json()
            .await
            .map_err(|e| PoiesisError::Auth(format!("invalid OIDC discovery document: {e}")))?;

        let validator = Self {
            issuer: cfg.issuer.clone(),
            client_id: cfg.client_id.clone(),
            jwks_uri: discovery.jwks_uri,
            client,
            cache: Arc::new(RwLock::new(None)),
        };
        validator.refresh_keys().await?;
        Ok(validator)
    }

    /// Validate a bearer token and extract the subject.
    pub async fn validate(&self, token: &str) -> Result<Subject> {
        let header =
            decode_header(token).map_err(|e| PoiesisError::Auth(format!("malformed token: {e}")))?;
        if !matches!(
            header.alg,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
        ) {
            return Err(PoiesisError::Auth(format!(
                "unsupported token algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| PoiesisError::Auth("token has no key id".into()))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.client_id]);

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| PoiesisError::Auth(format!("token rejected: {e}")))?;
        debug!(subject = %data.claims.sub, "token validated");
        Ok(Subject {
            user_id: data.claims.sub,
        })
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < JWKS_REFRESH_INTERVAL {
                    if let Some(key) = entry.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        // Stale cache or rotated key: refetch once, then decide.
        self.refresh_keys().await?;
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .and_then(|entry| entry.keys.get(kid).cloned())
            .ok_or_else(|| PoiesisError::Auth(format!("unknown signing key: {kid}")))
    }

    async fn refresh_keys(&self) -> Result<()> {
        let jwks: JwksResponse = self
            .client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| PoiesisError::Auth(format!("JWKS fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| PoiesisError::Auth(format!("invalid JWKS document: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                warn!("skipping JWKS entry with missing fields");
                continue;
            };
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(err) => warn!(kid = %kid, error = %err, "unusable JWKS key"),
            }
        }
        if keys.is_empty() {
            return Err(PoiesisError::Auth("JWKS has no usable keys".into()));
        }
        debug!(count = keys.len(), "JWKS refreshed");

        *self.cache.write().await = Some(JwksCache {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}
