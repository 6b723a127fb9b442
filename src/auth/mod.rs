//! Bearer-token authentication.
//!
//! Every authenticated request resolves to a [`Subject`]; all per-user
//! scoping in the store hangs off `subject.user_id`. Two validators
//! exist: `dummy` (any non-empty token is its own subject, for
//! development) and `oidc` (verified against the configured issuer).

pub mod oidc;

use crate::config::{AuthKind, Config};
use crate::errors::{PoiesisError, Result};

pub use oidc::OidcValidator;

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub enum Authenticator {
    Dummy,
    Oidc(OidcValidator),
}

impl Authenticator {
    /// Build the validator selected by `AUTH_TYPE`.
    pub async fn from_config(cfg: &Config) -> Result<Self> {
        match cfg.auth_kind {
            AuthKind::Dummy => Ok(Self::Dummy),
            AuthKind::Oidc => {
                let oidc = cfg.oidc.as_ref().ok_or_else(|| {
                    PoiesisError::Auth("OIDC selected but not configured".into())
                })?;
                Ok(Self::Oidc(OidcValidator::discover(oidc).await?))
            }
        }
    }

    /// Validate a bearer token and resolve the subject.
    pub async fn authenticate(&self, token: &str) -> Result<Subject> {
        match self {
            Self::Dummy => {
                if token.trim().is_empty() {
                    return Err(PoiesisError::Auth("empty bearer token".into()));
                }
                Ok(Subject {
                    user_id: token.to_string(),
                })
            }
            Self::Oidc(validator) => validator.validate(token).await,
        }
    }
}
