//! Auth provider port (driven/secondary port)

use chrono::{DateTime, Utc};

use crate::domain::newtypes::AccountId;

/// Bearer credentials for the remote service
#[derive(Debug, Clone)]
pub struct BearerCredentials {
    /// Bearer token for authenticating API requests
    pub access_token: String,
    /// When the access token expires
    pub expires_at: DateTime<Utc>,
}

impl BearerCredentials {
    /// Returns true if the access token has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Port trait yielding credentials for an account
///
/// May refuse (unauthenticated account, revoked consent). A refusal fails
/// the session immediately and is never retried within the session.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Yield current credentials for `account`
    async fn credentials(&self, account: &AccountId) -> anyhow::Result<BearerCredentials>;
}
