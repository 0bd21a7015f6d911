//! OAuth2 credentials for IAM database authentication.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::api::ApiError;

/// Access token attached to certificate mint requests under IAM
/// authentication. The database authenticates the connection against it, so
/// its expiry bounds the lifetime of the whole credential bundle.
#[derive(Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"** redacted **")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of OAuth2 access tokens.
///
/// Shared process-wide and assumed internally thread-safe; the credential
/// engine serializes nothing about it.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Forces the underlying credentials to refresh.
    async fn refresh(&self) -> Result<(), ApiError>;

    /// The current access token and its expiration time.
    async fn access_token(&self) -> Result<AccessToken, ApiError>;
}

/// Strips trailing `'.'` characters from a token value. Some token sources
/// pad tokens with dots, which the control plane rejects.
// TODO: remove once the upstream token padding is fixed.
pub(crate) fn trim_token(token: &str) -> &str {
    token.trim_end_matches('.')
}
