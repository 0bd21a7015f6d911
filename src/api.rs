//! Control-plane surface consumed by the credential engine.
//!
//! The engine needs exactly two admin-API operations: fetching the connect
//! settings of an instance and minting an ephemeral client certificate. The
//! transport behind them (HTTP client, retries, request auth) belongs to the
//! embedder; implementations only have to be `Send + Sync` and internally
//! thread-safe, since one client is shared by every instance handle in the
//! process.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::instance::InstanceName;

/// Reason code attached when the project does not have the admin API enabled.
const ACCESS_NOT_CONFIGURED: &str = "accessNotConfigured";
/// Reason code for a missing instance or an unauthorized account.
const NOT_AUTHORIZED: &str = "notAuthorized";

/// Boxed error type accepted as the cause of an [`ApiError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a control-plane call.
///
/// `reason` carries the service's machine-readable error code when the
/// response contained one; transport-level failures leave it empty.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    reason: Option<String>,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ApiError {
    /// A failure without a service reason code.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            reason: None,
            message: message.into(),
            source: None,
        }
    }

    /// A failure carrying the service's reason code.
    #[must_use]
    pub fn with_reason(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The service's reason code, if the response carried one.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Instance metadata returned by `connect_settings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSettings {
    pub region: String,
    pub backend_type: String,
    pub ip_addresses: Vec<IpMapping>,
    pub server_ca_cert: SslCert,
}

/// One assigned instance address, labeled by type (`"PRIMARY"`, `"PRIVATE"`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpMapping {
    #[serde(rename = "type")]
    pub ip_type: String,
    pub ip_address: String,
}

/// PEM-encoded certificate wrapper used by both RPC payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslCert {
    pub cert: String,
}

/// Request body for minting an ephemeral client certificate.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralCertRequest {
    /// PEM-encoded public key the certificate is minted for.
    pub public_key: String,
    /// OAuth2 access token, present under IAM authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl fmt::Debug for EphemeralCertRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCertRequest")
            .field("public_key", &self.public_key)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "** redacted **"),
            )
            .finish()
    }
}

/// Response to a certificate mint request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralCertResponse {
    pub ephemeral_cert: SslCert,
}

/// The two control-plane operations the credential engine invokes.
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// `connect.get`: metadata needed to reach one instance.
    async fn connect_settings(
        &self,
        project: &str,
        regional_instance: &str,
    ) -> Result<ConnectSettings, ApiError>;

    /// `connect.generateEphemeralCert`: exchanges a public key (and optional
    /// access token) for a signed short-lived client certificate.
    async fn generate_ephemeral_cert(
        &self,
        project: &str,
        regional_instance: &str,
        request: EphemeralCertRequest,
    ) -> Result<EphemeralCertResponse, ApiError>;
}

/// Attaches user-facing context to a failed control-plane call, recognizing
/// the two commonly hit service reason codes.
pub(crate) fn remap_api_error(name: &InstanceName, fallback: &str, err: ApiError) -> Error {
    match err.reason() {
        Some(ACCESS_NOT_CONFIGURED) => Error::ApiDisabled {
            name: name.to_string(),
            project: name.project().to_owned(),
            console_url: format!(
                "https://console.cloud.google.com/apis/api/sqladmin/overview?project={}",
                name.project()
            ),
        },
        Some(NOT_AUTHORIZED) => Error::NotAuthorizedOrMissing {
            name: name.to_string(),
            project: name.project().to_owned(),
        },
        _ => Error::Refresh {
            name: name.to_string(),
            context: fallback.to_owned(),
            source: Some(Arc::new(err)),
        },
    }
}
