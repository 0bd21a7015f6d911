use std::sync::Arc;

use crate::api::ApiError;

/// Errors surfaced by this crate.
///
/// Variants are cheaply cloneable: the result of a refresh is held in a shared
/// future, and any number of concurrent readers may observe the same failure.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The connection name does not match the expected grammar. Raised
    /// synchronously at construction; retrying cannot help.
    #[error("invalid connection name {name:?}, expected \"<PROJECT>:<REGION>:<INSTANCE>\"")]
    InvalidName { name: String },

    /// The control plane reported that the admin API is not enabled for the
    /// project.
    #[error(
        "[{name}] the admin API is not enabled for project \"{project}\", enable it at {console_url}"
    )]
    ApiDisabled {
        name: String,
        project: String,
        console_url: String,
    },

    /// The instance does not exist, or the calling account cannot access it.
    #[error(
        "[{name}] the instance does not exist or the account is not authorized to access it; \
         verify the connection name and the IAM permissions for project \"{project}\""
    )]
    NotAuthorizedOrMissing { name: String, project: String },

    /// A control-plane call failed for a reason other than the recognized
    /// ones; the underlying cause is preserved.
    #[error("[{name}] {context}")]
    Refresh {
        name: String,
        context: String,
        #[source]
        source: Option<Arc<ApiError>>,
    },

    /// The fetched instance metadata violates an invariant (wrong region,
    /// unsupported backend generation, no IP addresses). Fatal for the refresh
    /// that saw it, harmless to later ones.
    #[error("[{name}] {reason}")]
    Validation { name: String, reason: String },

    /// A certificate returned by the control plane failed X.509/PEM decoding.
    #[error("[{name}] unable to parse the {what}: {detail}")]
    CertParse {
        name: String,
        what: &'static str,
        detail: String,
    },

    /// The TLS client configuration could not be assembled.
    #[error("[{name}] unable to build the TLS client configuration: {detail}")]
    Tls { name: String, detail: String },

    /// No instance IP address matched the caller's preferences.
    #[error("[{name}] instance has no IP addresses matching preferences ({requested})")]
    NoMatchingIp { name: String, requested: String },

    /// IAM authentication requires TLS 1.3 and the crypto provider cannot
    /// offer it.
    #[error(
        "[{name}] TLS 1.3 is required to connect with IAM authentication but is not available"
    )]
    Tls13Unavailable { name: String },
}
