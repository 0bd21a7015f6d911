//! Authenticated TLS tether for managed cloud database instances.
//!
//! Managed instances are not reachable with an ordinary TLS handshake: each
//! connection needs a short-lived ephemeral client certificate minted by a
//! control-plane admin API, pinned against the instance's own server CA, and
//! optionally carrying an OAuth2 access token for IAM database
//! authentication. This crate owns that credential lifecycle: it fetches
//! instance metadata and an ephemeral certificate in the background, assembles
//! them into a ready-to-use rustls configuration, keeps it fresh ahead of
//! expiry, and hands it to database drivers on demand.
//!
//! # Module Organization
//!
//! - `instance` - connection-name parsing
//! - `api` - admin-API trait and wire models
//! - `auth` - OAuth2 token source for IAM authentication
//! - `keys` - externally supplied client key material
//! - `tls` - pinned-CA client configuration assembly
//! - `manager` - the per-instance handle
//! - `errors` - the crate-wide error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use dbtether::Instance;
//! use std::sync::Arc;
//!
//! let instance = Instance::new(
//!     "my-proj:us-central1:db1",
//!     Arc::new(admin_api),
//!     None,
//!     async move { Ok(key_pair) },
//! )?;
//!
//! let ip = instance.preferred_ip(&[dbtether::IP_TYPE_PRIVATE, dbtether::IP_TYPE_PRIMARY]).await?;
//! let connector = instance.ssl_connector().await?;
//! // dial `ip` and hand the TCP stream to `connector`
//! ```

pub mod api;
pub mod auth;
pub mod errors;
pub mod instance;
pub mod keys;
pub mod manager;
pub mod tls;

mod fetch;
mod rate;
mod refresh;

pub use api::{
    AdminApi, ApiError, BoxError, ConnectSettings, EphemeralCertRequest, EphemeralCertResponse,
    IpMapping, SslCert,
};
pub use auth::{AccessToken, TokenSource};
pub use errors::Error;
pub use instance::InstanceName;
pub use keys::ClientKeyPair;
pub use manager::{IP_TYPE_PRIMARY, IP_TYPE_PRIVATE, Instance};
pub use tls::ensure_crypto_provider;
