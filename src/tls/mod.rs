//! TLS assembly for authenticated instance connections.
//!
//! Managed instances are not reachable by an ordinary TLS handshake: the
//! client has to present an ephemeral certificate minted by the control plane
//! and trust the server against the instance's own CA rather than the host
//! trust store.
//!
//! # Module Organization
//!
//! - `pem` - PEM/X.509 decoding and expiry extraction
//! - `verifier` - chain-only verification against the pinned instance CA
//! - `build` - client configuration assembly and protocol-version policy

mod build;
mod pem;
mod verifier;

pub(crate) use build::build_client_config;
pub(crate) use pem::{certificate_from_pem, not_after};

use std::sync::OnceLock;

static CRYPTO_PROVIDER_INIT: OnceLock<()> = OnceLock::new();

/// Ensure the rustls crypto provider is initialized.
///
/// Safe to call repeatedly; installation happens once. If the embedder already
/// installed a process-wide provider, that one stays in place.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
