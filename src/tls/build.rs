use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion, version};

use super::ensure_crypto_provider;
use super::verifier::PinnedServerVerifier;
use crate::errors::Error;
use crate::instance::InstanceName;

/// Assembles the client configuration for one credential bundle.
///
/// The key store holds exactly one entry (the private key with the ephemeral
/// certificate as its chain) and the trust store exactly one (the instance's
/// server CA). TLS 1.3 is preferred with a 1.2 fallback; IAM-authenticated
/// connections never downgrade below 1.3 because the access token travels
/// inside the ephemeral certificate.
pub(crate) fn build_client_config(
    name: &InstanceName,
    private_key: PrivateKeyDer<'static>,
    ephemeral_cert: CertificateDer<'static>,
    server_ca: CertificateDer<'static>,
    iam_auth: bool,
) -> Result<Arc<ClientConfig>, Error> {
    ensure_crypto_provider();
    config_with_provider(
        Arc::new(rustls::crypto::ring::default_provider()),
        name,
        private_key,
        ephemeral_cert,
        server_ca,
        iam_auth,
    )
}

fn config_with_provider(
    provider: Arc<CryptoProvider>,
    name: &InstanceName,
    private_key: PrivateKeyDer<'static>,
    ephemeral_cert: CertificateDer<'static>,
    server_ca: CertificateDer<'static>,
    iam_auth: bool,
) -> Result<Arc<ClientConfig>, Error> {
    let mut roots = RootCertStore::empty();
    roots.add(server_ca).map_err(|e| Error::Tls {
        name: name.to_string(),
        detail: format!("rejected server CA certificate: {e}"),
    })?;

    let versions: &[&'static SupportedProtocolVersion] = if iam_auth {
        &[&version::TLS13]
    } else {
        &[&version::TLS13, &version::TLS12]
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(versions)
        .map_err(|e| {
            if iam_auth {
                Error::Tls13Unavailable {
                    name: name.to_string(),
                }
            } else {
                Error::Tls {
                    name: name.to_string(),
                    detail: format!("no usable protocol versions: {e}"),
                }
            }
        })?;

    let verifier = PinnedServerVerifier::new(roots).map_err(|detail| Error::Tls {
        name: name.to_string(),
        detail,
    })?;

    let config = builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(vec![ephemeral_cert], private_key)
        .map_err(|e| Error::Tls {
            name: name.to_string(),
            detail: format!("rejected client certificate: {e}"),
        })?;

    Ok(Arc::new(config))
}
