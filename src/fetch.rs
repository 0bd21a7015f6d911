//! Stateless control-plane fetchers.
//!
//! One refresh cycle runs both fetchers concurrently; neither retries on its
//! own. Retry policy belongs to the orchestrator in `refresh`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rustls::pki_types::CertificateDer;

use crate::api::{AdminApi, EphemeralCertRequest, remap_api_error};
use crate::auth::{TokenSource, trim_token};
use crate::errors::Error;
use crate::instance::InstanceName;
use crate::keys::ClientKeyPair;
use crate::tls;

/// Backend generation able to accept brokered connections.
const SUPPORTED_BACKEND: &str = "SECOND_GEN";

/// Validated instance metadata from one `connect_settings` call.
#[derive(Debug, Clone)]
pub(crate) struct Metadata {
    pub(crate) ip_addresses: HashMap<String, String>,
    pub(crate) server_ca: CertificateDer<'static>,
}

/// Ephemeral client certificate plus the expirations bounding its usefulness.
#[derive(Debug, Clone)]
pub(crate) struct MintedCertificate {
    pub(crate) certificate: CertificateDer<'static>,
    pub(crate) not_after: DateTime<Utc>,
    /// Expiry of the access token baked into the certificate, when IAM
    /// authentication is in use.
    pub(crate) token_expires_at: Option<DateTime<Utc>>,
}

/// Fetches and validates the instance metadata.
pub(crate) async fn fetch_metadata(
    api: &dyn AdminApi,
    name: &InstanceName,
) -> Result<Metadata, Error> {
    let settings = api
        .connect_settings(name.project(), &name.regionalized())
        .await
        .map_err(|e| remap_api_error(name, "failed to update instance metadata", e))?;

    if settings.region != name.region() {
        return Err(Error::Validation {
            name: name.to_string(),
            reason: format!(
                "the instance region is \"{}\", not \"{}\"; verify the connection name",
                settings.region,
                name.region()
            ),
        });
    }
    if settings.backend_type != SUPPORTED_BACKEND {
        return Err(Error::Validation {
            name: name.to_string(),
            reason: "connections are not supported for this backend generation".to_owned(),
        });
    }
    if settings.ip_addresses.is_empty() {
        return Err(Error::Validation {
            name: name.to_string(),
            reason: "instance does not have an assigned IP address".to_owned(),
        });
    }

    let server_ca = tls::certificate_from_pem(&settings.server_ca_cert.cert).map_err(|detail| {
        Error::CertParse {
            name: name.to_string(),
            what: "server CA certificate",
            detail,
        }
    })?;

    let ip_addresses = settings
        .ip_addresses
        .into_iter()
        .map(|mapping| (mapping.ip_type, mapping.ip_address))
        .collect();

    Ok(Metadata {
        ip_addresses,
        server_ca,
    })
}

/// Mints an ephemeral certificate for the supplied key pair, attaching a
/// freshly refreshed access token when IAM authentication is enabled.
pub(crate) async fn fetch_ephemeral_certificate(
    api: &dyn AdminApi,
    name: &InstanceName,
    key_pair: &ClientKeyPair,
    token_source: Option<&dyn TokenSource>,
) -> Result<MintedCertificate, Error> {
    let mut request = EphemeralCertRequest {
        public_key: key_pair.public_key_pem(),
        access_token: None,
    };

    let mut token_expires_at = None;
    if let Some(source) = token_source {
        source
            .refresh()
            .await
            .map_err(|e| remap_api_error(name, "failed to refresh the IAM auth token", e))?;
        let token = source
            .access_token()
            .await
            .map_err(|e| remap_api_error(name, "failed to fetch the IAM auth token", e))?;

        request.access_token = Some(trim_token(&token.value).to_owned());
        token_expires_at = Some(token.expires_at);
    }

    let response = api
        .generate_ephemeral_cert(name.project(), &name.regionalized(), request)
        .await
        .map_err(|e| remap_api_error(name, "failed to create an ephemeral certificate", e))?;

    let certificate =
        tls::certificate_from_pem(&response.ephemeral_cert.cert).map_err(|detail| {
            Error::CertParse {
                name: name.to_string(),
                what: "ephemeral certificate",
                detail,
            }
        })?;
    let not_after = tls::not_after(&certificate).map_err(|detail| Error::CertParse {
        name: name.to_string(),
        what: "ephemeral certificate",
        detail,
    })?;

    Ok(MintedCertificate {
        certificate,
        not_after,
        token_expires_at,
    })
}
