use std::io::Cursor;

use chrono::{DateTime, Utc};
use rustls::pki_types::CertificateDer;
use rustls_pemfile::certs;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Decodes the first certificate in a PEM document.
pub(crate) fn certificate_from_pem(pem: &str) -> Result<CertificateDer<'static>, String> {
    let mut reader = Cursor::new(pem.as_bytes());
    let mut parsed = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid certificate PEM: {e}"))?;

    if parsed.is_empty() {
        return Err("no certificates found in PEM document".to_owned());
    }

    Ok(parsed.remove(0))
}

/// Expiration timestamp of a DER-encoded certificate.
pub(crate) fn not_after(cert_der: &CertificateDer<'_>) -> Result<DateTime<Utc>, String> {
    let (_, cert) = X509Certificate::from_der(cert_der.as_ref())
        .map_err(|e| format!("failed to parse certificate: {e}"))?;

    let raw = cert.validity().not_after.to_datetime();
    DateTime::<Utc>::from_timestamp(raw.unix_timestamp(), raw.nanosecond())
        .ok_or_else(|| "invalid certificate expiry timestamp".to_owned())
}
