//! Client key material supplied by the embedder.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rustls::pki_types::PrivateKeyDer;

/// Asymmetric key pair used to authenticate connections.
///
/// The crate never generates keys. The private half goes into the TLS client
/// configuration untouched; the public half is the X.509
/// `SubjectPublicKeyInfo` encoding sent with certificate mint requests.
pub struct ClientKeyPair {
    private_key: PrivateKeyDer<'static>,
    public_key_der: Vec<u8>,
}

impl ClientKeyPair {
    #[must_use]
    pub fn new(private_key: PrivateKeyDer<'static>, public_key_der: Vec<u8>) -> Self {
        Self {
            private_key,
            public_key_der,
        }
    }

    /// A copy of the private key for one TLS configuration.
    pub(crate) fn private_key(&self) -> PrivateKeyDer<'static> {
        self.private_key.clone_key()
    }

    /// PEM rendering of the public half, as the certificate mint endpoint
    /// expects it: `RSA PUBLIC KEY` armor around a base64 body wrapped at 64
    /// columns.
    #[must_use]
    pub fn public_key_pem(&self) -> String {
        let body = STANDARD.encode(&self.public_key_der);
        let mut pem = String::with_capacity(body.len() + body.len() / 64 + 70);
        pem.push_str("-----BEGIN RSA PUBLIC KEY-----\n");
        for chunk in body.as_bytes().chunks(64) {
            pem.extend(chunk.iter().map(|&b| char::from(b)));
            pem.push('\n');
        }
        pem.push_str("-----END RSA PUBLIC KEY-----\n");
        pem
    }
}

impl fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientKeyPair")
            .field("private_key", &"** redacted **")
            .field("public_key_der", &format!("{} bytes", self.public_key_der.len()))
            .finish()
    }
}
