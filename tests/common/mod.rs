#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dbtether::{
    AccessToken, AdminApi, ApiError, ClientKeyPair, ConnectSettings, EphemeralCertRequest,
    EphemeralCertResponse, Instance, IpMapping, SslCert, TokenSource,
};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::watch;

pub const CONNECTION_NAME: &str = "my-proj:us-central1:db1";

/// Certificate authority and client key material for one fake instance.
pub struct TestPki {
    ca_cert: rcgen::Certificate,
    ca_key: rcgen::KeyPair,
    client_key: rcgen::KeyPair,
}

impl TestPki {
    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    /// The key material a real embedder would generate and hand to the
    /// instance handle.
    pub fn client_key_pair(&self) -> ClientKeyPair {
        ClientKeyPair::new(
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.client_key.serialize_der())),
            self.client_key.public_key_der(),
        )
    }

    /// Mints an ephemeral certificate for the client key, signed by the
    /// instance CA.
    pub fn mint_ephemeral_pem(&self, not_after: DateTime<Utc>) -> String {
        let mut params = rcgen::CertificateParams::new(Vec::new()).unwrap();
        params.not_after =
            time::OffsetDateTime::from_unix_timestamp(not_after.timestamp()).unwrap();
        params
            .signed_by(&self.client_key, &self.ca_cert, &self.ca_key)
            .unwrap()
            .pem()
    }
}

pub fn test_pki() -> Arc<TestPki> {
    let ca_key = rcgen::KeyPair::generate().unwrap();
    let mut ca_params = rcgen::CertificateParams::new(Vec::new()).unwrap();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    Arc::new(TestPki {
        ca_cert,
        ca_key,
        client_key: rcgen::KeyPair::generate().unwrap(),
    })
}

struct Responses {
    region: String,
    backend_type: String,
    ip_addresses: Vec<IpMapping>,
    metadata_error: Option<(String, Option<String>)>,
    cert_ttl: Duration,
}

/// Scriptable admin API with call counters and a gate for holding certificate
/// mints in flight.
pub struct FakeAdminApi {
    pki: Arc<TestPki>,
    responses: Mutex<Responses>,
    metadata_calls: AtomicUsize,
    cert_calls: AtomicUsize,
    cert_gate: watch::Sender<bool>,
}

impl FakeAdminApi {
    pub fn new(pki: Arc<TestPki>) -> Arc<Self> {
        Arc::new(Self {
            pki,
            responses: Mutex::new(Responses {
                region: "us-central1".to_owned(),
                backend_type: "SECOND_GEN".to_owned(),
                ip_addresses: vec![IpMapping {
                    ip_type: "PRIMARY".to_owned(),
                    ip_address: "1.2.3.4".to_owned(),
                }],
                metadata_error: None,
                cert_ttl: Duration::minutes(60),
            }),
            metadata_calls: AtomicUsize::new(0),
            cert_calls: AtomicUsize::new(0),
            cert_gate: watch::channel(true).0,
        })
    }

    pub fn set_region(&self, region: &str) {
        self.responses.lock().unwrap().region = region.to_owned();
    }

    pub fn set_backend_type(&self, backend_type: &str) {
        self.responses.lock().unwrap().backend_type = backend_type.to_owned();
    }

    pub fn set_ip_addresses(&self, addresses: &[(&str, &str)]) {
        self.responses.lock().unwrap().ip_addresses = addresses
            .iter()
            .map(|(ip_type, ip_address)| IpMapping {
                ip_type: (*ip_type).to_owned(),
                ip_address: (*ip_address).to_owned(),
            })
            .collect();
    }

    pub fn set_cert_ttl(&self, ttl: Duration) {
        self.responses.lock().unwrap().cert_ttl = ttl;
    }

    pub fn fail_metadata(&self, message: &str, reason: Option<&str>) {
        self.responses.lock().unwrap().metadata_error =
            Some((message.to_owned(), reason.map(str::to_owned)));
    }

    pub fn clear_metadata_failure(&self) {
        self.responses.lock().unwrap().metadata_error = None;
    }

    /// Makes certificate mints block until [`FakeAdminApi::release_certs`].
    pub fn hold_certs(&self) {
        self.cert_gate.send_replace(false);
    }

    pub fn release_certs(&self) {
        self.cert_gate.send_replace(true);
    }

    pub fn metadata_call_count(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn cert_call_count(&self) -> usize {
        self.cert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminApi for FakeAdminApi {
    async fn connect_settings(
        &self,
        _project: &str,
        _regional_instance: &str,
    ) -> Result<ConnectSettings, ApiError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);

        let responses = self.responses.lock().unwrap();
        if let Some((message, reason)) = &responses.metadata_error {
            return Err(match reason {
                Some(reason) => ApiError::with_reason(message.clone(), reason.clone()),
                None => ApiError::new(message.clone()),
            });
        }

        Ok(ConnectSettings {
            region: responses.region.clone(),
            backend_type: responses.backend_type.clone(),
            ip_addresses: responses.ip_addresses.clone(),
            server_ca_cert: SslCert {
                cert: self.pki.ca_pem(),
            },
        })
    }

    async fn generate_ephemeral_cert(
        &self,
        _project: &str,
        _regional_instance: &str,
        _request: EphemeralCertRequest,
    ) -> Result<EphemeralCertResponse, ApiError> {
        self.cert_calls.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.cert_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| ApiError::new("certificate gate dropped"))?;

        let ttl = self.responses.lock().unwrap().cert_ttl;
        Ok(EphemeralCertResponse {
            ephemeral_cert: SslCert {
                cert: self.pki.mint_ephemeral_pem(Utc::now() + ttl),
            },
        })
    }
}

/// Token source handing out one fixed token.
pub struct FakeTokenSource {
    token: String,
    expires_at: DateTime<Utc>,
    refresh_calls: AtomicUsize,
}

impl FakeTokenSource {
    pub fn new(token: &str, expires_at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_owned(),
            expires_at,
            refresh_calls: AtomicUsize::new(0),
        })
    }

    pub fn refresh_call_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for FakeTokenSource {
    async fn refresh(&self) -> Result<(), ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn access_token(&self) -> Result<AccessToken, ApiError> {
        Ok(AccessToken {
            value: self.token.clone(),
            expires_at: self.expires_at,
        })
    }
}

pub fn key_pair_future(
    pki: Arc<TestPki>,
) -> impl Future<Output = Result<ClientKeyPair, dbtether::Error>> + Send + 'static {
    async move { Ok(pki.client_key_pair()) }
}

pub fn tethered_instance(
    connection_name: &str,
    api: &Arc<FakeAdminApi>,
    pki: &Arc<TestPki>,
    tokens: Option<Arc<FakeTokenSource>>,
) -> Instance {
    Instance::new(
        connection_name,
        api.clone() as Arc<dyn AdminApi>,
        tokens.map(|source| source as Arc<dyn TokenSource>),
        key_pair_future(pki.clone()),
    )
    .unwrap()
}

/// Lets spawned refresh, supervisor and timer tasks run without advancing the
/// (possibly paused) clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
