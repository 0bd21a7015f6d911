//! Public handle to one managed database instance.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_rustls::TlsConnector;

use crate::api::AdminApi;
use crate::auth::TokenSource;
use crate::errors::Error;
use crate::instance::InstanceName;
use crate::keys::ClientKeyPair;
use crate::refresh::Engine;

/// Address label of an instance's public IP.
pub const IP_TYPE_PRIMARY: &str = "PRIMARY";
/// Address label of an instance's private (VPC) IP.
pub const IP_TYPE_PRIVATE: &str = "PRIVATE";

/// Handle to one managed database instance.
///
/// Creating the handle launches the first credential refresh in the
/// background; afterwards the refresh loop keeps a ready-to-use TLS
/// configuration ahead of certificate expiry. Cheap to clone; all clones share
/// the same refresh loop, and dropping the last one stops it.
///
/// Must be created and used inside a tokio runtime: refreshes, timers and
/// their completions run as spawned tasks.
#[derive(Clone)]
pub struct Instance {
    engine: Arc<Engine>,
}

impl Instance {
    /// Creates the handle and immediately launches the first refresh.
    ///
    /// `api` is the shared admin-API client. Passing a `token_source` enables
    /// IAM database authentication: every minted certificate then carries a
    /// freshly refreshed access token, and connections require TLS 1.3.
    /// `key_pair` is the connection key material, supplied as a future so the
    /// embedder can generate it off the critical path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `connection_name` does not match
    /// `<PROJECT>:<REGION>:<INSTANCE>`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(
        connection_name: &str,
        api: Arc<dyn AdminApi>,
        token_source: Option<Arc<dyn TokenSource>>,
        key_pair: impl Future<Output = Result<ClientKeyPair, Error>> + Send + 'static,
    ) -> Result<Self, Error> {
        let name: InstanceName = connection_name.parse()?;
        Ok(Self {
            engine: Engine::new(name, api, token_source, key_pair),
        })
    }

    /// The parsed connection name.
    #[must_use]
    pub fn name(&self) -> &InstanceName {
        self.engine.name()
    }

    /// The TLS client configuration of the freshest credential bundle.
    ///
    /// Blocks only until the first refresh completes; afterwards reads resolve
    /// immediately. Dropping the returned future detaches this caller from the
    /// wait, the refresh itself always runs to completion in the background.
    ///
    /// # Errors
    ///
    /// Surfaces the error recorded by the refresh that produced (or failed to
    /// produce) the current bundle.
    pub async fn tls_client_config(&self) -> Result<Arc<rustls::ClientConfig>, Error> {
        Ok(self.engine.bundle().await?.client_config.clone())
    }

    /// An unconnected TLS connector for the instance, pinned to its server CA
    /// and presenting the current ephemeral certificate. Dialing is the
    /// caller's responsibility.
    ///
    /// # Errors
    ///
    /// See [`Instance::tls_client_config`].
    pub async fn ssl_connector(&self) -> Result<TlsConnector, Error> {
        Ok(TlsConnector::from(self.tls_client_config().await?))
    }

    /// The first instance IP address matching `preferred_types`, in caller
    /// order.
    ///
    /// # Errors
    ///
    /// [`Error::NoMatchingIp`] if no preferred type is assigned to the
    /// instance, plus anything [`Instance::tls_client_config`] surfaces.
    pub async fn preferred_ip(&self, preferred_types: &[&str]) -> Result<String, Error> {
        let bundle = self.engine.bundle().await?;
        for ip_type in preferred_types {
            if let Some(addr) = bundle.metadata.ip_addresses.get(*ip_type) {
                return Ok(addr.clone());
            }
        }
        Err(Error::NoMatchingIp {
            name: self.engine.name().to_string(),
            requested: preferred_types.join(", "),
        })
    }

    /// Expiration of the current credential bundle: the ephemeral
    /// certificate's `notAfter`, bounded by the access token's expiry under
    /// IAM authentication.
    ///
    /// # Errors
    ///
    /// See [`Instance::tls_client_config`].
    pub async fn expiration(&self) -> Result<DateTime<Utc>, Error> {
        Ok(self.engine.bundle().await?.expires_at)
    }

    /// Requests an immediate credential refresh.
    ///
    /// If the scheduled refresh timer has not fired yet it is pre-empted and a
    /// refresh starts now; if a refresh is already in flight, subsequent reads
    /// attach to its result instead of starting another. Always returns
    /// `true`: the per-instance rate limiter throttles the actual admin-API
    /// calls inside the refresh, so there is no failure to report here.
    /// Refresh errors surface on the next read.
    pub fn force_refresh(&self) -> bool {
        self.engine.force_refresh()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.engine.name().to_string())
            .finish()
    }
}
