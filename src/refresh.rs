//! Credential refresh orchestration.
//!
//! One [`Engine`] runs per instance handle. It launches a refresh at
//! construction, replaces the cached credential bundle whenever a refresh
//! succeeds, schedules the successor ahead of expiration, and retries
//! immediately (rate-limited) on failure. Readers clone the shared `current`
//! future under the state mutex and await it outside; after the first
//! successful refresh every read resolves immediately.
//!
//! The successor is the tagged sum [`NextRefresh`]: either a timer is armed
//! (`Scheduled`) or a refresh is already underway (`Started`). `Scheduled`
//! carries the `claimed` flag raced by the timer task and `force_refresh`, so
//! a forced refresh can atomically decide between pre-empting the timer and
//! attaching readers to the refresh the timer already launched. Nothing is
//! ever awaited while the mutex is held.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::api::AdminApi;
use crate::auth::TokenSource;
use crate::errors::Error;
use crate::fetch::{self, Metadata};
use crate::instance::InstanceName;
use crate::keys::ClientKeyPair;
use crate::rate::RefreshRateLimiter;
use crate::tls;

/// Minimum remaining certificate lifetime when the next refresh is scheduled.
const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);
/// Tighter bound under IAM auth: token sources may refresh as little as ~60
/// seconds before expiry, so the default buffer would never see a fresh token.
const IAM_AUTH_REFRESH_BUFFER: Duration = Duration::from_secs(55);
/// Steady-state interval between admin-API refreshes for one instance.
const REFRESH_RATE_PERIOD: Duration = Duration::from_secs(60);

/// The immutable product of one successful refresh cycle.
pub(crate) struct Bundle {
    pub(crate) metadata: Metadata,
    pub(crate) client_config: Arc<rustls::ClientConfig>,
    pub(crate) expires_at: DateTime<Utc>,
}

/// Shared handle to the result of one refresh; cloned by every reader.
pub(crate) type BundleFuture = Shared<BoxFuture<'static, Result<Arc<Bundle>, Error>>>;

/// Resolves to the refresh launched by a fired timer.
type StartedFuture = Shared<BoxFuture<'static, Result<BundleFuture, Error>>>;

type KeyPairFuture = Shared<BoxFuture<'static, Result<Arc<ClientKeyPair>, Error>>>;

pub(crate) struct Engine {
    name: InstanceName,
    api: Arc<dyn AdminApi>,
    token_source: Option<Arc<dyn TokenSource>>,
    key_pair: KeyPairFuture,
    limiter: RefreshRateLimiter,
    /// Runtime captured at construction; lets `force_refresh` launch work
    /// from threads that are not tokio workers.
    runtime: Handle,
    state: Mutex<State>,
}

struct State {
    current: BundleFuture,
    next: NextRefresh,
}

/// Successor to the current bundle.
enum NextRefresh {
    /// A timer is armed; the refresh starts when it fires, unless a forced
    /// refresh claims the slot first.
    Scheduled(ScheduledRefresh),
    /// A refresh is already underway (initial, forced, or immediate retry).
    Started(BundleFuture),
}

#[derive(Clone)]
struct ScheduledRefresh {
    /// Set by whichever of the timer task and `force_refresh` gets there
    /// first; the winner owns starting the refresh.
    claimed: Arc<AtomicBool>,
    started: StartedFuture,
}

impl Engine {
    /// Creates the engine and immediately launches the first refresh.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; the engine runs its
    /// refreshes and timers on the runtime it was created in.
    pub(crate) fn new(
        name: InstanceName,
        api: Arc<dyn AdminApi>,
        token_source: Option<Arc<dyn TokenSource>>,
        key_pair: impl Future<Output = Result<ClientKeyPair, Error>> + Send + 'static,
    ) -> Arc<Self> {
        let key_pair: KeyPairFuture = key_pair
            .map(|result| result.map(Arc::new))
            .boxed()
            .shared();

        // `current` cannot point at the first refresh before the engine
        // exists; a one-shot bridge closes the loop.
        let (tx, rx) = oneshot::channel::<BundleFuture>();
        let bootstrap_name = name.clone();
        let bootstrap: BundleFuture = async move {
            match rx.await {
                Ok(refresh) => refresh.await,
                Err(_) => Err(Error::Refresh {
                    name: bootstrap_name.to_string(),
                    context: "the initial refresh was never started".to_owned(),
                    source: None,
                }),
            }
        }
        .boxed()
        .shared();

        let engine = Arc::new(Self {
            name,
            api,
            token_source,
            key_pair,
            limiter: RefreshRateLimiter::new(REFRESH_RATE_PERIOD),
            runtime: Handle::current(),
            state: Mutex::new(State {
                current: bootstrap.clone(),
                next: NextRefresh::Started(bootstrap),
            }),
        });
        let _ = tx.send(Self::begin_refresh(&engine));
        engine
    }

    pub(crate) fn name(&self) -> &InstanceName {
        &self.name
    }

    fn iam_auth(&self) -> bool {
        self.token_source.is_some()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The freshest credential bundle, waiting for the first refresh if none
    /// has completed yet.
    pub(crate) async fn bundle(&self) -> Result<Arc<Bundle>, Error> {
        let current = {
            let state = self.state();
            state.current.clone()
        };
        current.await
    }

    /// Pre-empts the scheduled refresh, or attaches readers to one already in
    /// flight. Never starts a second concurrent refresh.
    pub(crate) fn force_refresh(self: &Arc<Self>) -> bool {
        let mut guard = self.state();
        let state = &mut *guard;
        match &state.next {
            NextRefresh::Scheduled(scheduled) => {
                if scheduled.claimed.swap(true, Ordering::AcqRel) {
                    // The timer fired; a refresh is running or about to.
                    // Point readers at its eventual result.
                    let started = scheduled.started.clone();
                    state.current = async move { started.await?.await }.boxed().shared();
                } else {
                    let refresh = Self::begin_refresh(self);
                    state.current = refresh.clone();
                    state.next = NextRefresh::Started(refresh);
                }
            }
            NextRefresh::Started(refresh) => {
                state.current = refresh.clone();
            }
        }
        true
    }

    /// Spawns one refresh cycle plus the supervisor that folds its result back
    /// into the state.
    fn begin_refresh(engine: &Arc<Self>) -> BundleFuture {
        let task = engine.runtime.spawn(Self::run_refresh(engine.clone()));
        let name = engine.name.clone();
        let refresh: BundleFuture = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(Error::Refresh {
                    name: name.to_string(),
                    context: format!("refresh task failed: {err}"),
                    source: None,
                }),
            }
        }
        .boxed()
        .shared();

        let observed = refresh.clone();
        let weak = Arc::downgrade(engine);
        engine.runtime.spawn(async move {
            let result = observed.clone().await;
            let Some(engine) = weak.upgrade() else { return };
            match result {
                Ok(bundle) => engine.complete_refresh(observed, &bundle),
                Err(error) => {
                    warn!(instance = %engine.name, %error, "credential refresh failed, retrying");
                    engine.replace_after_failure(observed);
                }
            }
        });

        refresh
    }

    /// One refresh cycle: rate-limit, fetch metadata and certificate in
    /// parallel, assemble the TLS configuration.
    async fn run_refresh(engine: Arc<Self>) -> Result<Arc<Bundle>, Error> {
        engine.limiter.acquire().await;
        debug!(instance = %engine.name, "refreshing instance credentials");

        let metadata_fut = fetch::fetch_metadata(engine.api.as_ref(), &engine.name);
        let minted_fut = async {
            let key_pair = engine.key_pair.clone().await?;
            fetch::fetch_ephemeral_certificate(
                engine.api.as_ref(),
                &engine.name,
                key_pair.as_ref(),
                engine.token_source.as_deref(),
            )
            .await
        };
        let (metadata, minted) = tokio::try_join!(metadata_fut, minted_fut)?;

        let key_pair = engine.key_pair.clone().await?;
        let client_config = tls::build_client_config(
            &engine.name,
            key_pair.private_key(),
            minted.certificate.clone(),
            metadata.server_ca.clone(),
            engine.iam_auth(),
        )?;

        let expires_at = effective_expiration(minted.not_after, minted.token_expires_at);
        debug!(instance = %engine.name, %expires_at, "assembled new credential bundle");

        Ok(Arc::new(Bundle {
            metadata,
            client_config,
            expires_at,
        }))
    }

    fn complete_refresh(self: &Arc<Self>, refresh: BundleFuture, bundle: &Bundle) {
        let delay = refresh_delay(bundle.expires_at, Utc::now(), self.iam_auth());
        let mut state = self.state();
        state.current = refresh;
        state.next = NextRefresh::Scheduled(self.schedule(delay));
    }

    fn replace_after_failure(self: &Arc<Self>, refresh: BundleFuture) {
        let mut state = self.state();
        let unusable = match state.current.peek() {
            None => true,
            Some(Err(_)) => true,
            Some(Ok(bundle)) => bundle.expires_at <= Utc::now(),
        };
        if unusable {
            // Surface the failure to readers instead of leaving them waiting
            // on an expired or unresolved value.
            state.current = refresh;
        }
        // Retry immediately; the rate limiter inside the refresh is the
        // effective backoff. Replacing `next` drops the previous scheduled
        // value, so failed refreshes never chain.
        state.next = NextRefresh::Started(Self::begin_refresh(self));
    }

    /// Arms the timer for the next refresh.
    fn schedule(self: &Arc<Self>, delay: Duration) -> ScheduledRefresh {
        let claimed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel::<BundleFuture>();
        let name = self.name.clone();
        let started: StartedFuture = async move {
            match rx.await {
                Ok(refresh) => Ok(refresh),
                Err(_) => Err(Error::Refresh {
                    name: name.to_string(),
                    context: "the scheduled refresh was cancelled".to_owned(),
                    source: None,
                }),
            }
        }
        .boxed()
        .shared();

        let flag = claimed.clone();
        let weak = Arc::downgrade(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if flag.swap(true, Ordering::AcqRel) {
                return; // pre-empted by a forced refresh
            }
            let Some(engine) = weak.upgrade() else { return };
            let _ = tx.send(Self::begin_refresh(&engine));
        });

        ScheduledRefresh { claimed, started }
    }
}

/// Effective bundle expiration: the certificate's `notAfter`, bounded by the
/// access token's expiry when IAM authentication is in use.
fn effective_expiration(
    cert_not_after: DateTime<Utc>,
    token_expires_at: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match token_expires_at {
        Some(token) if token < cert_not_after => token,
        _ => cert_not_after,
    }
}

/// Delay before refreshing a bundle that expires at `expires_at`.
///
/// Normally `expires_at - buffer`. A result already in the past clamps to
/// `expires_at - 5s`, and if that has passed too the refresh runs immediately.
fn refresh_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, iam_auth: bool) -> Duration {
    let buffer = if iam_auth {
        IAM_AUTH_REFRESH_BUFFER
    } else {
        DEFAULT_REFRESH_BUFFER
    };

    let until_expiry = expires_at.signed_duration_since(now);
    let mut delay = until_expiry - TimeDelta::seconds(i64::try_from(buffer.as_secs()).unwrap_or(0));
    if delay < TimeDelta::zero() {
        delay = until_expiry - TimeDelta::seconds(5);
    }
    delay.to_std().unwrap_or(Duration::ZERO)
}
