use std::{
    error, fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use arc_swap::ArcSwapOption;
use arm_clock::{Clock, System};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    acquirer::{IdentityClient, TokenAcquirer},
    cache::TokenCache,
    config::AuthConfig,
    error::{self as errors, AcquisitionError},
    stores::SessionStore,
    AccessToken,
};

type Outcome = Option<Result<AccessToken, AcquisitionError>>;

/// Keeps a management API token available for one authenticated subject
///
/// The current token is held in memory and mirrored into a session store.
/// When neither holds a valid token, a new one is acquired from the identity
/// provider. At most one acquisition runs at a time: concurrent callers, and
/// the background refresh, all wait on the same attempt and share its
/// outcome.
///
/// Every successful acquisition schedules the next one after the configured
/// refresh interval, so the token is replaced periodically for as long as the
/// manager lives. Only one refresh is ever pending. A failed refresh is
/// logged and ends the chain until a caller acquires a token again.
///
/// Handles are cheap to clone and share the same state. Dropping the last
/// handle cancels the pending refresh.
pub struct TokenLifecycleManager<I, C = System> {
    inner: Arc<Inner<I, C>>,
}

struct Inner<I, C> {
    config: AuthConfig,
    clock: C,
    acquirer: TokenAcquirer<I, C>,
    cache: TokenCache<C>,
    current: ArcSwapOption<AccessToken>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    in_flight: Option<watch::Receiver<Outcome>>,
    refresh: Option<JoinHandle<()>>,
    refreshes_scheduled: u64,
    clears_started: u64,
    clears_finished: u64,
}

impl State {
    /// Identifies the clears seen so far, or `None` while one is underway
    ///
    /// A token read from the session store may only be adopted if the epoch is
    /// the same before the read and after it.
    fn clear_epoch(&self) -> Option<u64> {
        (self.clears_started == self.clears_finished).then_some(self.clears_started)
    }
}

enum Pending {
    Ready(AccessToken),
    Waiting(watch::Receiver<Outcome>),
}

impl<I> TokenLifecycleManager<I, System>
where
    I: IdentityClient + 'static,
{
    /// Constructs a new manager using the system clock
    pub fn new(client: I, store: Arc<dyn SessionStore>, config: AuthConfig) -> Self {
        Self::new_with_clock(client, store, config, System)
    }
}

impl<I, C> TokenLifecycleManager<I, C>
where
    I: IdentityClient + 'static,
    C: Clock + Clone + 'static,
{
    /// Constructs a new manager using the given clock
    pub fn new_with_clock(
        client: I,
        store: Arc<dyn SessionStore>,
        config: AuthConfig,
        clock: C,
    ) -> Self {
        let cache = TokenCache::new(store, config.storage_key(), clock.clone());
        let acquirer = TokenAcquirer::new(client, clock.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                acquirer,
                cache,
                current: ArcSwapOption::empty(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Gets a valid access token, acquiring one if necessary
    ///
    /// The in-memory token is returned if it is still valid. Otherwise a valid
    /// token from the session store is adopted. Failing both, a new token is
    /// acquired, which may prompt the user.
    ///
    /// # Errors
    ///
    /// Returns an error if a token had to be acquired and the identity
    /// provider did not issue one. Nothing is retried automatically.
    pub async fn get_access_token(&self) -> Result<AccessToken, AcquisitionError> {
        let inner = &self.inner;

        if let Some(token) = inner.valid_current() {
            tracing::trace!("using in-memory access token");
            return Ok(token);
        }

        let epoch = inner.lock_state().clear_epoch();
        if let Some(token) = inner.cache.load().await {
            if token.is_expired_with_clock(&inner.clock) {
                tracing::debug!(expires_at = ?token.expires_at(), "persisted access token is expired");
            } else if inner.adopt(&token, epoch) {
                tracing::debug!(expires_at = ?token.expires_at(), "adopted persisted access token");
                return Ok(token);
            } else {
                tracing::debug!("access token cleared while reading session store, discarding persisted token");
            }
        }

        match inner.join_or_start_acquisition(true) {
            Pending::Ready(token) => Ok(token),
            Pending::Waiting(rx) => wait_for_outcome(rx).await,
        }
    }

    /// Gets a valid access token serialized as an `Authorization` header value
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`get_access_token()`](Self::get_access_token).
    pub async fn get_access_token_as_string(&self) -> Result<String, AcquisitionError> {
        self.get_access_token().await.map(|token| token.to_string())
    }

    /// Replaces the current token and persists it
    ///
    /// An expired token is rejected with a warning and leaves the current state
    /// untouched.
    pub async fn set_access_token(&self, token: AccessToken) {
        self.inner.install(token).await
    }

    /// Forgets the current token
    ///
    /// Drops the in-memory token, cancels any pending refresh and removes the
    /// persisted entry. An acquisition already in flight is not cancelled and
    /// will install its token when it completes.
    pub async fn clear_access_token(&self) {
        let pending_refresh = {
            let mut state = self.inner.lock_state();
            state.clears_started += 1;
            self.inner.current.store(None);
            state.refresh.take()
        };

        let _finished = ClearFinished(&self.inner.state);

        if let Some(refresh) = pending_refresh {
            refresh.abort();
            tracing::debug!("cancelled pending token refresh");
        }

        if let Err(error) = self.inner.cache.clear().await {
            tracing::warn!(error = (&error as &dyn error::Error), "unable to remove persisted access token");
        }
    }

    /// Whether a valid access token is available
    ///
    /// This is not a pure check. Like [`get_access_token()`](Self::get_access_token),
    /// it may acquire a new token and so may wait on the user.
    pub async fn is_authenticated(&self) -> bool {
        match self.get_access_token().await {
            Ok(token) => !token.is_expired_with_clock(&self.inner.clock),
            Err(error) => {
                tracing::debug!(error = (&error as &dyn error::Error), "not authenticated");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn current_token(&self) -> Option<AccessToken> {
        self.inner.current.load_full().map(|token| (*token).clone())
    }

    #[cfg(test)]
    pub(crate) fn has_pending_refresh(&self) -> bool {
        self.inner.lock_state().refresh.is_some()
    }
}

impl<I, C> Inner<I, C>
where
    I: IdentityClient + 'static,
    C: Clock + Clone + 'static,
{
    /// Installs a token read from the session store, unless a clear overlapped the read
    fn adopt(&self, token: &AccessToken, epoch: Option<u64>) -> bool {
        let state = self.lock_state();
        if epoch.is_none() || state.clear_epoch() != epoch {
            return false;
        }

        self.current.store(Some(Arc::new(token.clone())));
        true
    }

    fn valid_current(&self) -> Option<AccessToken> {
        self.current
            .load_full()
            .filter(|token| !token.is_expired_with_clock(&self.clock))
            .map(|token| (*token).clone())
    }

    /// Joins the acquisition in flight, or starts one if there is none
    ///
    /// When `reuse_valid` is set, a token that became valid while the caller
    /// was consulting the session store is returned instead.
    fn join_or_start_acquisition(self: &Arc<Self>, reuse_valid: bool) -> Pending {
        let mut state = self.lock_state();

        if reuse_valid {
            if let Some(token) = self.valid_current() {
                return Pending::Ready(token);
            }
        }

        if let Some(rx) = &state.in_flight {
            if rx.has_changed().is_ok() {
                tracing::trace!("joining acquisition in flight");
                return Pending::Waiting(rx.clone());
            }
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(rx.clone());
        drop(state);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner.acquire_and_install().await;
            if let Err(error) = &outcome {
                tracing::warn!(error = (error as &dyn error::Error), "unable to acquire access token");
            }

            inner.lock_state().in_flight = None;
            tx.send_replace(Some(outcome));
        });

        Pending::Waiting(rx)
    }

    async fn acquire_and_install(self: &Arc<Self>) -> Result<AccessToken, AcquisitionError> {
        tracing::debug!("acquiring access token");
        let acquisition = self.acquirer.acquire(self.config.scopes()).await?;
        tracing::debug!(
            interactive = acquisition.is_interactive(),
            "access token acquired"
        );

        let token = acquisition.into_token();
        self.install(token.clone()).await;
        self.schedule_refresh();
        Ok(token)
    }

    async fn install(&self, token: AccessToken) {
        if token.is_expired_with_clock(&self.clock) {
            tracing::warn!(expires_at = ?token.expires_at(), "cannot set expired access token");
            return;
        }

        self.current.store(Some(Arc::new(token.clone())));

        match self.cache.save(&token).await {
            Ok(()) => tracing::trace!("persisted access token"),
            Err(error) => {
                tracing::warn!(error = (&error as &dyn error::Error), "unable to persist access token")
            }
        }
    }

    /// Schedules the next acquisition, superseding any pending one
    fn schedule_refresh(self: &Arc<Self>) {
        let interval = self.config.refresh_interval();
        let weak = Arc::downgrade(self);

        let mut state = self.lock_state();
        state.refreshes_scheduled += 1;
        let serial = state.refreshes_scheduled;

        let refresh = tokio::spawn(async move {
            tokio::time::sleep(interval).await;

            match weak.upgrade() {
                Some(inner) => {
                    tracing::debug!("refresh interval elapsed, refreshing access token");
                    {
                        let mut state = inner.lock_state();
                        if state.refreshes_scheduled == serial {
                            state.refresh = None;
                        }
                    }
                    let _pending = inner.join_or_start_acquisition(false);
                }
                None => tracing::info!("token manager dropped, halting refreshes"),
            }
        });

        if let Some(previous) = state.refresh.replace(refresh) {
            previous.abort();
        }
        drop(state);

        tracing::debug!(
            delay_secs = interval.as_secs(),
            "scheduled token refresh"
        );
    }
}

impl<I, C> Inner<I, C> {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a clear as finished, even if the clearing future is dropped early
struct ClearFinished<'a>(&'a Mutex<State>);

impl Drop for ClearFinished<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        state.clears_finished += 1;
    }
}

impl<I, C> Drop for Inner<I, C> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(refresh) = state.refresh.take() {
            refresh.abort();
        }
    }
}

async fn wait_for_outcome(
    mut rx: watch::Receiver<Outcome>,
) -> Result<AccessToken, AcquisitionError> {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
    };

    outcome.unwrap_or_else(|| Err(errors::acquisition_abandoned()))
}

impl<I, C> Clone for TokenLifecycleManager<I, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, C> fmt::Debug for TokenLifecycleManager<I, C>
where
    I: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("config", &self.inner.config)
            .field("acquirer", &self.inner.acquirer)
            .field("cache", &self.inner.cache)
            .field("current", &self.inner.current.load_full())
            .finish()
    }
}
