//! Navigation reconciler.
//!
//! Translates the visible session and the answer of the [`ProfileStore`] into the screen
//! the user must land on. Profile checks run as background tasks tagged with a
//! generation number; a check whose generation is no longer current is aborted and its
//! answer ignored, so a sign-out racing an in-flight check always wins.
//!
//! Transitions are decided under the state lock but published afterwards: the intent
//! and the new state go into an outbox that a single drainer hands to the
//! [`Navigator`] with the lock released, in the order the transitions happened.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::{
    primitives::{
        logger::{LogContext, LOG_CONTEXT},
        navigator::navigate,
        FlowConfig, NavigationIntent, Navigator,
        ProfileCheckFailurePolicy, ProfileStore, ProfileStoreError, Screen, Session,
    },
    session::SessionStore,
    AuthError,
};

/// Where the flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum AuthState {
    /// The persisted session has not been restored yet.
    Loading,
    /// No session. The user is on `Auth`.
    Unauthenticated,
    /// A session exists and its profile is being checked.
    PendingProfileCheck,
    /// A session exists and its profile is complete. The user is on `Home`.
    AuthenticatedComplete,
    /// A session exists but has no profile. The user is on `ProfileSetup`.
    ProfileSetupRequired,
    /// A reset link was staged. The user is on `ResetPassword`.
    ResetPasswordPending,
}

impl AuthState {
    /// Returns the string representation used in log lines
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Unauthenticated => "unauthenticated",
            Self::PendingProfileCheck => "pending_profile_check",
            Self::AuthenticatedComplete => "authenticated_complete",
            Self::ProfileSetupRequired => "profile_setup_required",
            Self::ResetPasswordPending => "reset_password_pending",
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle on a spawned profile check. Resolves to the state the check led to.
pub type ProfileCheck = JoinHandle<Result<AuthState, AuthError>>;

struct Inner {
    state: AuthState,
    generation: u64,
    in_flight: Option<AbortHandle>,
    /// User whose profile was last checked (or is being checked).
    checked_user: Option<String>,
    outbox: VecDeque<(AuthState, Option<NavigationIntent>)>,
    /// Set while some caller is draining the outbox.
    draining: bool,
}

/// State machine mapping (session, profile completeness) to a screen.
pub struct Reconciler {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<AuthState>,
    session_store: Arc<SessionStore>,
    profile_store: Arc<dyn ProfileStore>,
    navigator: Arc<dyn Navigator>,
    failure_policy: ProfileCheckFailurePolicy,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Reconciler {
    /// Creates a reconciler in [`AuthState::Loading`].
    #[must_use]
    pub fn new(
        session_store: Arc<SessionStore>,
        profile_store: Arc<dyn ProfileStore>,
        navigator: Arc<dyn Navigator>,
        config: &FlowConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(AuthState::Loading);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: AuthState::Loading,
                generation: 0,
                in_flight: None,
                checked_user: None,
                outbox: VecDeque::new(),
                draining: false,
            }),
            state_tx,
            session_store,
            profile_store,
            navigator,
            failure_policy: config.profile_check_failure,
            max_attempts: config.profile_check_max_attempts.max(1),
            retry_delay: Duration::from_millis(config.profile_check_retry_delay_ms),
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.lock().state
    }

    /// Receiver notified on every transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(inner: &mut Inner, to: AuthState, intent: Option<NavigationIntent>) {
        if inner.state != to {
            crate::info!("reconciler.transition from={} to={to}", inner.state);
        }
        inner.state = to;
        inner.outbox.push_back((to, intent));
    }

    /// Issues queued transitions with the state lock released.
    ///
    /// Only one caller drains at a time; transitions queued meanwhile, including by a
    /// navigator calling back into the flow, are picked up by that drainer.
    fn publish(&self) {
        let mut inner = self.lock();
        if inner.draining {
            return;
        }
        inner.draining = true;
        loop {
            let Some((state, intent)) = inner.outbox.pop_front() else {
                break;
            };
            drop(inner);
            if let Some(intent) = intent {
                navigate(self.navigator.as_ref(), intent);
            }
            self.state_tx.send_replace(state);
            inner = self.lock();
        }
        inner.draining = false;
    }

    /// Invalidates the in-flight check, if any.
    fn cancel_check(inner: &mut Inner) {
        inner.generation += 1;
        if let Some(handle) = inner.in_flight.take() {
            handle.abort();
            crate::debug!("reconciler.check_aborted generation={}", inner.generation);
        }
    }

    fn sign_in_required(inner: &mut Inner) {
        Self::cancel_check(inner);
        inner.checked_user = None;
        Self::transition(
            inner,
            AuthState::Unauthenticated,
            Some(NavigationIntent::reset(Screen::Auth)),
        );
    }

    /// Outcome of restoring the persisted session. Only acts while loading.
    pub fn initial_session(self: &Arc<Self>, session: Option<Session>) {
        {
            let mut inner = self.lock();
            if inner.state != AuthState::Loading {
                crate::debug!("reconciler.initial_session_ignored state={}", inner.state);
                return;
            }
            match session {
                Some(session) => {
                    self.begin_check(&mut inner, &session);
                }
                None => Self::sign_in_required(&mut inner),
            }
        }
        self.publish();
    }

    /// A session notification was applied to the session store.
    pub fn session_changed(self: &Arc<Self>, session: Option<Session>) {
        {
            let mut inner = self.lock();
            match (inner.state, session) {
                (AuthState::ResetPasswordPending, _) => {
                    crate::debug!("reconciler.session_change_deferred reason=reset_pending");
                }
                // while loading the restore decides
                (AuthState::Loading | AuthState::Unauthenticated, None) => {}
                (_, None) => Self::sign_in_required(&mut inner),
                (state, Some(session)) => {
                    let same_user =
                        inner.checked_user.as_deref() == Some(session.user_id.as_str());
                    if same_user
                        && state != AuthState::Unauthenticated
                        && state != AuthState::Loading
                    {
                        crate::trace!("reconciler.session_refreshed user_id={}", session.user_id);
                        return;
                    }
                    self.begin_check(&mut inner, &session);
                }
            }
        }
        self.publish();
    }

    /// A session was installed from deep link tokens.
    ///
    /// Ends loading if the restore is still in progress. Otherwise the provider's
    /// notification for the exchange drives the transition, in order with the
    /// notifications queued before it.
    pub fn session_established(self: &Arc<Self>, session: Session) {
        {
            let mut inner = self.lock();
            if inner.state != AuthState::Loading {
                return;
            }
            self.begin_check(&mut inner, &session);
        }
        self.publish();
    }

    /// A reset link was staged: pushes `ResetPassword` and defers session changes.
    pub fn enter_reset(&self) {
        {
            let mut inner = self.lock();
            if inner.state == AuthState::ResetPasswordPending {
                crate::debug!("reconciler.reset_already_pending");
                return;
            }
            Self::cancel_check(&mut inner);
            inner.checked_user = None;
            Self::transition(
                &mut inner,
                AuthState::ResetPasswordPending,
                Some(NavigationIntent::push(Screen::ResetPassword)),
            );
        }
        self.publish();
    }

    /// The reset completed or was dismissed: reconciles against the latest session.
    pub fn leave_reset(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.state != AuthState::ResetPasswordPending {
                return;
            }
            match self.session_store.latest() {
                Some(session) => {
                    self.begin_check(&mut inner, &session);
                }
                None => Self::sign_in_required(&mut inner),
            }
        }
        self.publish();
    }

    /// Runs a fresh profile check for the current session, even if the same user was
    /// checked before.
    ///
    /// Returns `None` when there is no session or a reset is pending.
    pub fn recheck(self: &Arc<Self>) -> Option<ProfileCheck> {
        let check = {
            let mut inner = self.lock();
            if inner.state == AuthState::ResetPasswordPending {
                crate::debug!("reconciler.recheck_ignored reason=reset_pending");
                return None;
            }
            let Some(session) = self.session_store.latest() else {
                crate::debug!("reconciler.recheck_ignored reason=no_session");
                return None;
            };
            self.begin_check(&mut inner, &session)
        };
        self.publish();
        Some(check)
    }

    /// Aborts the in-flight check. Results arriving afterwards are ignored.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        Self::cancel_check(&mut inner);
    }

    fn begin_check(self: &Arc<Self>, inner: &mut Inner, session: &Session) -> ProfileCheck {
        Self::cancel_check(inner);
        let generation = inner.generation;
        let user_id = session.user_id.clone();
        inner.checked_user = Some(user_id.clone());
        Self::transition(inner, AuthState::PendingProfileCheck, None);
        crate::debug!("reconciler.check_started user_id={user_id} generation={generation}");

        let this = Arc::clone(self);
        let handle = tokio::spawn(LOG_CONTEXT.scope(RefCell::new(None), async move {
            let _ctx = LogContext::new("Reconciler");
            let outcome = this.query_profile(&user_id).await;
            this.resolve_check(generation, outcome).await
        }));
        inner.in_flight = Some(handle.abort_handle());
        handle
    }

    async fn query_profile(&self, user_id: &str) -> Result<bool, ProfileStoreError> {
        let mut attempt = 1;
        loop {
            match self.profile_store.exists(user_id.to_string()).await {
                Ok(exists) => return Ok(exists),
                Err(e) if attempt < self.max_attempts => {
                    crate::warn!(
                        "reconciler.check_attempt_failed attempt={attempt} max_attempts={} error={e}",
                        self.max_attempts
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn resolve_check(
        &self,
        generation: u64,
        outcome: Result<bool, ProfileStoreError>,
    ) -> Result<AuthState, AuthError> {
        let (state, failure) = {
            let mut inner = self.lock();
            if inner.generation != generation {
                crate::debug!(
                    "reconciler.check_result_ignored generation={generation} current={}",
                    inner.generation
                );
                return Ok(inner.state);
            }
            inner.in_flight = None;

            let failure = match outcome {
                Ok(true) => {
                    Self::complete(&mut inner);
                    None
                }
                Ok(false) => {
                    Self::setup_required(&mut inner);
                    None
                }
                Err(e) => {
                    crate::error!(
                        "reconciler.check_failed policy={} error={e}",
                        self.failure_policy
                    );
                    match self.failure_policy {
                        ProfileCheckFailurePolicy::AssumeComplete => Self::complete(&mut inner),
                        ProfileCheckFailurePolicy::AssumeIncomplete => {
                            Self::setup_required(&mut inner);
                        }
                        ProfileCheckFailurePolicy::SignOut => {}
                    }
                    Some(e.to_string())
                }
            };
            (inner.state, failure)
        };
        self.publish();

        let Some(reason) = failure else {
            return Ok(state);
        };
        if self.failure_policy == ProfileCheckFailurePolicy::SignOut {
            // the sign-out notification moves the state to Unauthenticated
            if let Err(e) = self.session_store.sign_out().await {
                crate::error!("reconciler.sign_out_failed error={e}");
                {
                    let mut inner = self.lock();
                    if inner.generation == generation {
                        Self::sign_in_required(&mut inner);
                    }
                }
                self.publish();
            }
        }
        Err(AuthError::ProfileCheckFailure { reason })
    }

    fn complete(inner: &mut Inner) {
        Self::transition(
            inner,
            AuthState::AuthenticatedComplete,
            Some(NavigationIntent::reset(Screen::Home)),
        );
    }

    fn setup_required(inner: &mut Inner) {
        Self::transition(
            inner,
            AuthState::ProfileSetupRequired,
            Some(NavigationIntent::reset(Screen::ProfileSetup)),
        );
    }
}
