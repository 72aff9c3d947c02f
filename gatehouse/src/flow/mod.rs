use std::cell::RefCell;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::AbortHandle;

use crate::{
    dispatcher::{DispatchOutcome, Dispatcher, LinkSource},
    gatehouse_export,
    primitives::{
        logger::{LogContext, LOG_CONTEXT},
        FlowConfig, IdentityProvider, Navigator, ProfileStore, Session,
    },
    reconciler::{AuthState, Reconciler},
    session::{SessionNotification, SessionStore},
    AuthError,
};

enum Lifecycle {
    Idle,
    Running { pump: AbortHandle },
    Stopped,
}

/// Entry point of the native app into the deep-link session flow.
///
/// One instance lives as long as the app's root component. The host forwards every URL
/// activation and the actions of the reset and profile screens; the flow answers by
/// driving the [`Navigator`].
///
/// # Examples
///
/// ## Swift
///
/// ```swift
/// let flow = try AuthFlow(
///     provider: supabaseBridge,
///     profileStore: profiles,
///     navigator: router,
///     config: defaultFlowConfig(profileCheckFailure: .signOut)
/// )
/// _ = try await flow.start(initialUrl: launchOptions.url?.absoluteString)
///
/// // SceneDelegate
/// func scene(_ scene: UIScene, openURLContexts contexts: Set<UIOpenURLContext>) {
///     for context in contexts {
///         Task { try? await flow.handleUrl(url: context.url.absoluteString) }
///     }
/// }
/// ```
#[derive(uniffi::Object)]
pub struct AuthFlow {
    session_store: Arc<SessionStore>,
    reconciler: Arc<Reconciler>,
    dispatcher: Dispatcher,
    lifecycle: Mutex<Lifecycle>,
}

#[gatehouse_export]
impl AuthFlow {
    /// Wires the flow around the native collaborators. Nothing happens until
    /// [`AuthFlow::start`] is called.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if `config` is invalid
    #[uniffi::constructor]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profile_store: Arc<dyn ProfileStore>,
        navigator: Arc<dyn Navigator>,
        config: FlowConfig,
    ) -> Result<Arc<Self>, AuthError> {
        config.validate()?;
        crate::debug!(
            "flow.created scheme={} failure_policy={}",
            config.scheme,
            config.profile_check_failure
        );

        let session_store = Arc::new(SessionStore::new(provider));
        let reconciler = Reconciler::new(
            session_store.clone(),
            profile_store,
            navigator,
            &config,
        );
        let dispatcher = Dispatcher::new(&config, session_store.clone(), reconciler.clone());

        Ok(Arc::new(Self {
            session_store,
            reconciler,
            dispatcher,
            lifecycle: Mutex::new(Lifecycle::Idle),
        }))
    }

    /// Subscribes to session changes, restores the persisted session and processes the
    /// URL the app was launched with, if any.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if the flow was started or stopped before
    /// - any error of [`AuthFlow::handle_url`] for `initial_url`
    pub async fn start(&self, initial_url: Option<String>) -> Result<DispatchOutcome, AuthError> {
        {
            let mut lifecycle = self.lock_lifecycle();
            match *lifecycle {
                Lifecycle::Idle => {}
                Lifecycle::Running { .. } => {
                    return Err(AuthError::InvalidOperation(
                        "flow already started".to_string(),
                    ));
                }
                Lifecycle::Stopped => {
                    return Err(AuthError::InvalidOperation("flow stopped".to_string()));
                }
            }

            let (sender, receiver) = mpsc::unbounded_channel();
            self.session_store.subscribe(sender);
            let pump = tokio::spawn(Self::pump(
                self.session_store.clone(),
                self.reconciler.clone(),
                receiver,
            ));
            *lifecycle = Lifecycle::Running {
                pump: pump.abort_handle(),
            };
        }
        crate::info!("flow.started has_initial_url={}", initial_url.is_some());

        let restored = self.session_store.restore().await;
        self.reconciler.initial_session(restored);

        self.dispatcher
            .dispatch_optional(initial_url.as_deref(), LinkSource::ColdStart)
            .await
    }

    /// Processes a URL event received while the app is running.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if the flow is not running
    /// - `AuthError::MissingToken` if a reset or callback link lacks a token
    /// - `AuthError::CredentialRejected` if the provider refuses callback tokens
    pub async fn handle_url(&self, url: String) -> Result<DispatchOutcome, AuthError> {
        self.ensure_running()?;
        self.dispatcher.dispatch(&url, LinkSource::Live).await
    }

    /// Processes a URL handed over as a navigation route parameter. A link already seen
    /// through another channel is reported as [`DispatchOutcome::Duplicate`].
    ///
    /// # Errors
    /// Same as [`AuthFlow::handle_url`].
    pub async fn handle_route_url(&self, url: String) -> Result<DispatchOutcome, AuthError> {
        self.ensure_running()?;
        self.dispatcher.dispatch(&url, LinkSource::RouteParameter).await
    }

    /// Sets a new password using the staged reset tokens.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if the flow is not running or `password` is empty
    /// - `AuthError::MissingToken` if no reset link was staged
    /// - `AuthError::CredentialRejected` if the provider refuses the tokens or the password
    pub async fn complete_password_reset(&self, password: String) -> Result<(), AuthError> {
        self.ensure_running()?;
        self.dispatcher.complete_password_reset(&password).await
    }

    /// Leaves the reset screen without changing the password.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if the flow is not running
    pub async fn dismiss_password_reset(&self) -> Result<(), AuthError> {
        self.ensure_running()?;
        self.dispatcher.dismiss_password_reset();
        Ok(())
    }

    /// Re-checks the profile after the host saved it and returns the resulting state.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if the flow is not running, there is no session or
    ///   a password reset is pending
    /// - `AuthError::ProfileCheckFailure` if every attempt failed (the failure policy
    ///   has been applied)
    pub async fn profile_saved(&self) -> Result<AuthState, AuthError> {
        self.ensure_running()?;
        let Some(check) = self.reconciler.recheck() else {
            return Err(AuthError::InvalidOperation(
                "no session to check the profile for".to_string(),
            ));
        };
        match check.await {
            Ok(result) => result,
            Err(e) => {
                // superseded by a newer session change
                crate::debug!("flow.profile_check_cancelled error={e}");
                Ok(self.reconciler.state())
            }
        }
    }

    /// Signs the user out. The flow lands on `Auth` once the provider reports it.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if the flow is not running
    /// - `AuthError::Generic` if the provider could not sign out
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.ensure_running()?;
        self.session_store.sign_out().await
    }

    /// Current state of the flow.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.reconciler.state()
    }

    /// The visible session, if any.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.session_store.current()
    }

    /// Whether a reset link is staged and waiting for a new password.
    #[must_use]
    pub fn staged_reset_available(&self) -> bool {
        self.dispatcher.staged_reset_available()
    }

    /// Unsubscribes from the provider, stops background work and clears the staged
    /// reset tokens. Idempotent; the flow cannot be restarted.
    pub fn stop(&self) {
        self.teardown();
    }
}

impl AuthFlow {
    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self) -> Result<(), AuthError> {
        match *self.lock_lifecycle() {
            Lifecycle::Running { .. } => Ok(()),
            Lifecycle::Idle => Err(AuthError::InvalidOperation(
                "flow not started".to_string(),
            )),
            Lifecycle::Stopped => Err(AuthError::InvalidOperation("flow stopped".to_string())),
        }
    }

    /// Applies provider notifications in arrival order. The only writer of the visible
    /// session.
    async fn pump(
        session_store: Arc<SessionStore>,
        reconciler: Arc<Reconciler>,
        mut receiver: UnboundedReceiver<SessionNotification>,
    ) {
        LOG_CONTEXT
            .scope(RefCell::new(None), async move {
                let _ctx = LogContext::new("SessionPump");
                while let Some(notification) = receiver.recv().await {
                    session_store.apply(&notification);
                    reconciler.session_changed(notification.session);
                }
                crate::debug!("flow.pump_finished");
            })
            .await;
    }

    fn teardown(&self) {
        let previous = std::mem::replace(&mut *self.lock_lifecycle(), Lifecycle::Stopped);
        if matches!(previous, Lifecycle::Stopped) {
            return;
        }

        self.session_store.unsubscribe();
        if let Lifecycle::Running { pump } = previous {
            pump.abort();
        }
        self.reconciler.shutdown();
        self.dispatcher.clear_staging();
        crate::info!("flow.stopped");
    }
}

impl Drop for AuthFlow {
    fn drop(&mut self) {
        self.teardown();
    }
}
