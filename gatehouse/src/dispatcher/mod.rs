//! Deep link dispatcher.
//!
//! Every activation channel (cold start URL, live URL events, navigation route
//! parameter) ends up in [`Dispatcher::dispatch`]. A link delivered through several
//! channels is processed once, whichever delivery arrives first. Opening the link again
//! later is a new activation: a delivery that failed, or a reset link whose screen was
//! closed, is processed again.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    link::{classify_link, try_extract_tokens, LinkIntent, TokenPair},
    primitives::{FlowConfig, TokenPrecedence},
    reconciler::Reconciler,
    session::{SessionExchange, SessionStore},
    AuthError,
};

/// Channel an activation URL arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    /// The URL the app was launched with.
    ColdStart,
    /// A URL event received while running.
    Live,
    /// A URL handed over as a navigation route parameter.
    RouteParameter,
}

impl LinkSource {
    /// Returns the string representation used in log lines
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ColdStart => "cold_start",
            Self::Live => "live",
            Self::RouteParameter => "route_parameter",
        }
    }
}

/// What happened to an activation URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum DispatchOutcome {
    /// Not a registered link (or nothing to act on). Nothing changed.
    Ignored,
    /// The link was already processed through another channel.
    Duplicate,
    /// Reset tokens were staged and `ResetPassword` was pushed.
    ResetStaged,
    /// The callback tokens were exchanged for a session.
    SessionEstablished,
    /// A fresh profile check was started for the current session.
    ProfileCheckRequested,
}

/// Hashes of recently processed URLs. Raw URLs are not kept since they carry tokens.
struct RecentLinks {
    capacity: usize,
    window: TimeDelta,
    seen: HashMap<u64, DateTime<Utc>>,
    /// Keys in processing order, oldest first.
    order: VecDeque<u64>,
}

fn link_key(url: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    hasher.finish()
}

impl RecentLinks {
    fn new(capacity: usize, window: TimeDelta) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Records `key` as processed at `now`. Returns `false` if it was processed less
    /// than one window ago.
    fn claim(&mut self, key: u64, now: DateTime<Utc>) -> bool {
        self.expire(now);
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, now);
        self.order.push_back(key);

        while self.order.len() > self.capacity {
            if let Some(dropped) = self.order.pop_front() {
                self.seen.remove(&dropped);
            }
        }
        true
    }

    /// Lets the next delivery of `key` through.
    fn forget(&mut self, key: u64) {
        if self.seen.remove(&key).is_some() {
            self.order.retain(|k| *k != key);
        }
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        while let Some(&key) = self.order.front() {
            match self.seen.get(&key) {
                Some(&at) if now - at < self.window => break,
                _ => {
                    self.order.pop_front();
                    self.seen.remove(&key);
                }
            }
        }
    }
}

/// Reset tokens held until the user submits a new password or dismisses the screen.
struct StagedReset {
    pair: TokenPair,
    /// Dedupe key of the link that staged the pair.
    link: u64,
    staged_at: DateTime<Utc>,
}

/// Routes activation URLs to the session store and the reconciler.
pub struct Dispatcher {
    scheme: String,
    precedence: TokenPrecedence,
    session_store: Arc<SessionStore>,
    reconciler: Arc<Reconciler>,
    recent: Mutex<RecentLinks>,
    staged: Mutex<Option<StagedReset>>,
}

impl Dispatcher {
    /// Creates a dispatcher with an empty dedupe cache and nothing staged.
    #[must_use]
    pub fn new(
        config: &FlowConfig,
        session_store: Arc<SessionStore>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            scheme: config.scheme.clone(),
            precedence: config.token_precedence,
            session_store,
            reconciler,
            recent: Mutex::new(RecentLinks::new(
                config.dedupe_capacity as usize,
                dedupe_window(config.dedupe_window_ms),
            )),
            staged: Mutex::new(None),
        }
    }

    /// Processes an optional activation URL. `None` is a no-op.
    ///
    /// # Errors
    /// See [`Dispatcher::dispatch`].
    pub async fn dispatch_optional(
        &self,
        url: Option<&str>,
        source: LinkSource,
    ) -> Result<DispatchOutcome, AuthError> {
        match url {
            Some(url) => self.dispatch(url, source).await,
            None => Ok(DispatchOutcome::Ignored),
        }
    }

    /// Processes one activation URL.
    ///
    /// # Errors
    /// - `AuthError::MissingToken` if a reset or callback link lacks a token
    /// - `AuthError::CredentialRejected` if the provider refuses callback tokens
    pub async fn dispatch(
        &self,
        url: &str,
        source: LinkSource,
    ) -> Result<DispatchOutcome, AuthError> {
        let url = url.trim();
        let intent = classify_link(url, &self.scheme);
        if intent == LinkIntent::Unrecognized {
            crate::debug!("dispatcher.link_ignored source={}", source.as_str());
            return Ok(DispatchOutcome::Ignored);
        }

        let link = link_key(url);
        let first_delivery = self
            .recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .claim(link, Utc::now());
        if !first_delivery {
            crate::info!(
                "dispatcher.link_duplicate intent={intent} source={}",
                source.as_str()
            );
            return Ok(DispatchOutcome::Duplicate);
        }
        crate::info!(
            "dispatcher.link_received intent={intent} source={}",
            source.as_str()
        );

        let outcome = match intent {
            LinkIntent::PasswordReset => self.stage_reset(url, link),
            LinkIntent::AuthCallback => self.exchange_callback(url).await,
            LinkIntent::ProfileSetupDirect => Ok(self.request_profile_check()),
            LinkIntent::Unrecognized => Ok(DispatchOutcome::Ignored),
        };
        if let Err(e) = &outcome {
            crate::warn!("dispatcher.link_failed intent={intent} error={e}");
            self.forget_link(link);
        }
        outcome
    }

    fn forget_link(&self, link: u64) {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .forget(link);
    }

    fn stage_reset(&self, url: &str, link: u64) -> Result<DispatchOutcome, AuthError> {
        let pair = try_extract_tokens(url, self.precedence)?;
        pair.complete()?;

        let replaced = self
            .staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(StagedReset {
                pair,
                link,
                staged_at: Utc::now(),
            });
        if let Some(replaced) = replaced {
            self.forget_link(replaced.link);
        }
        self.reconciler.enter_reset();
        Ok(DispatchOutcome::ResetStaged)
    }

    async fn exchange_callback(&self, url: &str) -> Result<DispatchOutcome, AuthError> {
        let pair = try_extract_tokens(url, self.precedence)?;
        match self.session_store.set_session(&pair).await? {
            SessionExchange::Established(session) | SessionExchange::AlreadyCurrent(session) => {
                self.reconciler.session_established(session);
                Ok(DispatchOutcome::SessionEstablished)
            }
            SessionExchange::Superseded => Ok(DispatchOutcome::Duplicate),
        }
    }

    fn request_profile_check(&self) -> DispatchOutcome {
        if self.reconciler.recheck().is_some() {
            DispatchOutcome::ProfileCheckRequested
        } else {
            crate::info!("dispatcher.profile_setup_link_dropped reason=no_session");
            DispatchOutcome::Ignored
        }
    }

    /// Returns whether reset tokens are staged.
    #[must_use]
    pub fn staged_reset_available(&self) -> bool {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Exchanges the staged reset tokens and sets `password` as the new credential.
    ///
    /// On success the staging is cleared and the reconciler leaves the reset state. On
    /// failure the staging is kept so the user can try again, and a rejected password
    /// puts the session that was visible before the exchange back.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if `password` is empty
    /// - `AuthError::MissingToken` if no reset tokens are staged
    /// - `AuthError::CredentialRejected` if the provider refuses the tokens or the password
    pub async fn complete_password_reset(&self, password: &str) -> Result<(), AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidOperation(
                "new password must not be empty".to_string(),
            ));
        }

        let (pair, staged_at) = {
            let staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
            let staged = staged.as_ref().ok_or_else(|| AuthError::MissingToken {
                missing: TokenPair::default().missing(),
            })?;
            (staged.pair.clone(), staged.staged_at)
        };
        crate::debug!(
            "dispatcher.reset_submitted staged_for_secs={}",
            (Utc::now() - staged_at).num_seconds()
        );

        let prior = self.session_store.latest();
        let session = match self.session_store.set_session(&pair).await? {
            SessionExchange::Established(session) | SessionExchange::AlreadyCurrent(session) => {
                session
            }
            SessionExchange::Superseded => {
                return Err(AuthError::CredentialRejected {
                    reason: "reset link session is no longer current".to_string(),
                });
            }
        };
        if let Err(e) = self.session_store.update_credential(password).await {
            let same_user = prior
                .as_ref()
                .is_some_and(|prior| prior.user_id == session.user_id);
            if !same_user {
                if let Err(revert) = self.session_store.revert(prior.as_ref()).await {
                    crate::error!("dispatcher.reset_revert_failed error={revert}");
                }
            }
            return Err(e);
        }

        self.clear_staging();
        crate::info!("dispatcher.reset_completed user_id={}", session.user_id);
        self.reconciler.leave_reset();
        Ok(())
    }

    /// Drops the staged reset tokens without touching the session.
    pub fn dismiss_password_reset(&self) {
        self.clear_staging();
        crate::info!("dispatcher.reset_dismissed");
        self.reconciler.leave_reset();
    }

    /// Drops the staged reset tokens, if any. The link that staged them can be opened
    /// again.
    pub fn clear_staging(&self) {
        let staged = self
            .staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(staged) = staged {
            self.forget_link(staged.link);
        }
    }
}

fn dedupe_window(window_ms: u64) -> TimeDelta {
    i64::try_from(window_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX)
}
