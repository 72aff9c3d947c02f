//! Owner of the visible session.
//!
//! The [`SessionStore`] holds exactly one provider subscription. Notifications are not
//! applied from the provider's callback: the [`ForwardingListener`] pushes them onto a
//! channel and a single pump task (owned by the flow) applies them in arrival order, so
//! the visible session always follows notification order even when `set_session` calls
//! are in flight.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Context;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    gatehouse_error::AnyhowErrorExt,
    link::TokenPair,
    primitives::{
        IdentityProvider, IdentityProviderError, Session, SessionChangeEvent,
        SessionChangeListener,
    },
    AuthError,
};

/// A session replacement reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotification {
    /// Why the session changed.
    pub event: SessionChangeEvent,
    /// The new session, `None` once signed out.
    pub session: Option<Session>,
}

/// Result of [`SessionStore::set_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExchange {
    /// The provider accepted the tokens and installed this session.
    Established(Session),
    /// The same pair was exchanged before and its session is still the current one.
    /// The provider was not called again.
    AlreadyCurrent(Session),
    /// The same pair was exchanged before but a later notification replaced its
    /// session. The provider was not called again.
    Superseded,
}

/// Listener handed to the provider. Forwards every notification to the pump.
pub struct ForwardingListener {
    sender: UnboundedSender<SessionNotification>,
}

impl SessionChangeListener for ForwardingListener {
    fn on_session_change(&self, event: SessionChangeEvent, session: Option<Session>) {
        crate::debug!(
            "session.notification_received event={event} has_session={}",
            session.is_some()
        );
        if self
            .sender
            .send(SessionNotification { event, session })
            .is_err()
        {
            crate::debug!("session.notification_dropped reason=pump_stopped event={event}");
        }
    }
}

#[derive(Default)]
struct VisibleSession {
    current: Option<Session>,
    /// Number of notifications applied so far.
    applied: u64,
    /// Session returned by the last exchange, until the next notification is applied.
    exchanged: Option<Session>,
}

/// The pair most recently accepted by the provider.
struct LastExchange {
    pair: TokenPair,
    session: Session,
    /// Value of `VisibleSession::applied` right after the exchange completed.
    applied_at: u64,
}

/// Process-wide owner of the current [`Session`].
pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    visible: RwLock<VisibleSession>,
    subscription: Mutex<Option<u64>>,
    // held across the provider call, serializes exchanges
    last_exchange: tokio::sync::Mutex<Option<LastExchange>>,
}

impl SessionStore {
    /// Creates a store without a session and without a subscription.
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            visible: RwLock::new(VisibleSession::default()),
            subscription: Mutex::new(None),
            last_exchange: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns the visible session.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.visible
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Returns the session a caller should reconcile against: the visible session, or
    /// the session of an exchange whose notification the pump has not applied yet.
    #[must_use]
    pub fn latest(&self) -> Option<Session> {
        let visible = self.visible.read().unwrap_or_else(PoisonError::into_inner);
        visible
            .exchanged
            .clone()
            .or_else(|| visible.current.clone())
    }

    /// Returns whether the store currently holds a provider subscription.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Registers the single change listener, forwarding notifications to `sender`.
    ///
    /// Calling it again while subscribed does nothing and returns `false`.
    pub fn subscribe(&self, sender: UnboundedSender<SessionNotification>) -> bool {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscription.is_some() {
            crate::debug!("session.subscribe_skipped reason=already_subscribed");
            return false;
        }

        let listener = Arc::new(ForwardingListener { sender });
        let id = self.provider.subscribe_to_session_changes(listener);
        *subscription = Some(id);
        crate::info!("session.subscribed subscription_id={id}");
        true
    }

    /// Removes the listener. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        let id = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.provider.unsubscribe(id);
            crate::info!("session.unsubscribed subscription_id={id}");
        }
    }

    /// Makes a notification visible. Only the pump calls this.
    pub fn apply(&self, notification: &SessionNotification) {
        let mut visible = self.visible.write().unwrap_or_else(PoisonError::into_inner);
        visible.current.clone_from(&notification.session);
        visible.applied += 1;
        visible.exchanged = None;
        crate::debug!(
            "session.applied event={} has_session={} applied={}",
            notification.event,
            visible.current.is_some(),
            visible.applied
        );
    }

    /// Loads the persisted session from the provider.
    ///
    /// A provider error is logged and treated as "no session". If a notification was
    /// applied while the provider was answering, the notification wins. Returns the
    /// session visible afterwards.
    pub async fn restore(&self) -> Option<Session> {
        let applied_before = self
            .visible
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .applied;

        let restored = match self
            .provider
            .get_current_session()
            .await
            .context("restoring persisted session")
        {
            Ok(session) => session,
            Err(e) => {
                crate::warn!("session.restore_failed error={}", e.to_generic_message());
                None
            }
        };

        let mut visible = self.visible.write().unwrap_or_else(PoisonError::into_inner);
        if visible.applied == applied_before {
            visible.current = restored;
        } else {
            crate::debug!("session.restore_superseded applied={}", visible.applied);
        }
        crate::info!("session.restored has_session={}", visible.current.is_some());
        visible.current.clone()
    }

    /// Exchanges a complete token pair for a session.
    ///
    /// Exchanges are serialized. Replaying the pair of the previous successful exchange
    /// does not reach the provider a second time.
    ///
    /// # Errors
    /// - `AuthError::MissingToken` if the pair is incomplete; the provider is not called
    /// - `AuthError::CredentialRejected` if the provider refuses the tokens
    /// - `AuthError::Generic` for any other provider failure
    pub async fn set_session(&self, pair: &TokenPair) -> Result<SessionExchange, AuthError> {
        let (access_token, refresh_token) = pair.complete()?;

        let mut last_exchange = self.last_exchange.lock().await;
        if let Some(last) = last_exchange.as_ref().filter(|last| last.pair == *pair) {
            let visible = self.visible.read().unwrap_or_else(PoisonError::into_inner);
            let still_current = visible.current.as_ref() == Some(&last.session)
                || visible.applied == last.applied_at;
            return Ok(if still_current {
                crate::debug!("session.exchange_skipped reason=already_current");
                SessionExchange::AlreadyCurrent(last.session.clone())
            } else {
                crate::debug!("session.exchange_skipped reason=superseded");
                SessionExchange::Superseded
            });
        }

        let session = self
            .provider
            .set_session(access_token.to_string(), refresh_token.to_string())
            .await
            .map_err(provider_error)?;

        let applied_at = {
            let mut visible = self.visible.write().unwrap_or_else(PoisonError::into_inner);
            visible.exchanged = Some(session.clone());
            visible.applied
        };
        *last_exchange = Some(LastExchange {
            pair: pair.clone(),
            session: session.clone(),
            applied_at,
        });
        crate::info!("session.established user_id={}", session.user_id);
        Ok(SessionExchange::Established(session))
    }

    /// Puts `prior` back after an exchange whose follow-up step failed.
    ///
    /// The provider receives the tokens of `prior` again, or a sign-out when there was
    /// no session or `prior` could not be re-installed. The replay record is dropped so
    /// the next exchange of any pair reaches the provider.
    ///
    /// # Errors
    /// - `AuthError::Generic` if the provider could not sign out
    pub async fn revert(&self, prior: Option<&Session>) -> Result<(), AuthError> {
        let mut last_exchange = self.last_exchange.lock().await;
        *last_exchange = None;

        if let Some(prior) = prior {
            match self
                .provider
                .set_session(prior.access_token.clone(), prior.refresh_token.clone())
                .await
            {
                Ok(session) => {
                    crate::info!("session.reverted user_id={}", session.user_id);
                    self.visible
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .exchanged = Some(session);
                    return Ok(());
                }
                Err(e) => {
                    crate::warn!(
                        "session.revert_failed user_id={} error={e}",
                        prior.user_id
                    );
                }
            }
        }

        self.visible
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .exchanged = None;
        self.provider.sign_out().await.map_err(provider_error)?;
        crate::info!("session.reverted has_session=false");
        Ok(())
    }

    /// Changes the password of the current user.
    ///
    /// # Errors
    /// - `AuthError::CredentialRejected` if the provider refuses the update
    /// - `AuthError::Generic` for any other provider failure
    pub async fn update_credential(&self, password: &str) -> Result<(), AuthError> {
        self.provider
            .update_credential(password.to_string())
            .await
            .map_err(provider_error)?;
        crate::info!("session.credential_updated");
        Ok(())
    }

    /// Signs out through the provider. The resulting notification clears the session.
    ///
    /// # Errors
    /// - `AuthError::Generic` if the provider could not sign out
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.provider.sign_out().await.map_err(provider_error)?;
        crate::info!("session.signed_out");
        Ok(())
    }
}

fn provider_error(error: IdentityProviderError) -> AuthError {
    match error {
        IdentityProviderError::CredentialRejected { reason } => {
            AuthError::CredentialRejected { reason }
        }
        IdentityProviderError::Unreachable { reason } => AuthError::Generic {
            message: format!("identity provider unreachable: {reason}"),
        },
        IdentityProviderError::Generic { message } => AuthError::Generic { message },
    }
}
