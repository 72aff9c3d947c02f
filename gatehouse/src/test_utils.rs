//! In-memory collaborators for unit tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::primitives::{
    IdentityProvider, IdentityProviderError, NavigationIntent, Navigator, ProfileStore,
    ProfileStoreError, Screen, Session, SessionChangeEvent, SessionChangeListener,
};

/// Builds a session for `user_id` with tokens derived from `tag`.
pub fn session(user_id: &str, tag: &str) -> Session {
    Session {
        access_token: format!("{tag}-access"),
        refresh_token: format!("{tag}-refresh"),
        user_id: user_id.to_string(),
        expires_at: 1_900_000_000,
    }
}

/// Identity provider keeping everything in memory.
///
/// Accepted token pairs are registered with [`FakeIdentityProvider::accept`]. Like the
/// real providers, `set_session`, `update_credential` and `sign_out` report the change
/// to every subscribed listener before returning.
#[derive(Default)]
pub struct FakeIdentityProvider {
    persisted: Mutex<Option<Session>>,
    fail_restore: AtomicBool,
    fail_sign_out: AtomicBool,
    reject_credential_update: AtomicBool,
    accepted: Mutex<HashMap<(String, String), Session>>,
    listeners: Mutex<HashMap<u64, Arc<dyn SessionChangeListener>>>,
    next_subscription: AtomicU64,
    restore_gate: Option<Arc<Semaphore>>,
    pub restore_calls: AtomicUsize,
    pub set_session_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
    pub updated_passwords: Mutex<Vec<String>>,
}

impl FakeIdentityProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_persisted(session: Session) -> Arc<Self> {
        let provider = Self::default();
        *provider.persisted.lock().unwrap() = Some(session);
        Arc::new(provider)
    }

    /// A provider whose `get_current_session` answers only after
    /// [`FakeIdentityProvider::release_restore`].
    pub fn with_gated_restore(session: Session) -> Arc<Self> {
        let provider = Self {
            restore_gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        };
        *provider.persisted.lock().unwrap() = Some(session);
        Arc::new(provider)
    }

    pub fn release_restore(&self) {
        if let Some(gate) = &self.restore_gate {
            gate.add_permits(1);
        }
    }

    pub fn accept(&self, access_token: &str, refresh_token: &str, session: Session) {
        self.accepted.lock().unwrap().insert(
            (access_token.to_string(), refresh_token.to_string()),
            session,
        );
    }

    pub fn fail_restore(&self) {
        self.fail_restore.store(true, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self) {
        self.fail_sign_out.store(true, Ordering::SeqCst);
    }

    pub fn reject_credential_update(&self, reject: bool) {
        self.reject_credential_update.store(reject, Ordering::SeqCst);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Delivers a notification to every listener, as an external refresh would.
    pub fn emit(&self, event: SessionChangeEvent, session: Option<Session>) {
        *self.persisted.lock().unwrap() = session.clone();
        let listeners: Vec<_> = self.listeners.lock().unwrap().values().cloned().collect();
        for listener in listeners {
            listener.on_session_change(event, session.clone());
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn get_current_session(&self) -> Result<Option<Session>, IdentityProviderError> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.restore_gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(IdentityProviderError::Unreachable {
                reason: "keychain locked".to_string(),
            });
        }
        Ok(self.persisted.lock().unwrap().clone())
    }

    fn subscribe_to_session_changes(&self, listener: Arc<dyn SessionChangeListener>) -> u64 {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        self.listeners.lock().unwrap().insert(id, listener);
        id
    }

    fn unsubscribe(&self, subscription_id: u64) {
        self.listeners.lock().unwrap().remove(&subscription_id);
    }

    async fn set_session(
        &self,
        access_token: String,
        refresh_token: String,
    ) -> Result<Session, IdentityProviderError> {
        self.set_session_calls.fetch_add(1, Ordering::SeqCst);
        let session = self
            .accepted
            .lock()
            .unwrap()
            .get(&(access_token, refresh_token))
            .cloned()
            .ok_or_else(|| IdentityProviderError::CredentialRejected {
                reason: "invalid or expired token".to_string(),
            })?;
        self.emit(SessionChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn update_credential(&self, password: String) -> Result<(), IdentityProviderError> {
        if self.reject_credential_update.load(Ordering::SeqCst) {
            return Err(IdentityProviderError::CredentialRejected {
                reason: "password too weak".to_string(),
            });
        }
        self.updated_passwords.lock().unwrap().push(password);
        let current = self.persisted.lock().unwrap().clone();
        if current.is_some() {
            self.emit(SessionChangeEvent::UserUpdated, current);
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), IdentityProviderError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(IdentityProviderError::Unreachable {
                reason: "offline".to_string(),
            });
        }
        self.emit(SessionChangeEvent::SignedOut, None);
        Ok(())
    }
}

/// Profile store backed by a map of user id to "profile exists".
#[derive(Default)]
pub struct FakeProfileStore {
    profiles: Mutex<HashMap<String, bool>>,
    failures_remaining: AtomicU32,
    gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
}

impl FakeProfileStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A store whose answers are held back until [`FakeProfileStore::release`] is called.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        })
    }

    pub fn set_exists(&self, user_id: &str, exists: bool) {
        self.profiles
            .lock()
            .unwrap()
            .insert(user_id.to_string(), exists);
    }

    /// The next `count` queries fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Lets `count` held queries answer.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }
}

#[async_trait::async_trait]
impl ProfileStore for FakeProfileStore {
    async fn exists(&self, user_id: String) -> Result<bool, ProfileStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProfileStoreError::Unavailable {
                reason: "timeout".to_string(),
            });
        }
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .get(&user_id)
            .copied()
            .unwrap_or(false))
    }
}

/// Navigator recording every intent it receives.
#[derive(Default)]
pub struct RecordingNavigator {
    intents: Mutex<Vec<NavigationIntent>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn intents(&self) -> Vec<NavigationIntent> {
        self.intents.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<NavigationIntent> {
        self.intents.lock().unwrap().last().cloned()
    }

    pub fn screens(&self) -> Vec<Screen> {
        self.intents
            .lock()
            .unwrap()
            .iter()
            .map(|intent| intent.target_screen)
            .collect()
    }
}

impl Navigator for RecordingNavigator {
    fn reset_stack(&self, screen: Screen, params: HashMap<String, String>) {
        self.intents.lock().unwrap().push(NavigationIntent {
            target_screen: screen,
            reset_stack: true,
            params,
        });
    }

    fn push(&self, screen: Screen, params: HashMap<String, String>) {
        self.intents.lock().unwrap().push(NavigationIntent {
            target_screen: screen,
            reset_stack: false,
            params,
        });
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
