#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gatehouse::flow::AuthFlow;
use gatehouse::primitives::{
    FlowConfig, IdentityProvider, IdentityProviderError, NavigationIntent, Navigator,
    ProfileCheckFailurePolicy, ProfileStore, ProfileStoreError, Screen, Session,
    SessionChangeEvent, SessionChangeListener,
};
use gatehouse::reconciler::AuthState;

pub fn session(user_id: &str, access_token: &str, refresh_token: &str) -> Session {
    Session {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        user_id: user_id.to_string(),
        expires_at: 1_900_000_000,
    }
}

/// Provider behaving like a hosted auth SDK: it announces the persisted session right
/// after subscribing and reports every change to its listeners.
#[derive(Default)]
pub struct InMemoryProvider {
    persisted: Mutex<Option<Session>>,
    accounts: Mutex<HashMap<(String, String), Session>>,
    listeners: Mutex<HashMap<u64, Arc<dyn SessionChangeListener>>>,
    next_id: AtomicU64,
    pub set_session_calls: AtomicUsize,
    pub passwords: Mutex<Vec<String>>,
}

impl InMemoryProvider {
    pub fn new(persisted: Option<Session>) -> Arc<Self> {
        let provider = Self::default();
        *provider.persisted.lock().unwrap() = persisted;
        Arc::new(provider)
    }

    pub fn register_link_tokens(&self, access_token: &str, refresh_token: &str, user_id: &str) {
        self.accounts.lock().unwrap().insert(
            (access_token.to_string(), refresh_token.to_string()),
            session(user_id, access_token, refresh_token),
        );
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn emit(&self, event: SessionChangeEvent, session: Option<Session>) {
        *self.persisted.lock().unwrap() = session.clone();
        let listeners: Vec<_> = self.listeners.lock().unwrap().values().cloned().collect();
        for listener in listeners {
            listener.on_session_change(event, session.clone());
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for InMemoryProvider {
    async fn get_current_session(&self) -> Result<Option<Session>, IdentityProviderError> {
        Ok(self.persisted.lock().unwrap().clone())
    }

    fn subscribe_to_session_changes(&self, listener: Arc<dyn SessionChangeListener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let persisted = self.persisted.lock().unwrap().clone();
        listener.on_session_change(SessionChangeEvent::InitialSession, persisted);
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
            .accounts
            .lock()
            .unwrap()
            .get(&(access_token, refresh_token))
            .cloned()
            .ok_or_else(|| IdentityProviderError::CredentialRejected {
                reason: "Invalid Refresh Token".to_string(),
            })?;
        self.emit(SessionChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn update_credential(&self, password: String) -> Result<(), IdentityProviderError> {
        self.passwords.lock().unwrap().push(password);
        let current = self.persisted.lock().unwrap().clone();
        self.emit(SessionChangeEvent::UserUpdated, current);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), IdentityProviderError> {
        self.emit(SessionChangeEvent::SignedOut, None);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProfiles {
    existing: Mutex<Vec<String>>,
    pub queries: AtomicUsize,
}

impl InMemoryProfiles {
    pub fn new(existing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            existing: Mutex::new(existing.iter().map(ToString::to_string).collect()),
            queries: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ProfileStore for InMemoryProfiles {
    async fn exists(&self, user_id: String) -> Result<bool, ProfileStoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.existing.lock().unwrap().contains(&user_id))
    }
}

#[derive(Default)]
pub struct Router {
    pub intents: Mutex<Vec<NavigationIntent>>,
}

impl Router {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn screens(&self) -> Vec<(Screen, bool)> {
        self.intents
            .lock()
            .unwrap()
            .iter()
            .map(|intent| (intent.target_screen, intent.reset_stack))
            .collect()
    }
}

impl Navigator for Router {
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

pub fn build_flow(
    provider: &Arc<InMemoryProvider>,
    profiles: &Arc<InMemoryProfiles>,
    router: &Arc<Router>,
) -> Arc<AuthFlow> {
    let config = FlowConfig::new(ProfileCheckFailurePolicy::AssumeIncomplete);
    AuthFlow::new(provider.clone(), profiles.clone(), router.clone(), config)
        .expect("default config is valid")
}

/// Waits until the flow reaches `state`.
pub async fn wait_for_state(flow: &AuthFlow, state: AuthState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while flow.state() != state {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {state}, still {}",
            flow.state()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
