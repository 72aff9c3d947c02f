use std::sync::Arc;

/// An authenticated session issued by the identity provider.
///
/// A `Session` only exists when the provider accepted both tokens. It is replaced as a
/// whole on every change notification and never mutated in place.
#[derive(Clone, PartialEq, Eq, uniffi::Record)]
pub struct Session {
    /// Bearer token for API calls.
    pub access_token: String,
    /// Token used by the provider to renew `access_token`.
    pub refresh_token: String,
    /// Identifier of the authenticated user, also the key of the profile record.
    pub user_id: String,
    /// Expiry of `access_token`, unix seconds.
    pub expires_at: i64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Why the provider replaced the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SessionChangeEvent {
    /// Emitted once after subscribing, carrying the restored session.
    InitialSession,
    /// A user signed in, including token exchanges from deep links.
    SignedIn,
    /// The session was removed, locally or elsewhere.
    SignedOut,
    /// The provider rotated the tokens of the same user.
    TokenRefreshed,
    /// User attributes (e.g. the password) changed.
    UserUpdated,
    /// The provider recognized a password recovery session.
    PasswordRecovery,
}

impl SessionChangeEvent {
    /// Returns the string representation used in log lines
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InitialSession => "initial_session",
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::TokenRefreshed => "token_refreshed",
            Self::UserUpdated => "user_updated",
            Self::PasswordRecovery => "password_recovery",
        }
    }
}

impl std::fmt::Display for SessionChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors reported by the native identity provider bridge.
#[crate::gatehouse_error(foreign)]
pub enum IdentityProviderError {
    /// The provider refused the tokens or the credential change.
    #[error("credentials rejected: {reason}")]
    CredentialRejected {
        /// Reason reported by the provider.
        reason: String,
    },
    /// The provider could not be reached.
    #[error("identity provider unreachable: {reason}")]
    Unreachable {
        /// Transport level diagnostic.
        reason: String,
    },
}

/// Receives session replacements from the identity provider.
///
/// Implemented by gatehouse and handed to
/// [`IdentityProvider::subscribe_to_session_changes`]. Native code calls it for every
/// auth state change, in the order the provider observed them.
#[uniffi::export]
pub trait SessionChangeListener: Send + Sync {
    /// Called with the new session, `None` once the user is signed out.
    fn on_session_change(&self, event: SessionChangeEvent, session: Option<Session>);
}

/// Session primitives of the remote identity provider, implemented by the native app.
///
/// The provider is the source of truth: every session it installs, whether requested
/// through [`IdentityProvider::set_session`] or caused by an external refresh or sign-out,
/// must be reported to the subscribed [`SessionChangeListener`].
///
/// ## Kotlin
///
/// ```kotlin
/// class SupabaseBridge(private val auth: Auth) : IdentityProvider {
///     override suspend fun setSession(accessToken: String, refreshToken: String): Session =
///         auth.importSession(UserSession(accessToken, refreshToken)).toGatehouse()
///     // ...
/// }
/// ```
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the persisted session, if any.
    ///
    /// # Errors
    /// - `IdentityProviderError::Unreachable` if the persisted session could not be loaded
    async fn get_current_session(&self) -> Result<Option<Session>, IdentityProviderError>;

    /// Registers a listener and returns a handle for [`IdentityProvider::unsubscribe`].
    fn subscribe_to_session_changes(&self, listener: Arc<dyn SessionChangeListener>) -> u64;

    /// Removes the listener registered under `subscription_id`. Unknown ids are ignored.
    fn unsubscribe(&self, subscription_id: u64);

    /// Installs a session from an externally obtained token pair.
    ///
    /// # Errors
    /// - `IdentityProviderError::CredentialRejected` if the provider refuses the tokens
    async fn set_session(
        &self,
        access_token: String,
        refresh_token: String,
    ) -> Result<Session, IdentityProviderError>;

    /// Changes the password of the user owning the current session.
    ///
    /// # Errors
    /// - `IdentityProviderError::CredentialRejected` if the provider refuses the update
    async fn update_credential(&self, password: String) -> Result<(), IdentityProviderError>;

    /// Ends the current session.
    ///
    /// # Errors
    /// - `IdentityProviderError::Unreachable` if the sign-out could not be performed
    async fn sign_out(&self) -> Result<(), IdentityProviderError>;
}
