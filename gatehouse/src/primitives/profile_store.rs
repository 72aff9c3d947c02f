/// Errors reported by the native profile store bridge.
#[crate::gatehouse_error(foreign)]
pub enum ProfileStoreError {
    /// The store could not be queried (network, permissions, timeouts).
    #[error("profile store unavailable: {reason}")]
    Unavailable {
        /// Diagnostic reported by the store.
        reason: String,
    },
}

/// Profile completeness gate, implemented by the native app against its data store.
///
/// Answers are never cached by gatehouse: the store is queried every time a session
/// becomes valid or the host reports a saved profile.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns whether a profile record exists for `user_id`.
    ///
    /// # Errors
    /// - `ProfileStoreError::Unavailable` if the store could not answer
    async fn exists(&self, user_id: String) -> Result<bool, ProfileStoreError>;
}
