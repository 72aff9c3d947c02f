/// Forwarding of the crate's log output to a foreign logger.
pub mod logger;

/// Configuration of the flow.
pub mod config;

/// Identity provider interface and session types.
pub mod identity_provider;

/// Profile completeness gate.
pub mod profile_store;

/// Navigation layer interface.
pub mod navigator;

pub use config::{FlowConfig, ProfileCheckFailurePolicy, TokenPrecedence};
pub use identity_provider::{
    IdentityProvider, IdentityProviderError, Session, SessionChangeEvent,
    SessionChangeListener,
};
pub use navigator::{NavigationIntent, Navigator, Screen};
pub use profile_store::{ProfileStore, ProfileStoreError};
