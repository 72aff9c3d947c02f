#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    dead_code
)]

//! `gatehouse` is the shared core that decides where a mobile user lands after an
//! operating-system URL activation: password-reset links, email-confirmation callbacks
//! and direct profile-setup links are turned into sessions against a remote identity
//! provider and reconciled against profile completeness.
//!
//! Native apps implement the collaborator traits in [`primitives`] and drive the flow
//! through [`flow::AuthFlow`].

/// Foreign interfaces (identity provider, profile store, navigator, logger) and configuration.
pub mod primitives;

/// Error types shared by the whole flow.
pub mod gatehouse_error;

/// Parsing of activation URLs: token extraction and link classification.
pub mod link;

/// Owner of the current session and the single provider subscription.
pub mod session;

/// Normalizes URL activations from every channel into one processing pipeline.
pub mod dispatcher;

/// State machine mapping session state and profile completeness to a screen.
pub mod reconciler;

/// The FFI-facing object wiring every component together.
pub mod flow;

#[cfg(test)]
mod test_utils;

pub use gatehouse_error::AuthError;
pub use gatehouse_macros::{gatehouse_error, gatehouse_export};

uniffi::setup_scaffolding!("gatehouse");
