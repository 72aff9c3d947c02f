//! Gatehouse error handling utilities
//!
//! Every fallible operation of the flow resolves to an [`AuthError`]. Errors raised by
//! foreign collaborators are converted at the call site, so nothing reaches the host
//! as a panic or an unhandled rejection.
//!
//! Use the `#[gatehouse_error]` macro to derive the boilerplate for new error enums.

/// Helper trait for converting anyhow errors to generic error messages
pub trait AnyhowErrorExt {
    /// Convert an anyhow error to a string, preserving the error chain
    fn to_generic_message(&self) -> String;
}

impl AnyhowErrorExt for anyhow::Error {
    fn to_generic_message(&self) -> String {
        let mut message = self.to_string();

        let chain: Vec<String> = self.chain().skip(1).map(ToString::to_string).collect();
        if !chain.is_empty() {
            message.push_str(" (caused by: ");
            message.push_str(&chain.join(" -> "));
            message.push(')');
        }

        message
    }
}

/// Errors surfaced by the deep-link session flow.
///
/// The host decides what to show: `MalformedUrl` is dropped silently, `MissingToken` and
/// `CredentialRejected` are user-visible, `ProfileCheckFailure` is only returned once the
/// configured retry budget is exhausted.
#[crate::gatehouse_error]
pub enum AuthError {
    /// The activation URL could not be parsed.
    #[error("malformed activation url: {reason}")]
    MalformedUrl {
        /// Parser diagnostic. Never contains the URL itself, which may carry tokens.
        reason: String,
    },
    /// One or both tokens were absent where a complete pair is required.
    #[error("missing token(s): {missing}")]
    MissingToken {
        /// Comma separated names of the missing parameters.
        missing: String,
    },
    /// The identity provider refused the token pair or the credential update.
    #[error("credentials rejected: {reason}")]
    CredentialRejected {
        /// Reason reported by the provider.
        reason: String,
    },
    /// The profile completeness check failed after every retry.
    #[error("profile check failed: {reason}")]
    ProfileCheckFailure {
        /// The last error reported by the profile store.
        reason: String,
    },
    /// The operation is not valid in the current lifecycle state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
