use crate::AuthError;

/// URL scheme registered by the app when the host does not override it.
pub const DEFAULT_SCHEME: &str = "app";
/// Profile store attempts before the failure policy kicks in.
pub const DEFAULT_PROFILE_CHECK_MAX_ATTEMPTS: u32 = 3;
/// Pause between profile store attempts.
pub const DEFAULT_PROFILE_CHECK_RETRY_DELAY_MS: u64 = 500;
/// Number of recently processed activation URLs remembered for de-duplication.
pub const DEFAULT_DEDUPE_CAPACITY: u32 = 16;
/// How long a processed activation URL counts as a duplicate delivery.
pub const DEFAULT_DEDUPE_WINDOW_MS: u64 = 10_000;

/// Which URL component wins when both carry the same token parameter.
///
/// The identity provider puts tokens in the fragment for some link types and in the query
/// for others. The secondary component only ever fills parameters the primary one lacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, uniffi::Enum)]
pub enum TokenPrecedence {
    /// Query parameters first, fragment fills the gaps.
    #[default]
    QueryFirst,
    /// Fragment first, query parameters fill the gaps.
    FragmentFirst,
}

/// What the reconciler does once every profile check attempt failed.
///
/// There is no default: the host has to decide whether an unreachable profile store
/// should let users in, send them to profile setup or sign them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ProfileCheckFailurePolicy {
    /// Treat the profile as existing and land on `Home`.
    AssumeComplete,
    /// Treat the profile as missing and land on `ProfileSetup`.
    AssumeIncomplete,
    /// Sign the user out through the identity provider and land on `Auth`.
    SignOut,
}

impl ProfileCheckFailurePolicy {
    /// Returns the string representation used in log lines
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AssumeComplete => "assume_complete",
            Self::AssumeIncomplete => "assume_incomplete",
            Self::SignOut => "sign_out",
        }
    }
}

impl std::fmt::Display for ProfileCheckFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration of an [`AuthFlow`](crate::flow::AuthFlow).
///
/// # Examples
///
/// ## Swift
///
/// ```swift
/// var config = Gatehouse.defaultFlowConfig(profileCheckFailure: .signOut)
/// config.scheme = "myapp"
/// let flow = try AuthFlow(provider: supabaseBridge, profileStore: profiles, navigator: router, config: config)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct FlowConfig {
    /// Registered URL scheme, without `://`. Compared case-insensitively.
    pub scheme: String,
    /// Precedence between query and fragment tokens.
    pub token_precedence: TokenPrecedence,
    /// Behaviour once the profile check exhausted its attempts.
    pub profile_check_failure: ProfileCheckFailurePolicy,
    /// Total profile store attempts per check, at least 1.
    pub profile_check_max_attempts: u32,
    /// Delay between two profile store attempts, in milliseconds.
    pub profile_check_retry_delay_ms: u64,
    /// How many processed URLs are remembered to drop duplicate deliveries.
    pub dedupe_capacity: u32,
    /// How long, in milliseconds, a processed URL is treated as the same activation.
    /// Opening the link again after that processes it anew.
    pub dedupe_window_ms: u64,
}

impl FlowConfig {
    /// Builds a configuration with defaults for everything except the failure policy.
    #[must_use]
    pub fn new(profile_check_failure: ProfileCheckFailurePolicy) -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            token_precedence: TokenPrecedence::default(),
            profile_check_failure,
            profile_check_max_attempts: DEFAULT_PROFILE_CHECK_MAX_ATTEMPTS,
            profile_check_retry_delay_ms: DEFAULT_PROFILE_CHECK_RETRY_DELAY_MS,
            dedupe_capacity: DEFAULT_DEDUPE_CAPACITY,
            dedupe_window_ms: DEFAULT_DEDUPE_WINDOW_MS,
        }
    }

    /// Checks that the configuration can drive a flow.
    ///
    /// # Errors
    /// - `AuthError::InvalidOperation` if the scheme is empty or not a valid URL scheme,
    ///   or if `profile_check_max_attempts`, `dedupe_capacity` or `dedupe_window_ms` is zero.
    pub fn validate(&self) -> Result<(), AuthError> {
        let scheme_is_valid = self
            .scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && self
                .scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_is_valid {
            return Err(AuthError::InvalidOperation(format!(
                "invalid url scheme `{}`",
                self.scheme
            )));
        }
        if self.profile_check_max_attempts == 0 {
            return Err(AuthError::InvalidOperation(
                "profile_check_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.dedupe_capacity == 0 {
            return Err(AuthError::InvalidOperation(
                "dedupe_capacity must be at least 1".to_string(),
            ));
        }
        if self.dedupe_window_ms == 0 {
            return Err(AuthError::InvalidOperation(
                "dedupe_window_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builds a [`FlowConfig`] with defaults around the mandatory failure policy.
#[uniffi::export]
#[must_use]
pub fn default_flow_config(profile_check_failure: ProfileCheckFailurePolicy) -> FlowConfig {
    FlowConfig::new(profile_check_failure)
}
