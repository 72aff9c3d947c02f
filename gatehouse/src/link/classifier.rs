use url::Url;

/// Route of password reset links.
pub const RESET_PASSWORD_ROUTE: &str = "reset-password";
/// Route of email confirmation / magic link callbacks.
pub const AUTH_CALLBACK_ROUTE: &str = "auth/callback";
/// Route of direct profile setup links.
pub const PROFILE_SETUP_ROUTE: &str = "profile-setup";

/// What an activation URL asks the app to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum LinkIntent {
    /// `app://reset-password`: stage the tokens and show the new password form.
    PasswordReset,
    /// `app://auth/callback`: exchange the tokens for a session right away.
    AuthCallback,
    /// `app://profile-setup`: re-check the profile of the current session.
    ProfileSetupDirect,
    /// Anything else. Dropped without side effects.
    Unrecognized,
}

impl LinkIntent {
    /// Returns the string representation used in log lines
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::AuthCallback => "auth_callback",
            Self::ProfileSetupDirect => "profile_setup_direct",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl std::fmt::Display for LinkIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Joins host and path of a custom scheme URL into a route, e.g. `auth/callback`.
///
/// `app://auth/callback`, `app:///auth/callback` and `app:auth/callback` all yield the
/// same route.
fn route_of(url: &Url) -> String {
    let segments = url
        .host_str()
        .into_iter()
        .chain(url.path().split('/'))
        .filter(|segment| !segment.is_empty());

    segments.collect::<Vec<_>>().join("/")
}

fn matches_route(route: &str, prefix: &str) -> bool {
    route == prefix
        || route
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Classifies an activation URL by its route.
///
/// Only the scheme and the route count: query and fragment never change the result.
/// URLs that fail to parse or use another scheme are [`LinkIntent::Unrecognized`].
#[uniffi::export]
#[must_use]
pub fn classify_link(url: &str, scheme: &str) -> LinkIntent {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return LinkIntent::Unrecognized;
    };
    if !parsed.scheme().eq_ignore_ascii_case(scheme) {
        return LinkIntent::Unrecognized;
    }

    let route = route_of(&parsed);
    if matches_route(&route, RESET_PASSWORD_ROUTE) {
        LinkIntent::PasswordReset
    } else if matches_route(&route, AUTH_CALLBACK_ROUTE) {
        LinkIntent::AuthCallback
    } else if matches_route(&route, PROFILE_SETUP_ROUTE) {
        LinkIntent::ProfileSetupDirect
    } else {
        LinkIntent::Unrecognized
    }
}
