use std::collections::HashMap;

/// Screens the flow can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, uniffi::Enum)]
pub enum Screen {
    /// Sign-in / sign-up.
    Auth,
    /// Landing screen of a signed-in user with a complete profile.
    Home,
    /// New password form, fed by the staged reset token pair.
    ResetPassword,
    /// Profile completion form.
    ProfileSetup,
}

impl Screen {
    /// Returns the route name used by the navigation layer
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "Auth",
            Self::Home => "Home",
            Self::ResetPassword => "ResetPassword",
            Self::ProfileSetup => "ProfileSetup",
        }
    }
}

impl std::fmt::Display for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The only instruction gatehouse hands to the navigation layer.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct NavigationIntent {
    /// Screen to show.
    pub target_screen: Screen,
    /// `true` replaces the whole stack, `false` pushes on top of it.
    pub reset_stack: bool,
    /// Route parameters. Never carries tokens.
    pub params: HashMap<String, String>,
}

impl NavigationIntent {
    /// An intent that replaces the whole navigation stack with `screen`.
    #[must_use]
    pub fn reset(screen: Screen) -> Self {
        Self {
            target_screen: screen,
            reset_stack: true,
            params: HashMap::new(),
        }
    }

    /// An intent that pushes `screen` (as a modal where the platform supports it).
    #[must_use]
    pub fn push(screen: Screen) -> Self {
        Self {
            target_screen: screen,
            reset_stack: false,
            params: HashMap::new(),
        }
    }
}

/// Imperative navigation, implemented by the native app.
///
/// Calls arrive from background tasks; implementations should hop to the UI thread.
/// No gatehouse lock is held during a call, so reading the flow state from inside it is
/// fine.
#[uniffi::export(with_foreign)]
pub trait Navigator: Send + Sync {
    /// Replaces the navigation stack with a single `screen`.
    fn reset_stack(&self, screen: Screen, params: HashMap<String, String>);

    /// Pushes `screen` on top of the current stack.
    fn push(&self, screen: Screen, params: HashMap<String, String>);
}

/// Hands `intent` to `navigator`.
pub fn navigate(navigator: &dyn Navigator, intent: NavigationIntent) {
    crate::debug!(
        "navigation.issued screen={} reset_stack={}",
        intent.target_screen,
        intent.reset_stack
    );
    if intent.reset_stack {
        navigator.reset_stack(intent.target_screen, intent.params);
    } else {
        navigator.push(intent.target_screen, intent.params);
    }
}
