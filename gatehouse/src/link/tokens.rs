use url::Url;

use crate::{primitives::TokenPrecedence, AuthError};

/// Query / fragment parameter carrying the access token.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";
/// Query / fragment parameter carrying the refresh token.
pub const REFRESH_TOKEN_PARAM: &str = "refresh_token";

/// Tokens found in an activation URL. Either half may be missing.
#[derive(Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct TokenPair {
    /// Value of `access_token`, if present and non-empty.
    pub access_token: Option<String>,
    /// Value of `refresh_token`, if present and non-empty.
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|_| "<redacted>");
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn is_present(token: Option<&String>) -> bool {
    token.is_some_and(|t| !t.is_empty())
}

impl TokenPair {
    /// Returns `true` when both tokens are present and non-empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        is_present(self.access_token.as_ref()) && is_present(self.refresh_token.as_ref())
    }

    /// Names of the parameters still missing, comma separated. Empty when complete.
    #[must_use]
    pub fn missing(&self) -> String {
        let mut missing = Vec::new();
        if !is_present(self.access_token.as_ref()) {
            missing.push(ACCESS_TOKEN_PARAM);
        }
        if !is_present(self.refresh_token.as_ref()) {
            missing.push(REFRESH_TOKEN_PARAM);
        }
        missing.join(", ")
    }

    /// Returns both tokens, or `AuthError::MissingToken` naming what is absent.
    ///
    /// # Errors
    /// - `AuthError::MissingToken` if either token is absent or empty
    pub fn complete(&self) -> Result<(&str, &str), AuthError> {
        match (self.access_token.as_deref(), self.refresh_token.as_deref()) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Ok((access, refresh))
            }
            _ => Err(AuthError::MissingToken {
                missing: self.missing(),
            }),
        }
    }

    /// Fills fields that are still absent from an `application/x-www-form-urlencoded`
    /// string. The first non-empty occurrence of a parameter wins.
    fn fill_missing_from(&mut self, encoded: &str) {
        for (key, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                ACCESS_TOKEN_PARAM => &mut self.access_token,
                REFRESH_TOKEN_PARAM => &mut self.refresh_token,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
    }
}

/// Extracts the token pair from an activation URL.
///
/// The primary component (query for [`TokenPrecedence::QueryFirst`], fragment for
/// [`TokenPrecedence::FragmentFirst`]) is read first; the other one only fills
/// parameters that are still absent.
///
/// # Errors
/// - `AuthError::MalformedUrl` if `url` is not an absolute URL. The error never
///   echoes the input, which may contain tokens.
pub fn try_extract_tokens(url: &str, precedence: TokenPrecedence) -> Result<TokenPair, AuthError> {
    let parsed = Url::parse(url.trim()).map_err(|e| AuthError::MalformedUrl {
        reason: e.to_string(),
    })?;

    let (primary, secondary) = match precedence {
        TokenPrecedence::QueryFirst => (parsed.query(), parsed.fragment()),
        TokenPrecedence::FragmentFirst => (parsed.fragment(), parsed.query()),
    };

    let mut pair = TokenPair::default();
    if let Some(primary) = primary {
        pair.fill_missing_from(primary);
    }
    if !pair.is_complete() {
        if let Some(secondary) = secondary {
            pair.fill_missing_from(secondary);
        }
    }
    Ok(pair)
}

/// Infallible variant of [`try_extract_tokens`]: malformed input yields an empty pair.
#[uniffi::export]
#[must_use]
pub fn extract_tokens(url: &str, precedence: TokenPrecedence) -> TokenPair {
    try_extract_tokens(url, precedence).unwrap_or_default()
}
