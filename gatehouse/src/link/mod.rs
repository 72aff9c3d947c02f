//! Pure parsing of activation URLs.
//!
//! Nothing in this module touches state: the same URL always yields the same
//! [`TokenPair`] and the same [`LinkIntent`].

/// Extraction of the token pair from the query and fragment of a URL.
pub mod tokens;

/// Classification of a URL by its route.
pub mod classifier;

pub use classifier::{classify_link, LinkIntent};
pub use tokens::{extract_tokens, try_extract_tokens, TokenPair};
