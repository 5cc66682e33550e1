//! Publisher/subscriber API key validation
//!
//! Tokens are plain bearer strings checked against a configured set of
//! accepted keys. The membership test is deliberately behind `ApiKeySet` so a
//! real credential store can replace it without touching the handlers.

use axum::http::{header, HeaderMap};

use crate::error::{Error, Result};

/// The set of accepted publisher API keys.
#[derive(Debug, Clone, Default)]
pub struct ApiKeySet {
    keys: Vec<String>,
}

impl ApiKeySet {
    /// Build a key set from explicit keys, dropping empty entries.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated key list, e.g. the `SSE_PUBLISHER_API_KEYS`
    /// environment variable.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(',').map(|s| s.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Validate a bearer token against the configured keys.
    ///
    /// An empty key set denies every request. Every configured key is compared
    /// in constant time with no early exit, so timing does not leak which key
    /// (if any) matched.
    pub fn validate(&self, token: Option<&str>) -> Result<()> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(Error::Unauthorized),
        };

        let mut matched = false;
        for key in &self.keys {
            if constant_time_eq(token.as_bytes(), key.as_bytes()) {
                matched = true;
            }
        }

        if matched {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }
}

/// Extract the bearer token from an `Authorization` header.
///
/// The scheme is matched case-insensitively; surrounding whitespace is
/// stripped. Returns `None` for a missing header, a non-bearer scheme, or an
/// empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, rest) = raw.trim().split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    let mut mismatch = left.len() ^ right.len();
    let max_len = left.len().max(right.len());

    for index in 0..max_len {
        let l = left.get(index).copied().unwrap_or(0);
        let r = right.get(index).copied().unwrap_or(0);
        mismatch |= (l ^ r) as usize;
    }

    mismatch == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"dev-key", b"dev-key"));
        assert!(!constant_time_eq(b"dev-key", b"dev-keY"));
        assert!(!constant_time_eq(b"dev-key", b"dev-key2"));
        assert!(constant_time_eq(b"", b""));
    }
}
