//! Channel identifiers of the form `<scheme>:<path>`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::UriError;

static SCHEME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*$").expect("valid scheme regex")
});

/// Validated channel URI, e.g. `local:/a/b` or `file:///tmp/x`.
///
/// Equality and hashing use the full string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelUri {
    raw: String,
    scheme_len: usize,
}

impl ChannelUri {
    /// # Errors
    ///
    /// Returns a [`UriError`] if there is no `:`, the scheme is not
    /// `[A-Za-z][A-Za-z0-9+.-]*`, or the path is empty.
    pub fn parse(uri: impl Into<String>) -> Result<Self, UriError> {
        let raw = uri.into();
        let Some(scheme_len) = raw.find(':') else {
            return Err(UriError::MissingScheme { uri: raw });
        };
        if scheme_len == 0 {
            return Err(UriError::MissingScheme { uri: raw });
        }
        if !SCHEME_PATTERN.is_match(&raw[..scheme_len]) {
            return Err(UriError::InvalidScheme { uri: raw });
        }
        if raw.len() == scheme_len + 1 {
            return Err(UriError::EmptyPath { uri: raw });
        }
        Ok(Self { raw, scheme_len })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    /// Everything after the scheme separator.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.raw[self.scheme_len + 1..]
    }

    /// Appends path components, separated by single slashes.
    ///
    /// ```
    /// use conduit_core::ChannelUri;
    ///
    /// let base = ChannelUri::parse("local:/a").unwrap();
    /// assert_eq!(base.join(&["b", "/c"]).as_str(), "local:/a/b/c");
    /// ```
    #[must_use]
    pub fn join(&self, components: &[&str]) -> Self {
        let mut raw = self.raw.clone();
        for component in components {
            let component = component.trim_start_matches('/');
            if component.is_empty() {
                continue;
            }
            if !raw.ends_with('/') {
                raw.push('/');
            }
            raw.push_str(component);
        }
        Self {
            raw,
            scheme_len: self.scheme_len,
        }
    }
}

impl fmt::Display for ChannelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ChannelUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChannelUri {
    type Error = UriError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for ChannelUri {
    type Error = UriError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ChannelUri> for String {
    fn from(value: ChannelUri) -> Self {
        value.raw
    }
}

impl AsRef<str> for ChannelUri {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_and_path() {
        let uri = ChannelUri::parse("local:/test/x").unwrap();
        assert_eq!(uri.scheme(), "local");
        assert_eq!(uri.path(), "/test/x");
        assert_eq!(uri.to_string(), "local:/test/x");

        let file = ChannelUri::parse("file:///tmp/x").unwrap();
        assert_eq!(file.scheme(), "file");
        assert_eq!(file.path(), "///tmp/x");
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!(matches!(
            ChannelUri::parse("no-scheme"),
            Err(UriError::MissingScheme { .. })
        ));
        assert!(matches!(
            ChannelUri::parse(":/a"),
            Err(UriError::MissingScheme { .. })
        ));
        assert!(matches!(
            ChannelUri::parse("1abc:/a"),
            Err(UriError::InvalidScheme { .. })
        ));
        assert!(matches!(
            ChannelUri::parse("local:"),
            Err(UriError::EmptyPath { .. })
        ));
    }

    #[test]
    fn scheme_allows_plus_dot_dash() {
        assert_eq!(ChannelUri::parse("ndn+x.y-z:/a").unwrap().scheme(), "ndn+x.y-z");
    }

    #[test]
    fn join_normalizes_slashes() {
        let base = ChannelUri::parse("ndn:/a/").unwrap();
        assert_eq!(base.join(&["/b", "c"]).as_str(), "ndn:/a/b/c");
        assert_eq!(base.join(&[]).as_str(), "ndn:/a/");
        assert_eq!(base.join(&["", "d"]).as_str(), "ndn:/a/d");
    }

    #[test]
    fn serde_uses_plain_string() {
        let uri = ChannelUri::parse("local:/a").unwrap();
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"local:/a\"");
        let back: ChannelUri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
        assert!(serde_json::from_str::<ChannelUri>("\"bad\"").is_err());
    }
}
