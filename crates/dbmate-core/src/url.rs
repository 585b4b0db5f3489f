//! Connection descriptor parsing.
//!
//! A database URL is parsed once per invocation into an immutable
//! [`ConnectionDescriptor`]. The scheme selects the driver.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::Result;

/// Parsed form of a database connection URL.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    raw: String,
    url: Url,
}

impl ConnectionDescriptor {
    /// Parse a connection string.
    ///
    /// Fails with `InvalidUrl` when the string cannot be decoded as a URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())?;
        Ok(Self {
            raw: raw.trim().to_string(),
            url,
        })
    }

    /// Engine identifier (the URL scheme, lowercased by the parser).
    pub fn engine(&self) -> &str {
        self.url.scheme()
    }

    /// Decoded user name, if any.
    pub fn username(&self) -> Option<String> {
        let user = self.url.username();
        if user.is_empty() {
            None
        } else {
            Some(percent_decode(user))
        }
    }

    /// Decoded password, if any.
    pub fn password(&self) -> Option<String> {
        self.url.password().map(percent_decode)
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Raw path component, including any leading separator.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    /// Database name: the decoded path with exactly one leading `/` removed.
    ///
    /// The query string is never part of the name, and a URL without a path
    /// yields an empty string.
    pub fn database_name(&self) -> String {
        database_name(&self.url)
    }

    /// The connection string as supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Copy of the URL with the path replaced, keeping credentials and query.
    pub fn with_path(&self, path: &str) -> Url {
        let mut url = self.url.clone();
        url.set_path(path);
        url
    }
}

/// Database name for a parsed URL, percent-decoded the same way drivers
/// decode it when connecting.
pub fn database_name(url: &Url) -> String {
    let path = url.path();
    percent_decode(path.strip_prefix('/').unwrap_or(path))
}

fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}
