//! Credential snapshots handed to strategies.
//!
//! Acquiring and refreshing credentials happens outside the engine. A
//! [`CredentialProvider`] is asked once per task for the current snapshot;
//! strategies treat it as opaque apart from the cookie and header maps.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

/// Point-in-time credentials for the origin server.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub cookies: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

impl Credentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.headers.is_empty()
    }

    /// `Cookie` header value, `None` without cookies.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

// Values are secrets; only names are printed.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Source of the current credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current snapshot, `None` when running anonymously.
    async fn current_credentials(&self) -> Option<Credentials>;
}

/// Provider that always returns the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: Option<Credentials>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: (!credentials.is_empty()).then_some(credentials),
        }
    }

    /// Parses a `name=value; name2=value2` cookie string.
    #[must_use]
    pub fn from_cookie_string(raw: &str) -> Self {
        let credentials = raw
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .map(|(name, value)| (name.trim(), value.trim()))
            .filter(|(name, _)| !name.is_empty())
            .fold(Credentials::new(), |creds, (name, value)| {
                creds.with_cookie(name, value)
            });
        Self::new(credentials)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn current_credentials(&self) -> Option<Credentials> {
        self.credentials.clone()
    }
}
