//! Reference network strategy: a plain HTTP GET of the task URL.
//!
//! The body is streamed and counted, never stored; the artifact is the final
//! URL after redirects. Persisting bytes is left to richer strategies.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE, RETRY_AFTER};
use tracing::{debug, instrument};

use super::error::AttemptError;
use super::outcome::Artifact;
use super::rate_limiter::parse_retry_after;
use super::strategy::Strategy;
use crate::credentials::Credentials;
use crate::queue::Task;

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default whole-request timeout.
pub const READ_TIMEOUT: Duration = Duration::from_secs(300);

const USER_AGENT: &str = concat!("mediafetch/", env!("CARGO_PKG_VERSION"));

/// GETs the task URL and reports the bytes received.
#[derive(Debug, Clone)]
pub struct HttpStrategy {
    client: Client,
    priority: i32,
}

impl HttpStrategy {
    /// Creates the strategy with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the client cannot be built (for
    /// example, no TLS backend).
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT)
    }

    /// Creates the strategy with explicit timeouts.
    ///
    /// # Errors
    ///
    /// See [`HttpStrategy::new`].
    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect)
            .timeout(read)
            .gzip(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            priority: 0,
        }
    }

    /// Overrides the chain priority (default 0).
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

fn map_transport_error(url: &str, error: &reqwest::Error) -> AttemptError {
    if error.is_timeout() {
        AttemptError::timeout(url)
    } else {
        AttemptError::connection(url, error.to_string())
    }
}

#[async_trait]
impl Strategy for HttpStrategy {
    fn name(&self) -> &str {
        "http"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_handle(&self, task: &Task) -> bool {
        task.url.starts_with("http://") || task.url.starts_with("https://")
    }

    #[instrument(skip(self, task, credentials), fields(task_id = %task.id, url = %task.url))]
    async fn download(
        &self,
        task: &Task,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<Artifact>, AttemptError> {
        let url = task.url.as_str();
        let mut request = self.client.get(url);
        if let Some(creds) = credentials {
            if let Some(cookie) = creds.cookie_header() {
                request = request.header(COOKIE, cookie);
            }
            for (name, value) in &creds.headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            debug!(status = status.as_u16(), ?retry_after, "non-success status");
            return Err(AttemptError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut stream = response.bytes_stream();
        let mut bytes: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_transport_error(url, &e))?;
            bytes += chunk.len() as u64;
        }

        if bytes == 0 {
            return Err(AttemptError::empty_response(url));
        }
        debug!(bytes, final_url = %final_url, "body received");

        let mut artifact = Artifact::new(final_url).with_bytes(bytes);
        if let Some(content_type) = content_type {
            artifact = artifact.with_content_type(content_type);
        }
        Ok(vec![artifact])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_names_crate() {
        assert!(USER_AGENT.starts_with("mediafetch/"));
    }

    #[test]
    fn test_priority_override() {
        let strategy = HttpStrategy::with_client(Client::new()).with_priority(7);
        assert_eq!(strategy.priority(), 7);
        assert_eq!(strategy.name(), "http");
    }
}
