//! Blocking HTTP plumbing shared by every network stage.
//!
//! One `HttpClient` per run wraps a ureq agent and the run's cancel token.
//! The token is checked before a request goes out and again before the body
//! is read, so an abort takes effect between or during requests.

use std::io::Read;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::cancel::CancelToken;

pub const USER_AGENT: &str = concat!("animap/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PACER_POLL: Duration = Duration::from_millis(50);

/// Failure at the network boundary. Stages match on this to decide whether a
/// failure is per-entity (log and continue) or run-aborting.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request cancelled")]
    Cancelled,
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("failed to read response body from {url}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode request body for {url}")]
    Encode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    cancel: CancelToken,
}

impl HttpClient {
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self { agent, cancel }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn check_cancelled(&self) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            Err(FetchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// GET a URL and return the body as text.
    pub fn get_text(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, FetchError> {
        self.check_cancelled()?;
        debug!(url, "GET");

        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        let response = request.call().map_err(|e| classify(url, e))?;

        self.check_cancelled()?;
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|source| FetchError::Body {
                url: url.to_string(),
                source,
            })?;
        Ok(body)
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let body = self.get_text(url, headers)?;
        serde_json::from_str(&body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub fn post_json<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<(), FetchError> {
        let body = encode_json(url, payload)?;
        self.check_cancelled()?;
        self.agent.post(url).send_json(body).map_err(|e| classify(url, e))?;
        Ok(())
    }
}

/// Serialize a request body up front so a bad payload is reported as such.
pub fn encode_json<T: Serialize + ?Sized>(url: &str, payload: &T) -> Result<serde_json::Value, FetchError> {
    serde_json::to_value(payload).map_err(|source| FetchError::Encode {
        url: url.to_string(),
        source,
    })
}

/// A single static document (the Anime-Lists XML files).
pub trait DocumentSource {
    fn fetch_document(&self) -> Result<String, FetchError>;
}

pub struct RemoteDocument {
    http: HttpClient,
    url: String,
}

impl RemoteDocument {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

impl DocumentSource for RemoteDocument {
    fn fetch_document(&self) -> Result<String, FetchError> {
        self.http.get_text(&self.url, &[])
    }
}

fn classify(url: &str, error: ureq::Error) -> FetchError {
    match error {
        ureq::Error::Status(status, _) => FetchError::Status {
            status,
            url: url.to_string(),
        },
        ureq::Error::Transport(transport) => FetchError::Transport {
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

// ============================================================================
// Request pacing
// ============================================================================

/// Minimum spacing between requests to one host, shared by all workers.
pub struct RequestPacer {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RequestPacer {
    /// One request per `delay`, burst of one. A zero delay disables pacing.
    pub fn new(delay: Duration) -> Self {
        let quota = Quota::with_period(delay)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Block until a request slot is free, or the run is cancelled.
    pub fn wait(&self, cancel: &CancelToken) -> Result<(), FetchError> {
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if self.limiter.check().is_ok() {
                return Ok(());
            }
            std::thread::sleep(PACER_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_pacer_spaces_requests() {
        let pacer = RequestPacer::new(Duration::from_millis(200));
        let cancel = CancelToken::new();
        let start = Instant::now();
        pacer.wait(&cancel).unwrap();
        pacer.wait(&cancel).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_pacer_zero_delay_does_not_block() {
        let pacer = RequestPacer::new(Duration::ZERO);
        let cancel = CancelToken::new();
        for _ in 0..5 {
            pacer.wait(&cancel).unwrap();
        }
    }

    #[test]
    fn test_pacer_observes_cancellation() {
        let pacer = RequestPacer::new(Duration::from_secs(60));
        let cancel = CancelToken::new();
        pacer.wait(&cancel).unwrap();
        cancel.cancel();
        assert!(pacer.wait(&cancel).unwrap_err().is_cancelled());
    }

    #[test]
    fn test_client_refuses_after_cancel() {
        let cancel = CancelToken::new();
        let client = HttpClient::new(Duration::from_secs(1), cancel.clone());
        cancel.cancel();
        let err = client.get_text("http://127.0.0.1:9/never", &[]).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_unencodable_payload_is_encode_error() {
        let mut payload = std::collections::BTreeMap::new();
        payload.insert((1u8, 2u8), "tuple keys are not JSON object keys");

        let err = encode_json("https://hooks.example/x", &payload).unwrap_err();
        assert!(matches!(err, FetchError::Encode { .. }));
        assert_eq!(err.to_string(), "failed to encode request body for https://hooks.example/x");

        let ok = encode_json("u", &[1, 2]).unwrap();
        assert_eq!(ok, serde_json::json!([1, 2]));
    }
}
