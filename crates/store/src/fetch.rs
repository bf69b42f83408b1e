//! Origin fetcher boundary.
//!
//! Retrieval is a plain HTTP GET of the document URL; retries and backoff
//! are deliberately not part of this boundary.

use std::io::Read;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned status {code}")]
    Status { code: u16 },
    #[error("failed to read response body: {0}")]
    Body(#[from] std::io::Error),
}

/// Retrieves document bytes for a URL.
///
/// Trait seam so sessions can be driven by a stub in tests; the production
/// implementation is [`HttpFetcher`].
pub trait OriginFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Blocking HTTP fetcher backed by a shared `ureq` agent.
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self { agent: ureq::agent() }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let started = Instant::now();

        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::Status { code }),
            Err(err) => return Err(FetchError::Network(err.to_string())),
        };

        let mut bytes = Vec::new();
        response.into_reader().read_to_end(&mut bytes)?;

        tracing::debug!(
            url,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document fetched"
        );

        Ok(bytes)
    }
}
