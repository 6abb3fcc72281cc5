use std::thread;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue};
use url::Url;

use crate::entry::SourceLocator;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
/// Route header the export's own download page sends
const ROUTE_TAG_HEADER: &str = "x-snap-route-tag";
const ROUTE_TAG_VALUE: &str = "mem-dmd";

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Timeouts, connection problems, HTTP 5xx and 429, empty bodies. Retried.
    #[error("{reason} (after {attempts} attempt(s))")]
    Transient { reason: String, attempts: u32 },
    /// Anything retrying cannot fix.
    #[error("{0}")]
    Permanent(String),
}

/// Raw answer to a GET.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Failure below HTTP: no status was received.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub retryable: bool,
}

/// A single HTTP GET.
pub trait Transport {
    fn get(&self, url: &Url) -> Result<TransportResponse, TransportError>;
}

/// `reqwest` blocking client with bounded request time.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ROUTE_TAG_HEADER, HeaderValue::from_static(ROUTE_TAG_VALUE));
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        let classify = |e: reqwest::Error| TransportError {
            retryable: !e.is_builder() && !e.is_redirect(),
            message: if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            },
        };

        let response = self.client.get(url.clone()).send().map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(classify)?.to_vec();
        Ok(TransportResponse { status, body })
    }
}

/// Enforces a minimum gap between the starts of consecutive requests.
#[derive(Debug)]
pub struct CooldownGate {
    interval: Duration,
    last_start: Option<Instant>,
}

impl CooldownGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_start: None,
        }
    }

    /// Block until the cooldown since the previous start has passed, then
    /// record a new start and return it.
    pub fn wait(&mut self) -> Instant {
        if let Some(last) = self.last_start {
            let ready = last + self.interval;
            let now = Instant::now();
            if ready > now {
                thread::sleep(ready - now);
            }
        }
        let start = Instant::now();
        self.last_start = Some(start);
        start
    }
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Minimum gap between request starts
    pub cooldown: Duration,
    /// Total attempts per request, first try included
    pub max_attempts: u32,
    /// Extra wait before retrying after HTTP 429/503
    pub busy_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            max_attempts: 3,
            busy_backoff: Duration::from_secs(30),
        }
    }
}

enum Attempt {
    Done(Vec<u8>),
    Retry { reason: String, busy: bool },
    Fail(String),
}

/// Sequential fetcher owning the run's cooldown gate.
pub struct Fetcher<T: Transport> {
    transport: T,
    gate: CooldownGate,
    policy: FetchPolicy,
    requests: u64,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, policy: FetchPolicy) -> Self {
        Self {
            transport,
            gate: CooldownGate::new(policy.cooldown),
            policy,
            requests: 0,
        }
    }

    /// Number of requests sent so far, retries and resolutions included.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch the asset bytes behind `locator`.
    pub fn fetch(&mut self, locator: &SourceLocator) -> Result<Vec<u8>, FetchError> {
        match locator {
            SourceLocator::Direct(url) => self.get_with_retry(url),
            SourceLocator::Deferred(url) => {
                let body = self.get_with_retry(url)?;
                let text = String::from_utf8_lossy(&body);
                let resolved = Url::parse(text.trim())
                    .map_err(|e| FetchError::Permanent(format!("resolution returned no usable URL: {}", e)))?;
                tracing::debug!("Resolved {} -> {}", url, resolved);
                self.get_with_retry(&resolved)
            }
        }
    }

    fn get_with_retry(&mut self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(url) {
                Attempt::Done(bytes) => return Ok(bytes),
                Attempt::Fail(reason) => return Err(FetchError::Permanent(reason)),
                Attempt::Retry { reason, busy } => {
                    if attempt >= max_attempts {
                        return Err(FetchError::Transient {
                            reason,
                            attempts: attempt,
                        });
                    }
                    tracing::warn!("Attempt {}/{} failed: {}; retrying", attempt, max_attempts, reason);
                    if busy {
                        thread::sleep(self.policy.busy_backoff);
                    }
                }
            }
        }
    }

    fn attempt(&mut self, url: &Url) -> Attempt {
        self.gate.wait();
        self.requests += 1;
        tracing::debug!("GET {}", url);

        match self.transport.get(url) {
            Ok(resp) => match resp.status {
                200..=299 if resp.body.is_empty() => Attempt::Retry {
                    reason: format!("HTTP {} with empty body", resp.status),
                    busy: false,
                },
                200..=299 => Attempt::Done(resp.body),
                429 | 503 => Attempt::Retry {
                    reason: format!("HTTP {}", resp.status),
                    busy: true,
                },
                500..=599 => Attempt::Retry {
                    reason: format!("HTTP {}", resp.status),
                    busy: false,
                },
                status => Attempt::Fail(format!("HTTP {}", status)),
            },
            Err(e) if e.retryable => Attempt::Retry {
                reason: e.message,
                busy: false,
            },
            Err(e) => Attempt::Fail(e.message),
        }
    }
}
