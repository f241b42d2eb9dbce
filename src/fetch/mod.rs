//! Conditional payload download.
//!
//! One GET per wake cycle, validated with `If-None-Match` so an unchanged
//! payload costs a 304 and no body transfer. The body is streamed in chunks
//! under three independent deadlines so a wedged server can never hold the
//! device out of sleep:
//!
//! * per-read: one `read` call taking too long,
//! * stall: no forward progress for too long across reads,
//! * overall: the whole transfer taking too long.
//!
//! The transport and clock are traits so the deadline logic is testable on
//! the host with scripted time.

use std::fmt;
use std::time::Duration;

use log::{debug, info};

use crate::config::AgentConfig;
use crate::error::AgentError;

#[cfg(feature = "esp32")]
pub mod esp;

/// Monotonic time plus a cooperative pause point between chunk reads.
pub trait Clock {
    /// Time since some fixed origin; only differences are meaningful.
    fn now(&mut self) -> Duration;
    /// Yield briefly so watchdogs and housekeeping tasks get a slice.
    fn yield_now(&mut self);
}

/// One in-flight HTTP response.
pub trait HttpResponse {
    fn status(&mut self) -> u16;
    fn header(&mut self, name: &str) -> Option<String>;
    /// Read some body bytes. `Ok(0)` means no data was available yet, not
    /// end of stream; a closed connection is [`TransportError::Closed`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

pub trait Transport {
    type Response: HttpResponse;
    fn get(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Self::Response, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer closed the connection.
    Closed,
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Io(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Everything that can go wrong between a request and a complete body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unexpected HTTP status.
    Status(u16),
    /// The response carried no parseable Content-Length.
    MissingLength,
    /// Announced body exceeds the configured ceiling.
    Oversize { len: usize, max: usize },
    /// Connection closed before the announced length arrived.
    ShortRead { got: usize, want: usize },
    /// A single read exceeded the per-read deadline.
    ReadTimeout,
    /// No forward progress within the stall deadline.
    Stalled,
    /// The whole transfer exceeded the overall deadline.
    OverallTimeout,
    Transport(TransportError),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "unexpected HTTP status {}", code),
            Self::MissingLength => write!(f, "response has no Content-Length"),
            Self::Oversize { len, max } => {
                write!(f, "payload of {} bytes exceeds limit of {}", len, max)
            }
            Self::ShortRead { got, want } => {
                write!(f, "connection closed after {} of {} bytes", got, want)
            }
            Self::ReadTimeout => write!(f, "read deadline exceeded"),
            Self::Stalled => write!(f, "transfer stalled"),
            Self::OverallTimeout => write!(f, "overall transfer deadline exceeded"),
            Self::Transport(e) => write!(f, "transport failed: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of one conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Server confirmed the cached payload is current.
    NotModified,
    /// New payload. `etag` is `None` when the server sent no usable tag, in
    /// which case the previously cached tag stays in force.
    Payload { body: Vec<u8>, etag: Option<String> },
}

/// Final request URL, with the battery reading as a query parameter when one
/// was obtained.
pub fn build_url(cfg: &AgentConfig, battery_percent: Option<u8>) -> Result<String, AgentError> {
    let url = cfg.payload_url.trim();
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| AgentError::Config(format!("payload URL must be http(s): {}", url)))?;
    let host = rest.split(['/', '?']).next().unwrap_or("");
    if host.is_empty() {
        return Err(AgentError::Config("payload URL has no host".into()));
    }
    match battery_percent {
        None => Ok(url.to_string()),
        Some(percent) => {
            let sep = if url.contains('?') { '&' } else { '?' };
            Ok(format!("{}{}deviceBattery={}", url, sep, percent))
        }
    }
}

/// Perform the cycle's conditional GET and stream the body if one is coming.
pub fn fetch<T: Transport, C: Clock>(
    transport: &mut T,
    clock: &mut C,
    cfg: &AgentConfig,
    current_etag: Option<&str>,
    battery_percent: Option<u8>,
) -> Result<FetchOutcome, AgentError> {
    let url = build_url(cfg, battery_percent)?;
    let mut headers: Vec<(&str, &str)> = vec![("Accept", "application/octet-stream")];
    if let Some(tag) = current_etag {
        headers.push(("If-None-Match", tag));
    }
    debug!("fetch: GET {}", url);

    let mut response = transport
        .get(&url, &headers)
        .map_err(|e| AgentError::from(ProtocolError::Transport(e)))?;
    let status = response.status();
    if status == 304 {
        info!("fetch: payload unchanged (304)");
        return Ok(FetchOutcome::NotModified);
    }
    if status != 200 {
        return Err(ProtocolError::Status(status).into());
    }

    let etag = response.header("ETag").filter(|tag| !tag.is_empty());
    let len = response
        .header("Content-Length")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or(ProtocolError::MissingLength)?;
    if len > cfg.max_payload_bytes {
        return Err(ProtocolError::Oversize {
            len,
            max: cfg.max_payload_bytes,
        }
        .into());
    }

    let mut body = Vec::new();
    body.try_reserve_exact(len)
        .map_err(|_| AgentError::Allocation { bytes: len })?;
    let mut chunk = vec![0u8; cfg.chunk_bytes.min(len.max(1))];

    let started = clock.now();
    let mut last_progress = started;
    while body.len() < len {
        let want = (len - body.len()).min(chunk.len());
        let read_began = clock.now();
        let n = match response.read(&mut chunk[..want]) {
            Ok(n) => n,
            Err(TransportError::Closed) => {
                return Err(ProtocolError::ShortRead {
                    got: body.len(),
                    want: len,
                }
                .into());
            }
            Err(e) => return Err(ProtocolError::Transport(e).into()),
        };
        let now = clock.now();
        if n > 0 {
            body.extend_from_slice(&chunk[..n]);
            last_progress = now;
            if body.len() >= len {
                break;
            }
        }
        if now.saturating_sub(read_began) > cfg.read_timeout {
            return Err(ProtocolError::ReadTimeout.into());
        }
        if now.saturating_sub(last_progress) > cfg.stall_timeout {
            return Err(ProtocolError::Stalled.into());
        }
        if now.saturating_sub(started) > cfg.overall_timeout {
            return Err(ProtocolError::OverallTimeout.into());
        }
        clock.yield_now();
    }

    info!("fetch: received {} bytes", body.len());
    Ok(FetchOutcome::Payload { body, etag })
}
