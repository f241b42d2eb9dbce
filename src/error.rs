//! Cycle failure taxonomy.
//!
//! Every stage of a wake cycle reports failures through [`AgentError`], and
//! every error class terminates the cycle in one of the three sleep
//! durations. Nothing here retries; bounded retries live inside the stages
//! themselves.

use std::fmt;

use crate::fetch::ProtocolError;
use crate::render::FormatError;
use crate::wifi::ConnectError;

/// Classified cycle failure.
///
/// The class decides diagnostics only; the sleep controller treats all of
/// them the same way (invalidate the active AP's caches, sleep the failure
/// interval).
#[derive(Debug)]
pub enum AgentError {
    /// Malformed configuration (bad payload URL). Fatal for the cycle.
    Config(String),
    /// No known access point was joinable this cycle.
    Connectivity(ConnectError),
    /// The HTTP exchange violated the protocol contract (bad status,
    /// missing or oversized `Content-Length`, short read, timeout).
    Protocol(ProtocolError),
    /// The payload size matched no known pixel encoding.
    Format(FormatError),
    /// A working buffer could not be allocated, including the tiled
    /// fallback's small buffer.
    Allocation { bytes: usize },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Connectivity(e) => write!(f, "connectivity error: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::Format(e) => write!(f, "format error: {}", e),
            Self::Allocation { bytes } => {
                write!(f, "allocation of {} bytes failed", bytes)
            }
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connectivity(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnectError> for AgentError {
    fn from(e: ConnectError) -> Self {
        Self::Connectivity(e)
    }
}

impl From<ProtocolError> for AgentError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<FormatError> for AgentError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}
