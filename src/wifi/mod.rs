//! WiFi join strategy and radio abstraction.
//!
//! The join logic is platform-independent and runs against the [`Radio`]
//! trait so it can be exercised on the host with a scripted radio. The
//! ESP-IDF driver binding lives in [`esp`] behind the `esp32` feature.
//!
//! # Components
//!
//! - [`manager`] - the multi-tier join state machine (host-testable)
//! - [`esp`] - `EspWifi`-backed [`Radio`] implementation (ESP32 only)

pub mod manager;

#[cfg(feature = "esp32")]
pub mod esp;

use std::fmt;
use std::time::Duration;

pub use manager::{connect, Connection};

use crate::store::records::NetLease;

/// One visible BSSID from an active scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: i8,
}

/// Everything the radio needs for one bounded join attempt.
#[derive(Debug, Clone)]
pub struct JoinRequest<'a> {
    pub ssid: &'a str,
    pub passphrase: &'a str,
    /// Join this specific BSSID/channel instead of associating by SSID.
    pub target: Option<([u8; 6], u8)>,
    /// Apply this lease instead of running DHCP.
    pub lease: Option<NetLease>,
    pub timeout: Duration,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinInfo {
    /// BSSID the association actually landed on.
    pub bssid: [u8; 6],
    /// Channel the association actually landed on.
    pub channel: u8,
    /// The addressing in effect, whether applied statically or obtained
    /// via DHCP.
    pub lease: NetLease,
    /// True when the request's static lease was applied (and so must not
    /// be re-persisted).
    pub used_static_lease: bool,
}

/// Blocking radio interface, one association at a time.
pub trait Radio {
    /// Attempt one join, bounded by `request.timeout`.
    fn join(&mut self, request: &JoinRequest<'_>) -> Result<JoinInfo, JoinError>;

    /// Signal strength of the current association, when available.
    fn rssi(&mut self) -> Option<i8>;

    /// Run one active scan and return every visible BSSID.
    fn scan(&mut self) -> Result<Vec<ScanRecord>, JoinError>;

    /// Drop the current association, if any.
    fn leave(&mut self);
}

/// Radio-level join failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// The attempt did not complete within its timeout.
    Timeout,
    /// The AP refused the association or authentication.
    Refused,
    /// Driver-level failure.
    Driver(String),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "join timed out"),
            Self::Refused => write!(f, "association refused"),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
        }
    }
}

impl std::error::Error for JoinError {}

/// Terminal failure of the whole join strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Every tier was exhausted without a connection.
    NoApJoinable,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoApJoinable => write!(f, "no known access point joinable"),
        }
    }
}

impl std::error::Error for ConnectError {}
