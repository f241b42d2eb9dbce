//! Byte codecs for persisted cache records.
//!
//! Records are serialized by hand into small fixed layouts, the same way
//! WiFi credentials are stored: no serde, no versioning beyond a length
//! check, and corrupt bytes decode to an error rather than a panic. A
//! record that fails to decode is treated as absent by the store tiers.

use std::fmt;
use std::net::Ipv4Addr;

/// Serialized size of a [`ConnectionHint`].
pub const CONNECTION_HINT_LEN: usize = 7;

/// Serialized size of a [`NetLease`].
pub const NET_LEASE_LEN: usize = 20;

/// Cached radio-level association target for one known AP.
///
/// Written on every successful join with the BSSID and channel the join
/// actually landed on; lets the next cycle skip discovery entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHint {
    /// Hardware identifier of the specific AP radio.
    pub bssid: [u8; 6],
    /// 2.4 GHz channel (1-14).
    pub channel: u8,
}

impl ConnectionHint {
    /// Serialize to the fixed 7-byte layout `[bssid:6][channel:1]`.
    pub fn to_bytes(&self) -> [u8; CONNECTION_HINT_LEN] {
        let mut bytes = [0u8; CONNECTION_HINT_LEN];
        bytes[..6].copy_from_slice(&self.bssid);
        bytes[6] = self.channel;
        bytes
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() != CONNECTION_HINT_LEN {
            return Err(RecordError::BadLength {
                record: "connection hint",
                len: bytes.len(),
                want: CONNECTION_HINT_LEN,
            });
        }
        let channel = bytes[6];
        if !(1..=14).contains(&channel) {
            return Err(RecordError::BadChannel(channel));
        }
        let mut bssid = [0u8; 6];
        bssid.copy_from_slice(&bytes[..6]);
        Ok(Self { bssid, channel })
    }
}

/// A previously observed DHCP result, reused to skip DHCP on later joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetLease {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub dns1: Ipv4Addr,
    pub dns2: Ipv4Addr,
}

impl NetLease {
    /// Serialize to the fixed 20-byte layout
    /// `[ip:4][gateway:4][subnet:4][dns1:4][dns2:4]`.
    pub fn to_bytes(&self) -> [u8; NET_LEASE_LEN] {
        let mut bytes = [0u8; NET_LEASE_LEN];
        for (i, addr) in [self.ip, self.gateway, self.subnet, self.dns1, self.dns2]
            .iter()
            .enumerate()
        {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&addr.octets());
        }
        bytes
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() != NET_LEASE_LEN {
            return Err(RecordError::BadLength {
                record: "net lease",
                len: bytes.len(),
                want: NET_LEASE_LEN,
            });
        }
        let addr = |i: usize| {
            Ipv4Addr::new(bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3])
        };
        let lease = Self {
            ip: addr(0),
            gateway: addr(1),
            subnet: addr(2),
            dns1: addr(3),
            dns2: addr(4),
        };
        if lease.ip.is_unspecified() {
            return Err(RecordError::UnspecifiedAddress);
        }
        Ok(lease)
    }
}

/// Record decode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    BadLength {
        record: &'static str,
        len: usize,
        want: usize,
    },
    BadChannel(u8),
    UnspecifiedAddress,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLength { record, len, want } => {
                write!(f, "{}: {} bytes (want {})", record, len, want)
            }
            Self::BadChannel(ch) => write!(f, "channel {} out of range", ch),
            Self::UnspecifiedAddress => write!(f, "lease IP is 0.0.0.0"),
        }
    }
}

impl std::error::Error for RecordError {}
