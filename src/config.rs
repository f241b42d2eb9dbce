//! Agent configuration.
//!
//! Everything the agent needs to know at provisioning time lives in
//! [`AgentConfig`]: the known access point list, join and download timeout
//! policies, panel geometry, render flags and the sleep durations. All of
//! it is fixed for the lifetime of a wake cycle; nothing here is mutated at
//! runtime.
//!
//! # Example
//!
//! ```
//! use inkpoll::config::{AgentConfig, KnownAccessPoint};
//!
//! let mut config = AgentConfig::default();
//! config.access_points = vec![KnownAccessPoint::new("HomeNet", "hunter2-long")];
//! config.payload_url = "http://display.local/api/screen".to_string();
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;
use std::time::Duration;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length for WPA2.
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// Maximum number of known access points the cache tiers are sized for.
pub const MAX_KNOWN_APS: usize = 8;

/// Upper bound for a stored content tag (ETag), including quotes.
pub const MAX_ETAG_LEN: usize = 64;

/// Credentials for one known access point.
///
/// The AP's position in [`AgentConfig::access_points`] is its stable
/// identity: cache records in both store tiers are keyed by that index.
/// The passphrase is zeroed on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KnownAccessPoint {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// WPA2 passphrase; empty for open networks.
    pub passphrase: String,
}

impl KnownAccessPoint {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        }
    }
}

impl fmt::Debug for KnownAccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log the passphrase.
        f.debug_struct("KnownAccessPoint")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Battery measurement constants.
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryConfig {
    /// One-shot samples averaged per reading.
    pub sample_count: u8,
    /// ADC reference voltage in millivolts.
    pub adc_reference_mv: u32,
    /// ADC full-scale raw value (4095 for the 12-bit SAR ADC).
    pub adc_full_scale: u32,
    /// External voltage divider ratio between the cell and the ADC pin.
    pub divider_ratio: f32,
    /// Cell voltage mapped to 0%.
    pub empty_mv: u32,
    /// Cell voltage mapped to 100%.
    pub full_mv: u32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            sample_count: 8,
            adc_reference_mv: 3300,
            adc_full_scale: 4095,
            divider_ratio: 2.0,
            empty_mv: 3000,
            full_mv: 4200,
        }
    }
}

/// Full agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Known access points, in fallback order. Position is cache identity.
    pub access_points: Vec<KnownAccessPoint>,
    /// RSSI (dBm) at or above which a join is accepted without scanning.
    pub rssi_good: i8,
    /// Active scan attempts before falling back to best-effort joining.
    pub scan_attempts: u8,
    /// Join timeout when a cached BSSID/channel hint is applied.
    pub join_timeout_fast: Duration,
    /// Join timeout for un-hinted joins.
    pub join_timeout_full: Duration,

    /// Payload URL; must be http or https with a non-empty host.
    pub payload_url: String,
    /// Bound on any single blocking body read.
    pub read_timeout: Duration,
    /// Bound on time since the last successfully received byte.
    pub stall_timeout: Duration,
    /// Bound on total download wall-clock time.
    pub overall_timeout: Duration,
    /// Maximum bytes requested per read call.
    pub chunk_bytes: usize,
    /// Hard ceiling on `Content-Length`; larger bodies are rejected before
    /// any allocation.
    pub max_payload_bytes: usize,

    /// Panel width in pixels.
    pub panel_width: u32,
    /// Panel height in pixels.
    pub panel_height: u32,
    /// Rows per tile on the memory-constrained render path.
    pub tile_rows: u32,
    /// Largest single buffer the renderer may allocate. Frames above this
    /// go straight to the tiled path.
    pub max_buffer_bytes: usize,
    /// Full-panel clear every N successful draws; 0 clears only on the
    /// first draw after a power loss. Ghosting-vs-wear is the operator's
    /// call, not ours.
    pub clear_every_n_draws: u32,
    /// Invert pixel values (`v -> 15 - v`) for reverse-wired panels.
    pub invert_pixels: bool,
    /// Pack the first pixel of each byte pair into the low nibble instead
    /// of the high nibble.
    pub low_nibble_first: bool,

    /// Mirror the ETag to durable flash every N changes; 0 never mirrors.
    pub etag_flash_throttle: u32,

    pub battery: BatteryConfig,

    /// Radio TX power in dBm, applied verbatim when set.
    pub tx_power_dbm: Option<i8>,
    /// Radio power-save mode, applied verbatim.
    pub power_save: bool,

    /// Sleep after a 304 (content unchanged).
    pub sleep_same: Duration,
    /// Sleep after a successful render of new content.
    pub sleep_changed: Duration,
    /// Sleep after any failure.
    pub sleep_fail: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            access_points: Vec::new(),
            rssi_good: -65,
            scan_attempts: 3,
            join_timeout_fast: Duration::from_secs(4),
            join_timeout_full: Duration::from_secs(10),

            payload_url: String::new(),
            read_timeout: Duration::from_secs(5),
            stall_timeout: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(60),
            chunk_bytes: 4096,
            max_payload_bytes: 1024 * 1024,

            panel_width: 960,
            panel_height: 540,
            tile_rows: 20,
            max_buffer_bytes: usize::MAX,
            clear_every_n_draws: 0,
            invert_pixels: false,
            low_nibble_first: false,

            etag_flash_throttle: 0,

            battery: BatteryConfig::default(),

            tx_power_dbm: None,
            power_save: false,

            sleep_same: Duration::from_secs(15 * 60),
            sleep_changed: Duration::from_secs(15 * 60),
            sleep_fail: Duration::from_secs(5 * 60),
        }
    }
}

impl AgentConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_points.is_empty() {
            return Err(ConfigError::NoAccessPoints);
        }
        if self.access_points.len() > MAX_KNOWN_APS {
            return Err(ConfigError::TooManyAccessPoints {
                count: self.access_points.len(),
                max: MAX_KNOWN_APS,
            });
        }
        for ap in &self.access_points {
            if ap.ssid.is_empty() || ap.ssid.len() > MAX_SSID_LEN {
                return Err(ConfigError::BadSsid(ap.ssid.clone()));
            }
            if ap.passphrase.len() > MAX_PASSPHRASE_LEN {
                return Err(ConfigError::BadPassphrase(ap.ssid.clone()));
            }
        }
        // Width must divide evenly into bytes for every source encoding,
        // including four-pixels-per-byte 2bpp rows.
        if self.panel_width == 0 || self.panel_height == 0 || self.panel_width % 4 != 0 {
            return Err(ConfigError::BadPanelGeometry {
                width: self.panel_width,
                height: self.panel_height,
            });
        }
        if self.tile_rows == 0 {
            return Err(ConfigError::BadTileRows);
        }
        if self.chunk_bytes == 0 || self.max_payload_bytes == 0 {
            return Err(ConfigError::BadDownloadLimits);
        }
        Ok(())
    }

    /// Bytes in one full frame of the panel's native 4bpp packed format.
    pub fn frame_bytes(&self) -> usize {
        (self.panel_width as usize * self.panel_height as usize) / 2
    }
}

/// Errors produced by [`AgentConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NoAccessPoints,
    TooManyAccessPoints { count: usize, max: usize },
    BadSsid(String),
    BadPassphrase(String),
    BadPanelGeometry { width: u32, height: u32 },
    BadTileRows,
    BadDownloadLimits,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAccessPoints => write!(f, "no known access points configured"),
            Self::TooManyAccessPoints { count, max } => {
                write!(f, "too many access points: {} (max {})", count, max)
            }
            Self::BadSsid(ssid) => write!(f, "invalid SSID: {:?}", ssid),
            Self::BadPassphrase(ssid) => {
                write!(f, "invalid passphrase for SSID {:?}", ssid)
            }
            Self::BadPanelGeometry { width, height } => {
                write!(f, "invalid panel geometry: {}x{}", width, height)
            }
            Self::BadTileRows => write!(f, "tile height must be at least one row"),
            Self::BadDownloadLimits => write!(f, "download chunk/ceiling must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.access_points = vec![KnownAccessPoint::new("TestNet", "password123")];
        config.payload_url = "http://example.com/screen".to_string();
        config
    }

    #[test]
    fn test_default_config_has_no_aps() {
        let config = AgentConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::NoAccessPoints));
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_too_many_aps() {
        let mut config = valid_config();
        config.access_points =
            vec![KnownAccessPoint::new("N", "password123"); MAX_KNOWN_APS + 1];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyAccessPoints { .. })
        ));
    }

    #[test]
    fn test_ssid_too_long() {
        let mut config = valid_config();
        config.access_points = vec![KnownAccessPoint::new("a".repeat(33), "password123")];
        assert!(matches!(config.validate(), Err(ConfigError::BadSsid(_))));
    }

    #[test]
    fn test_open_network_passphrase_ok() {
        let mut config = valid_config();
        config.access_points = vec![KnownAccessPoint::new("OpenNet", "")];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_odd_panel_width_rejected() {
        let mut config = valid_config();
        config.panel_width = 961;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadPanelGeometry { .. })
        ));
    }

    #[test]
    fn test_zero_tile_rows_rejected() {
        let mut config = valid_config();
        config.tile_rows = 0;
        assert_eq!(config.validate(), Err(ConfigError::BadTileRows));
    }

    #[test]
    fn test_frame_bytes() {
        let config = valid_config();
        assert_eq!(config.frame_bytes(), 960 * 540 / 2);
    }

    #[test]
    fn test_debug_redacts_passphrase() {
        let ap = KnownAccessPoint::new("Net", "secret-pass");
        let printed = format!("{:?}", ap);
        assert!(!printed.contains("secret-pass"));
        assert!(printed.contains("Net"));
    }
}
