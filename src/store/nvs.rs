//! NVS-backed durable tier.
//!
//! Static leases, the last-good AP index and the ETag mirror live in a
//! dedicated NVS namespace. NVS handles wear leveling, but the caller-side
//! throttles (last-good written on change only, ETag mirror under the
//! configured throttle) keep write volume low to begin with.

use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use esp_idf_sys::EspError;
use log::{debug, warn};

use super::records::{NetLease, NET_LEASE_LEN};
use super::DurableTier;
use crate::config::MAX_ETAG_LEN;

/// NVS namespace for agent state.
const NVS_NAMESPACE: &str = "inkpoll";

/// NVS key for the last-good AP index.
const KEY_LAST_GOOD_AP: &str = "last_ap";

/// NVS key for the ETag mirror.
const KEY_ETAG: &str = "etag";

/// Durable tier over the default NVS partition.
pub struct NvsDurableTier {
    nvs: EspNvs<NvsDefault>,
}

impl NvsDurableTier {
    /// Open (creating if needed) the agent's NVS namespace.
    pub fn new() -> Result<Self, EspError> {
        use esp_idf_svc::nvs::EspNvsPartition;
        let partition = EspNvsPartition::<NvsDefault>::take()?;
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }

    fn lease_key(ap: usize) -> String {
        format!("lease{}", ap)
    }
}

impl DurableTier for NvsDurableTier {
    fn static_lease(&self, ap: usize) -> Option<NetLease> {
        let mut buf = [0u8; NET_LEASE_LEN + 4];
        let bytes = self.nvs.get_raw(&Self::lease_key(ap), &mut buf).ok()??;
        match NetLease::from_bytes(bytes) {
            Ok(lease) => Some(lease),
            Err(e) => {
                warn!("nvs: dropping corrupt lease for AP {}: {}", ap, e);
                None
            }
        }
    }

    fn set_static_lease(&mut self, ap: usize, lease: &NetLease) {
        if let Err(e) = self.nvs.set_raw(&Self::lease_key(ap), &lease.to_bytes()) {
            warn!("nvs: failed to store lease for AP {}: {:?}", ap, e);
        }
    }

    fn clear_static_lease(&mut self, ap: usize) {
        if let Err(e) = self.nvs.remove(&Self::lease_key(ap)) {
            warn!("nvs: failed to clear lease for AP {}: {:?}", ap, e);
        }
    }

    fn last_good_ap(&self) -> Option<usize> {
        match self.nvs.get_u8(KEY_LAST_GOOD_AP) {
            Ok(Some(index)) => Some(index as usize),
            Ok(None) => None,
            Err(e) => {
                warn!("nvs: failed to read last-good AP: {:?}", e);
                None
            }
        }
    }

    fn set_last_good_ap(&mut self, ap: usize) {
        debug!("nvs: last-good AP -> {}", ap);
        if let Err(e) = self.nvs.set_u8(KEY_LAST_GOOD_AP, ap as u8) {
            warn!("nvs: failed to store last-good AP: {:?}", e);
        }
    }

    fn etag(&self) -> Option<String> {
        let mut buf = [0u8; MAX_ETAG_LEN + 1];
        let bytes = self.nvs.get_raw(KEY_ETAG, &mut buf).ok()??;
        match std::str::from_utf8(bytes) {
            Ok(s) if !s.is_empty() => Some(s.to_string()),
            _ => None,
        }
    }

    fn set_etag(&mut self, etag: &str) {
        let mut end = etag.len().min(MAX_ETAG_LEN);
        while !etag.is_char_boundary(end) {
            end -= 1;
        }
        if end < etag.len() {
            warn!("nvs: truncating oversize etag ({} bytes)", etag.len());
        }
        if let Err(e) = self.nvs.set_raw(KEY_ETAG, etag[..end].as_bytes()) {
            warn!("nvs: failed to store etag: {:?}", e);
        }
    }
}
