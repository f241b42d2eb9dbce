//! In-memory store tiers for host builds and tests.

use super::records::{ConnectionHint, NetLease};
use super::{DurableTier, FastTier};
use crate::config::MAX_KNOWN_APS;

/// Fast tier held in plain process memory.
#[derive(Debug, Default)]
pub struct MemFastTier {
    hints: [Option<ConnectionHint>; MAX_KNOWN_APS],
    etag: Option<String>,
    draw_count: u32,
    etag_changes: u32,
}

impl MemFastTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FastTier for MemFastTier {
    fn connection_hint(&self, ap: usize) -> Option<ConnectionHint> {
        self.hints.get(ap).copied().flatten()
    }

    fn set_connection_hint(&mut self, ap: usize, hint: &ConnectionHint) {
        if let Some(slot) = self.hints.get_mut(ap) {
            *slot = Some(*hint);
        }
    }

    fn clear_connection_hint(&mut self, ap: usize) {
        if let Some(slot) = self.hints.get_mut(ap) {
            *slot = None;
        }
    }

    fn etag(&self) -> Option<String> {
        self.etag.clone()
    }

    fn set_etag(&mut self, etag: &str) {
        self.etag = Some(etag.to_string());
    }

    fn draw_count(&self) -> u32 {
        self.draw_count
    }

    fn set_draw_count(&mut self, count: u32) {
        self.draw_count = count;
    }

    fn etag_changes(&self) -> u32 {
        self.etag_changes
    }

    fn set_etag_changes(&mut self, count: u32) {
        self.etag_changes = count;
    }
}

/// Durable tier held in plain process memory.
///
/// Also counts writes so tests can assert the wear-limiting rules.
#[derive(Debug, Default)]
pub struct MemDurableTier {
    leases: [Option<NetLease>; MAX_KNOWN_APS],
    last_good_ap: Option<usize>,
    etag: Option<String>,
    /// Total mutating calls, visible to tests.
    pub write_count: u32,
}

impl MemDurableTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableTier for MemDurableTier {
    fn static_lease(&self, ap: usize) -> Option<NetLease> {
        self.leases.get(ap).copied().flatten()
    }

    fn set_static_lease(&mut self, ap: usize, lease: &NetLease) {
        if let Some(slot) = self.leases.get_mut(ap) {
            *slot = Some(*lease);
            self.write_count += 1;
        }
    }

    fn clear_static_lease(&mut self, ap: usize) {
        if let Some(slot) = self.leases.get_mut(ap) {
            if slot.is_some() {
                self.write_count += 1;
            }
            *slot = None;
        }
    }

    fn last_good_ap(&self) -> Option<usize> {
        self.last_good_ap
    }

    fn set_last_good_ap(&mut self, ap: usize) {
        self.last_good_ap = Some(ap);
        self.write_count += 1;
    }

    fn etag(&self) -> Option<String> {
        self.etag.clone()
    }

    fn set_etag(&mut self, etag: &str) {
        self.etag = Some(etag.to_string());
        self.write_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_ap_is_harmless() {
        let mut fast = MemFastTier::new();
        fast.set_connection_hint(
            MAX_KNOWN_APS + 3,
            &ConnectionHint {
                bssid: [0; 6],
                channel: 1,
            },
        );
        assert_eq!(fast.connection_hint(MAX_KNOWN_APS + 3), None);
    }

    #[test]
    fn test_durable_counts_writes() {
        let mut durable = MemDurableTier::new();
        durable.set_last_good_ap(1);
        durable.set_etag("\"x\"");
        assert_eq!(durable.write_count, 2);
        // Clearing an absent lease is not a write.
        durable.clear_static_lease(0);
        assert_eq!(durable.write_count, 2);
    }
}
