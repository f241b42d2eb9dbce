//! Two-tier persistent cache store.
//!
//! The agent keeps its between-cycle state in two tiers with different
//! durability and wear characteristics:
//!
//! - **Fast tier** ([`FastTier`]): survives deep sleep but not a full power
//!   loss; effectively unlimited write endurance. Holds per-AP connection
//!   hints, the working ETag, the draw counter and the ETag change counter.
//! - **Durable tier** ([`DurableTier`]): flash-backed, survives power loss,
//!   limited write endurance. Holds per-AP static leases, the last-good AP
//!   index and an optional ETag mirror. Writers are rate-limited by design:
//!   the last-good index is written only on change and the ETag mirror only
//!   under the configured throttle.
//!
//! Validity is expressed as presence: a record marked invalid in a backend
//! is never returned through these traits, and invalidation clears the
//! validity flag before anything else touches the data.
//!
//! There is exactly one reader and one writer per wake cycle, so the traits
//! take `&mut self` without any interior locking.

pub mod memory;
pub mod records;

#[cfg(feature = "esp32")]
pub mod nvs;
#[cfg(feature = "esp32")]
pub mod rtc;

use log::{debug, info};

pub use memory::{MemDurableTier, MemFastTier};
pub use records::{ConnectionHint, NetLease, RecordError};

use crate::config::AgentConfig;

/// Sleep-surviving, power-loss-volatile storage.
pub trait FastTier {
    fn connection_hint(&self, ap: usize) -> Option<ConnectionHint>;
    fn set_connection_hint(&mut self, ap: usize, hint: &ConnectionHint);
    fn clear_connection_hint(&mut self, ap: usize);

    /// The working content tag, when one has been observed since power-on.
    fn etag(&self) -> Option<String>;
    fn set_etag(&mut self, etag: &str);

    /// Successful draws since the last full power loss.
    fn draw_count(&self) -> u32;
    fn set_draw_count(&mut self, count: u32);

    /// ETag changes observed since power-on, for the durable mirror
    /// throttle.
    fn etag_changes(&self) -> u32;
    fn set_etag_changes(&mut self, count: u32);
}

/// Flash-backed storage surviving full power loss.
pub trait DurableTier {
    fn static_lease(&self, ap: usize) -> Option<NetLease>;
    fn set_static_lease(&mut self, ap: usize, lease: &NetLease);
    fn clear_static_lease(&mut self, ap: usize);

    fn last_good_ap(&self) -> Option<usize>;
    fn set_last_good_ap(&mut self, ap: usize);

    fn etag(&self) -> Option<String>;
    fn set_etag(&mut self, etag: &str);
}

/// Resolve the working ETag across both tiers.
///
/// The fast tier wins when it holds a tag; otherwise the durable mirror is
/// the cold-boot fallback. Whichever side lost is resynchronized to the
/// value about to be used, so the next conditional request always carries
/// the most recently observed tag.
pub fn sync_etag(
    fast: &mut dyn FastTier,
    durable: &mut dyn DurableTier,
) -> Option<String> {
    match (fast.etag(), durable.etag()) {
        (Some(fast_tag), durable_tag) => {
            if durable_tag.as_deref() != Some(fast_tag.as_str()) {
                // Disagreement: the durable mirror is stale, but it is only
                // rewritten under the change throttle, so leave it alone.
                debug!("etag: durable mirror differs from working tag");
            }
            Some(fast_tag)
        }
        (None, Some(durable_tag)) => {
            info!("etag: cold boot, restoring tag from durable tier");
            fast.set_etag(&durable_tag);
            Some(durable_tag)
        }
        (None, None) => None,
    }
}

/// Record a newly observed ETag.
///
/// The fast tier is always updated. The durable mirror is written only
/// every `etag_flash_throttle`-th change; a throttle of zero never mirrors.
/// Flash write endurance is a first-class resource here.
pub fn note_etag_change(
    fast: &mut dyn FastTier,
    durable: &mut dyn DurableTier,
    cfg: &AgentConfig,
    etag: &str,
) {
    if fast.etag().as_deref() == Some(etag) {
        return;
    }
    fast.set_etag(etag);
    let changes = fast.etag_changes().wrapping_add(1);
    fast.set_etag_changes(changes);

    let throttle = cfg.etag_flash_throttle;
    if throttle > 0 && changes % throttle == 0 {
        info!("etag: mirroring to durable tier (change #{})", changes);
        durable.set_etag(etag);
    }
}

/// Drop the network caches for one AP after a failed cycle.
///
/// A stale BSSID/channel or static lease is a likely root cause of the
/// failure; clearing both forces the next cycle to rediscover topology
/// instead of repeating the same mistake.
pub fn invalidate_ap(fast: &mut dyn FastTier, durable: &mut dyn DurableTier, ap: usize) {
    info!("cache: invalidating connection hint and lease for AP {}", ap);
    fast.clear_connection_hint(ap);
    durable.clear_static_lease(ap);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use std::net::Ipv4Addr;

    fn lease() -> NetLease {
        NetLease {
            ip: Ipv4Addr::new(10, 0, 0, 9),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            subnet: Ipv4Addr::new(255, 255, 255, 0),
            dns1: Ipv4Addr::new(10, 0, 0, 1),
            dns2: Ipv4Addr::new(8, 8, 8, 8),
        }
    }

    #[test]
    fn test_sync_prefers_fast_tier() {
        let mut fast = MemFastTier::new();
        let mut durable = MemDurableTier::new();
        fast.set_etag("\"new\"");
        durable.set_etag("\"old\"");
        assert_eq!(sync_etag(&mut fast, &mut durable).as_deref(), Some("\"new\""));
        // Durable mirror is stale but stays untouched (throttle decides).
        assert_eq!(durable.etag().as_deref(), Some("\"old\""));
    }

    #[test]
    fn test_sync_restores_from_durable_on_cold_boot() {
        let mut fast = MemFastTier::new();
        let mut durable = MemDurableTier::new();
        durable.set_etag("\"survivor\"");
        assert_eq!(
            sync_etag(&mut fast, &mut durable).as_deref(),
            Some("\"survivor\"")
        );
        assert_eq!(fast.etag().as_deref(), Some("\"survivor\""));
    }

    #[test]
    fn test_sync_with_nothing_known() {
        let mut fast = MemFastTier::new();
        let mut durable = MemDurableTier::new();
        assert_eq!(sync_etag(&mut fast, &mut durable), None);
    }

    #[test]
    fn test_note_change_updates_fast_tier_only_by_default() {
        let mut fast = MemFastTier::new();
        let mut durable = MemDurableTier::new();
        let cfg = AgentConfig::default(); // throttle 0 = never mirror
        note_etag_change(&mut fast, &mut durable, &cfg, "\"a\"");
        note_etag_change(&mut fast, &mut durable, &cfg, "\"b\"");
        assert_eq!(fast.etag().as_deref(), Some("\"b\""));
        assert_eq!(durable.etag(), None);
    }

    #[test]
    fn test_note_change_mirrors_on_throttle() {
        let mut fast = MemFastTier::new();
        let mut durable = MemDurableTier::new();
        let mut cfg = AgentConfig::default();
        cfg.etag_flash_throttle = 2;
        note_etag_change(&mut fast, &mut durable, &cfg, "\"a\"");
        assert_eq!(durable.etag(), None);
        note_etag_change(&mut fast, &mut durable, &cfg, "\"b\"");
        assert_eq!(durable.etag().as_deref(), Some("\"b\""));
        note_etag_change(&mut fast, &mut durable, &cfg, "\"c\"");
        assert_eq!(durable.etag().as_deref(), Some("\"b\""));
    }

    #[test]
    fn test_note_change_ignores_same_tag() {
        let mut fast = MemFastTier::new();
        let mut durable = MemDurableTier::new();
        let mut cfg = AgentConfig::default();
        cfg.etag_flash_throttle = 1;
        note_etag_change(&mut fast, &mut durable, &cfg, "\"a\"");
        let changes = fast.etag_changes();
        note_etag_change(&mut fast, &mut durable, &cfg, "\"a\"");
        assert_eq!(fast.etag_changes(), changes);
    }

    #[test]
    fn test_invalidate_clears_both_records() {
        let mut fast = MemFastTier::new();
        let mut durable = MemDurableTier::new();
        fast.set_connection_hint(
            2,
            &ConnectionHint {
                bssid: [1, 2, 3, 4, 5, 6],
                channel: 6,
            },
        );
        durable.set_static_lease(2, &lease());
        invalidate_ap(&mut fast, &mut durable, 2);
        assert_eq!(fast.connection_hint(2), None);
        assert_eq!(durable.static_lease(2), None);
    }
}
