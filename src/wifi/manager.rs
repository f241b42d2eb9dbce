//! Multi-tier join state machine.
//!
//! One call to [`connect`] runs the whole reconnection strategy for a wake
//! cycle:
//!
//! 1. Join the last-good AP, using its cached BSSID/channel hint under the
//!    short timeout when one exists.
//! 2. Accept immediately when the resulting RSSI clears the threshold.
//!    This is the dominant path and the reason the hints are cached at all.
//! 3. Otherwise scan actively, up to the configured attempt count, scoring
//!    every visible BSSID whose SSID matches a known AP and joining as soon
//!    as an attempt's best match clears the threshold.
//! 4. Failing that, join the strongest candidate seen across all attempts.
//! 5. Failing that (hidden SSIDs see no scan results), walk the known AP
//!    list in declared order, skipping the AP from step 1.
//! 6. Give up.
//!
//! Every successful join persists a fresh connection hint, updates the
//! last-good index when it changed, and persists the DHCP lease unless a
//! cached static lease was just applied. A static lease that fails gets
//! exactly one forced-DHCP retry and is never trusted twice.

use log::{debug, info, warn};

use super::{ConnectError, JoinError, JoinRequest, Radio, ScanRecord};
use crate::config::AgentConfig;
use crate::store::records::ConnectionHint;
use crate::store::{DurableTier, FastTier};

/// The association established for this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Index into the known AP list; the cache key for failure-path
    /// invalidation.
    pub ap_index: usize,
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: Option<i8>,
}

/// A scored scan match against the known AP list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    ap_index: usize,
    bssid: [u8; 6],
    channel: u8,
    rssi: i8,
}

/// Run the full join strategy.
pub fn connect<R: Radio>(
    radio: &mut R,
    fast: &mut dyn FastTier,
    durable: &mut dyn DurableTier,
    cfg: &AgentConfig,
) -> Result<Connection, ConnectError> {
    let first = durable
        .last_good_ap()
        .filter(|i| *i < cfg.access_points.len())
        .unwrap_or(0);

    // Tier 1: last-good AP, hinted when possible.
    let hint = fast.connection_hint(first);
    let timeout = if hint.is_some() {
        cfg.join_timeout_fast
    } else {
        cfg.join_timeout_full
    };
    let target = hint.map(|h| (h.bssid, h.channel));
    match try_join(radio, fast, durable, cfg, first, target, timeout) {
        Ok(conn) => {
            // Tier 2: accept on good signal.
            if conn.rssi.is_some_and(|rssi| rssi >= cfg.rssi_good) {
                info!(
                    "wifi: last-good AP {} accepted at {} dBm",
                    first,
                    conn.rssi.unwrap_or(0)
                );
                return Ok(conn);
            }
            info!(
                "wifi: AP {} connected but weak ({:?} dBm), scanning for better",
                first, conn.rssi
            );
            radio.leave();
        }
        Err(e) => {
            warn!("wifi: last-good AP {} failed: {}", first, e);
            if hint.is_some() {
                // A hint that failed to land is stale; force discovery.
                fast.clear_connection_hint(first);
            }
        }
    }

    // Tier 3: active scans, immediate join on a threshold-clearing match.
    let mut best: Option<Candidate> = None;
    for attempt in 0..cfg.scan_attempts {
        let records = match radio.scan() {
            Ok(records) => records,
            Err(e) => {
                warn!("wifi: scan attempt {} failed: {}", attempt + 1, e);
                continue;
            }
        };
        let attempt_best = score_records(&records, cfg);
        if let Some(candidate) = attempt_best {
            if best.is_none_or(|b| candidate.rssi > b.rssi) {
                best = Some(candidate);
            }
            if candidate.rssi >= cfg.rssi_good {
                info!(
                    "wifi: scan attempt {} found AP {} at {} dBm",
                    attempt + 1,
                    candidate.ap_index,
                    candidate.rssi
                );
                match join_candidate(radio, fast, durable, cfg, &candidate) {
                    Ok(conn) => return Ok(conn),
                    Err(e) => warn!(
                        "wifi: join of scanned AP {} failed: {}",
                        candidate.ap_index, e
                    ),
                }
            }
        } else {
            debug!("wifi: scan attempt {} saw no known SSID", attempt + 1);
        }
    }

    // Tier 4: best effort with the strongest candidate seen anywhere.
    if let Some(candidate) = best {
        info!(
            "wifi: no candidate cleared {} dBm, trying strongest ({} dBm)",
            cfg.rssi_good, candidate.rssi
        );
        match join_candidate(radio, fast, durable, cfg, &candidate) {
            Ok(conn) => return Ok(conn),
            Err(e) => warn!(
                "wifi: best-effort join of AP {} failed: {}",
                candidate.ap_index, e
            ),
        }
    }

    // Tier 5: exhaustive walk for hidden or unscannable APs.
    for ap_index in 0..cfg.access_points.len() {
        if ap_index == first {
            continue;
        }
        info!("wifi: exhaustive fallback, trying AP {}", ap_index);
        match try_join(
            radio,
            fast,
            durable,
            cfg,
            ap_index,
            None,
            cfg.join_timeout_full,
        ) {
            Ok(conn) => return Ok(conn),
            Err(e) => warn!("wifi: AP {} failed: {}", ap_index, e),
        }
    }

    warn!("wifi: all tiers exhausted");
    Err(ConnectError::NoApJoinable)
}

/// Pick the strongest record whose SSID matches a known AP.
fn score_records(records: &[ScanRecord], cfg: &AgentConfig) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for record in records {
        let Some(ap_index) = cfg
            .access_points
            .iter()
            .position(|ap| ap.ssid == record.ssid)
        else {
            continue;
        };
        let candidate = Candidate {
            ap_index,
            bssid: record.bssid,
            channel: record.channel,
            rssi: record.rssi,
        };
        if best.is_none_or(|b| candidate.rssi > b.rssi) {
            best = Some(candidate);
        }
    }
    best
}

fn join_candidate<R: Radio>(
    radio: &mut R,
    fast: &mut dyn FastTier,
    durable: &mut dyn DurableTier,
    cfg: &AgentConfig,
    candidate: &Candidate,
) -> Result<Connection, JoinError> {
    try_join(
        radio,
        fast,
        durable,
        cfg,
        candidate.ap_index,
        Some((candidate.bssid, candidate.channel)),
        cfg.join_timeout_fast,
    )
}

/// One join of a specific AP, handling the static-lease policy and, on
/// success, the persistence rules.
fn try_join<R: Radio>(
    radio: &mut R,
    fast: &mut dyn FastTier,
    durable: &mut dyn DurableTier,
    cfg: &AgentConfig,
    ap_index: usize,
    target: Option<([u8; 6], u8)>,
    timeout: std::time::Duration,
) -> Result<Connection, JoinError> {
    let ap = &cfg.access_points[ap_index];
    let lease = durable.static_lease(ap_index);
    let request = JoinRequest {
        ssid: &ap.ssid,
        passphrase: &ap.passphrase,
        target,
        lease,
        timeout,
    };

    let info = match radio.join(&request) {
        Ok(info) => info,
        Err(e) if lease.is_some() => {
            // The static lease is guilty until proven innocent: drop it and
            // retry exactly once with DHCP forced.
            warn!(
                "wifi: static-lease join of AP {} failed ({}), retrying with DHCP",
                ap_index, e
            );
            durable.clear_static_lease(ap_index);
            let request = JoinRequest {
                lease: None,
                ..request
            };
            radio.join(&request)?
        }
        Err(e) => return Err(e),
    };

    persist_success(fast, durable, ap_index, &info);
    let rssi = radio.rssi();
    debug!(
        "wifi: joined AP {} on channel {} ({:?} dBm)",
        ap_index, info.channel, rssi
    );
    Ok(Connection {
        ap_index,
        bssid: info.bssid,
        channel: info.channel,
        rssi,
    })
}

fn persist_success(
    fast: &mut dyn FastTier,
    durable: &mut dyn DurableTier,
    ap_index: usize,
    info: &super::JoinInfo,
) {
    fast.set_connection_hint(
        ap_index,
        &ConnectionHint {
            bssid: info.bssid,
            channel: info.channel,
        },
    );
    if durable.last_good_ap() != Some(ap_index) {
        durable.set_last_good_ap(ap_index);
    }
    // A lease we just applied is not re-learned; only DHCP results are new
    // information worth a flash write.
    if !info.used_static_lease {
        durable.set_static_lease(ap_index, &info.lease);
    }
}
