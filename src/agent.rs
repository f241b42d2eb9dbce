//! One wake cycle, start to sleep decision.
//!
//! The device runs exactly one pass of this sequence per wake: read the
//! battery before the radio powers up, reconcile the cached ETag, join,
//! fetch, maybe render, and reduce whatever happened to a sleep duration.
//! Nothing survives in memory across the sleep that follows; everything the
//! next cycle needs goes through the store tiers.

use std::time::Duration;

use log::{info, warn};

use crate::battery::BatterySource;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::fetch::{self, Clock, FetchOutcome, Transport};
use crate::render::{Panel, Renderer};
use crate::store::{self, DurableTier, FastTier};
use crate::wifi::{self, Radio};

/// How the cycle ended; decides the sleep interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Server confirmed the displayed content is current.
    Unchanged,
    /// New content was fetched and drawn.
    Updated,
    /// Something went wrong; caches for the active AP were dropped.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePlan {
    pub outcome: CycleOutcome,
    pub sleep: Duration,
}

/// Everything a cycle touches, injected so the whole sequence runs against
/// scripted collaborators on the host.
pub struct CycleDeps<'a, R, T, C, P, B> {
    pub radio: &'a mut R,
    pub transport: &'a mut T,
    pub clock: &'a mut C,
    pub panel: &'a mut P,
    pub battery: &'a mut B,
    pub fast: &'a mut dyn FastTier,
    pub durable: &'a mut dyn DurableTier,
}

/// Run one wake cycle to its sleep decision. Never panics, never retries
/// beyond the bounded attempts inside each stage.
pub fn run_cycle<R, T, C, P, B>(
    deps: &mut CycleDeps<'_, R, T, C, P, B>,
    cfg: &AgentConfig,
) -> CyclePlan
where
    R: Radio,
    T: Transport,
    C: Clock,
    P: Panel,
    B: BatterySource,
{
    // The ADC reading is only clean while the radio is still quiet.
    let battery = deps.battery.read_percent();
    let etag = store::sync_etag(deps.fast, deps.durable);

    let connection = match wifi::connect(deps.radio, deps.fast, deps.durable, cfg) {
        Ok(connection) => connection,
        Err(e) => {
            warn!("cycle: {}", e);
            // No AP was active; the manager already dropped the caches of
            // everything it tried and failed.
            return fail(deps, cfg, None);
        }
    };

    let plan = match online(deps, cfg, etag.as_deref(), battery) {
        Ok(plan) => plan,
        Err(e) => {
            warn!("cycle: {}", e);
            fail(deps, cfg, Some(connection.ap_index))
        }
    };
    // The radio is dead weight from here to the sleep call.
    deps.radio.leave();
    plan
}

/// The connected portion of the cycle.
fn online<R, T, C, P, B>(
    deps: &mut CycleDeps<'_, R, T, C, P, B>,
    cfg: &AgentConfig,
    etag: Option<&str>,
    battery: Option<u8>,
) -> Result<CyclePlan, AgentError>
where
    R: Radio,
    T: Transport,
    C: Clock,
    P: Panel,
    B: BatterySource,
{
    match fetch::fetch(deps.transport, deps.clock, cfg, etag, battery)? {
        FetchOutcome::NotModified => Ok(CyclePlan {
            outcome: CycleOutcome::Unchanged,
            sleep: cfg.sleep_same,
        }),
        FetchOutcome::Payload { body, etag: new_tag } => {
            let draw_count = deps.fast.draw_count();
            Renderer::new(deps.panel, cfg).render(&body, draw_count)?;
            deps.fast.set_draw_count(draw_count.wrapping_add(1));
            if let Some(tag) = new_tag {
                store::note_etag_change(deps.fast, deps.durable, cfg, &tag);
            }
            info!("cycle: drew update #{}", draw_count.wrapping_add(1));
            Ok(CyclePlan {
                outcome: CycleOutcome::Updated,
                sleep: cfg.sleep_changed,
            })
        }
    }
}

fn fail<R, T, C, P, B>(
    deps: &mut CycleDeps<'_, R, T, C, P, B>,
    cfg: &AgentConfig,
    active_ap: Option<usize>,
) -> CyclePlan {
    if let Some(ap) = active_ap {
        store::invalidate_ap(deps.fast, deps.durable, ap);
    }
    CyclePlan {
        outcome: CycleOutcome::Failed,
        sleep: cfg.sleep_fail,
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::battery::MeasuredBattery;
    use crate::config::KnownAccessPoint;
    use crate::fetch::{HttpResponse, TransportError};
    use crate::store::records::NetLease;
    use crate::store::{MemDurableTier, MemFastTier};
    use crate::wifi::{JoinError, JoinInfo, JoinRequest, ScanRecord};

    fn test_config() -> AgentConfig {
        let mut cfg = AgentConfig::default();
        cfg.access_points = vec![KnownAccessPoint::new("alpha", "secret")];
        cfg.payload_url = "http://display.local/frame".to_string();
        cfg.panel_width = 960;
        cfg.panel_height = 540;
        cfg.sleep_same = Duration::from_secs(900);
        cfg.sleep_changed = Duration::from_secs(600);
        cfg.sleep_fail = Duration::from_secs(300);
        cfg
    }

    struct StubRadio {
        joinable: bool,
        left: u32,
    }

    impl Radio for StubRadio {
        fn join(&mut self, request: &JoinRequest<'_>) -> Result<JoinInfo, JoinError> {
            if !self.joinable {
                return Err(JoinError::Timeout);
            }
            Ok(JoinInfo {
                bssid: [1; 6],
                channel: 6,
                lease: request.lease.unwrap_or(NetLease {
                    ip: Ipv4Addr::new(192, 168, 1, 30),
                    gateway: Ipv4Addr::new(192, 168, 1, 1),
                    subnet: Ipv4Addr::new(255, 255, 255, 0),
                    dns1: Ipv4Addr::new(192, 168, 1, 1),
                    dns2: Ipv4Addr::new(1, 1, 1, 1),
                }),
                used_static_lease: request.lease.is_some(),
            })
        }

        fn rssi(&mut self) -> Option<i8> {
            Some(-50)
        }

        fn scan(&mut self) -> Result<Vec<ScanRecord>, JoinError> {
            Ok(Vec::new())
        }

        fn leave(&mut self) {
            self.left += 1;
        }
    }

    struct StubResponse {
        status: u16,
        etag: Option<String>,
        body: Vec<u8>,
        offset: usize,
        stall: bool,
    }

    impl HttpResponse for StubResponse {
        fn status(&mut self) -> u16 {
            self.status
        }

        fn header(&mut self, name: &str) -> Option<String> {
            if name.eq_ignore_ascii_case("ETag") {
                self.etag.clone()
            } else if name.eq_ignore_ascii_case("Content-Length") {
                Some(self.body.len().to_string())
            } else {
                None
            }
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if self.stall {
                return Ok(0);
            }
            let n = buf.len().min(self.body.len() - self.offset);
            buf[..n].copy_from_slice(&self.body[self.offset..self.offset + n]);
            self.offset += n;
            Ok(n)
        }
    }

    struct StubTransport {
        status: u16,
        etag: Option<String>,
        body: Vec<u8>,
        stall: bool,
        last_url: Option<String>,
    }

    impl Transport for StubTransport {
        type Response = StubResponse;

        fn get(
            &mut self,
            url: &str,
            _headers: &[(&str, &str)],
        ) -> Result<Self::Response, TransportError> {
            self.last_url = Some(url.to_string());
            Ok(StubResponse {
                status: self.status,
                etag: self.etag.clone(),
                body: self.body.clone(),
                offset: 0,
                stall: self.stall,
            })
        }
    }

    /// Scripted time: only yields advance it, which is enough to trip the
    /// stall deadline deterministically.
    struct StubClock {
        now: Duration,
    }

    impl Clock for StubClock {
        fn now(&mut self) -> Duration {
            self.now
        }

        fn yield_now(&mut self) {
            self.now += Duration::from_secs(3);
        }
    }

    struct StubPanel {
        draws: u32,
        clears: u32,
    }

    impl Panel for StubPanel {
        fn power_on(&mut self) {}
        fn power_off(&mut self) {}

        fn clear(&mut self) {
            self.clears += 1;
        }

        fn draw_region(&mut self, _x: u32, _y: u32, _w: u32, _h: u32, _data: &[u8]) {
            self.draws += 1;
        }
    }

    struct Harness {
        radio: StubRadio,
        transport: StubTransport,
        clock: StubClock,
        panel: StubPanel,
        battery: MeasuredBattery,
        fast: MemFastTier,
        durable: MemDurableTier,
    }

    impl Harness {
        fn new(status: u16, etag: Option<&str>, body: Vec<u8>) -> Self {
            let _ = env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or("info"),
            )
            .is_test(true)
            .try_init();
            Self {
                radio: StubRadio {
                    joinable: true,
                    left: 0,
                },
                transport: StubTransport {
                    status,
                    etag: etag.map(str::to_string),
                    body,
                    stall: false,
                    last_url: None,
                },
                clock: StubClock {
                    now: Duration::ZERO,
                },
                panel: StubPanel {
                    draws: 0,
                    clears: 0,
                },
                battery: MeasuredBattery(Some(81)),
                fast: MemFastTier::new(),
                durable: MemDurableTier::new(),
            }
        }

        fn run(&mut self, cfg: &AgentConfig) -> CyclePlan {
            let mut deps = CycleDeps {
                radio: &mut self.radio,
                transport: &mut self.transport,
                clock: &mut self.clock,
                panel: &mut self.panel,
                battery: &mut self.battery,
                fast: &mut self.fast,
                durable: &mut self.durable,
            };
            run_cycle(&mut deps, cfg)
        }
    }

    fn native_frame() -> Vec<u8> {
        vec![0x5A; 259_200]
    }

    #[test]
    fn test_not_modified_sleeps_same_without_cache_writes() {
        let cfg = test_config();
        let mut h = Harness::new(304, None, Vec::new());
        h.fast.set_etag("\"v1\"");
        h.durable.set_etag("\"v1\"");
        let writes_before = h.durable.write_count;

        let plan = h.run(&cfg);
        assert_eq!(plan.outcome, CycleOutcome::Unchanged);
        assert_eq!(plan.sleep, cfg.sleep_same);
        assert_eq!(h.panel.draws, 0);
        // Join persistence touches the lease and last-good slots, but the
        // content caches stay untouched.
        assert_eq!(h.durable.etag(), Some("\"v1\"".to_string()));
        assert_eq!(h.durable.write_count, writes_before + 2);
    }

    #[test]
    fn test_cold_boot_resyncs_etag_from_durable() {
        let cfg = test_config();
        let mut h = Harness::new(304, None, Vec::new());
        h.durable.set_etag("\"v1\"");

        h.run(&cfg);
        assert_eq!(h.fast.etag(), Some("\"v1\"".to_string()));
    }

    #[test]
    fn test_changed_content_renders_and_sleeps_changed() {
        let cfg = test_config();
        let mut h = Harness::new(200, Some("\"v2\""), native_frame());
        h.fast.set_etag("\"v1\"");
        h.fast.set_draw_count(3);

        let plan = h.run(&cfg);
        assert_eq!(plan.outcome, CycleOutcome::Updated);
        assert_eq!(plan.sleep, cfg.sleep_changed);
        assert!(h.panel.draws > 0);
        assert_eq!(h.fast.draw_count(), 4);
        assert_eq!(h.fast.etag(), Some("\"v2\"".to_string()));
        // Throttle of zero never mirrors the tag to flash.
        assert_eq!(h.durable.etag(), None);
    }

    #[test]
    fn test_etag_mirrored_on_throttle_boundary() {
        let mut cfg = test_config();
        cfg.etag_flash_throttle = 2;
        let mut h = Harness::new(200, Some("\"v2\""), native_frame());
        h.fast.set_etag("\"v1\"");
        h.fast.set_etag_changes(1); // this cycle's change is the 2nd

        h.run(&cfg);
        assert_eq!(h.durable.etag(), Some("\"v2\"".to_string()));
    }

    #[test]
    fn test_battery_reading_reaches_the_request() {
        let cfg = test_config();
        let mut h = Harness::new(304, None, Vec::new());
        h.run(&cfg);
        assert_eq!(
            h.transport.last_url.as_deref(),
            Some("http://display.local/frame?deviceBattery=81")
        );
    }

    #[test]
    fn test_unreadable_battery_is_omitted_from_the_request() {
        let cfg = test_config();
        let mut h = Harness::new(304, None, Vec::new());
        h.battery = MeasuredBattery(None);
        h.run(&cfg);
        assert_eq!(
            h.transport.last_url.as_deref(),
            Some("http://display.local/frame")
        );
    }

    #[test]
    fn test_stalled_fetch_invalidates_active_ap() {
        let cfg = test_config();
        let mut h = Harness::new(200, Some("\"v2\""), native_frame());
        h.transport.stall = true;

        let plan = h.run(&cfg);
        assert_eq!(plan.outcome, CycleOutcome::Failed);
        assert_eq!(plan.sleep, cfg.sleep_fail);
        // The join itself succeeded and cached a hint and lease; the
        // failure dropped both so the next cycle rediscovers topology.
        assert_eq!(h.fast.connection_hint(0), None);
        assert_eq!(h.durable.static_lease(0), None);
        assert_eq!(h.panel.draws, 0);
    }

    #[test]
    fn test_bad_payload_size_invalidates_active_ap() {
        let cfg = test_config();
        let mut h = Harness::new(200, Some("\"v2\""), vec![0u8; 1000]);

        let plan = h.run(&cfg);
        assert_eq!(plan.outcome, CycleOutcome::Failed);
        assert_eq!(h.fast.connection_hint(0), None);
        // The failed cycle must not advance the content caches.
        assert_eq!(h.fast.etag(), None);
        assert_eq!(h.fast.draw_count(), 0);
    }

    #[test]
    fn test_no_joinable_ap_fails_without_touching_the_network() {
        let cfg = test_config();
        let mut h = Harness::new(304, None, Vec::new());
        h.radio.joinable = false;

        let plan = h.run(&cfg);
        assert_eq!(plan.outcome, CycleOutcome::Failed);
        assert_eq!(plan.sleep, cfg.sleep_fail);
        assert!(h.transport.last_url.is_none());
    }
}
