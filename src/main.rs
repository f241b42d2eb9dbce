//! Wake-cycle firmware binary.
//!
//! Boots, runs exactly one synchronization cycle, and goes back into deep
//! sleep for whatever interval the cycle decided. Everything the next wake
//! needs is in RTC memory or NVS by the time the sleep call fires.

#[cfg(feature = "esp32")]
mod firmware {
    use std::time::Duration;

    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_sys::EspError;
    use log::{error, info, warn};

    use inkpoll::battery::{self, MeasuredBattery};
    use inkpoll::fetch::esp::{EspTransport, MonotonicClock};
    use inkpoll::render::Panel;
    use inkpoll::store::nvs::NvsDurableTier;
    use inkpoll::store::rtc::RtcFastTier;
    use inkpoll::wifi::esp::EspRadio;
    use inkpoll::{run_cycle, AgentConfig, CycleDeps, KnownAccessPoint};

    // Vendored EPD driver, C side.
    extern "C" {
        fn epd_init();
        fn epd_power_on();
        fn epd_power_off();
        fn epd_clear();
        fn epd_draw_region(x: u32, y: u32, width: u32, height: u32, data: *const u8);
    }

    struct EpdPanel;

    impl EpdPanel {
        fn new() -> Self {
            unsafe { epd_init() };
            Self
        }
    }

    impl Panel for EpdPanel {
        fn power_on(&mut self) {
            unsafe { epd_power_on() }
        }

        fn power_off(&mut self) {
            unsafe { epd_power_off() }
        }

        fn clear(&mut self) {
            unsafe { epd_clear() }
        }

        fn draw_region(&mut self, x: u32, y: u32, width: u32, height: u32, data: &[u8]) {
            unsafe { epd_draw_region(x, y, width, height, data.as_ptr()) }
        }
    }

    /// Provisioning-time constants baked in at build time.
    fn device_config() -> AgentConfig {
        let mut cfg = AgentConfig::default();
        cfg.access_points = vec![KnownAccessPoint::new(
            option_env!("INKPOLL_WIFI_SSID").unwrap_or(""),
            option_env!("INKPOLL_WIFI_PASSPHRASE").unwrap_or(""),
        )];
        cfg.payload_url = option_env!("INKPOLL_PAYLOAD_URL")
            .unwrap_or("http://inkpoll.local/payload")
            .to_string();
        cfg
    }

    pub fn run() -> Duration {
        let cfg = device_config();
        if let Err(e) = cfg.validate() {
            error!("invalid configuration: {}", e);
            return cfg.sleep_fail;
        }
        match cycle(&cfg) {
            Ok(sleep) => sleep,
            Err(e) => {
                error!("platform bring-up failed: {}", e);
                cfg.sleep_fail
            }
        }
    }

    fn cycle(cfg: &AgentConfig) -> Result<Duration, EspError> {
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;

        // The divider reading is only clean before the radio starts drawing
        // current, so sample it first.
        let mut battery = MeasuredBattery(battery::esp::read_battery_percent(
            peripherals.adc1,
            peripherals.pins.gpio34,
            &cfg.battery,
        ));
        if battery.0.is_none() {
            warn!("battery: no reading this cycle");
        }

        let mut fast = RtcFastTier::take();
        let mut durable = NvsDurableTier::new()?;
        let mut radio = EspRadio::new(
            peripherals.modem,
            sysloop,
            None,
            cfg.tx_power_dbm,
            cfg.power_save,
        )?;
        let mut transport = EspTransport::new(cfg.read_timeout);
        let mut clock = MonotonicClock::new();
        let mut panel = EpdPanel::new();

        let mut deps = CycleDeps {
            radio: &mut radio,
            transport: &mut transport,
            clock: &mut clock,
            panel: &mut panel,
            battery: &mut battery,
            fast: &mut fast,
            durable: &mut durable,
        };
        let plan = run_cycle(&mut deps, cfg);
        info!("cycle finished: {:?}, sleeping {:?}", plan.outcome, plan.sleep);
        Ok(plan.sleep)
    }
}

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    let sleep = firmware::run();
    unsafe { esp_idf_sys::esp_deep_sleep(sleep.as_micros() as u64) };
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo test --no-default-features' for host testing.");
}
