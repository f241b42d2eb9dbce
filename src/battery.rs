//! Battery voltage sampling.
//!
//! The battery is read once per wake cycle, before the radio is started.
//! That ordering is a hard precondition: radio activity corrupts readings
//! on the shared ADC unit, so [`crate::agent::run_cycle`] always runs this
//! stage first.
//!
//! The raw samples are averaged, scaled through the external divider to a
//! cell voltage and mapped linearly onto `[0, 100]`. A raw average of
//! exactly zero means the sense line is dead; the reading is reported as
//! `None` and omitted from the outgoing request instead of being sent as a
//! misleading 0%.

use log::debug;

use crate::config::BatteryConfig;

/// Report from the battery source used by the cycle orchestrator.
pub trait BatterySource {
    /// Sample the battery and return a clamped percentage, or `None` when
    /// the hardware reading is implausible.
    fn read_percent(&mut self) -> Option<u8>;
}

/// Convert an averaged raw ADC value to a clamped percentage.
///
/// Returns `None` iff `raw_average` is zero.
pub fn percent_from_average(raw_average: u32, cfg: &BatteryConfig) -> Option<u8> {
    if raw_average == 0 {
        return None;
    }

    let pin_mv = raw_average as u64 * cfg.adc_reference_mv as u64 / cfg.adc_full_scale as u64;
    let cell_mv = (pin_mv as f32 * cfg.divider_ratio) as u32;
    debug!("battery: raw avg {} -> {} mV", raw_average, cell_mv);

    let percent = if cell_mv <= cfg.empty_mv {
        0
    } else if cell_mv >= cfg.full_mv {
        100
    } else {
        ((cell_mv - cfg.empty_mv) * 100 / (cfg.full_mv - cfg.empty_mv)) as u8
    };
    Some(percent)
}

/// A battery reading taken earlier in the cycle, handed to the
/// orchestrator. The device entry point samples the ADC while the radio is
/// still off and wraps the result in this type.
pub struct MeasuredBattery(pub Option<u8>);

impl BatterySource for MeasuredBattery {
    fn read_percent(&mut self) -> Option<u8> {
        self.0
    }
}

/// One-shot ADC sampling (device build).
#[cfg(feature = "esp32")]
pub mod esp {
    use esp_idf_hal::adc::attenuation::DB_11;
    use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
    use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
    use esp_idf_hal::adc::ADC1;
    use esp_idf_hal::gpio::Gpio34;
    use log::warn;

    use super::percent_from_average;
    use crate::config::BatteryConfig;

    /// Sample the battery sense pin (ADC1 / GPIO34 behind the on-board
    /// divider) and average the configured number of one-shot readings.
    ///
    /// Must be called before the WiFi driver is started.
    pub fn read_battery_percent(adc1: ADC1, pin: Gpio34, cfg: &BatteryConfig) -> Option<u8> {
        let adc = match AdcDriver::new(adc1) {
            Ok(adc) => adc,
            Err(e) => {
                warn!("battery: ADC init failed: {:?}", e);
                return None;
            }
        };
        let channel_config = AdcChannelConfig {
            attenuation: DB_11,
            calibration: true,
            ..Default::default()
        };
        let mut channel = match AdcChannelDriver::new(&adc, pin, &channel_config) {
            Ok(channel) => channel,
            Err(e) => {
                warn!("battery: ADC channel init failed: {:?}", e);
                return None;
            }
        };

        let samples = cfg.sample_count.max(1) as u32;
        let mut sum: u32 = 0;
        for _ in 0..samples {
            match adc.read(&mut channel) {
                Ok(raw) => sum += raw as u32,
                Err(e) => {
                    warn!("battery: ADC read failed: {:?}", e);
                    return None;
                }
            }
        }
        percent_from_average(sum / samples, cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BatteryConfig {
        BatteryConfig::default()
    }

    // With divider 2.0, ref 3300 mV and full scale 4095, a raw average maps
    // to cell millivolts as raw * 3300 / 4095 * 2.
    fn raw_for_mv(cell_mv: u32) -> u32 {
        (cell_mv as u64 * 4095 / 2 / 3300) as u32
    }

    #[test]
    fn test_zero_average_is_fault() {
        assert_eq!(percent_from_average(0, &cfg()), None);
    }

    #[test]
    fn test_clamped_to_zero_below_empty() {
        assert_eq!(percent_from_average(raw_for_mv(2500), &cfg()), Some(0));
        assert_eq!(percent_from_average(raw_for_mv(3000), &cfg()), Some(0));
    }

    #[test]
    fn test_clamped_to_full_above_full() {
        assert_eq!(percent_from_average(raw_for_mv(4300), &cfg()), Some(100));
        assert_eq!(percent_from_average(4095, &cfg()), Some(100));
    }

    #[test]
    fn test_midpoint_is_half() {
        let pct = percent_from_average(raw_for_mv(3600), &cfg()).unwrap();
        // Integer scaling through the ADC loses a little; half of the
        // 3.0-4.2 V window is 50%.
        assert!((49..=50).contains(&pct), "got {}", pct);
    }

    #[test]
    fn test_one_raw_count_is_not_a_fault() {
        // Barely-alive sense line still yields a (clamped) reading.
        assert_eq!(percent_from_average(1, &cfg()), Some(0));
    }
}
