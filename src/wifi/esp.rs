//! ESP-IDF station driver behind the [`Radio`] trait.
//!
//! Joins are polled against an explicit deadline instead of relying on the
//! driver's own timeouts, so the caller's per-tier budgets hold.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::ipv4;
use esp_idf_svc::netif::{EspNetif, NetifConfiguration};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};
use esp_idf_sys::{
    esp, esp_wifi_set_max_tx_power, esp_wifi_set_ps, esp_wifi_sta_get_ap_info, wifi_ap_record_t,
    wifi_ps_type_t_WIFI_PS_MIN_MODEM, wifi_ps_type_t_WIFI_PS_NONE, EspError,
};
use log::{debug, warn};

use super::{JoinError, JoinInfo, JoinRequest, Radio, ScanRecord};
use crate::store::records::NetLease;

const POLL_INTERVAL_MS: u32 = 100;

pub struct EspRadio<'a> {
    wifi: EspWifi<'a>,
    started: bool,
    /// Whether the sta netif currently carries a fixed-address config.
    static_netif: bool,
    tx_power_dbm: Option<i8>,
    power_save: bool,
}

impl<'a> EspRadio<'a> {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        tx_power_dbm: Option<i8>,
        power_save: bool,
    ) -> Result<Self, EspError> {
        let wifi = EspWifi::new(modem, sysloop, nvs)?;
        Ok(Self {
            wifi,
            started: false,
            static_netif: false,
            tx_power_dbm,
            power_save,
        })
    }

    fn ensure_started(&mut self) -> Result<(), EspError> {
        if self.started {
            return Ok(());
        }
        self.wifi.start()?;
        self.started = true;
        // Power knobs only take effect on a started driver.
        if let Some(dbm) = self.tx_power_dbm {
            // The IDF unit is quarter-dBm.
            esp!(unsafe { esp_wifi_set_max_tx_power(dbm.saturating_mul(4)) })?;
        }
        let ps_mode = if self.power_save {
            wifi_ps_type_t_WIFI_PS_MIN_MODEM
        } else {
            wifi_ps_type_t_WIFI_PS_NONE
        };
        esp!(unsafe { esp_wifi_set_ps(ps_mode) })?;
        Ok(())
    }

    /// Swap the station netif between DHCP and a fixed lease as needed.
    fn apply_netif(&mut self, lease: Option<&NetLease>) -> Result<(), EspError> {
        match lease {
            Some(lease) => {
                let conf = NetifConfiguration {
                    ip_configuration: Some(ipv4::Configuration::Client(
                        ipv4::ClientConfiguration::Fixed(ipv4::ClientSettings {
                            ip: lease.ip,
                            subnet: ipv4::Subnet {
                                gateway: lease.gateway,
                                mask: ipv4::Mask(prefix_len(lease.subnet)),
                            },
                            dns: Some(lease.dns1),
                            secondary_dns: Some(lease.dns2),
                        }),
                    )),
                    ..NetifConfiguration::wifi_default_client()
                };
                self.wifi.swap_netif_sta(EspNetif::new_with_conf(&conf)?)?;
                self.static_netif = true;
            }
            None if self.static_netif => {
                self.wifi.swap_netif_sta(EspNetif::new_with_conf(
                    &NetifConfiguration::wifi_default_client(),
                )?)?;
                self.static_netif = false;
            }
            None => {}
        }
        Ok(())
    }

    /// Block until the interface is up with an address, or the deadline.
    fn wait_up(&mut self, timeout: Duration) -> Result<(), JoinError> {
        let deadline = Instant::now() + timeout;
        loop {
            let connected = self.wifi.is_connected().map_err(driver)?;
            if connected {
                let ip_info = self
                    .wifi
                    .sta_netif()
                    .get_ip_info()
                    .map_err(driver)?;
                if !ip_info.ip.is_unspecified() {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(JoinError::Timeout);
            }
            FreeRtos::delay_ms(POLL_INTERVAL_MS);
        }
    }

    fn associated_ap(&self) -> Option<([u8; 6], u8)> {
        let mut record = wifi_ap_record_t::default();
        let err = unsafe { esp_wifi_sta_get_ap_info(&mut record) };
        if err != esp_idf_sys::ESP_OK {
            return None;
        }
        Some((record.bssid, record.primary))
    }
}

fn driver(e: EspError) -> JoinError {
    JoinError::Driver(e.to_string())
}

/// Prefix length of a dotted-quad mask; a discontiguous mask rounds down.
fn prefix_len(mask: Ipv4Addr) -> u8 {
    u32::from(mask).leading_ones() as u8
}

impl Radio for EspRadio<'_> {
    fn join(&mut self, request: &JoinRequest<'_>) -> Result<JoinInfo, JoinError> {
        let auth_method = if request.passphrase.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let client = ClientConfiguration {
            ssid: request
                .ssid
                .try_into()
                .map_err(|_| JoinError::Driver("ssid too long".into()))?,
            password: request
                .passphrase
                .try_into()
                .map_err(|_| JoinError::Driver("passphrase too long".into()))?,
            auth_method,
            bssid: request.target.map(|(bssid, _)| bssid),
            channel: request.target.map(|(_, channel)| channel),
            ..Default::default()
        };

        self.apply_netif(request.lease.as_ref()).map_err(driver)?;
        self.wifi
            .set_configuration(&Configuration::Client(client))
            .map_err(driver)?;
        self.ensure_started().map_err(driver)?;
        self.wifi.connect().map_err(driver)?;
        if let Err(e) = self.wait_up(request.timeout) {
            self.leave();
            return Err(e);
        }

        let (bssid, channel) = match self.associated_ap() {
            Some(ap) => ap,
            // Driver raced us; fall back to what was requested.
            None => request.target.unwrap_or(([0; 6], 0)),
        };
        let lease = match request.lease {
            Some(lease) => lease,
            None => {
                let netif = self.wifi.sta_netif();
                let ip_info = netif.get_ip_info().map_err(driver)?;
                NetLease {
                    ip: ip_info.ip,
                    gateway: ip_info.subnet.gateway,
                    subnet: ip_info.subnet.mask.into(),
                    dns1: netif.get_dns(),
                    dns2: netif.get_secondary_dns(),
                }
            }
        };
        debug!("wifi: up at {} on channel {}", lease.ip, channel);
        Ok(JoinInfo {
            bssid,
            channel,
            lease,
            used_static_lease: request.lease.is_some(),
        })
    }

    fn rssi(&mut self) -> Option<i8> {
        let mut record = wifi_ap_record_t::default();
        let err = unsafe { esp_wifi_sta_get_ap_info(&mut record) };
        if err != esp_idf_sys::ESP_OK {
            return None;
        }
        Some(record.rssi as i8)
    }

    fn scan(&mut self) -> Result<Vec<ScanRecord>, JoinError> {
        self.ensure_started().map_err(driver)?;
        let found = self.wifi.scan().map_err(driver)?;
        let mut records = Vec::with_capacity(found.len());
        for ap in found {
            records.push(ScanRecord {
                ssid: ap.ssid.as_str().to_string(),
                bssid: ap.bssid,
                channel: ap.channel,
                rssi: ap.signal_strength,
            });
        }
        Ok(records)
    }

    fn leave(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            warn!("wifi: disconnect failed: {}", e);
        }
    }
}
