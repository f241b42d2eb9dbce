//! ESP-IDF HTTP client behind the [`Transport`] trait.

use std::time::{Duration, Instant};

use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Read;
use esp_idf_sys::{esp_crt_bundle_attach, ESP_ERR_HTTP_EAGAIN};

use super::{Clock, HttpResponse, Transport, TransportError};

/// Wall clock for the deadline checks, plus a FreeRTOS-friendly yield so the
/// idle task and watchdog run between chunk reads.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&mut self) -> Duration {
        self.origin.elapsed()
    }

    fn yield_now(&mut self) {
        FreeRtos::delay_ms(10);
    }
}

/// One fresh connection per request; a wake cycle only ever makes one.
pub struct EspTransport {
    read_timeout: Duration,
}

impl EspTransport {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

pub struct EspResponse {
    connection: EspHttpConnection,
}

impl Transport for EspTransport {
    type Response = EspResponse;

    fn get(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Self::Response, TransportError> {
        let mut connection = EspHttpConnection::new(&Configuration {
            timeout: Some(self.read_timeout),
            crt_bundle_attach: Some(esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(io)?;
        connection
            .initiate_request(Method::Get, url, headers)
            .map_err(io)?;
        connection.initiate_response().map_err(io)?;
        Ok(EspResponse { connection })
    }
}

impl HttpResponse for EspResponse {
    fn status(&mut self) -> u16 {
        self.connection.status()
    }

    fn header(&mut self, name: &str) -> Option<String> {
        self.connection.header(name).map(str::to_string)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.connection.read(buf) {
            // The IDF client returns 0 only at end of stream; the caller
            // still expects bytes, so surface it as a close.
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(e) if e.0.code() == ESP_ERR_HTTP_EAGAIN as i32 => Ok(0),
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }
}

fn io(e: esp_idf_sys::EspError) -> TransportError {
    TransportError::Io(e.to_string())
}
