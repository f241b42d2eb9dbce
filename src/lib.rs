//! Deep-sleep e-ink display synchronization firmware library.
//!
//! This library contains platform-independent components that can be tested
//! on the host machine without ESP32 hardware. The hardware bindings live
//! in `esp` submodules behind the `esp32` feature.

pub mod agent;
pub mod battery;
pub mod config;
pub mod error;
pub mod fetch;
pub mod render;
pub mod store;
pub mod wifi;

// Re-export commonly used items
pub use agent::{run_cycle, CycleDeps, CycleOutcome, CyclePlan};
pub use config::{AgentConfig, BatteryConfig, ConfigError, KnownAccessPoint};
pub use error::AgentError;
