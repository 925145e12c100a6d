#![cfg_attr(not(feature = "std"), no_std)]

//! # TNC Core
//!
//! Audio level management for a packet-radio terminal node controller.
//! Provides the receive-gain calibration loop, the logarithmic output volume
//! mapping and the mutex-guarded, interrupt-fed serial transport.

pub mod types;
pub mod settings;
pub mod calibrator;
pub mod volume;
pub mod hal;

#[cfg(feature = "embassy-time")]
pub mod serial;


pub use types::*;
pub use settings::*;
pub use calibrator::*;
pub use volume::*;
pub use hal::*;

#[cfg(feature = "embassy-time")]
pub use serial::*;

/// TNC core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default calibration parameters for a 12-bit ADC front end
pub fn default_config() -> CalibrationConfig {
    CalibrationConfig {
        saturation_high: 4090,
        saturation_low: 5,
        target_peak_to_peak: 2048,
        max_gain: GainLevel::MAX,
        channel: AudioChannel::AudioIn,
        saturation_retry_limit: None,
    }
}
