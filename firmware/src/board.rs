//! Board support for the TNC audio path
//!
//! Collects the per-board settings and the non-volatile settings page. The
//! audio front end itself is simulated (see [`crate::mock_hardware`]).

use embassy_time::Duration;
use tnc_core::hal::HalError;
use tnc_core::settings::{SettingsStore, TncSettings};
use tnc_core::{default_config, CalibrationConfig};

use crate::mock_hardware::{SimAudioHal, SimFrontEnd};

/// Hardware configuration for the TNC board
#[derive(Clone, Copy, Debug)]
pub struct BoardConfig {
    /// Receive calibration thresholds
    pub calibration: CalibrationConfig,
    /// Longest wait for the serial TX lock before a frame is dropped
    pub serial_timeout: Duration,
    /// Peak-to-peak counts of the simulated receive tone at 0 dB
    pub input_amplitude: u16,
    /// Simulated tone imbalance in dB
    pub input_twist_db: f32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            calibration: default_config(),
            serial_timeout: Duration::from_millis(50),
            input_amplitude: 300,
            input_twist_db: 1.6,
        }
    }
}

/// Settings page kept in RAM in place of the flash sector
#[derive(Debug, Default)]
pub struct RamSettingsStore {
    page: Option<TncSettings>,
    writes: u32,
}

impl RamSettingsStore {
    pub const fn new() -> Self {
        Self { page: None, writes: 0 }
    }

    /// Number of page writes (flash wear)
    pub fn writes(&self) -> u32 {
        self.writes
    }
}

impl SettingsStore for RamSettingsStore {
    fn store(&mut self, settings: &TncSettings) -> Result<(), HalError> {
        if !settings.is_valid() {
            return Err(HalError::Io);
        }
        self.page = Some(*settings);
        self.writes = self.writes.wrapping_add(1);

        #[cfg(feature = "defmt")]
        defmt::info!("💾 Settings saved ({} writes)", self.writes);
        Ok(())
    }

    fn load(&mut self) -> Result<Option<TncSettings>, HalError> {
        Ok(self.page.filter(TncSettings::is_valid))
    }
}

/// Read the settings page, falling back to defaults when it is blank,
/// corrupt or unreadable
pub fn load_settings<S: SettingsStore>(store: &mut S) -> TncSettings {
    match store.load() {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            #[cfg(feature = "defmt")]
            defmt::warn!("No valid settings page, using defaults");
            TncSettings::default()
        }
        Err(_e) => {
            #[cfg(feature = "defmt")]
            defmt::warn!("Settings read failed: {}", _e);
            TncSettings::default()
        }
    }
}

/// Initialize the audio hardware
pub fn init_hardware(config: &BoardConfig) -> SimAudioHal {
    #[cfg(feature = "defmt")]
    defmt::info!("🔧 Initializing TNC audio hardware");

    SimAudioHal::new(SimFrontEnd::new(config.input_amplitude, config.input_twist_db))
}
