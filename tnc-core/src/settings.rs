//! Persisted TNC settings record

use crate::hal::HalError;
use crate::types::{GainLevel, OutputLevelSetting, TwistSetting};

/// Audio fields of the persisted settings record plus an integrity checksum.
///
/// Mutating a field does not refresh the checksum; call
/// [`TncSettings::update_crc`] once all edits are done. Writing the record to
/// non-volatile memory is the job of a [`SettingsStore`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TncSettings {
    /// Receive gain step, `0..=4`
    pub input_gain: u8,
    /// Receive twist correction in dB, `-3..=9`
    pub rx_twist: i8,
    /// Packed output level (see [`OutputLevelSetting`])
    pub output_gain: u8,
    /// CRC-16/CCITT-FALSE over the fields above
    pub checksum: u16,
}

impl Default for TncSettings {
    fn default() -> Self {
        let mut settings = Self {
            input_gain: 0,
            rx_twist: 0,
            output_gain: OutputLevelSetting::new(false, 64).raw(),
            checksum: 0,
        };
        settings.update_crc();
        settings
    }
}

impl TncSettings {
    /// Recompute the checksum from the current field values
    pub fn update_crc(&mut self) {
        self.checksum = self.compute_crc();
    }

    /// True if the stored checksum matches the fields
    pub fn is_valid(&self) -> bool {
        self.checksum == self.compute_crc()
    }

    /// Stored input gain, if it is a valid step
    pub fn input_gain(&self) -> Option<GainLevel> {
        GainLevel::new(self.input_gain)
    }

    pub fn set_input_gain(&mut self, gain: GainLevel) {
        self.input_gain = gain.value();
    }

    pub fn rx_twist(&self) -> TwistSetting {
        TwistSetting::new(self.rx_twist as i32)
    }

    pub fn set_rx_twist(&mut self, twist: TwistSetting) {
        self.rx_twist = twist.db();
    }

    pub fn output_level(&self) -> OutputLevelSetting {
        OutputLevelSetting::from_raw(self.output_gain)
    }

    fn compute_crc(&self) -> u16 {
        crc16_ccitt_false(&[self.input_gain, self.rx_twist as u8, self.output_gain])
    }
}

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection)
pub fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Non-volatile storage for the settings record
pub trait SettingsStore {
    /// Write the record to persistent memory
    fn store(&mut self, settings: &TncSettings) -> Result<(), HalError>;

    /// Read the record back, `None` if nothing valid is stored
    fn load(&mut self) -> Result<Option<TncSettings>, HalError>;
}
