//! Logarithmic transmit volume mapping

use crate::hal::{HalError, OutputStage};
use crate::types::{OutputLevel, OutputLevelSetting};

/// Number of fine volume steps
pub const VOLUME_STEPS: usize = 128;

/// Register value at step 0
pub const VOLUME_BASE: i16 = 256;

/// Ratio between adjacent steps (~0.19 dB)
pub const VOLUME_STEP_FACTOR: f32 = 1.02207;

/// Fine-gain register values for each volume step, spanning ~24 dB.
///
/// Entry `i` is `round(256 * 1.02207^i)`, accumulated in `f32` the same way
/// the modulator firmware always has.
#[derive(Debug, PartialEq, Eq)]
pub struct VolumeTable([i16; VOLUME_STEPS]);

impl VolumeTable {
    pub const fn compute() -> Self {
        let mut table = [0i16; VOLUME_STEPS];
        let mut gain = 1.0f32;
        let mut i = 0;
        while i < VOLUME_STEPS {
            // All entries are positive, so adding one half and truncating rounds
            table[i] = (VOLUME_BASE as f32 * gain + 0.5) as i16;
            gain *= VOLUME_STEP_FACTOR;
            i += 1;
        }
        Self(table)
    }

    /// Register value for a 7-bit step index
    pub const fn get(&self, index: usize) -> i16 {
        self.0[index & (VOLUME_STEPS - 1)]
    }

    pub fn as_slice(&self) -> &[i16] {
        &self.0
    }
}

/// Volume table, evaluated once at build time and immutable afterwards
pub static VOLUME_TABLE: VolumeTable = VolumeTable::compute();

/// Decodes the persisted output level byte and drives the output stage
#[derive(Copy, Clone)]
pub struct VolumeMapper {
    table: &'static VolumeTable,
}

impl VolumeMapper {
    /// Bind the mapper to the shared volume table
    pub fn init() -> Self {
        Self::with_table(&VOLUME_TABLE)
    }

    pub const fn with_table(table: &'static VolumeTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &'static VolumeTable {
        self.table
    }

    /// Split a raw setting into attenuator flag and fine-gain register
    pub fn map_level(&self, raw: u8) -> OutputLevel {
        let setting = OutputLevelSetting::from_raw(raw);
        OutputLevel {
            attenuate: setting.attenuate(),
            register: self.table.get(setting.index()),
        }
    }

    /// Program the output stage for a raw setting
    pub fn apply<O: OutputStage>(&self, output: &mut O, raw: u8) -> Result<OutputLevel, HalError> {
        let level = self.map_level(raw);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "Setting output gain: {} (log {} + {})",
            raw, level.attenuate as i16, level.register
        );

        output.set_attenuator(level.attenuate)?;
        output.set_volume(level.register)?;
        Ok(level)
    }
}

impl Default for VolumeMapper {
    fn default() -> Self {
        Self::init()
    }
}
