//! Core data types for audio level management

use micromath::F32Ext;

/// Discrete receive gain step of the analog front end
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "std", derive(Hash))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GainLevel(u8);

impl GainLevel {
    /// Lowest step (unity gain follower)
    pub const MIN: GainLevel = GainLevel(0);
    /// Highest step (24 dB)
    pub const MAX: GainLevel = GainLevel(4);

    /// Create a gain level, rejecting anything above [`GainLevel::MAX`]
    pub const fn new(level: u8) -> Option<Self> {
        if level <= Self::MAX.0 {
            Some(Self(level))
        } else {
            None
        }
    }

    /// Raw step value in `0..=4`
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Next step up, saturating at [`GainLevel::MAX`]
    pub const fn next(&self) -> GainLevel {
        if self.0 < Self::MAX.0 {
            GainLevel(self.0 + 1)
        } else {
            *self
        }
    }

    /// Nominal gain in dB (6 dB per step)
    pub const fn nominal_db(&self) -> u8 {
        self.0 * 6
    }

    /// Front-end configuration programmed for this step
    pub const fn front_end(&self) -> FrontEndConfig {
        match self.0 {
            0 => FrontEndConfig { mode: AmplifierMode::Follower, dc_offset: 2048 },
            1 => FrontEndConfig { mode: AmplifierMode::Pga(2), dc_offset: 1024 },
            2 => FrontEndConfig { mode: AmplifierMode::Pga(4), dc_offset: 512 },
            3 => FrontEndConfig { mode: AmplifierMode::Pga(8), dc_offset: 256 },
            _ => FrontEndConfig { mode: AmplifierMode::Pga(16), dc_offset: 128 },
        }
    }
}

impl From<GainLevel> for u8 {
    fn from(level: GainLevel) -> u8 {
        level.0
    }
}

/// Input amplifier operating mode
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AmplifierMode {
    /// Voltage follower, 0 dB
    Follower,
    /// Programmable gain amplifier with the given multiplier
    Pga(u8),
}

/// Analog front-end setting for one gain step
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrontEndConfig {
    /// Amplifier mode
    pub mode: AmplifierMode,
    /// DC bias written to the 12-bit bias DAC
    pub dc_offset: u16,
}

/// ADC capture channel
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioChannel {
    /// Receive audio input from the radio
    AudioIn,
}

/// Amplitude statistics of one capture window
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LevelSample {
    /// Vpp
    pub peak_to_peak: u16,
    /// Vavg
    pub average: u16,
    /// Vmin
    pub min: u16,
    /// Vmax
    pub max: u16,
}

impl LevelSample {
    pub const fn new(peak_to_peak: u16, average: u16, min: u16, max: u16) -> Self {
        Self { peak_to_peak, average, min, max }
    }

    /// True if the capture touched either rail of the converter
    pub const fn is_saturated(&self, low: u16, high: u16) -> bool {
        self.max > high || self.min < low
    }
}

/// Operator-visible status indicators
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Indicator {
    /// Carrier detect LED
    Dcd,
    /// Transmit LED
    Tx,
    /// Auxiliary LED used for calibration feedback
    Other,
}

/// Receive twist correction in whole dB, clamped to `[-3, 9]`
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TwistSetting(i8);

impl TwistSetting {
    pub const MIN_DB: i8 = -3;
    pub const MAX_DB: i8 = 9;

    /// Clamp a whole-dB value into range
    pub const fn new(db: i32) -> Self {
        let clamped = if db < Self::MIN_DB as i32 {
            Self::MIN_DB
        } else if db > Self::MAX_DB as i32 {
            Self::MAX_DB
        } else {
            db as i8
        };
        Self(clamped)
    }

    /// Round a measured skew to the nearest dB (half away from zero) and clamp.
    /// NaN measurements map to 0 dB.
    pub fn from_measurement(db: f32) -> Self {
        if db.is_nan() {
            return Self(0);
        }
        // `as` saturates for out-of-range and infinite values
        Self::new(F32Ext::round(db) as i32)
    }

    pub const fn db(&self) -> i8 {
        self.0
    }
}

/// Persisted output level byte: bit 7 enables the coarse attenuator,
/// bits 0-6 index the volume table
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutputLevelSetting(u8);

impl OutputLevelSetting {
    pub const ATTENUATE_BIT: u8 = 0x80;
    pub const INDEX_MASK: u8 = 0x7F;

    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Pack an attenuator flag and table index; the index is masked to 7 bits
    pub const fn new(attenuate: bool, index: u8) -> Self {
        let flag = if attenuate { Self::ATTENUATE_BIT } else { 0 };
        Self(flag | (index & Self::INDEX_MASK))
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    pub const fn attenuate(&self) -> bool {
        self.0 & Self::ATTENUATE_BIT != 0
    }

    pub const fn index(&self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }
}

/// Decoded output level: coarse attenuator state plus fine-gain register value
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutputLevel {
    pub attenuate: bool,
    pub register: i16,
}

/// Outcome of one full calibration episode
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationReport {
    /// Selected receive gain
    pub gain: GainLevel,
    /// Stored twist correction
    pub twist: TwistSetting,
    /// Average level recorded on the final gain step
    pub virtual_ground: u16,
}

/// Gain calibration parameters
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationConfig {
    /// Samples above this count as clipped at the top rail
    pub saturation_high: u16,
    /// Samples below this count as clipped at the bottom rail
    pub saturation_low: u16,
    /// Vpp above this is strong enough to stop searching
    pub target_peak_to_peak: u16,
    /// Highest step the search may reach
    pub max_gain: GainLevel,
    /// Channel sampled during calibration
    pub channel: AudioChannel,
    /// Re-sample budget for the saturation guard; `None` waits indefinitely
    pub saturation_retry_limit: Option<u32>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        crate::default_config()
    }
}

impl CalibrationConfig {
    /// Full scale of the 12-bit converter
    pub const ADC_FULL_SCALE: u16 = 4095;

    /// Create a new configuration with validation
    pub fn new(
        saturation_low: u16,
        saturation_high: u16,
        target_peak_to_peak: u16,
        max_gain: GainLevel,
        saturation_retry_limit: Option<u32>,
    ) -> Result<Self, &'static str> {
        if saturation_high > Self::ADC_FULL_SCALE {
            return Err("Saturation threshold exceeds ADC full scale");
        }
        if saturation_low >= saturation_high {
            return Err("Saturation window is empty");
        }
        if target_peak_to_peak == 0 || target_peak_to_peak >= saturation_high - saturation_low {
            return Err("Target Vpp must fit inside the saturation window");
        }
        if saturation_retry_limit == Some(0) {
            return Err("Retry limit must be at least 1");
        }

        Ok(Self {
            saturation_high,
            saturation_low,
            target_peak_to_peak,
            max_gain,
            channel: AudioChannel::AudioIn,
            saturation_retry_limit,
        })
    }
}
