//! Automatic receive gain calibration

use portable_atomic::{AtomicU16, Ordering};
use crate::hal::{AudioHal, HalError, InputGainPort, LevelSampler, StatusIndicators, TwistMeter};
use crate::settings::TncSettings;
use crate::types::{
    CalibrationConfig, CalibrationReport, GainLevel, Indicator, LevelSample, TwistSetting,
};
use crate::volume::VolumeMapper;

/// Calibration failures
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// The front end could not be (re)configured or sampled. Unrecoverable:
    /// the caller must hand this to the supervisor, which halts or resets.
    HardwareFault(HalError),
    /// The input stayed clipped for the configured number of re-samples
    SaturationTimeout { attempts: u32 },
}

impl CalibrationError {
    /// True if execution must not continue with the current front end
    pub const fn is_fatal(&self) -> bool {
        matches!(self, CalibrationError::HardwareFault(_))
    }
}

impl From<HalError> for CalibrationError {
    fn from(err: HalError) -> Self {
        CalibrationError::HardwareFault(err)
    }
}

#[cfg(feature = "std")]
impl core::fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CalibrationError::HardwareFault(err) => write!(f, "Hardware fault: {}", err),
            CalibrationError::SaturationTimeout { attempts } => {
                write!(f, "Input still saturated after {} samples", attempts)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CalibrationError {}

/// Failure of an audio-path request, classified for the supervisor.
///
/// Only a receive front end fault is fatal. Output and storage failures are
/// reported back to the requester and the device keeps running.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioError {
    /// Gain search or front end programming failed
    Calibration(CalibrationError),
    /// Transmit output stage rejected the level
    Output(HalError),
    /// Settings record could not be persisted
    Storage(HalError),
}

impl AudioError {
    pub const fn is_fatal(&self) -> bool {
        match self {
            AudioError::Calibration(err) => err.is_fatal(),
            AudioError::Output(_) | AudioError::Storage(_) => false,
        }
    }
}

impl From<CalibrationError> for AudioError {
    fn from(err: CalibrationError) -> Self {
        AudioError::Calibration(err)
    }
}

#[cfg(feature = "std")]
impl core::fmt::Display for AudioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AudioError::Calibration(err) => write!(f, "{}", err),
            AudioError::Output(err) => write!(f, "Output stage failed: {}", err),
            AudioError::Storage(err) => write!(f, "Settings store failed: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AudioError {}

/// DC level of the received audio, read by the demodulator for centering.
///
/// Written only by [`GainCalibrator`]. Readers on other tasks see the latest
/// value without locking; quiescing them during calibration is up to the
/// caller.
pub struct VirtualGround {
    level: AtomicU16,
}

impl VirtualGround {
    pub const fn new() -> Self {
        Self {
            level: AtomicU16::new(0),
        }
    }

    /// Last recorded average input level
    pub fn get(&self) -> u16 {
        self.level.load(Ordering::Relaxed)
    }

    pub(crate) fn record(&self, level: u16) {
        self.level.store(level, Ordering::Relaxed);
    }
}

impl Default for VirtualGround {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive gain search.
///
/// Steps the front end up from 0 dB until the captured swing exceeds the
/// target or the top step is reached. At the lowest step it first waits for
/// the input to leave the converter rails.
pub struct GainCalibrator<'g> {
    config: CalibrationConfig,
    ground: &'g VirtualGround,
}

impl<'g> GainCalibrator<'g> {
    pub fn new(config: CalibrationConfig, ground: &'g VirtualGround) -> Self {
        Self { config, ground }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn virtual_ground(&self) -> &VirtualGround {
        self.ground
    }

    /// Search for the receive gain step. Gain never decreases within a run.
    pub fn calibrate<H: AudioHal>(&self, hal: &mut H) -> Result<GainLevel, CalibrationError> {
        #[cfg(feature = "defmt")]
        defmt::info!("Adjusting input gain...");

        let mut gain = GainLevel::MIN;

        loop {
            hal.front_end().set_gain(gain)?;

            let mut sample = self.sample(hal, gain)?;
            if gain == GainLevel::MIN {
                sample = self.wait_for_unsaturated(hal, sample)?;
            }
            hal.indicators().off(Indicator::Other);

            self.ground.record(sample.average);

            if sample.peak_to_peak > self.config.target_peak_to_peak {
                break;
            }
            if gain >= self.config.max_gain {
                break;
            }
            gain = gain.next();
        }

        hal.indicators().on(Indicator::Other);
        Ok(gain)
    }

    /// One calibration episode: gain search, twist measurement and settings
    /// update. The record is left for the caller to persist.
    pub fn calibrate_full<H: AudioHal>(
        &self,
        hal: &mut H,
        settings: &mut TncSettings,
    ) -> Result<CalibrationReport, CalibrationError> {
        hal.indicators().on(Indicator::Dcd);
        hal.indicators().on(Indicator::Tx);

        #[cfg(feature = "defmt")]
        defmt::info!("autoInputLevel");

        let result = self.run_episode(hal, settings);

        hal.indicators().off(Indicator::Tx);
        hal.indicators().off(Indicator::Dcd);

        result
    }

    /// Program the front end from the stored input gain (startup path)
    pub fn apply_stored_gain<H: AudioHal>(
        &self,
        hal: &mut H,
        settings: &TncSettings,
    ) -> Result<GainLevel, CalibrationError> {
        #[cfg(feature = "defmt")]
        defmt::info!("Setting input gain: {}", settings.input_gain);

        let gain = settings.input_gain().ok_or(HalError::InvalidGainLevel)?;
        hal.front_end().set_gain(gain)?;
        Ok(gain)
    }

    /// Reprogram both audio paths from the settings record: receive gain
    /// first, then the transmit output level
    pub fn apply_stored_levels<H: AudioHal>(
        &self,
        hal: &mut H,
        mapper: &VolumeMapper,
        settings: &TncSettings,
    ) -> Result<GainLevel, AudioError> {
        let gain = self.apply_stored_gain(hal, settings)?;
        mapper
            .apply(hal.output_stage(), settings.output_gain)
            .map_err(AudioError::Output)?;
        Ok(gain)
    }

    fn run_episode<H: AudioHal>(
        &self,
        hal: &mut H,
        settings: &mut TncSettings,
    ) -> Result<CalibrationReport, CalibrationError> {
        let gain = self.calibrate(hal)?;
        settings.set_input_gain(gain);

        let twist = TwistSetting::from_measurement(hal.twist_meter().read_twist());
        #[cfg(feature = "defmt")]
        defmt::info!("TWIST = {}dB", twist.db());
        settings.set_rx_twist(twist);
        settings.update_crc();

        Ok(CalibrationReport {
            gain,
            twist,
            virtual_ground: self.ground.get(),
        })
    }

    fn sample<H: AudioHal>(&self, hal: &mut H, gain: GainLevel) -> Result<LevelSample, CalibrationError> {
        let sample = hal.front_end().read_levels(self.config.channel)?;

        #[cfg(feature = "defmt")]
        defmt::info!(
            "Vpp = {}, Vavg = {}, Vmin = {}, Vmax = {}, setting = {}",
            sample.peak_to_peak, sample.average, sample.min, sample.max, gain.value()
        );
        #[cfg(not(feature = "defmt"))]
        let _ = gain;

        Ok(sample)
    }

    /// Re-sample without touching the gain until the capture is off both rails.
    /// Unbounded unless `saturation_retry_limit` is set.
    fn wait_for_unsaturated<H: AudioHal>(
        &self,
        hal: &mut H,
        mut sample: LevelSample,
    ) -> Result<LevelSample, CalibrationError> {
        let mut attempts: u32 = 0;

        while sample.is_saturated(self.config.saturation_low, self.config.saturation_high) {
            if let Some(limit) = self.config.saturation_retry_limit {
                if attempts >= limit {
                    hal.indicators().off(Indicator::Other);
                    #[cfg(feature = "defmt")]
                    defmt::warn!("Input saturated after {} samples", attempts);
                    return Err(CalibrationError::SaturationTimeout { attempts });
                }
            }

            hal.indicators().toggle(Indicator::Other);
            sample = self.sample(hal, GainLevel::MIN)?;
            attempts = attempts.saturating_add(1);
        }

        Ok(sample)
    }
}
