//! Hardware Abstraction Layer for the audio front end, output stage and serial link

use embedded_hal::digital::{OutputPin, StatefulOutputPin};
use crate::types::{AudioChannel, GainLevel, Indicator, LevelSample};

/// Error types for HAL operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// Analog front end refused the new configuration
    FrontEndConfig,
    /// Gain step outside the supported range
    InvalidGainLevel,
    /// ADC capture failed
    Sampling,
    /// GPIO operation failed
    GpioError,
    /// Serial or storage I/O failed
    Io,
    /// Hardware not initialized
    NotInitialized,
}

#[cfg(feature = "std")]
impl core::fmt::Display for HalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HalError::FrontEndConfig => write!(f, "Front end configuration failed"),
            HalError::InvalidGainLevel => write!(f, "Invalid gain level"),
            HalError::Sampling => write!(f, "ADC sampling failed"),
            HalError::GpioError => write!(f, "GPIO operation failed"),
            HalError::Io => write!(f, "I/O operation failed"),
            HalError::NotInitialized => write!(f, "Hardware not initialized"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HalError {}

/// Programs the receive amplifier and bias DAC for a gain step
pub trait InputGainPort {
    /// Reconfigure the front end and wait for it to settle.
    ///
    /// A failure leaves the front end in an unknown state.
    fn set_gain(&mut self, level: GainLevel) -> Result<(), HalError>;
}

/// Captures a window of samples and reduces it to amplitude statistics
pub trait LevelSampler {
    /// Blocking capture on `channel`
    fn read_levels(&mut self, channel: AudioChannel) -> Result<LevelSample, HalError>;
}

/// Estimates the dB imbalance between the two tones of the received signal
pub trait TwistMeter {
    fn read_twist(&mut self) -> f32;
}

/// Operator feedback LEDs. Presentation only, nothing reads them back.
pub trait StatusIndicators {
    fn set(&mut self, indicator: Indicator, on: bool);

    fn toggle(&mut self, indicator: Indicator);

    fn on(&mut self, indicator: Indicator) {
        self.set(indicator, true);
    }

    fn off(&mut self, indicator: Indicator) {
        self.set(indicator, false);
    }
}

/// Fine-gain register of the transmit audio path (modulator volume)
pub trait VolumeControl {
    fn set_volume(&mut self, register: i16) -> Result<(), HalError>;
}

/// Transmit audio output: coarse attenuator switch plus fine gain
pub trait OutputStage {
    fn set_attenuator(&mut self, enabled: bool) -> Result<(), HalError>;

    fn set_volume(&mut self, register: i16) -> Result<(), HalError>;
}

/// Byte sink behind the serial transport (UART or USB CDC)
#[allow(async_fn_in_trait)]
pub trait SerialSink {
    /// Transmit one payload, optionally tagged with a frame type
    async fn write(&mut self, frame_type: Option<u8>, data: &[u8]) -> Result<(), HalError>;
}

/// Complete audio HAL interface
pub trait AudioHal {
    type FrontEnd: InputGainPort + LevelSampler;
    type Twist: TwistMeter;
    type Indicators: StatusIndicators;
    type Output: OutputStage;

    /// Access to the receive front end
    fn front_end(&mut self) -> &mut Self::FrontEnd;

    /// Access to the twist estimator
    fn twist_meter(&mut self) -> &mut Self::Twist;

    /// Access to the status LEDs
    fn indicators(&mut self) -> &mut Self::Indicators;

    /// Access to the transmit output stage
    fn output_stage(&mut self) -> &mut Self::Output;
}

/// Status LEDs on embedded-hal compatible pins
pub struct GpioIndicators<D, T, O> {
    dcd: D,
    tx: T,
    other: O,
}

impl<D, T, O> GpioIndicators<D, T, O>
where
    D: StatefulOutputPin,
    T: StatefulOutputPin,
    O: StatefulOutputPin,
{
    pub fn new(dcd: D, tx: T, other: O) -> Self {
        Self { dcd, tx, other }
    }

    /// Give the pins back
    pub fn release(self) -> (D, T, O) {
        (self.dcd, self.tx, self.other)
    }
}

fn drive<P: OutputPin>(pin: &mut P, on: bool) {
    // LED failures are not actionable
    let _ = pin.set_state(on.into());
}

impl<D, T, O> StatusIndicators for GpioIndicators<D, T, O>
where
    D: StatefulOutputPin,
    T: StatefulOutputPin,
    O: StatefulOutputPin,
{
    fn set(&mut self, indicator: Indicator, on: bool) {
        match indicator {
            Indicator::Dcd => drive(&mut self.dcd, on),
            Indicator::Tx => drive(&mut self.tx, on),
            Indicator::Other => drive(&mut self.other, on),
        }
    }

    fn toggle(&mut self, indicator: Indicator) {
        match indicator {
            Indicator::Dcd => {
                let _ = self.dcd.toggle();
            }
            Indicator::Tx => {
                let _ = self.tx.toggle();
            }
            Indicator::Other => {
                let _ = self.other.toggle();
            }
        }
    }
}

/// Output stage built from an attenuator enable pin and a volume control
pub struct PinOutputStage<P, V> {
    attenuator: P,
    volume: V,
}

impl<P, V> PinOutputStage<P, V>
where
    P: OutputPin,
    V: VolumeControl,
{
    pub fn new(attenuator: P, volume: V) -> Self {
        Self { attenuator, volume }
    }

    pub fn release(self) -> (P, V) {
        (self.attenuator, self.volume)
    }
}

impl<P, V> OutputStage for PinOutputStage<P, V>
where
    P: OutputPin,
    V: VolumeControl,
{
    fn set_attenuator(&mut self, enabled: bool) -> Result<(), HalError> {
        if enabled {
            self.attenuator.set_high().map_err(|_| HalError::GpioError)
        } else {
            self.attenuator.set_low().map_err(|_| HalError::GpioError)
        }
    }

    fn set_volume(&mut self, register: i16) -> Result<(), HalError> {
        self.volume.set_volume(register)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Mock implementations for testing

    use super::*;
    use crate::settings::{SettingsStore, TncSettings};
    use core::cell::{Cell, RefCell};
    use heapless::Vec;

    /// Scripted front end: returns queued samples in order, repeating the
    /// last one once the script runs out
    #[derive(Default)]
    pub struct MockFrontEnd {
        script: Vec<LevelSample, 64>,
        cursor: Cell<usize>,
        sample_calls: Cell<usize>,
        gain_history: RefCell<Vec<GainLevel, 64>>,
        fail_at: Option<GainLevel>,
        twist_db: f32,
    }

    impl MockFrontEnd {
        pub fn new() -> Self {
            Self::default()
        }

        /// Front end that always reports the same sample
        pub fn constant(sample: LevelSample) -> Self {
            Self::scripted(&[sample])
        }

        pub fn scripted(samples: &[LevelSample]) -> Self {
            let mut script = Vec::new();
            for sample in samples {
                let _ = script.push(*sample);
            }
            Self { script, ..Self::default() }
        }

        /// Make `set_gain` fail when asked for `level`
        pub fn fail_on(mut self, level: GainLevel) -> Self {
            self.fail_at = Some(level);
            self
        }

        pub fn with_twist(mut self, db: f32) -> Self {
            self.twist_db = db;
            self
        }

        pub fn sample_calls(&self) -> usize {
            self.sample_calls.get()
        }

        pub fn gain_history(&self) -> Vec<GainLevel, 64> {
            self.gain_history.borrow().clone()
        }
    }

    impl InputGainPort for MockFrontEnd {
        fn set_gain(&mut self, level: GainLevel) -> Result<(), HalError> {
            if self.fail_at == Some(level) {
                return Err(HalError::FrontEndConfig);
            }
            let _ = self.gain_history.borrow_mut().push(level);
            Ok(())
        }
    }

    impl LevelSampler for MockFrontEnd {
        fn read_levels(&mut self, _channel: AudioChannel) -> Result<LevelSample, HalError> {
            self.sample_calls.set(self.sample_calls.get() + 1);
            let index = self.cursor.get();
            let sample = match self.script.get(index) {
                Some(sample) => {
                    self.cursor.set(index + 1);
                    *sample
                }
                None => self.script.last().copied().ok_or(HalError::Sampling)?,
            };
            Ok(sample)
        }
    }

    impl TwistMeter for MockFrontEnd {
        fn read_twist(&mut self) -> f32 {
            self.twist_db
        }
    }

    /// Indicator event for inspection
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum IndicatorEvent {
        On(Indicator),
        Off(Indicator),
        Toggle(Indicator),
    }

    #[derive(Default)]
    pub struct MockIndicators {
        states: RefCell<[bool; 3]>,
        events: RefCell<Vec<IndicatorEvent, 256>>,
    }

    impl MockIndicators {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_on(&self, indicator: Indicator) -> bool {
            self.states.borrow()[Self::slot(indicator)]
        }

        pub fn events(&self) -> Vec<IndicatorEvent, 256> {
            self.events.borrow().clone()
        }

        pub fn toggle_count(&self, indicator: Indicator) -> usize {
            self.events
                .borrow()
                .iter()
                .filter(|e| **e == IndicatorEvent::Toggle(indicator))
                .count()
        }

        fn slot(indicator: Indicator) -> usize {
            match indicator {
                Indicator::Dcd => 0,
                Indicator::Tx => 1,
                Indicator::Other => 2,
            }
        }
    }

    impl StatusIndicators for MockIndicators {
        fn set(&mut self, indicator: Indicator, on: bool) {
            self.states.borrow_mut()[Self::slot(indicator)] = on;
            let event = if on {
                IndicatorEvent::On(indicator)
            } else {
                IndicatorEvent::Off(indicator)
            };
            let _ = self.events.borrow_mut().push(event);
        }

        fn toggle(&mut self, indicator: Indicator) {
            let slot = Self::slot(indicator);
            let current = self.states.borrow()[slot];
            self.states.borrow_mut()[slot] = !current;
            let _ = self.events.borrow_mut().push(IndicatorEvent::Toggle(indicator));
        }
    }

    #[derive(Default)]
    pub struct MockOutputStage {
        attenuator: Cell<bool>,
        volume: Cell<Option<i16>>,
        fail: bool,
    }

    impl MockOutputStage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self { fail: true, ..Self::default() }
        }

        pub fn attenuator(&self) -> bool {
            self.attenuator.get()
        }

        pub fn volume(&self) -> Option<i16> {
            self.volume.get()
        }
    }

    impl OutputStage for MockOutputStage {
        fn set_attenuator(&mut self, enabled: bool) -> Result<(), HalError> {
            if self.fail {
                return Err(HalError::GpioError);
            }
            self.attenuator.set(enabled);
            Ok(())
        }

        fn set_volume(&mut self, register: i16) -> Result<(), HalError> {
            if self.fail {
                return Err(HalError::Io);
            }
            self.volume.set(Some(register));
            Ok(())
        }
    }

    /// Mock hardware collection
    #[derive(Default)]
    pub struct MockAudioHal {
        pub front_end: MockFrontEnd,
        pub indicators: MockIndicators,
        pub output: MockOutputStage,
    }

    impl MockAudioHal {
        pub fn new(front_end: MockFrontEnd) -> Self {
            Self {
                front_end,
                indicators: MockIndicators::new(),
                output: MockOutputStage::new(),
            }
        }
    }

    impl AudioHal for MockAudioHal {
        type FrontEnd = MockFrontEnd;
        type Twist = MockFrontEnd;
        type Indicators = MockIndicators;
        type Output = MockOutputStage;

        fn front_end(&mut self) -> &mut MockFrontEnd {
            &mut self.front_end
        }

        fn twist_meter(&mut self) -> &mut MockFrontEnd {
            &mut self.front_end
        }

        fn indicators(&mut self) -> &mut MockIndicators {
            &mut self.indicators
        }

        fn output_stage(&mut self) -> &mut MockOutputStage {
            &mut self.output
        }
    }

    /// In-memory settings store that counts writes
    #[derive(Default)]
    pub struct MockSettingsStore {
        stored: Option<TncSettings>,
        writes: usize,
        fail: bool,
    }

    impl MockSettingsStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store whose page writes always fail
        pub fn failing() -> Self {
            Self { fail: true, ..Self::default() }
        }

        pub fn writes(&self) -> usize {
            self.writes
        }
    }

    impl SettingsStore for MockSettingsStore {
        fn store(&mut self, settings: &TncSettings) -> Result<(), HalError> {
            if self.fail {
                return Err(HalError::Io);
            }
            self.stored = Some(*settings);
            self.writes += 1;
            Ok(())
        }

        fn load(&mut self) -> Result<Option<TncSettings>, HalError> {
            Ok(self.stored.filter(|s| s.is_valid()))
        }
    }

    /// Serial sink that records every payload it is handed
    #[derive(Default)]
    pub struct MockSerialSink {
        frames: RefCell<Vec<(Option<u8>, Vec<u8, 256>), 32>>,
        fail: bool,
    }

    impl MockSerialSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self { fail: true, ..Self::default() }
        }

        pub fn frame_count(&self) -> usize {
            self.frames.borrow().len()
        }

        pub fn frames(&self) -> Vec<(Option<u8>, Vec<u8, 256>), 32> {
            self.frames.borrow().clone()
        }
    }

    impl SerialSink for MockSerialSink {
        async fn write(&mut self, frame_type: Option<u8>, data: &[u8]) -> Result<(), HalError> {
            if self.fail {
                return Err(HalError::Io);
            }
            let payload = Vec::from_slice(data).map_err(|_| HalError::Io)?;
            self.frames
                .borrow_mut()
                .push((frame_type, payload))
                .map_err(|_| HalError::Io)
        }
    }
}
