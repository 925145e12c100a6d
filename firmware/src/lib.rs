#![no_std]

//! Firmware library: simulated audio hardware, board support and the
//! embassy tasks that drive the TNC core

pub use embassy_executor::Spawner;
pub use embassy_time::Duration;

pub use tnc_core::*;

pub use crate::board::*;
pub use crate::mock_hardware::*;
pub use crate::tasks::*;
pub use crate::time_driver::on_system_tick;

// Mock hardware module
pub mod mock_hardware {
    use tnc_core::hal::{
        AudioHal, HalError, InputGainPort, LevelSampler, OutputStage, SerialSink,
        StatusIndicators, TwistMeter,
    };
    use tnc_core::types::{AudioChannel, GainLevel, Indicator, LevelSample};

    const MID_SCALE: i32 = 2048;
    const ADC_MAX: i32 = 4095;

    /// Simulated receive front end: a constant tone whose swing doubles with
    /// each gain step and clips at the converter rails
    #[derive(Debug)]
    pub struct SimFrontEnd {
        amplitude: u16,
        twist_db: f32,
        gain: Option<GainLevel>,
        settle: embassy_time::Duration,
    }

    /// Simulated settle time after a gain change (the board needs 100 ms).
    /// `set_gain` busy-waits on the executor, so a full search stalls every
    /// other task for five of these.
    pub const SIM_SETTLE: embassy_time::Duration = embassy_time::Duration::from_millis(2);

    impl SimFrontEnd {
        pub fn new(amplitude: u16, twist_db: f32) -> Self {
            Self {
                amplitude,
                twist_db,
                gain: None,
                settle: SIM_SETTLE,
            }
        }

        /// Change the simulated input level (e.g. a new radio)
        pub fn set_amplitude(&mut self, amplitude: u16) {
            self.amplitude = amplitude;
        }

        pub fn gain(&self) -> Option<GainLevel> {
            self.gain
        }
    }

    impl InputGainPort for SimFrontEnd {
        fn set_gain(&mut self, level: GainLevel) -> Result<(), HalError> {
            let config = level.front_end();
            #[cfg(feature = "defmt")]
            defmt::debug!("Front end: {} bias {}", config.mode, config.dc_offset);
            #[cfg(not(feature = "defmt"))]
            let _ = config;

            self.gain = Some(level);
            embassy_time::block_for(self.settle);
            Ok(())
        }
    }

    impl LevelSampler for SimFrontEnd {
        fn read_levels(&mut self, _channel: AudioChannel) -> Result<LevelSample, HalError> {
            let gain = self.gain.ok_or(HalError::NotInitialized)?;

            let swing = (self.amplitude as i32) << gain.value();
            let min = (MID_SCALE - swing / 2).clamp(0, ADC_MAX);
            let max = (MID_SCALE + swing / 2).clamp(0, ADC_MAX);
            Ok(LevelSample::new(
                (max - min) as u16,
                ((max + min) / 2) as u16,
                min as u16,
                max as u16,
            ))
        }
    }

    impl TwistMeter for SimFrontEnd {
        fn read_twist(&mut self) -> f32 {
            self.twist_db
        }
    }

    /// Status LEDs that only log
    #[derive(Debug, Default)]
    pub struct SimIndicators {
        states: [bool; 3],
    }

    impl SimIndicators {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_on(&self, indicator: Indicator) -> bool {
            self.states[indicator as usize]
        }
    }

    impl StatusIndicators for SimIndicators {
        fn set(&mut self, indicator: Indicator, on: bool) {
            #[cfg(feature = "defmt")]
            if self.states[indicator as usize] != on {
                defmt::debug!("LED {}: {}", indicator, if on { "ON" } else { "OFF" });
            }
            self.states[indicator as usize] = on;
        }

        fn toggle(&mut self, indicator: Indicator) {
            let state = self.states[indicator as usize];
            self.set(indicator, !state);
        }
    }

    /// Transmit output stage that remembers what was programmed
    #[derive(Debug, Default)]
    pub struct SimOutputStage {
        attenuate: bool,
        register: Option<i16>,
    }

    impl SimOutputStage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn attenuate(&self) -> bool {
            self.attenuate
        }

        pub fn register(&self) -> Option<i16> {
            self.register
        }
    }

    impl OutputStage for SimOutputStage {
        fn set_attenuator(&mut self, enabled: bool) -> Result<(), HalError> {
            self.attenuate = enabled;
            Ok(())
        }

        fn set_volume(&mut self, register: i16) -> Result<(), HalError> {
            #[cfg(feature = "defmt")]
            defmt::debug!("Modulator volume register = {}", register);
            self.register = Some(register);
            Ok(())
        }
    }

    /// UART transmitter at 115200 baud, modelled by its wire time
    #[derive(Debug)]
    pub struct UartSink {
        bytes_sent: u32,
    }

    impl UartSink {
        /// Wire time of one 8N1 character at 115200 baud
        const CHAR_TIME_US: u64 = 87;

        pub const fn new() -> Self {
            Self { bytes_sent: 0 }
        }

        pub fn bytes_sent(&self) -> u32 {
            self.bytes_sent
        }
    }

    impl SerialSink for UartSink {
        async fn write(&mut self, frame_type: Option<u8>, data: &[u8]) -> Result<(), HalError> {
            let wire_len = data.len() + usize::from(frame_type.is_some());
            embassy_time::Timer::after_micros(Self::CHAR_TIME_US * wire_len as u64).await;
            self.bytes_sent = self.bytes_sent.wrapping_add(wire_len as u32);

            #[cfg(feature = "defmt")]
            defmt::trace!("UART TX {} bytes (type {})", wire_len, frame_type);
            Ok(())
        }
    }

    /// Simulated audio hardware collection
    #[derive(Debug)]
    pub struct SimAudioHal {
        pub front_end: SimFrontEnd,
        pub indicators: SimIndicators,
        pub output: SimOutputStage,
    }

    impl SimAudioHal {
        pub fn new(front_end: SimFrontEnd) -> Self {
            #[cfg(feature = "defmt")]
            defmt::info!("🧪 Using simulated audio hardware");
            Self {
                front_end,
                indicators: SimIndicators::new(),
                output: SimOutputStage::new(),
            }
        }
    }

    impl AudioHal for SimAudioHal {
        type FrontEnd = SimFrontEnd;
        type Twist = SimFrontEnd;
        type Indicators = SimIndicators;
        type Output = SimOutputStage;

        fn front_end(&mut self) -> &mut SimFrontEnd {
            &mut self.front_end
        }

        fn twist_meter(&mut self) -> &mut SimFrontEnd {
            &mut self.front_end
        }

        fn indicators(&mut self) -> &mut SimIndicators {
            &mut self.indicators
        }

        fn output_stage(&mut self) -> &mut SimOutputStage {
            &mut self.output
        }
    }
}

// Embassy tasks module
pub mod tasks {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::Channel;
    use embassy_sync::signal::Signal;

    /// Depth of the UART receive queue
    pub const RX_QUEUE_DEPTH: usize = 64;

    /// Frame type of the calibration report sent to the host
    pub const REPORT_FRAME_TYPE: u8 = 0x06;

    pub type TncSerial =
        SerialTransport<CriticalSectionRawMutex, UartSink, u8, RX_QUEUE_DEPTH>;

    /// Host serial link
    pub static SERIAL: TncSerial = SerialTransport::new(UartSink::new());

    /// Mid-point of the last calibration capture
    pub static VIRTUAL_GROUND: VirtualGround = VirtualGround::new();

    /// Operator requests for the audio task
    pub static AUDIO_COMMANDS: Channel<CriticalSectionRawMutex, AudioCommand, 4> = Channel::new();

    /// Raised once when the audio hardware can no longer be trusted
    pub static FAULT: Signal<CriticalSectionRawMutex, AudioError> = Signal::new();

    /// Operator request handled by [`audio_task`]
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum AudioCommand {
        /// Run a full calibration episode
        AutoLevel,
        /// Set the packed output level byte
        SetOutputLevel(u8),
        /// Reprogram the hardware from the settings record
        ApplyStoredLevels,
        /// Persist the settings record
        SaveSettings,
    }

    /// Single-byte operator commands from the host:
    /// `L` auto level, `O <byte>` output level, `R` restore, `S` save
    #[derive(Debug, Default)]
    pub struct CommandDecoder {
        awaiting_level: bool,
    }

    impl CommandDecoder {
        pub const fn new() -> Self {
            Self { awaiting_level: false }
        }

        pub fn feed(&mut self, byte: u8) -> Option<AudioCommand> {
            if self.awaiting_level {
                self.awaiting_level = false;
                return Some(AudioCommand::SetOutputLevel(byte));
            }

            match byte {
                b'L' => Some(AudioCommand::AutoLevel),
                b'O' => {
                    self.awaiting_level = true;
                    None
                }
                b'R' => Some(AudioCommand::ApplyStoredLevels),
                b'S' => Some(AudioCommand::SaveSettings),
                _ => None,
            }
        }
    }

    /// Receive interrupt hook: hand one byte to the serial transport
    pub fn on_uart_rx(byte: u8) {
        SERIAL.enqueue_from_isr(byte);
    }

    /// Owns the audio hardware and the settings record
    #[embassy_executor::task]
    pub async fn audio_task(mut hal: SimAudioHal, mut store: RamSettingsStore, config: BoardConfig) {
        #[cfg(feature = "defmt")]
        defmt::info!("🎚️ Audio task started");

        let calibrator = GainCalibrator::new(config.calibration, &VIRTUAL_GROUND);
        let mapper = VolumeMapper::init();
        let mut settings = load_settings(&mut store);

        let restored = calibrator.apply_stored_levels(&mut hal, &mapper, &settings).map(|_| ());
        if !report_failure(restored, AudioCommand::ApplyStoredLevels) {
            return;
        }

        loop {
            let command = AUDIO_COMMANDS.receive().await;
            #[cfg(feature = "defmt")]
            defmt::debug!("Audio command: {}", command);

            let result = match command {
                AudioCommand::AutoLevel => match calibrator.calibrate_full(&mut hal, &mut settings) {
                    Ok(report) => {
                        send_report(&report, config.serial_timeout).await;
                        Ok(())
                    }
                    Err(e) => Err(AudioError::from(e)),
                },
                AudioCommand::SetOutputLevel(raw) => {
                    settings.output_gain = raw;
                    settings.update_crc();
                    mapper
                        .apply(hal.output_stage(), raw)
                        .map(|_| ())
                        .map_err(AudioError::Output)
                }
                AudioCommand::ApplyStoredLevels => {
                    calibrator.apply_stored_levels(&mut hal, &mapper, &settings).map(|_| ())
                }
                AudioCommand::SaveSettings => store.store(&settings).map_err(AudioError::Storage),
            };

            if !report_failure(result, command) {
                return;
            }
        }
    }

    /// Hand fatal faults to the supervisor and log the rest. Returns false
    /// when the audio task must stop.
    fn report_failure(result: Result<(), AudioError>, _command: AudioCommand) -> bool {
        match result {
            Ok(()) => true,
            Err(e) if e.is_fatal() => {
                #[cfg(feature = "defmt")]
                defmt::error!("Audio hardware fault: {}", e);
                FAULT.signal(e);
                false
            }
            Err(_e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("Audio command {} failed: {}", _command, _e);
                true
            }
        }
    }

    /// Decodes operator commands from the serial receive queue
    #[embassy_executor::task]
    pub async fn serial_rx_task(ack_timeout: Duration) {
        #[cfg(feature = "defmt")]
        defmt::info!("📥 Serial RX task started");

        let queue = SERIAL.queue();
        let mut decoder = CommandDecoder::new();

        loop {
            let Some(byte) = queue.receive(None).await else {
                continue;
            };
            let Some(command) = decoder.feed(byte) else {
                continue;
            };

            if AUDIO_COMMANDS.try_send(command).is_err() {
                #[cfg(feature = "defmt")]
                defmt::warn!("Audio task busy, dropped {}", command);
                continue;
            }

            // Ack is best effort; a busy link just loses it
            let _ = SERIAL.write(&[byte], Some(ack_timeout)).await;
        }
    }

    /// Stands in for the UART receive interrupt: replays an operator
    /// session byte by byte
    #[embassy_executor::task]
    pub async fn uart_rx_sim_task() {
        const SESSION: &[u8] = &[b'L', b'O', 0x90, b'S'];

        for byte in SESSION {
            embassy_time::Timer::after_millis(500).await;
            on_uart_rx(*byte);
        }

        #[cfg(feature = "defmt")]
        defmt::info!("Simulated session done, {} RX overflows", SERIAL.overflow_count());
    }

    async fn send_report(report: &CalibrationReport, timeout: Duration) {
        let [ground_hi, ground_lo] = report.virtual_ground.to_be_bytes();
        let payload = [report.gain.value(), report.twist.db() as u8, ground_hi, ground_lo];

        let result = match SerialFrame::<4>::from_slice(REPORT_FRAME_TYPE, &payload) {
            Ok(frame) => SERIAL.write_frame(frame, Some(timeout)).await,
            Err(e) => Err(e),
        };
        if let Err(_e) = result {
            #[cfg(feature = "defmt")]
            defmt::warn!("Calibration report not sent: {}", _e);
        }
    }
}

// Board support
pub mod board;

// Time driver for embassy
mod time_driver;
