//! Host-side integration tests for the TNC core.
//!
//! Shared fixtures live here; the scenarios are in the test modules.

use std::cell::RefCell;
use std::rc::Rc;

use tnc_core::hal::mock::{MockIndicators, MockOutputStage};
use tnc_core::*;

#[cfg(test)]
mod transport_tests;

/// One payload as seen by the sink
pub type SinkRecord = (Option<u8>, Vec<u8>);

/// Serial sink that pushes one byte at a time and yields between bytes, so
/// unsynchronized writers would visibly interleave in the shared log
#[derive(Clone, Default)]
pub struct YieldingSink {
    bytes: Rc<RefCell<Vec<u8>>>,
    records: Rc<RefCell<Vec<SinkRecord>>>,
}

impl YieldingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.borrow().clone()
    }
}

impl SerialSink for YieldingSink {
    async fn write(&mut self, frame_type: Option<u8>, data: &[u8]) -> Result<(), HalError> {
        for byte in data {
            self.bytes.borrow_mut().push(*byte);
            tokio::task::yield_now().await;
        }
        self.records.borrow_mut().push((frame_type, data.to_vec()));
        Ok(())
    }
}

/// Front end with a fixed input amplitude. Each gain step doubles the swing
/// around mid-scale and the converter clips at its rails.
pub struct SimulatedFrontEnd {
    amplitude: u32,
    gain: Option<GainLevel>,
    clipped_captures: usize,
    twist_db: f32,
    pub gain_writes: Vec<GainLevel>,
    pub captures: usize,
}

impl SimulatedFrontEnd {
    const MID_SCALE: i32 = 2048;

    pub fn new(amplitude: u32) -> Self {
        Self {
            amplitude,
            gain: None,
            clipped_captures: 0,
            twist_db: 0.0,
            gain_writes: Vec::new(),
            captures: 0,
        }
    }

    /// First `count` captures at 0 dB are pinned to both rails (e.g. a
    /// transmitter keying up next to the receiver)
    pub fn with_clipped_captures(mut self, count: usize) -> Self {
        self.clipped_captures = count;
        self
    }

    pub fn with_twist(mut self, db: f32) -> Self {
        self.twist_db = db;
        self
    }
}

impl InputGainPort for SimulatedFrontEnd {
    fn set_gain(&mut self, level: GainLevel) -> Result<(), HalError> {
        self.gain = Some(level);
        self.gain_writes.push(level);
        Ok(())
    }
}

impl LevelSampler for SimulatedFrontEnd {
    fn read_levels(&mut self, _channel: AudioChannel) -> Result<LevelSample, HalError> {
        let gain = self.gain.ok_or(HalError::NotInitialized)?;
        self.captures += 1;

        if gain == GainLevel::MIN && self.clipped_captures > 0 {
            self.clipped_captures -= 1;
            return Ok(LevelSample::new(4095, 2048, 0, 4095));
        }

        let swing = (self.amplitude << gain.value()) as i32;
        let min = (Self::MID_SCALE - swing / 2).clamp(0, 4095);
        let max = (Self::MID_SCALE + swing / 2).clamp(0, 4095);
        Ok(LevelSample::new(
            (max - min) as u16,
            ((max + min) / 2) as u16,
            min as u16,
            max as u16,
        ))
    }
}

impl TwistMeter for SimulatedFrontEnd {
    fn read_twist(&mut self) -> f32 {
        self.twist_db
    }
}

/// Audio HAL around the simulated front end
pub struct SimulatedHal {
    pub front_end: SimulatedFrontEnd,
    pub indicators: MockIndicators,
    pub output: MockOutputStage,
}

impl SimulatedHal {
    pub fn new(front_end: SimulatedFrontEnd) -> Self {
        Self {
            front_end,
            indicators: MockIndicators::new(),
            output: MockOutputStage::new(),
        }
    }
}

impl AudioHal for SimulatedHal {
    type FrontEnd = SimulatedFrontEnd;
    type Twist = SimulatedFrontEnd;
    type Indicators = MockIndicators;
    type Output = MockOutputStage;

    fn front_end(&mut self) -> &mut SimulatedFrontEnd {
        &mut self.front_end
    }

    fn twist_meter(&mut self) -> &mut SimulatedFrontEnd {
        &mut self.front_end
    }

    fn indicators(&mut self) -> &mut MockIndicators {
        &mut self.indicators
    }

    fn output_stage(&mut self) -> &mut MockOutputStage {
        &mut self.output
    }
}
