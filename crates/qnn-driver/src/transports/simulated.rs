//! Simulated accelerator.
//!
//! A byte-level model of the UART router in front of the inference core.
//! It parses exactly the frames the hardware parses, runs the reference
//! engine when an image frame completes, and answers read requests from the
//! result registers. Protocol and harness code can therefore be exercised
//! end to end without a board.
//!
//! ```text
//! host bytes ─► router FSM ─┬─ image frame   ─► InferenceEngine ─► result registers
//!                           ├─ weights frame ─► QuantizedModel::from_payload
//!                           ├─ 0xCD          ─► 40-byte scores  ─┐
//!                           └─ 0xCC          ─► digit byte      ─┴─► tx queue ─► host
//! ```
//!
//! Faults can be queued to corrupt the next responses (truncation, silence,
//! wrong values) so error paths are testable.

use crate::error::Result;
use crate::transport::{Transport, TransportType};
use qnn_chip::protocol::{
    opcode, IMAGE_END, IMAGE_PIXELS, IMAGE_START, NUM_CLASSES, WEIGHTS_END, WEIGHTS_START,
};
use qnn_models::{Architecture, HardwareProfile, Inference, InferenceEngine, QuantizedModel, Scores};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fault applied to one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Send only the first `n` bytes of the response
    Truncate(usize),
    /// Send nothing
    Silent,
    /// Add `delta` (wrapping) to one class score
    CorruptScore {
        /// Class index
        class: usize,
        /// Value added
        delta: i32,
    },
    /// Answer a digit read with this raw byte
    RawDigit(u8),
}

/// Router activity counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulatorStats {
    /// Complete image frames processed
    pub images: usize,
    /// Complete weight frames applied
    pub weight_uploads: usize,
    /// Scores read requests answered
    pub score_reads: usize,
    /// Digit read requests answered
    pub digit_reads: usize,
    /// Bytes ignored outside any frame
    pub ignored_bytes: usize,
    /// Frames dropped for a bad end marker or payload
    pub bad_frames: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upload {
    Image,
    Weights,
}

impl Upload {
    const fn start(self) -> [u8; 2] {
        match self {
            Self::Image => IMAGE_START,
            Self::Weights => WEIGHTS_START,
        }
    }

    const fn end(self) -> [u8; 2] {
        match self {
            Self::Image => IMAGE_END,
            Self::Weights => WEIGHTS_END,
        }
    }
}

#[derive(Debug)]
enum RxState {
    Idle,
    Start(Upload),
    Body(Upload, Vec<u8>),
    Trailer(Upload, Vec<u8>, usize),
}

/// Software accelerator behind a [`Transport`]
#[derive(Debug)]
pub struct SimulatedDevice {
    engine: InferenceEngine,
    profile: Option<HardwareProfile>,
    rx: RxState,
    tx: VecDeque<u8>,
    result: Option<Inference>,
    faults: VecDeque<Fault>,
    stats: SimulatorStats,
}

impl SimulatedDevice {
    /// Device whose weight memory holds `engine`'s model
    pub fn new(engine: InferenceEngine) -> Self {
        let profile = engine
            .model()
            .architecture()
            .map(Architecture::default_profile);
        info!("Simulated accelerator: {}", engine.model());
        Self {
            engine,
            profile,
            rx: RxState::Idle,
            tx: VecDeque::new(),
            result: None,
            faults: VecDeque::new(),
            stats: SimulatorStats::default(),
        }
    }

    /// Arithmetic profile used when rebuilding the model from uploaded
    /// weights
    #[must_use]
    pub fn with_profile(mut self, profile: HardwareProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Queue a fault for the next response
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Put unsolicited bytes in the receive queue
    pub fn inject_noise(&mut self, bytes: &[u8]) {
        self.tx.extend(bytes);
    }

    /// Activity counters
    pub const fn stats(&self) -> SimulatorStats {
        self.stats
    }

    /// Current model
    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    fn receive(&mut self, byte: u8) {
        self.rx = match std::mem::replace(&mut self.rx, RxState::Idle) {
            RxState::Idle => return self.idle_byte(byte),
            RxState::Start(kind) if byte == kind.start()[1] => {
                if self.frame_len(kind) == 0 {
                    RxState::Trailer(kind, Vec::new(), 0)
                } else {
                    RxState::Body(kind, Vec::new())
                }
            }
            RxState::Start(_) => return self.idle_byte(byte),
            RxState::Body(kind, mut data) => {
                data.push(byte);
                if data.len() == self.frame_len(kind) {
                    RxState::Trailer(kind, data, 0)
                } else {
                    RxState::Body(kind, data)
                }
            }
            RxState::Trailer(kind, data, seen) if byte == kind.end()[seen] => {
                if seen + 1 == kind.end().len() {
                    self.complete(kind, &data);
                    RxState::Idle
                } else {
                    RxState::Trailer(kind, data, seen + 1)
                }
            }
            RxState::Trailer(kind, _, _) => {
                warn!("{kind:?} frame dropped: bad end marker byte 0x{byte:02x}");
                self.stats.bad_frames += 1;
                RxState::Idle
            }
        };
    }

    fn idle_byte(&mut self, byte: u8) {
        self.rx = match byte {
            b if b == IMAGE_START[0] => RxState::Start(Upload::Image),
            b if b == WEIGHTS_START[0] => RxState::Start(Upload::Weights),
            opcode::SCORES_READ => {
                self.answer_scores();
                RxState::Idle
            }
            opcode::DIGIT_READ => {
                self.answer_digit();
                RxState::Idle
            }
            _ => {
                self.stats.ignored_bytes += 1;
                RxState::Idle
            }
        };
    }

    fn frame_len(&self, kind: Upload) -> usize {
        match kind {
            Upload::Image => IMAGE_PIXELS,
            Upload::Weights => self
                .engine
                .model()
                .architecture()
                .map_or(0, Architecture::payload_len),
        }
    }

    fn complete(&mut self, kind: Upload, data: &[u8]) {
        match kind {
            Upload::Image => {
                #[allow(clippy::cast_possible_wrap)]
                let pixels: Vec<i8> = data.iter().map(|&b| b as i8).collect();
                match self.engine.infer(&pixels) {
                    Ok(result) => {
                        debug!("Image {}: prediction {}", self.stats.images, result.prediction);
                        self.result = Some(result);
                        self.stats.images += 1;
                    }
                    Err(e) => {
                        warn!("Image frame rejected: {e}");
                        self.stats.bad_frames += 1;
                    }
                }
            }
            Upload::Weights => match self.rebuild(data) {
                Ok(model) => {
                    self.engine = InferenceEngine::new(model);
                    self.stats.weight_uploads += 1;
                    info!("Weights updated ({} bytes)", data.len());
                }
                Err(e) => {
                    warn!("Weights frame rejected: {e}");
                    self.stats.bad_frames += 1;
                }
            },
        }
    }

    fn rebuild(&self, payload: &[u8]) -> qnn_models::Result<QuantizedModel> {
        let arch = self.engine.model().architecture().ok_or_else(|| {
            qnn_models::QnnModelError::config("simulated model has no architecture preset")
        })?;
        let profile = self.profile.clone().unwrap_or_else(|| arch.default_profile());
        QuantizedModel::from_payload(arch, &profile, payload.to_vec())
    }

    fn answer_scores(&mut self) {
        self.stats.score_reads += 1;
        let mut scores = self.result.map_or(Scores([0; NUM_CLASSES]), |r| r.scores);
        let fault = self.faults.pop_front();
        if let Some(Fault::CorruptScore { class, delta }) = &fault {
            if let Some(v) = scores.0.get_mut(*class) {
                *v = v.wrapping_add(*delta);
            }
        }
        self.send(&scores.to_le_bytes(), fault.as_ref());
    }

    fn answer_digit(&mut self) {
        self.stats.digit_reads += 1;
        let digit = self.result.map_or(0, |r| r.prediction.index());
        let fault = self.faults.pop_front();
        let byte = match &fault {
            Some(Fault::RawDigit(raw)) => *raw,
            _ => digit,
        };
        self.send(&[byte], fault.as_ref());
    }

    fn send(&mut self, response: &[u8], fault: Option<&Fault>) {
        let len = match fault {
            Some(Fault::Silent) => 0,
            Some(Fault::Truncate(n)) => (*n).min(response.len()),
            _ => response.len(),
        };
        if len < response.len() {
            debug!("Fault: sending {len} of {} response bytes", response.len());
        }
        self.tx.extend(&response[..len]);
    }
}

impl Transport for SimulatedDevice {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for &byte in data {
            self.receive(byte);
        }
        Ok(())
    }

    fn read_within(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.tx.len());
        for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> Result<usize> {
        let n = self.tx.len();
        self.tx.clear();
        Ok(n)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Simulated
    }
}
