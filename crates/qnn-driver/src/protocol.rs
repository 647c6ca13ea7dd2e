//! Host side of the UART wire protocol.
//!
//! # Frames
//!
//! | Frame | Host → device | Device → host |
//! |-------|---------------|---------------|
//! | Image upload | `BB 66` + 784 pixel bytes + `66 BB` | none |
//! | Weights upload | `AA 55` + per-layer weights, LE biases + `55 AA` | none |
//! | Scores read | `CD` | 40 bytes, 10 × int32 LE |
//! | Digit read | `CC` | 1 byte, low nibble = class |
//!
//! # Host states
//!
//! ```text
//! Idle → SendImage → AwaitInference → Idle
//! Idle → SendReadRequest → AwaitResponse → Idle
//! Idle → SendWeights → Idle
//! ```
//!
//! Any failure returns the machine to `Idle`; one outstanding request at a
//! time is guaranteed by `&mut self`.
//!
//! # Completion
//!
//! The device has no ready or ack signal. After an image upload the host
//! waits through a [`CompletionWait`]; the default [`FixedDelay`] sleeps a
//! configured time that is an estimate of inference latency. If the device
//! is slower, the following read returns the previous image's result. This
//! race is a property of the current bitstreams; a real handshake would
//! plug in as another `CompletionWait`.

use crate::error::{QnnError, Result};
use crate::transport::Transport;
use bytes::{BufMut, Bytes, BytesMut};
use qnn_chip::protocol::{
    opcode, DIGIT_MASK, DIGIT_RESPONSE_LEN, IMAGE_END, IMAGE_FRAME_LEN, IMAGE_PIXELS,
    IMAGE_START, SCORES_RESPONSE_LEN, WEIGHTS_END, WEIGHTS_START,
};
use qnn_chip::timing;
use qnn_models::{Prediction, QnnModelError, Scores};
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// 784 raw pixel bytes
    ImageUpload(Bytes),
    /// Concatenated weight memory image
    WeightsUpload(Bytes),
    /// `0xCD`
    ScoresReadRequest,
    /// Ten class scores
    ScoresReadResponse(Scores),
    /// `0xCC`
    DigitReadRequest,
    /// Predicted class
    DigitReadResponse(Prediction),
}

impl WireFrame {
    /// Image upload frame from int8 pixels.
    ///
    /// # Errors
    ///
    /// Returns `InputMismatch` unless there are exactly 784 pixels.
    pub fn image(pixels: &[i8]) -> Result<Self> {
        if pixels.len() != IMAGE_PIXELS {
            return Err(QnnModelError::InputMismatch {
                expected: IMAGE_PIXELS,
                actual: pixels.len(),
            }
            .into());
        }
        #[allow(clippy::cast_sign_loss)]
        let raw: Vec<u8> = pixels.iter().map(|&p| p as u8).collect();
        Ok(Self::ImageUpload(Bytes::from(raw)))
    }

    /// Exact wire bytes
    pub fn encode(&self) -> Bytes {
        match self {
            Self::ImageUpload(payload) => framed(IMAGE_START, payload, IMAGE_END),
            Self::WeightsUpload(payload) => framed(WEIGHTS_START, payload, WEIGHTS_END),
            Self::ScoresReadRequest => Bytes::from_static(&[opcode::SCORES_READ]),
            Self::ScoresReadResponse(scores) => Bytes::copy_from_slice(&scores.to_le_bytes()),
            Self::DigitReadRequest => Bytes::from_static(&[opcode::DIGIT_READ]),
            Self::DigitReadResponse(p) => Bytes::copy_from_slice(&[p.index()]),
        }
    }

    /// Fixed response length of a read request, `None` for other frames
    pub const fn response_len(&self) -> Option<usize> {
        match self {
            Self::ScoresReadRequest => Some(SCORES_RESPONSE_LEN),
            Self::DigitReadRequest => Some(DIGIT_RESPONSE_LEN),
            _ => None,
        }
    }

    /// Decode a scores response.
    ///
    /// # Errors
    ///
    /// Returns `NoResponse` for zero bytes and `ShortResponse` for any other
    /// length than 40.
    pub fn decode_scores(bytes: &[u8], waited: Duration) -> Result<Self> {
        match bytes.len() {
            0 => Err(no_response(waited)),
            SCORES_RESPONSE_LEN => Ok(Self::ScoresReadResponse(Scores::from_le_bytes(bytes)?)),
            actual => Err(QnnError::ShortResponse {
                expected: SCORES_RESPONSE_LEN,
                actual,
            }),
        }
    }

    /// Decode a digit response byte.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDigit` if the low nibble is not a class index.
    pub fn decode_digit(byte: u8) -> Result<Self> {
        Prediction::new(byte & DIGIT_MASK)
            .map(Self::DigitReadResponse)
            .ok_or(QnnError::InvalidDigit { byte })
    }
}

fn framed(start: [u8; 2], payload: &[u8], end: [u8; 2]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    buf.put_slice(&start);
    buf.put_slice(payload);
    buf.put_slice(&end);
    buf.freeze()
}

fn no_response(waited: Duration) -> QnnError {
    QnnError::NoResponse {
        waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Protocol timing and flow control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Wait after an image upload before reading results
    pub inference_delay: Duration,
    /// Bound on collecting a scores response
    pub response_timeout: Duration,
    /// Bound on waiting for a digit response
    pub digit_timeout: Duration,
    /// Poll step while waiting for a digit response
    pub digit_poll_interval: Duration,
    /// Upload chunk size in bytes (0 = unchunked)
    pub upload_chunk: usize,
    /// Pause between upload chunks
    pub upload_chunk_delay: Duration,
    /// Drop unread input before each read request
    pub discard_stale_input: bool,
    /// Wait after the link opens
    pub settle_delay: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            inference_delay: timing::INFERENCE_DELAY,
            response_timeout: timing::RESPONSE_TIMEOUT,
            digit_timeout: timing::DIGIT_TIMEOUT,
            digit_poll_interval: timing::DIGIT_POLL_INTERVAL,
            upload_chunk: timing::UPLOAD_CHUNK_BYTES,
            upload_chunk_delay: timing::UPLOAD_CHUNK_DELAY,
            discard_stale_input: true,
            settle_delay: timing::SETTLE_DELAY,
        }
    }
}

impl ProtocolConfig {
    /// No delays and no chunk pauses, for the in-process simulator
    pub fn immediate() -> Self {
        Self {
            inference_delay: Duration::ZERO,
            upload_chunk_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Strategy for deciding that the device has finished an inference
pub trait CompletionWait: Debug + Send {
    /// Block until results can be read
    fn wait_for_inference(&self);
}

/// Sleep a fixed time; the device gives no completion signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl CompletionWait for FixedDelay {
    fn wait_for_inference(&self) {
        if !self.0.is_zero() {
            std::thread::sleep(self.0);
        }
    }
}

/// Host state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// No request outstanding
    Idle,
    /// Writing an image frame
    SendImage,
    /// Waiting for the device to finish an inference
    AwaitInference,
    /// Writing a weights frame
    SendWeights,
    /// Writing a read request
    SendReadRequest,
    /// Collecting a response
    AwaitResponse,
}

/// Host protocol driver over one transport
#[derive(Debug)]
pub struct WireProtocol<T> {
    transport: T,
    config: ProtocolConfig,
    wait: Box<dyn CompletionWait>,
    state: HostState,
    #[cfg(test)]
    trail: Vec<HostState>,
}

impl<T: Transport> WireProtocol<T> {
    /// Driver with a [`FixedDelay`] completion wait
    pub fn new(transport: T, config: ProtocolConfig) -> Self {
        let wait = Box::new(FixedDelay(config.inference_delay));
        Self {
            transport,
            config,
            wait,
            state: HostState::Idle,
            #[cfg(test)]
            trail: Vec::new(),
        }
    }

    /// Replace the completion strategy
    #[must_use]
    pub fn with_completion_wait(mut self, wait: impl CompletionWait + 'static) -> Self {
        self.wait = Box::new(wait);
        self
    }

    /// Current state
    pub const fn state(&self) -> HostState {
        self.state
    }

    /// Protocol settings
    pub const fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Release the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Wait for the link to settle after opening, then drop whatever the
    /// device sent meanwhile.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the discard fails.
    pub fn settle(&mut self) -> Result<()> {
        if !self.config.settle_delay.is_zero() {
            std::thread::sleep(self.config.settle_delay);
        }
        let dropped = self.transport.discard_input()?;
        if dropped > 0 {
            debug!("Discarded {dropped} bytes after open");
        }
        Ok(())
    }

    /// Send an image and wait for the inference to complete.
    ///
    /// # Errors
    ///
    /// Returns `InputMismatch` for a wrong pixel count, or a transport error.
    pub fn upload_image(&mut self, pixels: &[i8]) -> Result<()> {
        let frame = WireFrame::image(pixels)?;
        self.run(|p| p.send_image(&frame))
    }

    /// Send a weights frame.
    ///
    /// # Errors
    ///
    /// Returns a transport error.
    pub fn upload_weights(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        let frame = WireFrame::WeightsUpload(payload.into());
        self.run(|p| {
            p.enter(HostState::SendWeights);
            let bytes = frame.encode();
            debug!("Uploading weights frame ({} bytes)", bytes.len());
            p.send_chunked(&bytes)
        })
    }

    /// Request and collect the ten class scores.
    ///
    /// # Errors
    ///
    /// Returns `NoResponse` or `ShortResponse` if fewer than 40 bytes arrive
    /// within the response timeout, or a transport error.
    pub fn read_scores(&mut self) -> Result<Scores> {
        self.run(Self::collect_scores)
    }

    /// Request the predicted digit, polling until the timeout.
    ///
    /// # Errors
    ///
    /// Returns `NoResponse`, `InvalidDigit`, or a transport error.
    pub fn read_digit(&mut self) -> Result<Prediction> {
        self.run(|p| {
            p.request(&WireFrame::DigitReadRequest)?;
            let started = Instant::now();
            let mut byte = [0u8; DIGIT_RESPONSE_LEN];
            loop {
                let step = p.config.digit_poll_interval.max(Duration::from_millis(1));
                if p.transport.read_within(&mut byte, step)? == DIGIT_RESPONSE_LEN {
                    break;
                }
                if started.elapsed() >= p.config.digit_timeout {
                    return Err(no_response(started.elapsed()));
                }
            }
            match WireFrame::decode_digit(byte[0])? {
                WireFrame::DigitReadResponse(prediction) => Ok(prediction),
                other => Err(QnnError::invalid_state(format!("decoded {other:?}"))),
            }
        })
    }

    /// Upload an image, wait, then read scores as one exchange:
    /// `SendImage -> AwaitInference -> SendReadRequest -> AwaitResponse`,
    /// back to `Idle` only at the end.
    ///
    /// # Errors
    ///
    /// Any error of [`upload_image`](Self::upload_image) or
    /// [`read_scores`](Self::read_scores).
    pub fn classify(&mut self, pixels: &[i8]) -> Result<Scores> {
        let frame = WireFrame::image(pixels)?;
        self.run(|p| {
            p.send_image(&frame)?;
            p.collect_scores()
        })
    }

    fn send_image(&mut self, frame: &WireFrame) -> Result<()> {
        self.enter(HostState::SendImage);
        let bytes = frame.encode();
        debug_assert_eq!(bytes.len(), IMAGE_FRAME_LEN);
        self.send_chunked(&bytes)?;
        self.enter(HostState::AwaitInference);
        self.wait.wait_for_inference();
        Ok(())
    }

    fn collect_scores(&mut self) -> Result<Scores> {
        self.request(&WireFrame::ScoresReadRequest)?;
        let mut buf = [0u8; SCORES_RESPONSE_LEN];
        let started = Instant::now();
        let n = self.transport.read_within(&mut buf, self.config.response_timeout)?;
        match WireFrame::decode_scores(&buf[..n], started.elapsed())? {
            WireFrame::ScoresReadResponse(scores) => Ok(scores),
            other => Err(QnnError::invalid_state(format!("decoded {other:?}"))),
        }
    }

    /// Every public operation starts and ends in `Idle`; a failure anywhere
    /// in the chain also returns there.
    fn run<R>(&mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        if self.state != HostState::Idle {
            return Err(QnnError::invalid_state(format!("{:?}", self.state)));
        }
        let out = op(self);
        if let Err(e) = &out {
            debug!("Request failed in {:?}: {e}", self.state);
        }
        self.enter(HostState::Idle);
        out
    }

    fn enter(&mut self, next: HostState) {
        if next != self.state {
            debug!("{:?} -> {next:?}", self.state);
            self.state = next;
            #[cfg(test)]
            self.trail.push(next);
        }
    }

    fn request(&mut self, frame: &WireFrame) -> Result<()> {
        if self.config.discard_stale_input {
            let dropped = self.transport.discard_input()?;
            if dropped > 0 {
                warn!("Discarded {dropped} stale bytes before {frame:?}");
            }
        }
        self.enter(HostState::SendReadRequest);
        self.transport.write_all(&frame.encode())?;
        self.enter(HostState::AwaitResponse);
        Ok(())
    }

    fn send_chunked(&mut self, bytes: &[u8]) -> Result<()> {
        let chunk = self.config.upload_chunk;
        if chunk == 0 {
            return self.transport.write_all(bytes);
        }
        let mut chunks = bytes.chunks(chunk).peekable();
        while let Some(part) = chunks.next() {
            self.transport.write_all(part)?;
            if chunks.peek().is_some() && !self.config.upload_chunk_delay.is_zero() {
                std::thread::sleep(self.config.upload_chunk_delay);
            }
        }
        Ok(())
    }
}
