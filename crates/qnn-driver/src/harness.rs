//! Hardware/software comparison harness.
//!
//! For every sample the reference engine and the device each produce ten
//! class scores; the harness classifies the pair and hands a
//! [`ComparisonRecord`] to a [`RecordSink`].
//!
//! Reference scores do not depend on the device, so they are computed for
//! the whole set up front in parallel. The device half is strictly serial:
//! one connection, one outstanding request.
//!
//! Per-sample protocol failures (short or missing responses, a dropped link)
//! become `Error` records and the run continues. Anything else, such as a
//! report that can no longer be written, ends the run.

use crate::error::Result;
use crate::protocol::WireProtocol;
use crate::report::{RecordSink, RunHeader};
use crate::transport::Transport;
use qnn_models::{Inference, InferenceEngine, Prediction, SampleSet, Scores};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// What to read from the device after each image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Scores only; device prediction is their argmax
    #[default]
    Scores,
    /// Scores, then the digit register; device prediction is the digit
    ScoresAndDigit,
}

/// Harness settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Device reads per sample
    pub read_mode: ReadMode,
    /// Log progress every N samples (0 = never)
    pub progress_every: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::Scores,
            progress_every: 10,
        }
    }
}

/// Verdict for one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonStatus {
    /// Scores element-wise equal (and digit agrees, if read)
    Match,
    /// Device disagrees with the reference
    Mismatch {
        /// Largest per-class score difference
        max_abs_diff: u64,
    },
    /// Device response malformed or absent
    Error {
        /// Failure description
        reason: String,
    },
}

/// What the device returned for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceResult {
    /// Scores read back
    pub scores: Scores,
    /// Device prediction (digit register if read, else argmax of scores)
    pub prediction: Prediction,
    /// Digit register, in [`ReadMode::ScoresAndDigit`]
    pub digit: Option<Prediction>,
}

/// Outcome for one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRecord {
    /// Position in the sample set
    pub index: usize,
    /// True class
    pub label: u8,
    /// Engine output
    pub reference: Inference,
    /// Device output, absent on error
    pub device: Option<DeviceResult>,
    /// Verdict
    pub status: ComparisonStatus,
}

impl ComparisonRecord {
    /// Classify a device result against the reference
    pub fn classify(index: usize, label: u8, reference: Inference, device: DeviceResult) -> Self {
        let max_abs_diff = reference.scores.max_abs_diff(&device.scores);
        let status = if max_abs_diff == 0 && device.prediction == reference.prediction {
            ComparisonStatus::Match
        } else {
            ComparisonStatus::Mismatch { max_abs_diff }
        };
        Self {
            index,
            label,
            reference,
            device: Some(device),
            status,
        }
    }

    /// Record a failed device exchange
    pub fn error(index: usize, label: u8, reference: Inference, reason: impl Into<String>) -> Self {
        Self {
            index,
            label,
            reference,
            device: None,
            status: ComparisonStatus::Error {
                reason: reason.into(),
            },
        }
    }
}

/// Aggregate counts for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComparisonSummary {
    /// Samples processed
    pub total: usize,
    /// Match records
    pub matches: usize,
    /// Mismatch records
    pub mismatches: usize,
    /// Error records
    pub errors: usize,
    /// Reference predictions equal to the label
    pub reference_correct: usize,
    /// Device predictions equal to the label (errors count as wrong)
    pub device_correct: usize,
    /// True if the run stopped early on request
    pub interrupted: bool,
}

impl ComparisonSummary {
    /// Fold one record into the counts
    pub fn add(&mut self, record: &ComparisonRecord) {
        self.total += 1;
        match record.status {
            ComparisonStatus::Match => self.matches += 1,
            ComparisonStatus::Mismatch { .. } => self.mismatches += 1,
            ComparisonStatus::Error { .. } => self.errors += 1,
        }
        if record.reference.prediction.index() == record.label {
            self.reference_correct += 1;
        }
        if record
            .device
            .is_some_and(|d| d.prediction.index() == record.label)
        {
            self.device_correct += 1;
        }
    }

    /// `count` as a percentage of `total`
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total as f64
        }
    }
}

/// Drives reference and device side by side over a sample set
#[derive(Debug)]
pub struct ComparisonHarness<T> {
    engine: InferenceEngine,
    protocol: WireProtocol<T>,
    config: HarnessConfig,
    profile: Option<String>,
    cancel: Arc<AtomicBool>,
}

impl<T: Transport> ComparisonHarness<T> {
    /// Harness comparing `engine` with the device behind `protocol`
    pub fn new(engine: InferenceEngine, protocol: WireProtocol<T>, config: HarnessConfig) -> Self {
        Self {
            engine,
            protocol,
            config,
            profile: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Describe the arithmetic profile in the report header
    #[must_use]
    pub fn with_profile_description(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Share `cancel` (e.g. one set by an interrupt handler) instead of the
    /// harness's own flag
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops the run after the sample in flight
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Protocol driver, e.g. to inspect a simulated device after a run
    pub const fn protocol(&self) -> &WireProtocol<T> {
        &self.protocol
    }

    /// Protocol driver, mutably
    pub fn protocol_mut(&mut self) -> &mut WireProtocol<T> {
        &mut self.protocol
    }

    /// Compare every sample, streaming records to `sink`.
    ///
    /// # Errors
    ///
    /// Returns a model error if the samples do not fit the model, `Io` if
    /// the sink fails, or any non-protocol device error. Protocol errors
    /// are recorded per sample instead.
    pub fn run(&mut self, samples: &SampleSet, sink: &mut dyn RecordSink) -> Result<ComparisonSummary> {
        let references = self.engine.infer_batch(samples.samples())?;
        info!(
            "Comparing {} samples ({} over {})",
            samples.len(),
            self.engine.model(),
            self.protocol.transport().transport_type()
        );

        sink.begin(&RunHeader {
            model: self.engine.model().to_string(),
            profile: self.profile.clone(),
            transport: self.protocol.transport().transport_type(),
            samples: samples.len(),
        })?;

        let mut summary = ComparisonSummary::default();
        for (index, (sample, reference)) in samples.samples().iter().zip(references).enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                warn!("Comparison interrupted after {index} samples");
                summary.interrupted = true;
                break;
            }

            let record = match self.exchange(&sample.pixels) {
                Ok(device) => ComparisonRecord::classify(index, sample.label, reference, device),
                Err(e) if e.is_protocol() => {
                    warn!("Sample {index}: {e}");
                    ComparisonRecord::error(index, sample.label, reference, e.to_string())
                }
                Err(e) => return Err(e),
            };
            summary.add(&record);
            sink.record(&record)?;

            let done = index + 1;
            if self.config.progress_every > 0 && done % self.config.progress_every == 0 {
                info!(
                    "Progress {done}/{}: {} match, {} mismatch, {} error",
                    samples.len(),
                    summary.matches,
                    summary.mismatches,
                    summary.errors
                );
            }
        }

        sink.finish(&summary)?;
        info!(
            "Comparison done: {}/{} match ({:.2}%)",
            summary.matches,
            summary.total,
            summary.percent(summary.matches)
        );
        Ok(summary)
    }

    fn exchange(&mut self, pixels: &[i8]) -> Result<DeviceResult> {
        let scores = self.protocol.classify(pixels)?;
        let digit = match self.config.read_mode {
            ReadMode::Scores => None,
            ReadMode::ScoresAndDigit => Some(self.protocol.read_digit()?),
        };
        Ok(DeviceResult {
            scores,
            prediction: digit.unwrap_or_else(|| scores.prediction()),
            digit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inference(scores: [i32; 10]) -> Inference {
        let scores = Scores(scores);
        Inference {
            scores,
            prediction: scores.prediction(),
        }
    }

    #[test]
    fn equal_scores_match() {
        let r = inference([0, 0, 5, 0, 0, 0, 0, 0, 0, 0]);
        let d = DeviceResult {
            scores: r.scores,
            prediction: r.prediction,
            digit: None,
        };
        let rec = ComparisonRecord::classify(0, 2, r, d);
        assert_eq!(rec.status, ComparisonStatus::Match);
    }

    #[test]
    fn score_difference_is_mismatch() {
        let r = inference([0, 0, 5, 0, 0, 0, 0, 0, 0, 0]);
        let s = Scores([0, -3, 5, 0, 0, 0, 0, 0, 0, 1]);
        let d = DeviceResult {
            scores: s,
            prediction: s.prediction(),
            digit: None,
        };
        let rec = ComparisonRecord::classify(0, 2, r, d);
        assert_eq!(rec.status, ComparisonStatus::Mismatch { max_abs_diff: 3 });
    }

    #[test]
    fn digit_disagreement_is_mismatch_with_zero_diff() {
        let r = inference([0, 0, 5, 0, 0, 0, 0, 0, 0, 0]);
        let digit = Prediction::new(7).unwrap();
        let d = DeviceResult {
            scores: r.scores,
            prediction: digit,
            digit: Some(digit),
        };
        let rec = ComparisonRecord::classify(0, 2, r, d);
        assert_eq!(rec.status, ComparisonStatus::Mismatch { max_abs_diff: 0 });
    }

    #[test]
    fn summary_counts_accuracy() {
        let r = inference([0, 0, 5, 0, 0, 0, 0, 0, 0, 0]);
        let good = DeviceResult {
            scores: r.scores,
            prediction: r.prediction,
            digit: None,
        };
        let mut sum = ComparisonSummary::default();
        sum.add(&ComparisonRecord::classify(0, 2, r, good));
        sum.add(&ComparisonRecord::classify(1, 3, r, good));
        sum.add(&ComparisonRecord::error(2, 2, r, "no response"));
        assert_eq!((sum.total, sum.matches, sum.errors), (3, 2, 1));
        assert_eq!(sum.reference_correct, 2);
        assert_eq!(sum.device_correct, 1);
        assert!((sum.percent(sum.matches) - 66.666).abs() < 0.01);
        assert!(ComparisonSummary::default().percent(0).abs() < f64::EPSILON);
    }
}
