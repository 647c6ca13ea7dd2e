//! Test-vector fixtures for the hardware test bench.
//!
//! A fixture directory is the expected-output contract the HDL test bench
//! loads with `$readmemh`:
//!
//! | File | Lines per sample | Format |
//! |------|------------------|--------|
//! | `test_vectors_pixels.mem` | 784 | 2-digit int8 |
//! | `test_vectors_scores.mem` | 10 | 8-digit int32 |
//! | `test_vectors_meta.mem` | 1 | reference prediction nibble |
//! | `test_vectors_labels.mem` | 1 | true label nibble |
//!
//! Samples are written in input order and the files are flushed after each
//! one, so an interrupted run leaves every file ending on the same whole
//! sample.

use crate::codec::Width;
use crate::engine::{Inference, InferenceEngine};
use crate::error::{QnnModelError, Result};
use crate::mem;
use crate::samples::{Sample, SampleSet};
use crate::scores::{Prediction, Scores};
use qnn_chip::protocol::NUM_CLASSES;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Pixel fixture file
pub const PIXELS_FILE: &str = "test_vectors_pixels.mem";
/// Expected scores fixture file
pub const SCORES_FILE: &str = "test_vectors_scores.mem";
/// Expected predictions fixture file
pub const META_FILE: &str = "test_vectors_meta.mem";
/// True labels fixture file
pub const LABELS_FILE: &str = "test_vectors_labels.mem";

/// Samples computed in parallel between cancellation checks
const BATCH: usize = 64;

/// Streams samples into the four fixture files
#[derive(Debug)]
pub struct FixtureWriter {
    dir: PathBuf,
    pixels: BufWriter<File>,
    scores: BufWriter<File>,
    meta: BufWriter<File>,
    labels: BufWriter<File>,
    written: usize,
}

impl FixtureWriter {
    /// Create (or truncate) the fixture files in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory or files cannot be created.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let open = |name: &str| -> Result<BufWriter<File>> {
            Ok(BufWriter::new(File::create(dir.join(name))?))
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            pixels: open(PIXELS_FILE)?,
            scores: open(SCORES_FILE)?,
            meta: open(META_FILE)?,
            labels: open(LABELS_FILE)?,
            written: 0,
        })
    }

    /// Append one sample and flush it to disk.
    ///
    /// # Errors
    ///
    /// Returns `Io` on write failure.
    pub fn write(&mut self, sample: &Sample, reference: &Inference) -> Result<()> {
        let pixels: Vec<i32> = sample.pixels.iter().map(|&p| i32::from(p)).collect();
        mem::write_values(&mut self.pixels, &pixels, Width::W8)?;
        mem::write_values(&mut self.scores, reference.scores.as_slice(), Width::W32)?;
        writeln!(self.meta, "{:01x}", reference.prediction.index())?;
        writeln!(self.labels, "{:01x}", sample.label)?;
        self.flush()?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for out in [
            &mut self.pixels,
            &mut self.scores,
            &mut self.meta,
            &mut self.labels,
        ] {
            out.flush()?;
        }
        Ok(())
    }

    /// Samples written so far
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Flush all files.
    ///
    /// # Errors
    ///
    /// Returns `Io` on flush failure.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        tracing::info!("Wrote {} fixture samples to {}", self.written, self.dir.display());
        Ok(self.written)
    }
}

/// Outcome of a fixture generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixtureSummary {
    /// Samples written
    pub written: usize,
    /// Samples whose reference prediction equals the label
    pub correct: usize,
    /// True if the run stopped early on request
    pub interrupted: bool,
}

impl FixtureSummary {
    /// Reference accuracy in percent
    #[allow(clippy::cast_precision_loss)]
    pub fn accuracy(&self) -> f64 {
        if self.written == 0 {
            0.0
        } else {
            self.correct as f64 * 100.0 / self.written as f64
        }
    }
}

/// Compute reference outputs for `samples` and write them to `dir`.
///
/// Reference scores are computed in parallel batches; files are written in
/// sample order. `cancel` is checked before every sample.
///
/// # Errors
///
/// Returns `InputMismatch` if the samples do not fit the model, or `Io`.
pub fn generate_fixtures(
    engine: &InferenceEngine,
    samples: &SampleSet,
    dir: impl AsRef<Path>,
    cancel: &AtomicBool,
) -> Result<FixtureSummary> {
    let mut writer = FixtureWriter::create(dir)?;
    let mut summary = FixtureSummary::default();

    'batches: for batch in samples.samples().chunks(BATCH) {
        let references = engine.infer_batch(batch)?;
        for (sample, reference) in batch.iter().zip(&references) {
            if cancel.load(Ordering::Relaxed) {
                tracing::warn!("Fixture generation interrupted after {} samples", writer.written());
                summary.interrupted = true;
                break 'batches;
            }
            writer.write(sample, reference)?;
            if reference.prediction.index() == sample.label {
                summary.correct += 1;
            }
        }
        tracing::debug!("Fixtures: {}/{}", writer.written(), samples.len());
    }

    summary.written = writer.finish()?;
    Ok(summary)
}

/// Read the expected scores and predictions back from a fixture directory.
///
/// # Errors
///
/// Returns `Format` for malformed files and a config error if the scores
/// and predictions disagree in count or a prediction is not a class.
pub fn read_expected(dir: impl AsRef<Path>) -> Result<Vec<Inference>> {
    let dir = dir.as_ref();
    let scores = mem::read_mem(dir.join(SCORES_FILE), Width::W32)?;
    let predictions = mem::read_nibbles(dir.join(META_FILE))?;
    if scores.len() != predictions.len() * NUM_CLASSES {
        return Err(QnnModelError::shape_mismatch(
            "fixture scores",
            predictions.len() * NUM_CLASSES,
            scores.len(),
        ));
    }
    scores
        .chunks_exact(NUM_CLASSES)
        .zip(predictions)
        .map(|(chunk, p)| {
            let prediction = Prediction::new(p).ok_or_else(|| {
                QnnModelError::config(format!("fixture prediction {p} is not a class"))
            })?;
            Ok(Inference {
                scores: Scores::from_slice(chunk)?,
                prediction,
            })
        })
        .collect()
}
