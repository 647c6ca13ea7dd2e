//! Preprocessed sample sets.
//!
//! Normalization and int8 quantization of raw images happen upstream. This
//! module only reads their output, in one of two layouts:
//!
//! - a fixture directory holding `test_vectors_pixels.mem` (784 lines per
//!   image) and `test_vectors_labels.mem` (one nibble per image);
//! - raw binaries `images.bin` (N × 784 int8) and `labels.bin` (N × u8).

use crate::codec::Width;
use crate::error::{QnnModelError, Result};
use crate::fixtures::{LABELS_FILE, PIXELS_FILE};
use crate::mem;
use qnn_chip::protocol::{IMAGE_PIXELS, NUM_CLASSES};
use std::path::Path;

/// Raw image file name
pub const IMAGES_BIN: &str = "images.bin";
/// Raw label file name
pub const LABELS_BIN: &str = "labels.bin";

/// One preprocessed image with its true label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// int8 pixels, row-major
    pub pixels: Vec<i8>,
    /// True class
    pub label: u8,
}

impl AsRef<[i8]> for Sample {
    fn as_ref(&self) -> &[i8] {
        &self.pixels
    }
}

/// Ordered collection of samples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    /// Wrap already-loaded samples.
    ///
    /// # Errors
    ///
    /// Returns a config error if any image is not 784 pixels or any label is
    /// not a class index.
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        for (i, s) in samples.iter().enumerate() {
            if s.pixels.len() != IMAGE_PIXELS {
                return Err(QnnModelError::shape_mismatch(
                    format!("sample {i} pixels"),
                    IMAGE_PIXELS,
                    s.pixels.len(),
                ));
            }
            if usize::from(s.label) >= NUM_CLASSES {
                return Err(QnnModelError::config(format!(
                    "sample {i}: label {} is not a class",
                    s.label
                )));
            }
        }
        Ok(Self { samples })
    }

    /// Load from a directory in either supported layout.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if neither layout is present, or the loader's
    /// error.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if dir.join(PIXELS_FILE).exists() {
            Self::from_fixture_dir(dir)
        } else if dir.join(IMAGES_BIN).exists() {
            Self::from_binaries(dir.join(IMAGES_BIN), dir.join(LABELS_BIN))
        } else {
            Err(QnnModelError::FileNotFound {
                path: dir.join(PIXELS_FILE),
            })
        }
    }

    /// Load pixel and label `.mem` files from a fixture directory.
    ///
    /// # Errors
    ///
    /// Returns `Format` for malformed lines and a config error when pixel
    /// and label counts disagree.
    pub fn from_fixture_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let pixels = mem::read_mem(dir.join(PIXELS_FILE), Width::W8)?;
        let labels = mem::read_nibbles(dir.join(LABELS_FILE))?;
        let pixels: Vec<i8> = pixels
            .into_iter()
            .map(|p| {
                i8::try_from(p).map_err(|_| QnnModelError::OutOfRange {
                    value: i64::from(p),
                    bits: 8,
                })
            })
            .collect::<Result<_>>()?;
        Self::assemble(&pixels, &labels)
    }

    /// Load raw `images.bin` / `labels.bin`.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound`, `Io`, or a config error when sizes disagree.
    pub fn from_binaries(images: impl AsRef<Path>, labels: impl AsRef<Path>) -> Result<Self> {
        let (images, labels) = (images.as_ref(), labels.as_ref());
        for path in [images, labels] {
            if !path.exists() {
                return Err(QnnModelError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
        }
        let raw = std::fs::read(images)?;
        let labels = std::fs::read(labels)?;
        #[allow(clippy::cast_possible_wrap)]
        let pixels: Vec<i8> = raw.into_iter().map(|b| b as i8).collect();
        Self::assemble(&pixels, &labels)
    }

    fn assemble(pixels: &[i8], labels: &[u8]) -> Result<Self> {
        if pixels.len() % IMAGE_PIXELS != 0 {
            return Err(QnnModelError::config(format!(
                "{} pixels is not a whole number of {IMAGE_PIXELS}-pixel images",
                pixels.len()
            )));
        }
        let count = pixels.len() / IMAGE_PIXELS;
        if count != labels.len() {
            return Err(QnnModelError::shape_mismatch("labels", count, labels.len()));
        }
        let samples = pixels
            .chunks_exact(IMAGE_PIXELS)
            .zip(labels)
            .map(|(p, &label)| Sample {
                pixels: p.to_vec(),
                label,
            })
            .collect();
        let set = Self::new(samples)?;
        tracing::info!("Loaded {} samples", set.len());
        Ok(set)
    }

    /// Keep only the first `n` samples
    #[must_use]
    pub fn truncated(mut self, n: usize) -> Self {
        self.samples.truncate(n);
        self
    }

    /// Sample count
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in order
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Sample `index`
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn binaries_layout() {
        let dir = TempDir::new().unwrap();
        let mut images = vec![0u8; IMAGE_PIXELS * 2];
        images[IMAGE_PIXELS] = 0x80;
        fs::write(dir.path().join(IMAGES_BIN), images).unwrap();
        fs::write(dir.path().join(LABELS_BIN), [3u8, 9]).unwrap();
        let set = SampleSet::load(dir.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).unwrap().pixels[0], -128);
        assert_eq!(set.get(1).unwrap().label, 9);
    }

    #[test]
    fn label_count_mismatch() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IMAGES_BIN), vec![0u8; IMAGE_PIXELS]).unwrap();
        fs::write(dir.path().join(LABELS_BIN), [1u8, 2]).unwrap();
        assert!(SampleSet::load(dir.path()).unwrap_err().is_config());
    }

    #[test]
    fn partial_image_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IMAGES_BIN), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join(LABELS_BIN), [1u8]).unwrap();
        assert!(SampleSet::load(dir.path()).unwrap_err().is_config());
    }

    #[test]
    fn labels_must_be_classes() {
        let sample = Sample {
            pixels: vec![0; IMAGE_PIXELS],
            label: 10,
        };
        assert!(SampleSet::new(vec![sample]).is_err());
    }

    #[test]
    fn empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(SampleSet::load(dir.path()).is_err());
    }

    #[test]
    fn truncation() {
        let samples = (0..5)
            .map(|label| Sample {
                pixels: vec![0; IMAGE_PIXELS],
                label,
            })
            .collect();
        let set = SampleSet::new(samples).unwrap().truncated(2);
        assert_eq!(set.len(), 2);
    }
}
