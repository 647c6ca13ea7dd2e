//! Class scores and predictions

use crate::codec::FixedWidthCodec;
use crate::error::{QnnModelError, Result};
use qnn_chip::protocol::{BYTES_PER_SCORE, NUM_CLASSES, SCORES_RESPONSE_LEN};

/// Raw int32 score per class, in class-index order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scores(pub [i32; NUM_CLASSES]);

impl Scores {
    /// Build from exactly ten values.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` for any other count.
    pub fn from_slice(values: &[i32]) -> Result<Self> {
        let array: [i32; NUM_CLASSES] = values
            .try_into()
            .map_err(|_| QnnModelError::shape_mismatch("class scores", NUM_CLASSES, values.len()))?;
        Ok(Self(array))
    }

    /// Decode the 40-byte little-endian scores response.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `bytes` is not exactly 40 bytes long.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SCORES_RESPONSE_LEN {
            return Err(QnnModelError::shape_mismatch(
                "scores response bytes",
                SCORES_RESPONSE_LEN,
                bytes.len(),
            ));
        }
        let mut out = [0i32; NUM_CLASSES];
        for (slot, chunk) in out.iter_mut().zip(bytes.chunks_exact(BYTES_PER_SCORE)) {
            *slot = FixedWidthCodec::I32.read_le(chunk)?;
        }
        Ok(Self(out))
    }

    /// Encode as the 40-byte little-endian scores response
    pub fn to_le_bytes(&self) -> [u8; SCORES_RESPONSE_LEN] {
        let mut out = [0u8; SCORES_RESPONSE_LEN];
        for (chunk, value) in out.chunks_exact_mut(BYTES_PER_SCORE).zip(self.0) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Index of the maximum score; ties go to the lowest index
    pub fn prediction(&self) -> Prediction {
        let mut best = 0;
        for (i, &v) in self.0.iter().enumerate().skip(1) {
            if v > self.0[best] {
                best = i;
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        let index = best as u8;
        Prediction(index)
    }

    /// Largest per-class absolute difference
    pub fn max_abs_diff(&self, other: &Self) -> u64 {
        self.0
            .iter()
            .zip(other.0)
            .map(|(&a, b)| (i64::from(a) - i64::from(b)).unsigned_abs())
            .max()
            .unwrap_or(0)
    }

    /// Values as a slice
    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }
}

impl std::fmt::Display for Scores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v:6}")?;
        }
        write!(f, "]")
    }
}

/// Predicted class index (0–9)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prediction(u8);

impl Prediction {
    /// Class `index`, `None` if not a valid class
    pub fn new(index: u8) -> Option<Self> {
        (usize::from(index) < NUM_CLASSES).then_some(Self(index))
    }

    /// Class index
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
