//! Two's-complement conversions at fixed widths.
//!
//! Every conversion between signed values and their raw unsigned, byte or
//! hex-text form goes through [`FixedWidthCodec`]. Hex text is the
//! `$readmemh` form: exactly two digits for 8-bit values, eight for 32-bit,
//! most significant digit first. Byte form is little-endian.

use crate::error::{QnnModelError, Result};

/// Supported register widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// 8-bit (pixels, weights, activations)
    W8,
    /// 32-bit (biases, accumulators, scores)
    W32,
}

impl Width {
    /// Width in bits
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W32 => 32,
        }
    }

    /// Bytes per value
    pub const fn byte_len(self) -> usize {
        match self {
            Self::W8 => 1,
            Self::W32 => 4,
        }
    }

    /// Hex digits per value
    pub const fn hex_digits(self) -> usize {
        self.byte_len() * 2
    }

    /// Most negative representable value
    pub const fn min(self) -> i32 {
        match self {
            Self::W8 => i8::MIN as i32,
            Self::W32 => i32::MIN,
        }
    }

    /// Most positive representable value
    pub const fn max(self) -> i32 {
        match self {
            Self::W8 => i8::MAX as i32,
            Self::W32 => i32::MAX,
        }
    }

    /// Guess the width from a hex digit count
    pub const fn from_hex_digits(digits: usize) -> Option<Self> {
        match digits {
            2 => Some(Self::W8),
            8 => Some(Self::W32),
            _ => None,
        }
    }
}

impl std::fmt::Display for Width {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "int{}", self.bits())
    }
}

/// Two's-complement codec for one width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWidthCodec {
    width: Width,
}

impl FixedWidthCodec {
    /// Codec for 8-bit values
    pub const I8: Self = Self { width: Width::W8 };

    /// Codec for 32-bit values
    pub const I32: Self = Self { width: Width::W32 };

    /// Create a codec for `width`
    pub const fn new(width: Width) -> Self {
        Self { width }
    }

    /// Signed value → raw unsigned representation.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `value` is not representable at this width.
    pub fn encode(&self, value: i32) -> Result<u32> {
        self.check_range(value)?;
        #[allow(clippy::cast_sign_loss)]
        let raw = match self.width {
            Width::W8 => u32::from(value as i8 as u8),
            Width::W32 => value as u32,
        };
        Ok(raw)
    }

    /// Raw unsigned representation → signed value.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `raw` has bits above the width.
    pub fn decode(&self, raw: u32) -> Result<i32> {
        match self.width {
            Width::W8 => {
                let byte = u8::try_from(raw).map_err(|_| QnnModelError::OutOfRange {
                    value: i64::from(raw),
                    bits: 8,
                })?;
                #[allow(clippy::cast_possible_wrap)]
                let signed = byte as i8;
                Ok(i32::from(signed))
            }
            #[allow(clippy::cast_possible_wrap)]
            Width::W32 => Ok(raw as i32),
        }
    }

    /// Signed value → fixed-width lowercase hex.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `value` is not representable at this width.
    pub fn to_hex(&self, value: i32) -> Result<String> {
        let raw = self.encode(value)?;
        Ok(format!("{raw:0width$x}", width = self.width.hex_digits()))
    }

    /// Fixed-width hex → signed value.
    ///
    /// Surrounding whitespace is ignored; the digit count must match exactly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHex` on a digit count mismatch or a non-hex character.
    pub fn parse_hex(&self, text: &str) -> Result<i32> {
        let digits = text.trim();
        let invalid = || QnnModelError::InvalidHex {
            text: digits.to_string(),
            expected_digits: self.width.hex_digits(),
        };
        if digits.len() != self.width.hex_digits() || !digits.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(invalid());
        }
        let raw = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
        self.decode(raw)
    }

    /// Append the little-endian bytes of `value`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `value` is not representable at this width.
    pub fn write_le(&self, value: i32, out: &mut Vec<u8>) -> Result<()> {
        let raw = self.encode(value)?;
        out.extend_from_slice(&raw.to_le_bytes()[..self.width.byte_len()]);
        Ok(())
    }

    /// Decode one value from exactly `byte_len()` little-endian bytes.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `bytes` has the wrong length.
    pub fn read_le(&self, bytes: &[u8]) -> Result<i32> {
        let n = self.width.byte_len();
        if bytes.len() != n {
            return Err(QnnModelError::shape_mismatch(
                format!("{} value", self.width),
                n,
                bytes.len(),
            ));
        }
        let mut raw = [0u8; 4];
        raw[..n].copy_from_slice(bytes);
        self.decode(u32::from_le_bytes(raw))
    }

    /// Decode a packed little-endian array.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the length is not a multiple of the width.
    pub fn read_le_slice(&self, bytes: &[u8]) -> Result<Vec<i32>> {
        let n = self.width.byte_len();
        if bytes.len() % n != 0 {
            return Err(QnnModelError::config(format!(
                "{} bytes is not a whole number of {} values",
                bytes.len(),
                self.width
            )));
        }
        bytes.chunks_exact(n).map(|c| self.read_le(c)).collect()
    }

    fn check_range(&self, value: i32) -> Result<()> {
        if value < self.width.min() || value > self.width.max() {
            return Err(QnnModelError::OutOfRange {
                value: i64::from(value),
                bits: self.width.bits(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_extremes_survive_encode_decode() {
        let codec = FixedWidthCodec::I32;
        for v in [i32::MIN, -1, 0, i32::MAX] {
            let raw = codec.encode(v).unwrap();
            assert_eq!(codec.decode(raw).unwrap(), v);
            assert_eq!(codec.parse_hex(&codec.to_hex(v).unwrap()).unwrap(), v);
        }
    }

    #[test]
    fn i8_most_negative() {
        let codec = FixedWidthCodec::I8;
        assert_eq!(codec.encode(-128).unwrap(), 0x80);
        assert_eq!(codec.decode(0x80).unwrap(), -128);
        assert_eq!(codec.to_hex(-128).unwrap(), "80");
        assert_eq!(codec.to_hex(-1).unwrap(), "ff");
        assert_eq!(codec.to_hex(127).unwrap(), "7f");
    }

    #[test]
    fn i32_hex_is_msb_first() {
        let codec = FixedWidthCodec::I32;
        assert_eq!(codec.to_hex(-2).unwrap(), "fffffffe");
        assert_eq!(codec.to_hex(0x0102_0304).unwrap(), "01020304");
    }

    #[test]
    fn wrong_digit_count_is_format_error() {
        let err = FixedWidthCodec::I32.parse_hex("ff").unwrap_err();
        assert!(err.is_format());
        let err = FixedWidthCodec::I8.parse_hex("0ff").unwrap_err();
        assert!(err.is_format());
        let err = FixedWidthCodec::I8.parse_hex("zz").unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(FixedWidthCodec::I8.encode(128).is_err());
        assert!(FixedWidthCodec::I8.encode(-129).is_err());
        assert!(FixedWidthCodec::I8.decode(0x100).is_err());
    }

    #[test]
    fn little_endian_bytes() {
        let codec = FixedWidthCodec::I32;
        let mut out = Vec::new();
        codec.write_le(-2, &mut out).unwrap();
        assert_eq!(out, [0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(codec.read_le(&out).unwrap(), -2);
        assert!(codec.read_le(&out[..3]).is_err());
    }

    #[test]
    fn packed_slice() {
        let values = FixedWidthCodec::I8.read_le_slice(&[0x00, 0x7F, 0x80, 0xFF]).unwrap();
        assert_eq!(values, [0, 127, -128, -1]);
        assert!(FixedWidthCodec::I32.read_le_slice(&[0; 6]).is_err());
    }
}
