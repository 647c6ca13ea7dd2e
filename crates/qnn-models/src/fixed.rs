//! Integer arithmetic primitives of the accelerator datapath.
//!
//! ```text
//! Σ input[n]·weight[n]  →  + bias  →  >> shift  →  ReLU  →  clamp
//!   (policy width)        (policy)    (arith.)
//! ```
//!
//! Two accumulator policies are modelled because deployed bitstreams
//! disagree:
//!
//! - [`OverflowPolicy::Wrap32`]: a literal 32-bit register. Every partial
//!   sum, and the bias addition, reduces modulo 2^32.
//! - [`OverflowPolicy::SaturateVia64`]: the dot product is accumulated in
//!   64 bits, clamped to the int32 range, the bias is added and the result
//!   is clamped again.

/// Accumulator overflow behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowPolicy {
    /// Two's-complement 32-bit wraparound on every addition
    Wrap32,
    /// Exact 64-bit dot product, saturated to int32 before and after bias
    SaturateVia64,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wrap32 => write!(f, "wrap32"),
            Self::SaturateVia64 => write!(f, "saturate64"),
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wrap" | "wrap32" => Ok(Self::Wrap32),
            "saturate" | "saturate64" | "sat" => Ok(Self::SaturateVia64),
            other => Err(format!("unknown overflow policy '{other}' (wrap32|saturate64)")),
        }
    }
}

/// Post-accumulation activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Activation {
    /// Identity
    #[default]
    None,
    /// Negative values become zero
    Relu,
}

/// Inclusive output clamp range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputClamp {
    /// Lower bound
    pub min: i32,
    /// Upper bound
    pub max: i32,
}

impl OutputClamp {
    /// Range that keeps activations valid unsigned int8 inputs
    pub const INT8_ACTIVATION: Self = Self {
        min: qnn_chip::arch::ACTIVATION_CLAMP.0,
        max: qnn_chip::arch::ACTIVATION_CLAMP.1,
    };

    /// Clamp `value` into the range
    pub const fn apply(&self, value: i32) -> i32 {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

/// Saturate a 64-bit value to the int32 range
pub fn saturate_i32(value: i64) -> i32 {
    #[allow(clippy::cast_possible_truncation)]
    let clamped = value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
    clamped
}

/// Arithmetic (sign-preserving) right shift: floor division by 2^shift.
///
/// Shifts of 32 or more leave only the sign: 0 or -1.
pub const fn arithmetic_shift(value: i32, shift: u32) -> i32 {
    match value.checked_shr(shift) {
        Some(shifted) => shifted,
        None => value >> 31,
    }
}

/// Dot-product accumulator under one overflow policy.
///
/// Counts overflow events: wraparounds under `Wrap32`, value-changing clamps
/// under `SaturateVia64`.
#[derive(Debug, Clone, Copy)]
pub struct Accumulator {
    policy: OverflowPolicy,
    narrow: i32,
    wide: i64,
    overflows: u32,
}

impl Accumulator {
    /// Zeroed accumulator
    pub const fn new(policy: OverflowPolicy) -> Self {
        Self {
            policy,
            narrow: 0,
            wide: 0,
            overflows: 0,
        }
    }

    /// Add `input × weight`
    #[inline]
    pub fn mac(&mut self, input: i32, weight: i8) {
        match self.policy {
            OverflowPolicy::Wrap32 => {
                let (product, mul_overflow) = input.overflowing_mul(i32::from(weight));
                let (sum, add_overflow) = self.narrow.overflowing_add(product);
                if mul_overflow || add_overflow {
                    self.overflows += 1;
                }
                self.narrow = sum;
            }
            OverflowPolicy::SaturateVia64 => {
                self.wide = self
                    .wide
                    .saturating_add(i64::from(input) * i64::from(weight));
            }
        }
    }

    /// Add the bias and return the 32-bit register value
    pub fn finish(mut self, bias: i32) -> (i32, u32) {
        let value = match self.policy {
            OverflowPolicy::Wrap32 => {
                let (sum, overflow) = self.narrow.overflowing_add(bias);
                if overflow {
                    self.overflows += 1;
                }
                sum
            }
            OverflowPolicy::SaturateVia64 => {
                let dot = saturate_i32(self.wide);
                if i64::from(dot) != self.wide {
                    self.overflows += 1;
                }
                let with_bias = i64::from(dot) + i64::from(bias);
                let out = saturate_i32(with_bias);
                if i64::from(out) != with_bias {
                    self.overflows += 1;
                }
                out
            }
        };
        (value, self.overflows)
    }
}

/// Shift, activation and clamp stage applied to every neuron output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Requantize {
    /// Arithmetic right-shift amount
    pub shift: u32,
    /// Activation after the shift
    pub activation: Activation,
    /// Optional clamp after the activation
    pub clamp: Option<OutputClamp>,
}

impl Requantize {
    /// No shift, no activation, no clamp (raw class scores)
    pub const IDENTITY: Self = Self {
        shift: 0,
        activation: Activation::None,
        clamp: None,
    };

    /// Apply shift → activation → clamp
    pub const fn apply(&self, value: i32) -> i32 {
        let mut v = arithmetic_shift(value, self.shift);
        if matches!(self.activation, Activation::Relu) && v < 0 {
            v = 0;
        }
        if let Some(clamp) = &self.clamp {
            v = clamp.apply(v);
        }
        v
    }
}

impl Default for Requantize {
    fn default() -> Self {
        Self::IDENTITY
    }
}
