//! Hardware profiles.
//!
//! A profile pins, for one deployed bitstream revision, the requantization
//! stage and accumulator policy of every trainable layer. Profiles are plain
//! immutable values handed to the model at load time; nothing reads shift
//! amounts from global state.
//!
//! The multi-layer perceptron bitstream is the one where layer accumulators
//! have been observed to disagree: its first layer wraps at 32 bits while
//! the later layers were reproduced in software with 64-bit accumulation
//! clipped to int32. The [`HardwareProfile::mlp`] preset keeps that mix;
//! [`HardwareProfile::with_uniform_policy`] lets a comparison run test the
//! alternatives against the device.

use crate::error::{QnnModelError, Result};
use crate::fixed::{Activation, OutputClamp, OverflowPolicy, Requantize};
use qnn_chip::arch::{cnn, mlp, simple_cnn};

/// Requantization and overflow settings of one trainable layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerProfile {
    /// Shift → activation → clamp
    pub requantize: Requantize,
    /// Accumulator behaviour
    pub policy: OverflowPolicy,
}

impl LayerProfile {
    /// Hidden layer: shift, ReLU, optional clamp
    pub const fn hidden(shift: u32, clamp: Option<OutputClamp>, policy: OverflowPolicy) -> Self {
        Self {
            requantize: Requantize {
                shift,
                activation: Activation::Relu,
                clamp,
            },
            policy,
        }
    }

    /// Classifier layer: raw scores
    pub const fn scores(policy: OverflowPolicy) -> Self {
        Self {
            requantize: Requantize::IDENTITY,
            policy,
        }
    }
}

impl std::fmt::Display for LayerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = &self.requantize;
        write!(f, ">>{}", r.shift)?;
        if r.activation == Activation::Relu {
            write!(f, " relu")?;
        }
        if let Some(c) = r.clamp {
            write!(f, " clamp[{},{}]", c.min, c.max)?;
        }
        write!(f, " {}", self.policy)
    }
}

/// Per-revision hardware arithmetic settings
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HardwareProfile {
    name: String,
    layers: Vec<LayerProfile>,
}

impl HardwareProfile {
    /// Profile with explicit per-trainable-layer settings
    pub fn new(name: impl Into<String>, layers: Vec<LayerProfile>) -> Self {
        Self {
            name: name.into(),
            layers,
        }
    }

    /// Linear classifier: one Dense layer, raw scores
    pub fn regression() -> Self {
        Self::new(
            "regression-wrap32",
            vec![LayerProfile::scores(OverflowPolicy::Wrap32)],
        )
    }

    /// Two-hidden-layer perceptron
    pub fn mlp() -> Self {
        Self::new(
            "mlp-mixed",
            vec![
                LayerProfile::hidden(mlp::SHIFT1, None, OverflowPolicy::Wrap32),
                LayerProfile::hidden(mlp::SHIFT2, None, OverflowPolicy::SaturateVia64),
                LayerProfile::scores(OverflowPolicy::SaturateVia64),
            ],
        )
    }

    /// Two conv blocks then Dense
    pub fn cnn() -> Self {
        let clamp = Some(OutputClamp::INT8_ACTIVATION);
        Self::new(
            "cnn-wrap32",
            vec![
                LayerProfile::hidden(cnn::SHIFT_CONV, clamp, OverflowPolicy::Wrap32),
                LayerProfile::hidden(cnn::SHIFT_CONV, clamp, OverflowPolicy::Wrap32),
                LayerProfile::scores(OverflowPolicy::Wrap32),
            ],
        )
    }

    /// One conv layer then Dense
    pub fn simple_cnn() -> Self {
        Self::new(
            "simple-cnn-wrap32",
            vec![
                LayerProfile::hidden(
                    simple_cnn::SHIFT_CONV,
                    Some(OutputClamp::INT8_ACTIVATION),
                    OverflowPolicy::Wrap32,
                ),
                LayerProfile::scores(OverflowPolicy::Wrap32),
            ],
        )
    }

    /// Profile name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings in trainable-layer order
    pub fn layers(&self) -> &[LayerProfile] {
        &self.layers
    }

    /// Settings of trainable layer `index`
    pub fn layer(&self, index: usize) -> Option<&LayerProfile> {
        self.layers.get(index)
    }

    /// Override the policy of one trainable layer.
    ///
    /// # Errors
    ///
    /// Returns a config error if `index` is out of range.
    pub fn with_policy(mut self, index: usize, policy: OverflowPolicy) -> Result<Self> {
        let count = self.layers.len();
        let layer = self.layers.get_mut(index).ok_or_else(|| {
            QnnModelError::config(format!(
                "profile {} has {count} trainable layers, no layer {index}",
                self.name
            ))
        })?;
        layer.policy = policy;
        self.name = format!("{}+L{}:{policy}", self.name, index + 1);
        Ok(self)
    }

    /// Override the policy of every trainable layer
    #[must_use]
    pub fn with_uniform_policy(mut self, policy: OverflowPolicy) -> Self {
        for layer in &mut self.layers {
            layer.policy = policy;
        }
        self.name = format!("{}+all:{policy}", self.name);
        self
    }

    /// Override the shift of every hidden (shifting) layer.
    ///
    /// # Errors
    ///
    /// Returns a config error if `shift` does not fit a 32-bit accumulator.
    pub fn with_hidden_shift(mut self, shift: u32) -> Result<Self> {
        if shift >= 32 {
            return Err(QnnModelError::config(format!(
                "shift {shift} exceeds the 32-bit accumulator"
            )));
        }
        for layer in &mut self.layers {
            if layer.requantize.activation == Activation::Relu {
                layer.requantize.shift = shift;
            }
        }
        self.name = format!("{}+shift{shift}", self.name);
        Ok(self)
    }
}

impl std::fmt::Display for HardwareProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [", self.name)?;
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "L{}: {layer}", i + 1)?;
        }
        write!(f, "]")
    }
}
