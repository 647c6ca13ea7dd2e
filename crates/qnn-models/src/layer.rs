//! Fixed-point layer interpreter.
//!
//! One tagged variant per layer kind, all executed by [`LayerSpec::forward`].
//! Weight layouts are the ones the device reads from its weight memory:
//!
//! | Kind | Weights | Biases |
//! |------|---------|--------|
//! | Dense | `(outputs, inputs)` | `(outputs)` |
//! | Conv2D | `(c_out, c_in, kh, kw)` | `(c_out)` |
//! | MaxPool | none | none |
//!
//! Dense layers consume their input flattened in `(C, H, W)` row-major
//! order, so a Dense layer following a convolution reads channel 0's feature
//! map first.

use crate::codec::FixedWidthCodec;
use crate::error::{QnnModelError, Result};
use crate::fixed::{Accumulator, OverflowPolicy, Requantize};
use crate::shapes::Shape;
use crate::tensor::Tensor;

/// Layer kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    /// Fully connected
    Dense,
    /// 2-D convolution, stride 1, no padding
    Conv2D,
    /// 2×2 max pooling, stride 2
    MaxPool,
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dense => write!(f, "Dense"),
            Self::Conv2D => write!(f, "Conv2D"),
            Self::MaxPool => write!(f, "MaxPool"),
        }
    }
}

/// Layer parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerKind {
    /// Fully connected layer
    Dense {
        /// `(outputs, inputs)` int8 weights
        weights: Tensor<i8>,
        /// `(outputs)` int32 biases
        biases: Tensor<i32>,
    },
    /// Convolution layer
    Conv2D {
        /// `(c_out, c_in, kh, kw)` int8 kernels
        weights: Tensor<i8>,
        /// `(c_out)` int32 biases
        biases: Tensor<i32>,
    },
    /// Max pooling layer
    MaxPool,
}

impl LayerKind {
    /// Kind tag
    pub const fn layer_type(&self) -> LayerType {
        match self {
            Self::Dense { .. } => LayerType::Dense,
            Self::Conv2D { .. } => LayerType::Conv2D,
            Self::MaxPool => LayerType::MaxPool,
        }
    }
}

/// Output of one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOutput {
    /// Activations after shift/activation/clamp
    pub tensor: Tensor<i32>,
    /// Accumulator overflow events seen while computing `tensor`
    pub overflows: u64,
}

/// One layer: parameters plus its requantization stage and overflow policy.
///
/// Built only through [`dense`](Self::dense), [`conv2d`](Self::conv2d) and
/// [`max_pool`](Self::max_pool), so every instance has checked shapes and a
/// shift below 32.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSpec {
    name: String,
    kind: LayerKind,
    requantize: Requantize,
    policy: OverflowPolicy,
}

impl LayerSpec {
    /// Dense layer with `(outputs, inputs)` weights.
    ///
    /// # Errors
    ///
    /// Returns a config error if the weights are not rank 2, the bias count
    /// differs from the output count or the shift is out of range.
    pub fn dense(
        name: impl Into<String>,
        weights: Tensor<i8>,
        biases: Tensor<i32>,
        requantize: Requantize,
        policy: OverflowPolicy,
    ) -> Result<Self> {
        let name = name.into();
        let outputs = match weights.shape().dims.as_slice() {
            &[outputs, _] => outputs,
            _ => {
                return Err(QnnModelError::config(format!(
                    "{name}: dense weights must be (outputs, inputs), got {}",
                    weights.shape()
                )))
            }
        };
        if biases.len() != outputs {
            return Err(QnnModelError::shape_mismatch(
                format!("{name} biases"),
                outputs,
                biases.len(),
            ));
        }
        Self::checked(name, LayerKind::Dense { weights, biases }, requantize, policy)
    }

    /// Convolution layer with `(c_out, c_in, kh, kw)` kernels.
    ///
    /// # Errors
    ///
    /// Returns a config error if the kernels are not rank 4, the bias count
    /// differs from `c_out` or the shift is out of range.
    pub fn conv2d(
        name: impl Into<String>,
        weights: Tensor<i8>,
        biases: Tensor<i32>,
        requantize: Requantize,
        policy: OverflowPolicy,
    ) -> Result<Self> {
        let name = name.into();
        let c_out = match weights.shape().dims.as_slice() {
            &[c_out, _, _, _] => c_out,
            _ => {
                return Err(QnnModelError::config(format!(
                    "{name}: conv kernels must be (c_out, c_in, kh, kw), got {}",
                    weights.shape()
                )))
            }
        };
        if biases.len() != c_out {
            return Err(QnnModelError::shape_mismatch(
                format!("{name} biases"),
                c_out,
                biases.len(),
            ));
        }
        Self::checked(name, LayerKind::Conv2D { weights, biases }, requantize, policy)
    }

    /// 2×2 stride-2 max pooling layer
    pub fn max_pool(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::MaxPool,
            requantize: Requantize::IDENTITY,
            policy: OverflowPolicy::Wrap32,
        }
    }

    fn checked(
        name: String,
        kind: LayerKind,
        requantize: Requantize,
        policy: OverflowPolicy,
    ) -> Result<Self> {
        if requantize.shift >= 32 {
            return Err(QnnModelError::config(format!(
                "{name}: shift {} exceeds the 32-bit accumulator",
                requantize.shift
            )));
        }
        Ok(Self {
            name,
            kind,
            requantize,
            policy,
        })
    }

    /// Layer name (blob stem prefix, e.g. `conv1`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters
    pub const fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Shift → activation → clamp
    pub const fn requantize(&self) -> &Requantize {
        &self.requantize
    }

    /// Accumulator behaviour
    pub const fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Kind tag
    pub const fn layer_type(&self) -> LayerType {
        self.kind.layer_type()
    }

    /// True for layers that carry weights
    pub const fn is_trainable(&self) -> bool {
        !matches!(self.kind, LayerKind::MaxPool)
    }

    /// Weight and bias element count
    pub fn parameter_count(&self) -> usize {
        match &self.kind {
            LayerKind::Dense { weights, biases } | LayerKind::Conv2D { weights, biases } => {
                weights.len() + biases.len()
            }
            LayerKind::MaxPool => 0,
        }
    }

    /// Shape produced from an input of shape `input`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` or a config error if `input` cannot feed this
    /// layer.
    pub fn output_shape(&self, input: &Shape) -> Result<Shape> {
        match &self.kind {
            LayerKind::Dense { weights, .. } => {
                let (outputs, inputs) = match weights.shape().dims.as_slice() {
                    &[outputs, inputs] => (outputs, inputs),
                    _ => return Err(self.bad_weights(weights)),
                };
                if input.total_elements() != inputs {
                    return Err(QnnModelError::shape_mismatch(
                        format!("{} input {input}", self.name),
                        inputs,
                        input.total_elements(),
                    ));
                }
                Ok(Shape::vector(outputs))
            }
            LayerKind::Conv2D { weights, .. } => {
                let (c_out, c_in, kh, kw) = match weights.shape().dims.as_slice() {
                    &[c_out, c_in, kh, kw] => (c_out, c_in, kh, kw),
                    _ => return Err(self.bad_weights(weights)),
                };
                let (c, h, w) = input.as_volume()?;
                if c != c_in {
                    return Err(QnnModelError::shape_mismatch(
                        format!("{} input channels", self.name),
                        c_in,
                        c,
                    ));
                }
                if h < kh || w < kw {
                    return Err(QnnModelError::config(format!(
                        "{}: {kh}x{kw} kernel does not fit input {input}",
                        self.name
                    )));
                }
                Ok(Shape::volume(c_out, h - kh + 1, w - kw + 1))
            }
            LayerKind::MaxPool => {
                let (c, h, w) = input.as_volume()?;
                Ok(Shape::volume(c, h / 2, w / 2))
            }
        }
    }

    fn bad_weights(&self, weights: &Tensor<i8>) -> QnnModelError {
        QnnModelError::config(format!(
            "{}: {} weights have shape {}",
            self.name,
            self.layer_type(),
            weights.shape()
        ))
    }

    /// Run the layer.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`output_shape`](Self::output_shape).
    pub fn forward(&self, input: &Tensor<i32>) -> Result<LayerOutput> {
        let out_shape = self.output_shape(input.shape())?;
        let (data, overflows) = match &self.kind {
            LayerKind::Dense { weights, biases } => self.dense_forward(input, weights, biases),
            LayerKind::Conv2D { weights, biases } => {
                self.conv_forward(input, weights, biases, &out_shape)?
            }
            LayerKind::MaxPool => (max_pool(input, &out_shape)?, 0),
        };
        Ok(LayerOutput {
            tensor: Tensor::new(out_shape, data)?,
            overflows,
        })
    }

    fn dense_forward(
        &self,
        input: &Tensor<i32>,
        weights: &Tensor<i8>,
        biases: &Tensor<i32>,
    ) -> (Vec<i32>, u64) {
        let mut overflows = 0u64;
        let out = biases
            .data()
            .iter()
            .enumerate()
            .map(|(m, &bias)| {
                let mut acc = Accumulator::new(self.policy);
                for (&x, &w) in input.data().iter().zip(weights.row(m)) {
                    acc.mac(x, w);
                }
                let (value, events) = acc.finish(bias);
                overflows += u64::from(events);
                self.requantize.apply(value)
            })
            .collect();
        (out, overflows)
    }

    fn conv_forward(
        &self,
        input: &Tensor<i32>,
        weights: &Tensor<i8>,
        biases: &Tensor<i32>,
        out_shape: &Shape,
    ) -> Result<(Vec<i32>, u64)> {
        let (c_in, h, w) = input.shape().as_volume()?;
        let (c_out, out_h, out_w) = out_shape.as_volume()?;
        // valid convolution: out = in - k + 1
        let (kh, kw) = (h + 1 - out_h, w + 1 - out_w);
        let x = input.data();
        let k = weights.data();

        let mut out = Vec::with_capacity(c_out * out_h * out_w);
        let mut overflows = 0u64;
        for (co, &bias) in biases.data().iter().enumerate() {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = Accumulator::new(self.policy);
                    for ci in 0..c_in {
                        for ky in 0..kh {
                            let row = (ci * h + oy + ky) * w + ox;
                            let krow = ((co * c_in + ci) * kh + ky) * kw;
                            for kx in 0..kw {
                                acc.mac(x[row + kx], k[krow + kx]);
                            }
                        }
                    }
                    let (value, events) = acc.finish(bias);
                    overflows += u64::from(events);
                    out.push(self.requantize.apply(value));
                }
            }
        }
        Ok((out, overflows))
    }

    /// Append this layer's weight-memory image: int8 weights, then int32 LE
    /// biases. Max pooling contributes nothing.
    ///
    /// # Errors
    ///
    /// Never fails for a layer built through the constructors; the codec
    /// range checks are kept for tensors built by hand.
    pub fn write_payload(&self, out: &mut Vec<u8>) -> Result<()> {
        if let LayerKind::Dense { weights, biases } | LayerKind::Conv2D { weights, biases } =
            &self.kind
        {
            for &w in weights.data() {
                FixedWidthCodec::I8.write_le(i32::from(w), out)?;
            }
            for &b in biases.data() {
                FixedWidthCodec::I32.write_le(b, out)?;
            }
        }
        Ok(())
    }
}

fn max_pool(input: &Tensor<i32>, out_shape: &Shape) -> Result<Vec<i32>> {
    let (_, h, w) = input.shape().as_volume()?;
    let (c, out_h, out_w) = out_shape.as_volume()?;
    let x = input.data();
    let mut out = Vec::with_capacity(c * out_h * out_w);
    for ch in 0..c {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let top = (ch * h + 2 * oy) * w + 2 * ox;
                let bottom = top + w;
                let max = x[top].max(x[top + 1]).max(x[bottom]).max(x[bottom + 1]);
                out.push(max);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{Activation, OutputClamp};

    fn relu_clamped(shift: u32) -> Requantize {
        Requantize {
            shift,
            activation: Activation::Relu,
            clamp: Some(OutputClamp::INT8_ACTIVATION),
        }
    }

    #[test]
    fn dense_scores_with_zero_weights_are_biases() {
        let weights = Tensor::new(Shape::new(vec![10, 1]), vec![0i8; 10]).unwrap();
        let biases = Tensor::from_vec(vec![5, 3, 3, 1, 1, 1, 1, 1, 1, 1]);
        let layer = LayerSpec::dense(
            "fc",
            weights,
            biases,
            Requantize::IDENTITY,
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        let out = layer.forward(&Tensor::from_vec(vec![42])).unwrap();
        assert_eq!(out.tensor.data(), &[5, 3, 3, 1, 1, 1, 1, 1, 1, 1]);
        assert_eq!(out.overflows, 0);
    }

    #[test]
    fn dense_shift_relu() {
        // row 0: 2*100 + 3*(-50) + 0 = 50 >> 1 = 25
        // row 1: -(2*100) - 10 = -210 >> 1 = -105 → ReLU 0
        let weights = Tensor::new(Shape::new(vec![2, 2]), vec![100i8, -50, -100, 0]).unwrap();
        let biases = Tensor::from_vec(vec![0, -10]);
        let stage = Requantize {
            shift: 1,
            activation: Activation::Relu,
            clamp: None,
        };
        let layer =
            LayerSpec::dense("fc", weights, biases, stage, OverflowPolicy::Wrap32).unwrap();
        let out = layer.forward(&Tensor::from_vec(vec![2, 3])).unwrap();
        assert_eq!(out.tensor.data(), &[25, 0]);
    }

    #[test]
    fn dense_wrap_vs_saturate_diverge() {
        let weights = Tensor::new(Shape::new(vec![1, 2]), vec![1i8, 1]).unwrap();
        let input = Tensor::from_vec(vec![i32::MAX, 1]);
        let wrap = LayerSpec::dense(
            "fc",
            weights.clone(),
            Tensor::from_vec(vec![0]),
            Requantize::IDENTITY,
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        let sat = LayerSpec::dense(
            "fc",
            weights,
            Tensor::from_vec(vec![0]),
            Requantize::IDENTITY,
            OverflowPolicy::SaturateVia64,
        )
        .unwrap();
        assert_eq!(wrap.forward(&input).unwrap().tensor.data(), &[i32::MIN]);
        let out = sat.forward(&input).unwrap();
        assert_eq!(out.tensor.data(), &[i32::MAX]);
        assert_eq!(out.overflows, 1);
    }

    #[test]
    fn dense_rejects_bad_bias_count() {
        let weights = Tensor::new(Shape::new(vec![2, 2]), vec![0i8; 4]).unwrap();
        let err = LayerSpec::dense(
            "fc",
            weights,
            Tensor::from_vec(vec![0; 3]),
            Requantize::IDENTITY,
            OverflowPolicy::Wrap32,
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn dense_rejects_wrong_input_length() {
        let weights = Tensor::new(Shape::new(vec![1, 4]), vec![0i8; 4]).unwrap();
        let layer = LayerSpec::dense(
            "fc",
            weights,
            Tensor::from_vec(vec![0]),
            Requantize::IDENTITY,
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        assert!(layer.forward(&Tensor::from_vec(vec![1, 2, 3])).is_err());
    }

    #[test]
    fn rejects_oversized_shift() {
        let weights = Tensor::new(Shape::new(vec![1, 1]), vec![0i8]).unwrap();
        let stage = Requantize {
            shift: 32,
            ..Requantize::IDENTITY
        };
        assert!(LayerSpec::dense(
            "fc",
            weights,
            Tensor::from_vec(vec![0]),
            stage,
            OverflowPolicy::Wrap32
        )
        .is_err());
    }

    #[test]
    fn conv_single_channel_3x3() {
        // 4x4 input 0..16, all-ones kernel: each output is a 3x3 window sum
        let input = Tensor::new(Shape::volume(1, 4, 4), (0..16).collect::<Vec<i32>>()).unwrap();
        let weights = Tensor::new(Shape::new(vec![1, 1, 3, 3]), vec![1i8; 9]).unwrap();
        let layer = LayerSpec::conv2d(
            "conv",
            weights,
            Tensor::from_vec(vec![0]),
            relu_clamped(0),
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.tensor.shape(), &Shape::volume(1, 2, 2));
        // windows: 45, 54, 81, 90 → clamp 127 not reached
        assert_eq!(out.tensor.data(), &[45, 54, 81, 90]);
    }

    #[test]
    fn conv_sums_across_input_channels() {
        // two 3x3 channels of ones and twos, kernel picks centre of each
        let mut data = vec![1i32; 9];
        data.extend(vec![2i32; 9]);
        let input = Tensor::new(Shape::volume(2, 3, 3), data).unwrap();
        let mut kernel = vec![0i8; 18];
        kernel[4] = 10;
        kernel[13] = 20;
        let weights = Tensor::new(Shape::new(vec![1, 2, 3, 3]), kernel).unwrap();
        let layer = LayerSpec::conv2d(
            "conv",
            weights,
            Tensor::from_vec(vec![6]),
            relu_clamped(1),
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        // (10 + 40 + 6) >> 1 = 28
        assert_eq!(layer.forward(&input).unwrap().tensor.data(), &[28]);
    }

    #[test]
    fn conv_output_channels_are_outermost() {
        let input = Tensor::new(Shape::volume(1, 3, 3), vec![1i32; 9]).unwrap();
        let weights = Tensor::new(Shape::new(vec![2, 1, 2, 2]), vec![1i8; 8]).unwrap();
        let layer = LayerSpec::conv2d(
            "conv",
            weights,
            Tensor::from_vec(vec![0, 100]),
            relu_clamped(0),
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.tensor.shape(), &Shape::volume(2, 2, 2));
        assert_eq!(out.tensor.data(), &[4, 4, 4, 4, 104, 104, 104, 104]);
    }

    #[test]
    fn conv_clamps_to_int8_activation() {
        let input = Tensor::new(Shape::volume(1, 1, 1), vec![127]).unwrap();
        let weights = Tensor::new(Shape::new(vec![2, 1, 1, 1]), vec![127i8, -127]).unwrap();
        let layer = LayerSpec::conv2d(
            "conv",
            weights,
            Tensor::from_vec(vec![0, 0]),
            relu_clamped(0),
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        assert_eq!(layer.forward(&input).unwrap().tensor.data(), &[127, 0]);
    }

    #[test]
    fn max_pool_floors_odd_dimensions() {
        let input = Tensor::new(Shape::volume(1, 5, 5), (0..25).collect::<Vec<i32>>()).unwrap();
        let layer = LayerSpec::max_pool("pool");
        let out = layer.forward(&input).unwrap();
        assert_eq!(out.tensor.shape(), &Shape::volume(1, 2, 2));
        assert_eq!(out.tensor.data(), &[6, 8, 16, 18]);
        assert_eq!(out.overflows, 0);
    }

    #[test]
    fn malformed_weights_are_errors() {
        // bypasses the constructors, which would reject these shapes
        let dense = LayerSpec {
            name: "fc".into(),
            kind: LayerKind::Dense {
                weights: Tensor::from_vec(vec![1i8, 2]),
                biases: Tensor::from_vec(vec![0]),
            },
            requantize: Requantize::IDENTITY,
            policy: OverflowPolicy::Wrap32,
        };
        let err = dense.forward(&Tensor::from_vec(vec![1, 1])).unwrap_err();
        assert!(err.is_config());

        let conv = LayerSpec {
            name: "conv".into(),
            kind: LayerKind::Conv2D {
                weights: Tensor::new(Shape::new(vec![1, 1, 2]), vec![1i8; 2]).unwrap(),
                biases: Tensor::from_vec(vec![0]),
            },
            ..dense
        };
        let input = Tensor::new(Shape::volume(1, 2, 2), vec![1i32; 4]).unwrap();
        assert!(conv.forward(&input).unwrap_err().is_config());
    }

    #[test]
    fn accessors_expose_checked_settings() {
        let weights = Tensor::new(Shape::new(vec![1, 1]), vec![3i8]).unwrap();
        let layer = LayerSpec::dense(
            "fc1",
            weights,
            Tensor::from_vec(vec![0]),
            relu_clamped(4),
            OverflowPolicy::SaturateVia64,
        )
        .unwrap();
        assert_eq!(layer.name(), "fc1");
        assert_eq!(layer.requantize().shift, 4);
        assert_eq!(layer.policy(), OverflowPolicy::SaturateVia64);
        assert!(matches!(layer.kind(), LayerKind::Dense { .. }));
    }

    #[test]
    fn max_pool_of_single_row_is_empty() {
        let input = Tensor::new(Shape::volume(2, 1, 3), vec![1i32; 6]).unwrap();
        let out = LayerSpec::max_pool("pool").forward(&input).unwrap();
        assert_eq!(out.tensor.shape(), &Shape::volume(2, 0, 1));
        assert!(out.tensor.is_empty());
    }

    #[test]
    fn max_pool_keeps_negative_values() {
        let input = Tensor::new(Shape::volume(1, 2, 2), vec![-5, -3, -9, -4]).unwrap();
        let out = LayerSpec::max_pool("pool").forward(&input).unwrap();
        assert_eq!(out.tensor.data(), &[-3]);
    }

    #[test]
    fn payload_is_weights_then_le_biases() {
        let weights = Tensor::new(Shape::new(vec![2, 1]), vec![-1i8, 2]).unwrap();
        let layer = LayerSpec::dense(
            "fc",
            weights,
            Tensor::from_vec(vec![1, -2]),
            Requantize::IDENTITY,
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        let mut out = Vec::new();
        layer.write_payload(&mut out).unwrap();
        assert_eq!(out, [0xFF, 0x02, 1, 0, 0, 0, 0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(layer.parameter_count(), 4);
    }
}
