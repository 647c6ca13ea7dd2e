//! Architecture presets.
//!
//! Every synthesized network is described as an ordered layer plan that the
//! generic interpreter executes. The plan fixes tensor shapes, the blob
//! stems the weights are loaded from and the order of the weight upload
//! payload.
//!
//! | Preset | Input | Plan | Blob stems |
//! |--------|-------|------|-----------|
//! | `regression` | 784 | Dense 784→10 | `W`, `B` |
//! | `mlp` | 784 | Dense 784→16→16→10 | `L{1,2,3}_{weights,biases}` |
//! | `simple-cnn` | 1×28×28 | Conv 4@3×3, Dense 2704→10 | `conv_*`, `dense_*` |
//! | `cnn` | 1×28×28 | Conv 16@3×3, Pool, Conv 32@3×3, Pool, Dense 800→10 | `conv1_*`, `conv2_*`, `dense_*` |

use crate::profile::HardwareProfile;
use crate::shapes::Shape;
use qnn_chip::arch::{cnn, mlp, regression, simple_cnn};
use qnn_chip::protocol::{IMAGE_PIXELS, IMAGE_SIDE, NUM_CLASSES};

/// Supported network presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// Linear softmax-regression classifier
    Regression,
    /// 784-16-16-10 perceptron
    Mlp,
    /// Single convolution then dense
    SimpleCnn,
    /// Two conv+pool blocks then dense
    Cnn,
}

/// One step of an architecture's layer plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    /// Fully connected layer
    Dense {
        /// Layer name
        name: &'static str,
        /// Weight blob stem
        weights: &'static str,
        /// Bias blob stem
        biases: &'static str,
        /// Output neurons
        outputs: usize,
        /// Input values
        inputs: usize,
    },
    /// Convolution layer
    Conv {
        /// Layer name
        name: &'static str,
        /// Weight blob stem
        weights: &'static str,
        /// Bias blob stem
        biases: &'static str,
        /// Output channels
        filters: usize,
        /// Input channels
        channels: usize,
        /// Square kernel side
        kernel: usize,
    },
    /// 2×2 max pooling
    MaxPool {
        /// Layer name
        name: &'static str,
    },
}

impl PlanStep {
    /// Layer name
    pub const fn name(&self) -> &'static str {
        match *self {
            Self::Dense { name, .. } | Self::Conv { name, .. } | Self::MaxPool { name } => name,
        }
    }

    /// Declared weight tensor shape, `None` for pooling
    pub fn weight_shape(&self) -> Option<Shape> {
        match *self {
            Self::Dense {
                outputs, inputs, ..
            } => Some(Shape::new(vec![outputs, inputs])),
            Self::Conv {
                filters,
                channels,
                kernel,
                ..
            } => Some(Shape::new(vec![filters, channels, kernel, kernel])),
            Self::MaxPool { .. } => None,
        }
    }

    /// Declared bias count, 0 for pooling
    pub const fn bias_len(&self) -> usize {
        match *self {
            Self::Dense { outputs, .. } => outputs,
            Self::Conv { filters, .. } => filters,
            Self::MaxPool { .. } => 0,
        }
    }

    /// Weight and bias blob stems, `None` for pooling
    pub const fn stems(&self) -> Option<(&'static str, &'static str)> {
        match *self {
            Self::Dense {
                weights, biases, ..
            }
            | Self::Conv {
                weights, biases, ..
            } => Some((weights, biases)),
            Self::MaxPool { .. } => None,
        }
    }
}

impl Architecture {
    /// All presets
    pub const ALL: [Self; 4] = [Self::Regression, Self::Mlp, Self::SimpleCnn, Self::Cnn];

    /// Preset name as accepted on the command line
    pub const fn name(self) -> &'static str {
        match self {
            Self::Regression => "regression",
            Self::Mlp => "mlp",
            Self::SimpleCnn => "simple-cnn",
            Self::Cnn => "cnn",
        }
    }

    /// Shape of the preprocessed image the first layer consumes
    pub fn input_shape(self) -> Shape {
        match self {
            Self::Regression | Self::Mlp => Shape::vector(IMAGE_PIXELS),
            Self::SimpleCnn | Self::Cnn => Shape::volume(1, IMAGE_SIDE, IMAGE_SIDE),
        }
    }

    /// Default hardware profile for this preset
    pub fn default_profile(self) -> HardwareProfile {
        match self {
            Self::Regression => HardwareProfile::regression(),
            Self::Mlp => HardwareProfile::mlp(),
            Self::SimpleCnn => HardwareProfile::simple_cnn(),
            Self::Cnn => HardwareProfile::cnn(),
        }
    }

    /// Ordered layer plan
    pub fn plan(self) -> Vec<PlanStep> {
        match self {
            Self::Regression => vec![PlanStep::Dense {
                name: "linear",
                weights: "W",
                biases: "B",
                outputs: regression::OUTPUTS,
                inputs: regression::INPUTS,
            }],
            Self::Mlp => vec![
                PlanStep::Dense {
                    name: "L1",
                    weights: "L1_weights",
                    biases: "L1_biases",
                    outputs: mlp::HIDDEN,
                    inputs: mlp::INPUTS,
                },
                PlanStep::Dense {
                    name: "L2",
                    weights: "L2_weights",
                    biases: "L2_biases",
                    outputs: mlp::HIDDEN,
                    inputs: mlp::HIDDEN,
                },
                PlanStep::Dense {
                    name: "L3",
                    weights: "L3_weights",
                    biases: "L3_biases",
                    outputs: mlp::OUTPUTS,
                    inputs: mlp::HIDDEN,
                },
            ],
            Self::SimpleCnn => vec![
                PlanStep::Conv {
                    name: "conv",
                    weights: "conv_weights",
                    biases: "conv_biases",
                    filters: simple_cnn::FILTERS,
                    channels: 1,
                    kernel: simple_cnn::KERNEL,
                },
                PlanStep::Dense {
                    name: "dense",
                    weights: "dense_weights",
                    biases: "dense_biases",
                    outputs: NUM_CLASSES,
                    inputs: simple_cnn::DENSE_INPUTS,
                },
            ],
            Self::Cnn => vec![
                PlanStep::Conv {
                    name: "conv1",
                    weights: "conv1_weights",
                    biases: "conv1_biases",
                    filters: cnn::CONV1_FILTERS,
                    channels: 1,
                    kernel: cnn::KERNEL,
                },
                PlanStep::MaxPool { name: "pool1" },
                PlanStep::Conv {
                    name: "conv2",
                    weights: "conv2_weights",
                    biases: "conv2_biases",
                    filters: cnn::CONV2_FILTERS,
                    channels: cnn::CONV1_FILTERS,
                    kernel: cnn::KERNEL,
                },
                PlanStep::MaxPool { name: "pool2" },
                PlanStep::Dense {
                    name: "dense",
                    weights: "dense_weights",
                    biases: "dense_biases",
                    outputs: NUM_CLASSES,
                    inputs: cnn::DENSE_INPUTS,
                },
            ],
        }
    }

    /// Number of layers carrying weights (entries in a hardware profile)
    pub fn trainable_layers(self) -> usize {
        self.plan().iter().filter(|s| s.stems().is_some()).count()
    }

    /// Total weight-upload payload size in bytes
    pub fn payload_len(self) -> usize {
        self.plan()
            .iter()
            .map(|s| s.weight_shape().map_or(0, |w| w.total_elements()) + 4 * s.bias_len())
            .sum()
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "regression" | "softmax" | "linear" => Ok(Self::Regression),
            "mlp" | "2-hidden" => Ok(Self::Mlp),
            "simple-cnn" | "simplecnn" => Ok(Self::SimpleCnn),
            "cnn" => Ok(Self::Cnn),
            other => Err(format!(
                "unknown architecture '{other}' (regression|mlp|simple-cnn|cnn)"
            )),
        }
    }
}
