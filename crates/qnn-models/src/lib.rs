// SPDX-License-Identifier: AGPL-3.0-only

#![deny(unsafe_code)]

//! Bit-exact fixed-point model of the digit-classifier accelerator.
//!
//! This crate reproduces the integer datapath of the synthesized networks
//! (accumulator width, overflow policy, arithmetic shifts and activation
//! clamps) so that its output can serve as the oracle for hardware
//! validation.
//!
//! # Layers
//!
//! ```text
//! QuantizedModel ── Vec<LayerSpec> ──► InferenceEngine ──► Scores / Prediction
//!        ▲                                    │
//!   BlobDir / PayloadSource                   └──► Trace (every layer output)
//!        ▲
//!   HardwareProfile (shift, policy, clamp per layer)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use qnn_models::{Architecture, InferenceEngine, QuantizedModel};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let arch = Architecture::Mlp;
//! let model = QuantizedModel::load_dir("outputs/bin", arch, &arch.default_profile())?;
//! let engine = InferenceEngine::new(model);
//!
//! let pixels = vec![0i8; 784];
//! let result = engine.infer(&pixels)?;
//! println!("prediction {} scores {}", result.prediction, result.scores);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod architecture;
pub mod codec;
mod engine;
mod error;
pub mod fixed;
pub mod fixtures;
mod layer;
pub mod mem;
mod model;
mod profile;
mod samples;
mod scores;
mod shapes;
mod tensor;

pub use architecture::{Architecture, PlanStep};
pub use codec::{FixedWidthCodec, Width};
pub use engine::{Inference, InferenceEngine, LayerTrace, Trace};
pub use error::{QnnModelError, Result};
pub use fixed::{Activation, OutputClamp, OverflowPolicy, Requantize};
pub use layer::{LayerKind, LayerOutput, LayerSpec, LayerType};
pub use model::{BlobDir, BlobSource, PayloadSource, QuantizedModel};
pub use profile::{HardwareProfile, LayerProfile};
pub use samples::{Sample, SampleSet};
pub use scores::{Prediction, Scores};
pub use shapes::Shape;
pub use tensor::Tensor;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        Architecture, HardwareProfile, Inference, InferenceEngine, OverflowPolicy, Prediction,
        QuantizedModel, Result, SampleSet, Scores,
    };
}
