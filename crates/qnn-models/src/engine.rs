//! Reference inference engine.
//!
//! Executes a [`QuantizedModel`] layer by layer on a preprocessed int8 image.
//! Every call is a pure function of the model and the input, so the engine
//! can be cloned across threads and batches run in parallel.

use crate::error::{QnnModelError, Result};
use crate::layer::LayerType;
use crate::model::QuantizedModel;
use crate::scores::{Prediction, Scores};
use crate::tensor::Tensor;
use rayon::prelude::*;
use std::sync::Arc;

/// Final scores and prediction of one inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inference {
    /// Raw class scores
    pub scores: Scores,
    /// Argmax of `scores`
    pub prediction: Prediction,
}

/// Output of one layer during a traced inference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerTrace {
    /// Layer name
    pub name: String,
    /// Layer kind
    pub layer_type: LayerType,
    /// Layer output
    pub output: Tensor<i32>,
    /// Accumulator overflow events in this layer
    pub overflows: u64,
}

/// Every intermediate output of one inference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    /// Per-layer outputs in execution order
    pub layers: Vec<LayerTrace>,
    /// Final result
    pub inference: Inference,
}

impl Trace {
    /// Overflow events across all layers
    pub fn total_overflows(&self) -> u64 {
        self.layers.iter().map(|l| l.overflows).sum()
    }
}

/// Bit-exact software model of the accelerator
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    model: Arc<QuantizedModel>,
}

impl InferenceEngine {
    /// Engine over `model`
    pub fn new(model: impl Into<Arc<QuantizedModel>>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// Shared model
    pub fn model(&self) -> &Arc<QuantizedModel> {
        &self.model
    }

    /// Scores and prediction for one image.
    ///
    /// # Errors
    ///
    /// Returns `InputMismatch` if `pixels` does not match the model input.
    pub fn infer(&self, pixels: &[i8]) -> Result<Inference> {
        let mut x = self.input(pixels)?;
        for layer in self.model.layers() {
            x = layer.forward(&x)?.tensor;
        }
        finish(&x)
    }

    /// Like [`infer`](Self::infer) but keeps every layer output.
    ///
    /// # Errors
    ///
    /// Returns `InputMismatch` if `pixels` does not match the model input.
    pub fn trace(&self, pixels: &[i8]) -> Result<Trace> {
        let mut x = self.input(pixels)?;
        let mut layers = Vec::with_capacity(self.model.layers().len());
        for layer in self.model.layers() {
            let out = layer.forward(&x)?;
            if out.overflows > 0 {
                tracing::debug!("{}: {} overflow events", layer.name(), out.overflows);
            }
            x = out.tensor.clone();
            layers.push(LayerTrace {
                name: layer.name().to_owned(),
                layer_type: layer.layer_type(),
                output: out.tensor,
                overflows: out.overflows,
            });
        }
        Ok(Trace {
            layers,
            inference: finish(&x)?,
        })
    }

    /// Run many images in parallel; results keep input order.
    ///
    /// # Errors
    ///
    /// Returns the first error in input order.
    pub fn infer_batch<P>(&self, images: &[P]) -> Result<Vec<Inference>>
    where
        P: AsRef<[i8]> + Sync,
    {
        tracing::debug!("Reference batch of {} images", images.len());
        images.par_iter().map(|p| self.infer(p.as_ref())).collect()
    }

    fn input(&self, pixels: &[i8]) -> Result<Tensor<i32>> {
        let expected = self.model.input_len();
        if pixels.len() != expected {
            return Err(QnnModelError::InputMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        let data: Vec<i32> = pixels.iter().map(|&p| i32::from(p)).collect();
        Tensor::new(self.model.input_shape().clone(), data)
    }
}

fn finish(output: &Tensor<i32>) -> Result<Inference> {
    let scores = Scores::from_slice(output.data())?;
    Ok(Inference {
        prediction: scores.prediction(),
        scores,
    })
}
