//! Quantized model representation and loading

use crate::architecture::{Architecture, PlanStep};
use crate::codec::{FixedWidthCodec, Width};
use crate::error::{QnnModelError, Result};
use crate::layer::LayerSpec;
use crate::mem;
use crate::profile::HardwareProfile;
use crate::shapes::Shape;
use crate::tensor::Tensor;
use bytes::{Buf, Bytes};
use qnn_chip::protocol::NUM_CLASSES;
use std::path::{Path, PathBuf};

/// Supplier of per-layer weight and bias arrays
pub trait BlobSource {
    /// Read `expected` int8 weights for blob `stem`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the blob is missing or has another length.
    fn weights(&mut self, stem: &str, expected: usize) -> Result<Vec<i8>>;

    /// Read `expected` int32 biases for blob `stem`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the blob is missing or has another length.
    fn biases(&mut self, stem: &str, expected: usize) -> Result<Vec<i32>>;
}

/// Blobs stored as files in one directory.
///
/// `<stem>.bin` (raw little-endian) is preferred; `<stem>.mem` (hex text) is
/// the fallback.
#[derive(Debug, Clone)]
pub struct BlobDir {
    root: PathBuf,
}

impl BlobDir {
    /// Blob directory at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, stem: &str, width: Width, expected: usize) -> Result<Vec<i32>> {
        let bin = self.root.join(format!("{stem}.bin"));
        let text = self.root.join(format!("{stem}.mem"));
        let values = if bin.exists() {
            let bytes = std::fs::read(&bin)?;
            tracing::debug!("Blob {stem}: {} ({} bytes)", bin.display(), bytes.len());
            FixedWidthCodec::new(width).read_le_slice(&bytes)?
        } else if text.exists() {
            tracing::debug!("Blob {stem}: {}", text.display());
            mem::read_mem(&text, width)?
        } else {
            return Err(QnnModelError::FileNotFound { path: bin });
        };
        if values.len() != expected {
            return Err(QnnModelError::shape_mismatch(
                format!("blob {stem}"),
                expected,
                values.len(),
            ));
        }
        Ok(values)
    }
}

impl BlobSource for BlobDir {
    fn weights(&mut self, stem: &str, expected: usize) -> Result<Vec<i8>> {
        narrow_weights(stem, self.read(stem, Width::W8, expected)?)
    }

    fn biases(&mut self, stem: &str, expected: usize) -> Result<Vec<i32>> {
        self.read(stem, Width::W32, expected)
    }
}

fn narrow_weights(stem: &str, values: Vec<i32>) -> Result<Vec<i8>> {
    values
        .into_iter()
        .map(|v| {
            i8::try_from(v).map_err(|_| {
                QnnModelError::config(format!("blob {stem}: weight {v} outside int8"))
            })
        })
        .collect()
}

/// Blobs read in order from a weight-upload payload
#[derive(Debug, Clone)]
pub struct PayloadSource {
    payload: Bytes,
}

impl PayloadSource {
    /// Reader over `payload`
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    fn take(&mut self, stem: &str, len: usize) -> Result<Bytes> {
        if self.payload.remaining() < len {
            return Err(QnnModelError::shape_mismatch(
                format!("payload section {stem}"),
                len,
                self.payload.remaining(),
            ));
        }
        Ok(self.payload.split_to(len))
    }
}

impl BlobSource for PayloadSource {
    fn weights(&mut self, stem: &str, expected: usize) -> Result<Vec<i8>> {
        let mut section = self.take(stem, expected)?;
        Ok((0..expected).map(|_| section.get_i8()).collect())
    }

    fn biases(&mut self, stem: &str, expected: usize) -> Result<Vec<i32>> {
        let mut section = self.take(stem, expected * 4)?;
        Ok((0..expected).map(|_| section.get_i32_le()).collect())
    }
}

/// Ordered layers for one architecture, immutable after load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedModel {
    architecture: Option<Architecture>,
    profile_name: String,
    input_shape: Shape,
    layers: Vec<LayerSpec>,
}

impl QuantizedModel {
    /// Assemble a model from explicit layers.
    ///
    /// # Errors
    ///
    /// Returns a config error if the layers do not chain from `input_shape`
    /// or the final output is not ten class scores.
    pub fn new(
        profile_name: impl Into<String>,
        input_shape: Shape,
        layers: Vec<LayerSpec>,
    ) -> Result<Self> {
        if layers.is_empty() {
            return Err(QnnModelError::config("model has no layers"));
        }
        let mut shape = input_shape.clone();
        for layer in &layers {
            shape = layer.output_shape(&shape)?;
        }
        if shape.total_elements() != NUM_CLASSES {
            return Err(QnnModelError::shape_mismatch(
                "model output",
                NUM_CLASSES,
                shape.total_elements(),
            ));
        }
        Ok(Self {
            architecture: None,
            profile_name: profile_name.into(),
            input_shape,
            layers,
        })
    }

    /// Load `architecture` from any blob source under `profile`.
    ///
    /// # Errors
    ///
    /// Returns a config error if a blob is missing or mis-sized, or if the
    /// profile does not have one entry per trainable layer.
    pub fn from_blobs(
        architecture: Architecture,
        profile: &HardwareProfile,
        source: &mut impl BlobSource,
    ) -> Result<Self> {
        if profile.layers().len() != architecture.trainable_layers() {
            return Err(QnnModelError::config(format!(
                "profile {} has {} layer entries, {architecture} needs {}",
                profile.name(),
                profile.layers().len(),
                architecture.trainable_layers()
            )));
        }

        let mut trainable = profile.layers().iter();
        let mut layers = Vec::new();
        for step in architecture.plan() {
            let (Some(weight_shape), Some((w_stem, b_stem))) = (step.weight_shape(), step.stems())
            else {
                layers.push(LayerSpec::max_pool(step.name()));
                continue;
            };
            let settings = trainable
                .next()
                .ok_or_else(|| QnnModelError::config("profile shorter than plan"))?;
            let weights = source.weights(w_stem, weight_shape.total_elements())?;
            let biases = source.biases(b_stem, step.bias_len())?;
            let weights = Tensor::new(weight_shape, weights)?;
            let biases = Tensor::from_vec(biases);
            let layer = match step {
                PlanStep::Dense { name, .. } => {
                    LayerSpec::dense(name, weights, biases, settings.requantize, settings.policy)?
                }
                PlanStep::Conv { name, .. } => {
                    LayerSpec::conv2d(name, weights, biases, settings.requantize, settings.policy)?
                }
                PlanStep::MaxPool { name } => LayerSpec::max_pool(name),
            };
            layers.push(layer);
        }

        let mut model = Self::new(profile.to_string(), architecture.input_shape(), layers)?;
        model.architecture = Some(architecture);
        tracing::info!(
            "Loaded {architecture} model: {} layers, {} parameters",
            model.layers.len(),
            model.parameter_count()
        );
        Ok(model)
    }

    /// Load `architecture` from a blob directory.
    ///
    /// # Errors
    ///
    /// Same as [`from_blobs`](Self::from_blobs).
    pub fn load_dir(
        dir: impl AsRef<Path>,
        architecture: Architecture,
        profile: &HardwareProfile,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::info!("Loading {architecture} weights from: {}", dir.display());
        if !dir.is_dir() {
            return Err(QnnModelError::FileNotFound {
                path: dir.to_path_buf(),
            });
        }
        Self::from_blobs(architecture, profile, &mut BlobDir::new(dir))
    }

    /// Rebuild a model from a weight-upload payload.
    ///
    /// # Errors
    ///
    /// Returns a config error if the payload is not exactly the size the
    /// architecture declares.
    pub fn from_payload(
        architecture: Architecture,
        profile: &HardwareProfile,
        payload: impl Into<Bytes>,
    ) -> Result<Self> {
        let payload = payload.into();
        if payload.len() != architecture.payload_len() {
            return Err(QnnModelError::shape_mismatch(
                format!("{architecture} weight payload"),
                architecture.payload_len(),
                payload.len(),
            ));
        }
        Self::from_blobs(architecture, profile, &mut PayloadSource::new(payload))
    }

    /// Weight-upload payload: per trainable layer, int8 weights then int32
    /// little-endian biases.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` only for hand-built tensors holding invalid values.
    pub fn weights_payload(&self) -> Result<Bytes> {
        let mut out = Vec::with_capacity(self.parameter_count() * 2);
        for layer in &self.layers {
            layer.write_payload(&mut out)?;
        }
        Ok(Bytes::from(out))
    }

    /// Preset this model was loaded as, if any
    pub const fn architecture(&self) -> Option<Architecture> {
        self.architecture
    }

    /// Description of the hardware profile used
    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    /// Input shape
    pub const fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Input value count
    pub fn input_len(&self) -> usize {
        self.input_shape.total_elements()
    }

    /// Layers in execution order
    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    /// Total weight and bias count
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(LayerSpec::parameter_count).sum()
    }
}

impl std::fmt::Display for QuantizedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.architecture {
            Some(arch) => write!(f, "{arch}")?,
            None => write!(f, "custom")?,
        }
        write!(f, " {} / {}", self.input_shape, self.profile_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{OverflowPolicy, Requantize};
    use std::fs;
    use tempfile::TempDir;

    fn write_regression_blobs(dir: &Path) {
        let weights: Vec<u8> = (0..7840).map(|i| (i % 3) as u8).collect();
        fs::write(dir.join("W.bin"), weights).unwrap();
        let biases: Vec<i32> = (0..10).map(|i| i * 100 - 500).collect();
        mem::write_mem(dir.join("B.mem"), &biases, Width::W32).unwrap();
    }

    #[test]
    fn loads_bin_with_mem_fallback() {
        let dir = TempDir::new().unwrap();
        write_regression_blobs(dir.path());
        let model = QuantizedModel::load_dir(
            dir.path(),
            Architecture::Regression,
            &HardwareProfile::regression(),
        )
        .unwrap();
        assert_eq!(model.architecture(), Some(Architecture::Regression));
        assert_eq!(model.parameter_count(), 7850);
        assert_eq!(model.input_len(), 784);
    }

    #[test]
    fn missing_blob_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = QuantizedModel::load_dir(dir.path(), Architecture::Mlp, &HardwareProfile::mlp())
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn wrong_blob_size_is_config_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("W.bin"), vec![0u8; 7839]).unwrap();
        fs::write(dir.path().join("B.bin"), vec![0u8; 40]).unwrap();
        let err = QuantizedModel::load_dir(
            dir.path(),
            Architecture::Regression,
            &HardwareProfile::regression(),
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn profile_must_match_plan() {
        let dir = TempDir::new().unwrap();
        write_regression_blobs(dir.path());
        let err =
            QuantizedModel::load_dir(dir.path(), Architecture::Regression, &HardwareProfile::mlp())
                .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn payload_rebuilds_same_model() {
        let dir = TempDir::new().unwrap();
        write_regression_blobs(dir.path());
        let profile = HardwareProfile::regression();
        let model =
            QuantizedModel::load_dir(dir.path(), Architecture::Regression, &profile).unwrap();
        let payload = model.weights_payload().unwrap();
        assert_eq!(payload.len(), Architecture::Regression.payload_len());
        let rebuilt =
            QuantizedModel::from_payload(Architecture::Regression, &profile, payload.clone())
                .unwrap();
        assert_eq!(rebuilt, model);
        assert!(QuantizedModel::from_payload(
            Architecture::Regression,
            &profile,
            payload.slice(..100)
        )
        .is_err());
    }

    #[test]
    fn custom_model_must_end_in_ten_scores() {
        let weights = Tensor::new(Shape::new(vec![3, 1]), vec![0i8; 3]).unwrap();
        let layer = LayerSpec::dense(
            "fc",
            weights,
            Tensor::from_vec(vec![0; 3]),
            Requantize::IDENTITY,
            OverflowPolicy::Wrap32,
        )
        .unwrap();
        assert!(QuantizedModel::new("test", Shape::vector(1), vec![layer]).is_err());
        assert!(QuantizedModel::new("test", Shape::vector(1), Vec::new()).is_err());
    }
}
