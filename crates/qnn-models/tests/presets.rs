//! End-to-end checks of the architecture presets against hand-computed
//! outputs.

use qnn_models::{
    Architecture, HardwareProfile, InferenceEngine, OverflowPolicy, QuantizedModel,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_i8(dir: &Path, stem: &str, values: &[i8]) {
    let bytes: Vec<u8> = values.iter().map(|&v| v as u8).collect();
    fs::write(dir.join(format!("{stem}.bin")), bytes).unwrap();
}

fn write_i32(dir: &Path, stem: &str, values: &[i32]) {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(dir.join(format!("{stem}.bin")), bytes).unwrap();
}

/// Zero weights and biases for every blob of `arch`
fn zero_blobs(dir: &Path, arch: Architecture) {
    for step in arch.plan() {
        if let (Some(shape), Some((w, b))) = (step.weight_shape(), step.stems()) {
            write_i8(dir, w, &vec![0; shape.total_elements()]);
            write_i32(dir, b, &vec![0; step.bias_len()]);
        }
    }
}

#[test]
fn every_preset_loads_and_runs() {
    for arch in Architecture::ALL {
        let dir = TempDir::new().unwrap();
        zero_blobs(dir.path(), arch);
        let model = QuantizedModel::load_dir(dir.path(), arch, &arch.default_profile()).unwrap();
        let engine = InferenceEngine::new(model);
        let out = engine.infer(&[17; 784]).unwrap();
        assert_eq!(out.scores.0, [0; 10], "{arch}");
        assert_eq!(out.prediction.index(), 0);
    }
}

#[test]
fn cnn_dense_bias_reaches_scores() {
    let dir = TempDir::new().unwrap();
    zero_blobs(dir.path(), Architecture::Cnn);
    write_i32(dir.path(), "dense_biases", &[0, 0, 0, 0, 0, 0, 9, 0, 0, -4]);
    let arch = Architecture::Cnn;
    let engine = InferenceEngine::new(
        QuantizedModel::load_dir(dir.path(), arch, &arch.default_profile()).unwrap(),
    );
    let trace = engine.trace(&[100; 784]).unwrap();
    let shapes: Vec<String> = trace
        .layers
        .iter()
        .map(|l| l.output.shape().to_string())
        .collect();
    assert_eq!(
        shapes,
        ["[16, 26, 26]", "[16, 13, 13]", "[32, 11, 11]", "[32, 5, 5]", "[10]"]
    );
    assert_eq!(trace.inference.prediction.index(), 6);
    assert_eq!(trace.inference.scores.0[9], -4);
}

#[test]
fn simple_cnn_flattens_channel_major() {
    let dir = TempDir::new().unwrap();
    let arch = Architecture::SimpleCnn;
    zero_blobs(dir.path(), arch);

    // filters 0 and 1 pick the window centre with weight 127
    let mut conv = vec![0i8; 4 * 9];
    conv[4] = 127;
    conv[9 + 4] = 127;
    write_i8(dir.path(), "conv_weights", &conv);

    // class 2 reads filter 0 at (10, 5); class 4 reads filter 1 at (10, 5)
    let mut dense = vec![0i8; 10 * 2704];
    dense[2 * 2704 + 10 * 26 + 5] = 1;
    dense[4 * 2704 + 676 + 10 * 26 + 5] = 2;
    write_i8(dir.path(), "dense_weights", &dense);

    let engine = InferenceEngine::new(
        QuantizedModel::load_dir(dir.path(), arch, &arch.default_profile()).unwrap(),
    );
    let mut pixels = vec![0i8; 784];
    // window centre of output (10, 5) is image (11, 6)
    pixels[11 * 28 + 6] = 64;
    let out = engine.infer(&pixels).unwrap();

    // 64 × 127 = 8128 >> 7 = 63
    assert_eq!(out.scores.0[2], 63);
    assert_eq!(out.scores.0[4], 126);
    assert_eq!(out.prediction.index(), 4);
}

#[test]
fn mlp_policy_choice_changes_scores() {
    let dir = TempDir::new().unwrap();
    let arch = Architecture::Mlp;
    zero_blobs(dir.path(), arch);
    // L1 output = 2^30 >> 7 = 2^23 for every hidden neuron
    write_i32(dir.path(), "L1_biases", &[1 << 30; 16]);
    // L2 dot product = 16 × 127 × 2^23, far beyond int32
    write_i8(dir.path(), "L2_weights", &[127; 256]);
    let mut l3 = vec![0i8; 160];
    l3[..16].fill(1);
    write_i8(dir.path(), "L3_weights", &l3);

    let pixels = [0i8; 784];

    let mixed = InferenceEngine::new(
        QuantizedModel::load_dir(dir.path(), arch, &HardwareProfile::mlp()).unwrap(),
    );
    let trace = mixed.trace(&pixels).unwrap();
    // saturated L2 → i32::MAX >> 7 = 16777215, summed 16 times in L3
    assert_eq!(trace.inference.scores.0[0], 16 * 16_777_215);
    assert_eq!(trace.layers[1].overflows, 16);

    let wrapping = InferenceEngine::new(
        QuantizedModel::load_dir(
            dir.path(),
            arch,
            &HardwareProfile::mlp().with_uniform_policy(OverflowPolicy::Wrap32),
        )
        .unwrap(),
    );
    let trace = wrapping.trace(&pixels).unwrap();
    // wrapped L2 register is negative → ReLU zeroes every hidden output
    assert_eq!(trace.inference.scores.0[0], 0);
    assert!(trace.total_overflows() > 0);
}

#[test]
fn mem_blobs_load_like_bin_blobs() {
    let bin = TempDir::new().unwrap();
    let arch = Architecture::Regression;
    let weights: Vec<i8> = (0..7840).map(|i| ((i * 7) % 256) as u8 as i8).collect();
    let biases: Vec<i32> = (0..10).map(|i| i32::MIN + i * 1000).collect();
    write_i8(bin.path(), "W", &weights);
    write_i32(bin.path(), "B", &biases);

    let text = TempDir::new().unwrap();
    let wide: Vec<i32> = weights.iter().map(|&w| i32::from(w)).collect();
    qnn_models::mem::write_mem(text.path().join("W.mem"), &wide, qnn_models::Width::W8).unwrap();
    qnn_models::mem::write_mem(text.path().join("B.mem"), &biases, qnn_models::Width::W32)
        .unwrap();

    let profile = arch.default_profile();
    let a = QuantizedModel::load_dir(bin.path(), arch, &profile).unwrap();
    let b = QuantizedModel::load_dir(text.path(), arch, &profile).unwrap();
    assert_eq!(a, b);
}
