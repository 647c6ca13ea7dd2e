//! Layer dimensions of the synthesized architectures.
//!
//! One submodule per bitstream family. Shift amounts are the right-shifts
//! hardwired after each hidden layer; the output layer is never shifted.
//! Convolutions are stride 1, no padding; pooling is 2×2 stride 2.
//! Feature maps are flattened channel-major (C, H, W).

/// Softmax-regression accelerator: one dense layer.
pub mod regression {
    /// Dense inputs.
    pub const INPUTS: usize = crate::protocol::IMAGE_PIXELS;
    /// Dense outputs.
    pub const OUTPUTS: usize = crate::protocol::NUM_CLASSES;
}

/// Two-hidden-layer perceptron (784-16-16-10).
pub mod mlp {
    /// Input width.
    pub const INPUTS: usize = crate::protocol::IMAGE_PIXELS;
    /// Neurons per hidden layer.
    pub const HIDDEN: usize = 16;
    /// Output width.
    pub const OUTPUTS: usize = crate::protocol::NUM_CLASSES;
    /// Right-shift after layer 1.
    pub const SHIFT1: u32 = 7;
    /// Right-shift after layer 2.
    pub const SHIFT2: u32 = 7;
}

/// Single-convolution network (conv 4×3×3 → dense).
pub mod simple_cnn {
    /// Convolution filters.
    pub const FILTERS: usize = 4;
    /// Kernel side.
    pub const KERNEL: usize = 3;
    /// Right-shift after the convolution.
    pub const SHIFT_CONV: u32 = 7;
    /// Feature map side after the convolution (28 − 3 + 1).
    pub const MAP_SIDE: usize = 26;
    /// Dense inputs (4 × 26 × 26).
    pub const DENSE_INPUTS: usize = FILTERS * MAP_SIDE * MAP_SIDE;
}

/// Two conv+pool blocks followed by a dense classifier.
pub mod cnn {
    /// First convolution filters.
    pub const CONV1_FILTERS: usize = 16;
    /// Second convolution filters.
    pub const CONV2_FILTERS: usize = 32;
    /// Kernel side for both convolutions.
    pub const KERNEL: usize = 3;
    /// Right-shift after each convolution.
    pub const SHIFT_CONV: u32 = 8;
    /// Spatial side after conv1 → pool → conv2 → pool (28→26→13→11→5).
    pub const FINAL_SIDE: usize = 5;
    /// Dense inputs (32 × 5 × 5).
    pub const DENSE_INPUTS: usize = CONV2_FILTERS * FINAL_SIDE * FINAL_SIDE;
}

/// Activation clamp applied after convolutions so values stay valid int8.
pub const ACTIVATION_CLAMP: (i32, i32) = (0, 127);
