//! UART frame layout.
//!
//! Half-duplex, byte-oriented, little-endian multi-byte fields. The router
//! accepts one frame at a time and never acknowledges uploads.
//!
//! | Frame | Host → Device | Device → Host |
//! |-------|---------------|---------------|
//! | Image upload | `BB 66` + 784 B + `66 BB` | none |
//! | Weights upload | `AA 55` + payload + `55 AA` | none |
//! | Scores read | `CD` | 40 B (10 × i32 LE) |
//! | Digit read | `CC` | 1 B, low nibble = class |

/// Number of output classes (digits 0–9).
pub const NUM_CLASSES: usize = 10;

/// Input image side length in pixels.
pub const IMAGE_SIDE: usize = 28;

/// Input image size in pixels (one int8 per pixel).
pub const IMAGE_PIXELS: usize = IMAGE_SIDE * IMAGE_SIDE;

/// Image upload start marker.
pub const IMAGE_START: [u8; 2] = [0xBB, 0x66];

/// Image upload end marker.
pub const IMAGE_END: [u8; 2] = [0x66, 0xBB];

/// Weights upload start marker.
pub const WEIGHTS_START: [u8; 2] = [0xAA, 0x55];

/// Weights upload end marker.
pub const WEIGHTS_END: [u8; 2] = [0x55, 0xAA];

/// Opcodes understood by the router outside of an upload frame.
pub mod opcode {
    /// Request all class scores.
    pub const SCORES_READ: u8 = 0xCD;
    /// Request the predicted digit.
    pub const DIGIT_READ: u8 = 0xCC;
}

/// Bytes per score on the wire.
pub const BYTES_PER_SCORE: usize = 4;

/// Scores read response length: 10 × int32 little-endian, class order.
pub const SCORES_RESPONSE_LEN: usize = NUM_CLASSES * BYTES_PER_SCORE;

/// Digit read response length.
pub const DIGIT_RESPONSE_LEN: usize = 1;

/// Mask applied to the digit response byte.
pub const DIGIT_MASK: u8 = 0x0F;

/// Total image upload frame length including markers.
pub const IMAGE_FRAME_LEN: usize = IMAGE_START.len() + IMAGE_PIXELS + IMAGE_END.len();
