//! Host-side timing defaults.
//!
//! The router exposes no ready/ack signal. The host waits a fixed delay
//! after an image upload before it asks for results. That delay is an
//! estimate of inference latency, not a synchronization guarantee.

use std::time::Duration;

/// Reference UART baud rate of the deployed bitstreams.
pub const REFERENCE_BAUD: u32 = 115_200;

/// UART bits per transmitted byte (start + 8 data + stop).
pub const BITS_PER_BYTE: u32 = 10;

/// Delay between the image end marker and the first read request.
pub const INFERENCE_DELAY: Duration = Duration::from_millis(50);

/// Upper bound on waiting for a scores response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on waiting for a digit response.
pub const DIGIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a digit response.
pub const DIGIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upload chunk size; BRAM writes keep up with this much at once.
pub const UPLOAD_CHUNK_BYTES: usize = 64;

/// Pause between upload chunks.
pub const UPLOAD_CHUNK_DELAY: Duration = Duration::from_millis(5);

/// Wait after opening the port; the board may reset on open.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Wire time for `bytes` at `baud`, ignoring chunk delays.
#[must_use]
pub fn transmission_time(bytes: usize, baud: u32) -> Duration {
    if baud == 0 {
        return Duration::ZERO;
    }
    #[allow(clippy::cast_precision_loss)]
    let secs = bytes as f64 * f64::from(BITS_PER_BYTE) / f64::from(baud);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_transmission_at_reference_baud() {
        // 788 bytes × 10 bits / 115200 ≈ 68 ms
        let t = transmission_time(788, REFERENCE_BAUD);
        assert!(t > Duration::from_millis(60));
        assert!(t < Duration::from_millis(80));
    }

    #[test]
    fn zero_baud_is_zero() {
        assert_eq!(transmission_time(100, 0), Duration::ZERO);
    }
}
