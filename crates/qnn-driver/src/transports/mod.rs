//! Transport implementations
//!
//! - **Serial**: pre-configured tty device file, bounded reads via `poll(2)`
//! - **Simulated**: in-process router + reference engine, with fault injection

pub mod serial;
pub mod simulated;

pub use serial::SerialTransport;
pub use simulated::{Fault, SimulatedDevice, SimulatorStats};
