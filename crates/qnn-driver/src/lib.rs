// SPDX-License-Identifier: AGPL-3.0-only

#![deny(unsafe_code)]

//! Host driver for the fixed-point digit-classifier accelerator.
//!
//! Talks to the board over a half-duplex UART link and compares what it
//! returns against the bit-exact reference in `qnn-models`.
//!
//! # Transports
//!
//! ```text
//! Hardware:
//!   SerialTransport   pre-configured tty device file, poll(2)-bounded reads
//!
//! Development:
//!   SimulatedDevice   byte-level router model + reference engine,
//!                     with fault injection
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use qnn_driver::{
//!     ComparisonHarness, HarnessConfig, ProtocolConfig, SerialTransport, TextReport,
//!     OutputMode, WireProtocol,
//! };
//! use qnn_models::{Architecture, InferenceEngine, QuantizedModel, SampleSet};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let arch = Architecture::Mlp;
//! let model = QuantizedModel::load_dir("outputs/bin", arch, &arch.default_profile())?;
//! let samples = SampleSet::load("outputs/test_vectors")?;
//!
//! let mut protocol = WireProtocol::new(SerialTransport::open("/dev/ttyUSB0")?, ProtocolConfig::default());
//! protocol.settle()?;
//!
//! let mut harness = ComparisonHarness::new(InferenceEngine::new(model), protocol, HarnessConfig::default());
//! let mut report = TextReport::open(OutputMode::Both, "comparison.txt")?;
//! let summary = harness.run(&samples, &mut report)?;
//! println!("{} / {} match", summary.matches, summary.total);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod error;
pub mod harness;
pub mod protocol;
pub mod report;
mod transport;
pub mod transports;

pub use error::{QnnError, Result};
pub use harness::{
    ComparisonHarness, ComparisonRecord, ComparisonStatus, ComparisonSummary, DeviceResult,
    HarnessConfig, ReadMode,
};
pub use protocol::{CompletionWait, FixedDelay, HostState, ProtocolConfig, WireFrame, WireProtocol};
pub use report::{OutputMode, RecordSink, RunHeader, TextReport};
pub use transport::{Transport, TransportType};
pub use transports::{Fault, SerialTransport, SimulatedDevice, SimulatorStats};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        ComparisonHarness, ComparisonSummary, HarnessConfig, ProtocolConfig, QnnError, ReadMode,
        Result, SerialTransport, SimulatedDevice, Transport, WireProtocol,
    };
}
