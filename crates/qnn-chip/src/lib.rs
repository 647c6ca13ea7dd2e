// SPDX-License-Identifier: AGPL-3.0-only

//! Fabric model for the fixed-point MNIST inference accelerator.
//!
//! This crate has **no dependencies** and **no hardware access**; it is a
//! pure model of the logic design as seen from the host: UART frame markers,
//! response sizes, host-side timing defaults and the tensor dimensions of
//! every synthesized architecture.
//!
//! Everything here mirrors the RTL (`uart_router.v`, `inference.v`) of the
//! deployed bitstreams; the host crates never hardcode these numbers.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`protocol`] | Frame markers, opcodes, fixed response sizes |
//! | [`timing`] | Inference delay, read timeouts, upload chunking |
//! | [`arch`] | Per-architecture layer dimensions and shift amounts |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod arch;
pub mod protocol;
pub mod timing;
