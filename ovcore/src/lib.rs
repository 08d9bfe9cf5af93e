// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Host-side control and capture runtime for an FPGA-based USB protocol
//! analyzer.
//!
//! This crate sits above the raw transport byte stream and below
//! user-facing output formatting: it demultiplexes the device's single
//! byte stream into typed sub-protocols, presents named-register MMIO
//! and ULPI facades over the synchronous I/O channel, and turns sniffed
//! USB traffic into decoded events delivered to pluggable sinks. See
//! [`device::Device`] for the top-level entry point.

pub mod device;
pub mod dispatcher;
pub mod error;
pub mod firmware;
pub mod handlers;
pub mod io;
pub mod mmio;
pub mod transport;
pub mod ulpi;
pub mod usb;
mod wire;

pub use error::{Error, Result};
