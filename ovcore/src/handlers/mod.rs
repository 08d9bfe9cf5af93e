// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Packet handlers routed to by the [`crate::dispatcher::PacketDispatcher`]
//! (C3–C6). The sniffer framing handler (C11) lives in [`crate::usb::sniffer`]
//! instead, alongside the USB packet decoder (C10) it feeds.

mod dummy;
mod io_handler;
mod lfsr;
mod sdram;

pub use dummy::DummyHandler;
pub use io_handler::IoHandler;
pub use lfsr::{LfsrHandler, LfsrStats};
pub use sdram::SdramHandler;
