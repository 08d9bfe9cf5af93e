// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The dummy housekeeping handler (C6).
//!
//! Drains fixed 3-byte `0xE0`/`0xE8` frames whose payload is always one of
//! two known byte sequences. There's nothing to decode; the handler exists
//! only so the dispatcher has somewhere to route these frames.

use crate::error::Result;
use log::trace;

/// Handler for `0xE0`/`0xE8` housekeeping frames.
#[derive(Default)]
pub struct DummyHandler;

impl DummyHandler {
    /// Handles one 3-byte dummy frame.
    pub fn handle_packet(&mut self, buf: &[u8]) -> Result<()> {
        trace!("dummy frame {:02x} {:02x} {:02x}", buf[0], buf[1], buf[2]);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_both_known_payloads() {
        let mut h = DummyHandler;
        h.handle_packet(&[0xE0, 0xE1, 0xE2]).unwrap();
        h.handle_packet(&[0xE8, 0xE9, 0xEA]).unwrap();
    }
}
