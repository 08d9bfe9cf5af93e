// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The SDRAM container handler (C4).
//!
//! A `0xD0` frame is a variable-length container whose payload
//! (`buf[2..]`) is itself a sub-stream of multiplexed frames — typically
//! capture records replayed out of the device's on-board SDRAM ring
//! buffer. This handler owns a nested [`PacketDispatcher`] and feeds the
//! unwrapped payload back into it, re-entering dispatch recursively. Per
//! §9's sharing note, the nested dispatcher holds the *same* sniffer
//! handler instance as the outer dispatcher, so replayed records decode
//! identically to live ones.

use crate::dispatcher::{HandlerKind, PacketDispatcher};
use crate::error::Result;
use crate::usb::sniffer::SnifferHandler;
use std::sync::{Arc, Mutex};

/// Handler for `0xD0` SDRAM container frames.
pub struct SdramHandler {
    inner: PacketDispatcher,
}

impl SdramHandler {
    /// Creates a new SDRAM handler whose inner dispatcher delivers frames
    /// to `sniffer` (shared with the outer, live-capture dispatcher).
    pub fn new(sniffer: Arc<Mutex<SnifferHandler>>) -> Self {
        let mut inner = PacketDispatcher::new(true);
        inner.register(HandlerKind::Sniffer(sniffer));
        Self { inner }
    }

    /// Handles one `0xD0` frame: strips the 2-byte container header and
    /// re-enters dispatch on the remaining payload.
    pub fn handle_packet(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.handle_incoming_bytes(&buf[2..])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::usb::decoder::UsbEventSink;
    use std::sync::Mutex as StdMutex;

    struct CountingSink(Arc<StdMutex<usize>>);
    impl UsbEventSink for CountingSink {
        fn on_event(&mut self, _event: &crate::usb::decoder::Event) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn zero_length_inner_payload_is_four_byte_frame() {
        let count = Arc::new(StdMutex::new(0));
        let sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>> = Arc::new(Mutex::new(vec![
            Box::new(CountingSink(count.clone())) as Box<dyn UsbEventSink>
        ]));
        let sniffer = Arc::new(Mutex::new(SnifferHandler::new(false, sinks)));
        let mut sdram = SdramHandler::new(sniffer);

        // buf[1] == 0 => container is a 4-byte frame whose inner payload
        // (after stripping the 2-byte header) is the 2 remaining bytes,
        // which form an empty (len 0) capture-style token, not a full
        // 0xA0 record; use a sniffer control token (0xAC, reserved) here
        // since it's exactly 2 bytes and requires no further framing.
        sdram.handle_packet(&[0xD0, 0x00, 0xAC, 0x00]).unwrap();
    }

    #[test]
    fn replayed_capture_record_reaches_sniffer() {
        let count = Arc::new(StdMutex::new(0));
        let sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>> = Arc::new(Mutex::new(vec![
            Box::new(CountingSink(count.clone())) as Box<dyn UsbEventSink>
        ]));
        let sniffer = Arc::new(Mutex::new(SnifferHandler::new(false, sinks)));
        let mut sdram = SdramHandler::new(sniffer);

        // Inner payload: one 0xA0 record, flags=FIRST|LAST, len=0, ts=0.
        let inner = [0xA0u8, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        // buf[1]+1 pairs of two bytes must cover `inner`'s length (8 bytes
        // == 4 pairs, so buf[1] == 3).
        let mut frame = vec![0xD0, 0x03];
        frame.extend_from_slice(&inner);
        sdram.handle_packet(&frame).unwrap();

        assert_eq!(*count.lock().unwrap(), 1);
    }
}
