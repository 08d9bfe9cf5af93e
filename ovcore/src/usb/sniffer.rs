// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The sniffer framing handler (C11).
//!
//! Parses `0xA0` capture records off the wire, tracks capture-session
//! arming (`FIRST`/`LAST`), and feeds armed records to the USB decoder
//! (C10), delivering the resulting events to every registered sink.
//! `0xAC`/`0xAD` control tokens are recognized and discarded.

use crate::error::Result;
use crate::usb::decoder::{Decoder, UsbEventSink};
use log::warn;
use std::sync::{Arc, Mutex};

const FLAG_FIRST: u16 = 0x10;
const FLAG_LAST: u16 = 0x20;
const KNOWN_FLAGS: u16 = FLAG_FIRST | FLAG_LAST;

/// Handler for `0xA0` capture records and `0xAC`/`0xAD` control tokens.
pub struct SnifferHandler {
    decoder: Decoder,
    armed: bool,
    sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>>,
}

impl SnifferHandler {
    /// Creates a handler delivering decoded events to `sinks`. `highspeed`
    /// is forwarded to the decoder to enable microframe tracking.
    pub fn new(highspeed: bool, sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>>) -> Self {
        Self {
            decoder: Decoder::new(highspeed),
            armed: false,
            sinks,
        }
    }

    /// Handles one `0xA0` capture record or `0xAC`/`0xAD` control token.
    pub fn handle_packet(&mut self, buf: &[u8]) -> Result<()> {
        match buf[0] {
            0xA0 => self.handle_capture_record(buf),
            0xAC | 0xAD => Ok(()),
            magic => unreachable!("sniffer handler given unroutable magic {:02x}", magic),
        }
    }

    fn handle_capture_record(&mut self, buf: &[u8]) -> Result<()> {
        let flags = buf[1] as u16 | (buf[2] as u16) << 8;
        if flags & !KNOWN_FLAGS != 0 {
            warn!("capture record carried unrecognized flag bits {:04x}", flags);
        }

        let len = buf[3] as usize | (buf[4] as usize) << 8;
        let ts = buf[5] as u32 | (buf[6] as u32) << 8 | (buf[7] as u32) << 16;
        let payload = &buf[8..8 + len];

        if flags & FLAG_FIRST != 0 {
            self.armed = true;
        }

        if flags & FLAG_LAST != 0 {
            if self.armed {
                self.deliver(ts, payload, flags as u8);
            }
            self.armed = false;
            return Ok(());
        }

        if self.armed {
            self.deliver(ts, payload, flags as u8);
        }

        Ok(())
    }

    fn deliver(&mut self, ts: u32, payload: &[u8], flags: u8) {
        let event = self.decoder.decode(ts, payload, flags);
        let mut sinks = self.sinks.lock().unwrap();
        for sink in sinks.iter_mut() {
            sink.on_event(&event);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::usb::decoder::Event;

    struct RecordingSink(Vec<u64>);
    impl UsbEventSink for RecordingSink {
        fn on_event(&mut self, event: &Event) {
            self.0.push(event.absolute_ts);
        }
    }

    #[test]
    fn record_outside_armed_window_is_dropped() {
        let sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>> = Arc::new(Mutex::new(Vec::new()));
        let mut h = SnifferHandler::new(false, sinks.clone());

        // No FIRST has been observed; a bare record must be dropped.
        let record = [0xA0u8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        h.handle_packet(&record).unwrap();
        assert!(sinks.lock().unwrap().is_empty());
    }

    #[test]
    fn first_arms_and_last_disarms() {
        let count = Arc::new(Mutex::new(0usize));
        struct Counting(Arc<Mutex<usize>>);
        impl UsbEventSink for Counting {
            fn on_event(&mut self, _event: &Event) {
                *self.0.lock().unwrap() += 1;
            }
        }
        let sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>> =
            Arc::new(Mutex::new(vec![Box::new(Counting(count.clone()))]));
        let mut h = SnifferHandler::new(false, sinks);

        // FIRST record.
        h.handle_packet(&[0xA0, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        // Mid-session record.
        h.handle_packet(&[0xA0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        // LAST record.
        h.handle_packet(&[0xA0, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(*count.lock().unwrap(), 3);

        // Session is now disarmed; this record must be dropped.
        h.handle_packet(&[0xA0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(*count.lock().unwrap(), 3);
    }

    #[test]
    fn zero_length_payload_while_armed_still_delivers() {
        let sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>> =
            Arc::new(Mutex::new(vec![Box::new(RecordingSink(Vec::new()))]));
        let mut h = SnifferHandler::new(false, sinks.clone());

        h.handle_packet(&[0xA0, 0x10 | 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .unwrap();

        let guard = sinks.lock().unwrap();
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn control_tokens_are_discarded() {
        let sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>> = Arc::new(Mutex::new(Vec::new()));
        let mut h = SnifferHandler::new(false, sinks);
        h.handle_packet(&[0xAC, 0x00]).unwrap();
        h.handle_packet(&[0xAD, 0x00]).unwrap();
    }

    #[test]
    fn full_record_with_payload_reaches_sink() {
        let sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>> =
            Arc::new(Mutex::new(vec![Box::new(RecordingSink(Vec::new()))]));
        let mut h = SnifferHandler::new(false, sinks.clone());

        // flags=FIRST|LAST, len=3, ts=0, payload A5 01 00 (an SOF, frame 1).
        let record = [
            0xA0u8,
            (FLAG_FIRST | FLAG_LAST) as u8,
            0x00,
            0x03,
            0x00,
            0x00,
            0x00,
            0x00,
            0xA5,
            0x01,
            0x00,
        ];
        h.handle_packet(&record).unwrap();

        let guard = sinks.lock().unwrap();
        assert_eq!(guard.len(), 1);
    }
}
