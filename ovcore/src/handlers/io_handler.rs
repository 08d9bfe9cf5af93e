// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The I/O request/response handler (C3).
//!
//! Synchronous register-byte read/write layered on top of the
//! asynchronous [`crate::dispatcher::PacketDispatcher`]: the caller thread
//! submits a request and blocks on a oneshot channel keyed by the request's
//! `cmd` word; the reader thread resolves that channel when the matching
//! `0x55` response frame is delivered. See §9's "request/response
//! rendezvous" design note for why a oneshot-per-cmd map was chosen over a
//! single shared FIFO queue.

use crate::error::{Error, ProtocolError, Result};
use crate::transport::{Interface, Transport};
use log::debug;
use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Bit set in `cmd` to mark an I/O request as a write.
const WRITE_REQUEST_FLAG: u16 = 0x8000;

/// The synchronous I/O register channel.
pub struct IoHandler {
    transport: Arc<dyn Transport>,
    pending: Mutex<HashMap<u16, SyncSender<u8>>>,
}

impl IoHandler {
    /// Creates a new I/O handler bound to `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Reads a single byte at `addr`, blocking up to `timeout` for the
    /// device's response.
    pub fn read(&self, addr: u16, timeout: Duration) -> Result<u8> {
        let cmd = addr & 0x7FFF;
        self.perform_io_request(cmd, 0, timeout)
    }

    /// Writes `value` to `addr`, blocking up to `timeout` for the device's
    /// response.
    pub fn write(&self, addr: u16, value: u8, timeout: Duration) -> Result<()> {
        let cmd = WRITE_REQUEST_FLAG | addr;
        self.perform_io_request(cmd, value, timeout)?;
        Ok(())
    }

    fn perform_io_request(&self, cmd: u16, value: u8, timeout: Duration) -> Result<u8> {
        let (tx, rx) = sync_channel(1);
        self.pending.lock().unwrap().insert(cmd, tx);

        let mut packet = [0x55u8, (cmd >> 8) as u8, (cmd & 0xFF) as u8, value, 0];
        let checksum = packet[0..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        packet[4] = checksum;

        debug!("io request cmd={:04x} value={:02x}", cmd, value);
        if let Err(e) = self.transport.write(Interface::A, &packet) {
            self.pending.lock().unwrap().remove(&cmd);
            return Err(e);
        }

        match rx.recv_timeout(timeout) {
            Ok(value) => {
                debug!("io response cmd={:04x} value={:02x}", cmd, value);
                Ok(value)
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&cmd);
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Handles receipt of a `0x55` response frame (invoked by the
    /// dispatcher on the reader thread).
    pub fn handle_response(&self, buf: &[u8]) -> Result<()> {
        let computed = buf[0..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        let received = buf[4];
        if computed != received {
            return Err(Error::Protocol(ProtocolError::BadChecksum {
                expected: received,
                computed,
            }));
        }

        let cmd = (buf[1] as u16) << 8 | buf[2] as u16;
        let value = buf[3];

        let sender = self.pending.lock().unwrap().remove(&cmd);
        match sender {
            Some(tx) => {
                // The caller may have already timed out and stopped
                // listening; a dropped receiver here is not our problem.
                let _ = tx.send(value);
                Ok(())
            }
            None => Err(Error::Protocol(ProtocolError::CommandMismatch { cmd })),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::LoopbackTransport;
    use std::thread;

    #[test]
    fn write_then_read_round_trip() {
        let transport = Arc::new(LoopbackTransport::new());
        let io = Arc::new(IoHandler::new(transport.clone()));

        // Respond to the write (cmd=0x8010, value=0xAB) ...
        transport.inject(&[0x55, 0x80, 0x10, 0xAB, 0x90]);
        // ... and to the read (cmd=0x0010) with the same value echoed back.
        transport.inject(&[0x55, 0x00, 0x10, 0xAB, 0x10]);

        let io_reader = io.clone();
        let reader_transport = transport.clone();
        let reader = thread::spawn(move || {
            reader_transport
                .read_stream(Interface::A, &mut |batch| {
                    io_reader.handle_response(batch).unwrap();
                    true
                })
                .unwrap();
            reader_transport
                .read_stream(Interface::A, &mut |batch| {
                    io_reader.handle_response(batch).unwrap();
                    true
                })
                .unwrap();
        });

        io.write(0x10, 0xAB, Duration::from_secs(1)).unwrap();
        let value = io.read(0x10, Duration::from_secs(1)).unwrap();
        assert_eq!(value, 0xAB);

        reader.join().unwrap();
    }

    #[test]
    fn checksum_failure_is_reported() {
        let transport = Arc::new(LoopbackTransport::new());
        let io = IoHandler::new(transport);

        // Correct fields, but a deliberately wrong checksum byte.
        let err = io.handle_response(&[0x55, 0x00, 0x10, 0xAB, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::BadChecksum { .. })
        ));
    }

    #[test]
    fn timeout_when_no_response_arrives() {
        let transport = Arc::new(LoopbackTransport::new());
        let io = IoHandler::new(transport);
        let err = io.read(0x10, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn unmatched_response_is_command_mismatch() {
        let transport = Arc::new(LoopbackTransport::new());
        let io = IoHandler::new(transport);
        let err = io.handle_response(&[0x55, 0x00, 0x10, 0xAB, 0x10]).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::CommandMismatch { cmd: 0x10 })
        ));
    }
}
