// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The transport layer: a thin duplex byte-stream interface over the
//! device's two FTDI interfaces.
//!
//! This module treats the FTDI driver itself as an opaque collaborator
//! (per the out-of-scope list): [`Transport`] only describes the shape a
//! real driver binding must have. [`LoopbackTransport`] is an in-memory
//! double used by the rest of the crate's unit tests and is not meant for
//! production use.

use crate::error::{Error, TransportError};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One of the device's two FTDI interfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interface {
    /// Interface A, used for the multiplexed control/capture protocol.
    A,
    /// Interface B, reserved for future use.
    B,
}

/// A duplex byte-stream transport to the device.
///
/// Implementations are expected to be cheap to clone (or otherwise shared)
/// so that the reader thread and caller threads can each hold a handle.
pub trait Transport: Send + Sync {
    /// Opens the underlying connection.
    fn open(&self) -> Result<(), Error>;

    /// Closes the underlying connection. Idempotent.
    fn close(&self);

    /// Sends `bytes` on `interface`.
    fn write(&self, interface: Interface, bytes: &[u8]) -> Result<(), Error>;

    /// Blocks, invoking `callback` with each batch of bytes received on
    /// `interface`, until `callback` returns `true` (meaning "stop") or the
    /// transport is closed.
    fn read_stream(
        &self,
        interface: Interface,
        callback: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<(), Error>;
}

/// An in-memory [`Transport`] double, backed by a channel in each
/// direction.
///
/// Tests drive the "device" side by calling [`LoopbackTransport::inject`];
/// bytes sent by the code under test land in [`LoopbackTransport::sent`].
pub struct LoopbackTransport {
    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl LoopbackTransport {
    /// Creates a new, empty loopback transport.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            inbound_tx: tx,
            inbound_rx: Mutex::new(rx),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues `bytes` to be delivered to the next [`Transport::read_stream`]
    /// poll, as if the device had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        self.inbound_tx
            .send(bytes.to_vec())
            .expect("loopback transport receiver dropped");
    }

    /// Returns every byte written via [`Transport::write`] so far.
    pub fn sent(&self) -> Vec<u8> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn open(&self) -> Result<(), Error> {
        Ok(())
    }

    fn close(&self) {
        // Dropping the sender would disconnect the receiver; since we hold
        // onto it for the lifetime of `self`, `close` has nothing to do
        // beyond letting `read_stream` observe the stop flag passed to it.
    }

    fn write(&self, _interface: Interface, bytes: &[u8]) -> Result<(), Error> {
        self.sent.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn read_stream(
        &self,
        _interface: Interface,
        callback: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<(), Error> {
        let rx = self.inbound_rx.lock().unwrap();
        loop {
            match rx.recv_timeout(Duration::from_millis(20)) {
                Ok(batch) => {
                    if callback(&batch) {
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(TransportError::Io(e))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loopback_delivers_injected_bytes() {
        let transport = LoopbackTransport::new();
        transport.inject(&[1, 2, 3]);

        let mut received = Vec::new();
        transport
            .read_stream(Interface::A, &mut |batch| {
                received.extend_from_slice(batch);
                true
            })
            .unwrap();

        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn loopback_records_writes() {
        let transport = LoopbackTransport::new();
        transport.write(Interface::A, &[0x55, 0x00, 0x10, 0x00, 0x65]).unwrap();
        assert_eq!(transport.sent(), vec![0x55, 0x00, 0x10, 0x00, 0x65]);
    }
}
