// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The crate-wide error type.

use std::fmt;
use std::time::Duration;

/// A fatal transport-layer failure.
#[derive(Debug)]
pub enum TransportError {
    /// The underlying device could not be opened.
    Open(std::io::Error),
    /// A read or write against an already-open device failed.
    Io(std::io::Error),
}

/// A fatal protocol-framing failure.
///
/// All variants here are session-fatal: they abort the reader thread and
/// are re-raised from the next caller-side operation (see
/// `Error::Protocol`'s documentation).
#[derive(Debug)]
pub enum ProtocolError {
    /// An I/O response frame's checksum did not match its payload.
    BadChecksum { expected: u8, computed: u8 },
    /// A leading magic byte matched no registered handler.
    UnmatchedMagic(u8),
    /// An I/O response echoed a `cmd` that no caller was waiting on.
    CommandMismatch { cmd: u16 },
    /// A frame was shorter than its declared size after the stream ended.
    Truncated,
}

/// A firmware/configuration failure, surfaced at `open` time.
#[derive(Debug)]
pub enum ConfigError {
    /// The register-map text could not be parsed.
    BadRegisterMap(String),
    /// The bitstream blob was missing or malformed.
    BadBitstream(String),
    /// A register name or address literal could not be resolved.
    UnresolvedSymbol(String),
}

/// A caller-misuse precondition violation.
#[derive(Debug)]
pub enum PreconditionError {
    /// A ULPI register access was attempted before the transceiver clock
    /// came up.
    ClockDown,
    /// `open` was called on an already-open device.
    AlreadyOpen,
    /// An operation requiring an open device was attempted while closed.
    NotOpen,
}

/// The crate-wide error type.
#[derive(Debug)]
pub enum Error {
    /// See [`TransportError`].
    Transport(TransportError),
    /// See [`ProtocolError`].
    Protocol(ProtocolError),
    /// An MMIO read or write did not receive a response within its
    /// deadline.
    Timeout(Duration),
    /// See [`ConfigError`].
    Config(ConfigError),
    /// See [`PreconditionError`].
    Precondition(PreconditionError),
    /// A capture was interrupted by the caller before it ran to
    /// completion.
    CaptureInterrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Transport(TransportError::Open(e)) => {
                write!(f, "could not open device: {}", e)
            }
            Self::Transport(TransportError::Io(e)) => write!(f, "transport I/O error: {}", e),
            Self::Protocol(ProtocolError::BadChecksum { expected, computed }) => write!(
                f,
                "bad checksum on I/O response: expected {:02x}, computed {:02x}",
                expected, computed
            ),
            Self::Protocol(ProtocolError::UnmatchedMagic(m)) => {
                write!(f, "unmatched magic byte {:02x} in I/O stream", m)
            }
            Self::Protocol(ProtocolError::CommandMismatch { cmd }) => write!(
                f,
                "I/O response echoed cmd {:04x} with no matching outstanding request",
                cmd
            ),
            Self::Protocol(ProtocolError::Truncated) => {
                write!(f, "frame truncated before its declared length")
            }
            Self::Timeout(d) => write!(f, "operation timed out after {:?}", d),
            Self::Config(ConfigError::BadRegisterMap(msg)) => {
                write!(f, "bad register map: {}", msg)
            }
            Self::Config(ConfigError::BadBitstream(msg)) => write!(f, "bad bitstream: {}", msg),
            Self::Config(ConfigError::UnresolvedSymbol(sym)) => {
                write!(f, "could not resolve symbol {}", sym)
            }
            Self::Precondition(PreconditionError::ClockDown) => {
                write!(f, "ULPI access attempted before the transceiver clock is up")
            }
            Self::Precondition(PreconditionError::AlreadyOpen) => {
                write!(f, "device is already open")
            }
            Self::Precondition(PreconditionError::NotOpen) => write!(f, "device is not open"),
            Self::CaptureInterrupted => write!(f, "capture was interrupted"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(TransportError::Open(e)) => Some(e),
            Self::Transport(TransportError::Io(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<PreconditionError> for Error {
    fn from(e: PreconditionError) -> Self {
        Self::Precondition(e)
    }
}

/// A convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
