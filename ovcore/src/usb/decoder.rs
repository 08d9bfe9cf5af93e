// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The USB packet decoder (C10).
//!
//! Interprets a single sniffed raw USB packet (PID byte first), tracks
//! frame/microframe numbering across SOFs, verifies the data CRC, and
//! reconstructs an absolute, wrap-corrected timestamp. This module does
//! not itself know about capture-record framing or session arming — that
//! is [`crate::usb::sniffer::SnifferHandler`]'s job; this module only
//! turns `(ts, payload, flags)` into a decoded [`Event`].

use crate::wire::{wire_enum, WireEnum};

wire_enum! {
    /// The low nibble of a USB packet's first byte.
    ///
    /// Values not listed here (notably `0x0`) have no assigned meaning;
    /// [`Pid::from_wire_value`] returns `None` for them, which the decoder
    /// maps to [`EventKind::Unknown`].
    pub enum Pid : u8 {
        /// OUT token.
        Out = 0x1,
        /// ACK handshake.
        Ack = 0x2,
        /// DATA0 data packet.
        Data0 = 0x3,
        /// PING token.
        Ping = 0x4,
        /// Start-of-frame.
        Sof = 0x5,
        /// NYET handshake.
        Nyet = 0x6,
        /// DATA2 data packet.
        Data2 = 0x7,
        /// Split-transaction token.
        Split = 0x8,
        /// IN token.
        In = 0x9,
        /// NAK handshake.
        Nak = 0xA,
        /// DATA1 data packet.
        Data1 = 0xB,
        /// PRE token / ERR handshake (context-dependent on the bus).
        PreErr = 0xC,
        /// SETUP token.
        Setup = 0xD,
        /// STALL handshake.
        Stall = 0xE,
        /// MDATA data packet (used by split/high-bandwidth transactions).
        Mdata = 0xF,
    }
}

/// The result of checking a DATA* packet's trailing CRC16 against its
/// payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrcStatus {
    /// The packet was too short to contain a CRC; no check was performed.
    NotChecked,
    /// The computed CRC matched the trailing two bytes.
    Ok,
    /// The computed CRC did not match; see the accompanying
    /// [`Annotation::CrcMismatch`] on the emitted event.
    Mismatch,
}

/// A non-fatal annotation attached to a decoded event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Annotation {
    /// A DATA* packet's CRC16 did not match its payload.
    CrcMismatch,
    /// An SOF's frame number did not continue the expected microframe
    /// sequence after a full 8-microframe cycle.
    WtfSubframe,
    /// An SOF's frame number did not match the frame number the decoder
    /// was tracking mid-microframe-sequence.
    WtfFrameno,
}

/// A decoded USB link-layer event.
#[derive(Debug)]
pub struct Event<'a> {
    /// Absolute timestamp, in 60 MHz ticks, wrap-corrected against prior
    /// events from the same decoder.
    pub absolute_ts: u64,
    /// The capture record's raw flags byte (see §3's flags bitfield).
    pub flags: u8,
    /// The decoded packet kind and its kind-specific fields.
    pub kind: EventKind,
    /// The raw packet bytes, PID byte first (empty for a zero-length
    /// capture record).
    pub payload: &'a [u8],
    /// Non-fatal decode-time annotations (CRC mismatches, subframe
    /// tracking loss). Never suppresses event delivery.
    pub annotations: Vec<Annotation>,
}

/// The decoded kind of a USB link-layer event, with its kind-specific
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// The capture record carried no packet bytes at all.
    Empty,
    /// The first byte's two nibbles were not complements of each other.
    MalformedPid { raw: u8 },
    /// A token or data packet that was shorter than its kind requires.
    Runt { pid: Pid },
    /// Start-of-frame.
    Sof { frame_number: u16 },
    /// OUT/IN/SETUP/PING token.
    Token { pid: Pid, addr: u8, endp: u8 },
    /// DATA0/DATA1/DATA2/MDATA data packet.
    Data { pid: Pid, crc: CrcStatus },
    /// ACK/NAK/STALL/NYET handshake.
    Handshake { pid: Pid },
    /// PRE token / ERR handshake.
    PreErr,
    /// Split-transaction token.
    Split,
    /// A syntactically valid PID with no further meaning assigned here.
    Unknown { raw: u8 },
}

/// A consumer of decoded USB events, registered with the device
/// orchestrator via `register_sink`.
///
/// Invoked synchronously on the reader thread; implementations must be
/// non-blocking or fast, per §5's shared-resources note.
pub trait UsbEventSink: Send {
    /// Delivers one decoded event.
    fn on_event(&mut self, event: &Event);
}

/// Computes the USB data-packet CRC16: polynomial `0x8005` (the low 16
/// bits of the spec's `0x18005`), reflected, initial value `0xFFFF`,
/// final XOR `0xFFFF`.
pub fn crc16_usb(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc ^ 0xFFFF
}

const TS_ROLL_CYCLES: u64 = 1 << 24;

/// Per-session decoder state: frame/microframe tracking and timestamp
/// wrap correction.
pub struct Decoder {
    highspeed: bool,
    frameno: Option<u16>,
    subframe: Option<u8>,
    ts_base: u64,
    last_ts_pkt: u32,
}

impl Decoder {
    /// Creates a fresh decoder. `highspeed` enables microframe (subframe)
    /// tracking between SOFs; full/low-speed captures never populate
    /// `EventKind::Sof`'s subframe-adjacent state.
    pub fn new(highspeed: bool) -> Self {
        Self {
            highspeed,
            frameno: None,
            subframe: None,
            ts_base: 0,
            last_ts_pkt: 0,
        }
    }

    /// Decodes one raw USB packet captured at hardware timestamp `ts`
    /// (24 significant bits) with capture-record `flags`.
    pub fn decode<'a>(&mut self, ts: u32, buf: &'a [u8], flags: u8) -> Event<'a> {
        if ts < self.last_ts_pkt {
            self.ts_base += TS_ROLL_CYCLES;
        }
        self.last_ts_pkt = ts;
        let absolute_ts = self.ts_base + ts as u64;

        let mut annotations = Vec::new();
        let kind = self.decode_kind(buf, &mut annotations);

        Event {
            absolute_ts,
            flags,
            kind,
            payload: buf,
            annotations,
        }
    }

    fn decode_kind(&mut self, buf: &[u8], annotations: &mut Vec<Annotation>) -> EventKind {
        if buf.is_empty() {
            return EventKind::Empty;
        }

        let raw = buf[0];
        let nibble = raw & 0xF;
        if (raw >> 4) ^ 0xF != nibble {
            return EventKind::MalformedPid { raw };
        }

        let pid = match Pid::from_wire_value(nibble) {
            Some(pid) => pid,
            None => return EventKind::Unknown { raw },
        };

        match pid {
            Pid::Sof => {
                if buf.len() < 3 {
                    return EventKind::Runt { pid };
                }
                let frame_number = buf[1] as u16 | ((buf[2] as u16 & 0x07) << 8);
                self.track_subframe(frame_number, annotations);
                EventKind::Sof { frame_number }
            }
            Pid::Out | Pid::In | Pid::Setup | Pid::Ping => {
                if buf.len() < 3 {
                    return EventKind::Runt { pid };
                }
                let addr = buf[1] & 0x7F;
                let endp = ((buf[2] & 0x7) << 1) | (buf[1] >> 7);
                EventKind::Token { pid, addr, endp }
            }
            Pid::Data0 | Pid::Data1 | Pid::Data2 => {
                let crc = self.check_data_crc(buf);
                if crc == CrcStatus::Mismatch {
                    annotations.push(Annotation::CrcMismatch);
                }
                EventKind::Data { pid, crc }
            }
            Pid::Mdata => EventKind::Data {
                pid,
                crc: CrcStatus::NotChecked,
            },
            Pid::Ack | Pid::Nak | Pid::Stall | Pid::Nyet => EventKind::Handshake { pid },
            Pid::PreErr => EventKind::PreErr,
            Pid::Split => EventKind::Split,
        }
    }

    fn check_data_crc(&self, buf: &[u8]) -> CrcStatus {
        if buf.len() <= 2 {
            return CrcStatus::NotChecked;
        }
        let payload = &buf[1..buf.len() - 2];
        let computed = crc16_usb(payload);
        let on_wire = buf[buf.len() - 2] as u16 | (buf[buf.len() - 1] as u16) << 8;
        if computed == on_wire {
            CrcStatus::Ok
        } else {
            CrcStatus::Mismatch
        }
    }

    fn track_subframe(&mut self, frame_number: u16, annotations: &mut Vec<Annotation>) {
        match self.frameno {
            None => {
                self.subframe = None;
            }
            Some(prev) => match self.subframe {
                None => {
                    if frame_number == (prev + 1) % 256 {
                        self.subframe = if self.highspeed { Some(0) } else { None };
                    }
                }
                Some(sub) => {
                    let next = sub + 1;
                    if next == 8 {
                        if frame_number == (prev + 1) % 256 {
                            self.subframe = Some(0);
                        } else {
                            annotations.push(Annotation::WtfSubframe);
                            self.subframe = None;
                        }
                    } else if prev != frame_number {
                        annotations.push(Annotation::WtfFrameno);
                        self.subframe = None;
                    } else {
                        self.subframe = Some(next);
                    }
                }
            },
        }
        self.frameno = Some(frame_number);
    }
}
