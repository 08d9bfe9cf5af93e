// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! The device orchestrator (C12).
//!
//! Wires the packet dispatcher, handlers, and register facades together
//! over a [`Transport`], owns the reader thread's lifecycle, and exposes
//! the capture-session control loop.

use crate::dispatcher::{HandlerKind, PacketDispatcher};
use crate::error::{Error, PreconditionError, Result};
use crate::handlers::{DummyHandler, IoHandler, LfsrHandler, SdramHandler};
use crate::mmio::{ByteIo, Mmio, RegisterTable};
use crate::transport::{Interface, Transport};
use crate::ulpi::{self, FuncCtlFlags, UlpiIo, UsbSpeed};
use crate::usb::decoder::UsbEventSink;
use crate::usb::sniffer::SnifferHandler;
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Size of the device's on-board SDRAM capture ring.
pub const RAM_SIZE_BYTES: u32 = 16 * 1024 * 1024;

/// What a `run_capture` halt callback wants to happen next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureHalt {
    /// Keep capturing.
    Continue,
    /// Stop normally; `run_capture` returns `Ok(())`.
    Done,
    /// Stop because the caller was interrupted (e.g. Ctrl-C);
    /// `run_capture` returns `Err(Error::CaptureInterrupted)`.
    Interrupted,
}

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Loads an FPGA bitstream onto the device. Treated as an opaque
/// collaborator; the real implementation lives outside this crate's
/// scope.
pub trait FpgaLoader: Send + Sync {
    /// Programs the FPGA with `bitstream`.
    fn configure(&self, bitstream: &[u8]) -> Result<()>;

    /// Returns whether the FPGA has already been configured this session.
    fn is_configured(&self) -> bool;
}

/// The [`ByteIo`] implementation backing [`Device::regs`] and
/// [`Device::ulpi_regs`]: single-byte transactions over the device's
/// synchronous I/O handler.
#[derive(Clone)]
pub struct IoByteAdapter {
    io: Arc<IoHandler>,
    timeout: Duration,
}

impl ByteIo for IoByteAdapter {
    fn read_byte(&self, addr: u16) -> Result<u8> {
        self.io.read(addr, self.timeout)
    }

    fn write_byte(&self, addr: u16, value: u8) -> Result<()> {
        self.io.write(addr, value, self.timeout)
    }
}

struct ReaderThread {
    stop: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<Error>>>,
    join: JoinHandle<()>,
}

/// The device's open/closed lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LifecycleState {
    Closed,
    Open,
}

/// A host-side handle to an analyzer device: register facades, capture
/// control, and the reader thread that backs both.
pub struct Device {
    transport: Arc<dyn Transport>,
    io: Arc<IoHandler>,
    regs: Mmio<IoByteAdapter>,
    ulpi_regs: Mmio<UlpiIo<IoByteAdapter>>,
    sniffer: Arc<Mutex<SnifferHandler>>,
    sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>>,
    fpga_loader: Arc<dyn FpgaLoader>,
    bitstream: Vec<u8>,
    state: Mutex<LifecycleState>,
    reader: Mutex<Option<ReaderThread>>,
}

impl Device {
    /// Builds a device over `transport`, using `register_map` for the
    /// main MMIO space and `bitstream` as the FPGA image `open` will load
    /// on first use. `highspeed` is forwarded to the USB decoder for
    /// microframe tracking.
    pub fn new(
        transport: Arc<dyn Transport>,
        register_map: RegisterTable,
        bitstream: Vec<u8>,
        fpga_loader: Arc<dyn FpgaLoader>,
        highspeed: bool,
    ) -> Result<Self> {
        let io = Arc::new(IoHandler::new(transport.clone()));
        let adapter = IoByteAdapter {
            io: io.clone(),
            timeout: DEFAULT_IO_TIMEOUT,
        };

        let ulpi_regs = ulpi::build_ulpi_facade(Arc::new(adapter.clone()), &register_map)?;
        let regs = Mmio::new(register_map, adapter);

        let sinks: Arc<Mutex<Vec<Box<dyn UsbEventSink>>>> = Arc::new(Mutex::new(Vec::new()));
        let sniffer = Arc::new(Mutex::new(SnifferHandler::new(highspeed, sinks.clone())));

        Ok(Self {
            transport,
            io,
            regs,
            ulpi_regs,
            sniffer,
            sinks,
            fpga_loader,
            bitstream,
            state: Mutex::new(LifecycleState::Closed),
            reader: Mutex::new(None),
        })
    }

    /// The device's main named-register facade.
    pub fn regs(&self) -> &Mmio<IoByteAdapter> {
        &self.regs
    }

    /// The ULPI transceiver's named-register facade.
    pub fn ulpi_regs(&self) -> &Mmio<UlpiIo<IoByteAdapter>> {
        &self.ulpi_regs
    }

    /// Attaches `sink` to receive decoded USB events. May be called at
    /// any time; takes effect on the next delivered record.
    pub fn register_sink(&self, sink: Box<dyn UsbEventSink>) {
        self.sinks.lock().unwrap().push(sink);
    }

    /// Opens the transport, loads the FPGA bitstream if needed, starts
    /// the reader thread, and programs the default LED mux state.
    /// Returns [`PreconditionError::AlreadyOpen`] if already open.
    pub fn open(&self, reconfigure_fpga: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state == LifecycleState::Open {
            return Err(Error::Precondition(PreconditionError::AlreadyOpen));
        }

        info!("opening device");
        self.transport.open()?;

        if reconfigure_fpga || !self.fpga_loader.is_configured() {
            self.fpga_loader.configure(&self.bitstream)?;
        }

        self.start_reader();

        // Default LED muxes: 0/1 show TX/RX activity, the rest are idle.
        self.regs.write("LEDS_MUX_0", 2)?;
        self.regs.write("LEDS_MUX_1", 2)?;

        *state = LifecycleState::Open;
        Ok(())
    }

    /// Stops the reader thread and closes the transport. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state == LifecycleState::Closed {
            return Ok(());
        }

        info!("closing device");
        self.stop_reader()?;
        self.transport.close();
        *state = LifecycleState::Closed;
        Ok(())
    }

    /// Programs an FPGA bitstream directly, bypassing the `open`
    /// lifecycle's own load-on-demand behavior.
    pub fn configure_fpga(&self, bitstream: &[u8]) -> Result<()> {
        self.fpga_loader.configure(bitstream)
    }

    /// Returns [`PreconditionError::NotOpen`] unless the device is
    /// currently open. Used by operations (such as [`Device::run_capture`])
    /// that require a live reader thread and transport.
    fn require_open(&self) -> Result<()> {
        if *self.state.lock().unwrap() != LifecycleState::Open {
            return Err(Error::Precondition(PreconditionError::NotOpen));
        }
        Ok(())
    }

    fn start_reader(&self) {
        let stop = Arc::new(AtomicBool::new(false));
        let fault = Arc::new(Mutex::new(None));

        let transport = self.transport.clone();
        let io = self.io.clone();
        let sniffer = self.sniffer.clone();

        let reader_stop = stop.clone();
        let reader_fault = fault.clone();

        let join = thread::spawn(move || {
            let mut dispatcher = PacketDispatcher::new(true);
            dispatcher.register(HandlerKind::Io(io));
            dispatcher.register(HandlerKind::Sdram(SdramHandler::new(sniffer.clone())));
            dispatcher.register(HandlerKind::Lfsr(LfsrHandler::new()));
            dispatcher.register(HandlerKind::Sniffer(sniffer));
            dispatcher.register(HandlerKind::Dummy(DummyHandler));

            let result = transport.read_stream(Interface::A, &mut |batch| {
                if let Err(e) = dispatcher.handle_incoming_bytes(batch) {
                    error!("reader thread fault: {}", e);
                    *reader_fault.lock().unwrap() = Some(e);
                    return true;
                }
                reader_stop.load(Ordering::Acquire)
            });

            if let Err(e) = result {
                error!("reader thread transport fault: {}", e);
                *reader_fault.lock().unwrap() = Some(e);
            } else if !reader_stop.load(Ordering::Acquire)
                && dispatcher.pending_len() > 0
                && reader_fault.lock().unwrap().is_none()
            {
                let e = Error::Protocol(crate::error::ProtocolError::Truncated);
                error!("reader thread fault: {}", e);
                *reader_fault.lock().unwrap() = Some(e);
            }
        });

        *self.reader.lock().unwrap() = Some(ReaderThread { stop, fault, join });
    }

    fn stop_reader(&self) -> Result<()> {
        let reader = self.reader.lock().unwrap().take();
        if let Some(reader) = reader {
            reader.stop.store(true, Ordering::Release);
            let _ = reader.join.join();
            if let Some(e) = reader.fault.lock().unwrap().take() {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Runs a capture session until `halt_cb(elapsed)` returns anything
    /// other than [`CaptureHalt::Continue`]. `stats_cb`, if present, is
    /// called once per poll tick with the elapsed duration. Always leaves
    /// the SDRAM ring and capture stream stopped on exit, whether by
    /// normal completion, cancellation, or error; per §5, a
    /// [`CaptureHalt::Interrupted`] halt is reported to the caller as
    /// [`Error::CaptureInterrupted`] rather than as success.
    pub fn run_capture(
        &self,
        speed: UsbSpeed,
        stats_period: Duration,
        mut halt_cb: impl FnMut(Duration) -> CaptureHalt,
        mut stats_cb: Option<&mut dyn FnMut(Duration)>,
    ) -> Result<()> {
        self.require_open()?;

        info!("starting capture at speed {:?}", speed);
        let start_result = self.start_capture(speed);
        if let Err(e) = start_result {
            self.ensure_capture_stopped()?;
            return Err(e);
        }

        let mut elapsed = Duration::ZERO;
        let outcome = loop {
            match halt_cb(elapsed) {
                CaptureHalt::Continue => {}
                CaptureHalt::Done => break Ok(()),
                CaptureHalt::Interrupted => break Err(Error::CaptureInterrupted),
            }
            if let Some(cb) = stats_cb.as_deref_mut() {
                cb(elapsed);
            }
            thread::sleep(stats_period);
            elapsed += stats_period;
        };

        self.ensure_capture_stopped()?;
        info!("capture stopped after {:?}", elapsed);
        outcome
    }

    fn start_capture(&self, speed: UsbSpeed) -> Result<()> {
        // Step 1: initialize the SDRAM ring to span the full device RAM,
        // with both GO bits deasserted.
        self.regs.write("SDRAM_SINK_RING_BASE", 0)?;
        self.regs.write("SDRAM_SINK_RING_END", RAM_SIZE_BYTES as u64)?;
        self.regs
            .write("SDRAM_HOST_READ_RING_BASE", 0)?;
        self.regs
            .write("SDRAM_HOST_READ_RING_END", RAM_SIZE_BYTES as u64)?;
        self.regs.write("SDRAM_SINK_GO", 0)?;
        self.regs.write("SDRAM_HOST_READ_GO", 0)?;

        // Step 2: program the transceiver for passive, non-driving sniffing
        // at the requested speed.
        let func_ctl = speed as u8
            | FuncCtlFlags::OPERATING_MODE_NON_DRIVING.bits()
            | FuncCtlFlags::PHY_POWERED.bits();
        self.ulpi_regs.write("FUNC_CTL", func_ctl as u64)?;

        // Step 3: start the SDRAM sink, the host-side read pump, and the
        // capture stream, in that order.
        self.regs.write("SDRAM_SINK_GO", 1)?;
        self.regs.write("SDRAM_HOST_READ_GO", 1)?;
        self.regs.write("CSTREAM_CFG", 1)?;

        Ok(())
    }

    /// Idempotently stops an in-progress (or already-stopped) capture:
    /// deasserts the SDRAM sink, host-read, and capture-stream enables.
    pub fn ensure_capture_stopped(&self) -> Result<()> {
        self.regs.write("SDRAM_SINK_GO", 0)?;
        self.regs.write("SDRAM_HOST_READ_GO", 0)?;
        self.regs.write("CSTREAM_CFG", 0)?;
        Ok(())
    }
}
