//! Serial transport: sync-framed ePackets over a byte stream.
//!
//! Wire shape: `0xD5 0xCA`, little-endian u16 frame length, then the
//! unversioned frame. The header carries no checksum of its own; garbage is
//! caught by the AEAD tag, and a garbled length simply forces a resync scan
//! for the next sync pair.

use crate::error::Result;
use crate::frame::FrameFormat;
use crate::interface::{Address, Transport};
use infuse_proto::constants::{SERIAL_SYNC, TAG_LEN};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct SerialTransport<W: Write + Send> {
    writer: Mutex<W>,
    up: Arc<AtomicBool>,
    mtu: usize,
}

impl<W: Write + Send> SerialTransport<W> {
    pub fn new(writer: W, mtu: usize) -> (Self, Arc<AtomicBool>) {
        let up = Arc::new(AtomicBool::new(true));
        (
            SerialTransport {
                writer: Mutex::new(writer),
                up: up.clone(),
                mtu,
            },
            up,
        )
    }
}

impl<W: Write + Send> Transport for SerialTransport<W> {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn format(&self) -> FrameFormat {
        FrameFormat::SERIAL
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn max_payload(&self) -> usize {
        if self.up.load(Ordering::SeqCst) {
            self.mtu
        } else {
            0
        }
    }

    fn send(&self, wire: &[u8], _address: &Address) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(wire)?;
        writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeframeState {
    Sync0,
    Sync1,
    LenLow,
    LenHigh { low: u8 },
    Body { remaining: usize },
}

/// Incremental scanner turning a serial byte stream back into frames.
///
/// Feed it whatever the UART produced; it emits each complete frame without
/// the sync + length header. Lengths beyond `max_frame` are treated as line
/// noise and trigger a resync.
#[derive(Debug)]
pub struct SerialDeframer {
    state: DeframeState,
    frame: Vec<u8>,
    max_frame: usize,
}

impl SerialDeframer {
    pub fn new(mtu: usize) -> Self {
        SerialDeframer {
            state: DeframeState::Sync0,
            frame: Vec::new(),
            max_frame: FrameFormat::SERIAL.ad_len()
                + infuse_proto::constants::NONCE_LEN
                + mtu
                + TAG_LEN,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut complete = Vec::new();
        for &b in bytes {
            self.state = match self.state {
                DeframeState::Sync0 => {
                    if b == SERIAL_SYNC[0] {
                        DeframeState::Sync1
                    } else {
                        DeframeState::Sync0
                    }
                }
                DeframeState::Sync1 => {
                    if b == SERIAL_SYNC[1] {
                        DeframeState::LenLow
                    } else if b == SERIAL_SYNC[0] {
                        // 0xD5 0xD5 0xCA still syncs.
                        DeframeState::Sync1
                    } else {
                        DeframeState::Sync0
                    }
                }
                DeframeState::LenLow => DeframeState::LenHigh { low: b },
                DeframeState::LenHigh { low } => {
                    let len = u16::from_le_bytes([low, b]) as usize;
                    if len == 0 || len > self.max_frame {
                        tracing::debug!(len, "implausible serial frame length, resyncing");
                        DeframeState::Sync0
                    } else {
                        self.frame.clear();
                        self.frame.reserve(len);
                        DeframeState::Body { remaining: len }
                    }
                }
                DeframeState::Body { remaining } => {
                    self.frame.push(b);
                    if remaining == 1 {
                        complete.push(std::mem::take(&mut self.frame));
                        DeframeState::Sync0
                    } else {
                        DeframeState::Body {
                            remaining: remaining - 1,
                        }
                    }
                }
            };
        }
        complete
    }
}
