//! In-process loopback transport.
//!
//! Two cross-wired endpoints backed by channels, with explicit pumping so
//! tests stay deterministic. The send path is byte-exact: what a peer
//! receives is the wire image the transport was handed.

use crate::error::Result;
use crate::frame::FrameFormat;
use crate::interface::{Address, PacketInterface, Transport};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// External up/down control over a loopback endpoint.
#[derive(Debug, Clone)]
pub struct LoopbackControl {
    up: Arc<AtomicBool>,
}

impl LoopbackControl {
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

pub struct LoopbackTransport {
    name: &'static str,
    format: FrameFormat,
    mtu: usize,
    up: Arc<AtomicBool>,
    outbound: Sender<Vec<u8>>,
}

impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn format(&self) -> FrameFormat {
        self.format
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
        // Unbounded channel: a disconnected peer just drops the frame,
        // matching a cable pulled mid-send.
        let _ = self.outbound.send(wire.to_vec());
        Ok(())
    }
}

/// Captured traffic of one endpoint, deliverable into any interface.
pub struct LoopbackWire {
    rx: Receiver<Vec<u8>>,
}

impl LoopbackWire {
    /// Delivers every pending frame into `target`'s RX path. Returns the
    /// number delivered.
    pub fn pump_into(&self, target: &PacketInterface) -> usize {
        let mut delivered = 0;
        while let Ok(frame) = self.rx.try_recv() {
            target.inject_rx(&frame, Some(-40), Address::Broadcast);
            delivered += 1;
        }
        delivered
    }

    /// Drains pending frames without delivering them.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            out.push(frame);
        }
        out
    }
}

/// Builds one loopback endpoint: the transport to register, a control
/// handle, and the captured wire side.
pub fn endpoint(
    name: &'static str,
    format: FrameFormat,
    mtu: usize,
) -> (LoopbackTransport, LoopbackControl, LoopbackWire) {
    let (tx, rx) = unbounded();
    let up = Arc::new(AtomicBool::new(true));
    (
        LoopbackTransport {
            name,
            format,
            mtu,
            up: up.clone(),
            outbound: tx,
        },
        LoopbackControl { up },
        LoopbackWire { rx },
    )
}
