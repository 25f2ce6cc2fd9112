//! Per-transport packet interfaces.
//!
//! A [`PacketInterface`] owns one transport, its buffer pool, the monotonic
//! send sequence, the RX arming state, and the registered receive handler
//! and state listeners. The encrypt-and-send path lives here; the validated
//! receive path lives in [`crate::dispatch`].

use crate::crypto::{AeadSuite, ChaChaSuite};
use crate::dispatch::{self, DefaultHandler, ReceiveHandler};
use crate::error::{EpacketError, Result};
use crate::frame::{FrameFlags, FrameFormat, FrameInfo, NonceParts};
use crate::keys::{KeyScope, KeyStore};
use crate::pool::{PacketBuf, PacketPool};
use infuse_proto::constants::{SERIAL_HEADER_LEN, SERIAL_SYNC, TAG_LEN};
use infuse_proto::{Deadline, DeviceId, EpochSource, InterfaceId, KeyId, PayloadType, Sequence};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Transport-specific destination of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Whoever is listening (advertising, serial peer).
    Broadcast,
    Socket(std::net::SocketAddr),
    Bluetooth([u8; 6]),
}

/// The driver side of an interface.
///
/// `max_payload` reflects live state and is zero while the transport is
/// down; `mtu` is the fixed capability used to size buffer pools.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    fn format(&self) -> FrameFormat;
    fn mtu(&self) -> usize;
    fn max_payload(&self) -> usize;
    fn send(&self, wire: &[u8], address: &Address) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub id: InterfaceId,
    pub device: DeviceId,
    /// TX pool population.
    pub tx_buffers: usize,
}

/// Handle returned by [`PacketInterface::register_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u32);

struct StateListener {
    handle: ListenerHandle,
    callback: Box<dyn Fn(usize) + Send>,
}

/// RX arming holds: a shared counter of unbounded holds plus the furthest
/// timed deadline. Concurrent holds are OR'd (longest wins); `NoWait`
/// releases one unbounded hold, so RX only disarms once no caller holds it.
/// Timed holds lapse on their own.
#[derive(Debug, Default)]
struct RxArm {
    forever_holds: u32,
    until: Option<Instant>,
}

impl RxArm {
    fn apply(&mut self, deadline: Deadline) {
        match deadline {
            Deadline::NoWait => {
                self.forever_holds = self.forever_holds.saturating_sub(1);
            }
            Deadline::Forever => {
                self.forever_holds = self.forever_holds.saturating_add(1);
            }
            Deadline::After(d) => {
                let candidate = Instant::now() + d;
                self.until = Some(match self.until {
                    Some(existing) if existing > candidate => existing,
                    _ => candidate,
                });
            }
        }
    }

    fn is_armed(&self) -> bool {
        self.forever_holds > 0 || self.until.is_some_and(|t| t > Instant::now())
    }
}

/// Per-interface counters. Fire-and-forget paths record here instead of
/// propagating errors.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    pub tx_frames: AtomicU32,
    pub tx_no_buffer: AtomicU32,
    pub tx_interface_down: AtomicU32,
    pub tx_errors: AtomicU32,
    pub rx_frames: AtomicU32,
    pub rx_auth_failures: AtomicU32,
    pub rx_unknown_key: AtomicU32,
    pub rx_malformed: AtomicU32,
    pub rx_unarmed: AtomicU32,
}

impl InterfaceStats {
    pub fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// An outbound frame under construction.
pub struct TxFrame {
    buf: PacketBuf,
    meta: Option<TxMetadata>,
    max_payload: usize,
}

#[derive(Debug, Clone)]
struct TxMetadata {
    auth: KeyScope,
    flags: FrameFlags,
    payload_type: u8,
    address: Address,
}

impl TxFrame {
    pub fn set_metadata(
        &mut self,
        auth: KeyScope,
        flags: FrameFlags,
        payload_type: PayloadType,
        address: Address,
    ) {
        self.meta = Some(TxMetadata {
            auth,
            flags,
            payload_type: payload_type.to_wire(),
            address,
        });
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buf.payload_len() + bytes.len() > self.max_payload {
            return Err(EpacketError::PayloadTooLarge {
                got: self.buf.payload_len() + bytes.len(),
                max: self.max_payload,
            });
        }
        self.buf.append(bytes)
    }

    pub fn payload(&self) -> &[u8] {
        self.buf.payload()
    }
}

/// One registered transport with its pools, sequence, and listeners.
pub struct PacketInterface {
    id: InterfaceId,
    device: DeviceId,
    transport: Box<dyn Transport>,
    pool: PacketPool,
    sequence: AtomicU16,
    keys: Arc<KeyStore>,
    epoch: Arc<dyn EpochSource>,
    suite: Box<dyn AeadSuite>,
    handler: RwLock<Arc<dyn ReceiveHandler>>,
    state_listeners: Mutex<Vec<StateListener>>,
    next_handle: AtomicU32,
    rx_arm: Mutex<RxArm>,
    pub stats: InterfaceStats,
}

impl PacketInterface {
    pub fn new(
        config: InterfaceConfig,
        transport: Box<dyn Transport>,
        keys: Arc<KeyStore>,
        epoch: Arc<dyn EpochSource>,
    ) -> Self {
        let fmt = transport.format();
        let serial = if fmt.serial_header {
            SERIAL_HEADER_LEN
        } else {
            0
        };
        let headroom = serial + fmt.ad_len() + infuse_proto::constants::NONCE_LEN;
        let capacity = headroom + transport.mtu() + TAG_LEN;
        let pool = PacketPool::new(config.tx_buffers, capacity, headroom);

        PacketInterface {
            id: config.id,
            device: config.device,
            transport,
            pool,
            sequence: AtomicU16::new(0),
            keys,
            epoch,
            suite: Box::new(ChaChaSuite),
            handler: RwLock::new(Arc::new(DefaultHandler)),
            state_listeners: Mutex::new(Vec::new()),
            next_handle: AtomicU32::new(0),
            rx_arm: Mutex::new(RxArm::default()),
            stats: InterfaceStats::default(),
        }
    }

    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn format(&self) -> FrameFormat {
        self.transport.format()
    }

    /// Current usable payload size; zero while the transport is down.
    pub fn max_payload(&self) -> usize {
        self.transport.max_payload()
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub(crate) fn suite(&self) -> &dyn AeadSuite {
        self.suite.as_ref()
    }

    /// Reserves a TX buffer, waiting up to `deadline` for the pool.
    pub fn alloc_tx(&self, deadline: Deadline) -> Result<TxFrame> {
        match self.pool.acquire(deadline) {
            Ok(buf) => Ok(TxFrame {
                buf,
                meta: None,
                max_payload: self.transport.mtu(),
            }),
            Err(e) => {
                InterfaceStats::bump(&self.stats.tx_no_buffer);
                Err(e)
            }
        }
    }

    /// Encrypts, frames, and hands `frame` to the transport driver.
    ///
    /// Fails synchronously with `InterfaceDown` when the transport is not
    /// ready; never blocks indefinitely.
    pub fn queue(&self, frame: TxFrame) -> Result<()> {
        let TxFrame { mut buf, meta, .. } = frame;
        let meta = meta.ok_or(EpacketError::Malformed("tx metadata not set"))?;

        let max = self.transport.max_payload();
        if max == 0 {
            InterfaceStats::bump(&self.stats.tx_interface_down);
            return Err(EpacketError::InterfaceDown);
        }
        if buf.payload_len() > max {
            return Err(EpacketError::PayloadTooLarge {
                got: buf.payload_len(),
                max,
            });
        }

        let sequence = Sequence(self.sequence.fetch_add(1, Ordering::Relaxed));
        let epoch = self.epoch.epoch_now();
        let nonce = NonceParts {
            device_lower: self.device.lower(),
            epoch_seconds: epoch.seconds(),
            sequence,
            entropy: rand::thread_rng().gen(),
        };

        let unencrypted = meta.flags.contains(FrameFlags::UNENCRYPTED);
        let key_id = if unencrypted {
            KeyId::new(0)
        } else {
            self.keys.select(meta.auth).1
        };

        let info = FrameInfo {
            payload_type: meta.payload_type,
            flags: meta.flags,
            key_id,
            device_upper: self.device.upper(),
            nonce,
        };

        let fmt = self.transport.format();
        let (ad, ad_len) = info.ad_bytes(fmt);

        if !unencrypted {
            let (key, _) = self.keys.select(meta.auth);
            let nonce_bytes = nonce.to_bytes();
            let tag = self
                .suite
                .seal(&key, &nonce_bytes, &ad[..ad_len], buf.payload_mut())?;
            buf.append(&tag)?;
        }

        buf.prepend(&nonce.to_bytes());
        buf.prepend(&ad[..ad_len]);
        if fmt.serial_header {
            let frame_len = buf.wire().len() as u16;
            let mut header = [0u8; SERIAL_HEADER_LEN];
            header[..2].copy_from_slice(&SERIAL_SYNC);
            header[2..].copy_from_slice(&frame_len.to_le_bytes());
            buf.prepend(&header);
        }

        match self.transport.send(buf.wire(), &meta.address) {
            Ok(()) => {
                InterfaceStats::bump(&self.stats.tx_frames);
                tracing::trace!(
                    interface = %self.id,
                    sequence = %sequence,
                    len = buf.wire().len(),
                    "frame queued"
                );
                Ok(())
            }
            Err(e) => {
                InterfaceStats::bump(&self.stats.tx_errors);
                Err(e)
            }
        }
    }

    /// Advertises the current device and network key identifiers in the
    /// clear, so peers can pick the right key before first contact.
    pub fn send_key_ids(&self) -> Result<()> {
        let mut frame = self.alloc_tx(Deadline::NoWait)?;
        frame.set_metadata(
            KeyScope::Network,
            FrameFlags::UNENCRYPTED,
            PayloadType::KeyIds,
            Address::Broadcast,
        );
        frame.append(&self.keys.device_key_id().to_wire())?;
        frame.append(&self.keys.network_key_id().to_wire())?;
        self.queue(frame)
    }

    /// Arms RX for at least `deadline`. Concurrent holds are OR'd (longest
    /// wins); `NoWait` releases one unbounded hold, disarming only when no
    /// other caller still holds the interface. Timed holds expire on their
    /// own.
    pub fn receive(&self, deadline: Deadline) {
        self.rx_arm.lock().apply(deadline);
    }

    pub fn is_rx_armed(&self) -> bool {
        self.rx_arm.lock().is_armed()
    }

    /// Entry point for transport drivers delivering one raw frame.
    pub fn inject_rx(&self, wire: &[u8], rssi: Option<i8>, address: Address) {
        if !self.is_rx_armed() {
            InterfaceStats::bump(&self.stats.rx_unarmed);
            return;
        }
        dispatch::process(self, wire, rssi, address);
    }

    pub fn register_receive_handler(&self, handler: Arc<dyn ReceiveHandler>) {
        *self.handler.write() = handler;
    }

    pub(crate) fn handler(&self) -> Arc<dyn ReceiveHandler> {
        self.handler.read().clone()
    }

    /// Registers a state listener; it is invoked with the current
    /// `max_payload` on every transition (`0` means down).
    pub fn register_callback(&self, callback: Box<dyn Fn(usize) + Send>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.state_listeners
            .lock()
            .push(StateListener { handle, callback });
        handle
    }

    /// Required on shutdown in hosted builds; harmless to skip in firmware.
    pub fn deregister_callback(&self, handle: ListenerHandle) {
        self.state_listeners.lock().retain(|l| l.handle != handle);
    }

    /// Called by driver glue after the transport's state changed.
    pub fn raise_state_change(&self) {
        let max = self.transport.max_payload();
        tracing::debug!(interface = %self.id, max_payload = max, "interface state change");
        for listener in self.state_listeners.lock().iter() {
            (listener.callback)(max);
        }
    }
}
