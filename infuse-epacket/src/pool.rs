//! Packet buffer pools.
//!
//! Buffers are owned values checked out of a fixed-size MPMC free list.
//! Payload bytes grow forward from a headroom reservation sized for the
//! worst-case framing of the owning interface; header bytes are prepended
//! into the headroom when the frame is assembled. Dropping a buffer returns
//! it to its pool.

use crate::error::{EpacketError, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use infuse_proto::Deadline;

/// An owned packet buffer with explicit headroom.
#[derive(Debug)]
pub struct PacketBuf {
    data: Vec<u8>,
    /// Start of the valid region. Prepends move this backward.
    front: usize,
    /// Payload bytes live in `data[headroom..]`; `front == headroom` until a
    /// header is prepended.
    headroom: usize,
    capacity: usize,
    home: Option<Sender<PacketBuf>>,
}

impl PacketBuf {
    pub fn detached(capacity: usize, headroom: usize) -> Self {
        assert!(headroom <= capacity);
        let mut data = Vec::with_capacity(capacity);
        data.resize(headroom, 0);
        PacketBuf {
            data,
            front: headroom,
            headroom,
            capacity,
            home: None,
        }
    }

    /// Bytes still appendable before the buffer is full.
    pub fn tailroom(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn headroom_left(&self) -> usize {
        self.front
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.headroom..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.headroom..]
    }

    pub fn payload_len(&self) -> usize {
        self.data.len() - self.headroom
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.tailroom() {
            return Err(EpacketError::PayloadTooLarge {
                got: self.payload_len() + bytes.len(),
                max: self.capacity - self.headroom,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Writes `bytes` immediately before the current front.
    ///
    /// Panics if the headroom reservation is exceeded; headroom is sized by
    /// the pool for the interface's own framing, so an overrun is a logic
    /// error, not an input error.
    pub fn prepend(&mut self, bytes: &[u8]) {
        assert!(bytes.len() <= self.front, "headroom exceeded");
        self.front -= bytes.len();
        self.data[self.front..self.front + bytes.len()].copy_from_slice(bytes);
    }

    /// The assembled wire image: prepended headers plus payload.
    pub fn wire(&self) -> &[u8] {
        &self.data[self.front..]
    }

    /// Resets to an empty payload with full headroom.
    pub fn reset(&mut self) {
        self.data.truncate(self.headroom);
        self.data[..self.headroom].fill(0);
        self.front = self.headroom;
    }

    /// An un-pooled copy for retransmission after ownership of `self` passes
    /// to a transport.
    pub fn clone_for_retransmit(&self) -> PacketBuf {
        PacketBuf {
            data: self.data.clone(),
            front: self.front,
            headroom: self.headroom,
            capacity: self.capacity,
            home: None,
        }
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            let mut returned = PacketBuf {
                data: std::mem::take(&mut self.data),
                front: self.headroom,
                headroom: self.headroom,
                capacity: self.capacity,
                home: None,
            };
            returned.reset();
            // A full or disconnected pool just lets the allocation die.
            let _ = home.try_send(returned);
        }
    }
}

/// Fixed-population free list of packet buffers.
pub struct PacketPool {
    tx: Sender<PacketBuf>,
    rx: Receiver<PacketBuf>,
    capacity: usize,
    headroom: usize,
}

impl PacketPool {
    pub fn new(count: usize, capacity: usize, headroom: usize) -> Self {
        let (tx, rx) = bounded(count);
        for _ in 0..count {
            tx.send(PacketBuf::detached(capacity, headroom))
                .expect("sizing the pool we just created");
        }
        PacketPool {
            tx,
            rx,
            capacity,
            headroom,
        }
    }

    /// Payload capacity of every buffer in this pool.
    pub fn buf_payload_capacity(&self) -> usize {
        self.capacity - self.headroom
    }

    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Checks a buffer out, waiting up to `deadline`.
    pub fn acquire(&self, deadline: Deadline) -> Result<PacketBuf> {
        let got = match deadline.timeout() {
            Some(d) if d.is_zero() => self.rx.try_recv().ok(),
            Some(d) => self.rx.recv_timeout(d).ok(),
            None => self.rx.recv().ok(),
        };
        match got {
            Some(mut buf) => {
                buf.home = Some(self.tx.clone());
                Ok(buf)
            }
            None => Err(EpacketError::NoBuffer),
        }
    }
}
