//! UDP transport: one versioned ePacket per datagram.
//!
//! The cloud endpoint is resolved once at startup. A socket bound to an
//! ephemeral port stays open for the life of the interface; the
//! `UDP_ALWAYS_RX` frame flag advertises that duplex capability to the
//! peer.

use crate::error::{EpacketError, Result};
use crate::frame::FrameFormat;
use crate::interface::{Address, PacketInterface, Transport};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
    mtu: usize,
    up: Arc<AtomicBool>,
}

impl UdpTransport {
    /// Binds an ephemeral local socket and resolves `peer` (DNS allowed)
    /// to its first address.
    pub fn connect(peer: &str, mtu: usize) -> Result<(Self, Arc<AtomicBool>)> {
        let peer = peer
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "peer did not resolve"))?;
        let bind = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        let up = Arc::new(AtomicBool::new(true));
        tracing::info!(%peer, "udp transport connected");
        Ok((
            UdpTransport {
                socket,
                peer,
                mtu,
                up: up.clone(),
            },
            up,
        ))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn try_clone_socket(&self) -> Result<UdpSocket> {
        Ok(self.socket.try_clone()?)
    }
}

impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn format(&self) -> FrameFormat {
        FrameFormat::UDP
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

    fn send(&self, wire: &[u8], address: &Address) -> Result<()> {
        let dest = match address {
            Address::Socket(addr) => *addr,
            Address::Broadcast => self.peer,
            Address::Bluetooth(_) => return Err(EpacketError::Malformed("bluetooth address on udp")),
        };
        self.socket.send_to(wire, dest)?;
        Ok(())
    }
}

/// Blocking receive loop feeding an interface; run on a dedicated thread.
///
/// Returns when the socket errors out (e.g. it was shut down).
pub fn rx_loop(socket: UdpSocket, iface: Arc<PacketInterface>) {
    let mut buf = vec![0u8; 2048];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                iface.inject_rx(&buf[..len], None, Address::Socket(from));
            }
            Err(e) => {
                tracing::warn!(error = %e, "udp rx loop terminating");
                return;
            }
        }
    }
}
