//! Validated receive path.
//!
//! Transport drivers hand raw frames to [`process`]; it parses the framing,
//! resolves the key, opens the AEAD, and delivers exactly one callback per
//! frame to the interface's registered handler. Authentication failures
//! still deliver header metadata, never plaintext.
//!
//! Replay refusal is deliberately not implemented here: the sequence number
//! is part of the delivered metadata so a handler that needs a replay
//! window can keep one.

use crate::frame::{self, FrameFlags};
use crate::interface::{Address, InterfaceStats, PacketInterface};
use crate::keys::{Auth, KeyScope};
use infuse_proto::{Deadline, InterfaceId, KeyId, PayloadType, Sequence};

/// Header metadata for one received frame.
#[derive(Debug, Clone)]
pub struct RxMetadata {
    pub interface: InterfaceId,
    pub auth: Auth,
    /// Raw payload-type byte; see [`RxMetadata::payload_type`].
    pub payload_type_raw: u8,
    pub flags: FrameFlags,
    pub sequence: Sequence,
    pub rssi: Option<i8>,
    pub address: Address,
    pub key_id: KeyId,
}

impl RxMetadata {
    pub fn payload_type(&self) -> Option<PayloadType> {
        PayloadType::from_wire(self.payload_type_raw)
    }
}

/// Installed per interface; invoked once per validated RX frame.
///
/// `payload` is empty whenever `meta.auth` is [`Auth::Failure`].
pub trait ReceiveHandler: Send + Sync {
    fn on_frame(&self, iface: &PacketInterface, meta: &RxMetadata, payload: &[u8]);
}

pub(crate) fn process(iface: &PacketInterface, wire: &[u8], rssi: Option<i8>, address: Address) {
    let parsed = match frame::parse(iface.format(), wire) {
        Ok(p) => p,
        Err(e) => {
            InterfaceStats::bump(&iface.stats.rx_malformed);
            tracing::debug!(interface = %iface.id(), error = %e, "rx frame rejected");
            return;
        }
    };
    let info = parsed.info;

    let mut meta = RxMetadata {
        interface: iface.id(),
        auth: Auth::Failure,
        payload_type_raw: info.payload_type,
        flags: info.flags,
        sequence: info.nonce.sequence,
        rssi,
        address,
        key_id: info.key_id,
    };

    if !parsed.has_tag {
        // Cleartext is only ever a key-id advertisement; anything else in
        // this shape is a spoofing attempt.
        if meta.payload_type() == Some(PayloadType::KeyIds) {
            meta.auth = Auth::Unencrypted;
            InterfaceStats::bump(&iface.stats.rx_frames);
            iface
                .handler()
                .on_frame(iface, &meta, &wire[parsed.payload_start..parsed.payload_end]);
        } else {
            InterfaceStats::bump(&iface.stats.rx_malformed);
        }
        return;
    }

    let (key, auth) = match iface.keys().lookup(info.key_id) {
        Ok(found) => found,
        Err(_) => {
            InterfaceStats::bump(&iface.stats.rx_unknown_key);
            iface.handler().on_frame(iface, &meta, &[]);
            return;
        }
    };

    let ad_len = iface.format().ad_len();
    let mut payload = wire[parsed.payload_start..parsed.payload_end].to_vec();
    let tag: [u8; infuse_proto::constants::TAG_LEN] =
        wire[parsed.payload_end..].try_into().expect("parse sized the tag");
    let nonce = info.nonce.to_bytes();

    match iface
        .suite()
        .open(&key, &nonce, &wire[..ad_len], &mut payload, &tag)
    {
        Ok(()) => {
            meta.auth = auth;
            InterfaceStats::bump(&iface.stats.rx_frames);
            iface.handler().on_frame(iface, &meta, &payload);
        }
        Err(_) => {
            InterfaceStats::bump(&iface.stats.rx_auth_failures);
            tracing::debug!(
                interface = %iface.id(),
                key_id = %info.key_id,
                sequence = %info.nonce.sequence,
                "rx authentication failure"
            );
            iface.handler().on_frame(iface, &meta, &[]);
        }
    }
}

/// Counts, logs, and answers echo requests. Installed on every interface
/// until replaced.
#[derive(Debug, Default)]
pub struct DefaultHandler;

impl ReceiveHandler for DefaultHandler {
    fn on_frame(&self, iface: &PacketInterface, meta: &RxMetadata, payload: &[u8]) {
        if !meta.auth.is_verified() {
            if meta.auth == Auth::Unencrypted {
                tracing::debug!(interface = %meta.interface, "peer key ids received");
            }
            return;
        }

        match meta.payload_type() {
            Some(PayloadType::EchoReq) => {
                let scope = match meta.auth {
                    Auth::Network => KeyScope::Network,
                    Auth::Device => KeyScope::Device,
                    // is_verified() above excludes the rest.
                    _ => return,
                };
                let Ok(mut rsp) = iface.alloc_tx(Deadline::NoWait) else {
                    return;
                };
                rsp.set_metadata(
                    scope,
                    FrameFlags::empty(),
                    PayloadType::EchoRsp,
                    meta.address.clone(),
                );
                if rsp.append(payload).is_ok() {
                    if let Err(e) = iface.queue(rsp) {
                        tracing::debug!(error = %e, "echo response dropped");
                    }
                }
            }
            Some(other) => {
                tracing::trace!(
                    interface = %meta.interface,
                    payload_type = %other,
                    len = payload.len(),
                    "frame without installed handler"
                );
            }
            None => {
                tracing::debug!(
                    interface = %meta.interface,
                    raw = meta.payload_type_raw,
                    "unassigned payload type"
                );
            }
        }
    }
}
