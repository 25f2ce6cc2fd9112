//! Key material and 24-bit key identifiers.
//!
//! Two symmetric keys exist per device: the network key (broadcast-readable
//! within an Infuse network) and the device key (unicast to and from the
//! cloud). Each is named on the wire by a 24-bit identifier derived from a
//! CRC-32 over the key material, so a receiver can pick the right key
//! without trial decryption.

use crate::error::{EpacketError, Result};
use infuse_proto::KeyId;
use parking_lot::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;

const KEY_ID_CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Which key a TX caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    Network,
    Device,
}

/// Authentication outcome attached to every received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// Decrypted and verified under the network key.
    Network,
    /// Decrypted and verified under the device key.
    Device,
    /// Carried in the clear (key-id advertisements only).
    Unencrypted,
    /// Unknown key id or tag verification failure. No plaintext exists.
    Failure,
}

impl Auth {
    pub fn is_verified(self) -> bool {
        matches!(self, Auth::Network | Auth::Device)
    }
}

/// A 256-bit symmetric key. Debug output never shows the material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub fn new(material: [u8; KEY_LEN]) -> Self {
        SymmetricKey(material)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Full CRC-32 over the material. The GATT identity tuple carries all
    /// four bytes; frames carry the truncated [`SymmetricKey::identifier`].
    pub fn checksum(&self) -> u32 {
        KEY_ID_CRC.checksum(&self.0)
    }

    /// 24-bit identifier: [`SymmetricKey::checksum`], truncated.
    pub fn identifier(&self) -> KeyId {
        KeyId::new(self.checksum())
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

struct Keys {
    network: SymmetricKey,
    device: SymmetricKey,
    network_id: KeyId,
    device_id: KeyId,
}

/// Read-mostly store for the two live keys.
///
/// Key material is fixed after boot in firmware; hosted builds may rotate,
/// which swaps both the key and its identifier in one write.
pub struct KeyStore {
    inner: RwLock<Keys>,
}

impl KeyStore {
    pub fn new(network: SymmetricKey, device: SymmetricKey) -> Self {
        let network_id = network.identifier();
        let device_id = device.identifier();
        tracing::info!(
            network_id = %hex::encode(network_id.to_wire()),
            device_id = %hex::encode(device_id.to_wire()),
            "key store initialised"
        );
        KeyStore {
            inner: RwLock::new(Keys {
                network,
                device,
                network_id,
                device_id,
            }),
        }
    }

    pub fn network_key_id(&self) -> KeyId {
        self.inner.read().network_id
    }

    pub fn device_key_id(&self) -> KeyId {
        self.inner.read().device_id
    }

    /// The key and identifier a TX path should use for `scope`.
    pub fn select(&self, scope: KeyScope) -> (SymmetricKey, KeyId) {
        let keys = self.inner.read();
        match scope {
            KeyScope::Network => (keys.network.clone(), keys.network_id),
            KeyScope::Device => (keys.device.clone(), keys.device_id),
        }
    }

    /// Resolves an inbound key identifier, or `UnknownKey`.
    pub fn lookup(&self, id: KeyId) -> Result<(SymmetricKey, Auth)> {
        let keys = self.inner.read();
        if id == keys.network_id {
            Ok((keys.network.clone(), Auth::Network))
        } else if id == keys.device_id {
            Ok((keys.device.clone(), Auth::Device))
        } else {
            Err(EpacketError::UnknownKey(id))
        }
    }

    pub fn rotate_network(&self, key: SymmetricKey) {
        let id = key.identifier();
        let mut keys = self.inner.write();
        tracing::info!(old = %keys.network_id, new = %id, "network key rotated");
        keys.network = key;
        keys.network_id = id;
    }

    pub fn rotate_device(&self, key: SymmetricKey) {
        let id = key.identifier();
        let mut keys = self.inner.write();
        tracing::info!(old = %keys.device_id, new = %id, "device key rotated");
        keys.device = key;
        keys.device_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> SymmetricKey {
        SymmetricKey::new([fill; KEY_LEN])
    }

    #[test]
    fn identifiers_are_24_bit_and_stable() {
        let k = key(0x5a);
        let id = k.identifier();
        assert_eq!(id.0 & !KeyId::MASK, 0);
        assert_eq!(id, key(0x5a).identifier());
        assert_ne!(id, key(0x5b).identifier());
    }

    #[test]
    fn lookup_by_id() {
        let store = KeyStore::new(key(1), key(2));
        let (_, auth) = store.lookup(store.network_key_id()).unwrap();
        assert_eq!(auth, Auth::Network);
        let (_, auth) = store.lookup(store.device_key_id()).unwrap();
        assert_eq!(auth, Auth::Device);
        assert!(matches!(
            store.lookup(KeyId::new(0x123456)),
            Err(EpacketError::UnknownKey(_))
        ));
    }

    #[test]
    fn rotation_swaps_identifier() {
        let store = KeyStore::new(key(1), key(2));
        let before = store.network_key_id();
        store.rotate_network(key(3));
        assert_ne!(store.network_key_id(), before);
        assert!(store.lookup(before).is_err());
    }
}
