//! Bluetooth carrier helpers.
//!
//! The Bluetooth stack itself is an external collaborator; this module only
//! owns the byte layouts Infuse defines on top of it: the advertising
//! service-data element that carries an unversioned frame, and the 68-byte
//! identity tuple readable from the GATT service.

use crate::error::{EpacketError, Result};
use infuse_proto::constants::{BT_IDENTITY_LEN, BT_SERVICE_UUID16};
use infuse_proto::KeyId;

/// AD element type for 16-bit-UUID service data.
const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

/// Wraps a frame's wire image in a service-data AD element under the
/// Infuse service UUID: `len | 0x16 | uuid16 LE | frame`.
pub fn advertising_payload(frame_wire: &[u8]) -> Result<Vec<u8>> {
    // AD length is a single byte covering type + uuid + frame.
    let content_len = 1 + 2 + frame_wire.len();
    if content_len > u8::MAX as usize {
        return Err(EpacketError::PayloadTooLarge {
            got: frame_wire.len(),
            max: u8::MAX as usize - 3,
        });
    }
    let mut out = Vec::with_capacity(1 + content_len);
    out.push(content_len as u8);
    out.push(AD_TYPE_SERVICE_DATA_16);
    out.extend_from_slice(&BT_SERVICE_UUID16.to_le_bytes());
    out.extend_from_slice(frame_wire);
    Ok(out)
}

/// Extracts the frame bytes back out of a scanned service-data element.
/// Returns `None` for elements that are not Infuse service data.
pub fn frame_from_advertising(ad_element: &[u8]) -> Option<&[u8]> {
    let (&len, rest) = ad_element.split_first()?;
    let content = rest.get(..len as usize)?;
    let (&ad_type, content) = content.split_first()?;
    if ad_type != AD_TYPE_SERVICE_DATA_16 {
        return None;
    }
    let (uuid, frame) = content.split_at_checked(2)?;
    if uuid != BT_SERVICE_UUID16.to_le_bytes() {
        return None;
    }
    Some(frame)
}

/// The tuple a GATT read of the identity characteristic returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattIdentity {
    pub cloud_public_key: [u8; 32],
    pub device_public_key: [u8; 32],
    /// Full 32-bit network key checksum (untruncated, unlike the 24-bit id
    /// in frame associated data).
    pub network_id: u32,
}

impl GattIdentity {
    /// The 24-bit form of [`GattIdentity::network_id`] that frames carry.
    pub fn network_key_id(&self) -> KeyId {
        KeyId::new(self.network_id)
    }

    pub fn to_bytes(&self) -> [u8; BT_IDENTITY_LEN] {
        let mut out = [0u8; BT_IDENTITY_LEN];
        out[0..32].copy_from_slice(&self.cloud_public_key);
        out[32..64].copy_from_slice(&self.device_public_key);
        out[64..68].copy_from_slice(&self.network_id.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BT_IDENTITY_LEN {
            return Err(EpacketError::Malformed("identity tuple length"));
        }
        Ok(GattIdentity {
            cloud_public_key: bytes[0..32].try_into().unwrap(),
            device_public_key: bytes[32..64].try_into().unwrap(),
            network_id: u32::from_le_bytes(bytes[64..68].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertising_round_trip() {
        let frame = vec![0xabu8; 40];
        let ad = advertising_payload(&frame).unwrap();
        assert_eq!(ad[0] as usize, ad.len() - 1);
        assert_eq!(ad[1], AD_TYPE_SERVICE_DATA_16);
        assert_eq!(&ad[2..4], &[0x74, 0xfc]);
        assert_eq!(frame_from_advertising(&ad).unwrap(), &frame[..]);
    }

    #[test]
    fn foreign_service_data_is_ignored() {
        let mut ad = advertising_payload(&[1, 2, 3]).unwrap();
        ad[2] = 0x00;
        assert_eq!(frame_from_advertising(&ad), None);
        // Wrong AD type.
        let mut ad = advertising_payload(&[1, 2, 3]).unwrap();
        ad[1] = 0xff;
        assert_eq!(frame_from_advertising(&ad), None);
    }

    #[test]
    fn oversized_frame_rejected() {
        assert!(advertising_payload(&[0u8; 300]).is_err());
    }

    #[test]
    fn identity_tuple_round_trip() {
        let identity = GattIdentity {
            cloud_public_key: [1; 32],
            device_public_key: [2; 32],
            network_id: 0x9123_4567,
        };
        let bytes = identity.to_bytes();
        assert_eq!(bytes.len(), 68);
        // All four bytes of the network id are on the wire.
        assert_eq!(&bytes[64..68], &0x9123_4567u32.to_le_bytes());
        assert_eq!(GattIdentity::from_bytes(&bytes).unwrap(), identity);
        assert_eq!(identity.network_key_id(), KeyId::new(0x23_4567));
        assert!(GattIdentity::from_bytes(&bytes[..60]).is_err());
    }

    #[test]
    fn identity_matches_key_material() {
        use crate::keys::SymmetricKey;

        let network = SymmetricKey::new([9; 32]);
        let identity = GattIdentity {
            cloud_public_key: [0; 32],
            device_public_key: [0; 32],
            network_id: network.checksum(),
        };
        // The tuple's 32-bit id reduces to the 24-bit id frames advertise.
        assert_eq!(identity.network_key_id(), network.identifier());
    }
}
