//! Wire-level constants shared by every transport.

/// ePacket frame version understood by this build.
pub const EPACKET_VERSION: u8 = 0;

/// AEAD authentication tag length appended to every encrypted frame.
pub const TAG_LEN: usize = 16;

/// Nonce length: device_id_lower(4) + epoch_seconds(4) + sequence(2) + entropy(2).
pub const NONCE_LEN: usize = 12;

/// Associated data length with a leading version byte.
pub const AD_LEN_VERSIONED: usize = 11;

/// Associated data length without a version byte.
pub const AD_LEN_UNVERSIONED: usize = 10;

/// Serial transport sync bytes, immediately before the LE u16 frame length.
pub const SERIAL_SYNC: [u8; 2] = [0xd5, 0xca];

/// Serial sync + length header size.
pub const SERIAL_HEADER_LEN: usize = 4;

/// First payload-type value available for customer extension.
pub const PAYLOAD_TYPE_CUSTOM_BASE: u8 = 128;

/// 16-bit service UUID carried in Bluetooth advertising service data.
pub const BT_SERVICE_UUID16: u16 = 0xfc74;

/// GATT command characteristic UUID.
pub const BT_CHAR_COMMAND: [u8; 16] = bt_char_uuid(0xaa01);
/// GATT data characteristic UUID.
pub const BT_CHAR_DATA: [u8; 16] = bt_char_uuid(0xaa02);
/// GATT logging characteristic UUID (optional on a given build).
pub const BT_CHAR_LOGGING: [u8; 16] = bt_char_uuid(0xaa03);

/// Length of the GATT identity read: cloud_pub(32) + device_pub(32) + network_id(4).
pub const BT_IDENTITY_LEN: usize = 68;

const fn bt_char_uuid(short: u16) -> [u8; 16] {
    // Base fc74xxxx-58cc-4c15-9935-2a7bd6e8de7c with the characteristic
    // id spliced into bytes 2..4 (big-endian UUID text order).
    [
        0xfc, 0x74, (short >> 8) as u8, short as u8, 0x58, 0xcc, 0x4c, 0x15, 0x99, 0x35, 0x2a,
        0x7b, 0xd6, 0xe8, 0xde, 0x7c,
    ]
}

/// Seconds between the Unix epoch and 2020-01-01T00:00:00Z.
pub const GPS_EPOCH_UNIX_OFFSET: u64 = 1_577_836_800;
