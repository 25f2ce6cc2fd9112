//! The logger-to-transport bridge: committed blocks leave as TDF frames.

use infuse_epacket::keys::SymmetricKey;
use infuse_epacket::loopback;
use infuse_epacket::{
    Auth, FrameFormat, InterfaceConfig, KeyScope, KeyStore, PacketInterface, ReceiveHandler,
    RxMetadata,
};
use infuse_proto::{Deadline, DeviceId, EpochTime, FixedEpoch, InterfaceId, PayloadType, TdfId};
use infuse_tdf::{parse_block, EpacketBackend, TdfLoggerSet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Recorder {
    frames: Mutex<Vec<(RxMetadata, Vec<u8>)>>,
}

impl ReceiveHandler for Recorder {
    fn on_frame(&self, _iface: &PacketInterface, meta: &RxMetadata, payload: &[u8]) {
        self.frames.lock().push((meta.clone(), payload.to_vec()));
    }
}

#[test]
fn committed_blocks_stream_as_frames() {
    let _ = tracing_subscriber::fmt::try_init();
    let keys = Arc::new(KeyStore::new(
        SymmetricKey::new([1; 32]),
        SymmetricKey::new([2; 32]),
    ));

    let (tx_transport, _tctl, tx_wire) = loopback::endpoint("loop", FrameFormat::BLUETOOTH, 256);
    let sender = Arc::new(PacketInterface::new(
        InterfaceConfig {
            id: InterfaceId(0),
            device: DeviceId(0xd00d),
            tx_buffers: 4,
        },
        Box::new(tx_transport),
        keys.clone(),
        Arc::new(FixedEpoch(EpochTime::from_seconds(9))),
    ));

    let (rx_transport, _rctl, _rx_wire) = loopback::endpoint("loop", FrameFormat::BLUETOOTH, 256);
    let receiver = Arc::new(PacketInterface::new(
        InterfaceConfig {
            id: InterfaceId(1),
            device: DeviceId(0xfeed),
            tx_buffers: 4,
        },
        Box::new(rx_transport),
        keys,
        Arc::new(FixedEpoch(EpochTime::ZERO)),
    ));
    let recorder = Arc::new(Recorder::default());
    receiver.register_receive_handler(recorder.clone());
    receiver.receive(Deadline::Forever);

    let mut set = TdfLoggerSet::new();
    let mask = set.register(
        "epacket",
        Box::new(EpacketBackend::new(sender, KeyScope::Device, 64)),
    );
    let logger = set.logger(0).unwrap().clone();

    for i in 0..5u8 {
        set.log(mask, TdfId::new(0x70), EpochTime::ZERO, &[i; 17]);
    }
    set.flush(mask).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while logger.committed_blocks() < logger.current_block() {
        assert!(Instant::now() < deadline, "commit worker stalled");
        std::thread::sleep(Duration::from_millis(5));
    }

    let frames = tx_wire.drain();
    assert_eq!(frames.len(), logger.current_block() as usize);

    // Re-inject the first frame and confirm it decodes back to our records.
    receiver.inject_rx(&frames[0], None, infuse_epacket::Address::Broadcast);
    let received = recorder.frames.lock();
    let (meta, payload) = &received[0];
    assert_eq!(meta.auth, Auth::Device);
    assert_eq!(meta.payload_type(), Some(PayloadType::Tdf));

    let block = parse_block(payload).unwrap();
    assert_eq!(block.index_low, 0);
    let records = block.records(&|_| Some(17)).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].payload, &[0u8; 17][..]);
    assert_eq!(records[1].payload, &[1u8; 17][..]);
}
