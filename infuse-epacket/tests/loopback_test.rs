use infuse_epacket::loopback;
use infuse_epacket::{
    Address, Auth, DefaultHandler, FrameFlags, FrameFormat, InterfaceConfig, KeyScope, KeyStore,
    PacketInterface, ReceiveHandler, RxMetadata,
};
use infuse_proto::{Deadline, DeviceId, EpochTime, FixedEpoch, InterfaceId, KeyId, PayloadType};
use parking_lot::Mutex;
use std::sync::Arc;

fn keystore(seed: u8) -> Arc<KeyStore> {
    Arc::new(KeyStore::new(
        infuse_epacket::keys::SymmetricKey::new([seed; 32]),
        infuse_epacket::keys::SymmetricKey::new([seed.wrapping_add(1); 32]),
    ))
}

fn interface(
    id: u8,
    device: u64,
    keys: Arc<KeyStore>,
) -> (
    Arc<PacketInterface>,
    loopback::LoopbackControl,
    loopback::LoopbackWire,
) {
    let (transport, control, wire) = loopback::endpoint("loop", FrameFormat::BLUETOOTH, 256);
    let iface = Arc::new(PacketInterface::new(
        InterfaceConfig {
            id: InterfaceId(id),
            device: DeviceId(device),
            tx_buffers: 4,
        },
        Box::new(transport),
        keys,
        Arc::new(FixedEpoch(EpochTime::from_seconds(1_000))),
    ));
    (iface, control, wire)
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(RxMetadata, Vec<u8>)>>,
}

impl Recorder {
    fn take(&self) -> Vec<(RxMetadata, Vec<u8>)> {
        std::mem::take(&mut self.events.lock())
    }
}

impl ReceiveHandler for Recorder {
    fn on_frame(&self, _iface: &PacketInterface, meta: &RxMetadata, payload: &[u8]) {
        self.events.lock().push((meta.clone(), payload.to_vec()));
    }
}

#[test]
fn echo_round_trip_is_bit_exact() {
    let _ = tracing_subscriber::fmt::try_init();
    let keys = keystore(1);
    let (a, _actl, a_wire) = interface(0, 0x1111_2222_3333_4444, keys.clone());
    let (b, _bctl, b_wire) = interface(1, 0x5555_6666_7777_8888, keys);

    let recorder = Arc::new(Recorder::default());
    a.register_receive_handler(recorder.clone());
    b.register_receive_handler(Arc::new(DefaultHandler));
    a.receive(Deadline::Forever);
    b.receive(Deadline::Forever);

    for round in 0..2u8 {
        let mut frame = a.alloc_tx(Deadline::NoWait).unwrap();
        frame.set_metadata(
            KeyScope::Network,
            FrameFlags::empty(),
            PayloadType::EchoReq,
            Address::Broadcast,
        );
        frame.append(b"hello").unwrap();
        a.queue(frame).unwrap();

        assert_eq!(a_wire.pump_into(&b), 1);
        assert_eq!(b_wire.pump_into(&a), 1);

        let events = recorder.take();
        assert_eq!(events.len(), 1);
        let (meta, payload) = &events[0];
        assert_eq!(meta.auth, Auth::Network);
        assert_eq!(meta.payload_type(), Some(PayloadType::EchoRsp));
        assert_eq!(payload, b"hello");
        // The response rides the responder's own sequence counter.
        assert_eq!(meta.sequence.0, round as u16);
    }
}

#[test]
fn tx_sequence_is_strictly_monotonic() {
    let keys = keystore(3);
    let (a, _ctl, wire) = interface(0, 42, keys);

    for _ in 0..10 {
        let mut frame = a.alloc_tx(Deadline::NoWait).unwrap();
        frame.set_metadata(
            KeyScope::Device,
            FrameFlags::empty(),
            PayloadType::Tdf,
            Address::Broadcast,
        );
        frame.append(&[0; 8]).unwrap();
        a.queue(frame).unwrap();
    }

    let frames = wire.drain();
    assert_eq!(frames.len(), 10);
    let mut last = None;
    for raw in frames {
        let parsed = infuse_epacket::frame::parse(FrameFormat::BLUETOOTH, &raw).unwrap();
        let seq = parsed.info.nonce.sequence.0;
        if let Some(prev) = last {
            assert_eq!(seq, prev + 1, "sequence must increase by one per frame");
        }
        last = Some(seq);
    }
}

#[test]
fn tampered_frame_reports_failure_without_plaintext() {
    let keys = keystore(5);
    let (a, _actl, a_wire) = interface(0, 7, keys.clone());
    let (b, _bctl, _b_wire) = interface(1, 8, keys);

    let recorder = Arc::new(Recorder::default());
    b.register_receive_handler(recorder.clone());
    b.receive(Deadline::Forever);

    let mut frame = a.alloc_tx(Deadline::NoWait).unwrap();
    frame.set_metadata(
        KeyScope::Network,
        FrameFlags::empty(),
        PayloadType::Tdf,
        Address::Broadcast,
    );
    frame.append(b"secret sample").unwrap();
    a.queue(frame).unwrap();

    let mut frames = a_wire.drain();
    let mut wire_bytes = frames.pop().unwrap();
    // Flip one associated-data bit (the flags field).
    wire_bytes[1] ^= 0x80;
    b.inject_rx(&wire_bytes, None, Address::Broadcast);

    let events = recorder.take();
    assert_eq!(events.len(), 1);
    let (meta, payload) = &events[0];
    assert_eq!(meta.auth, Auth::Failure);
    assert!(payload.is_empty(), "plaintext must never escape a bad tag");
    assert_eq!(
        b.stats
            .rx_auth_failures
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[test]
fn unknown_key_id_delivers_metadata_only() {
    let (a, _actl, a_wire) = interface(0, 7, keystore(6));
    let (b, _bctl, _b_wire) = interface(1, 8, keystore(9));

    let recorder = Arc::new(Recorder::default());
    b.register_receive_handler(recorder.clone());
    b.receive(Deadline::Forever);

    let mut frame = a.alloc_tx(Deadline::NoWait).unwrap();
    frame.set_metadata(
        KeyScope::Device,
        FrameFlags::empty(),
        PayloadType::RpcCmd,
        Address::Broadcast,
    );
    frame.append(b"cmd").unwrap();
    a.queue(frame).unwrap();
    a_wire.pump_into(&b);

    let events = recorder.take();
    assert_eq!(events.len(), 1);
    let (meta, payload) = &events[0];
    assert_eq!(meta.auth, Auth::Failure);
    assert_eq!(meta.payload_type(), Some(PayloadType::RpcCmd));
    assert!(payload.is_empty());
    assert_ne!(meta.key_id, KeyId::new(0));
    assert_eq!(
        b.stats
            .rx_unknown_key
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[test]
fn key_id_advertisement_is_readable_without_keys() {
    let sender_keys = keystore(11);
    let (a, _actl, a_wire) = interface(0, 7, sender_keys.clone());
    let (b, _bctl, _b_wire) = interface(1, 8, keystore(20));

    let recorder = Arc::new(Recorder::default());
    b.register_receive_handler(recorder.clone());
    b.receive(Deadline::Forever);

    a.send_key_ids().unwrap();
    a_wire.pump_into(&b);

    let events = recorder.take();
    assert_eq!(events.len(), 1);
    let (meta, payload) = &events[0];
    assert_eq!(meta.auth, Auth::Unencrypted);
    assert_eq!(meta.payload_type(), Some(PayloadType::KeyIds));
    assert_eq!(payload.len(), 6);
    let device_id = KeyId::from_wire(payload[0..3].try_into().unwrap());
    let network_id = KeyId::from_wire(payload[3..6].try_into().unwrap());
    assert_eq!(device_id, sender_keys.device_key_id());
    assert_eq!(network_id, sender_keys.network_key_id());
}

#[test]
fn interface_down_fails_synchronously() {
    let (a, ctl, _wire) = interface(0, 7, keystore(13));

    let listener_state = Arc::new(Mutex::new(Vec::new()));
    let sink = listener_state.clone();
    let handle = a.register_callback(Box::new(move |max| sink.lock().push(max)));

    ctl.set_up(false);
    a.raise_state_change();

    let mut frame = a.alloc_tx(Deadline::NoWait).unwrap();
    frame.set_metadata(
        KeyScope::Network,
        FrameFlags::empty(),
        PayloadType::Tdf,
        Address::Broadcast,
    );
    assert!(matches!(
        a.queue(frame),
        Err(infuse_epacket::EpacketError::InterfaceDown)
    ));

    ctl.set_up(true);
    a.raise_state_change();
    assert_eq!(*listener_state.lock(), vec![0, 256]);

    a.deregister_callback(handle);
    a.raise_state_change();
    assert_eq!(listener_state.lock().len(), 2);
}

#[test]
fn unarmed_interface_drops_rx() {
    let keys = keystore(15);
    let (a, _actl, a_wire) = interface(0, 7, keys.clone());
    let (b, _bctl, _b_wire) = interface(1, 8, keys);

    let recorder = Arc::new(Recorder::default());
    b.register_receive_handler(recorder.clone());

    let mut frame = a.alloc_tx(Deadline::NoWait).unwrap();
    frame.set_metadata(
        KeyScope::Network,
        FrameFlags::empty(),
        PayloadType::Tdf,
        Address::Broadcast,
    );
    frame.append(&[1, 2, 3]).unwrap();
    a.queue(frame).unwrap();
    a_wire.pump_into(&b);

    assert!(recorder.take().is_empty());
    assert_eq!(
        b.stats
            .rx_unarmed
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );

    // Two callers hold RX unbounded; releasing one must not disarm the
    // other's hold.
    b.receive(Deadline::Forever);
    b.receive(Deadline::Forever);
    b.receive(Deadline::NoWait);
    assert!(b.is_rx_armed());
    b.receive(Deadline::NoWait);
    assert!(!b.is_rx_armed());

    // A release from an unbounded caller leaves a concurrent timed hold
    // in place until it lapses on its own.
    b.receive(Deadline::Forever);
    b.receive(Deadline::from_millis(50));
    b.receive(Deadline::NoWait);
    assert!(b.is_rx_armed());
    std::thread::sleep(std::time::Duration::from_millis(80));
    assert!(!b.is_rx_armed());
}
