use infuse_epacket::serial::{SerialDeframer, SerialTransport};
use infuse_epacket::{
    Address, Auth, FrameFlags, FrameFormat, InterfaceConfig, KeyScope, KeyStore, PacketInterface,
    ReceiveHandler, RxMetadata,
};
use infuse_proto::{Deadline, DeviceId, EpochTime, FixedEpoch, InterfaceId, PayloadType};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(RxMetadata, Vec<u8>)>>,
}

impl ReceiveHandler for Recorder {
    fn on_frame(&self, _iface: &PacketInterface, meta: &RxMetadata, payload: &[u8]) {
        self.events.lock().push((meta.clone(), payload.to_vec()));
    }
}

#[test]
fn serial_wire_round_trip() {
    let _ = tracing_subscriber::fmt::try_init();
    let keys = Arc::new(KeyStore::new(
        infuse_epacket::keys::SymmetricKey::new([4; 32]),
        infuse_epacket::keys::SymmetricKey::new([5; 32]),
    ));

    let line = SharedBuf::default();
    let (transport, _up) = SerialTransport::new(line.clone(), 128);
    let sender = PacketInterface::new(
        InterfaceConfig {
            id: InterfaceId(0),
            device: DeviceId(0xAABB_CCDD_EEFF_0011),
            tx_buffers: 2,
        },
        Box::new(transport),
        keys.clone(),
        Arc::new(FixedEpoch(EpochTime::from_seconds(77))),
    );

    // Receiver reuses the serial frame format but never writes.
    let (rx_transport, _rup) = SerialTransport::new(SharedBuf::default(), 128);
    let receiver = PacketInterface::new(
        InterfaceConfig {
            id: InterfaceId(1),
            device: DeviceId(2),
            tx_buffers: 2,
        },
        Box::new(rx_transport),
        keys,
        Arc::new(FixedEpoch(EpochTime::ZERO)),
    );
    let recorder = Arc::new(Recorder::default());
    receiver.register_receive_handler(recorder.clone());
    receiver.receive(Deadline::Forever);

    let mut frame = sender.alloc_tx(Deadline::NoWait).unwrap();
    frame.set_metadata(
        KeyScope::Device,
        FrameFlags::empty(),
        PayloadType::Tdf,
        Address::Broadcast,
    );
    frame.append(b"block bytes").unwrap();
    sender.queue(frame).unwrap();

    // Pull the raw UART bytes through the deframer, with line noise around
    // the frame.
    let mut stream = vec![0xff, 0x00];
    stream.extend_from_slice(&line.0.lock());
    stream.push(0x7e);

    let mut deframer = SerialDeframer::new(128);
    let frames = deframer.push(&stream);
    assert_eq!(frames.len(), 1);
    assert_eq!(FrameFormat::SERIAL.ad_len(), 10);

    receiver.inject_rx(&frames[0], None, Address::Broadcast);
    let events = recorder.events.lock();
    assert_eq!(events.len(), 1);
    let (meta, payload) = &events[0];
    assert_eq!(meta.auth, Auth::Device);
    assert_eq!(meta.payload_type(), Some(PayloadType::Tdf));
    assert_eq!(payload, b"block bytes");
}
