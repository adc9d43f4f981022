//! Integration tests for firmware upload over a simulated CAN link.

use {
    candrive_update::{
        Error, FaultFlag, FirmwareHeader, FirmwareImage, Link, LinkConfig, Message, MessageType,
        Phase, Result, Stack, TransferSession, crc32_stm, protocol::info::INFO_RESPONSE_SIZE,
    },
    std::{collections::VecDeque, time::Duration},
    tempfile::tempdir,
};

/// Classic CAN carries up to 7 payload bytes per ISO-TP frame.
const FRAME_PAYLOAD: usize = 7;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Device side of the link: reassembles requests and answers info requests
/// the way the firmware manager does.
struct SimulatedDevice {
    fault: FaultFlag,
    frames_left: usize,
    frames_sent: usize,
    fail_at_frame: Option<usize>,
    current: Option<Vec<u8>>,
    received: Vec<Message>,
    outbox: VecDeque<Vec<u8>>,
    answer_info: bool,
}

impl SimulatedDevice {
    fn new(fault: FaultFlag) -> Self {
        Self {
            fault,
            frames_left: 0,
            frames_sent: 0,
            fail_at_frame: None,
            current: None,
            received: Vec::new(),
            outbox: VecDeque::new(),
            answer_info: true,
        }
    }

    fn handle(&mut self, data: Vec<u8>) {
        let message = match Message::decode(&data) {
            Ok(message) => message,
            Err(e) => panic!("device rejected request: {e}"),
        };
        if message.message_type() == Some(MessageType::InfoRequest) && self.answer_info {
            self.outbox.push_back(info_record("v0.3.1"));
        }
        self.received.push(message);
    }

    fn of_type(&self, message_type: MessageType) -> Vec<&Message> {
        self.received
            .iter()
            .filter(|m| m.message_type() == Some(message_type))
            .collect()
    }
}

impl Stack for SimulatedDevice {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.frames_left = data.len().div_ceil(FRAME_PAYLOAD).max(1);
        self.current = Some(data.to_vec());
        Ok(())
    }

    fn transmitting(&self) -> bool {
        self.frames_left > 0
    }

    fn process(&mut self) -> Result<()> {
        if self.frames_left == 0 {
            return Ok(());
        }

        self.frames_sent += 1;
        if self.fail_at_frame == Some(self.frames_sent) {
            // Receiver stops sending flow control; the stack gives up
            self.fault.raise("timeout waiting for flow control");
            self.frames_left = 0;
            self.current = None;
            return Ok(());
        }

        self.frames_left -= 1;
        if self.frames_left == 0 {
            if let Some(data) = self.current.take() {
                self.handle(data);
            }
        }
        Ok(())
    }

    fn available(&self) -> bool {
        !self.outbox.is_empty()
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    fn sleep_time(&self) -> Duration {
        Duration::ZERO
    }
}

fn info_record(version: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(INFO_RESPONSE_SIZE);
    data.extend_from_slice(&0u32.to_le_bytes());
    let mut version = version.as_bytes().to_vec();
    version.resize(32, 0);
    data.extend_from_slice(&version);
    data.extend_from_slice(&2u32.to_le_bytes());
    let mut name = b"CANDriveApp".to_vec();
    name.resize(16, 0);
    data.extend_from_slice(&name);
    for word in [0x0032_0041u32, 0x3236_5104, 0x2033_4d39] {
        data.extend_from_slice(&word.to_le_bytes());
    }
    let mut sha = b"1f2e3d4".to_vec();
    sha.resize(14, 0);
    data.extend_from_slice(&sha);
    data
}

fn session(device: SimulatedDevice) -> TransferSession<Link<SimulatedDevice>> {
    let fault = device.fault.clone();
    let config = LinkConfig::default().with_poll_interval(Duration::ZERO);
    TransferSession::new(Link::with_config(device, fault, config))
}

fn stamped_image(payload: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; 12];
    image.extend_from_slice(payload);
    candrive_update::stamp(&image).unwrap()
}

#[test]
fn upgrade_over_segmented_link() {
    init_logger();

    let image = stamped_image(&[0xAA; 2500]);
    let mut session = session(SimulatedDevice::new(FaultFlag::new()));

    session.upgrade(&image, |_, _| {}).unwrap();
    assert_eq!(session.phase(), Phase::Completed);

    let device = session.transport().stack();
    let order: Vec<_> = device
        .received
        .iter()
        .filter_map(Message::message_type)
        .collect();
    assert_eq!(
        order,
        vec![
            MessageType::HeaderRequest,
            MessageType::DataRequest,
            MessageType::DataRequest,
            MessageType::DataRequest,
            MessageType::InfoRequest,
            MessageType::ResetRequest,
        ]
    );

    // Device-side check of the reassembled image
    let header = FirmwareHeader::from_bytes(&device.received[0].payload).unwrap();
    let streamed: Vec<u8> = device
        .of_type(MessageType::DataRequest)
        .iter()
        .flat_map(|m| m.payload.clone())
        .collect();
    assert_eq!(header.total_length as usize, streamed.len());
    assert_eq!(header.total_crc, crc32_stm(&streamed));
    assert_eq!(header.total_crc, crc32_stm(&[0xAA; 2500]));

    let info = session.device_info().unwrap();
    assert_eq!(info.version, "v0.3.1");
    assert_eq!(info.device_id, "3200413236510420334d39");
}

#[test]
fn fault_mid_transfer_leaves_device_running() {
    init_logger();

    let image = stamped_image(&[0x5A; 4 * 1024]);
    let mut device = SimulatedDevice::new(FaultFlag::new());
    // Header takes 4 frames, each full page 149; fail inside the third page
    device.fail_at_frame = Some(4 + 2 * 149 + 10);
    let mut session = session(device);

    let err = session.upgrade(&image, |_, _| {}).unwrap_err();
    match err {
        Error::AbortedTransfer {
            pages_sent,
            total_pages,
            source,
        } => {
            assert_eq!(pages_sent, 2);
            assert_eq!(total_pages, 4);
            assert!(matches!(*source, Error::TransportFault(_)));
        },
        other => panic!("unexpected error: {other:?}"),
    }

    let device = session.transport().stack();
    assert_eq!(device.of_type(MessageType::DataRequest).len(), 2);
    assert!(device.of_type(MessageType::ResetRequest).is_empty());
    assert_eq!(session.phase(), Phase::Aborted);
}

#[test]
fn session_recovers_after_fault() {
    init_logger();

    let mut device = SimulatedDevice::new(FaultFlag::new());
    device.fail_at_frame = Some(1);
    let mut session = session(device);

    // Fault while sending the request, no answer queued
    assert_eq!(session.query_info().unwrap(), None);

    // Flag is cleared at the start of the next request
    let info = session.query_info().unwrap().unwrap();
    assert_eq!(info.name, "CANDriveApp");
}

#[test]
fn late_reply_is_not_taken_as_new_identity() {
    init_logger();

    let image = stamped_image(&[0x42; 1500]);
    let mut device = SimulatedDevice::new(FaultFlag::new());
    // Answer to an earlier query that arrived after its timeout
    device.outbox.push_back(info_record("v0.2.9"));
    let mut session = session(device);

    session.upgrade(&image, |_, _| {}).unwrap();

    assert_eq!(session.device_info().unwrap().version, "v0.3.1");
    assert!(session.transport().stack().outbox.is_empty());
}

#[test]
fn info_query_times_out() {
    init_logger();

    let mut device = SimulatedDevice::new(FaultFlag::new());
    device.answer_info = false;
    let fault = device.fault.clone();
    let config = LinkConfig::default().with_poll_interval(Duration::from_millis(1));
    let mut session = TransferSession::new(Link::with_config(device, fault, config)).with_config(
        candrive_update::SessionConfig::default().with_response_timeout(Duration::from_millis(20)),
    );

    assert_eq!(session.query_info().unwrap(), None);
    assert!(session.device_info().is_none());
    assert_eq!(
        session.transport().stack().of_type(MessageType::InfoRequest).len(),
        1
    );
}

#[test]
fn stamp_file_then_upgrade() {
    init_logger();

    let dir = tempdir().unwrap();
    let path = dir.path().join("candrive_app.bin");
    let mut raw = vec![0x20, 0x00, 0x50, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];
    raw.extend((0..1500u32).map(|i| (i * 13 % 256) as u8));
    std::fs::write(&path, &raw).unwrap();

    let stamp = candrive_update::stamp_file(&path).unwrap();
    assert_eq!(stamp.size, 1500);

    let image = FirmwareImage::from_file(&path).unwrap();
    image.verify().unwrap();
    assert_eq!(&image.as_bytes()[..4], &raw[..4]);

    let mut session = session(SimulatedDevice::new(FaultFlag::new()));
    let mut reported = Vec::new();
    session
        .upgrade(image.as_bytes(), |sent, total| reported.push((sent, total)))
        .unwrap();

    assert_eq!(reported, vec![(1, 2), (2, 2)]);
    let device = session.transport().stack();
    let header = FirmwareHeader::from_bytes(&device.received[0].payload).unwrap();
    assert_eq!(header.total_crc, stamp.crc);
    assert_eq!(header.total_length, stamp.size);
}
