//! Send-path validation: PDU direction checks, payload limits, protocol
//! hand-off, and completion callbacks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use fieldbus::{
    InterfaceLink, NetworkConfig, NetworkError, NetworkManager, PumpWakeup, TransmitCompleteCallback,
    TransmitRequest, TransportProtocol,
};
use fieldbus_frame::{
    pgn, Destination, Frame, Identifier, Name, Priority, BROADCAST_ADDRESS,
};

fn fast_config() -> NetworkConfig {
    NetworkConfig {
        address_claim_contention_window: Duration::from_millis(20),
        ..NetworkConfig::default()
    }
}

fn test_name(identity: u32) -> Name {
    Name::builder()
        .identity_number(identity)
        .manufacturer_code(69)
        .arbitrary_address_capable(true)
        .build()
}

fn attached_network() -> Arc<NetworkManager> {
    let network = NetworkManager::new(fast_config());
    network.attach_interface(InterfaceLink::new(
        Arc::new(AtomicBool::new(true)),
        Arc::new(PumpWakeup::new()),
    ));
    network
}

fn claimed_internal(network: &Arc<NetworkManager>, identity: u32, preferred: u8) -> Arc<fieldbus::ControlFunction> {
    let ecu = network
        .create_internal_control_function(test_name(identity), preferred)
        .unwrap();
    let start = Instant::now();
    while !ecu.address_valid() && start.elapsed() < Duration::from_millis(500) {
        network.update();
        thread::sleep(Duration::from_millis(2));
    }
    assert!(ecu.address_valid(), "claim did not complete");
    ecu
}

fn known_external(network: &Arc<NetworkManager>, identity: u32, address: u8) -> Arc<fieldbus::ControlFunction> {
    let name = test_name(identity);
    let identifier = Identifier::encode(
        pgn::ADDRESS_CLAIM,
        Destination::Address(BROADCAST_ADDRESS),
        address,
        Priority::DEFAULT,
    )
    .unwrap();
    network.process_receive_frame(&Frame::new_extended(identifier, &name.to_le_bytes()).unwrap());
    network.update();
    network.control_function_at(address).unwrap()
}

#[test]
fn broadcast_of_destination_specific_pgn_is_rejected() {
    let network = attached_network();
    let ecu = claimed_internal(&network, 1, 0x1C);

    let err = network
        .send(0x00EA00, &[0x00, 0xEE, 0x00], &ecu, None, Priority::DEFAULT, None)
        .unwrap_err();
    assert!(matches!(err, NetworkError::BroadcastOfDestinationSpecificPgn(0x00EA00)));
}

#[test]
fn destination_on_broadcast_pgn_is_rejected() {
    let network = attached_network();
    let ecu = claimed_internal(&network, 2, 0x1C);
    let peer = known_external(&network, 3, 0x20);

    let err = network
        .send(0x00FEF1, &[0u8; 8], &ecu, Some(&peer), Priority::DEFAULT, None)
        .unwrap_err();
    assert!(matches!(err, NetworkError::DestinationOnBroadcastPgn(0x00FEF1)));
}

#[test]
fn payload_limits_are_enforced() {
    let network = attached_network();
    let ecu = claimed_internal(&network, 4, 0x1C);

    let err = network
        .send(0x00FEF1, &[], &ecu, None, Priority::DEFAULT, None)
        .unwrap_err();
    assert!(matches!(err, NetworkError::PayloadTooLong(0)));

    let oversized = vec![0u8; 1786];
    let err = network
        .send(0x00FEF1, &oversized, &ecu, None, Priority::DEFAULT, None)
        .unwrap_err();
    assert!(matches!(err, NetworkError::PayloadTooLong(1786)));
}

#[test]
fn multi_frame_payload_needs_a_transport_protocol() {
    let network = attached_network();
    let ecu = claimed_internal(&network, 5, 0x1C);

    let err = network
        .send(0x00FEF1, &[0u8; 9], &ecu, None, Priority::DEFAULT, None)
        .unwrap_err();
    assert!(matches!(err, NetworkError::NoTransportProtocolForLength(9)));
}

#[test]
fn unclaimed_source_cannot_send() {
    let network = attached_network();
    let ecu = network
        .create_internal_control_function(test_name(6), 0x1C)
        .unwrap();

    let err = network
        .send(0x00FEF1, &[0u8; 8], &ecu, None, Priority::DEFAULT, None)
        .unwrap_err();
    assert!(matches!(err, NetworkError::SourceControlFunctionNotClaimed));
}

#[test]
fn send_fails_once_the_interface_stops() {
    let running = Arc::new(AtomicBool::new(true));
    let network = NetworkManager::new(fast_config());
    network.attach_interface(InterfaceLink::new(
        Arc::clone(&running),
        Arc::new(PumpWakeup::new()),
    ));
    let ecu = claimed_internal(&network, 7, 0x1C);

    running.store(false, Ordering::Release);
    let err = network
        .send(0x00FEF1, &[0u8; 8], &ecu, None, Priority::DEFAULT, None)
        .unwrap_err();
    assert!(matches!(err, NetworkError::InterfaceNotRunning));
}

#[test]
fn direct_send_constructs_the_expected_frame() {
    let network = attached_network();
    let ecu = claimed_internal(&network, 8, 0x1C);
    let peer = known_external(&network, 9, 0x20);
    // Drain claim traffic first.
    network.flush_outbound(&mut |_| true);

    let completed = Arc::new(AtomicBool::new(false));
    let completed_clone = Arc::clone(&completed);
    let on_complete: TransmitCompleteCallback = Box::new(move |ok| {
        completed_clone.store(ok, Ordering::Release);
    });
    network
        .send(
            0x00EF00,
            &[1, 2, 3, 4],
            &ecu,
            Some(&peer),
            Priority::new(5).unwrap(),
            Some(on_complete),
        )
        .unwrap();

    let mut sent = Vec::new();
    network.flush_outbound(&mut |frame| {
        sent.push(*frame);
        true
    });
    assert_eq!(sent.len(), 1);
    let identifier = Identifier::new(sent[0].identifier).unwrap();
    assert_eq!(identifier.pgn(), 0x00EF00);
    assert_eq!(identifier.source_address(), 0x1C);
    assert_eq!(identifier.destination_address(), 0x20);
    assert_eq!(identifier.priority().raw(), 5);
    assert_eq!(sent[0].payload(), &[1, 2, 3, 4]);
    assert!(completed.load(Ordering::Acquire));
}

#[test]
fn failed_write_retries_once_then_reports_failure() {
    let network = attached_network();
    let ecu = claimed_internal(&network, 10, 0x1C);
    network.flush_outbound(&mut |_| true);

    let outcome = Arc::new(Mutex::new(None::<bool>));
    let outcome_clone = Arc::clone(&outcome);
    network
        .send(
            0x00FEF1,
            &[0u8; 8],
            &ecu,
            None,
            Priority::DEFAULT,
            Some(Box::new(move |ok| {
                *outcome_clone.lock().unwrap() = Some(ok);
            })),
        )
        .unwrap();

    // First flush fails: the frame stays queued, no completion yet.
    network.flush_outbound(&mut |_| false);
    assert_eq!(*outcome.lock().unwrap(), None);

    // Second failure drops the frame and reports it.
    network.flush_outbound(&mut |_| false);
    assert_eq!(*outcome.lock().unwrap(), Some(false));

    // Nothing left to drain.
    let mut drained = 0;
    network.flush_outbound(&mut |_| {
        drained += 1;
        true
    });
    assert_eq!(drained, 0);
}

/// A protocol that accepts every message with a configured PGN.
struct RecordingProtocol {
    accepts_pgn: u32,
    transmitted: Arc<AtomicUsize>,
}

impl TransportProtocol for RecordingProtocol {
    fn initialize(&mut self, _network: &Arc<NetworkManager>) {}

    fn update(&mut self, _network: &Arc<NetworkManager>) {}

    fn transmit(
        &mut self,
        request: TransmitRequest<'_>,
        on_complete: &mut Option<TransmitCompleteCallback>,
    ) -> bool {
        if request.pgn != self.accepts_pgn {
            return false;
        }
        self.transmitted.fetch_add(1, Ordering::Relaxed);
        if let Some(on_complete) = on_complete.take() {
            on_complete(true);
        }
        true
    }
}

#[test]
fn first_accepting_protocol_owns_the_message() {
    let network = attached_network();
    let ecu = claimed_internal(&network, 11, 0x1C);
    network.flush_outbound(&mut |_| true);

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    network.register_protocol(Arc::new(Mutex::new(RecordingProtocol {
        accepts_pgn: 0x00FE10,
        transmitted: Arc::clone(&first),
    })));
    network.register_protocol(Arc::new(Mutex::new(RecordingProtocol {
        accepts_pgn: 0x00FE10,
        transmitted: Arc::clone(&second),
    })));

    let completed = Arc::new(AtomicBool::new(false));
    let completed_clone = Arc::clone(&completed);
    network
        .send(
            0x00FE10,
            &vec![0u8; 100],
            &ecu,
            None,
            Priority::DEFAULT,
            Some(Box::new(move |ok| {
                completed_clone.store(ok, Ordering::Release);
            })),
        )
        .unwrap();

    // Registration order decides ownership; the second never sees it.
    assert_eq!(first.load(Ordering::Relaxed), 1);
    assert_eq!(second.load(Ordering::Relaxed), 0);
    assert!(completed.load(Ordering::Acquire));

    // Nothing was queued for direct transmission.
    let mut drained = 0;
    network.flush_outbound(&mut |_| {
        drained += 1;
        true
    });
    assert_eq!(drained, 0);
}
