//! Address-table promotion, eviction, and claim lifecycle, driven by
//! injecting frames directly into the receive pipeline.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fieldbus::{
    ClaimState, ControlFunctionKind, InterfaceLink, NetworkConfig, NetworkManager, PumpWakeup,
};
use fieldbus_frame::{
    pgn, Destination, Frame, Identifier, Name, NameField, NameFilter, Priority, BROADCAST_ADDRESS,
    NULL_ADDRESS,
};

fn fast_config() -> NetworkConfig {
    NetworkConfig {
        address_claim_contention_window: Duration::from_millis(20),
        ..NetworkConfig::default()
    }
}

fn test_name(identity: u32, function: u8) -> Name {
    Name::builder()
        .identity_number(identity)
        .manufacturer_code(69)
        .function_code(function)
        .arbitrary_address_capable(true)
        .build()
}

fn claim_frame(source: u8, name: Name) -> Frame {
    let identifier = Identifier::encode(
        pgn::ADDRESS_CLAIM,
        Destination::Address(BROADCAST_ADDRESS),
        source,
        Priority::DEFAULT,
    )
    .unwrap();
    Frame::new_extended(identifier, &name.to_le_bytes()).unwrap()
}

/// Tick the manager until `done` holds or the deadline passes.
fn drive_until(network: &Arc<NetworkManager>, deadline: Duration, done: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        network.update();
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

fn attached_network() -> Arc<NetworkManager> {
    let network = NetworkManager::new(fast_config());
    network.attach_interface(InterfaceLink::new(
        Arc::new(AtomicBool::new(true)),
        Arc::new(PumpWakeup::new()),
    ));
    network
}

#[test]
fn internal_claim_completes_at_preferred_address() {
    let network = attached_network();
    let ecu = network
        .create_internal_control_function(test_name(1, 0x81), 0x1C)
        .unwrap();

    assert!(drive_until(&network, Duration::from_millis(500), || {
        ecu.address_valid()
    }));
    assert_eq!(ecu.address(), 0x1C);
    assert_eq!(ecu.claimed_address().unwrap(), 0x1C);
    assert_eq!(ecu.claim_state(), Some(ClaimState::AddressClaimingComplete));

    let table_entry = network.control_function_at(0x1C).unwrap();
    assert!(Arc::ptr_eq(&table_entry, &ecu));

    // The claim conversation must have hit the wire: a request for claim
    // followed by at least one address claim.
    let mut sent = Vec::new();
    network.flush_outbound(&mut |frame| {
        sent.push(*frame);
        true
    });
    let pgns: Vec<u32> = sent
        .iter()
        .map(|frame| Identifier::new(frame.identifier).unwrap().pgn())
        .collect();
    assert!(pgns.contains(&pgn::REQUEST));
    assert!(pgns.contains(&pgn::ADDRESS_CLAIM));
}

#[test]
fn duplicate_internal_names_are_rejected() {
    let network = attached_network();
    let name = test_name(7, 0x81);
    network.create_internal_control_function(name, 0x10).unwrap();
    let err = network
        .create_internal_control_function(name, 0x11)
        .unwrap_err();
    assert!(matches!(err, fieldbus::NetworkError::DuplicateName(n) if n == name));
}

#[test]
fn foreign_claim_materializes_an_external_control_function() {
    let network = attached_network();
    let name = test_name(10, 0x90);
    network.process_receive_frame(&claim_frame(0x20, name));
    network.update();

    let external = network.control_function_at(0x20).unwrap();
    assert_eq!(external.kind(), ControlFunctionKind::External);
    assert_eq!(external.name(), name);
    assert_eq!(external.address(), 0x20);
}

#[test]
fn eviction_on_foreign_claim() {
    let network = attached_network();
    let original = test_name(11, 0x90);
    let intruder = test_name(12, 0x91);

    // Preload the table with an external CF at 0x20.
    network.process_receive_frame(&claim_frame(0x20, original));
    network.update();
    let evictee = network.control_function_at(0x20).unwrap();

    // A different NAME claims the same address.
    network.process_receive_frame(&claim_frame(0x20, intruder));
    network.update();

    assert_eq!(evictee.address(), NULL_ADDRESS);
    let replacement = network.control_function_at(0x20).unwrap();
    assert!(!Arc::ptr_eq(&replacement, &evictee));
    assert_eq!(replacement.name(), intruder);

    // The evicted CF is findable by NAME (inactive list), not by address.
    let by_name = network.control_function_by_name(original).unwrap();
    assert!(Arc::ptr_eq(&by_name, &evictee));
}

#[test]
fn address_moves_clear_the_previous_slot() {
    let network = attached_network();
    let name = test_name(13, 0x90);

    network.process_receive_frame(&claim_frame(0x20, name));
    network.update();
    network.process_receive_frame(&claim_frame(0x30, name));
    network.update();

    assert!(network.control_function_at(0x20).is_none());
    let moved = network.control_function_at(0x30).unwrap();
    assert_eq!(moved.name(), name);
    assert_eq!(moved.address(), 0x30);
}

#[test]
fn table_never_holds_one_control_function_twice() {
    let network = attached_network();
    let wanderer = test_name(14, 0x90);

    for address in [0x20u8, 0x21, 0x22, 0x20, 0x25] {
        network.process_receive_frame(&claim_frame(address, wanderer));
        network.update();
    }

    let mut seen = 0;
    for address in 0x00..NULL_ADDRESS {
        if let Some(cf) = network.control_function_at(address) {
            assert_eq!(cf.address(), address);
            if cf.name() == wanderer {
                seen += 1;
            }
        }
    }
    assert_eq!(seen, 1);
    assert_eq!(network.control_function_at(0x25).unwrap().name(), wanderer);
}

#[test]
fn commanded_address_renegotiates_the_claim() {
    let network = attached_network();
    let name = test_name(15, 0x81);
    let ecu = network
        .create_internal_control_function(name, 0x1C)
        .unwrap();
    assert!(drive_until(&network, Duration::from_millis(500), || {
        ecu.address_valid()
    }));

    // Commanded Address: 8-byte NAME plus the new address.
    let mut payload = [0u8; 9];
    payload[..8].copy_from_slice(&name.to_le_bytes());
    payload[8] = 0x42;
    let identifier =
        Identifier::encode(pgn::COMMANDED_ADDRESS, Destination::Global, 0x55, Priority::DEFAULT)
            .unwrap();
    network.process_receive_frame(&Frame::new_extended(identifier, &payload).unwrap());

    assert!(drive_until(&network, Duration::from_millis(500), || {
        ecu.address() == 0x42
    }));
    assert_eq!(ecu.claimed_address().unwrap(), 0x42);
    assert!(network.control_function_at(0x1C).is_none());
    assert!(Arc::ptr_eq(&network.control_function_at(0x42).unwrap(), &ecu));
}

#[test]
fn partner_binds_to_a_matching_claimant() {
    let network = attached_network();
    let partner = network.create_partnered_control_function(vec![NameFilter::new(
        NameField::FunctionCode,
        0x82,
    )]);
    assert!(!partner.address_valid());

    // A claim that does not match the filters leaves the partner unbound.
    network.process_receive_frame(&claim_frame(0x50, test_name(20, 0x70)));
    network.update();
    assert!(!partner.address_valid());

    // A matching claim binds the partner and replaces the external entry.
    let friend = test_name(21, 0x82);
    network.process_receive_frame(&claim_frame(0x55, friend));
    network.update();

    assert!(partner.address_valid());
    assert_eq!(partner.address(), 0x55);
    assert_eq!(partner.name(), friend);
    let table_entry = network.control_function_at(0x55).unwrap();
    assert_eq!(table_entry.kind(), ControlFunctionKind::Partnered);
    assert!(Arc::ptr_eq(&table_entry, &partner));
}

#[test]
fn late_partner_adopts_a_known_external() {
    let network = attached_network();
    let friend = test_name(22, 0x83);
    network.process_receive_frame(&claim_frame(0x60, friend));
    network.update();

    // Partner declared after the device was already discovered.
    let partner = network.create_partnered_control_function(vec![NameFilter::new(
        NameField::FunctionCode,
        0x83,
    )]);
    network.update();

    assert!(partner.partner_initialized());
    assert_eq!(partner.address(), 0x60);
    assert_eq!(partner.name(), friend);
    let table_entry = network.control_function_at(0x60).unwrap();
    assert!(Arc::ptr_eq(&table_entry, &partner));
}

#[test]
fn destroy_checks_remaining_references() {
    let network = attached_network();
    let ecu = network
        .create_internal_control_function(test_name(30, 0x81), 0x33)
        .unwrap();
    assert!(drive_until(&network, Duration::from_millis(500), || {
        ecu.address_valid()
    }));

    let extra = Arc::clone(&ecu);
    // Two caller references remain; expecting one must fail.
    assert!(!network.destroy_control_function(&ecu, 1));
    drop(extra);

    // Recreate and destroy cleanly.
    let ecu2 = network
        .create_internal_control_function(test_name(31, 0x82), 0x34)
        .unwrap();
    assert!(drive_until(&network, Duration::from_millis(500), || {
        ecu2.address_valid()
    }));
    let address = ecu2.address();
    assert!(network.destroy_control_function(&ecu2, 1));

    // While the interface runs, the vacated slot is refilled with a fresh
    // external stub bearing the same NAME.
    let stub = network.control_function_at(address).unwrap();
    assert!(!Arc::ptr_eq(&stub, &ecu2));
    assert_eq!(stub.kind(), ControlFunctionKind::External);
    assert_eq!(stub.name(), ecu2.name());
}
