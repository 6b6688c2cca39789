//! The per-bus network manager.
//!
//! One instance per CAN network. It owns the 254-entry address table, the
//! inactive and partner lists, the registered transport protocols, the
//! PGN callback registries, and the busload estimator. The hardware pump
//! drives it through [`NetworkManager::process_receive_frame`] (one call
//! per received frame), [`NetworkManager::update`] (the periodic tick) and
//! [`NetworkManager::flush_outbound`] (transmit draining).
//!
//! Locking: the control-function registry has a single mutex covering the
//! address table and the inactive/partner/internal lists, held across
//! claim ticks and promotion/eviction so those are atomic. Queues and
//! callback registries each have their own lock; callback lists are
//! snapshotted under their lock and invoked after it is released, so user
//! callbacks may re-enter the manager.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use fieldbus_frame::{
    pgn, Destination, Frame, Identifier, Name, NameFilter, Priority, BROADCAST_ADDRESS,
    CAN_DATA_LENGTH, NULL_ADDRESS,
};

use crate::address_claim::{
    AddressClaimMachine, AddressView, ClaimEffect, ClaimEvent,
};
use crate::busload::BusloadEstimator;
use crate::config::NetworkConfig;
use crate::control_function::{ControlFunction, ControlFunctionKind, Detail};
use crate::error::NetworkError;
use crate::link::InterfaceLink;
use crate::message::{Message, ABSOLUTE_MAX_MESSAGE_LENGTH};
use crate::protocol::{TransmitRequest, TransportProtocol};

/// Callback invoked with each matching received message.
pub type PgnCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Callback invoked once with the outcome of a direct (single-frame)
/// transmit, or by the transport protocol that accepted the message.
pub type TransmitCompleteCallback = Box<dyn FnOnce(bool) + Send>;

/// Usable address slots: `0x00..=0xFD`.
const ADDRESS_TABLE_SIZE: usize = NULL_ADDRESS as usize;

struct CallbackEntry {
    pgn: u32,
    callback: PgnCallback,
}

struct ProtocolEntry {
    protocol: Arc<Mutex<dyn TransportProtocol>>,
    initialized: bool,
}

struct OutboundFrame {
    frame: Frame,
    on_complete: Option<TransmitCompleteCallback>,
    attempts: u8,
}

struct Registry {
    table: Vec<Option<Arc<ControlFunction>>>,
    inactive: Vec<Arc<ControlFunction>>,
    partners: Vec<Arc<ControlFunction>>,
    internal: Vec<Arc<ControlFunction>>,
    partners_dirty: bool,
}

impl Registry {
    fn new() -> Registry {
        Registry {
            table: vec![None; ADDRESS_TABLE_SIZE],
            inactive: Vec::new(),
            partners: Vec::new(),
            internal: Vec::new(),
            partners_dirty: false,
        }
    }

    fn at(&self, address: u8) -> Option<Arc<ControlFunction>> {
        self.table.get(usize::from(address))?.clone()
    }

    fn slot_of(&self, cf: &Arc<ControlFunction>) -> Option<usize> {
        self.table
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, cf)))
    }

    fn ensure_inactive(&mut self, cf: &Arc<ControlFunction>) {
        if !self.inactive.iter().any(|c| Arc::ptr_eq(c, cf)) {
            self.inactive.push(Arc::clone(cf));
        }
    }
}

/// Address-table occupancy as seen by one claim machine; the machine's own
/// control function is invisible to itself.
struct TableView<'a> {
    registry: &'a Registry,
    exclude: &'a Arc<ControlFunction>,
}

impl AddressView for TableView<'_> {
    fn name_at(&self, address: u8) -> Option<Name> {
        self.registry
            .table
            .get(usize::from(address))?
            .as_ref()
            .filter(|cf| !Arc::ptr_eq(cf, self.exclude))
            .map(|cf| cf.name())
    }
}

/// Network manager for one CAN bus.
pub struct NetworkManager {
    config: NetworkConfig,
    registry: Mutex<Registry>,
    rx_queue: Mutex<VecDeque<Message>>,
    outbound: Mutex<VecDeque<OutboundFrame>>,
    global_callbacks: Mutex<Vec<CallbackEntry>>,
    any_cf_callbacks: Mutex<Vec<CallbackEntry>>,
    protocol_callbacks: Mutex<Vec<CallbackEntry>>,
    protocols: Mutex<Vec<ProtocolEntry>>,
    busload: Mutex<BusloadEstimator>,
    link: Mutex<Option<InterfaceLink>>,
}

impl NetworkManager {
    /// Create a manager with the given configuration.
    pub fn new(config: NetworkConfig) -> Arc<NetworkManager> {
        let busload = BusloadEstimator::new(&config, Instant::now());
        Arc::new(NetworkManager {
            config,
            registry: Mutex::new(Registry::new()),
            rx_queue: Mutex::new(VecDeque::new()),
            outbound: Mutex::new(VecDeque::new()),
            global_callbacks: Mutex::new(Vec::new()),
            any_cf_callbacks: Mutex::new(Vec::new()),
            protocol_callbacks: Mutex::new(Vec::new()),
            protocols: Mutex::new(Vec::new()),
            busload: Mutex::new(busload),
            link: Mutex::new(None),
        })
    }

    /// The configuration this manager was created with.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    // ----- control-function lifecycle -------------------------------------

    /// Create an internal control function and schedule its address claim.
    ///
    /// Fails with [`NetworkError::DuplicateName`] when an internal CF with
    /// the same NAME already exists on this network.
    pub fn create_internal_control_function(
        self: &Arc<Self>,
        name: Name,
        preferred_address: u8,
    ) -> Result<Arc<ControlFunction>, NetworkError> {
        let mut registry = self.lock_registry();
        if registry.internal.iter().any(|cf| cf.name() == name) {
            return Err(NetworkError::DuplicateName(name));
        }
        let machine =
            AddressClaimMachine::new(name, preferred_address, self.config.address_claim_contention_window);
        let cf = ControlFunction::new_internal(name, machine, Arc::downgrade(self));
        registry.internal.push(Arc::clone(&cf));
        registry.inactive.push(Arc::clone(&cf));
        tracing::debug!(%name, preferred_address, "created internal control function");
        Ok(cf)
    }

    /// Declare a partner: an external device, identified by NAME filters,
    /// that this node wants to exchange messages with.
    pub fn create_partnered_control_function(
        self: &Arc<Self>,
        filters: Vec<NameFilter>,
    ) -> Arc<ControlFunction> {
        let cf = ControlFunction::new_partnered(filters, Arc::downgrade(self));
        let mut registry = self.lock_registry();
        registry.partners.push(Arc::clone(&cf));
        registry.partners_dirty = true;
        cf
    }

    /// O(1) lookup by address. Addresses at and above `NULL_ADDRESS` have
    /// no table entry.
    pub fn control_function_at(&self, address: u8) -> Option<Arc<ControlFunction>> {
        self.lock_registry().at(address)
    }

    /// Lookup by NAME: the address table first, then the inactive list.
    pub fn control_function_by_name(&self, name: Name) -> Option<Arc<ControlFunction>> {
        let registry = self.lock_registry();
        registry
            .table
            .iter()
            .flatten()
            .find(|cf| cf.name() == name)
            .cloned()
            .or_else(|| {
                registry
                    .inactive
                    .iter()
                    .find(|cf| cf.name() == name)
                    .cloned()
            })
    }

    /// Remove a control function from the network.
    ///
    /// Succeeds only when, after the registry drops its references, no more
    /// than `expected_references` strong references remain (the caller's
    /// own `Arc` counts as one). While the interface is running, a table
    /// slot vacated this way is refilled with a fresh external stub bearing
    /// the same NAME, since the device itself is still on the bus.
    pub fn destroy_control_function(
        self: &Arc<Self>,
        cf: &Arc<ControlFunction>,
        expected_references: usize,
    ) -> bool {
        let running = self
            .link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|link| link.is_running());
        {
            let mut registry = self.lock_registry();
            registry.inactive.retain(|c| !Arc::ptr_eq(c, cf));
            registry.partners.retain(|c| !Arc::ptr_eq(c, cf));
            registry.internal.retain(|c| !Arc::ptr_eq(c, cf));
            for slot in 0..ADDRESS_TABLE_SIZE {
                let occupied = registry.table[slot]
                    .as_ref()
                    .is_some_and(|c| Arc::ptr_eq(c, cf));
                if !occupied {
                    continue;
                }
                if slot as u8 != cf.address() {
                    tracing::warn!(
                        slot,
                        address = cf.address(),
                        "control function was filed under a stale slot before deletion"
                    );
                }
                registry.table[slot] = if running {
                    Some(ControlFunction::new_external(
                        cf.name(),
                        slot as u8,
                        Arc::downgrade(self),
                    ))
                } else {
                    None
                };
            }
        }
        tracing::debug!(name = %cf.name(), address = cf.address(), "control function destroyed");
        Arc::strong_count(cf) <= expected_references
    }

    // ----- callback registries --------------------------------------------

    /// Register a callback for broadcast messages with this PGN.
    /// Returns true on first insertion, false on duplicate.
    pub fn add_global_pgn_callback(&self, pgn: u32, callback: PgnCallback) -> bool {
        Self::add_callback(&self.global_callbacks, pgn, callback)
    }

    /// Remove a global callback. Returns true when an entry was removed.
    pub fn remove_global_pgn_callback(&self, pgn: u32, callback: &PgnCallback) -> bool {
        Self::remove_callback(&self.global_callbacks, pgn, callback)
    }

    /// Register a callback for messages with this PGN that are broadcast
    /// or destined to any internal control function.
    pub fn add_any_control_function_pgn_callback(&self, pgn: u32, callback: PgnCallback) -> bool {
        Self::add_callback(&self.any_cf_callbacks, pgn, callback)
    }

    /// Remove an any-CF callback.
    pub fn remove_any_control_function_pgn_callback(
        &self,
        pgn: u32,
        callback: &PgnCallback,
    ) -> bool {
        Self::remove_callback(&self.any_cf_callbacks, pgn, callback)
    }

    /// Register an unfiltered callback used by transport protocols.
    pub fn add_protocol_pgn_callback(&self, pgn: u32, callback: PgnCallback) -> bool {
        Self::add_callback(&self.protocol_callbacks, pgn, callback)
    }

    /// Remove a protocol callback.
    pub fn remove_protocol_pgn_callback(&self, pgn: u32, callback: &PgnCallback) -> bool {
        Self::remove_callback(&self.protocol_callbacks, pgn, callback)
    }

    fn add_callback(list: &Mutex<Vec<CallbackEntry>>, pgn: u32, callback: PgnCallback) -> bool {
        let mut entries = list.lock().unwrap_or_else(|e| e.into_inner());
        let duplicate = entries
            .iter()
            .any(|entry| entry.pgn == pgn && Arc::ptr_eq(&entry.callback, &callback));
        if duplicate {
            return false;
        }
        entries.push(CallbackEntry { pgn, callback });
        true
    }

    fn remove_callback(list: &Mutex<Vec<CallbackEntry>>, pgn: u32, callback: &PgnCallback) -> bool {
        let mut entries = list.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|entry| !(entry.pgn == pgn && Arc::ptr_eq(&entry.callback, callback)));
        entries.len() != before
    }

    fn snapshot_callbacks(list: &Mutex<Vec<CallbackEntry>>, pgn: u32) -> Vec<PgnCallback> {
        list.lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| entry.pgn == pgn)
            .map(|entry| Arc::clone(&entry.callback))
            .collect()
    }

    // ----- protocols ------------------------------------------------------

    /// Register a transport protocol. Protocols are offered outgoing
    /// messages in registration order and updated on every tick.
    pub fn register_protocol(&self, protocol: Arc<Mutex<dyn TransportProtocol>>) {
        self.protocols
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ProtocolEntry {
                protocol,
                initialized: false,
            });
    }

    fn update_protocols(self: &Arc<Self>) {
        let pending: Vec<(Arc<Mutex<dyn TransportProtocol>>, bool)> = {
            let mut entries = self.protocols.lock().unwrap_or_else(|e| e.into_inner());
            entries
                .iter_mut()
                .map(|entry| {
                    let needs_init = !entry.initialized;
                    entry.initialized = true;
                    (Arc::clone(&entry.protocol), needs_init)
                })
                .collect()
        };
        for (protocol, needs_init) in pending {
            let mut protocol = protocol.lock().unwrap_or_else(|e| e.into_inner());
            if needs_init {
                protocol.initialize(self);
            }
            protocol.update(self);
        }
    }

    // ----- send pipeline --------------------------------------------------

    /// Send a message from an internal control function.
    ///
    /// The message is first offered to each registered transport protocol
    /// in registration order; the first to accept it owns the transmit and
    /// the completion callback. Otherwise payloads of up to 8 bytes are
    /// encoded into a single frame and queued for the hardware, and
    /// `on_complete` fires once the frame has been handed to the plugin
    /// (or dropped after its retry).
    pub fn send(
        self: &Arc<Self>,
        pgn_value: u32,
        data: &[u8],
        source: &Arc<ControlFunction>,
        destination: Option<&Arc<ControlFunction>>,
        priority: Priority,
        on_complete: Option<TransmitCompleteCallback>,
    ) -> Result<(), NetworkError> {
        if data.is_empty() || data.len() > ABSOLUTE_MAX_MESSAGE_LENGTH {
            return Err(NetworkError::PayloadTooLong(data.len()));
        }
        if pgn_value != pgn::ADDRESS_CLAIM && !source.address_valid() {
            return Err(NetworkError::SourceControlFunctionNotClaimed);
        }

        let mut on_complete = on_complete;
        let protocols: Vec<Arc<Mutex<dyn TransportProtocol>>> = {
            self.protocols
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .map(|entry| Arc::clone(&entry.protocol))
                .collect()
        };
        for protocol in protocols {
            let request = TransmitRequest {
                pgn: pgn_value,
                data,
                source,
                destination,
                priority,
            };
            let accepted = protocol
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .transmit(request, &mut on_complete);
            if accepted {
                return Ok(());
            }
        }

        if data.len() > CAN_DATA_LENGTH {
            return Err(NetworkError::NoTransportProtocolForLength(data.len()));
        }

        let wire_destination = match destination {
            None => Destination::Global,
            Some(cf) => {
                if !cf.address_valid() {
                    return Err(NetworkError::AddressClaimFailed);
                }
                Destination::Address(cf.address())
            }
        };
        let identifier =
            Identifier::encode(pgn_value, wire_destination, source.address(), priority)?;
        let frame = Frame::new_extended(identifier, data)
            .ok_or(NetworkError::PayloadTooLong(data.len()))?;
        self.enqueue_outbound(frame, on_complete, true)
    }

    /// Queue a network-management frame (claims, requests). These bypass
    /// the running check so claim machinery can queue frames while the
    /// interface is still coming up.
    fn enqueue_network_frame(&self, pgn_value: u32, source: u8, payload: &[u8]) {
        let identifier = match Identifier::encode(
            pgn_value,
            Destination::Address(BROADCAST_ADDRESS),
            source,
            Priority::DEFAULT,
        ) {
            Ok(identifier) => identifier,
            Err(err) => {
                tracing::error!("network frame rejected by the identifier codec: {err}");
                return;
            }
        };
        if let Some(frame) = Frame::new_extended(identifier, payload) {
            let _ = self.enqueue_outbound(frame, None, false);
        }
    }

    fn enqueue_outbound(
        &self,
        frame: Frame,
        on_complete: Option<TransmitCompleteCallback>,
        require_running: bool,
    ) -> Result<(), NetworkError> {
        let link = self.link.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if require_running && !link.as_ref().is_some_and(|l| l.is_running()) {
            return Err(NetworkError::InterfaceNotRunning);
        }
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(OutboundFrame {
                frame,
                on_complete,
                attempts: 0,
            });
        if let Some(link) = link {
            link.notify();
        }
        Ok(())
    }

    // ----- receive pipeline -----------------------------------------------

    /// Ingest one frame from the hardware. Non-extended frames are
    /// discarded; address claims, requests for claim and commanded
    /// addresses update the registry before the decoded message is queued
    /// for callback dispatch on the next tick.
    pub fn process_receive_frame(self: &Arc<Self>, frame: &Frame) {
        if !frame.extended {
            tracing::trace!(identifier = frame.identifier, "discarding non-extended frame");
            return;
        }
        let identifier = match Identifier::new(frame.identifier) {
            Ok(identifier) => identifier,
            Err(err) => {
                tracing::trace!("discarding frame: {err}");
                return;
            }
        };
        self.busload
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accumulate(frame.bit_count());

        let now = Instant::now();
        let pgn_value = identifier.pgn();
        let data = frame.payload();

        let (source_cf, destination_cf) = {
            let mut registry = self.lock_registry();
            if pgn_value == pgn::ADDRESS_CLAIM && data.len() == CAN_DATA_LENGTH {
                let mut name_bytes = [0u8; 8];
                name_bytes.copy_from_slice(data);
                let claimed_name = Name::from_le_bytes(name_bytes);
                let source = identifier.source_address();

                for cf in registry.internal.clone() {
                    let Detail::Internal(machine) = cf.detail() else {
                        continue;
                    };
                    let effects = machine
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .handle(ClaimEvent::ClaimReceived {
                            now,
                            source,
                            name: claimed_name,
                        });
                    self.apply_claim_effects(&mut registry, &cf, effects);
                }

                // Cannot Claim frames carry the NULL source and never enter
                // the table.
                if source < NULL_ADDRESS {
                    self.handle_address_claim(&mut registry, source, claimed_name);
                }
            } else if pgn_value == pgn::REQUEST && data.len() >= 3 {
                let requested =
                    u32::from(data[0]) | u32::from(data[1]) << 8 | u32::from(data[2]) << 16;
                if requested == pgn::ADDRESS_CLAIM {
                    let destination = identifier.destination_address();
                    for cf in registry.internal.clone() {
                        let Detail::Internal(machine) = cf.detail() else {
                            continue;
                        };
                        if destination != BROADCAST_ADDRESS && destination != cf.address() {
                            continue;
                        }
                        let effects = machine
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .handle(ClaimEvent::RequestForClaimReceived);
                        self.apply_claim_effects(&mut registry, &cf, effects);
                    }
                }
            } else if pgn_value == pgn::COMMANDED_ADDRESS
                && data.len() == 9
                && registry.at(identifier.destination_address()).is_none()
            {
                // Only honored when the message is not destination-specific
                // to a resolved control function; the target is named by the
                // NAME in the payload.
                let mut name_bytes = [0u8; 8];
                name_bytes.copy_from_slice(&data[..8]);
                let target = Name::from_le_bytes(name_bytes);
                let commanded = data[8];
                for cf in registry.internal.clone() {
                    let Detail::Internal(machine) = cf.detail() else {
                        continue;
                    };
                    if cf.name() != target {
                        continue;
                    }
                    let effects = machine
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .handle(ClaimEvent::AddressCommanded(commanded));
                    self.apply_claim_effects(&mut registry, &cf, effects);
                }
            }

            (
                registry.at(identifier.source_address()),
                registry.at(identifier.destination_address()),
            )
        };

        self.rx_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Message::new(
                identifier,
                data.to_vec(),
                source_cf,
                destination_cf,
            ));
    }

    /// Account a successfully transmitted frame towards the busload.
    pub fn on_frame_transmitted(&self, frame: &Frame) {
        self.busload
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accumulate(frame.bit_count());
    }

    // ----- periodic tick --------------------------------------------------

    /// One update cycle: bind fresh partners, drive the claim machines,
    /// dispatch queued messages, update protocols and the busload ring.
    pub fn update(self: &Arc<Self>) {
        let now = Instant::now();
        {
            let mut registry = self.lock_registry();
            self.update_new_partners(&mut registry);

            for cf in registry.internal.clone() {
                let Detail::Internal(machine) = cf.detail() else {
                    continue;
                };
                let (effects, settled) = {
                    let mut machine = machine.lock().unwrap_or_else(|e| e.into_inner());
                    let view = TableView {
                        registry: &*registry,
                        exclude: &cf,
                    };
                    let effects = machine.handle(ClaimEvent::Tick {
                        now,
                        table: &view,
                    });
                    (effects, machine.settled_address())
                };
                self.apply_claim_effects(&mut registry, &cf, effects);

                // A foreign claim may have displaced us from the table even
                // though our machine kept (and defended) the address.
                if let Some(address) = settled {
                    let in_place = registry
                        .at(address)
                        .is_some_and(|occupant| Arc::ptr_eq(&occupant, &cf))
                        && cf.address() == address;
                    if !in_place {
                        self.place_in_table(&mut registry, &cf, address);
                    }
                }
            }
        }

        self.process_rx_messages();
        self.update_protocols();
        self.busload
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .update(now);
    }

    fn process_rx_messages(&self) {
        loop {
            let message = self
                .rx_queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let Some(message) = message else {
                break;
            };
            self.dispatch_message(&message);
        }
    }

    fn dispatch_message(&self, message: &Message) {
        let pgn_value = message.pgn();

        for callback in Self::snapshot_callbacks(&self.protocol_callbacks, pgn_value) {
            callback(message);
        }

        let destination_internal = message
            .destination_control_function()
            .is_some_and(|cf| cf.kind() == ControlFunctionKind::Internal);

        if message.destination_control_function().is_none() || destination_internal {
            for callback in Self::snapshot_callbacks(&self.any_cf_callbacks, pgn_value) {
                callback(message);
            }
        }

        if message.destination_control_function().is_none() {
            // Broadcast. A PGN request from the NULL address (a device
            // asking for claims before it has an address) also qualifies.
            let request_from_null = pgn_value == pgn::REQUEST
                && message.identifier().source_address() == NULL_ADDRESS;
            if message.source_control_function().is_some() || request_from_null {
                for callback in Self::snapshot_callbacks(&self.global_callbacks, pgn_value) {
                    callback(message);
                }
            }
        } else if destination_internal {
            // Destination-specific to one of ours: partner callbacks fire
            // when the source is the matching partner.
            let Some(source) = message.source_control_function() else {
                return;
            };
            if source.kind() != ControlFunctionKind::Partnered {
                return;
            }
            for (callback, wanted_destination) in source.partner_callbacks_for(pgn_value) {
                let destination_matches = wanted_destination.as_ref().map_or(true, |wanted| {
                    message
                        .destination_control_function()
                        .is_some_and(|actual| Arc::ptr_eq(wanted, actual))
                });
                if destination_matches {
                    callback(message);
                }
            }
        }
    }

    // ----- registry maintenance -------------------------------------------

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply_claim_effects(
        self: &Arc<Self>,
        registry: &mut Registry,
        cf: &Arc<ControlFunction>,
        effects: Vec<ClaimEffect>,
    ) {
        for effect in effects {
            match effect {
                ClaimEffect::SendRequestForClaim => {
                    let requested = pgn::ADDRESS_CLAIM.to_le_bytes();
                    self.enqueue_network_frame(pgn::REQUEST, cf.address(), &requested[..3]);
                }
                ClaimEffect::SendAddressClaim(address) => {
                    self.enqueue_network_frame(
                        pgn::ADDRESS_CLAIM,
                        address,
                        &cf.name().to_le_bytes(),
                    );
                }
                ClaimEffect::SendCannotClaim => {
                    self.enqueue_network_frame(
                        pgn::ADDRESS_CLAIM,
                        NULL_ADDRESS,
                        &cf.name().to_le_bytes(),
                    );
                }
                ClaimEffect::AddressAcquired(address) => {
                    tracing::debug!(
                        name = %cf.name(),
                        address,
                        "address claim complete"
                    );
                    self.place_in_table(registry, cf, address);
                }
                ClaimEffect::AddressLost => {
                    if let Some(slot) = registry.slot_of(cf) {
                        registry.table[slot] = None;
                    }
                    cf.set_address(NULL_ADDRESS);
                    registry.ensure_inactive(cf);
                }
            }
        }
    }

    /// File `cf` at table slot `address`, evicting any other occupant to
    /// the inactive list and clearing any stale slot `cf` held before.
    fn place_in_table(&self, registry: &mut Registry, cf: &Arc<ControlFunction>, address: u8) {
        let slot = usize::from(address);
        if slot >= ADDRESS_TABLE_SIZE {
            return;
        }
        if let Some(occupant) = registry.table[slot].clone() {
            if !Arc::ptr_eq(&occupant, cf) {
                // Log while the evicted entry is still intact.
                tracing::debug!(
                    name = %occupant.name(),
                    address,
                    "control function evicted from the lookup table"
                );
                occupant.set_address(NULL_ADDRESS);
                registry.table[slot] = None;
                registry.ensure_inactive(&occupant);
            }
        }
        if let Some(previous) = registry.slot_of(cf) {
            if previous != slot {
                registry.table[previous] = None;
            }
        }
        registry.table[slot] = Some(Arc::clone(cf));
        cf.set_address(address);
        registry.inactive.retain(|c| !Arc::ptr_eq(c, cf));
    }

    /// Promotion and eviction for one received Address Claim (registry
    /// lock held by the caller).
    fn handle_address_claim(
        self: &Arc<Self>,
        registry: &mut Registry,
        source: u8,
        claimed_name: Name,
    ) {
        let known = registry
            .table
            .iter()
            .flatten()
            .find(|cf| cf.name() == claimed_name)
            .cloned()
            .or_else(|| {
                registry
                    .inactive
                    .iter()
                    .find(|cf| cf.name() == claimed_name)
                    .cloned()
            })
            .or_else(|| {
                // A partner that adopted this NAME while the device was
                // inactive re-enters the table through its claims.
                registry
                    .partners
                    .iter()
                    .find(|cf| cf.name() == claimed_name)
                    .cloned()
            });

        let found = match known {
            Some(cf) => cf,
            None => {
                tracing::debug!(name = %claimed_name, address = source, "new control function");
                ControlFunction::new_external(claimed_name, NULL_ADDRESS, Arc::downgrade(self))
            }
        };

        // Our own claim echoed back before it settled: the claim machine
        // files the control function once the settle window has passed.
        if found.kind() == ControlFunctionKind::Internal && found.claimed_address().is_err() {
            return;
        }

        self.place_in_table(registry, &found, source);

        // Bind the first declared partner whose filters match a claimant we
        // only know as an external device; the partner replaces the
        // external entry in the table.
        if found.kind() == ControlFunctionKind::External {
            let unbound_partner = registry
                .partners
                .iter()
                .find(|partner| {
                    partner.name().raw() == 0 && partner.matches_name(claimed_name)
                })
                .cloned();
            if let Some(partner) = unbound_partner {
                tracing::debug!(
                    name = %claimed_name,
                    address = source,
                    "partner bound to claimant"
                );
                partner.set_name(claimed_name);
                partner.set_address(source);
                partner.set_partner_initialized();
                registry.table[usize::from(source)] = Some(Arc::clone(&partner));
                found.set_address(NULL_ADDRESS);
                registry.inactive.retain(|c| !Arc::ptr_eq(c, &found));
            }
        }
    }

    /// Check freshly declared partners against devices we already know.
    fn update_new_partners(&self, registry: &mut Registry) {
        if !registry.partners_dirty {
            return;
        }
        for partner in registry.partners.clone() {
            if partner.partner_initialized() {
                continue;
            }

            let inactive_match = registry.inactive.iter().position(|cf| {
                cf.kind() == ControlFunctionKind::External && partner.matches_name(cf.name())
            });
            if let Some(position) = inactive_match {
                let external = registry.inactive.remove(position);
                tracing::debug!(
                    name = %external.name(),
                    "partner remapped to an inactive external control function"
                );
                partner.set_name(external.name());
                partner.set_address(external.address());
            } else {
                let table_match = registry.table.iter().position(|slot| {
                    slot.as_ref().is_some_and(|cf| {
                        cf.kind() == ControlFunctionKind::External
                            && partner.matches_name(cf.name())
                    })
                });
                if let Some(slot) = table_match {
                    if let Some(external) = registry.table[slot].take() {
                        tracing::debug!(
                            name = %external.name(),
                            address = slot,
                            "partner remapped to an active external control function"
                        );
                        partner.set_name(external.name());
                        partner.set_address(external.address());
                        external.set_address(NULL_ADDRESS);
                        registry.table[slot] = Some(Arc::clone(&partner));
                    }
                }
            }
            partner.set_partner_initialized();
        }
        registry.partners_dirty = false;
    }

    // ----- hardware integration -------------------------------------------

    /// Install the pump handle. Called by the hardware interface when this
    /// network is attached to a started interface.
    pub fn attach_interface(&self, link: InterfaceLink) {
        *self.link.lock().unwrap_or_else(|e| e.into_inner()) = Some(link);
    }

    /// Remove the pump handle; subsequent sends fail with
    /// [`NetworkError::InterfaceNotRunning`].
    pub fn detach_interface(&self) {
        *self.link.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Drain the outbound queue through `write`.
    ///
    /// A frame whose write fails stays at the head for exactly one retry on
    /// a later call; after the second failure it is dropped and its
    /// completion callback fires with `false`. Draining stops at the first
    /// failed write.
    pub fn flush_outbound(&self, write: &mut dyn FnMut(&Frame) -> bool) {
        loop {
            let item = self
                .outbound
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let Some(mut item) = item else {
                return;
            };
            if write(&item.frame) {
                self.on_frame_transmitted(&item.frame);
                if let Some(on_complete) = item.on_complete.take() {
                    on_complete(true);
                }
            } else {
                item.attempts += 1;
                if item.attempts >= 2 {
                    tracing::warn!(
                        identifier = item.frame.identifier,
                        "dropping outbound frame after failed retry"
                    );
                    if let Some(on_complete) = item.on_complete.take() {
                        on_complete(false);
                    }
                } else {
                    self.outbound
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push_front(item);
                }
                return;
            }
        }
    }

    /// Drop everything still queued; pending completion callbacks fire
    /// with `false`. Called by the hardware interface on stop.
    pub fn clear_queues(&self) {
        let dropped: Vec<OutboundFrame> = self
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for mut item in dropped {
            if let Some(on_complete) = item.on_complete.take() {
                on_complete(false);
            }
        }
        self.rx_queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Estimated busload in percent over the sample window.
    pub fn estimated_busload(&self) -> f32 {
        self.busload
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .estimated_percent()
    }
}
