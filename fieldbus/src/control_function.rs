//! Logical peers on the bus.
//!
//! A control function is anything with a NAME and (usually) an address:
//! our own nodes (*internal*, they run the address-claim machine), devices
//! merely observed on the bus (*external*), and declared intents to talk
//! to a specific device matched by NAME filters (*partnered*).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use fieldbus_frame::{Name, NameFilter, NULL_ADDRESS};

use crate::address_claim::{AddressClaimMachine, ClaimState};
use crate::error::NetworkError;
use crate::network::{NetworkManager, PgnCallback};

/// The role a control function plays for this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFunctionKind {
    /// Owned by this node; claims an address.
    Internal,
    /// Another device discovered on the bus.
    External,
    /// A declared partner, bound to an external device by NAME filters.
    Partnered,
}

pub(crate) struct PartnerCallbackEntry {
    pub(crate) pgn: u32,
    pub(crate) callback: PgnCallback,
    /// Restrict the callback to messages destined to this internal CF.
    pub(crate) destination: Option<Arc<ControlFunction>>,
}

pub(crate) struct PartnerDetail {
    pub(crate) filters: Vec<NameFilter>,
    pub(crate) callbacks: Mutex<Vec<PartnerCallbackEntry>>,
    /// Set once the partner has been checked against known devices.
    pub(crate) initialized: AtomicBool,
}

pub(crate) enum Detail {
    Internal(Mutex<AddressClaimMachine>),
    External,
    Partnered(PartnerDetail),
}

/// One logical peer: our own node, an observed device, or a partner.
///
/// Control functions are shared (`Arc`) between the network manager's
/// tables and user code; all mutable state is interior and individually
/// synchronized.
pub struct ControlFunction {
    name: Mutex<Name>,
    address: AtomicU8,
    network: Weak<NetworkManager>,
    detail: Detail,
}

impl ControlFunction {
    pub(crate) fn new_internal(
        name: Name,
        machine: AddressClaimMachine,
        network: Weak<NetworkManager>,
    ) -> Arc<ControlFunction> {
        let mut machine = machine;
        machine.enable();
        Arc::new(ControlFunction {
            name: Mutex::new(name),
            address: AtomicU8::new(NULL_ADDRESS),
            network,
            detail: Detail::Internal(Mutex::new(machine)),
        })
    }

    pub(crate) fn new_external(
        name: Name,
        address: u8,
        network: Weak<NetworkManager>,
    ) -> Arc<ControlFunction> {
        Arc::new(ControlFunction {
            name: Mutex::new(name),
            address: AtomicU8::new(address),
            network,
            detail: Detail::External,
        })
    }

    pub(crate) fn new_partnered(
        filters: Vec<NameFilter>,
        network: Weak<NetworkManager>,
    ) -> Arc<ControlFunction> {
        Arc::new(ControlFunction {
            name: Mutex::new(Name::from_raw(0)),
            address: AtomicU8::new(NULL_ADDRESS),
            network,
            detail: Detail::Partnered(PartnerDetail {
                filters,
                callbacks: Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
            }),
        })
    }

    /// The NAME this control function claimed (or adopted, for partners).
    pub fn name(&self) -> Name {
        *self.name.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_name(&self, name: Name) {
        *self.name.lock().unwrap_or_else(|e| e.into_inner()) = name;
    }

    /// Current bus address; `NULL_ADDRESS` when unclaimed.
    pub fn address(&self) -> u8 {
        self.address.load(Ordering::Acquire)
    }

    pub(crate) fn set_address(&self, address: u8) {
        self.address.store(address, Ordering::Release);
    }

    /// True once the control function holds a usable address.
    pub fn address_valid(&self) -> bool {
        self.address() < NULL_ADDRESS
    }

    /// Which role this control function plays.
    pub fn kind(&self) -> ControlFunctionKind {
        match self.detail {
            Detail::Internal(_) => ControlFunctionKind::Internal,
            Detail::External => ControlFunctionKind::External,
            Detail::Partnered(_) => ControlFunctionKind::Partnered,
        }
    }

    /// The network this control function lives on, unless the manager has
    /// been dropped.
    pub fn network(&self) -> Option<Arc<NetworkManager>> {
        self.network.upgrade()
    }

    /// Claim progress for internal control functions, `None` otherwise.
    pub fn claim_state(&self) -> Option<ClaimState> {
        match &self.detail {
            Detail::Internal(machine) => {
                Some(machine.lock().unwrap_or_else(|e| e.into_inner()).state())
            }
            _ => None,
        }
    }

    /// The settled address of an internal control function.
    ///
    /// Fails with [`NetworkError::AddressClaimFailed`] while the claim is
    /// pending, lost, or unable to complete, and for non-internal kinds.
    pub fn claimed_address(&self) -> Result<u8, NetworkError> {
        match &self.detail {
            Detail::Internal(machine) => machine
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .settled_address()
                .ok_or(NetworkError::AddressClaimFailed),
            _ => Err(NetworkError::AddressClaimFailed),
        }
    }

    /// The address this internal control function prefers to claim.
    pub fn preferred_address(&self) -> Option<u8> {
        match &self.detail {
            Detail::Internal(machine) => Some(
                machine
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .preferred_address(),
            ),
            _ => None,
        }
    }

    /// Whether a partner's filter set matches `name`. Always false for
    /// internal and external control functions and for empty filter sets.
    pub fn matches_name(&self, name: Name) -> bool {
        match &self.detail {
            Detail::Partnered(partner) => {
                !partner.filters.is_empty()
                    && partner.filters.iter().all(|filter| filter.matches(name))
            }
            _ => false,
        }
    }

    /// Whether this partner has adopted a device on the bus.
    pub fn partner_initialized(&self) -> bool {
        match &self.detail {
            Detail::Partnered(partner) => partner.initialized.load(Ordering::Acquire),
            _ => false,
        }
    }

    /// Register a per-PGN callback on a partnered control function,
    /// optionally restricted to messages destined to one internal CF.
    ///
    /// Returns true on first insertion, false on duplicates and on
    /// non-partnered control functions.
    pub fn add_pgn_callback(
        &self,
        pgn: u32,
        callback: PgnCallback,
        destination: Option<Arc<ControlFunction>>,
    ) -> bool {
        let Detail::Partnered(partner) = &self.detail else {
            return false;
        };
        let mut callbacks = partner.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        let duplicate = callbacks
            .iter()
            .any(|entry| entry.pgn == pgn && Arc::ptr_eq(&entry.callback, &callback));
        if duplicate {
            return false;
        }
        callbacks.push(PartnerCallbackEntry {
            pgn,
            callback,
            destination,
        });
        true
    }

    /// Remove a previously registered partner callback. Returns true when
    /// an entry was removed.
    pub fn remove_pgn_callback(&self, pgn: u32, callback: &PgnCallback) -> bool {
        let Detail::Partnered(partner) = &self.detail else {
            return false;
        };
        let mut callbacks = partner.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        let before = callbacks.len();
        callbacks.retain(|entry| !(entry.pgn == pgn && Arc::ptr_eq(&entry.callback, callback)));
        callbacks.len() != before
    }

    /// Destroy this control function via its network.
    ///
    /// See [`NetworkManager::destroy_control_function`] for the reference
    /// counting contract.
    pub fn destroy(self: &Arc<Self>, expected_references: usize) -> bool {
        match self.network.upgrade() {
            Some(network) => network.destroy_control_function(self, expected_references),
            None => true,
        }
    }

    pub(crate) fn detail(&self) -> &Detail {
        &self.detail
    }

    /// Snapshot of matching partner callbacks, taken under the partner's
    /// own lock so dispatch can run without it.
    pub(crate) fn partner_callbacks_for(
        &self,
        pgn: u32,
    ) -> Vec<(PgnCallback, Option<Arc<ControlFunction>>)> {
        match &self.detail {
            Detail::Partnered(partner) => partner
                .callbacks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .filter(|entry| entry.pgn == pgn)
                .map(|entry| (Arc::clone(&entry.callback), entry.destination.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn set_partner_initialized(&self) {
        if let Detail::Partnered(partner) = &self.detail {
            partner.initialized.store(true, Ordering::Release);
        }
    }
}

impl core::fmt::Debug for ControlFunction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ControlFunction")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("address", &self.address())
            .finish()
    }
}
