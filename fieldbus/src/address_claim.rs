//! The J1939 address-claim state machine, one instance per internal
//! control function.
//!
//! The machine is a tagged state plus a pure transition function keyed on
//! `(state, event, timer)`. It performs no I/O itself: every call to
//! [`AddressClaimMachine::handle`] returns a list of [`ClaimEffect`]s that
//! the network manager applies (frames to emit, table moves to make). The
//! pump drives it with a `Tick` event on every update cycle.

use std::time::{Duration, Instant};

use fieldbus_frame::{Name, ARBITRARY_ADDRESS_RANGE_END, ARBITRARY_ADDRESS_RANGE_START};

/// Claim progress, observable on internal control functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// Machine constructed but not yet driven.
    None,
    /// Waiting for the first tick to kick off the claim.
    WaitOnRequest,
    /// About to broadcast a Request for Address Claim.
    SendRequestForClaim,
    /// Listening for existing claims during the contention period.
    WaitForRequestContentionPeriod,
    /// About to claim the preferred address.
    SendPreferredAddressClaim,
    /// Claim emitted; waiting out the settle window, or resolving a
    /// contender that beat us to the preferred address.
    ContendForPreferredAddress,
    /// Preferred address lost; about to claim from the arbitrary range.
    SendArbitraryAddressClaim,
    /// Re-emitting our claim in answer to a Request for Address Claim.
    SendReclaimAddressOnRequest,
    /// No claimable address; terminal.
    UnableToClaim,
    /// Address claimed and settled.
    AddressClaimingComplete,
}

/// View of the address table the machine consults when picking an
/// arbitrary address. Excludes the control function the machine belongs to.
pub(crate) trait AddressView {
    /// NAME of whatever currently occupies `address`, if anything.
    fn name_at(&self, address: u8) -> Option<Name>;
}

/// Inputs to the transition function.
pub(crate) enum ClaimEvent<'a> {
    /// Periodic drive from the pump.
    Tick {
        /// Current time, supplied by the caller so transitions stay pure.
        now: Instant,
        /// Current address-table occupancy.
        table: &'a dyn AddressView,
    },
    /// An Address Claim frame arrived on the bus.
    ClaimReceived {
        /// Current time, used to restart the settle window on contention.
        now: Instant,
        /// Source address the claimant used.
        source: u8,
        /// The claimant's NAME.
        name: Name,
    },
    /// A Request for Address Claim arrived, addressed to us or to all.
    RequestForClaimReceived,
    /// A Commanded Address message matched our NAME.
    AddressCommanded(u8),
}

/// Side effects the caller must apply after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimEffect {
    /// Broadcast a Request for Address Claim.
    SendRequestForClaim,
    /// Broadcast an Address Claim for the given address.
    SendAddressClaim(u8),
    /// Broadcast a Cannot Claim (claim with the NULL source address).
    SendCannotClaim,
    /// The claim settled; file the control function at this address.
    AddressAcquired(u8),
    /// The address was lost; move the control function to the inactive
    /// list.
    AddressLost,
}

/// Address-claim driver for one internal control function.
pub(crate) struct AddressClaimMachine {
    name: Name,
    preferred_address: u8,
    contention_window: Duration,
    state: ClaimState,
    timer: Option<Instant>,
    claimed_address: Option<u8>,
}

impl AddressClaimMachine {
    pub(crate) fn new(
        name: Name,
        preferred_address: u8,
        contention_window: Duration,
    ) -> AddressClaimMachine {
        AddressClaimMachine {
            name,
            preferred_address,
            contention_window,
            state: ClaimState::None,
            timer: None,
            claimed_address: None,
        }
    }

    /// Arm the machine; the next tick starts the claim.
    pub(crate) fn enable(&mut self) {
        if self.state == ClaimState::None {
            self.state = ClaimState::WaitOnRequest;
        }
    }

    pub(crate) fn state(&self) -> ClaimState {
        self.state
    }

    pub(crate) fn preferred_address(&self) -> u8 {
        self.preferred_address
    }

    /// The settled address, present only in `AddressClaimingComplete`.
    pub(crate) fn settled_address(&self) -> Option<u8> {
        (self.state == ClaimState::AddressClaimingComplete)
            .then_some(self.claimed_address)
            .flatten()
    }

    /// Run one transition and return the effects to apply.
    pub(crate) fn handle(&mut self, event: ClaimEvent<'_>) -> Vec<ClaimEffect> {
        match event {
            ClaimEvent::Tick { now, table } => self.tick(now, table),
            ClaimEvent::ClaimReceived { now, source, name } => {
                self.claim_received(now, source, name)
            }
            ClaimEvent::RequestForClaimReceived => self.request_received(),
            ClaimEvent::AddressCommanded(address) => self.address_commanded(address),
        }
    }

    fn timer_expired(&self, now: Instant) -> bool {
        self.timer
            .map(|start| now.duration_since(start) >= self.contention_window)
            .unwrap_or(false)
    }

    fn tick(&mut self, now: Instant, table: &dyn AddressView) -> Vec<ClaimEffect> {
        let mut effects = Vec::new();
        match self.state {
            ClaimState::None | ClaimState::UnableToClaim | ClaimState::AddressClaimingComplete => {}
            ClaimState::WaitOnRequest => {
                self.state = ClaimState::SendRequestForClaim;
            }
            ClaimState::SendRequestForClaim => {
                effects.push(ClaimEffect::SendRequestForClaim);
                self.timer = Some(now);
                self.state = ClaimState::WaitForRequestContentionPeriod;
            }
            ClaimState::WaitForRequestContentionPeriod => {
                if self.timer_expired(now) {
                    self.state = ClaimState::SendPreferredAddressClaim;
                    // Fall through on the next tick; a contender observed
                    // during the window is handled there via the table.
                }
            }
            ClaimState::SendPreferredAddressClaim => {
                let beaten = table
                    .name_at(self.preferred_address)
                    .is_some_and(|other| other <= self.name);
                if beaten || self.preferred_address >= fieldbus_frame::NULL_ADDRESS {
                    self.resolve_contention(&mut effects);
                } else {
                    effects.push(ClaimEffect::SendAddressClaim(self.preferred_address));
                    self.claimed_address = Some(self.preferred_address);
                    self.timer = Some(now);
                    self.state = ClaimState::ContendForPreferredAddress;
                }
            }
            ClaimState::ContendForPreferredAddress => match self.claimed_address {
                // Reached with no claim on the wire when a contender with a
                // stronger NAME appeared during the request window.
                None => self.resolve_contention(&mut effects),
                Some(address) => {
                    if self.timer_expired(now) {
                        self.state = ClaimState::AddressClaimingComplete;
                        effects.push(ClaimEffect::AddressAcquired(address));
                    }
                }
            },
            ClaimState::SendArbitraryAddressClaim => {
                match self.select_arbitrary_address(table) {
                    Some(address) => {
                        effects.push(ClaimEffect::SendAddressClaim(address));
                        self.claimed_address = Some(address);
                        self.timer = Some(now);
                        self.state = ClaimState::ContendForPreferredAddress;
                    }
                    None => {
                        self.state = ClaimState::UnableToClaim;
                        effects.push(ClaimEffect::SendCannotClaim);
                    }
                }
            }
            ClaimState::SendReclaimAddressOnRequest => {
                match self.claimed_address {
                    Some(address) => effects.push(ClaimEffect::SendAddressClaim(address)),
                    None => {}
                }
                self.state = ClaimState::AddressClaimingComplete;
            }
        }
        effects
    }

    fn claim_received(&mut self, now: Instant, source: u8, name: Name) -> Vec<ClaimEffect> {
        let mut effects = Vec::new();
        if name == self.name {
            // Our own claim echoed back, or a NAME collision the network
            // manager rejects at creation time.
            return effects;
        }

        match self.claimed_address {
            Some(ours) if source == ours => {
                if self.name < name {
                    // We keep the address; re-assert the claim. The settle
                    // window restarts since contention occurred inside it.
                    effects.push(ClaimEffect::SendAddressClaim(ours));
                    if self.state == ClaimState::ContendForPreferredAddress {
                        self.timer = Some(now);
                    }
                } else {
                    tracing::warn!(
                        address = ours,
                        "lost address to a lower NAME claimant"
                    );
                    self.claimed_address = None;
                    effects.push(ClaimEffect::AddressLost);
                    if self.name.arbitrary_address_capable() {
                        self.state = ClaimState::SendArbitraryAddressClaim;
                    } else {
                        self.state = ClaimState::UnableToClaim;
                        effects.push(ClaimEffect::SendCannotClaim);
                    }
                }
            }
            Some(_) => {}
            None => {
                // During the request contention window a claim for our
                // preferred address with a lower-or-equal NAME means we
                // must contend for it rather than claim it outright.
                if self.state == ClaimState::WaitForRequestContentionPeriod
                    && source == self.preferred_address
                    && name <= self.name
                {
                    self.state = ClaimState::ContendForPreferredAddress;
                }
            }
        }
        effects
    }

    fn request_received(&mut self) -> Vec<ClaimEffect> {
        match self.state {
            ClaimState::AddressClaimingComplete => {
                self.state = ClaimState::SendReclaimAddressOnRequest;
                Vec::new()
            }
            ClaimState::UnableToClaim => vec![ClaimEffect::SendCannotClaim],
            _ => Vec::new(),
        }
    }

    fn address_commanded(&mut self, address: u8) -> Vec<ClaimEffect> {
        tracing::debug!(address, "commanded to a new address, renegotiating");
        self.preferred_address = address;
        self.timer = None;
        self.state = ClaimState::SendPreferredAddressClaim;
        Vec::new()
    }

    /// Preferred address is not winnable: go arbitrary or give up.
    fn resolve_contention(&mut self, effects: &mut Vec<ClaimEffect>) {
        if self.name.arbitrary_address_capable() {
            self.state = ClaimState::SendArbitraryAddressClaim;
        } else {
            self.state = ClaimState::UnableToClaim;
            effects.push(ClaimEffect::SendCannotClaim);
        }
    }

    /// First address in the arbitrary range not held by a stronger NAME.
    fn select_arbitrary_address(&self, table: &dyn AddressView) -> Option<u8> {
        (ARBITRARY_ADDRESS_RANGE_START..=ARBITRARY_ADDRESS_RANGE_END).find(|address| {
            table
                .name_at(*address)
                .map_or(true, |occupant| occupant > self.name)
        })
    }
}
