//! Registration contract for higher-level transport protocols.
//!
//! The network manager never segments or reassembles anything itself;
//! protocols such as TP/ETP register here and get first refusal on every
//! outgoing message. The first protocol whose `transmit` returns `true`
//! owns the transfer, including the completion callback.

use std::sync::Arc;

use fieldbus_frame::Priority;

use crate::control_function::ControlFunction;
use crate::network::{NetworkManager, TransmitCompleteCallback};

/// An outgoing message as offered to a transport protocol.
pub struct TransmitRequest<'a> {
    /// Parameter group number of the message.
    pub pgn: u32,
    /// Payload bytes.
    pub data: &'a [u8],
    /// The internal control function sending the message.
    pub source: &'a Arc<ControlFunction>,
    /// Destination, or `None` for a broadcast.
    pub destination: Option<&'a Arc<ControlFunction>>,
    /// Requested priority.
    pub priority: Priority,
}

/// A higher-level transport protocol driven by the network manager.
pub trait TransportProtocol: Send {
    /// Called once, before the first `update`, with the owning network.
    fn initialize(&mut self, network: &Arc<NetworkManager>);

    /// Called on every network-manager tick.
    fn update(&mut self, network: &Arc<NetworkManager>);

    /// Offer an outgoing message to this protocol.
    ///
    /// Returning `true` transfers ownership of the transmit; the protocol
    /// must then `take()` and eventually invoke `on_complete` itself.
    fn transmit(
        &mut self,
        request: TransmitRequest<'_>,
        on_complete: &mut Option<TransmitCompleteCallback>,
    ) -> bool;
}
