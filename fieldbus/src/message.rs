//! Decoded messages as delivered to callbacks.

use std::sync::Arc;

use fieldbus_frame::{Identifier, BROADCAST_ADDRESS};

use crate::control_function::ControlFunction;

/// Longest payload any transport protocol may carry (ETP limit).
pub const ABSOLUTE_MAX_MESSAGE_LENGTH: usize = 1785;

/// A received message with its resolved endpoints.
///
/// Either endpoint may be unresolved: the source when the transmitting
/// device has not claimed an address we know about, the destination for
/// broadcasts and for addresses nothing occupies.
#[derive(Clone)]
pub struct Message {
    identifier: Identifier,
    data: Vec<u8>,
    source: Option<Arc<ControlFunction>>,
    destination: Option<Arc<ControlFunction>>,
}

impl Message {
    pub(crate) fn new(
        identifier: Identifier,
        data: Vec<u8>,
        source: Option<Arc<ControlFunction>>,
        destination: Option<Arc<ControlFunction>>,
    ) -> Message {
        Message {
            identifier,
            data,
            source,
            destination,
        }
    }

    /// The decoded 29-bit identifier.
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// The parameter group number.
    pub fn pgn(&self) -> u32 {
        self.identifier.pgn()
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The control function the message came from, when known.
    pub fn source_control_function(&self) -> Option<&Arc<ControlFunction>> {
        self.source.as_ref()
    }

    /// The control function the message is addressed to, when it is
    /// destination-specific and the address is occupied.
    pub fn destination_control_function(&self) -> Option<&Arc<ControlFunction>> {
        self.destination.as_ref()
    }

    /// True when the message is addressed to every node.
    pub fn is_broadcast(&self) -> bool {
        self.identifier.destination_address() == BROADCAST_ADDRESS
    }

    /// Little-endian u64 read, used by the Commanded Address handler.
    /// Returns `None` when the payload is too short.
    pub fn u64_at(&self, offset: usize) -> Option<u64> {
        let bytes = self.data.get(offset..offset + 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Some(u64::from_le_bytes(buf))
    }
}
