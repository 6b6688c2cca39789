//! Classic CAN frame carrier used between the stack and hardware plugins.

use embedded_can::{ExtendedId, Frame as EmbeddedFrame, Id, StandardId};

use crate::identifier::Identifier;
use crate::CAN_DATA_LENGTH;

/// A classic CAN 2.0 frame.
///
/// The stack only routes 29-bit extended frames, but the carrier can hold
/// 11-bit frames so hardware plugins do not have to filter before handing
/// frames over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Raw identifier; 29 bits when `extended`, 11 bits otherwise.
    pub identifier: u32,
    /// True for 29-bit extended identifiers.
    pub extended: bool,
    /// Payload bytes; only the first `len` are valid.
    pub data: [u8; CAN_DATA_LENGTH],
    /// Number of valid payload bytes.
    pub len: u8,
}

impl Frame {
    /// Build an extended frame from a validated identifier and payload.
    ///
    /// Returns `None` when the payload exceeds 8 bytes.
    pub fn new_extended(identifier: Identifier, payload: &[u8]) -> Option<Frame> {
        if payload.len() > CAN_DATA_LENGTH {
            return None;
        }
        let mut data = [0u8; CAN_DATA_LENGTH];
        data[..payload.len()].copy_from_slice(payload);
        Some(Frame {
            identifier: identifier.raw(),
            extended: true,
            data,
            len: payload.len() as u8,
        })
    }

    /// The valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len.min(CAN_DATA_LENGTH as u8))]
    }

    /// Approximate number of bits this frame occupies on the wire,
    /// including framing overhead and a worst-case stuffing estimate.
    /// Feeds the busload estimator.
    pub fn bit_count(&self) -> u32 {
        let data_bits = 8 * u32::from(self.len);
        47 + data_bits + (34 + data_bits - 1) / 4
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame {
            identifier: 0,
            extended: true,
            data: [0u8; CAN_DATA_LENGTH],
            len: 0,
        }
    }
}

impl EmbeddedFrame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > CAN_DATA_LENGTH {
            return None;
        }
        let mut buf = [0u8; CAN_DATA_LENGTH];
        buf[..data.len()].copy_from_slice(data);
        let (identifier, extended) = match id.into() {
            Id::Standard(id) => (u32::from(id.as_raw()), false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        Some(Frame {
            identifier,
            extended,
            data: buf,
            len: data.len() as u8,
        })
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        // Remote frames play no role in ISO 11783.
        None
    }

    fn is_extended(&self) -> bool {
        self.extended
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        if self.extended {
            ExtendedId::new(self.identifier & 0x1FFF_FFFF)
                .map(Id::Extended)
                .unwrap_or(Id::Extended(ExtendedId::ZERO))
        } else {
            StandardId::new((self.identifier & 0x7FF) as u16)
                .map(Id::Standard)
                .unwrap_or(Id::Standard(StandardId::ZERO))
        }
    }

    fn dlc(&self) -> usize {
        usize::from(self.len)
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{Destination, Priority};

    #[test]
    fn payload_is_bounded() {
        let id = Identifier::new(0x18EF_2611).unwrap();
        assert!(Frame::new_extended(id, &[0u8; 9]).is_none());
        let frame = Frame::new_extended(id, &[1, 2, 3]).unwrap();
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.len, 3);
    }

    #[test]
    fn bit_count_for_full_frame() {
        let id = Identifier::encode(0x00EE00, Destination::Address(0xFF), 0x42, Priority::DEFAULT)
            .unwrap();
        let frame = Frame::new_extended(id, &[0u8; 8]).unwrap();
        // 47 overhead + 64 data + (34 + 64 - 1) / 4 stuffing.
        assert_eq!(frame.bit_count(), 47 + 64 + 24);
    }

    #[test]
    fn embedded_can_interop() {
        let id = Identifier::new(0x18EE_FF80).unwrap();
        let frame = Frame::new_extended(id, &[0xAA; 8]).unwrap();
        assert!(EmbeddedFrame::is_extended(&frame));
        assert_eq!(EmbeddedFrame::dlc(&frame), 8);
        match EmbeddedFrame::id(&frame) {
            Id::Extended(id) => assert_eq!(id.as_raw(), 0x18EE_FF80),
            Id::Standard(_) => panic!("expected an extended id"),
        }
    }
}
