#![warn(missing_docs)]

//! Frame layer for an ISO 11783 / SAE J1939 stack.
//!
//! This crate is the stateless leaf of the stack: everything here is a pure
//! function over bytes and bit fields.
//!
//! - [`Identifier`] — the 29-bit extended CAN identifier codec: priority,
//!   parameter group number, source and destination addresses, PDU1/PDU2
//!   classification, and destination-checked encoding.
//! - [`Frame`] — a classic 8-byte CAN frame with its on-wire bit count,
//!   implementing [`embedded_can::Frame`] for interop with other CAN layers.
//! - [`Name`] — the 64-bit J1939 NAME with typed accessors for each bit
//!   field, plus [`NameFilter`] for matching peers by NAME parameters.
//!
//! # Quick start
//! ```rust
//! use fieldbus_frame::{Destination, Identifier, Name, Priority};
//!
//! let name = Name::builder()
//!     .identity_number(42)
//!     .manufacturer_code(69)
//!     .function_code(0x81)
//!     .arbitrary_address_capable(true)
//!     .build();
//! assert!(name.arbitrary_address_capable());
//!
//! let id = Identifier::encode(0x00EF00, Destination::Address(0x26), 0x81, Priority::default())
//!     .unwrap();
//! assert_eq!(id.source_address(), 0x81);
//! assert_eq!(id.destination_address(), 0x26);
//! assert_eq!(id.pgn(), 0x00EF00);
//! ```

mod frame;
mod identifier;
mod name;

pub use crate::frame::Frame;
pub use crate::identifier::{
    Destination, EncodeError, Identifier, IdentifierError, Priority,
};
pub use crate::name::{IndustryGroup, Name, NameBuilder, NameField, NameFilter};

/// Parameter group numbers used by the network-management layer itself.
pub mod pgn {
    /// Address Claim (8-byte NAME payload, priority 6).
    pub const ADDRESS_CLAIM: u32 = 0x00EE00;
    /// Parameter Group Number Request (3-byte requested-PGN payload).
    pub const REQUEST: u32 = 0x00EA00;
    /// Commanded Address (8-byte NAME + 1-byte new address).
    pub const COMMANDED_ADDRESS: u32 = 0x00FED8;
    /// Acknowledgement, emitted by higher protocols only.
    pub const ACKNOWLEDGE: u32 = 0x00E800;
}

/// The NULL address: a device that has not (or can not) claim an address.
pub const NULL_ADDRESS: u8 = 0xFE;

/// The global (broadcast) destination address.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Maximum payload bytes in a classic CAN frame.
pub const CAN_DATA_LENGTH: usize = 8;

/// First address in the range available to arbitrary-address-capable devices.
pub const ARBITRARY_ADDRESS_RANGE_START: u8 = 0x80;

/// Last address (inclusive) in the arbitrary-address range.
pub const ARBITRARY_ADDRESS_RANGE_END: u8 = 0xF7;
