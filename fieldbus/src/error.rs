//! Error kinds surfaced by the network manager.

use core::fmt;

use fieldbus_frame::{EncodeError, IdentifierError, Name};

/// Everything that can go wrong between a caller and the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// A raw identifier did not fit in 29 bits.
    MalformedIdentifier(u32),
    /// A destination-specific (PDU1) PGN was sent to the global address.
    BroadcastOfDestinationSpecificPgn(u32),
    /// A broadcast (PDU2) PGN was sent to a specific address.
    DestinationOnBroadcastPgn(u32),
    /// Payload length outside `1..=ABSOLUTE_MAX_MESSAGE_LENGTH`. An empty
    /// payload reports a length of 0.
    PayloadTooLong(usize),
    /// The source control function has not completed its address claim.
    SourceControlFunctionNotClaimed,
    /// Payload exceeds one frame and no registered transport protocol
    /// accepted it.
    NoTransportProtocolForLength(usize),
    /// The hardware interface is stopped or was never attached.
    InterfaceNotRunning,
    /// A hardware plugin failed to open or perform I/O.
    PluginIoFailure,
    /// An internal control function with this NAME already exists on the
    /// network.
    DuplicateName(Name),
    /// The address claim did not (or can not) complete.
    AddressClaimFailed,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::MalformedIdentifier(raw) => {
                write!(f, "malformed identifier 0x{raw:08X}: exceeds 29 bits")
            }
            NetworkError::BroadcastOfDestinationSpecificPgn(pgn) => {
                write!(f, "PGN 0x{pgn:05X} is destination-specific and cannot be broadcast")
            }
            NetworkError::DestinationOnBroadcastPgn(pgn) => {
                write!(f, "PGN 0x{pgn:05X} is broadcast-form and cannot take a destination")
            }
            NetworkError::PayloadTooLong(len) => {
                write!(f, "payload length {len} is outside the sendable range")
            }
            NetworkError::SourceControlFunctionNotClaimed => {
                write!(f, "source control function has no claimed address")
            }
            NetworkError::NoTransportProtocolForLength(len) => {
                write!(f, "no transport protocol accepted a {len}-byte payload")
            }
            NetworkError::InterfaceNotRunning => write!(f, "hardware interface is not running"),
            NetworkError::PluginIoFailure => write!(f, "hardware plugin I/O failure"),
            NetworkError::DuplicateName(name) => {
                write!(f, "an internal control function with NAME {name} already exists")
            }
            NetworkError::AddressClaimFailed => write!(f, "address claim failed"),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<IdentifierError> for NetworkError {
    fn from(err: IdentifierError) -> Self {
        NetworkError::MalformedIdentifier(err.raw)
    }
}

impl From<EncodeError> for NetworkError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::BroadcastOfDestinationSpecificPgn(pgn) => {
                NetworkError::BroadcastOfDestinationSpecificPgn(pgn)
            }
            EncodeError::DestinationOnBroadcastPgn(pgn) => {
                NetworkError::DestinationOnBroadcastPgn(pgn)
            }
        }
    }
}
