//! The 64-bit ISO 11783-5 / J1939 NAME.
//!
//! Bit layout, LSB first:
//!
//! ```text
//! Bits  0..=20  (21 bits) : identity number
//! Bits 21..=31  (11 bits) : manufacturer code
//! Bits 32..=34  ( 3 bits) : ECU instance
//! Bits 35..=39  ( 5 bits) : function instance
//! Bits 40..=47  ( 8 bits) : function code
//! Bit  48       ( 1 bit ) : reserved, must be 0
//! Bits 49..=55  ( 7 bits) : device class
//! Bits 56..=59  ( 4 bits) : device class instance
//! Bits 60..=62  ( 3 bits) : industry group
//! Bit  63       ( 1 bit ) : arbitrary-address-capable
//! ```
//!
//! The full 64-bit value is the tie-break in address-claim contention: the
//! numerically *smaller* NAME wins.

use core::fmt;

/// Industry group (bits 60..=62 of the NAME). SPN 2846.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndustryGroup {
    /// Global, applies to all industries.
    Global = 0,
    /// On-highway equipment.
    OnHighway = 1,
    /// Agricultural and forestry equipment.
    AgriculturalAndForestry = 2,
    /// Construction equipment.
    Construction = 3,
    /// Marine equipment.
    Marine = 4,
    /// Industrial / process control.
    Industrial = 5,
    /// Reserved value 6.
    Reserved6 = 6,
    /// Reserved value 7.
    Reserved7 = 7,
}

impl IndustryGroup {
    /// Decode from the 3-bit field value.
    pub const fn from_raw(raw: u8) -> IndustryGroup {
        match raw & 0x07 {
            0 => IndustryGroup::Global,
            1 => IndustryGroup::OnHighway,
            2 => IndustryGroup::AgriculturalAndForestry,
            3 => IndustryGroup::Construction,
            4 => IndustryGroup::Marine,
            5 => IndustryGroup::Industrial,
            6 => IndustryGroup::Reserved6,
            _ => IndustryGroup::Reserved7,
        }
    }
}

/// A J1939 NAME.
///
/// Numerical ordering of the raw value is meaningful (claim contention), so
/// `Name` derives `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(u64);

impl Name {
    /// Wrap a raw 64-bit NAME.
    pub const fn from_raw(raw: u64) -> Name {
        Name(raw)
    }

    /// The raw 64-bit value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Start building a NAME field by field.
    pub const fn builder() -> NameBuilder {
        NameBuilder { raw: 0 }
    }

    /// Identity number (bits 0..=20): the serial number the manufacturer
    /// assigned to this unit.
    pub const fn identity_number(self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    /// Manufacturer code (bits 21..=31).
    pub const fn manufacturer_code(self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    /// ECU instance (bits 32..=34).
    pub const fn ecu_instance(self) -> u8 {
        ((self.0 >> 32) & 0x07) as u8
    }

    /// Function instance (bits 35..=39).
    pub const fn function_instance(self) -> u8 {
        ((self.0 >> 35) & 0x1F) as u8
    }

    /// Function code (bits 40..=47). Values at and above 128 are
    /// industry-group specific.
    pub const fn function_code(self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    /// Device class (bits 49..=55), "vehicle system" in SAE J1939.
    pub const fn device_class(self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    /// Device class instance (bits 56..=59).
    pub const fn device_class_instance(self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Industry group (bits 60..=62).
    pub const fn industry_group(self) -> IndustryGroup {
        IndustryGroup::from_raw(((self.0 >> 60) & 0x07) as u8)
    }

    /// Whether this device may claim any address in the arbitrary range
    /// rather than being fixed to its preferred address (bit 63).
    pub const fn arbitrary_address_capable(self) -> bool {
        (self.0 >> 63) & 0x01 != 0
    }

    /// Little-endian wire representation, as carried in an Address Claim.
    pub const fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decode from the little-endian wire representation.
    pub const fn from_le_bytes(bytes: [u8; 8]) -> Name {
        Name(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Incremental builder for a [`Name`].
#[derive(Debug, Clone, Copy)]
pub struct NameBuilder {
    raw: u64,
}

impl NameBuilder {
    /// Set the identity number (21 bits; excess bits are masked).
    pub const fn identity_number(mut self, value: u32) -> NameBuilder {
        self.raw = (self.raw & !0x1F_FFFF) | (value as u64 & 0x1F_FFFF);
        self
    }

    /// Set the manufacturer code (11 bits).
    pub const fn manufacturer_code(mut self, value: u16) -> NameBuilder {
        self.raw = (self.raw & !(0x7FF << 21)) | ((value as u64 & 0x7FF) << 21);
        self
    }

    /// Set the ECU instance (3 bits).
    pub const fn ecu_instance(mut self, value: u8) -> NameBuilder {
        self.raw = (self.raw & !(0x07 << 32)) | ((value as u64 & 0x07) << 32);
        self
    }

    /// Set the function instance (5 bits).
    pub const fn function_instance(mut self, value: u8) -> NameBuilder {
        self.raw = (self.raw & !(0x1F << 35)) | ((value as u64 & 0x1F) << 35);
        self
    }

    /// Set the function code (8 bits).
    pub const fn function_code(mut self, value: u8) -> NameBuilder {
        self.raw = (self.raw & !(0xFF << 40)) | ((value as u64) << 40);
        self
    }

    /// Set the device class (7 bits).
    pub const fn device_class(mut self, value: u8) -> NameBuilder {
        self.raw = (self.raw & !(0x7F << 49)) | ((value as u64 & 0x7F) << 49);
        self
    }

    /// Set the device class instance (4 bits).
    pub const fn device_class_instance(mut self, value: u8) -> NameBuilder {
        self.raw = (self.raw & !(0x0F << 56)) | ((value as u64 & 0x0F) << 56);
        self
    }

    /// Set the industry group.
    pub const fn industry_group(mut self, value: IndustryGroup) -> NameBuilder {
        self.raw = (self.raw & !(0x07 << 60)) | ((value as u64) << 60);
        self
    }

    /// Set or clear the arbitrary-address-capable bit.
    pub const fn arbitrary_address_capable(mut self, value: bool) -> NameBuilder {
        self.raw = (self.raw & !(1 << 63)) | ((value as u64) << 63);
        self
    }

    /// Finish, producing the NAME. The reserved bit (48) is always 0.
    pub const fn build(self) -> Name {
        Name(self.raw & !(1 << 48))
    }
}

/// The NAME parameter a [`NameFilter`] matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameField {
    /// Identity number, bits 0..=20.
    IdentityNumber,
    /// Manufacturer code, bits 21..=31.
    ManufacturerCode,
    /// ECU instance, bits 32..=34.
    EcuInstance,
    /// Function instance, bits 35..=39.
    FunctionInstance,
    /// Function code, bits 40..=47.
    FunctionCode,
    /// Device class, bits 49..=55.
    DeviceClass,
    /// Device class instance, bits 56..=59.
    DeviceClassInstance,
    /// Industry group, bits 60..=62.
    IndustryGroup,
    /// Arbitrary-address-capable flag, bit 63.
    ArbitraryAddressCapable,
}

/// One predicate over a single NAME parameter.
///
/// Partnered control functions carry a list of these; the set matches a
/// claimant only when every filter in the set matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameFilter {
    /// The parameter to compare.
    pub field: NameField,
    /// The required value for that parameter.
    pub value: u32,
}

impl NameFilter {
    /// Build a filter over one parameter.
    pub const fn new(field: NameField, value: u32) -> NameFilter {
        NameFilter { field, value }
    }

    /// Whether `name` satisfies this filter.
    pub fn matches(&self, name: Name) -> bool {
        let actual = match self.field {
            NameField::IdentityNumber => name.identity_number(),
            NameField::ManufacturerCode => u32::from(name.manufacturer_code()),
            NameField::EcuInstance => u32::from(name.ecu_instance()),
            NameField::FunctionInstance => u32::from(name.function_instance()),
            NameField::FunctionCode => u32::from(name.function_code()),
            NameField::DeviceClass => u32::from(name.device_class()),
            NameField::DeviceClassInstance => u32::from(name.device_class_instance()),
            NameField::IndustryGroup => name.industry_group() as u32,
            NameField::ArbitraryAddressCapable => u32::from(name.arbitrary_address_capable()),
        };
        actual == self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_round_trips_every_field() {
        let name = Name::builder()
            .identity_number(123_456)
            .manufacturer_code(275)
            .ecu_instance(2)
            .function_instance(9)
            .function_code(130)
            .device_class(25)
            .device_class_instance(3)
            .industry_group(IndustryGroup::AgriculturalAndForestry)
            .arbitrary_address_capable(true)
            .build();

        assert_eq!(name.identity_number(), 123_456);
        assert_eq!(name.manufacturer_code(), 275);
        assert_eq!(name.ecu_instance(), 2);
        assert_eq!(name.function_instance(), 9);
        assert_eq!(name.function_code(), 130);
        assert_eq!(name.device_class(), 25);
        assert_eq!(name.device_class_instance(), 3);
        assert_eq!(name.industry_group(), IndustryGroup::AgriculturalAndForestry);
        assert!(name.arbitrary_address_capable());
    }

    #[test]
    fn wire_representation_is_little_endian() {
        let name = Name::builder().identity_number(1).manufacturer_code(69).build();
        let bytes = name.to_le_bytes();
        assert_eq!(Name::from_le_bytes(bytes), name);
        assert_eq!(bytes[0], 0x01);
    }

    #[test]
    fn numeric_ordering_follows_raw_value() {
        let smaller = Name::from_raw(0x00FF);
        let larger = Name::from_raw(0x0100);
        assert!(smaller < larger);
    }

    #[test]
    fn filter_sets_require_every_filter() {
        let name = Name::builder()
            .function_code(0x81)
            .manufacturer_code(69)
            .build();
        let filters = [
            NameFilter::new(NameField::FunctionCode, 0x81),
            NameFilter::new(NameField::ManufacturerCode, 69),
        ];
        assert!(filters.iter().all(|f| f.matches(name)));

        let mismatched = [
            NameFilter::new(NameField::FunctionCode, 0x81),
            NameFilter::new(NameField::ManufacturerCode, 70),
        ];
        assert!(!mismatched.iter().all(|f| f.matches(name)));
    }
}
