//! 128-bit class and interface identifiers.
//!
//! [`Guid`] is `windows_core::GUID`; this module adds the 7-Zip id schemes
//! and the byte form 7-Zip reports for `kClassID`.

pub use windows_core::GUID as Guid;

use crate::error::Error;

/// 7-Zip interface id: `{23170F69-40C1-278A-0000-00gg00ss0000}`.
pub const fn seven_zip_interface(group: u8, sub: u8) -> Guid {
    Guid::from_values(0x23170F69, 0x40C1, 0x278A, [0, 0, 0, group, 0, sub, 0, 0])
}

/// 7-Zip format class id: `{23170F69-40C1-278A-1000-000110xx0000}`.
pub const fn seven_zip_format(id: u8) -> Guid {
    Guid::from_u128(0x23170f69_40c1_278a_1000_000110000000_u128 | ((id as u128) << 32))
}

/// The in-memory byte representation, as 7-Zip expects for `kClassID`.
pub const fn guid_bytes(guid: &Guid) -> [u8; 16] {
    let d1 = guid.data1.to_le_bytes();
    let d2 = guid.data2.to_le_bytes();
    let d3 = guid.data3.to_le_bytes();
    let d4 = guid.data4;
    [
        d1[0], d1[1], d1[2], d1[3], d2[0], d2[1], d3[0], d3[1], d4[0], d4[1], d4[2], d4[3], d4[4],
        d4[5], d4[6], d4[7],
    ]
}

/// Parse a GUID in the hyphenated, braced, simple or URN form.
pub fn parse_guid(s: &str) -> Result<Guid, Error> {
    uuid::Uuid::parse_str(s.trim())
        .map(|uuid| Guid::from_u128(uuid.as_u128()))
        .map_err(|e| Error::InvalidGuid(format!("{s:?}: {e}")))
}
