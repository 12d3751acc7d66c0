//! Respawn VPK archives as used in Titanfall 2.
//!
//! Registers the format so 7-Zip recognizes `.vpk` directory files by their
//! signature; there is no reader yet, so opening one is reported as
//! unsupported.
//!
//! ```text
//! sevenzip-plugins-build 64 --release demos/tf2vpk.rs
//! ```
//!
//! Put the DLL in `7-Zip/Formats/` (the arch must match).

use sevenzip_plugins::{ArcFlags, ArcInfo, Guid, Registry, Signature};

pub const CLASS_ID: Guid = Guid::from_u128(0x3a128a09_88fe_45db_8727_565dff106ebe);

/// Magic and version 2.3 of a VPK directory file.
pub const SIGNATURE: &[u8] = b"\x55\xAA\x12\x34\x02\x00\x03\x00";

pub fn register(registry: &mut Registry) {
    registry.register(
        ArcInfo::new("VPK0203", CLASS_ID, "vpk")
            .with_flags(ArcFlags::PURE_START_OPEN)
            .with_signature(Signature::Single(SIGNATURE)),
    );
}
