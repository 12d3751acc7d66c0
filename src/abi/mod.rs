//! The host ABI boundary.
//!
//! Everything that reads host memory through raw pointers or writes into
//! host-provided buffers lives below this module. The rest of the crate only
//! sees [`PropValue`](crate::PropValue), [`Guid`] and the safe traits.
//!
//! Layout contracts (checked by tests in each submodule):
//! - `GUID` is 16 bytes: `u32`, `u16`, `u16`, `[u8; 8]`, little-endian fields.
//! - `PROPVARIANT` is 16 bytes: `vt: u16` at offset 0, payload at offset 8.
//! - `BSTR` points just past a `u32` byte-length prefix.
//! - Every COM object starts with a pointer to its vtable; the first three
//!   slots are `QueryInterface`, `AddRef`, `Release`.

pub mod bstr;
pub mod com;
pub mod exports;
pub mod guid;
pub mod handler;
pub mod hresult;
pub mod propvariant;
pub mod stream;

pub use guid::{Guid, guid_bytes, parse_guid, seven_zip_format, seven_zip_interface};
pub use hresult::HRESULT;

/// Signature of the format sniffer handed out by `GetIsArc`.
///
/// Returns one of the [`IsArcResult`](crate::IsArcResult) codes.
pub type IsArcFn = unsafe extern "system" fn(data: *const u8, size: usize) -> u32;
