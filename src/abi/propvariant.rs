//! PROPVARIANT handling for 7-Zip properties.
//!
//! 7-Zip uses 16-byte PROPVARIANT, not the 24-byte version from the windows crate.

use std::time::SystemTime;

use super::bstr::{self, Bstr};
use super::hresult::{E_INVALIDARG, E_OUTOFMEMORY, HRESULT, S_OK};
use crate::types::PropValue;

/// VT (variant type) constants.
pub const VT_EMPTY: u16 = 0;
pub const VT_BSTR: u16 = 8;
pub const VT_BOOL: u16 = 11;
pub const VT_UI4: u16 = 19;
pub const VT_UI8: u16 = 21;
pub const VT_FILETIME: u16 = 64;

/// `VARIANT_TRUE` as stored in the low 16 bits of the payload.
const VARIANT_TRUE: u64 = 0xFFFF;

/// Windows FILETIME epoch: January 1, 1601
/// Difference between Unix epoch (1970) and Windows epoch (1601) in 100ns intervals
const FILETIME_UNIX_DIFF: u64 = 116444736000000000;

/// Convert a `SystemTime` to Windows FILETIME format (100ns intervals since 1601-01-01).
pub fn systemtime_to_filetime(time: SystemTime) -> u64 {
    match time.duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => FILETIME_UNIX_DIFF + (duration.as_nanos() / 100) as u64,
        // Before the Unix epoch: count back from it.
        Err(e) => FILETIME_UNIX_DIFF.saturating_sub((e.duration().as_nanos() / 100) as u64),
    }
}

/// Raw 16-byte PROPVARIANT matching 7-Zip's expectations.
///
/// The windows crate's PROPVARIANT is 24 bytes which causes crashes with 7-Zip.
#[repr(C)]
#[derive(Debug)]
pub struct RawPropVariant {
    pub vt: u16,
    pub reserved1: u16,
    pub reserved2: u16,
    pub reserved3: u16,
    pub data: u64,
}

// Verify our struct is the correct size
const _: () = assert!(std::mem::size_of::<RawPropVariant>() == 16);
const _: () = assert!(std::mem::offset_of!(RawPropVariant, data) == 8);

impl Default for RawPropVariant {
    fn default() -> Self {
        Self {
            vt: VT_EMPTY,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            data: 0,
        }
    }
}

impl RawPropVariant {
    fn with(vt: u16, data: u64) -> Self {
        Self {
            vt,
            data,
            ..Self::default()
        }
    }

    /// Encode a value. `BSTR` payloads are freshly allocated and owned by the
    /// result; returns `None` if that allocation fails.
    pub fn from_value(value: &PropValue<'_>) -> Option<Self> {
        let prop = match value {
            PropValue::Empty => Self::default(),
            PropValue::Str(s) => Self::with_bstr(bstr::alloc_str(s), s.is_empty())?,
            PropValue::Bytes(b) => Self::with_bstr(bstr::alloc_bytes(b), false)?,
            PropValue::Bool(b) => Self::with(VT_BOOL, if *b { VARIANT_TRUE } else { 0 }),
            PropValue::U32(v) => Self::with(VT_UI4, *v as u64),
            PropValue::U64(v) => Self::with(VT_UI8, *v),
            PropValue::FileTime(v) => Self::with(VT_FILETIME, *v),
        };
        Some(prop)
    }

    /// A null `BSTR` is an empty string to the host, so it only means
    /// allocation failure when there was text to allocate.
    fn with_bstr(ptr: Bstr, empty_text: bool) -> Option<Self> {
        if ptr.is_null() && !empty_text {
            None
        } else {
            // The pointer occupies the low bytes of the payload on 32-bit hosts.
            Some(Self::with(VT_BSTR, ptr as usize as u64))
        }
    }

    fn bstr_ptr(&self) -> Bstr {
        self.data as usize as Bstr
    }

    /// Free any allocated payload and reset to VT_EMPTY.
    ///
    /// # Safety
    /// A `VT_BSTR` payload must be a live `BSTR` owned by this value.
    pub unsafe fn clear(&mut self) {
        if self.vt == VT_BSTR {
            unsafe { bstr::free(self.bstr_ptr()) };
        }
        self.vt = VT_EMPTY;
        self.data = 0;
    }

    /// Extract a text value.
    ///
    /// # Safety
    /// A `VT_BSTR` payload must be a live `BSTR`.
    pub unsafe fn get_bstr(&self) -> Option<String> {
        if self.vt != VT_BSTR {
            return None;
        }
        Some(unsafe { bstr::to_string(self.bstr_ptr()) }.unwrap_or_default())
    }

    /// Extract a binary value.
    ///
    /// # Safety
    /// A `VT_BSTR` payload must be a live `BSTR`.
    pub unsafe fn get_bytes(&self) -> Option<Vec<u8>> {
        if self.vt != VT_BSTR {
            return None;
        }
        Some(unsafe { bstr::as_bytes(self.bstr_ptr()) }.to_vec())
    }

    /// Returns `Some(value)` if the type is VT_UI8 or VT_UI4, `None` otherwise.
    pub fn get_u64(&self) -> Option<u64> {
        match self.vt {
            VT_UI8 => Some(self.data),
            VT_UI4 => Some(self.data & 0xFFFF_FFFF),
            _ => None,
        }
    }

    /// Returns `Some(value)` if the type is VT_UI4, `None` otherwise.
    pub fn get_u32(&self) -> Option<u32> {
        if self.vt == VT_UI4 {
            Some(self.data as u32)
        } else {
            None
        }
    }

    /// VARIANT_TRUE = -1 (0xFFFF), VARIANT_FALSE = 0
    pub fn get_bool(&self) -> Option<bool> {
        if self.vt == VT_BOOL {
            Some(self.data & 0xFFFF != 0)
        } else {
            None
        }
    }

    pub fn get_filetime(&self) -> Option<u64> {
        if self.vt == VT_FILETIME {
            Some(self.data)
        } else {
            None
        }
    }
}

/// Write a value into a host-provided PROPVARIANT.
///
/// The destination is overwritten without being read: hosts pass either a
/// `VT_EMPTY` variant or uninitialized memory. On failure the destination is
/// left as `VT_EMPTY`.
///
/// # Safety
/// `dest` must be null or point to at least 16 writable bytes.
pub unsafe fn write_propvariant(dest: *mut RawPropVariant, value: &PropValue<'_>) -> HRESULT {
    if dest.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        match RawPropVariant::from_value(value) {
            Some(prop) => {
                dest.write_unaligned(prop);
                S_OK
            }
            None => {
                dest.write_unaligned(RawPropVariant::default());
                E_OUTOFMEMORY
            }
        }
    }
}

/// Reset a host-provided PROPVARIANT to `VT_EMPTY`.
///
/// # Safety
/// `dest` must be null or point to at least 16 writable bytes.
pub unsafe fn reset_propvariant(dest: *mut RawPropVariant) {
    if !dest.is_null() {
        unsafe { dest.write_unaligned(RawPropVariant::default()) }
    }
}
