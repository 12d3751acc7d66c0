//! `BSTR` allocation compatible with the host's allocator.
//!
//! The host frees every `BSTR` we hand it, so the allocation must come from
//! the same allocator it uses: `oleaut32` on Windows, and the `malloc`-based
//! scheme of 7-Zip's `MyWindows.cpp` elsewhere. In both cases the pointer
//! addresses the first character and a `u32` byte length precedes it.

/// One `OLECHAR`: UTF-16 on Windows, `wchar_t` (UTF-32) elsewhere.
#[cfg(windows)]
pub type WideChar = u16;
#[cfg(not(windows))]
pub type WideChar = u32;

/// A raw `BSTR`.
pub type Bstr = *mut WideChar;

#[cfg(windows)]
mod imp {
    use super::{Bstr, WideChar};
    use windows::Win32::Foundation::SysAllocStringByteLen;
    use windows::core::BSTR;

    pub fn alloc_str(value: &str) -> Bstr {
        BSTR::from(value).into_raw() as Bstr
    }

    pub fn alloc_bytes(bytes: &[u8]) -> Bstr {
        unsafe { SysAllocStringByteLen(Some(bytes)).into_raw() as Bstr }
    }

    pub unsafe fn free(bstr: Bstr) {
        // Dropping the owned wrapper calls SysFreeString.
        unsafe { drop(BSTR::from_raw(bstr as *const WideChar)) }
    }
}

#[cfg(not(windows))]
mod imp {
    use super::{Bstr, WideChar};
    use std::mem::size_of;

    const PREFIX: usize = size_of::<u32>();
    const CHAR: usize = size_of::<WideChar>();

    /// `SysAllocStringByteLen`: the payload is followed by at least one zero
    /// `OLECHAR`, rounded up to `OLECHAR` alignment.
    pub fn alloc_bytes(bytes: &[u8]) -> Bstr {
        let Ok(len) = u32::try_from(bytes.len()) else {
            return std::ptr::null_mut();
        };
        let size = (bytes.len() + CHAR + CHAR - 1) & !(CHAR - 1);
        unsafe {
            let base = libc::malloc(PREFIX + size) as *mut u8;
            if base.is_null() {
                return std::ptr::null_mut();
            }
            (base as *mut u32).write_unaligned(len);
            let data = base.add(PREFIX);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
            std::ptr::write_bytes(data.add(bytes.len()), 0, size - bytes.len());
            data as Bstr
        }
    }

    /// `SysAllocStringLen` over the string's code points.
    pub fn alloc_str(value: &str) -> Bstr {
        let chars: Vec<WideChar> = value.chars().map(|c| c as WideChar).collect();
        let size = chars.len() * CHAR;
        let Ok(len) = u32::try_from(size) else {
            return std::ptr::null_mut();
        };
        unsafe {
            let base = libc::malloc(PREFIX + size + CHAR) as *mut u8;
            if base.is_null() {
                return std::ptr::null_mut();
            }
            (base as *mut u32).write_unaligned(len);
            let data = base.add(PREFIX) as *mut WideChar;
            std::ptr::copy_nonoverlapping(chars.as_ptr(), data, chars.len());
            data.add(chars.len()).write_unaligned(0);
            data
        }
    }

    pub unsafe fn free(bstr: Bstr) {
        unsafe { libc::free((bstr as *mut u8).sub(PREFIX) as *mut libc::c_void) }
    }
}

/// Allocate a text `BSTR`. Returns null on allocation failure, and may
/// return null for an empty string.
pub fn alloc_str(value: &str) -> Bstr {
    imp::alloc_str(value)
}

/// Allocate a binary `BSTR` holding `bytes` verbatim (signatures, class ids).
/// Returns null on allocation failure.
pub fn alloc_bytes(bytes: &[u8]) -> Bstr {
    imp::alloc_bytes(bytes)
}

/// Free a `BSTR` allocated by this module or by the host.
///
/// # Safety
/// `bstr` must be null or a live `BSTR` from the host allocator.
pub unsafe fn free(bstr: Bstr) {
    if !bstr.is_null() {
        unsafe { imp::free(bstr) }
    }
}

/// Length in bytes, read from the prefix.
///
/// # Safety
/// `bstr` must be null or a live `BSTR`.
pub unsafe fn byte_len(bstr: Bstr) -> usize {
    if bstr.is_null() {
        return 0;
    }
    unsafe { (bstr as *const u8).sub(4).cast::<u32>().read_unaligned() as usize }
}

/// The payload bytes.
///
/// # Safety
/// `bstr` must be null or a live `BSTR`, and must outlive the returned slice.
pub unsafe fn as_bytes<'a>(bstr: Bstr) -> &'a [u8] {
    if bstr.is_null() {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(bstr as *const u8, byte_len(bstr)) }
}

/// Decode a text `BSTR`.
///
/// # Safety
/// `bstr` must be null or a live `BSTR`.
pub unsafe fn to_string(bstr: Bstr) -> Option<String> {
    if bstr.is_null() {
        return None;
    }
    let len = unsafe { byte_len(bstr) } / std::mem::size_of::<WideChar>();
    let chars = unsafe { std::slice::from_raw_parts(bstr as *const WideChar, len) };
    #[cfg(windows)]
    {
        Some(String::from_utf16_lossy(chars))
    }
    #[cfg(not(windows))]
    {
        Some(
            chars
                .iter()
                .map(|&c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect(),
        )
    }
}
