//! Status codes returned across the host ABI.
//!
//! 7-Zip uses the Windows values on every platform (see `MyWindows.h`).

pub use windows_core::HRESULT;

pub const S_OK: HRESULT = HRESULT(0);
pub const S_FALSE: HRESULT = HRESULT(1);
pub const E_NOTIMPL: HRESULT = HRESULT(0x8000_4001_u32 as i32);
pub const E_NOINTERFACE: HRESULT = HRESULT(0x8000_4002_u32 as i32);
pub const E_POINTER: HRESULT = HRESULT(0x8000_4003_u32 as i32);
pub const E_ABORT: HRESULT = HRESULT(0x8000_4004_u32 as i32);
pub const E_FAIL: HRESULT = HRESULT(0x8000_4005_u32 as i32);
pub const CLASS_E_CLASSNOTAVAILABLE: HRESULT = HRESULT(0x8004_0111_u32 as i32);
pub const E_OUTOFMEMORY: HRESULT = HRESULT(0x8007_000E_u32 as i32);
pub const E_INVALIDARG: HRESULT = HRESULT(0x8007_0057_u32 as i32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bit() {
        assert!(S_OK.is_ok());
        assert!(S_FALSE.is_ok());
        assert!(E_INVALIDARG.is_err());
        assert!(CLASS_E_CLASSNOTAVAILABLE.is_err());
        assert_eq!(std::mem::size_of::<HRESULT>(), 4);
    }

    #[cfg(windows)]
    #[test]
    fn matches_windows_constants() {
        use windows::Win32::Foundation as win;
        assert_eq!(E_NOTIMPL, win::E_NOTIMPL);
        assert_eq!(E_NOINTERFACE, win::E_NOINTERFACE);
        assert_eq!(E_POINTER, win::E_POINTER);
        assert_eq!(E_ABORT, win::E_ABORT);
        assert_eq!(E_FAIL, win::E_FAIL);
        assert_eq!(CLASS_E_CLASSNOTAVAILABLE, win::CLASS_E_CLASSNOTAVAILABLE);
        assert_eq!(E_OUTOFMEMORY, win::E_OUTOFMEMORY);
        assert_eq!(E_INVALIDARG, win::E_INVALIDARG);
    }
}
