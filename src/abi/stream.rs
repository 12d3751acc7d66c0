//! Owned references to host objects, and `std::io` adapters over host streams.

use std::ffi::c_void;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::ptr::NonNull;

use super::com::{
    IInStreamVtbl, ISequentialInStreamVtbl, ISequentialOutStreamVtbl, IUnknownVtbl,
    STREAM_SEEK_CUR, STREAM_SEEK_END, STREAM_SEEK_SET,
};
use super::hresult::HRESULT;

/// Largest chunk handed to a single host Read/Write call.
const MAX_CHUNK: usize = 1024 * 1024;

/// A counted reference to a host COM object whose vtable has layout `V`.
///
/// `V` must be a `#[repr(C)]` vtable starting with [`IUnknownVtbl`].
/// Dropping the reference calls `Release`.
pub struct ComRef<V> {
    ptr: NonNull<c_void>,
    _vtbl: PhantomData<*const V>,
}

impl<V> ComRef<V> {
    /// Take over a reference the host already counted for us (out-parameters).
    ///
    /// # Safety
    /// `ptr` must be null or a live COM object implementing `V`.
    pub unsafe fn from_owned(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            _vtbl: PhantomData,
        })
    }

    /// Add a reference to a pointer the host lent us (in-parameters).
    ///
    /// # Safety
    /// `ptr` must be null or a live COM object implementing `V`.
    pub unsafe fn from_borrowed(ptr: *mut c_void) -> Option<Self> {
        let this = unsafe { Self::from_owned(ptr)? };
        unsafe { (this.unknown().add_ref)(this.as_raw()) };
        Some(this)
    }

    pub fn as_raw(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    pub fn vtbl(&self) -> &V {
        unsafe { &**(self.ptr.as_ptr() as *const *const V) }
    }

    fn unknown(&self) -> &IUnknownVtbl {
        unsafe { &**(self.ptr.as_ptr() as *const *const IUnknownVtbl) }
    }
}

impl<V> Drop for ComRef<V> {
    fn drop(&mut self) {
        unsafe { (self.unknown().release)(self.as_raw()) };
    }
}

fn host_error(op: &str, hr: HRESULT) -> io::Error {
    io::Error::other(format!("host {op} failed: {hr:?}"))
}

/// `Read + Seek` over a host `IInStream`.
pub struct HostInStream {
    inner: ComRef<IInStreamVtbl>,
}

impl HostInStream {
    pub fn new(inner: ComRef<IInStreamVtbl>) -> Self {
        Self { inner }
    }

    /// Total stream length; leaves the position at the start.
    pub fn len(&mut self) -> io::Result<u64> {
        let size = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(0))?;
        Ok(size)
    }
}

impl Read for HostInStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut processed: u32 = 0;
        let len = buf.len().min(MAX_CHUNK) as u32;
        let hr = unsafe {
            (self.inner.vtbl().read)(self.inner.as_raw(), buf.as_mut_ptr(), len, &mut processed)
        };
        if hr.is_err() {
            return Err(host_error("read", hr));
        }
        Ok(processed as usize)
    }
}

impl Seek for HostInStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, origin) = match pos {
            SeekFrom::Start(n) => (
                i64::try_from(n).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?,
                STREAM_SEEK_SET,
            ),
            SeekFrom::Current(n) => (n, STREAM_SEEK_CUR),
            SeekFrom::End(n) => (n, STREAM_SEEK_END),
        };
        let mut new_position: u64 = 0;
        let hr = unsafe {
            (self.inner.vtbl().seek)(self.inner.as_raw(), offset, origin, &mut new_position)
        };
        if hr.is_err() {
            return Err(host_error("seek", hr));
        }
        Ok(new_position)
    }
}

/// `Read` over a host `ISequentialInStream`.
pub struct HostSequentialInStream {
    inner: ComRef<ISequentialInStreamVtbl>,
}

impl HostSequentialInStream {
    pub fn new(inner: ComRef<ISequentialInStreamVtbl>) -> Self {
        Self { inner }
    }
}

impl Read for HostSequentialInStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut processed: u32 = 0;
        let len = buf.len().min(MAX_CHUNK) as u32;
        let hr = unsafe {
            (self.inner.vtbl().read)(self.inner.as_raw(), buf.as_mut_ptr(), len, &mut processed)
        };
        if hr.is_err() {
            return Err(host_error("read", hr));
        }
        Ok(processed as usize)
    }
}

/// `Write` over a host `ISequentialOutStream`.
pub struct HostOutStream {
    inner: ComRef<ISequentialOutStreamVtbl>,
}

impl HostOutStream {
    pub fn new(inner: ComRef<ISequentialOutStreamVtbl>) -> Self {
        Self { inner }
    }
}

impl Write for HostOutStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut processed: u32 = 0;
        let len = buf.len().min(MAX_CHUNK) as u32;
        let hr = unsafe {
            (self.inner.vtbl().write)(self.inner.as_raw(), buf.as_ptr(), len, &mut processed)
        };
        if hr.is_err() {
            return Err(host_error("write", hr));
        }
        if processed == 0 && len != 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        Ok(processed as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
