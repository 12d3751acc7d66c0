//! Generic COM handler wrapper that bridges safe traits to 7-Zip interfaces.

use std::ffi::c_void;
use std::io::{self, Seek, SeekFrom};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use crate::error::Error;
use crate::registry::ArchiveInterface;
use crate::traits::{ArchiveFormat, ArchiveReader, ArchiveUpdater, ReadSeek};
use crate::types::UpdateItem;

use super::com::{
    ASK_MODE_EXTRACT, ASK_MODE_TEST, FILE_TIME_TYPE_WINDOWS, IArchiveExtractCallbackVtbl,
    IArchiveUpdateCallbackVtbl, IID_IINARCHIVE, IID_IOUTARCHIVE, IID_IUNKNOWN, IInArchiveVtbl,
    IInStreamVtbl, IOutArchiveVtbl, ISequentialInStreamVtbl, ISequentialOutStreamVtbl,
    OP_RESULT_DATA_ERROR, OP_RESULT_OK, PropId, UPDATE_RESULT_ERROR, UPDATE_RESULT_OK,
};
use super::exports::guard;
use super::guid::Guid;
use super::hresult::{
    E_ABORT, E_FAIL, E_INVALIDARG, E_NOINTERFACE, E_NOTIMPL, E_POINTER, HRESULT, S_FALSE, S_OK,
};
use super::propvariant::{
    RawPropVariant, VT_BOOL, VT_BSTR, VT_FILETIME, VT_UI4, VT_UI8, reset_propvariant,
    write_propvariant,
};
use super::stream::{ComRef, HostInStream, HostOutStream, HostSequentialInStream};

/// Item properties listed by `GetPropertyInfo`, in order.
const ITEM_PROPS: [(PropId, u16); 9] = [
    (PropId::Path, VT_BSTR),
    (PropId::IsDir, VT_BOOL),
    (PropId::Size, VT_UI8),
    (PropId::PackSize, VT_UI8),
    (PropId::Attrib, VT_UI4),
    (PropId::CTime, VT_FILETIME),
    (PropId::ATime, VT_FILETIME),
    (PropId::MTime, VT_FILETIME),
    (PropId::Crc, VT_UI4),
];

/// Archive properties listed by `GetArchivePropertyInfo`.
const ARCHIVE_PROPS: [(PropId, u16); 1] = [(PropId::PhySize, VT_UI8)];

// =============================================================================
// Generic Plugin Handler
// =============================================================================

/// Generic COM handler that wraps a safe archive implementation.
///
/// One object serves both archive interfaces. `IInArchive` (and `IUnknown`)
/// is the object address, `IOutArchive` is the address of `out_vtbl`. Both
/// share one reference count; the object frees itself when it drops to zero.
/// Directions the format does not support get stub vtables and are never
/// handed out by `QueryInterface`.
#[repr(C)]
pub struct PluginHandler<T: ArchiveFormat> {
    /// Pointer to IInArchive vtable - MUST be first field for COM compatibility
    in_vtbl: *const IInArchiveVtbl<Self>,
    /// Pointer to IOutArchive vtable
    out_vtbl: *const IOutArchiveVtbl<Self>,
    ref_count: AtomicU32,
    readable: bool,
    writable: bool,
    /// Size of an item in the open archive, for update progress.
    item_size: Option<fn(&T, usize) -> Option<u64>>,
    /// The actual archive implementation (safe Rust)
    inner: T,
    /// The stream passed to `Open`, kept for updates.
    stream: Option<HostInStream>,
    archive_size: u64,
}

impl<T: ArchiveFormat> PluginHandler<T> {
    fn create(
        in_vtbl: &'static IInArchiveVtbl<Self>,
        out_vtbl: &'static IOutArchiveVtbl<Self>,
        readable: bool,
        writable: bool,
        item_size: Option<fn(&T, usize) -> Option<u64>>,
        iface: ArchiveInterface,
    ) -> *mut c_void {
        let raw = Box::into_raw(Box::new(Self {
            in_vtbl,
            out_vtbl,
            ref_count: AtomicU32::new(1),
            readable,
            writable,
            item_size,
            inner: T::default(),
            stream: None,
            archive_size: 0,
        }));
        debug!(format = T::name(), ?iface, "created archive object");
        match iface {
            ArchiveInterface::In => raw as *mut c_void,
            ArchiveInterface::Out => unsafe { (&raw mut (*raw).out_vtbl) as *mut c_void },
        }
    }

    /// Get the inner implementation.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: ArchiveReader> PluginHandler<T> {
    const IN_VTBL: IInArchiveVtbl<Self> = create_in_vtable::<T>();
    const OUT_STUB: IOutArchiveVtbl<Self> = create_out_vtable_stub::<T>();
}

impl<T: ArchiveUpdater> PluginHandler<T> {
    const OUT_VTBL: IOutArchiveVtbl<Self> = create_out_vtable::<T>();
    const IN_STUB: IInArchiveVtbl<Self> = create_in_vtable_stub::<T>();
}

fn reader_item_size<T: ArchiveReader>(inner: &T, index: usize) -> Option<u64> {
    inner.get_item(index).map(|item| item.size)
}

/// Create an object that exposes only `IInArchive`.
pub fn create_reader<T: ArchiveReader>(iface: ArchiveInterface) -> *mut c_void {
    PluginHandler::<T>::create(
        &PluginHandler::<T>::IN_VTBL,
        &PluginHandler::<T>::OUT_STUB,
        true,
        false,
        None,
        iface,
    )
}

/// Create an object that exposes only `IOutArchive`.
pub fn create_writer<T: ArchiveUpdater>(iface: ArchiveInterface) -> *mut c_void {
    PluginHandler::<T>::create(
        &PluginHandler::<T>::IN_STUB,
        &PluginHandler::<T>::OUT_VTBL,
        false,
        true,
        None,
        iface,
    )
}

/// Create an object that exposes both archive interfaces.
pub fn create_reader_writer<T: ArchiveReader + ArchiveUpdater>(
    iface: ArchiveInterface,
) -> *mut c_void {
    PluginHandler::<T>::create(
        &PluginHandler::<T>::IN_VTBL,
        &PluginHandler::<T>::OUT_VTBL,
        true,
        true,
        Some(reader_item_size::<T>),
        iface,
    )
}

// =============================================================================
// IUnknown implementation
// =============================================================================

unsafe extern "system" fn query_interface<T: ArchiveFormat>(
    this: *mut PluginHandler<T>,
    riid: *const Guid,
    ppv_object: *mut *mut c_void,
) -> HRESULT {
    unsafe {
        if ppv_object.is_null() {
            return E_POINTER;
        }
        *ppv_object = std::ptr::null_mut();
        if riid.is_null() {
            return E_INVALIDARG;
        }

        let handler = &*this;
        let riid = *riid;
        if riid == IID_IUNKNOWN || (riid == IID_IINARCHIVE && handler.readable) {
            *ppv_object = this as *mut c_void;
        } else if riid == IID_IOUTARCHIVE && handler.writable {
            // COM requires returning a pointer to the location containing the vtable pointer.
            *ppv_object = (&raw const handler.out_vtbl) as *mut c_void;
        } else {
            return E_NOINTERFACE;
        }
        add_ref(this);
        S_OK
    }
}

unsafe extern "system" fn add_ref<T: ArchiveFormat>(this: *mut PluginHandler<T>) -> u32 {
    unsafe {
        let handler = &*this;
        handler.ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

unsafe extern "system" fn release<T: ArchiveFormat>(this: *mut PluginHandler<T>) -> u32 {
    unsafe {
        // Avoid creating a reference before potential deallocation.
        let count = (*this).ref_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if count == 0 {
            debug!(format = T::name(), "released archive object");
            drop(Box::from_raw(this));
        }
        count
    }
}

// =============================================================================
// IInArchive implementation
// =============================================================================

unsafe extern "system" fn open<T: ArchiveReader>(
    this: *mut PluginHandler<T>,
    stream: *mut c_void,
    _max_check_start_position: *const u64,
    _open_callback: *mut c_void,
) -> HRESULT {
    guard("IInArchive::Open", || unsafe {
        let handler = &mut *this;
        let Some(com) = ComRef::<IInStreamVtbl>::from_borrowed(stream) else {
            return E_INVALIDARG;
        };
        let mut stream = HostInStream::new(com);

        let size = match stream.len() {
            Ok(size) => size,
            Err(e) => {
                warn!(format = T::name(), error = %e, "failed to size input stream");
                return S_FALSE;
            }
        };

        if let Err(e) = handler.inner.open(&mut stream, size) {
            debug!(format = T::name(), error = %e, "not opened");
            return S_FALSE;
        }

        handler.archive_size = size;
        handler.stream = Some(stream);
        S_OK
    })
}

unsafe extern "system" fn close<T: ArchiveReader>(this: *mut PluginHandler<T>) -> HRESULT {
    guard("IInArchive::Close", || unsafe {
        let handler = &mut *this;
        handler.inner.close();
        handler.stream = None;
        handler.archive_size = 0;
        S_OK
    })
}

unsafe extern "system" fn get_number_of_items<T: ArchiveReader>(
    this: *mut PluginHandler<T>,
    num_items: *mut u32,
) -> HRESULT {
    guard("IInArchive::GetNumberOfItems", || unsafe {
        if num_items.is_null() {
            return E_INVALIDARG;
        }
        let handler = &*this;
        *num_items = u32::try_from(handler.inner.item_count()).unwrap_or(u32::MAX);
        S_OK
    })
}

unsafe extern "system" fn get_property<T: ArchiveReader>(
    this: *mut PluginHandler<T>,
    index: u32,
    prop_id: u32,
    value: *mut RawPropVariant,
) -> HRESULT {
    guard("IInArchive::GetProperty", || unsafe {
        if value.is_null() {
            return E_INVALIDARG;
        }
        reset_propvariant(value);

        let handler = &*this;
        let Some(item) = handler.inner.get_item(index as usize) else {
            return E_INVALIDARG;
        };
        match PropId::from_u32(prop_id) {
            Some(id) => write_propvariant(value, &item.property(id)),
            None => S_OK,
        }
    })
}

unsafe extern "system" fn extract<T: ArchiveReader>(
    this: *mut PluginHandler<T>,
    indices: *const u32,
    num_items: u32,
    test_mode: i32,
    extract_callback: *mut c_void,
) -> HRESULT {
    guard("IInArchive::Extract", || unsafe {
        let handler = &mut *this;
        let Some(callback) = ComRef::<IArchiveExtractCallbackVtbl>::from_borrowed(extract_callback)
        else {
            return E_INVALIDARG;
        };
        let cb = callback.vtbl();
        let cb_raw = callback.as_raw();

        // Determine which indices to extract
        let count = handler.inner.item_count();
        let selected: Vec<usize> = if num_items == u32::MAX {
            (0..count).collect()
        } else if num_items == 0 {
            Vec::new()
        } else if indices.is_null() {
            return E_INVALIDARG;
        } else {
            std::slice::from_raw_parts(indices, num_items as usize)
                .iter()
                .map(|&i| i as usize)
                .collect()
        };
        if selected.iter().any(|&i| i >= count) {
            return E_INVALIDARG;
        }

        let total: u64 = selected
            .iter()
            .filter_map(|&i| handler.inner.get_item(i))
            .map(|item| item.size)
            .sum();
        let hr = (cb.set_total)(cb_raw, total);
        if hr.is_err() {
            return hr;
        }

        let testing = test_mode != 0;
        let ask_mode = if testing { ASK_MODE_TEST } else { ASK_MODE_EXTRACT };
        let mut completed: u64 = 0;

        for index in selected {
            let item_size = handler.inner.get_item(index).map_or(0, |item| item.size);

            let mut out_stream: *mut c_void = std::ptr::null_mut();
            let hr = (cb.get_stream)(cb_raw, index as u32, &mut out_stream, ask_mode);
            if hr.is_err() {
                return hr;
            }
            let out_stream = ComRef::<ISequentialOutStreamVtbl>::from_owned(out_stream);
            if out_stream.is_none() && !testing {
                // The host skips this item (e.g. a directory or a declined overwrite).
                continue;
            }

            let hr = (cb.prepare_operation)(cb_raw, ask_mode);
            if hr.is_err() {
                return hr;
            }

            // The host stream is released before the result is reported.
            let written = match out_stream {
                Some(stream) if !testing => {
                    let mut writer = HostOutStream::new(stream);
                    handler.inner.extract_to(index, &mut writer)
                }
                other => {
                    drop(other);
                    handler.inner.extract_to(index, &mut io::sink())
                }
            };
            let result = match written {
                Ok(_) => OP_RESULT_OK,
                Err(e) => {
                    warn!(format = T::name(), index, error = %e, "extraction failed");
                    OP_RESULT_DATA_ERROR
                }
            };

            let hr = (cb.set_operation_result)(cb_raw, result);
            if hr.is_err() {
                return hr;
            }

            completed += item_size;
            let hr = (cb.set_completed)(cb_raw, &completed);
            if hr.is_err() {
                return hr;
            }
        }

        S_OK
    })
}

unsafe extern "system" fn get_archive_property<T: ArchiveReader>(
    this: *mut PluginHandler<T>,
    prop_id: u32,
    value: *mut RawPropVariant,
) -> HRESULT {
    guard("IInArchive::GetArchiveProperty", || unsafe {
        if value.is_null() {
            return E_INVALIDARG;
        }
        reset_propvariant(value);

        let handler = &*this;
        if prop_id == PropId::PhySize as u32 && handler.stream.is_some() {
            let size = handler.inner.physical_size().unwrap_or(handler.archive_size);
            return write_propvariant(value, &crate::PropValue::U64(size));
        }
        S_OK
    })
}

unsafe fn write_count(out: *mut u32, count: usize) -> HRESULT {
    if out.is_null() {
        return E_INVALIDARG;
    }
    unsafe { *out = count as u32 };
    S_OK
}

unsafe fn write_property_info(
    table: &[(PropId, u16)],
    index: u32,
    name: *mut *mut u16,
    prop_id: *mut u32,
    var_type: *mut u16,
) -> HRESULT {
    if name.is_null() || prop_id.is_null() || var_type.is_null() {
        return E_INVALIDARG;
    }
    let Some(&(id, vt)) = table.get(index as usize) else {
        return E_INVALIDARG;
    };
    unsafe {
        // No name: the host uses its own label for well-known ids.
        *name = std::ptr::null_mut();
        *prop_id = id as u32;
        *var_type = vt;
    }
    S_OK
}

unsafe extern "system" fn get_number_of_properties<T: ArchiveReader>(
    _this: *mut PluginHandler<T>,
    num_props: *mut u32,
) -> HRESULT {
    unsafe { write_count(num_props, ITEM_PROPS.len()) }
}

unsafe extern "system" fn get_property_info<T: ArchiveReader>(
    _this: *mut PluginHandler<T>,
    index: u32,
    name: *mut *mut u16,
    prop_id: *mut u32,
    var_type: *mut u16,
) -> HRESULT {
    unsafe { write_property_info(&ITEM_PROPS, index, name, prop_id, var_type) }
}

unsafe extern "system" fn get_number_of_archive_properties<T: ArchiveReader>(
    _this: *mut PluginHandler<T>,
    num_props: *mut u32,
) -> HRESULT {
    unsafe { write_count(num_props, ARCHIVE_PROPS.len()) }
}

unsafe extern "system" fn get_archive_property_info<T: ArchiveReader>(
    _this: *mut PluginHandler<T>,
    index: u32,
    name: *mut *mut u16,
    prop_id: *mut u32,
    var_type: *mut u16,
) -> HRESULT {
    unsafe { write_property_info(&ARCHIVE_PROPS, index, name, prop_id, var_type) }
}

// =============================================================================
// IInArchive stubs for write-only formats
// =============================================================================

unsafe extern "system" fn open_stub<T: ArchiveFormat>(
    _this: *mut PluginHandler<T>,
    _stream: *mut c_void,
    _max_check_start_position: *const u64,
    _open_callback: *mut c_void,
) -> HRESULT {
    E_NOTIMPL
}

unsafe extern "system" fn close_stub<T: ArchiveFormat>(_this: *mut PluginHandler<T>) -> HRESULT {
    S_OK
}

unsafe extern "system" fn count_stub<T: ArchiveFormat>(
    _this: *mut PluginHandler<T>,
    count: *mut u32,
) -> HRESULT {
    unsafe { write_count(count, 0) }
}

unsafe extern "system" fn get_property_stub<T: ArchiveFormat>(
    _this: *mut PluginHandler<T>,
    _index: u32,
    _prop_id: u32,
    value: *mut RawPropVariant,
) -> HRESULT {
    unsafe { reset_propvariant(value) };
    E_INVALIDARG
}

unsafe extern "system" fn extract_stub<T: ArchiveFormat>(
    _this: *mut PluginHandler<T>,
    _indices: *const u32,
    _num_items: u32,
    _test_mode: i32,
    _extract_callback: *mut c_void,
) -> HRESULT {
    E_NOTIMPL
}

unsafe extern "system" fn get_archive_property_stub<T: ArchiveFormat>(
    _this: *mut PluginHandler<T>,
    _prop_id: u32,
    value: *mut RawPropVariant,
) -> HRESULT {
    unsafe { reset_propvariant(value) };
    S_OK
}

unsafe extern "system" fn property_info_stub<T: ArchiveFormat>(
    _this: *mut PluginHandler<T>,
    _index: u32,
    _name: *mut *mut u16,
    _prop_id: *mut u32,
    _var_type: *mut u16,
) -> HRESULT {
    E_INVALIDARG
}

// =============================================================================
// IOutArchive implementation
// =============================================================================

// IOutArchive wrapper functions that convert out_vtbl pointer to handler base
unsafe fn out_vtbl_to_handler<T: ArchiveFormat>(
    out_vtbl_ptr: *mut PluginHandler<T>,
) -> *mut PluginHandler<T> {
    unsafe {
        let offset = std::mem::offset_of!(PluginHandler::<T>, out_vtbl);
        (out_vtbl_ptr as *mut u8).sub(offset) as *mut PluginHandler<T>
    }
}

unsafe extern "system" fn out_query_interface<T: ArchiveFormat>(
    this: *mut PluginHandler<T>,
    riid: *const Guid,
    ppv_object: *mut *mut c_void,
) -> HRESULT {
    unsafe { query_interface(out_vtbl_to_handler(this), riid, ppv_object) }
}

unsafe extern "system" fn out_add_ref<T: ArchiveFormat>(this: *mut PluginHandler<T>) -> u32 {
    unsafe { add_ref(out_vtbl_to_handler(this)) }
}

unsafe extern "system" fn out_release<T: ArchiveFormat>(this: *mut PluginHandler<T>) -> u32 {
    unsafe { release(out_vtbl_to_handler(this)) }
}

unsafe extern "system" fn get_file_time_type<T: ArchiveFormat>(
    _this: *mut PluginHandler<T>,
    time_type: *mut u32,
) -> HRESULT {
    unsafe {
        if time_type.is_null() {
            return E_POINTER;
        }
        *time_type = FILE_TIME_TYPE_WINDOWS;
        S_OK
    }
}

/// Ask the update callback for one property of item `index` and decode it
/// with `read`. The host-allocated value is freed afterwards.
///
/// # Safety
/// `callback` must be a live host update callback.
unsafe fn update_property<R>(
    callback: &ComRef<IArchiveUpdateCallbackVtbl>,
    index: u32,
    prop: PropId,
    read: impl FnOnce(&RawPropVariant) -> R,
) -> Result<R, HRESULT> {
    let mut value = RawPropVariant::default();
    unsafe {
        let hr = (callback.vtbl().get_property)(callback.as_raw(), index, prop as u32, &mut value);
        if hr.is_err() {
            return Err(hr);
        }
        let decoded = read(&value);
        value.clear();
        Ok(decoded)
    }
}

unsafe fn update_name(
    callback: &ComRef<IArchiveUpdateCallbackVtbl>,
    index: u32,
) -> Result<Option<String>, HRESULT> {
    unsafe { update_property(callback, index, PropId::Path, |p| p.get_bstr()) }
}

struct PendingItem {
    new_data: bool,
    new_props: bool,
    index_in_archive: u32,
}

unsafe extern "system" fn update_items<T: ArchiveUpdater>(
    this: *mut PluginHandler<T>,
    out_stream: *mut c_void,
    num_items: u32,
    update_callback: *mut c_void,
) -> HRESULT {
    guard("IOutArchive::UpdateItems", || unsafe {
        let handler = &mut *out_vtbl_to_handler(this);

        let (Some(out), Some(callback)) = (
            ComRef::<ISequentialOutStreamVtbl>::from_borrowed(out_stream),
            ComRef::<IArchiveUpdateCallbackVtbl>::from_borrowed(update_callback),
        ) else {
            return E_INVALIDARG;
        };
        let cb = callback.vtbl();
        let cb_raw = callback.as_raw();

        // First pass: gather update info and calculate total size
        let mut pending = Vec::with_capacity(num_items as usize);
        let mut total: u64 = 0;
        for i in 0..num_items {
            let mut new_data: i32 = 0;
            let mut new_props: i32 = 0;
            let mut index_in_archive: u32 = u32::MAX;
            let hr = (cb.get_update_item_info)(
                cb_raw,
                i,
                &mut new_data,
                &mut new_props,
                &mut index_in_archive,
            );
            if hr.is_err() {
                return hr;
            }

            if new_data != 0 {
                match update_property(&callback, i, PropId::Size, RawPropVariant::get_u64) {
                    Ok(size) => total += size.unwrap_or(0),
                    Err(hr) => return hr,
                }
            } else if index_in_archive == u32::MAX {
                warn!(format = T::name(), item = i, "update item has neither data nor source");
                return E_INVALIDARG;
            } else if let Some(item_size) = handler.item_size {
                total += item_size(&handler.inner, index_in_archive as usize).unwrap_or(0);
            }

            pending.push(PendingItem {
                new_data: new_data != 0,
                new_props: new_props != 0,
                index_in_archive,
            });
        }

        let hr = (cb.set_total)(cb_raw, total);
        if hr.is_err() {
            return hr;
        }

        // Second pass: collect names and new data
        let mut updates = Vec::with_capacity(pending.len());
        let mut completed: u64 = 0;
        for (i, item) in pending.iter().enumerate() {
            let i = i as u32;
            if !item.new_data {
                let new_name = if item.new_props {
                    match update_name(&callback, i) {
                        Ok(name) => name,
                        Err(hr) => return hr,
                    }
                } else {
                    None
                };
                updates.push(UpdateItem::CopyExisting {
                    index: item.index_in_archive as usize,
                    new_name,
                });
                continue;
            }

            let name = match update_name(&callback, i) {
                Ok(name) => name.unwrap_or_default(),
                Err(hr) => return hr,
            };
            let is_dir = match update_property(&callback, i, PropId::IsDir, RawPropVariant::get_bool) {
                Ok(is_dir) => is_dir.unwrap_or(false),
                Err(hr) => return hr,
            };
            let modified =
                match update_property(&callback, i, PropId::MTime, RawPropVariant::get_filetime) {
                    Ok(modified) => modified,
                    Err(hr) => return hr,
                };

            let mut data = Vec::new();
            if !is_dir {
                let mut in_stream: *mut c_void = std::ptr::null_mut();
                let hr = (cb.get_stream)(cb_raw, i, &mut in_stream);
                if hr.is_err() {
                    return hr;
                }
                if let Some(stream) = ComRef::<ISequentialInStreamVtbl>::from_owned(in_stream) {
                    let mut reader = HostSequentialInStream::new(stream);
                    if let Err(e) = io::copy(&mut reader, &mut data) {
                        warn!(format = T::name(), %name, error = %e, "failed to read new item");
                        let hr = (cb.set_operation_result)(cb_raw, UPDATE_RESULT_ERROR);
                        return if hr.is_err() { hr } else { E_FAIL };
                    }
                }
            }

            completed += data.len() as u64;
            let hr = (cb.set_completed)(cb_raw, &completed);
            if hr.is_err() {
                return hr;
            }
            let hr = (cb.set_operation_result)(cb_raw, UPDATE_RESULT_OK);
            if hr.is_err() {
                return hr;
            }

            updates.push(UpdateItem::AddNew {
                name,
                data,
                is_dir,
                modified,
            });
        }

        let mut empty = io::Cursor::new(Vec::<u8>::new());
        let (existing, existing_size): (&mut dyn ReadSeek, u64) = match handler.stream.as_mut() {
            Some(stream) => {
                if let Err(e) = stream.seek(SeekFrom::Start(0)) {
                    warn!(format = T::name(), error = %e, "failed to rewind open archive");
                    return E_FAIL;
                }
                (stream as &mut dyn ReadSeek, handler.archive_size)
            }
            None => (&mut empty as &mut dyn ReadSeek, 0),
        };

        let mut writer = HostOutStream::new(out);
        let mut progress = |done: u64, _total: u64| (cb.set_completed)(cb_raw, &done).is_ok();
        match handler
            .inner
            .update(existing, existing_size, updates, &mut writer, Some(&mut progress))
        {
            Ok(written) => {
                debug!(format = T::name(), written, "archive written");
                S_OK
            }
            Err(Error::Cancelled) => E_ABORT,
            Err(e) => {
                warn!(format = T::name(), error = %e, "update failed");
                E_FAIL
            }
        }
    })
}

// Stub for formats without a writer
unsafe extern "system" fn update_items_stub<T: ArchiveFormat>(
    _this: *mut PluginHandler<T>,
    _out_stream: *mut c_void,
    _num_items: u32,
    _update_callback: *mut c_void,
) -> HRESULT {
    E_NOTIMPL
}

// =============================================================================
// Vtable creation
// =============================================================================

/// Creates the IInArchive vtable for a readable format.
pub const fn create_in_vtable<T: ArchiveReader>() -> IInArchiveVtbl<PluginHandler<T>> {
    IInArchiveVtbl {
        query_interface: query_interface::<T>,
        add_ref: add_ref::<T>,
        release: release::<T>,
        open: open::<T>,
        close: close::<T>,
        get_number_of_items: get_number_of_items::<T>,
        get_property: get_property::<T>,
        extract: extract::<T>,
        get_archive_property: get_archive_property::<T>,
        get_number_of_properties: get_number_of_properties::<T>,
        get_property_info: get_property_info::<T>,
        get_number_of_archive_properties: get_number_of_archive_properties::<T>,
        get_archive_property_info: get_archive_property_info::<T>,
    }
}

/// Creates the IInArchive vtable of a write-only format. Only its IUnknown
/// slots are reachable, as the object's identity.
pub const fn create_in_vtable_stub<T: ArchiveFormat>() -> IInArchiveVtbl<PluginHandler<T>> {
    IInArchiveVtbl {
        query_interface: query_interface::<T>,
        add_ref: add_ref::<T>,
        release: release::<T>,
        open: open_stub::<T>,
        close: close_stub::<T>,
        get_number_of_items: count_stub::<T>,
        get_property: get_property_stub::<T>,
        extract: extract_stub::<T>,
        get_archive_property: get_archive_property_stub::<T>,
        get_number_of_properties: count_stub::<T>,
        get_property_info: property_info_stub::<T>,
        get_number_of_archive_properties: count_stub::<T>,
        get_archive_property_info: property_info_stub::<T>,
    }
}

/// Creates the IOutArchive vtable of a read-only format.
pub const fn create_out_vtable_stub<T: ArchiveFormat>() -> IOutArchiveVtbl<PluginHandler<T>> {
    IOutArchiveVtbl {
        query_interface: out_query_interface::<T>,
        add_ref: out_add_ref::<T>,
        release: out_release::<T>,
        update_items: update_items_stub::<T>,
        get_file_time_type: get_file_time_type::<T>,
    }
}

/// Creates the IOutArchive vtable for a format that supports updates.
pub const fn create_out_vtable<T: ArchiveUpdater>() -> IOutArchiveVtbl<PluginHandler<T>> {
    IOutArchiveVtbl {
        query_interface: out_query_interface::<T>,
        add_ref: out_add_ref::<T>,
        release: out_release::<T>,
        update_items: update_items::<T>,
        get_file_time_type: get_file_time_type::<T>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::guid::seven_zip_format;
    use crate::abi::stream::fake::{self, FakeInStream, FakeOutStream};
    use crate::abi::propvariant::VT_EMPTY;
    use crate::error::Result;
    use crate::types::{ArchiveItem, ProgressCallback, PropValue};
    use std::cell::{Cell, RefCell};
    use std::io::{Read, Write};

    thread_local! {
        static DROPS: Cell<usize> = const { Cell::new(0) };
    }

    /// "NAME\n" lines, one file per line holding its own name. A line
    /// named `bad` fails to extract.
    #[derive(Default)]
    struct Lines {
        items: Vec<ArchiveItem>,
    }

    impl Drop for Lines {
        fn drop(&mut self) {
            DROPS.set(DROPS.get() + 1);
        }
    }

    impl ArchiveFormat for Lines {
        fn name() -> &'static str {
            "Lines"
        }
        fn extension() -> &'static str {
            "lines"
        }
        fn class_id() -> Guid {
            seven_zip_format(0xF0)
        }
    }

    impl ArchiveReader for Lines {
        fn open(&mut self, reader: &mut dyn ReadSeek, _size: u64) -> Result<()> {
            let mut text = String::new();
            reader.read_to_string(&mut text)?;
            if !text.ends_with('\n') {
                return Err(Error::InvalidFormat("missing newline".into()));
            }
            self.items = text.lines().map(|l| ArchiveItem::file(l, l.len() as u64)).collect();
            Ok(())
        }
        fn item_count(&self) -> usize {
            self.items.len()
        }
        fn get_item(&self, index: usize) -> Option<&ArchiveItem> {
            self.items.get(index)
        }
        fn extract(&mut self, index: usize) -> Result<Vec<u8>> {
            match self.items[index].name.as_str() {
                "bad" => Err(Error::InvalidFormat("bad line".into())),
                name => Ok(name.as_bytes().to_vec()),
            }
        }
    }

    impl ArchiveUpdater for Lines {
        fn update(
            &mut self,
            _existing: &mut dyn ReadSeek,
            _existing_size: u64,
            updates: Vec<UpdateItem>,
            writer: &mut dyn Write,
            _progress: Option<ProgressCallback<'_>>,
        ) -> Result<u64> {
            let mut lines = Vec::new();
            for update in updates {
                let line = match update {
                    UpdateItem::CopyExisting { index, new_name } => {
                        new_name.unwrap_or_else(|| self.items[index].name.clone())
                    }
                    UpdateItem::AddNew { name, data, .. } if data.is_empty() => name,
                    UpdateItem::AddNew { name, data, .. } => {
                        format!("{name}={}", String::from_utf8_lossy(&data))
                    }
                };
                lines.push(line);
            }
            let text = lines.join("\n") + "\n";
            writer.write_all(text.as_bytes())?;
            Ok(text.len() as u64)
        }
    }

    unsafe fn in_vtbl<'a>(obj: *mut c_void) -> &'a IInArchiveVtbl<PluginHandler<Lines>> {
        unsafe { &**(obj as *const *const IInArchiveVtbl<PluginHandler<Lines>>) }
    }

    unsafe fn out_vtbl<'a>(obj: *mut c_void) -> &'a IOutArchiveVtbl<PluginHandler<Lines>> {
        unsafe { &**(obj as *const *const IOutArchiveVtbl<PluginHandler<Lines>>) }
    }

    #[test]
    fn reader_object_lifetime_and_interfaces() {
        let before = DROPS.get();
        let obj = create_reader::<Lines>(ArchiveInterface::In);
        unsafe {
            let vtbl = in_vtbl(obj);
            let this = obj as *mut PluginHandler<Lines>;

            let mut out = std::ptr::null_mut();
            assert_eq!((vtbl.query_interface)(this, &IID_IOUTARCHIVE, &mut out), E_NOINTERFACE);
            assert!(out.is_null());

            assert_eq!((vtbl.query_interface)(this, &IID_IUNKNOWN, &mut out), S_OK);
            assert_eq!(out, obj);
            assert_eq!((vtbl.release)(this), 1);
            assert_eq!(DROPS.get(), before);
            assert_eq!((vtbl.release)(this), 0);
        }
        assert_eq!(DROPS.get(), before + 1);
    }

    #[test]
    fn open_reads_host_stream_and_close_releases_it() {
        let host = FakeInStream::new(b"alpha\nbeta\n".to_vec());
        let obj = create_reader::<Lines>(ArchiveInterface::In);
        unsafe {
            let vtbl = in_vtbl(obj);
            let this = obj as *mut PluginHandler<Lines>;

            assert_eq!((vtbl.open)(this, host.as_raw(), std::ptr::null(), std::ptr::null_mut()), S_OK);
            assert_eq!(host.refs.get(), 2);

            let mut count = 0;
            assert_eq!((vtbl.get_number_of_items)(this, &mut count), S_OK);
            assert_eq!(count, 2);

            let mut prop = RawPropVariant::default();
            assert_eq!((vtbl.get_property)(this, 1, PropId::Path as u32, &mut prop), S_OK);
            assert_eq!(prop.get_bstr().as_deref(), Some("beta"));
            prop.clear();

            assert_eq!((vtbl.get_property)(this, 0, 9999, &mut prop), S_OK);
            assert_eq!(prop.vt, VT_EMPTY);
            assert_eq!((vtbl.get_property)(this, 2, PropId::Path as u32, &mut prop), E_INVALIDARG);

            assert_eq!((vtbl.get_archive_property)(this, PropId::PhySize as u32, &mut prop), S_OK);
            assert_eq!(prop.get_u64(), Some(11));

            assert_eq!((vtbl.close)(this), S_OK);
            assert_eq!(host.refs.get(), 1);
            assert_eq!((vtbl.release)(this), 0);
        }
    }

    #[test]
    fn open_rejects_foreign_data() {
        let host = FakeInStream::new(b"no newline".to_vec());
        let obj = create_reader::<Lines>(ArchiveInterface::In);
        unsafe {
            let vtbl = in_vtbl(obj);
            let this = obj as *mut PluginHandler<Lines>;
            assert_eq!((vtbl.open)(this, host.as_raw(), std::ptr::null(), std::ptr::null_mut()), S_FALSE);
            assert_eq!(host.refs.get(), 1);
            (vtbl.release)(this);
        }
    }

    #[test]
    fn property_info_tables() {
        let obj = create_reader::<Lines>(ArchiveInterface::In);
        unsafe {
            let vtbl = in_vtbl(obj);
            let this = obj as *mut PluginHandler<Lines>;
            let mut n = 0;
            assert_eq!((vtbl.get_number_of_properties)(this, &mut n), S_OK);
            assert_eq!(n as usize, ITEM_PROPS.len());

            let (mut name, mut id, mut vt) = (std::ptr::dangling_mut::<u16>(), 0u32, 0u16);
            assert_eq!((vtbl.get_property_info)(this, 0, &mut name, &mut id, &mut vt), S_OK);
            assert!(name.is_null());
            assert_eq!((id, vt), (PropId::Path as u32, VT_BSTR));
            assert_eq!(
                (vtbl.get_property_info)(this, n, &mut name, &mut id, &mut vt),
                E_INVALIDARG
            );
            assert_eq!((vtbl.get_archive_property_info)(this, 0, &mut name, &mut id, &mut vt), S_OK);
            assert_eq!((id, vt), (PropId::PhySize as u32, VT_UI8));
            (vtbl.release)(this);
        }
    }

    #[test]
    fn writer_object_shares_one_count_across_interfaces() {
        let before = DROPS.get();
        let out_ptr = create_writer::<Lines>(ArchiveInterface::Out);
        unsafe {
            let out = out_vtbl(out_ptr);
            let this = out_ptr as *mut PluginHandler<Lines>;

            let mut time_type = u32::MAX;
            assert_eq!((out.get_file_time_type)(this, &mut time_type), S_OK);
            assert_eq!(time_type, FILE_TIME_TYPE_WINDOWS);

            let mut unknown = std::ptr::null_mut();
            assert_eq!((out.query_interface)(this, &IID_IUNKNOWN, &mut unknown), S_OK);
            assert_ne!(unknown, out_ptr);

            let mut in_ptr = std::ptr::null_mut();
            let base = unknown as *mut PluginHandler<Lines>;
            assert_eq!(
                (in_vtbl(unknown).query_interface)(base, &IID_IINARCHIVE, &mut in_ptr),
                E_NOINTERFACE
            );

            let mut again = std::ptr::null_mut();
            assert_eq!((in_vtbl(unknown).query_interface)(base, &IID_IOUTARCHIVE, &mut again), S_OK);
            assert_eq!(again, out_ptr);

            assert_eq!((out.release)(this), 2);
            assert_eq!((in_vtbl(unknown).release)(base), 1);
            assert_eq!(DROPS.get(), before);
            assert_eq!((out.release)(this), 0);
        }
        assert_eq!(DROPS.get(), before + 1);
    }

    /// Extract callback that hands out in-memory streams and logs each call.
    #[repr(C)]
    struct ExtractHost {
        vtbl: *const IArchiveExtractCallbackVtbl,
        refs: Cell<u32>,
        /// Items the user declined: GetStream hands back no stream.
        skip: Vec<u32>,
        calls: RefCell<Vec<String>>,
        outputs: RefCell<Vec<(u32, Box<FakeOutStream>)>>,
    }

    impl ExtractHost {
        fn new(skip: &[u32]) -> Box<Self> {
            Box::new(Self {
                vtbl: &EXTRACT_VTBL,
                refs: Cell::new(1),
                skip: skip.to_vec(),
                calls: RefCell::default(),
                outputs: RefCell::default(),
            })
        }

        fn as_raw(&self) -> *mut c_void {
            self as *const Self as *mut c_void
        }

        unsafe fn from_raw<'a>(this: *mut c_void) -> &'a Self {
            unsafe { &*(this as *const Self) }
        }

        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn output(&self, index: u32) -> Option<Vec<u8>> {
            let outputs = self.outputs.borrow();
            let (_, stream) = outputs.iter().find(|(i, _)| *i == index)?;
            assert_eq!(stream.refs.get(), 0, "stream {index} still referenced");
            Some(stream.data.borrow().clone())
        }
    }

    unsafe extern "system" fn extract_set_total(this: *mut c_void, total: u64) -> HRESULT {
        unsafe { ExtractHost::from_raw(this) }.record(format!("total {total}"));
        S_OK
    }

    unsafe extern "system" fn extract_set_completed(this: *mut c_void, done: *const u64) -> HRESULT {
        unsafe { ExtractHost::from_raw(this).record(format!("completed {}", *done)) };
        S_OK
    }

    unsafe extern "system" fn extract_get_stream(
        this: *mut c_void,
        index: u32,
        out: *mut *mut c_void,
        ask_mode: i32,
    ) -> HRESULT {
        let host = unsafe { ExtractHost::from_raw(this) };
        host.record(format!("stream {index} mode {ask_mode}"));
        unsafe { *out = std::ptr::null_mut() };
        if ask_mode == ASK_MODE_EXTRACT && !host.skip.contains(&index) {
            let stream = FakeOutStream::new();
            unsafe { *out = stream.as_raw() };
            host.outputs.borrow_mut().push((index, stream));
        }
        S_OK
    }

    unsafe extern "system" fn extract_prepare(this: *mut c_void, ask_mode: i32) -> HRESULT {
        unsafe { ExtractHost::from_raw(this) }.record(format!("prepare {ask_mode}"));
        S_OK
    }

    unsafe extern "system" fn extract_result(this: *mut c_void, result: i32) -> HRESULT {
        unsafe { ExtractHost::from_raw(this) }.record(format!("result {result}"));
        S_OK
    }

    static EXTRACT_VTBL: IArchiveExtractCallbackVtbl = IArchiveExtractCallbackVtbl {
        base: fake::UNKNOWN,
        set_total: extract_set_total,
        set_completed: extract_set_completed,
        get_stream: extract_get_stream,
        prepare_operation: extract_prepare,
        set_operation_result: extract_result,
    };

    /// Opens `text` in a fresh reader object.
    unsafe fn opened(text: &[u8]) -> (*mut c_void, Box<FakeInStream>) {
        let host = FakeInStream::new(text.to_vec());
        let obj = create_reader_writer::<Lines>(ArchiveInterface::In);
        let this = obj as *mut PluginHandler<Lines>;
        let hr = unsafe {
            (in_vtbl(obj).open)(this, host.as_raw(), std::ptr::null(), std::ptr::null_mut())
        };
        assert_eq!(hr, S_OK);
        (obj, host)
    }

    #[test]
    fn extract_all_items_reports_each_result() {
        unsafe {
            let (obj, _archive) = opened(b"alpha\nbad\nbeta\n");
            let this = obj as *mut PluginHandler<Lines>;
            let host = ExtractHost::new(&[]);

            let hr = (in_vtbl(obj).extract)(this, std::ptr::null(), u32::MAX, 0, host.as_raw());
            assert_eq!(hr, S_OK);
            assert_eq!(
                host.calls(),
                [
                    "total 12",
                    "stream 0 mode 0",
                    "prepare 0",
                    "result 0",
                    "completed 5",
                    "stream 1 mode 0",
                    "prepare 0",
                    "result 2",
                    "completed 8",
                    "stream 2 mode 0",
                    "prepare 0",
                    "result 0",
                    "completed 12",
                ]
            );
            assert_eq!(host.output(0).as_deref(), Some(&b"alpha"[..]));
            assert_eq!(host.output(1).as_deref(), Some(&b""[..]));
            assert_eq!(host.output(2).as_deref(), Some(&b"beta"[..]));
            assert_eq!(host.refs.get(), 1);
            (in_vtbl(obj).release)(this);
        }
    }

    #[test]
    fn extract_selected_items_and_skipped_streams() {
        unsafe {
            let (obj, _archive) = opened(b"alpha\nbad\nbeta\n");
            let this = obj as *mut PluginHandler<Lines>;
            let host = ExtractHost::new(&[2]);

            let indices = [2u32, 0];
            let hr = (in_vtbl(obj).extract)(this, indices.as_ptr(), 2, 0, host.as_raw());
            assert_eq!(hr, S_OK);
            assert_eq!(
                host.calls(),
                [
                    "total 9",
                    "stream 2 mode 0",
                    "stream 0 mode 0",
                    "prepare 0",
                    "result 0",
                    "completed 5",
                ]
            );
            assert_eq!(host.output(2), None);
            assert_eq!(host.output(0).as_deref(), Some(&b"alpha"[..]));

            let out_of_range = [3u32];
            let hr = (in_vtbl(obj).extract)(this, out_of_range.as_ptr(), 1, 0, host.as_raw());
            assert_eq!(hr, E_INVALIDARG);
            (in_vtbl(obj).release)(this);
        }
    }

    #[test]
    fn test_mode_runs_without_a_stream() {
        unsafe {
            let (obj, _archive) = opened(b"alpha\nbad\n");
            let this = obj as *mut PluginHandler<Lines>;
            let host = ExtractHost::new(&[]);

            let indices = [1u32, 0];
            let hr = (in_vtbl(obj).extract)(this, indices.as_ptr(), 2, 1, host.as_raw());
            assert_eq!(hr, S_OK);
            assert_eq!(
                host.calls(),
                [
                    "total 8",
                    "stream 1 mode 1",
                    "prepare 1",
                    "result 2",
                    "completed 3",
                    "stream 0 mode 1",
                    "prepare 1",
                    "result 0",
                    "completed 8",
                ]
            );
            assert!(host.outputs.borrow().is_empty());
            (in_vtbl(obj).release)(this);
        }
    }

    /// One entry of the host's update list.
    #[derive(Clone, Copy)]
    enum HostItem {
        /// Keep item `index` of the open archive, optionally renamed.
        Keep(u32, Option<&'static str>),
        File(&'static str, &'static [u8]),
        Dir(&'static str),
        /// A new file whose stream fails to read.
        Unreadable(&'static str),
    }

    /// Update callback serving `items`; records progress and results.
    #[repr(C)]
    struct UpdateHost {
        vtbl: *const IArchiveUpdateCallbackVtbl,
        refs: Cell<u32>,
        items: Vec<HostItem>,
        total: Cell<Option<u64>>,
        completed: RefCell<Vec<u64>>,
        results: RefCell<Vec<i32>>,
        inputs: RefCell<Vec<Box<FakeInStream>>>,
    }

    impl UpdateHost {
        fn new(items: &[HostItem]) -> Box<Self> {
            Box::new(Self {
                vtbl: &UPDATE_VTBL,
                refs: Cell::new(1),
                items: items.to_vec(),
                total: Cell::new(None),
                completed: RefCell::default(),
                results: RefCell::default(),
                inputs: RefCell::default(),
            })
        }

        fn as_raw(&self) -> *mut c_void {
            self as *const Self as *mut c_void
        }

        unsafe fn from_raw<'a>(this: *mut c_void) -> &'a Self {
            unsafe { &*(this as *const Self) }
        }
    }

    unsafe extern "system" fn update_set_total(this: *mut c_void, total: u64) -> HRESULT {
        unsafe { UpdateHost::from_raw(this) }.total.set(Some(total));
        S_OK
    }

    unsafe extern "system" fn update_set_completed(this: *mut c_void, done: *const u64) -> HRESULT {
        unsafe { UpdateHost::from_raw(this).completed.borrow_mut().push(*done) };
        S_OK
    }

    unsafe extern "system" fn update_item_info(
        this: *mut c_void,
        index: u32,
        new_data: *mut i32,
        new_props: *mut i32,
        index_in_archive: *mut u32,
    ) -> HRESULT {
        let host = unsafe { UpdateHost::from_raw(this) };
        let (data, props, source) = match host.items[index as usize] {
            HostItem::Keep(source, rename) => (0, rename.is_some() as i32, source),
            _ => (1, 1, u32::MAX),
        };
        unsafe {
            *new_data = data;
            *new_props = props;
            *index_in_archive = source;
        }
        S_OK
    }

    unsafe extern "system" fn update_get_property(
        this: *mut c_void,
        index: u32,
        prop_id: u32,
        value: *mut RawPropVariant,
    ) -> HRESULT {
        let host = unsafe { UpdateHost::from_raw(this) };
        let item = host.items[index as usize];
        let prop = match (PropId::from_u32(prop_id), item) {
            (Some(PropId::Path), HostItem::Keep(_, Some(name)))
            | (Some(PropId::Path), HostItem::File(name, _))
            | (Some(PropId::Path), HostItem::Dir(name))
            | (Some(PropId::Path), HostItem::Unreadable(name)) => PropValue::Str(name),
            (Some(PropId::IsDir), HostItem::Dir(_)) => PropValue::Bool(true),
            (Some(PropId::IsDir), HostItem::File(..) | HostItem::Unreadable(_)) => {
                PropValue::Bool(false)
            }
            (Some(PropId::Size), HostItem::File(_, data)) => PropValue::U64(data.len() as u64),
            (Some(PropId::Size), HostItem::Unreadable(_)) => PropValue::U64(4),
            _ => PropValue::Empty,
        };
        unsafe { write_propvariant(value, &prop) }
    }

    unsafe extern "system" fn update_get_stream(
        this: *mut c_void,
        index: u32,
        out: *mut *mut c_void,
    ) -> HRESULT {
        let host = unsafe { UpdateHost::from_raw(this) };
        let stream = match host.items[index as usize] {
            HostItem::File(_, data) => FakeInStream::new(data.to_vec()),
            HostItem::Unreadable(_) => {
                let stream = FakeInStream::new(Vec::new());
                stream.broken.set(true);
                stream
            }
            _ => {
                unsafe { *out = std::ptr::null_mut() };
                return S_OK;
            }
        };
        unsafe { *out = stream.as_raw() };
        host.inputs.borrow_mut().push(stream);
        S_OK
    }

    unsafe extern "system" fn update_set_result(this: *mut c_void, result: i32) -> HRESULT {
        unsafe { UpdateHost::from_raw(this) }.results.borrow_mut().push(result);
        S_OK
    }

    static UPDATE_VTBL: IArchiveUpdateCallbackVtbl = IArchiveUpdateCallbackVtbl {
        base: fake::UNKNOWN,
        set_total: update_set_total,
        set_completed: update_set_completed,
        get_update_item_info: update_item_info,
        get_property: update_get_property,
        get_stream: update_get_stream,
        set_operation_result: update_set_result,
    };

    #[test]
    fn update_new_archive_reports_ok_per_item() {
        let obj = create_writer::<Lines>(ArchiveInterface::Out);
        let this = obj as *mut PluginHandler<Lines>;
        let host = UpdateHost::new(&[HostItem::Dir("x"), HostItem::File("f", b"data")]);
        let out = FakeOutStream::new();
        unsafe {
            let hr = (out_vtbl(obj).update_items)(this, out.as_raw(), 2, host.as_raw());
            assert_eq!(hr, S_OK);
            assert_eq!(*host.results.borrow(), [UPDATE_RESULT_OK, UPDATE_RESULT_OK]);
            assert_eq!(host.total.get(), Some(4));
            assert_eq!(*host.completed.borrow(), [0, 4]);
            assert_eq!(out.data.borrow().as_slice(), b"x\nf=data\n");
            assert!(host.inputs.borrow().iter().all(|s| s.refs.get() == 0));
            assert_eq!((host.refs.get(), out.refs.get()), (1, 1));
            (out_vtbl(obj).release)(this);
        }
    }

    #[test]
    fn update_keeps_existing_items_alongside_new_ones() {
        unsafe {
            let (obj, _archive) = opened(b"alpha\nbeta\n");
            let mut out_ptr = std::ptr::null_mut();
            let base = obj as *mut PluginHandler<Lines>;
            assert_eq!((in_vtbl(obj).query_interface)(base, &IID_IOUTARCHIVE, &mut out_ptr), S_OK);
            let this = out_ptr as *mut PluginHandler<Lines>;

            let host = UpdateHost::new(&[
                HostItem::Keep(1, None),
                HostItem::Keep(0, Some("first")),
                HostItem::File("new", b"data"),
            ]);
            let out = FakeOutStream::new();
            let hr = (out_vtbl(out_ptr).update_items)(this, out.as_raw(), 3, host.as_raw());
            assert_eq!(hr, S_OK);
            // Sizes of the kept items come from the open archive.
            assert_eq!(host.total.get(), Some(4 + 5 + 4));
            assert_eq!(*host.results.borrow(), [UPDATE_RESULT_OK]);
            assert_eq!(*host.completed.borrow(), [4]);
            assert_eq!(out.data.borrow().as_slice(), b"beta\nfirst\nnew=data\n");

            (out_vtbl(out_ptr).release)(this);
            (in_vtbl(obj).release)(base);
        }
    }

    #[test]
    fn unreadable_item_is_reported_as_failed() {
        let obj = create_writer::<Lines>(ArchiveInterface::Out);
        let this = obj as *mut PluginHandler<Lines>;
        let host = UpdateHost::new(&[HostItem::File("ok", b"1"), HostItem::Unreadable("gone")]);
        let out = FakeOutStream::new();
        unsafe {
            let hr = (out_vtbl(obj).update_items)(this, out.as_raw(), 2, host.as_raw());
            assert_eq!(hr, E_FAIL);
            assert_eq!(host.total.get(), Some(5));
            assert_eq!(*host.results.borrow(), [UPDATE_RESULT_OK, UPDATE_RESULT_ERROR]);
            assert!(out.data.borrow().is_empty());
            assert!(host.inputs.borrow().iter().all(|s| s.refs.get() == 0));
            (out_vtbl(obj).release)(this);
        }
    }
}
