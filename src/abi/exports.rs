//! DLL export generation for 7-Zip plugins.
//!
//! [`export_plugin!`](crate::export_plugin) defines the `extern "system"`
//! entry points 7-Zip looks up in a format library. Each one forwards to a
//! function in this module that takes the plugin's [`Registry`].

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error};

use crate::registry::{ArchiveInterface, Registry};
use crate::traits::ArchiveSniffer;
use crate::types::{IsArcResult, PropValue};

use super::com::{
    HandlerPropId, IID_ICOMPRESSCODER, IID_ICOMPRESSCODER2, IID_ICOMPRESSFILTER, IID_IHASHER,
    IID_IINARCHIVE, IID_IOUTARCHIVE, MODULE_INTERFACE_TYPE_NO_VIRT_DESTRUCTOR, MY_VER_MAJOR,
    MY_VER_MINOR, ModulePropId,
};
use super::guid::Guid;
use super::hresult::{
    CLASS_E_CLASSNOTAVAILABLE, E_FAIL, E_INVALIDARG, E_NOINTERFACE, E_POINTER, HRESULT, S_OK,
};
use super::propvariant::{RawPropVariant, reset_propvariant, write_propvariant};
use super::IsArcFn;

/// Macro to register formats and generate all required DLL exports.
///
/// Takes the registration functions, each `fn(&mut Registry)`, in the order
/// their formats should be indexed. The registry is built on the first host
/// call and never changes afterwards.
///
/// # Example
///
/// ```rust,ignore
/// use sevenzip_plugins::prelude::*;
///
/// pub fn register(registry: &mut Registry) {
///     registry.register_reader::<MyFormat>();
/// }
///
/// sevenzip_plugins::export_plugin!(register, other_crate::register);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($($register:path),* $(,)?) => {
        fn __sevenzip_plugins_registry() -> &'static $crate::Registry {
            static REGISTRY: ::std::sync::OnceLock<$crate::Registry> = ::std::sync::OnceLock::new();
            REGISTRY.get_or_init(|| {
                $crate::debug::init();
                let mut registry = $crate::Registry::new();
                $( $register(&mut registry); )*
                registry
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn CreateObject(
            clsid: *const $crate::abi::Guid,
            iid: *const $crate::abi::Guid,
            out_object: *mut *mut ::std::ffi::c_void,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("CreateObject", || unsafe {
                $crate::abi::exports::create_object(
                    __sevenzip_plugins_registry(),
                    clsid,
                    iid,
                    out_object,
                )
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn GetNumberOfFormats(
            num_formats: *mut u32,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("GetNumberOfFormats", || unsafe {
                $crate::abi::exports::get_number_of_formats(
                    __sevenzip_plugins_registry(),
                    num_formats,
                )
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn GetHandlerProperty(
            prop_id: u32,
            value: *mut $crate::abi::propvariant::RawPropVariant,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("GetHandlerProperty", || unsafe {
                $crate::abi::exports::get_handler_property2(
                    __sevenzip_plugins_registry(),
                    0,
                    prop_id,
                    value,
                )
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn GetHandlerProperty2(
            format_index: u32,
            prop_id: u32,
            value: *mut $crate::abi::propvariant::RawPropVariant,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("GetHandlerProperty2", || unsafe {
                $crate::abi::exports::get_handler_property2(
                    __sevenzip_plugins_registry(),
                    format_index,
                    prop_id,
                    value,
                )
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn GetIsArc(
            format_index: u32,
            is_arc: *mut ::std::option::Option<$crate::abi::IsArcFn>,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("GetIsArc", || unsafe {
                $crate::abi::exports::get_is_arc(__sevenzip_plugins_registry(), format_index, is_arc)
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn GetNumberOfMethods(
            num_codecs: *mut u32,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("GetNumberOfMethods", || unsafe {
                $crate::abi::exports::get_number_of_methods(num_codecs)
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn GetMethodProperty(
            codec_index: u32,
            prop_id: u32,
            value: *mut $crate::abi::propvariant::RawPropVariant,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("GetMethodProperty", || unsafe {
                $crate::abi::exports::get_method_property(codec_index, prop_id, value)
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn CreateDecoder(
            index: u32,
            iid: *const $crate::abi::Guid,
            out_object: *mut *mut ::std::ffi::c_void,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("CreateDecoder", || unsafe {
                $crate::abi::exports::create_coder(index, iid, out_object)
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn CreateEncoder(
            index: u32,
            iid: *const $crate::abi::Guid,
            out_object: *mut *mut ::std::ffi::c_void,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("CreateEncoder", || unsafe {
                $crate::abi::exports::create_coder(index, iid, out_object)
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn GetHashers(
            hashers: *mut *mut ::std::ffi::c_void,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("GetHashers", || unsafe {
                $crate::abi::exports::get_hashers(hashers)
            })
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn SetCodecs(
            compress_codecs_info: *mut ::std::ffi::c_void,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::set_codecs(compress_codecs_info)
        }

        #[unsafe(no_mangle)]
        pub extern "system" fn SetLargePageMode() -> $crate::abi::HRESULT {
            $crate::abi::exports::set_large_page_mode()
        }

        #[unsafe(no_mangle)]
        pub extern "system" fn SetCaseSensitive(case_sensitive: i32) -> $crate::abi::HRESULT {
            $crate::abi::exports::set_case_sensitive(case_sensitive)
        }

        #[unsafe(no_mangle)]
        pub unsafe extern "system" fn GetModuleProp(
            prop_id: u32,
            value: *mut $crate::abi::propvariant::RawPropVariant,
        ) -> $crate::abi::HRESULT {
            $crate::abi::exports::guard("GetModuleProp", || unsafe {
                $crate::abi::exports::get_module_prop(prop_id, value)
            })
        }
    };
}

static CASE_SENSITIVE: AtomicBool = AtomicBool::new(false);

/// Whether the host asked for case-sensitive names (`SetCaseSensitive`).
pub fn case_sensitive() -> bool {
    CASE_SENSITIVE.load(Ordering::Relaxed)
}

/// Run the body of an exported function. A panic becomes `E_FAIL` instead
/// of unwinding into the host.
pub fn guard(op: &'static str, f: impl FnOnce() -> HRESULT) -> HRESULT {
    debug!(op, "host call");
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(hr) => hr,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            error!(op, panic = msg, "panic at the host boundary");
            E_FAIL
        }
    }
}

/// Implementation of CreateObject.
///
/// # Safety
/// `clsid`, `iid` and `out_object` must be null or valid pointers.
pub unsafe fn create_object(
    registry: &Registry,
    clsid: *const Guid,
    iid: *const Guid,
    out_object: *mut *mut c_void,
) -> HRESULT {
    unsafe {
        if out_object.is_null() {
            return E_POINTER;
        }
        *out_object = std::ptr::null_mut();
        if clsid.is_null() || iid.is_null() {
            return E_INVALIDARG;
        }
        let (clsid, iid) = (*clsid, *iid);
        debug!(?clsid, ?iid, "CreateObject");

        if [IID_ICOMPRESSCODER, IID_ICOMPRESSCODER2, IID_ICOMPRESSFILTER].contains(&iid) {
            return create_coder(0, &iid, out_object);
        }
        if iid == IID_IHASHER {
            return CLASS_E_CLASSNOTAVAILABLE;
        }

        let iface = if iid == IID_IINARCHIVE {
            ArchiveInterface::In
        } else if iid == IID_IOUTARCHIVE {
            ArchiveInterface::Out
        } else {
            return E_NOINTERFACE;
        };

        let Some(format) = registry.find_class(&clsid) else {
            debug!(?clsid, "no format with this class id");
            return CLASS_E_CLASSNOTAVAILABLE;
        };

        match format.objects().create(iface) {
            Some(object) => {
                *out_object = object;
                S_OK
            }
            None => {
                debug!(format = format.name(), ?iface, "interface not supported by format");
                E_NOINTERFACE
            }
        }
    }
}

/// Implementation of GetNumberOfFormats.
///
/// # Safety
/// `num_formats` must be null or valid for writes.
pub unsafe fn get_number_of_formats(registry: &Registry, num_formats: *mut u32) -> HRESULT {
    if num_formats.is_null() {
        return E_INVALIDARG;
    }
    unsafe { *num_formats = registry.len() as u32 };
    S_OK
}

/// Implementation of GetHandlerProperty2. `GetHandlerProperty` is the same
/// call for format 0.
///
/// # Safety
/// `value` must be null or point to 16 writable bytes.
pub unsafe fn get_handler_property2(
    registry: &Registry,
    format_index: u32,
    prop_id: u32,
    value: *mut RawPropVariant,
) -> HRESULT {
    if value.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        reset_propvariant(value);
        let Some(format) = registry.get(format_index as usize) else {
            return E_INVALIDARG;
        };
        match HandlerPropId::from_u32(prop_id) {
            Some(id) => write_propvariant(value, &format.property(id)),
            None => S_OK,
        }
    }
}

/// Implementation of GetIsArc: the sniffer of a format, possibly null.
///
/// # Safety
/// `is_arc` must be null or valid for writes.
pub unsafe fn get_is_arc(
    registry: &Registry,
    format_index: u32,
    is_arc: *mut Option<IsArcFn>,
) -> HRESULT {
    if is_arc.is_null() {
        return E_INVALIDARG;
    }
    unsafe {
        *is_arc = None;
        let Some(format) = registry.get(format_index as usize) else {
            return E_INVALIDARG;
        };
        *is_arc = format.is_arc();
    }
    S_OK
}

/// Adapts a safe [`ArchiveSniffer`] to the `IsArc` calling convention.
pub unsafe extern "system" fn is_arc_thunk<S: ArchiveSniffer>(data: *const u8, size: usize) -> u32 {
    let data = if data.is_null() || size == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(data, size) }
    };
    panic::catch_unwind(|| S::is_arc(data)).unwrap_or(IsArcResult::No) as u32
}

// Codecs and hashers: this library exports none.

/// # Safety
/// `num_codecs` must be null or valid for writes.
pub unsafe fn get_number_of_methods(num_codecs: *mut u32) -> HRESULT {
    if num_codecs.is_null() {
        return E_INVALIDARG;
    }
    unsafe { *num_codecs = 0 };
    S_OK
}

/// # Safety
/// `value` must be null or point to 16 writable bytes.
pub unsafe fn get_method_property(
    _codec_index: u32,
    _prop_id: u32,
    value: *mut RawPropVariant,
) -> HRESULT {
    unsafe { reset_propvariant(value) };
    S_OK
}

/// # Safety
/// `out_object` must be null or valid for writes.
pub unsafe fn create_coder(_index: u32, _iid: *const Guid, out_object: *mut *mut c_void) -> HRESULT {
    if !out_object.is_null() {
        unsafe { *out_object = std::ptr::null_mut() };
    }
    CLASS_E_CLASSNOTAVAILABLE
}

/// # Safety
/// `hashers` must be null or valid for writes.
pub unsafe fn get_hashers(hashers: *mut *mut c_void) -> HRESULT {
    if !hashers.is_null() {
        unsafe { *hashers = std::ptr::null_mut() };
    }
    S_OK
}

pub fn set_codecs(_compress_codecs_info: *mut c_void) -> HRESULT {
    S_OK
}

pub fn set_large_page_mode() -> HRESULT {
    S_OK
}

pub fn set_case_sensitive(case_sensitive: i32) -> HRESULT {
    CASE_SENSITIVE.store(case_sensitive != 0, Ordering::Relaxed);
    S_OK
}

/// # Safety
/// `value` must be null or point to 16 writable bytes.
pub unsafe fn get_module_prop(prop_id: u32, value: *mut RawPropVariant) -> HRESULT {
    if value.is_null() {
        return E_INVALIDARG;
    }
    let prop = if prop_id == ModulePropId::InterfaceType as u32 {
        PropValue::U32(MODULE_INTERFACE_TYPE_NO_VIRT_DESTRUCTOR)
    } else if prop_id == ModulePropId::Version as u32 {
        PropValue::U32((MY_VER_MAJOR << 16) | MY_VER_MINOR)
    } else {
        PropValue::Empty
    };
    unsafe { write_propvariant(value, &prop) }
}
