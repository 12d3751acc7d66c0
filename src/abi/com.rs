//! COM interface definitions and GUIDs for 7-Zip.

use std::ffi::c_void;

use super::guid::{Guid, seven_zip_interface};
use super::hresult::HRESULT;
use super::propvariant::RawPropVariant;

// C/7zVersion.h
pub const MY_VER_MAJOR: u32 = 23;
pub const MY_VER_MINOR: u32 = 1;
pub const MY_VERSION_NUMBERS: &str = "23.01";

/// Standard COM interface GUIDs
pub const IID_IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_C000_000000000046);

// CPP/7zip/Archive/IArchive.h
pub const IID_IINARCHIVE: Guid = seven_zip_interface(6, 0x60);
pub const IID_IOUTARCHIVE: Guid = seven_zip_interface(6, 0xA0);

// CPP/7zip/ICoder.h
pub const IID_ICOMPRESSCODER: Guid = seven_zip_interface(4, 0x05);
pub const IID_ICOMPRESSCODER2: Guid = seven_zip_interface(4, 0x18);
pub const IID_ICOMPRESSFILTER: Guid = seven_zip_interface(4, 0x40);
pub const IID_IHASHER: Guid = seven_zip_interface(4, 0xC0);

/// `NModuleInterfaceType`: IUnknown has no virtual destructor in this module.
pub const MODULE_INTERFACE_TYPE_NO_VIRT_DESTRUCTOR: u32 = 0;

/// Item property IDs (`kpid*`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropId {
    Path = 3,
    IsDir = 6,
    Size = 7,
    PackSize = 8,
    Attrib = 9,
    CTime = 10,
    ATime = 11,
    MTime = 12,
    Crc = 19,
    PhySize = 44,
}

impl PropId {
    pub const fn from_u32(id: u32) -> Option<Self> {
        Some(match id {
            3 => Self::Path,
            6 => Self::IsDir,
            7 => Self::Size,
            8 => Self::PackSize,
            9 => Self::Attrib,
            10 => Self::CTime,
            11 => Self::ATime,
            12 => Self::MTime,
            19 => Self::Crc,
            44 => Self::PhySize,
            _ => return None,
        })
    }
}

/// Handler property IDs for GetHandlerProperty2.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPropId {
    Name = 0,
    ClassId = 1,
    Extension = 2,
    AddExtension = 3,
    Update = 4,
    KeepName = 5,
    Signature = 6,
    MultiSignature = 7,
    SignatureOffset = 8,
    AltStreams = 9,
    NtSecure = 10,
    Flags = 11,
    TimeFlags = 12,
}

impl HandlerPropId {
    pub const ALL: [Self; 13] = [
        Self::Name,
        Self::ClassId,
        Self::Extension,
        Self::AddExtension,
        Self::Update,
        Self::KeepName,
        Self::Signature,
        Self::MultiSignature,
        Self::SignatureOffset,
        Self::AltStreams,
        Self::NtSecure,
        Self::Flags,
        Self::TimeFlags,
    ];

    pub fn from_u32(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

/// Module property IDs for GetModuleProp.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulePropId {
    InterfaceType = 0,
    Version = 1,
}

// NArchive::NExtract::NAskMode
pub const ASK_MODE_EXTRACT: i32 = 0;
pub const ASK_MODE_TEST: i32 = 1;

// NArchive::NExtract::NOperationResult
pub const OP_RESULT_OK: i32 = 0;
pub const OP_RESULT_UNSUPPORTED_METHOD: i32 = 1;
pub const OP_RESULT_DATA_ERROR: i32 = 2;

// NArchive::NUpdate::NOperationResult
pub const UPDATE_RESULT_OK: i32 = 0;
pub const UPDATE_RESULT_ERROR: i32 = 1;

// NFileTimeType
pub const FILE_TIME_TYPE_WINDOWS: u32 = 0;

// Stream seek origins
pub const STREAM_SEEK_SET: u32 = 0;
pub const STREAM_SEEK_CUR: u32 = 1;
pub const STREAM_SEEK_END: u32 = 2;

// =============================================================================
// Interfaces we implement
// =============================================================================

/// IInArchive vtable layout matching 7-Zip SDK.
#[repr(C)]
pub struct IInArchiveVtbl<T> {
    // IUnknown (3 methods)
    pub query_interface:
        unsafe extern "system" fn(*mut T, *const Guid, *mut *mut c_void) -> HRESULT,
    pub add_ref: unsafe extern "system" fn(*mut T) -> u32,
    pub release: unsafe extern "system" fn(*mut T) -> u32,
    // IInArchive methods (10 methods)
    pub open: unsafe extern "system" fn(*mut T, *mut c_void, *const u64, *mut c_void) -> HRESULT,
    pub close: unsafe extern "system" fn(*mut T) -> HRESULT,
    pub get_number_of_items: unsafe extern "system" fn(*mut T, *mut u32) -> HRESULT,
    pub get_property:
        unsafe extern "system" fn(*mut T, u32, u32, *mut RawPropVariant) -> HRESULT,
    pub extract: unsafe extern "system" fn(*mut T, *const u32, u32, i32, *mut c_void) -> HRESULT,
    pub get_archive_property:
        unsafe extern "system" fn(*mut T, u32, *mut RawPropVariant) -> HRESULT,
    pub get_number_of_properties: unsafe extern "system" fn(*mut T, *mut u32) -> HRESULT,
    pub get_property_info:
        unsafe extern "system" fn(*mut T, u32, *mut *mut u16, *mut u32, *mut u16) -> HRESULT,
    pub get_number_of_archive_properties: unsafe extern "system" fn(*mut T, *mut u32) -> HRESULT,
    pub get_archive_property_info:
        unsafe extern "system" fn(*mut T, u32, *mut *mut u16, *mut u32, *mut u16) -> HRESULT,
}

/// IOutArchive vtable layout matching 7-Zip SDK.
#[repr(C)]
pub struct IOutArchiveVtbl<T> {
    // IUnknown (3 methods)
    pub query_interface:
        unsafe extern "system" fn(*mut T, *const Guid, *mut *mut c_void) -> HRESULT,
    pub add_ref: unsafe extern "system" fn(*mut T) -> u32,
    pub release: unsafe extern "system" fn(*mut T) -> u32,
    // IOutArchive methods (2 methods)
    pub update_items: unsafe extern "system" fn(*mut T, *mut c_void, u32, *mut c_void) -> HRESULT,
    pub get_file_time_type: unsafe extern "system" fn(*mut T, *mut u32) -> HRESULT,
}

// =============================================================================
// Host interfaces we call
// =============================================================================

/// The three IUnknown slots every host object starts with.
#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HRESULT,
    pub add_ref: unsafe extern "system" fn(*mut c_void) -> u32,
    pub release: unsafe extern "system" fn(*mut c_void) -> u32,
}

/// ISequentialInStream.
#[repr(C)]
pub struct ISequentialInStreamVtbl {
    pub base: IUnknownVtbl,
    pub read: unsafe extern "system" fn(*mut c_void, *mut u8, u32, *mut u32) -> HRESULT,
}

/// IInStream: ISequentialInStream plus Seek.
#[repr(C)]
pub struct IInStreamVtbl {
    pub base: IUnknownVtbl,
    pub read: unsafe extern "system" fn(*mut c_void, *mut u8, u32, *mut u32) -> HRESULT,
    pub seek: unsafe extern "system" fn(*mut c_void, i64, u32, *mut u64) -> HRESULT,
}

/// ISequentialOutStream.
#[repr(C)]
pub struct ISequentialOutStreamVtbl {
    pub base: IUnknownVtbl,
    pub write: unsafe extern "system" fn(*mut c_void, *const u8, u32, *mut u32) -> HRESULT,
}

/// IArchiveExtractCallback (IProgress + 3 methods).
#[repr(C)]
pub struct IArchiveExtractCallbackVtbl {
    pub base: IUnknownVtbl,
    pub set_total: unsafe extern "system" fn(*mut c_void, u64) -> HRESULT,
    pub set_completed: unsafe extern "system" fn(*mut c_void, *const u64) -> HRESULT,
    pub get_stream: unsafe extern "system" fn(*mut c_void, u32, *mut *mut c_void, i32) -> HRESULT,
    pub prepare_operation: unsafe extern "system" fn(*mut c_void, i32) -> HRESULT,
    pub set_operation_result: unsafe extern "system" fn(*mut c_void, i32) -> HRESULT,
}

/// IArchiveUpdateCallback (IProgress + 4 methods).
#[repr(C)]
pub struct IArchiveUpdateCallbackVtbl {
    pub base: IUnknownVtbl,
    pub set_total: unsafe extern "system" fn(*mut c_void, u64) -> HRESULT,
    pub set_completed: unsafe extern "system" fn(*mut c_void, *const u64) -> HRESULT,
    pub get_update_item_info:
        unsafe extern "system" fn(*mut c_void, u32, *mut i32, *mut i32, *mut u32) -> HRESULT,
    pub get_property:
        unsafe extern "system" fn(*mut c_void, u32, u32, *mut RawPropVariant) -> HRESULT,
    pub get_stream: unsafe extern "system" fn(*mut c_void, u32, *mut *mut c_void) -> HRESULT,
    pub set_operation_result: unsafe extern "system" fn(*mut c_void, i32) -> HRESULT,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    const PTR: usize = size_of::<*const ()>();

    #[test]
    fn interface_ids() {
        assert_eq!(
            IID_IINARCHIVE,
            Guid::from_u128(0x23170f69_40c1_278a_0000_000600600000)
        );
        assert_eq!(
            IID_IOUTARCHIVE,
            Guid::from_u128(0x23170f69_40c1_278a_0000_000600a00000)
        );
        assert_eq!(IID_IHASHER, Guid::from_u128(0x23170f69_40c1_278a_0000_000400c00000));
    }

    #[test]
    fn operation_results() {
        // kOK is zero for both extraction and update results.
        assert_eq!((OP_RESULT_OK, OP_RESULT_DATA_ERROR), (0, 2));
        assert_eq!((UPDATE_RESULT_OK, UPDATE_RESULT_ERROR), (0, 1));
    }

    #[test]
    fn vtable_slot_offsets() {
        type In = IInArchiveVtbl<c_void>;
        assert_eq!(offset_of!(In, open), 3 * PTR);
        assert_eq!(offset_of!(In, extract), 7 * PTR);
        assert_eq!(offset_of!(In, get_archive_property_info), 12 * PTR);
        assert_eq!(size_of::<In>(), 13 * PTR);

        type Out = IOutArchiveVtbl<c_void>;
        assert_eq!(offset_of!(Out, update_items), 3 * PTR);
        assert_eq!(size_of::<Out>(), 5 * PTR);

        assert_eq!(offset_of!(IInStreamVtbl, seek), 4 * PTR);
        assert_eq!(offset_of!(IArchiveExtractCallbackVtbl, set_operation_result), 7 * PTR);
        assert_eq!(offset_of!(IArchiveUpdateCallbackVtbl, get_stream), 7 * PTR);
        assert_eq!(offset_of!(IArchiveUpdateCallbackVtbl, set_operation_result), 8 * PTR);
    }

    #[test]
    fn handler_prop_ids_are_dense() {
        for (i, id) in HandlerPropId::ALL.iter().enumerate() {
            assert_eq!(*id as u32, i as u32);
            assert_eq!(HandlerPropId::from_u32(i as u32), Some(*id));
        }
        assert_eq!(HandlerPropId::from_u32(13), None);
        assert_eq!(PropId::from_u32(44), Some(PropId::PhySize));
        assert_eq!(PropId::from_u32(4), None);
    }
}
