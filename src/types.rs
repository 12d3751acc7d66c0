//! Core types for archive items and properties.

use std::borrow::Cow;
use std::ops::{BitOr, BitOrAssign};
use std::time::SystemTime;

use crate::abi::com::PropId;
use crate::abi::propvariant::systemtime_to_filetime;

/// A property value before it is written into host memory.
///
/// Every value the host can read from a handler or an archive object is
/// produced as a `PropValue` first, so the value semantics can be checked
/// without touching a raw `PROPVARIANT`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropValue<'a> {
    /// `VT_EMPTY`: the property is absent.
    #[default]
    Empty,
    /// `VT_BSTR` holding text.
    Str(&'a str),
    /// `VT_BSTR` holding raw bytes (class ids, signatures).
    Bytes(Cow<'a, [u8]>),
    /// `VT_BOOL`.
    Bool(bool),
    /// `VT_UI4`.
    U32(u32),
    /// `VT_UI8`.
    U64(u64),
    /// `VT_FILETIME`, in 100ns intervals since 1601-01-01.
    FileTime(u64),
}

impl PropValue<'_> {
    pub fn is_empty(&self) -> bool {
        matches!(self, PropValue::Empty)
    }
}

/// Information about a single item (file/directory) in an archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveItem {
    /// File/directory name (path within archive)
    pub name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Compressed size in bytes (if applicable)
    pub compressed_size: Option<u64>,
    /// Last modification time
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    /// Whether this is a directory
    pub is_dir: bool,
    /// File attributes (Windows-style, optional)
    pub attributes: Option<u32>,
    /// CRC32 checksum (optional)
    pub crc: Option<u32>,
}

impl ArchiveItem {
    /// Create a new file item with just name and size.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            is_dir: false,
            ..Default::default()
        }
    }

    /// Create a new directory item.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_dir: true,
            ..Default::default()
        }
    }

    /// Set the compressed size.
    pub fn with_compressed_size(mut self, size: u64) -> Self {
        self.compressed_size = Some(size);
        self
    }

    /// Set the modification time.
    pub fn with_modified(mut self, time: SystemTime) -> Self {
        self.modified = Some(time);
        self
    }

    pub fn with_attributes(mut self, attributes: u32) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn with_crc(mut self, crc: u32) -> Self {
        self.crc = Some(crc);
        self
    }

    /// The value of an item property as the host sees it.
    pub fn property(&self, id: PropId) -> PropValue<'_> {
        let time = |t: Option<SystemTime>| {
            t.map_or(PropValue::Empty, |t| {
                PropValue::FileTime(systemtime_to_filetime(t))
            })
        };
        match id {
            PropId::Path => PropValue::Str(&self.name),
            PropId::IsDir => PropValue::Bool(self.is_dir),
            PropId::Size => PropValue::U64(self.size),
            PropId::PackSize => self.compressed_size.map_or(PropValue::Empty, PropValue::U64),
            PropId::Attrib => self.attributes.map_or(PropValue::Empty, PropValue::U32),
            PropId::CTime => time(self.created),
            PropId::ATime => time(self.accessed),
            PropId::MTime => time(self.modified),
            PropId::Crc => self.crc.map_or(PropValue::Empty, PropValue::U32),
            PropId::PhySize => PropValue::Empty,
        }
    }
}

/// Describes an update operation for archive editing.
#[derive(Debug, Clone)]
pub enum UpdateItem {
    /// Copy an existing item from the source archive by index.
    CopyExisting {
        /// Index of the item in the original archive
        index: usize,
        /// New name (if renaming), or None to keep original
        new_name: Option<String>,
    },
    /// Add new data to the archive.
    AddNew {
        /// Name/path for the new item
        name: String,
        /// The data to add
        data: Vec<u8>,
        is_dir: bool,
        modified: Option<u64>,
    },
}

/// Progress callback: `(completed_bytes, total_bytes)`, returns `false` to
/// request cancellation.
pub type ProgressCallback<'a> = &'a mut dyn FnMut(u64, u64) -> bool;

/// Outcome of a format sniffer (`k_IsArc_Res_*`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsArcResult {
    No = 0,
    Yes = 1,
    NeedMore = 2,
}

/// Archive-format capability flags (`NArcInfoFlags`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ArcFlags(pub u32);

impl ArcFlags {
    pub const NONE: Self = Self(0);
    pub const KEEP_NAME: Self = Self(1 << 0);
    pub const ALT_STREAMS: Self = Self(1 << 1);
    pub const NT_SECURE: Self = Self(1 << 2);
    pub const FIND_SIGNATURE: Self = Self(1 << 3);
    pub const MULTI_SIGNATURE: Self = Self(1 << 4);
    pub const USE_GLOBAL_OFFSET: Self = Self(1 << 5);
    pub const START_OPEN: Self = Self(1 << 6);
    pub const PURE_START_OPEN: Self = Self(1 << 7);
    pub const BACKWARD_OPEN: Self = Self(1 << 8);
    pub const PRE_ARC: Self = Self(1 << 9);
    pub const SYM_LINKS: Self = Self(1 << 10);
    pub const HARD_LINKS: Self = Self(1 << 11);
    pub const BY_EXT_ONLY_OPEN: Self = Self(1 << 12);
    pub const HASH_HANDLER: Self = Self(1 << 13);
    pub const CTIME: Self = Self(1 << 14);
    pub const CTIME_DEFAULT: Self = Self(1 << 15);
    pub const ATIME: Self = Self(1 << 16);
    pub const ATIME_DEFAULT: Self = Self(1 << 17);
    pub const MTIME: Self = Self(1 << 18);
    pub const MTIME_DEFAULT: Self = Self(1 << 19);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for ArcFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ArcFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn item_properties() {
        let item = ArchiveItem::file("a/b.txt", 42)
            .with_compressed_size(10)
            .with_crc(0xDEADBEEF)
            .with_modified(UNIX_EPOCH + Duration::from_secs(1));
        assert_eq!(item.property(PropId::Path), PropValue::Str("a/b.txt"));
        assert_eq!(item.property(PropId::Size), PropValue::U64(42));
        assert_eq!(item.property(PropId::PackSize), PropValue::U64(10));
        assert_eq!(item.property(PropId::IsDir), PropValue::Bool(false));
        assert_eq!(item.property(PropId::Crc), PropValue::U32(0xDEADBEEF));
        assert_eq!(
            item.property(PropId::MTime),
            PropValue::FileTime(116_444_736_010_000_000)
        );
        assert!(item.property(PropId::Attrib).is_empty());
        assert!(item.property(PropId::CTime).is_empty());
        assert!(ArchiveItem::directory("d").property(PropId::PackSize).is_empty());
    }

    #[test]
    fn flag_bits() {
        let flags = ArcFlags::KEEP_NAME | ArcFlags::PURE_START_OPEN;
        assert_eq!(flags.bits(), 0x81);
        assert!(flags.contains(ArcFlags::PURE_START_OPEN));
        assert!(!flags.contains(ArcFlags::MULTI_SIGNATURE));
        assert_eq!(ArcFlags::MTIME_DEFAULT.bits(), 0x80000);
        assert_eq!(flags.without(ArcFlags::KEEP_NAME), ArcFlags::PURE_START_OPEN);
    }
}
