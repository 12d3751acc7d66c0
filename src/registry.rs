//! The table of archive formats a plugin library exposes.
//!
//! A [`Registry`] is filled once, in order, by the registration functions
//! passed to [`export_plugin!`](crate::export_plugin). The position of a
//! descriptor is its format index in every host call.

use std::borrow::Cow;
use std::ffi::c_void;

use tracing::warn;

use crate::abi::com::HandlerPropId;
use crate::abi::exports::is_arc_thunk;
use crate::abi::handler;
use crate::abi::{Guid, IsArcFn, guid_bytes};
use crate::traits::{ArchiveFormat, ArchiveReader, ArchiveSniffer, ArchiveUpdater};
use crate::types::{ArcFlags, PropValue};

/// Which archive interface a new object is requested through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveInterface {
    /// `IInArchive`
    In,
    /// `IOutArchive`
    Out,
}

/// Creates a handler object with a reference count of one and returns the
/// requested interface pointer.
pub type CreateArchiveFn = fn(ArchiveInterface) -> *mut c_void;

/// What kind of archive object a format can create.
#[derive(Clone, Copy)]
pub enum ArchiveObjects {
    /// Metadata only: the host can list the format but not instantiate it.
    None,
    Reader(CreateArchiveFn),
    Writer(CreateArchiveFn),
    ReaderWriter(CreateArchiveFn),
}

impl ArchiveObjects {
    pub fn can_read(&self) -> bool {
        matches!(self, Self::Reader(_) | Self::ReaderWriter(_))
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Self::Writer(_) | Self::ReaderWriter(_))
    }

    pub fn supports(&self, iface: ArchiveInterface) -> bool {
        match iface {
            ArchiveInterface::In => self.can_read(),
            ArchiveInterface::Out => self.can_write(),
        }
    }

    /// Create an object exposing `iface`, or `None` if the capability is
    /// missing.
    pub fn create(&self, iface: ArchiveInterface) -> Option<*mut c_void> {
        match self {
            Self::Reader(create) | Self::Writer(create) | Self::ReaderWriter(create)
                if self.supports(iface) =>
            {
                Some(create(iface))
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for ArchiveObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "None",
            Self::Reader(_) => "Reader",
            Self::Writer(_) => "Writer",
            Self::ReaderWriter(_) => "ReaderWriter",
        })
    }
}

/// Byte patterns the host uses to detect a format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Signature {
    #[default]
    None,
    Single(&'static [u8]),
    /// Alternatives, each at most 255 bytes long.
    Multi(Vec<&'static [u8]>),
}

impl Signature {
    /// The `kMultiSignature` encoding: every pattern preceded by its length.
    pub fn encode_multi(patterns: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::with_capacity(patterns.iter().map(|p| p.len() + 1).sum());
        for pattern in patterns {
            out.push(pattern.len() as u8);
            out.extend_from_slice(pattern);
        }
        out
    }

    fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

/// An archive format descriptor.
#[derive(Debug, Clone)]
pub struct ArcInfo {
    name: &'static str,
    class_id: Guid,
    extension: &'static str,
    add_extension: Option<&'static str>,
    flags: ArcFlags,
    time_flags: u32,
    signature: Signature,
    signature_offset: u16,
    objects: ArchiveObjects,
    is_arc: Option<IsArcFn>,
}

impl ArcInfo {
    pub fn new(name: &'static str, class_id: Guid, extension: &'static str) -> Self {
        Self {
            name,
            class_id,
            extension,
            add_extension: None,
            flags: ArcFlags::NONE,
            time_flags: 0,
            signature: Signature::None,
            signature_offset: 0,
            objects: ArchiveObjects::None,
            is_arc: None,
        }
    }

    /// Metadata from a format implementation, without any archive objects.
    pub fn from_format<T: ArchiveFormat>() -> Self {
        let signature = match (T::signatures(), T::signature()) {
            (multi, _) if !multi.is_empty() => Signature::Multi(multi.to_vec()),
            (_, Some(single)) => Signature::Single(single),
            _ => Signature::None,
        };
        let mut info = Self::new(T::name(), T::class_id(), T::extension())
            .with_flags(T::flags())
            .with_time_flags(T::time_flags())
            .with_signature(signature)
            .with_signature_offset(T::signature_offset());
        info.add_extension = T::additional_extension();
        info
    }

    /// A format whose objects only expose `IInArchive`.
    pub fn reader<T: ArchiveReader>() -> Self {
        Self::from_format::<T>().with_objects(ArchiveObjects::Reader(handler::create_reader::<T>))
    }

    /// A format whose objects expose both `IInArchive` and `IOutArchive`.
    pub fn updater<T: ArchiveReader + ArchiveUpdater>() -> Self {
        Self::from_format::<T>()
            .with_objects(ArchiveObjects::ReaderWriter(handler::create_reader_writer::<T>))
    }

    /// A format whose objects only expose `IOutArchive`.
    pub fn writer<T: ArchiveUpdater>() -> Self {
        Self::from_format::<T>().with_objects(ArchiveObjects::Writer(handler::create_writer::<T>))
    }

    pub fn with_add_extension(mut self, ext: &'static str) -> Self {
        self.add_extension = (!ext.is_empty()).then_some(ext);
        self
    }

    /// Set the capability flags. The multi-signature bit is ignored here and
    /// follows the signature instead.
    pub fn with_flags(mut self, flags: ArcFlags) -> Self {
        self.flags = flags.without(ArcFlags::MULTI_SIGNATURE);
        self
    }

    pub fn with_time_flags(mut self, time_flags: u32) -> Self {
        self.time_flags = time_flags;
        self
    }

    /// Set the detection signature. Empty patterns are treated as absent,
    /// and patterns longer than 255 bytes are dropped from a multi-signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = match signature {
            Signature::Single(s) if s.is_empty() => Signature::None,
            Signature::Multi(patterns) => {
                let kept: Vec<_> = patterns
                    .into_iter()
                    .filter(|p| {
                        let fits = !p.is_empty() && p.len() <= u8::MAX as usize;
                        if !fits {
                            warn!(format = self.name, len = p.len(), "dropping signature pattern");
                        }
                        fits
                    })
                    .collect();
                if kept.is_empty() {
                    Signature::None
                } else {
                    Signature::Multi(kept)
                }
            }
            other => other,
        };
        self
    }

    pub fn with_signature_offset(mut self, offset: u16) -> Self {
        self.signature_offset = offset;
        self
    }

    pub fn with_objects(mut self, objects: ArchiveObjects) -> Self {
        self.objects = objects;
        self
    }

    /// Attach a format sniffer for `GetIsArc`.
    pub fn with_sniffer<S: ArchiveSniffer>(self) -> Self {
        self.with_is_arc(is_arc_thunk::<S>)
    }

    pub fn with_is_arc(mut self, is_arc: IsArcFn) -> Self {
        self.is_arc = Some(is_arc);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn class_id(&self) -> Guid {
        self.class_id
    }

    pub fn extension(&self) -> &'static str {
        self.extension
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn objects(&self) -> ArchiveObjects {
        self.objects
    }

    pub fn is_arc(&self) -> Option<IsArcFn> {
        self.is_arc
    }

    /// Capability flags as reported to the host.
    pub fn flags(&self) -> ArcFlags {
        if self.signature.is_multi() {
            self.flags | ArcFlags::MULTI_SIGNATURE
        } else {
            self.flags
        }
    }

    /// The value of a handler property.
    pub fn property(&self, id: HandlerPropId) -> PropValue<'_> {
        let flag = |f| PropValue::Bool(self.flags().contains(f));
        match id {
            HandlerPropId::Name => PropValue::Str(self.name),
            HandlerPropId::ClassId => PropValue::Bytes(Cow::Owned(guid_bytes(&self.class_id).to_vec())),
            HandlerPropId::Extension => PropValue::Str(self.extension),
            HandlerPropId::AddExtension => PropValue::Str(self.add_extension.unwrap_or("")),
            HandlerPropId::Update => PropValue::Bool(self.objects.can_write()),
            HandlerPropId::KeepName => flag(ArcFlags::KEEP_NAME),
            HandlerPropId::Signature => match &self.signature {
                Signature::Single(bytes) => PropValue::Bytes(Cow::Borrowed(*bytes)),
                _ => PropValue::Empty,
            },
            HandlerPropId::MultiSignature => match &self.signature {
                Signature::Multi(patterns) => {
                    PropValue::Bytes(Cow::Owned(Signature::encode_multi(patterns)))
                }
                _ => PropValue::Empty,
            },
            HandlerPropId::SignatureOffset => PropValue::U32(self.signature_offset.into()),
            HandlerPropId::AltStreams => flag(ArcFlags::ALT_STREAMS),
            HandlerPropId::NtSecure => flag(ArcFlags::NT_SECURE),
            HandlerPropId::Flags => PropValue::U32(self.flags().bits()),
            HandlerPropId::TimeFlags => PropValue::U32(self.time_flags),
        }
    }
}

/// Ordered, append-only set of format descriptors.
#[derive(Debug, Default)]
pub struct Registry {
    formats: Vec<ArcInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor. Its index is the number of formats registered
    /// before it.
    pub fn register(&mut self, info: ArcInfo) -> &mut Self {
        if let Some(existing) = self.find_class(&info.class_id) {
            warn!(
                class_id = ?info.class_id,
                format = info.name,
                existing = existing.name,
                "duplicate class id; the earlier format wins"
            );
        }
        tracing::debug!(index = self.formats.len(), format = info.name, "registered format");
        self.formats.push(info);
        self
    }

    /// Register a format's metadata without archive objects.
    pub fn register_format<T: ArchiveFormat>(&mut self) -> &mut Self {
        self.register(ArcInfo::from_format::<T>())
    }

    pub fn register_reader<T: ArchiveReader>(&mut self) -> &mut Self {
        self.register(ArcInfo::reader::<T>())
    }

    pub fn register_updater<T: ArchiveReader + ArchiveUpdater>(&mut self) -> &mut Self {
        self.register(ArcInfo::updater::<T>())
    }

    pub fn register_writer<T: ArchiveUpdater>(&mut self) -> &mut Self {
        self.register(ArcInfo::writer::<T>())
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ArcInfo> {
        self.formats.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArcInfo> {
        self.formats.iter()
    }

    /// First descriptor registered with `class_id`.
    pub fn find_class(&self, class_id: &Guid) -> Option<&ArcInfo> {
        self.formats.iter().find(|f| f.class_id == *class_id)
    }
}
