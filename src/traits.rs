//! Safe traits that plugin authors implement.

use crate::abi::Guid;
use crate::error::Result;
use crate::types::{ArcFlags, ArchiveItem, IsArcResult, ProgressCallback, UpdateItem};
use std::io::{Read, Seek, Write};

/// A trait alias for types that implement both `Read` and `Seek`.
///
/// This is used for streaming archive input, allowing plugins to read
/// archive data on-demand without buffering the entire file in memory.
pub trait ReadSeek: Read + Seek {}

// Blanket implementation for all types that implement Read + Seek
impl<T: Read + Seek> ReadSeek for T {}

/// Metadata about an archive format.
///
/// This trait defines the static properties of your archive format. They
/// become the handler properties 7-Zip reads through `GetHandlerProperty2`.
pub trait ArchiveFormat: Default + Send + 'static {
    /// Human-readable name of the format (e.g., "VPK0203", "ZIP").
    fn name() -> &'static str;

    /// File extension without the dot (e.g., "vpk", "zip").
    fn extension() -> &'static str;

    /// Unique class ID for this format.
    fn class_id() -> Guid;

    /// Extension of the unpacked content, if the format wraps a single file
    /// (e.g. "tar" for "tgz").
    fn additional_extension() -> Option<&'static str> {
        None
    }

    /// File signature/magic bytes for format detection.
    /// Return `None` if the format cannot be detected by magic bytes.
    fn signature() -> Option<&'static [u8]> {
        None
    }

    /// Several alternative signatures. Takes precedence over
    /// [`signature`](Self::signature) when non-empty.
    fn signatures() -> &'static [&'static [u8]] {
        &[]
    }

    /// Offset of the signature from the start of the file.
    fn signature_offset() -> u16 {
        0
    }

    /// Capability flags. The multi-signature bit is managed by the registry.
    fn flags() -> ArcFlags {
        ArcFlags::NONE
    }

    fn time_flags() -> u32 {
        0
    }
}

/// Trait for reading archives.
///
/// Implement this to allow 7-Zip to open and extract from your archive format.
pub trait ArchiveReader: ArchiveFormat {
    /// Open and parse the archive from a streaming reader.
    ///
    /// - `reader`: A seekable reader for the archive data
    /// - `size`: Total size of the archive in bytes
    ///
    /// Store any parsed metadata internally for later extraction.
    fn open(&mut self, reader: &mut dyn ReadSeek, size: u64) -> Result<()>;

    /// Returns the number of items in the archive.
    fn item_count(&self) -> usize;

    /// Get information about an item by index.
    fn get_item(&self, index: usize) -> Option<&ArchiveItem>;

    /// Extract an item's data by index.
    fn extract(&mut self, index: usize) -> Result<Vec<u8>>;

    /// Extract an item's data directly to a writer (streaming).
    ///
    /// The default implementation calls `extract()` and writes the result.
    /// Returns the number of bytes written.
    fn extract_to(&mut self, index: usize, writer: &mut dyn Write) -> Result<u64> {
        let data = self.extract(index)?;
        writer.write_all(&data)?;
        Ok(data.len() as u64)
    }

    /// Close the archive and release resources.
    fn close(&mut self) {}

    /// Get the physical size of the archive (optional).
    fn physical_size(&self) -> Option<u64> {
        None
    }
}

/// Trait for writing/updating archives.
///
/// Creating a new archive is simply updating from empty data with all
/// `AddNew` items.
pub trait ArchiveUpdater: ArchiveFormat {
    /// Write a new archive.
    ///
    /// - `existing`: A seekable reader for the open archive (empty if creating new)
    /// - `existing_size`: Size of the existing archive in bytes (0 if creating new)
    /// - `updates`: List of update operations (copy existing or add new)
    /// - `writer`: Output stream to write the new archive to
    /// - `progress`: Optional callback; stop with [`Error::Cancelled`]
    ///   when it returns `false`.
    ///
    /// Returns the number of bytes written to the output.
    ///
    /// [`Error::Cancelled`]: crate::Error::Cancelled
    fn update(
        &mut self,
        existing: &mut dyn ReadSeek,
        existing_size: u64,
        updates: Vec<UpdateItem>,
        writer: &mut dyn Write,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<u64>;
}

/// Cheap format detection on the first bytes of a file, handed to the host
/// through `GetIsArc`.
pub trait ArchiveSniffer {
    fn is_arc(data: &[u8]) -> IsArcResult;
}
