//! Windows version resource, written as a compiled `.res` file that the MSVC
//! linker accepts as an input.

use std::fmt;
use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};

use super::args::{Arch, DLL_NAME};
use super::env::{CiInfo, date_version};

const RT_VERSION: u16 = 16;
const VS_VERSION_INFO: u16 = 1;
const LANG_EN_US: u16 = 0x0409;
const CODEPAGE_UNICODE: u16 = 0x04B0;
const MEMORY_FLAGS: u16 = 0x0030;

const VS_FFI_SIGNATURE: u32 = 0xFEEF_04BD;
const VS_FFI_STRUCVERSION: u32 = 0x0001_0000;
const VS_FFI_FILEFLAGSMASK: u32 = 0x3F;
const VOS_NT_WINDOWS32: u32 = 0x0004_0004;
const VFT_DLL: u32 = 2;
const FIXED_FILE_INFO_LEN: u16 = 52;

const TYPE_BINARY: u16 = 0;
const TYPE_TEXT: u16 = 1;

pub const PRODUCT_NAME: &str = "Rust Plugins for 7-Zip (sevenzip-plugins)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16,
}

impl FileVersion {
    fn ms(self) -> u32 {
        (u32::from(self.major) << 16) | u32::from(self.minor)
    }

    fn ls(self) -> u32 {
        (u32::from(self.patch) << 16) | u32::from(self.build)
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

/// The `StringFileInfo` entries. Empty strings are left out of the resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringFileInfo {
    pub comments: String,
    pub company_name: String,
    pub file_description: String,
    pub file_version: String,
    pub internal_name: String,
    pub legal_copyright: String,
    pub legal_trademarks: String,
    pub original_filename: String,
    pub private_build: String,
    pub product_name: String,
    pub product_version: String,
    pub special_build: String,
}

impl StringFileInfo {
    /// Every entry with its resource key, in declaration order.
    pub fn fields(&self) -> [(&'static str, &str); 12] {
        [
            ("Comments", &self.comments),
            ("CompanyName", &self.company_name),
            ("FileDescription", &self.file_description),
            ("FileVersion", &self.file_version),
            ("InternalName", &self.internal_name),
            ("LegalCopyright", &self.legal_copyright),
            ("LegalTrademarks", &self.legal_trademarks),
            ("OriginalFilename", &self.original_filename),
            ("PrivateBuild", &self.private_build),
            ("ProductName", &self.product_name),
            ("ProductVersion", &self.product_version),
            ("SpecialBuild", &self.special_build),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub file_version: FileVersion,
    pub product_version: FileVersion,
    pub strings: StringFileInfo,
}

impl VersionInfo {
    /// Version info for a plugin library built at `time`.
    pub fn new(arch: Arch, time: DateTime<Utc>, ci: Option<&CiInfo>, plugins: &[&str]) -> Self {
        let (year, month, day) = date_version(time);
        let version = FileVersion {
            major: year,
            minor: month,
            patch: day,
            build: ci.and_then(|ci| ci.run_number).unwrap_or(0),
        };

        let mut strings = StringFileInfo {
            file_description: plugins.join(", "),
            file_version: version.to_string(),
            internal_name: DLL_NAME.to_uppercase(),
            original_filename: format!("{DLL_NAME}{arch}.dll").to_uppercase(),
            product_name: PRODUCT_NAME.to_string(),
            product_version: format!("7-Zip 23.01+ ({})", arch.platform()),
            ..Default::default()
        };
        if let Some(ci) = ci {
            if let Some(owner) = &ci.owner {
                strings.company_name = format!("{owner} (github.com/{owner})");
            }
            if let Some(sha) = &ci.short_sha {
                strings.file_version = format!("{version} ({sha})");
            }
        }

        Self {
            file_version: version,
            product_version: version,
            strings,
        }
    }

    /// The compiled resource file.
    pub fn to_res(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        // A .res file starts with an empty entry marking the format.
        write_resource_header(&mut out, 0, 0, 0, 0, 0)?;

        let data = self.version_block()?;
        let size = u32::try_from(data.len()).map_err(io::Error::other)?;
        write_resource_header(&mut out, size, RT_VERSION, VS_VERSION_INFO, MEMORY_FLAGS, LANG_EN_US)?;
        out.write_all(&data)?;
        pad4(&mut out);
        Ok(out)
    }

    fn version_block(&self) -> io::Result<Vec<u8>> {
        let mut fixed = Vec::with_capacity(FIXED_FILE_INFO_LEN as usize);
        for dword in [
            VS_FFI_SIGNATURE,
            VS_FFI_STRUCVERSION,
            self.file_version.ms(),
            self.file_version.ls(),
            self.product_version.ms(),
            self.product_version.ls(),
            VS_FFI_FILEFLAGSMASK,
            0, // file flags
            VOS_NT_WINDOWS32,
            VFT_DLL,
            0, // subtype
            0, // date, high
            0, // date, low
        ] {
            fixed.write_u32::<LittleEndian>(dword)?;
        }

        let mut strings = Vec::new();
        for (key, value) in self.strings.fields() {
            if value.is_empty() {
                continue;
            }
            let text = utf16z(value);
            let chars = u16::try_from(text.len() / 2).map_err(io::Error::other)?;
            strings.push(node(key, TYPE_TEXT, chars, &text, &[])?);
        }
        let table_key = format!("{LANG_EN_US:04X}{CODEPAGE_UNICODE:04X}");
        let table = node(&table_key, TYPE_TEXT, 0, &[], &strings)?;
        let string_info = node("StringFileInfo", TYPE_TEXT, 0, &[], &[table])?;

        let mut translation = Vec::with_capacity(4);
        translation.write_u16::<LittleEndian>(LANG_EN_US)?;
        translation.write_u16::<LittleEndian>(CODEPAGE_UNICODE)?;
        let var = node("Translation", TYPE_BINARY, 4, &translation, &[])?;
        let var_info = node("VarFileInfo", TYPE_TEXT, 0, &[], &[var])?;

        node(
            "VS_VERSION_INFO",
            TYPE_BINARY,
            FIXED_FILE_INFO_LEN,
            &fixed,
            &[string_info, var_info],
        )
    }
}

fn write_resource_header(
    w: &mut impl Write,
    data_size: u32,
    type_id: u16,
    name_id: u16,
    memory_flags: u16,
    language: u16,
) -> io::Result<()> {
    w.write_u32::<LittleEndian>(data_size)?;
    w.write_u32::<LittleEndian>(32)?; // header size
    w.write_u16::<LittleEndian>(0xFFFF)?;
    w.write_u16::<LittleEndian>(type_id)?;
    w.write_u16::<LittleEndian>(0xFFFF)?;
    w.write_u16::<LittleEndian>(name_id)?;
    w.write_u32::<LittleEndian>(0)?; // data version
    w.write_u16::<LittleEndian>(memory_flags)?;
    w.write_u16::<LittleEndian>(language)?;
    w.write_u32::<LittleEndian>(0)?; // version
    w.write_u32::<LittleEndian>(0) // characteristics
}

/// One version-info block: length, value length, type, key, value, children.
/// Every part starts on a four byte boundary relative to the block start.
fn node(
    key: &str,
    ty: u16,
    value_len: u16,
    value: &[u8],
    children: &[Vec<u8>],
) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.write_u16::<LittleEndian>(0)?;
    buf.write_u16::<LittleEndian>(value_len)?;
    buf.write_u16::<LittleEndian>(ty)?;
    buf.write_all(&utf16z(key))?;
    pad4(&mut buf);
    buf.write_all(value)?;
    for child in children {
        pad4(&mut buf);
        buf.write_all(child)?;
    }
    let len = u16::try_from(buf.len()).map_err(io::Error::other)?;
    buf[..2].copy_from_slice(&len.to_le_bytes());
    Ok(buf)
}

fn utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn pad4(buf: &mut Vec<u8>) {
    let len = buf.len().next_multiple_of(4);
    buf.resize(len, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn read_u16(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn read_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn strings_for_local_build() {
        let info = VersionInfo::new(Arch::X64, epoch(1_700_000_000), None, &["vpk", "formats/pak"]);
        assert_eq!(info.file_version.to_string(), "2023.11.14.0");
        assert_eq!(info.strings.file_description, "vpk, formats/pak");
        assert_eq!(info.strings.internal_name, "RS7ZPLUGIN");
        assert_eq!(info.strings.original_filename, "RS7ZPLUGIN64.DLL");
        assert_eq!(info.strings.product_version, "7-Zip 23.01+ (x64)");
        assert!(info.strings.company_name.is_empty());
    }

    #[test]
    fn strings_for_github_build() {
        let ci = CiInfo {
            owner: Some("someone".into()),
            run_number: Some(7),
            short_sha: Some("0123456".into()),
        };
        let info = VersionInfo::new(Arch::Arm64, epoch(0), Some(&ci), &[]);
        assert_eq!(info.strings.file_version, "1970.1.1.7 (0123456)");
        assert_eq!(info.strings.company_name, "someone (github.com/someone)");
        assert_eq!(info.strings.original_filename, "RS7ZPLUGINARM64.DLL");
    }

    #[test]
    fn res_layout() {
        let info = VersionInfo::new(Arch::X86, epoch(1_700_000_000), None, &["a"]);
        let res = info.to_res().unwrap();

        // empty marker entry
        assert_eq!(read_u32(&res, 0), 0);
        assert_eq!(read_u32(&res, 4), 32);
        assert_eq!(read_u16(&res, 8), 0xFFFF);
        assert_eq!(read_u16(&res, 10), 0);

        // version entry header
        let size = read_u32(&res, 32) as usize;
        assert_eq!(read_u16(&res, 42), RT_VERSION);
        assert_eq!(read_u16(&res, 46), 1);
        assert_eq!(read_u16(&res, 52), 0x30);
        assert_eq!(read_u16(&res, 54), 0x409);
        assert_eq!(res.len(), (64 + size).next_multiple_of(4));

        // VS_VERSIONINFO: 6 byte header, 32 byte key, 2 bytes padding
        let data = &res[64..64 + size];
        assert_eq!(read_u16(data, 0) as usize, size);
        assert_eq!(read_u16(data, 2), 52);
        assert_eq!(read_u32(data, 40), VS_FFI_SIGNATURE);
        assert_eq!(read_u32(data, 48), (2023 << 16) | 11);
        assert_eq!(read_u32(data, 52), 14 << 16);
        assert_eq!(read_u32(data, 72), VOS_NT_WINDOWS32);
        assert_eq!(read_u32(data, 76), VFT_DLL);

        let text: Vec<u16> = data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let text = String::from_utf16_lossy(&text);
        assert!(text.contains("040904B0"));
        assert!(text.contains("RS7ZPLUGIN32.DLL"));
        assert!(!text.contains("Comments"));
    }

    #[test]
    fn res_is_deterministic() {
        let a = VersionInfo::new(Arch::X64, epoch(86_400), None, &["x"]);
        let b = VersionInfo::new(Arch::X64, epoch(86_400), None, &["x"]);
        assert_eq!(a.to_res().unwrap(), b.to_res().unwrap());
    }
}
