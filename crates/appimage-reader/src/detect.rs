//! AppImage format detection and payload offset calculation.

use crate::elf::{self, ELF_MAGIC, ElfHeader};
use crate::error::{Error, Result};
use log::debug;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Real AppImages are never smaller than this.
pub const DEFAULT_MIN_SIZE: u64 = 100 * 1024;

const MAGIC_OFFSET: u64 = 8;
const MODERN_MAGIC: [u8; 3] = [0x41, 0x49, 0x02];
const LEGACY_MAGIC: [u8; 3] = [0x41, 0x49, 0x01];

const ISO_MAGIC_OFFSET: u64 = 32769;
const ISO_MAGIC: [u8; 5] = *b"CD001";

/// Application-use field of the ISO9660 primary volume descriptor.
/// Type 1 AppImages keep their update information there.
const ISO_APPLICATION_USE_OFFSET: u64 = 33651;
const ISO_APPLICATION_USE_LEN: usize = 512;

const SQUASHFS_MAGIC: [u8; 4] = *b"hsqs";
const DWARFS_MAGIC: [u8; 6] = *b"DWARFS";

/// Section holding the update information of type 2 AppImages.
pub const UPDATE_INFO_SECTION: &str = ".upd_info";

/// The encoding of a candidate file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    #[default]
    NotAContainer,
    /// Type 1: hybrid ELF / ISO9660 image.
    Legacy,
    /// Type 2: ELF runtime followed by a compressed filesystem image.
    Modern,
}

/// The filesystem image found at the payload offset of a Modern container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    Squashfs,
    Dwarfs,
    Unknown,
}

/// Result of a successful detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Detection {
    pub kind: ContainerKind,
    pub payload_offset: u64,
    pub payload_format: PayloadFormat,
}

impl ContainerKind {
    pub fn is_container(self) -> bool {
        self != ContainerKind::NotAContainer
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerKind::NotAContainer => "none",
            ContainerKind::Legacy => "type 1",
            ContainerKind::Modern => "type 2",
        }
    }
}

/// Classify a file from its header bytes and size.
pub fn detect<R: Read + Seek>(reader: &mut R, size: u64, min_size: u64) -> ContainerKind {
    if size < min_size {
        return ContainerKind::NotAContainer;
    }

    match read_at::<_, 3>(reader, MAGIC_OFFSET) {
        Some(MODERN_MAGIC) => return ContainerKind::Modern,
        Some(LEGACY_MAGIC) => return ContainerKind::Legacy,
        _ => {}
    }

    // Older type 1 images were plain hybrid ISOs without the magic bytes.
    let is_elf = read_at::<_, 4>(reader, 0) == Some(ELF_MAGIC);
    if is_elf && read_at::<_, 5>(reader, ISO_MAGIC_OFFSET) == Some(ISO_MAGIC) {
        return ContainerKind::Legacy;
    }

    ContainerKind::NotAContainer
}

/// Offset of the embedded filesystem in a Modern container, or 0 if the
/// ELF header cannot be parsed.
pub fn payload_offset<R: Read + Seek>(reader: &mut R) -> u64 {
    ElfHeader::parse(reader)
        .map(|h| h.stub_size())
        .unwrap_or(0)
}

/// Sniff the image format at `offset`.
pub fn payload_format<R: Read + Seek>(reader: &mut R, offset: u64) -> PayloadFormat {
    match read_at::<_, 6>(reader, offset) {
        Some(magic) if magic[..4] == SQUASHFS_MAGIC => PayloadFormat::Squashfs,
        Some(magic) if magic == DWARFS_MAGIC => PayloadFormat::Dwarfs,
        _ => PayloadFormat::Unknown,
    }
}

/// Detect a file on disk. Directories and other non-regular files are
/// rejected without being opened.
pub fn detect_path(path: &Path, min_size: u64) -> Result<Detection> {
    let not_container = || Error::NotAContainer(path.to_path_buf());

    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => not_container(),
        _ => Error::Io(e),
    })?;
    if !meta.is_file() {
        return Err(not_container());
    }

    let mut reader = BufReader::new(File::open(path)?);
    let kind = detect(&mut reader, meta.len(), min_size);

    match kind {
        ContainerKind::NotAContainer => Err(not_container()),
        ContainerKind::Legacy => Ok(Detection {
            kind,
            payload_offset: 0,
            payload_format: PayloadFormat::Unknown,
        }),
        ContainerKind::Modern => {
            let offset = payload_offset(&mut reader);
            if offset == 0 || offset >= meta.len() {
                return Err(corrupt(path, format!("payload offset {} out of range", offset)));
            }
            let format = payload_format(&mut reader, offset);
            debug!(
                "{}: {} payload at {} ({:?})",
                path.display(),
                kind.as_str(),
                offset,
                format
            );
            Ok(Detection {
                kind,
                payload_offset: offset,
                payload_format: format,
            })
        }
    }
}

/// Read the update information embedded in a container, if any.
pub fn update_locator<R: Read + Seek>(reader: &mut R, kind: ContainerKind) -> Option<String> {
    let value = match kind {
        ContainerKind::Modern => elf::read_section_string(reader, UPDATE_INFO_SECTION),
        ContainerKind::Legacy => {
            let buf = read_at::<_, ISO_APPLICATION_USE_LEN>(reader, ISO_APPLICATION_USE_OFFSET)?;
            Some(elf::trim_nul(&buf))
        }
        ContainerKind::NotAContainer => None,
    }?;

    (!value.is_empty()).then_some(value)
}

fn corrupt(path: &Path, reason: String) -> Error {
    Error::CorruptHeader {
        path: PathBuf::from(path),
        reason,
    }
}

fn read_at<R: Read + Seek, const N: usize>(reader: &mut R, offset: u64) -> Option<[u8; N]> {
    let mut buf = [0u8; N];
    reader.seek(SeekFrom::Start(offset)).ok()?;
    reader.read_exact(&mut buf).ok()?;
    Some(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::elf::tests::elf64_header;
    use std::io::Cursor;
    use std::io::Write;

    /// A synthetic type 2 file: ELF header with the AppImage magic, padded to `size`.
    pub fn modern_image(size: usize, shoff: u64, shentsize: u16, shnum: u16) -> Vec<u8> {
        let mut data = elf64_header(shoff, shentsize, shnum);
        data[8..11].copy_from_slice(&MODERN_MAGIC);
        data.resize(size, 0);
        data
    }

    #[test]
    fn test_scenario_modern_offset() {
        let data = modern_image(150 * 1024, 1000, 64, 5);
        let mut cursor = Cursor::new(&data);

        assert_eq!(
            detect(&mut cursor, data.len() as u64, DEFAULT_MIN_SIZE),
            ContainerKind::Modern
        );
        assert_eq!(payload_offset(&mut cursor), 1320);
    }

    #[test]
    fn test_small_files_rejected_regardless_of_header() {
        for size in [0usize, 64, 4096, DEFAULT_MIN_SIZE as usize - 1] {
            let mut data = modern_image(size.max(64), 1000, 64, 5);
            data.truncate(size);
            let mut cursor = Cursor::new(&data);
            assert_eq!(
                detect(&mut cursor, size as u64, DEFAULT_MIN_SIZE),
                ContainerKind::NotAContainer
            );
        }
    }

    #[test]
    fn test_legacy_magic() {
        let mut data = modern_image(200 * 1024, 1000, 64, 5);
        data[8..11].copy_from_slice(&LEGACY_MAGIC);
        let mut cursor = Cursor::new(&data);
        assert_eq!(
            detect(&mut cursor, data.len() as u64, DEFAULT_MIN_SIZE),
            ContainerKind::Legacy
        );
    }

    #[test]
    fn test_hybrid_iso_without_magic() {
        let mut data = elf64_header(0, 0, 0);
        data.resize(200 * 1024, 0);
        data[ISO_MAGIC_OFFSET as usize..ISO_MAGIC_OFFSET as usize + 5].copy_from_slice(&ISO_MAGIC);
        let mut cursor = Cursor::new(&data);
        assert_eq!(
            detect(&mut cursor, data.len() as u64, DEFAULT_MIN_SIZE),
            ContainerKind::Legacy
        );

        // ISO signature alone, without the ELF header, is just a disc image.
        data[..4].copy_from_slice(b"\0\0\0\0");
        let mut cursor = Cursor::new(&data);
        assert_eq!(
            detect(&mut cursor, data.len() as u64, DEFAULT_MIN_SIZE),
            ContainerKind::NotAContainer
        );
    }

    #[test]
    fn test_plain_elf_is_not_container() {
        let data = {
            let mut d = elf64_header(1000, 64, 5);
            d.resize(200 * 1024, 0);
            d
        };
        let mut cursor = Cursor::new(&data);
        assert_eq!(
            detect(&mut cursor, data.len() as u64, DEFAULT_MIN_SIZE),
            ContainerKind::NotAContainer
        );
    }

    #[test]
    fn test_payload_format_sniffing() {
        let mut data = modern_image(150 * 1024, 1000, 64, 5);
        data[1320..1324].copy_from_slice(b"hsqs");
        let mut cursor = Cursor::new(&data);
        assert_eq!(payload_format(&mut cursor, 1320), PayloadFormat::Squashfs);

        data[1320..1326].copy_from_slice(b"DWARFS");
        let mut cursor = Cursor::new(&data);
        assert_eq!(payload_format(&mut cursor, 1320), PayloadFormat::Dwarfs);
        assert_eq!(payload_format(&mut cursor, 0), PayloadFormat::Unknown);
    }

    #[test]
    fn test_detect_path_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = detect_path(dir.path(), DEFAULT_MIN_SIZE).unwrap_err();
        assert!(err.is_detection_failure());
    }

    #[test]
    fn test_detect_path_modern_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("App.AppImage");
        let mut file = File::create(&path).unwrap();
        file.write_all(&modern_image(150 * 1024, 1000, 64, 5)).unwrap();

        let detection = detect_path(&path, DEFAULT_MIN_SIZE).unwrap();
        assert_eq!(detection.kind, ContainerKind::Modern);
        assert_eq!(detection.payload_offset, 1320);
        assert_eq!(detection.payload_format, PayloadFormat::Unknown);
    }

    #[test]
    fn test_legacy_update_locator_from_iso_field() {
        let mut data = modern_image(200 * 1024, 0, 0, 0);
        data[8..11].copy_from_slice(&LEGACY_MAGIC);
        let info = b"zsync|http://example.com/App.AppImage.zsync";
        let start = ISO_APPLICATION_USE_OFFSET as usize;
        data[start..start + info.len()].copy_from_slice(info);

        let mut cursor = Cursor::new(&data);
        assert_eq!(
            update_locator(&mut cursor, ContainerKind::Legacy).as_deref(),
            Some("zsync|http://example.com/App.AppImage.zsync")
        );
    }
}
