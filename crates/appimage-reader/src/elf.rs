//! Minimal ELF header reader.
//!
//! Only what AppImage handling needs: the section header table location (the
//! runtime stub size) and lookup of a named section such as `.upd_info`.

use std::io::{Read, Seek, SeekFrom};

pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ELFDATA2MSB: u8 = 2;

/// Upper bound on section count we are willing to walk.
const MAX_SECTIONS: u64 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// The parts of an ELF file header relevant for locating the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfHeader {
    pub class: Class,
    pub endian: Endian,
    pub shoff: u64,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// A section located by [`ElfHeader::find_section`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Section {
    pub offset: u64,
    pub size: u64,
}

impl Endian {
    fn u16(self, b: &[u8]) -> u16 {
        let a = [b[0], b[1]];
        match self {
            Endian::Little => u16::from_le_bytes(a),
            Endian::Big => u16::from_be_bytes(a),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let a = [b[0], b[1], b[2], b[3]];
        match self {
            Endian::Little => u32::from_le_bytes(a),
            Endian::Big => u32::from_be_bytes(a),
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        let mut a = [0u8; 8];
        a.copy_from_slice(&b[..8]);
        match self {
            Endian::Little => u64::from_le_bytes(a),
            Endian::Big => u64::from_be_bytes(a),
        }
    }
}

impl ElfHeader {
    /// Parse the file header from the start of `reader`.
    /// Returns `None` for anything that is not a well-formed ELF header.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Option<Self> {
        let mut ident = [0u8; 64];
        reader.seek(SeekFrom::Start(0)).ok()?;
        let read = read_up_to(reader, &mut ident).ok()?;
        Self::from_bytes(&ident[..read])
    }

    /// Parse from an in-memory header (at least 52/64 bytes).
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() < 16 || b[..4] != ELF_MAGIC {
            return None;
        }

        let endian = match b[5] {
            ELFDATA2LSB => Endian::Little,
            ELFDATA2MSB => Endian::Big,
            _ => return None,
        };

        match b[4] {
            ELFCLASS32 => {
                if b.len() < 52 {
                    return None;
                }
                Some(Self {
                    class: Class::Elf32,
                    endian,
                    shoff: u64::from(endian.u32(&b[32..])),
                    shentsize: endian.u16(&b[46..]),
                    shnum: endian.u16(&b[48..]),
                    shstrndx: endian.u16(&b[50..]),
                })
            }
            ELFCLASS64 => {
                if b.len() < 64 {
                    return None;
                }
                Some(Self {
                    class: Class::Elf64,
                    endian,
                    shoff: endian.u64(&b[40..]),
                    shentsize: endian.u16(&b[58..]),
                    shnum: endian.u16(&b[60..]),
                    shstrndx: endian.u16(&b[62..]),
                })
            }
            _ => None,
        }
    }

    /// Size of the runtime stub: `shoff + shentsize * shnum`.
    ///
    /// This is not the true end of an arbitrary ELF file, but it is where
    /// the AppImage runtime appends its filesystem image.
    pub fn stub_size(&self) -> u64 {
        self.shoff
            .saturating_add(u64::from(self.shentsize) * u64::from(self.shnum))
    }

    /// Look up a section by name through the section header string table.
    pub fn find_section<R: Read + Seek>(&self, reader: &mut R, name: &str) -> Option<Section> {
        if self.shnum == 0 || u64::from(self.shnum) > MAX_SECTIONS || self.shstrndx >= self.shnum {
            return None;
        }

        let min_entsize = match self.class {
            Class::Elf32 => 40,
            Class::Elf64 => 64,
        };
        if usize::from(self.shentsize) < min_entsize || self.shentsize > 256 {
            return None;
        }

        let mut table = vec![0u8; usize::from(self.shentsize) * usize::from(self.shnum)];
        reader.seek(SeekFrom::Start(self.shoff)).ok()?;
        reader.read_exact(&mut table).ok()?;

        let entry = |idx: usize| {
            let start = idx * usize::from(self.shentsize);
            &table[start..start + usize::from(self.shentsize)]
        };

        let strtab = self.section_at(entry(usize::from(self.shstrndx)));
        if strtab.size > 1 << 20 {
            return None;
        }
        let mut names = vec![0u8; strtab.size as usize];
        reader.seek(SeekFrom::Start(strtab.offset)).ok()?;
        reader.read_exact(&mut names).ok()?;

        (0..usize::from(self.shnum)).find_map(|idx| {
            let raw = entry(idx);
            let name_off = self.endian.u32(raw) as usize;
            let candidate = names.get(name_off..)?;
            let end = candidate.iter().position(|&c| c == 0)?;
            (&candidate[..end] == name.as_bytes()).then(|| self.section_at(raw))
        })
    }

    fn section_at(&self, raw: &[u8]) -> Section {
        match self.class {
            Class::Elf32 => Section {
                offset: u64::from(self.endian.u32(&raw[16..])),
                size: u64::from(self.endian.u32(&raw[20..])),
            },
            Class::Elf64 => Section {
                offset: self.endian.u64(&raw[24..]),
                size: self.endian.u64(&raw[32..]),
            },
        }
    }
}

/// Read a named section's bytes, returning them as a NUL-trimmed string.
pub fn read_section_string<R: Read + Seek>(reader: &mut R, name: &str) -> Option<String> {
    let header = ElfHeader::parse(reader)?;
    let section = header.find_section(reader, name)?;
    if section.size == 0 || section.size > 1 << 16 {
        return None;
    }

    let mut buf = vec![0u8; section.size as usize];
    reader.seek(SeekFrom::Start(section.offset)).ok()?;
    reader.read_exact(&mut buf).ok()?;
    Some(trim_nul(&buf))
}

pub(crate) fn trim_nul(buf: &[u8]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).trim().to_string()
}

pub(crate) fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
