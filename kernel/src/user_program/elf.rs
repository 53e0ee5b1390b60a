use crate::mem::PtePermissions;
use crate::user_program::image::ExecutableImage;
use alloc::vec;
use alloc::vec::Vec;
use core::error::Error;
use core::fmt;
use nom::bytes::complete::{tag, take};
use nom::combinator::{map, map_opt};
use nom::number::complete::{u16, u32, u64, u8};
use nom::number::Endianness;
use nom::IResult;

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

// Flags for p_flags
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    InvalidMagicNumber,
    UnsupportedClass(u8),
    UnsupportedEndianness(u8),
    /// The program header entry size is smaller than the class requires.
    ProgramHeaderSize(u16),
    /// The image ends inside the header or the program header table.
    Truncated,
    /// A loadable segment's file or memory range wraps the address space.
    SegmentOutOfRange,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElfError::InvalidMagicNumber => write!(f, "missing ELF magic number"),
            ElfError::UnsupportedClass(class) => write!(f, "unsupported ELF class {class}"),
            ElfError::UnsupportedEndianness(data) => {
                write!(f, "unsupported ELF data encoding {data}")
            }
            ElfError::ProgramHeaderSize(size) => {
                write!(f, "program header entries of {size} bytes are too small")
            }
            ElfError::Truncated => write!(f, "ELF image is truncated"),
            ElfError::SegmentOutOfRange => write!(f, "loadable segment wraps the address space"),
        }
    }
}

impl Error for ElfError {}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

impl ElfClass {
    fn from_ident(value: u8) -> Option<Self> {
        match value {
            1 => Some(ElfClass::Elf32),
            2 => Some(ElfClass::Elf64),
            _ => None,
        }
    }

    /// Size of one program header table entry.
    pub fn program_header_size(self) -> u16 {
        match self {
            ElfClass::Elf32 => 32,
            ElfClass::Elf64 => 56,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfEndianness {
    Little,
    Big,
}

impl ElfEndianness {
    fn from_ident(value: u8) -> Option<Self> {
        match value {
            1 => Some(ElfEndianness::Little),
            2 => Some(ElfEndianness::Big),
            _ => None,
        }
    }

    fn to_nom(self) -> Endianness {
        match self {
            ElfEndianness::Little => Endianness::Little,
            ElfEndianness::Big => Endianness::Big,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfUsage {
    Relocatable,
    Executable,
    Shared,
    Core,
    Other(u16),
}

impl From<u16> for ElfUsage {
    fn from(value: u16) -> Self {
        match value {
            1 => ElfUsage::Relocatable,
            2 => ElfUsage::Executable,
            3 => ElfUsage::Shared,
            4 => ElfUsage::Core,
            _ => ElfUsage::Other(value),
        }
    }
}

// Common Architectures from https://wiki.osdev.org/ELF
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfArchitecture {
    Generic,
    X86,
    Arm,
    X8664,
    Arm64,
    RiscV,
    Other(u16),
}

impl From<u16> for ElfArchitecture {
    fn from(value: u16) -> Self {
        match value {
            0x00 => ElfArchitecture::Generic,
            0x03 => ElfArchitecture::X86,
            0x28 => ElfArchitecture::Arm,
            0x3E => ElfArchitecture::X8664,
            0xB7 => ElfArchitecture::Arm64,
            0xF3 => ElfArchitecture::RiscV,
            _ => ElfArchitecture::Other(value),
        }
    }
}

/// Reads an address-sized field: 4 bytes for ELFCLASS32, 8 for ELFCLASS64.
fn word(class: ElfClass, endian: Endianness, bytes: &[u8]) -> IResult<&[u8], u64> {
    match class {
        ElfClass::Elf32 => map(u32(endian), u64::from)(bytes),
        ElfClass::Elf64 => u64(endian)(bytes),
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub endianness: ElfEndianness,
    pub header_version: u8,
    pub abi: u8,
    pub usage: ElfUsage,
    pub architecture: ElfArchitecture,
    pub elf_version: u32,
    pub program_entry: u64,
    pub program_headers_offset: u64,
    pub section_headers_offset: u64,
    pub flags: u32,
    pub elf_header_size: u16,
    pub program_header_entry_size: u16,
    pub program_header_count: u16,
    pub section_header_entry_size: u16,
    pub section_header_count: u16,
    pub section_header_index: u16,
}

impl ElfHeader {
    /// Largest header of any supported class.
    pub const MAX_SIZE: usize = 64;

    /// Checks the identification bytes before handing the rest to [`Self::parse`],
    /// so that every parser failure left over means the header is cut short.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ElfError> {
        if !bytes.starts_with(&ELF_MAGIC) {
            return Err(ElfError::InvalidMagicNumber);
        }
        match bytes.get(4) {
            Some(&class) if ElfClass::from_ident(class).is_none() => {
                return Err(ElfError::UnsupportedClass(class))
            }
            _ => {}
        }
        match bytes.get(5) {
            Some(&data) if ElfEndianness::from_ident(data).is_none() => {
                return Err(ElfError::UnsupportedEndianness(data))
            }
            _ => {}
        }

        Self::parse(bytes)
            .map(|(_, header)| header)
            .map_err(|_| ElfError::Truncated)
    }

    pub fn parse(bytes: &[u8]) -> IResult<&[u8], ElfHeader> {
        let (bytes, _) = tag(&ELF_MAGIC[..])(bytes)?;

        let (bytes, class) = map_opt(u8, ElfClass::from_ident)(bytes)?;
        let (bytes, endianness) = map_opt(u8, ElfEndianness::from_ident)(bytes)?;

        let endian = endianness.to_nom();

        let (bytes, header_version) = u8(bytes)?;
        let (bytes, abi) = u8(bytes)?;

        // ABI version and padding.
        let (bytes, _) = take(8usize)(bytes)?;

        let (bytes, usage) = map(u16(endian), ElfUsage::from)(bytes)?;
        let (bytes, architecture) = map(u16(endian), ElfArchitecture::from)(bytes)?;

        let (bytes, elf_version) = u32(endian)(bytes)?;
        let (bytes, program_entry) = word(class, endian, bytes)?;
        let (bytes, program_headers_offset) = word(class, endian, bytes)?;
        let (bytes, section_headers_offset) = word(class, endian, bytes)?;

        let (bytes, flags) = u32(endian)(bytes)?;

        let (bytes, elf_header_size) = u16(endian)(bytes)?;
        let (bytes, program_header_entry_size) = u16(endian)(bytes)?;
        let (bytes, program_header_count) = u16(endian)(bytes)?;
        let (bytes, section_header_entry_size) = u16(endian)(bytes)?;
        let (bytes, section_header_count) = u16(endian)(bytes)?;
        let (bytes, section_header_index) = u16(endian)(bytes)?;

        Ok((
            bytes,
            ElfHeader {
                class,
                endianness,
                header_version,
                abi,
                usage,
                architecture,
                elf_version,
                program_entry,
                program_headers_offset,
                section_headers_offset,
                flags,
                elf_header_size,
                program_header_entry_size,
                program_header_count,
                section_header_entry_size,
                section_header_count,
                section_header_index,
            },
        ))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElfProgramType {
    Ignore,
    Load,
    Dynamic,
    Interpret,
    Note,
    Other(u32),
}

impl From<u32> for ElfProgramType {
    fn from(value: u32) -> Self {
        match value {
            0 => ElfProgramType::Ignore,
            1 => ElfProgramType::Load,
            2 => ElfProgramType::Dynamic,
            3 => ElfProgramType::Interpret,
            4 => ElfProgramType::Note,
            _ => ElfProgramType::Other(value),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElfProgramHeader {
    pub program_type: ElfProgramType,
    pub offset: u64,
    pub virtual_address: u64,
    pub physical_address: u64,
    pub file_size: u64,
    pub memory_size: u64,
    pub executable: bool,
    pub writable: bool,
    pub readable: bool,
    pub alignment: u64,
}

impl ElfProgramHeader {
    pub fn parse(bytes: &[u8], class: ElfClass, endian: Endianness) -> IResult<&[u8], Self> {
        let (bytes, program_type) = map(u32(endian), ElfProgramType::from)(bytes)?;

        // ELFCLASS64 moves p_flags up next to p_type for alignment.
        let (bytes, flags64) = match class {
            ElfClass::Elf32 => (bytes, 0),
            ElfClass::Elf64 => u32(endian)(bytes)?,
        };

        let (bytes, offset) = word(class, endian, bytes)?;
        let (bytes, virtual_address) = word(class, endian, bytes)?;
        let (bytes, physical_address) = word(class, endian, bytes)?;
        let (bytes, file_size) = word(class, endian, bytes)?;
        let (bytes, memory_size) = word(class, endian, bytes)?;

        let (bytes, flags) = match class {
            ElfClass::Elf32 => u32(endian)(bytes)?,
            ElfClass::Elf64 => (bytes, flags64),
        };

        let (bytes, alignment) = word(class, endian, bytes)?;

        Ok((
            bytes,
            ElfProgramHeader {
                program_type,
                offset,
                virtual_address,
                physical_address,
                file_size,
                memory_size,
                executable: flags & PF_X != 0,
                writable: flags & PF_W != 0,
                readable: flags & PF_R != 0,
                alignment,
            },
        ))
    }

    pub fn is_loadable(&self) -> bool {
        self.program_type == ElfProgramType::Load
    }

    /// Whether `addr` falls inside `[vaddr, vaddr + memsz)`.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.virtual_address && addr - self.virtual_address < self.memory_size
    }

    fn fits_address_space(&self) -> bool {
        self.offset.checked_add(self.file_size).is_some()
            && self.virtual_address.checked_add(self.memory_size).is_some()
    }

    /// User pages for this segment are always readable; write and execute
    /// follow the segment flags.
    pub fn permissions(&self) -> PtePermissions {
        PtePermissions::DEFAULT
            .with_readable(true)
            .with_user(true)
            .with_writable(self.writable)
            .with_executable(self.executable)
    }
}

#[derive(Clone, Debug)]
pub struct Elf {
    pub header: ElfHeader,
    pub program_headers: Vec<ElfProgramHeader>,
}

impl Elf {
    /// Reads the header and program header table out of `image`. Segment
    /// contents are left in the image.
    pub fn read(image: &dyn ExecutableImage) -> Result<Self, ElfError> {
        let mut header_bytes = [0u8; ElfHeader::MAX_SIZE];
        let read = image.read_at(0, &mut header_bytes);
        let header = ElfHeader::from_bytes(&header_bytes[..read])?;

        if header.program_header_count == 0 {
            return Ok(Elf {
                header,
                program_headers: Vec::new(),
            });
        }

        let entry_size = header.program_header_entry_size;
        if entry_size < header.class.program_header_size() {
            return Err(ElfError::ProgramHeaderSize(entry_size));
        }

        let table_size = usize::from(entry_size) * usize::from(header.program_header_count);
        let table_end = header
            .program_headers_offset
            .checked_add(table_size as u64)
            .ok_or(ElfError::Truncated)?;
        if table_end > image.size() {
            return Err(ElfError::Truncated);
        }

        let mut table = vec![0u8; table_size];
        if image.read_at(header.program_headers_offset, &mut table) != table_size {
            return Err(ElfError::Truncated);
        }

        let endian = header.endianness.to_nom();
        let program_headers = table
            .chunks_exact(usize::from(entry_size))
            .map(|entry| {
                ElfProgramHeader::parse(entry, header.class, endian)
                    .map(|(_, program_header)| program_header)
                    .map_err(|_| ElfError::Truncated)
            })
            .collect::<Result<Vec<_>, _>>()?;

        if program_headers.iter().any(|ph| ph.is_loadable() && !ph.fits_address_space()) {
            return Err(ElfError::SegmentOutOfRange);
        }

        Ok(Elf {
            header,
            program_headers,
        })
    }

    pub fn loadable_segments(&self) -> impl Iterator<Item = &ElfProgramHeader> {
        self.program_headers.iter().filter(|ph| ph.is_loadable())
    }

    /// The loadable segment whose memory image covers `addr`.
    pub fn segment_containing(&self, addr: u64) -> Option<&ElfProgramHeader> {
        self.loadable_segments().find(|ph| ph.contains(addr))
    }
}
