//! Program headers and the program header table.
//!
//! The organize pass keeps every segment consistent with the sections it
//! maps: `PT_DYNAMIC` is retuned to cover exactly the `.dynamic` section,
//! and other segments grow past sections that overrun their end or shrink
//! forward past sections that lap over their start.

use std::collections::HashMap;

use bitflags::bitflags;
use lazy_static::lazy_static;
use log::{error, info};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::ElfFile;
use crate::error::{Error, Result};
use crate::schema::{Fields, RecordSchema, SchemaHooks};
use crate::table::TableItem;
use crate::table_item;

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// Segment types
pub enum SegmentType {
    /// Unused entry
    Null = 0,
    /// A loadable segment
    Load = 1,
    /// Dynamic linking metadata
    Dynamic = 2,
    /// The interpreter path
    Interp = 3,
    /// Auxiliary notes
    Note = 4,
    /// Reserved
    ShLib = 5,
    /// The program header table itself
    Phdr = 6,
    /// Thread-local storage template
    Tls = 7,
    /// GNU: unwind tables
    GnuEhFrame = 0x6474e550,
    /// GNU: stack permissions
    GnuStack = 0x6474e551,
    /// GNU: read-only-after-relocation region
    GnuRelro = 0x6474e552,
}

bitflags! {
    /// Segment permission flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u64 {
        /// Executable
        const E = 0x1;
        /// Writable
        const W = 0x2;
        /// Readable
        const R = 0x4;
    }
}

impl SegmentFlags {
    /// Parse a pipe-separated flag list such as `R|W|E`
    pub fn parse(text: &str) -> Result<Self> {
        let mut out = Self::empty();
        for flag in text.split('|') {
            out |= Self::from_name(flag).ok_or_else(|| Error::UnknownSegmentFlags {
                flags: flag.into(),
            })?;
        }
        Ok(out)
    }
}

/// The 32-bit and 64-bit layouts place `p_flags` differently, so it is
/// declared once per width.
const SCHEMA_TEXT: &str = "\
FIELD,p_type,as_int,4,4
FIELD,p_flags,as_int,,4
FIELD,p_offset,as_int,4,8
FIELD,p_vaddr,as_int,4,8
FIELD,p_paddr,as_int,4,8
FIELD,p_filesz,as_int,4,8
FIELD,p_memsz,as_int,4,8
FIELD,p_flags,as_int,4,
FIELD,p_align,as_int,4,8
ENUM,p_type,0,NULL
ENUM,p_type,1,LOAD
ENUM,p_type,2,DYNAMIC
ENUM,p_type,3,INTERP
ENUM,p_type,4,NOTE
ENUM,p_type,5,SHLIB
ENUM,p_type,6,PHDR
ENUM,p_type,7,TLS
ENUM,p_type,0x6474e550,GNU_EH_FRAME
ENUM,p_type,0x6474e551,GNU_STACK
ENUM,p_type,0x6474e552,GNU_RELRO
BITMASK,p_flags,0x1,E
BITMASK,p_flags,0x2,W
BITMASK,p_flags,0x4,R
";

const HOOKS: SchemaHooks = SchemaHooks {
    options: &[],
    alts: &[],
    lookups: &[],
};

lazy_static! {
    static ref SCHEMA: Result<RecordSchema> = RecordSchema::parse(SCHEMA_TEXT, &HOOKS);
}

/// The parsed program header schema
pub fn schema() -> Result<&'static RecordSchema> {
    SCHEMA.as_ref().map_err(Clone::clone)
}

/// One program header
#[derive(Debug, Clone)]
pub struct ProgramHeader {
    id: ItemId,
    idx: usize,
    offset: usize,
    /// The decoded fields
    pub fields: Fields,
}

impl ProgramHeader {
    /// Parse a header at (idx, offset) from the head of `data`
    pub fn parse(
        idx: usize,
        offset: usize,
        data: &[u8],
        class: ElfClass,
        encoding: ElfDataEncoding,
    ) -> Result<Self> {
        Ok(Self {
            id: ItemId::fresh(),
            idx,
            offset,
            fields: Fields::new(class, encoding).from_bytes(schema()?, data, &|_, _| true)?,
        })
    }

    /// Build a header from a key/value map, as the segment commands do
    pub fn from_map(
        data: &HashMap<String, u64>,
        class: ElfClass,
        encoding: ElfDataEncoding,
    ) -> Result<Self> {
        Ok(Self {
            id: ItemId::fresh(),
            idx: 0,
            offset: 0,
            fields: Fields::new(class, encoding).from_map(schema()?, data, &|_, _| true)?,
        })
    }

    /// The header's serialized size
    pub fn size(&self) -> usize {
        schema().map(|s| self.fields.size(s)).unwrap_or(0)
    }

    /// The segment's type value
    pub fn p_type(&self) -> u64 {
        self.fields.int("p_type").unwrap_or(0)
    }

    /// The decoded segment type
    pub fn segment_type(&self) -> Option<SegmentType> {
        SegmentType::from_u64(self.p_type())
    }

    /// Serialize the header
    pub fn write_to(&self, _root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.fields.serialize(schema()?, &|_| Ok(None), write)
    }

    /// Display the header's fields
    pub fn render(&self, _root: &ElfFile) -> Result<String> {
        self.fields.render(schema()?, &|_| Ok(None), &|_| None)
    }
}

table_item!(ProgramHeader);

impl crate::table::Record for ProgramHeader {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        ProgramHeader::write_to(self, root, write)
    }
}

impl ElfFile {
    /// Check the load-segment contracts: loadable segments in address order
    /// must not overlap in file offset, memory images must hold their file
    /// contents, and offsets must agree with addresses modulo the alignment
    pub(crate) fn verify_program_headers(&self) -> bool {
        let mut out = true;
        let mut order = (0..self.program_headers().len()).collect::<Vec<_>>();
        order.sort_by_key(|&pos| {
            self.program_headers()
                .get(pos)
                .and_then(|h| h.fields.int("p_vaddr").ok())
                .unwrap_or(0)
        });
        let mut prev: Option<&ProgramHeader> = None;
        for &pos in &order {
            let Some(segment) = self.program_headers().get(pos) else {
                continue;
            };
            if segment.segment_type() != Some(SegmentType::Load) {
                continue;
            }
            if let Some(prev) = prev {
                let prev_off_end = prev.fields.int("p_offset").unwrap_or(0)
                    + prev.fields.int("p_filesz").unwrap_or(0);
                let off = segment.fields.int("p_offset").unwrap_or(0);
                if prev_off_end > off {
                    error!(
                        "Segments {} and {} overlap: {:#x} vs {:#x}",
                        prev.idx(),
                        segment.idx(),
                        prev_off_end,
                        off
                    );
                    out = false;
                }
            }
            prev = Some(segment);
        }

        for segment in self.program_headers().iter() {
            let filesz = segment.fields.int("p_filesz").unwrap_or(0);
            let memsz = segment.fields.int("p_memsz").unwrap_or(0);
            if memsz < filesz {
                error!(
                    "Segment {} has too little memory for its contents: file size {:#x} vs memory size {:#x}",
                    segment.idx(),
                    filesz,
                    memsz
                );
                out = false;
            }
            let align = segment.fields.int("p_align").unwrap_or(0);
            if align != 0 {
                let addr_align = segment.fields.int("p_vaddr").unwrap_or(0) % align;
                let off_align = segment.fields.int("p_offset").unwrap_or(0) % align;
                if addr_align != off_align {
                    error!(
                        "Segment {} was not properly aligned mod {:#x}: address {:#x} != offset {:#x}",
                        segment.idx(),
                        align,
                        addr_align,
                        off_align
                    );
                    out = false;
                }
            }
        }
        out
    }

    /// Retune every segment around the sections it maps
    pub(crate) fn organize_program_headers(&mut self) -> Result<()> {
        // Section extents, read up front so segments can be edited in place
        let sections = self
            .section_headers()
            .iter()
            .map(|h| {
                Ok((
                    h.fields.int("sh_offset")?,
                    h.fields.int("sh_size")?,
                    h.name_string(self).unwrap_or_default(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let dynamic = self
            .section_pos_by_name(".dynamic")
            .ok()
            .and_then(|pos| self.section_headers().get(pos))
            .map(|h| {
                Ok::<_, Error>((
                    h.fields.int("sh_offset")?,
                    h.fields.int("sh_addr")?,
                    h.fields.int("sh_size")?,
                ))
            })
            .transpose()?;

        for pos in 0..self.program_headers().len() {
            let (seg_type, off_start, filesz) = match self.program_headers().get(pos) {
                Some(seg) => (
                    seg.segment_type(),
                    seg.fields.int("p_offset")?,
                    seg.fields.int("p_filesz")?,
                ),
                None => continue,
            };
            let off_end = off_start + filesz;

            // The DYNAMIC segment must contain only and exactly the
            // .dynamic section
            if seg_type == Some(SegmentType::Dynamic) {
                let (dyn_off, dyn_addr, dyn_size) = dynamic.ok_or(Error::SectionNotFound {
                    name: ".dynamic".into(),
                })?;
                if let Some(seg) = self.prog_headers_mut().get_mut(pos) {
                    seg.fields.set_int("p_offset", dyn_off);
                    seg.fields.set_int("p_vaddr", dyn_addr);
                    seg.fields.set_int("p_paddr", dyn_addr);
                    seg.fields.set_int("p_filesz", dyn_size);
                    seg.fields.set_int("p_memsz", dyn_size);
                }
                continue;
            }

            for (sect_start, sect_size, name) in &sections {
                let sect_end = sect_start + sect_size;
                if *sect_start >= off_start && *sect_start < off_end {
                    // A section lapping off the end of the segment gets more
                    // room
                    if sect_end > off_end {
                        let diff = sect_end - off_end;
                        info!(
                            "Extending segment {pos} from {off_end:#x} to {:#x} to give section {name} more room",
                            off_end + diff
                        );
                        if let Some(seg) = self.prog_headers_mut().get_mut(pos) {
                            let filesz = seg.fields.int("p_filesz")? + diff;
                            let memsz = seg.fields.int("p_memsz")? + diff;
                            seg.fields.set_int("p_filesz", filesz);
                            seg.fields.set_int("p_memsz", memsz);
                        }
                    }
                } else if sect_end >= off_start && sect_end < off_end && *sect_start < off_start {
                    // A section lapping over the start pushes the segment
                    // forward, 8-byte aligned
                    let mut diff = sect_end - off_start;
                    let rem = diff % 0x8;
                    if rem != 0 {
                        diff += 0x8 - rem;
                    }
                    info!(
                        "Shrinking segment {pos} from {off_start:#x} to {:#x} to avoid section {name}",
                        off_start + diff
                    );
                    if let Some(seg) = self.prog_headers_mut().get_mut(pos) {
                        for field in ["p_offset", "p_vaddr", "p_paddr"] {
                            let v = seg.fields.int(field)? + diff;
                            seg.fields.set_int(field, v);
                        }
                        for field in ["p_filesz", "p_memsz"] {
                            let v = seg.fields.int(field)?.saturating_sub(diff);
                            seg.fields.set_int(field, v);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_segment_flags_parse() {
        assert_eq!(
            SegmentFlags::parse("R|W|E").unwrap(),
            SegmentFlags::R | SegmentFlags::W | SegmentFlags::E
        );
        assert_eq!(SegmentFlags::parse("R").unwrap(), SegmentFlags::R);
        assert!(SegmentFlags::parse("R|Q").is_err());
    }

    fn phdr64_bytes() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes()); // p_type = LOAD
        data.extend_from_slice(&5u32.to_le_bytes()); // p_flags = R|E
        for v in [0u64, 0x400000, 0x400000, 0x1000, 0x1000, 0x1000] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_parse_round_trip_64() {
        let data = phdr64_bytes();
        let header = ProgramHeader::parse(
            0,
            0,
            &data,
            ElfClass::Elf64,
            ElfDataEncoding::LittleEndian,
        )
        .unwrap();
        assert_eq!(header.size(), 56);
        assert_eq!(header.segment_type(), Some(SegmentType::Load));
        assert_eq!(header.fields.int("p_flags").unwrap(), 5);
        assert_eq!(header.fields.int("p_vaddr").unwrap(), 0x400000);
        let root = ElfFile::empty();
        let mut out = Vec::new();
        header.write_to(&root, &mut |b| out.extend_from_slice(b)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_flags_position_32() {
        // 32-bit: p_flags sits at the end, before p_align
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes()); // p_type
        for v in [0u32, 0x8048000, 0x8048000, 0x200, 0x200] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&5u32.to_le_bytes()); // p_flags
        data.extend_from_slice(&0x1000u32.to_le_bytes()); // p_align
        let header = ProgramHeader::parse(
            0,
            0,
            &data,
            ElfClass::Elf32,
            ElfDataEncoding::LittleEndian,
        )
        .unwrap();
        assert_eq!(header.size(), 32);
        assert_eq!(header.fields.int("p_flags").unwrap(), 5);
        assert_eq!(header.fields.int("p_align").unwrap(), 0x1000);
    }
}
