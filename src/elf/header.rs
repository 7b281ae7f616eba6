//! The ELF file header.
//!
//! The 16-byte identifier leads the record, and two of its bytes steer the
//! rest of the parse: `ei_class` selects the word size and `ei_data` the
//! byte order, so every later field decodes with the right width and
//! endianness.

use lazy_static::lazy_static;
use log::error;

use crate::elf::section::SectionType;
use crate::elf::ElfFile;
use crate::error::Result;
use crate::refs::{plan_record, PlannedAction, RecordAddr, RefBinder};
use crate::schema::{Fields, RecordSchema, SchemaHooks};

const SCHEMA_TEXT: &str = "\
FIELD,ei_magic,as_is,4,4
FIELD,ei_class,get_wordsize,1,1
FIELD,ei_data,get_byteorder,1,1
FIELD,ei_version,as_int,1,1
FIELD,ei_osabi,as_int,1,1
FIELD,ei_abiversion,as_int,1,1
FIELD,ei_pad,as_is,7,7
FIELD,e_type,as_int,2,2
FIELD,e_machine,as_int,2,2
FIELD,e_version,as_int,4,4
FIELD,e_entry,as_int,4,8
FIELD,e_phoff,as_int,4,8
FIELD,e_shoff,as_int,4,8
FIELD,e_flags,as_int,4,4
FIELD,e_ehsize,as_int,2,2
FIELD,e_phentsize,as_int,2,2
FIELD,e_phnum,as_int,2,2
FIELD,e_shentsize,as_int,2,2
FIELD,e_shnum,as_int,2,2
FIELD,e_shstrndx,as_int,2,2
ENUM,e_type,1,REL
ENUM,e_type,2,EXEC
ENUM,e_type,3,DYN
ENUM,e_type,4,CORE
ENUM,e_machine,3,EM_386
ENUM,e_machine,40,EM_ARM
ENUM,e_machine,62,EM_X86_64
ENUM,e_machine,183,EM_AARCH64
ENUM,e_machine,243,EM_RISCV
REFERENCE,e_shstrndx,idx,get_section_list
";

const HOOKS: SchemaHooks = SchemaHooks {
    options: &[],
    alts: &[],
    lookups: &["get_section_list", "get_segment_list"],
};

lazy_static! {
    static ref SCHEMA: Result<RecordSchema> = RecordSchema::parse(SCHEMA_TEXT, &HOOKS);
}

/// The parsed file header schema
pub fn schema() -> Result<&'static RecordSchema> {
    SCHEMA.as_ref().map_err(Clone::clone)
}

fn range_overlap(x: (u64, u64), y: (u64, u64)) -> bool {
    x.0 < y.1 && y.0 < x.1
}

/// The file header record
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// The decoded fields
    pub fields: Fields,
    /// The resolved references
    pub refs: RefBinder,
}

impl FileHeader {
    /// Parse the file header from the start of `data`. The record begins
    /// with provisional class and byte order; the identifier bytes replace
    /// both before any width-dependent field decodes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: Fields::new(
                crate::base::ElfClass::Elf32,
                crate::base::ElfDataEncoding::LittleEndian,
            )
            .from_bytes(schema()?, data, &|_, _| true)?,
            refs: RefBinder::new(),
        })
    }

    /// The header's serialized size
    pub fn size(&self) -> usize {
        schema().map(|s| self.fields.size(s)).unwrap_or(0)
    }

    /// The current value of a field, reading through references
    pub fn get(&self, name: &str, root: &ElfFile) -> Result<u64> {
        match self.refs.read(name, root)? {
            Some(v) => Ok(v),
            None => self.fields.int(name),
        }
    }

    /// Plan this header's references
    pub fn plan(&self, root: &ElfFile) -> Result<Vec<PlannedAction>> {
        plan_record(schema()?, &self.fields, RecordAddr::FileHeader, root)
    }

    /// Serialize the header
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.fields
            .serialize(schema()?, &|name| self.refs.read(name, root), write)
    }

    /// Display the header's fields
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        self.fields
            .render(schema()?, &|name| self.refs.read(name, root), &|_| None)
    }

    /// Check the identifier's agreement with the decoded widths, the table
    /// counts and entry sizes, pairwise non-overlap of the header, the two
    /// tables and every section's file range, and that `e_shstrndx` names a
    /// string table
    pub fn verify(&self, root: &ElfFile) -> bool {
        let mut out = true;
        let ei_class = self.fields.int("ei_class").unwrap_or(0);
        if !(1..=2).contains(&ei_class) {
            error!("Invalid ei_class value: {ei_class}");
            out = false;
        }
        let word = self.fields.class.word_size();
        if ei_class == 1 && word != 4 {
            error!("ei_class specified 4-byte words, but the record says {word} bytes");
            out = false;
        }
        if ei_class == 2 && word != 8 {
            error!("ei_class specified 8-byte words, but the record says {word} bytes");
            out = false;
        }
        let ei_data = self.fields.int("ei_data").unwrap_or(0);
        if !(1..=2).contains(&ei_data) {
            error!("Invalid ei_data value: {ei_data}");
            out = false;
        }
        let little = self.fields.encoding == crate::base::ElfDataEncoding::LittleEndian;
        if ei_data == 1 && !little {
            error!("ei_data specified little endian, but the record says big endian");
            out = false;
        }
        if ei_data == 2 && little {
            error!("ei_data specified big endian, but the record says little endian");
            out = false;
        }

        let e_phnum = self.fields.int("e_phnum").unwrap_or(0);
        if root.program_headers().len() as u64 != e_phnum {
            error!(
                "Recorded {} program headers, but table contains {}",
                e_phnum,
                root.program_headers().len()
            );
            out = false;
        }
        let e_phentsize = self.fields.int("e_phentsize").unwrap_or(0);
        if e_phnum != 0 {
            if let Some(first) = root.program_headers().get(0) {
                if first.size() as u64 != e_phentsize {
                    error!(
                        "Recorded program header size is {}, but records are of size {}",
                        e_phentsize,
                        first.size()
                    );
                    out = false;
                }
            }
        }
        let e_shnum = self.fields.int("e_shnum").unwrap_or(0);
        if root.section_headers().len() as u64 != e_shnum {
            error!(
                "Recorded {} section headers, but table contains {}",
                e_shnum,
                root.section_headers().len()
            );
            out = false;
        }
        let e_shentsize = self.fields.int("e_shentsize").unwrap_or(0);
        if e_shnum != 0 {
            if let Some(first) = root.section_headers().get(0) {
                if first.size() as u64 != e_shentsize {
                    error!(
                        "Recorded section header size is {}, but records are of size {}",
                        e_shentsize,
                        first.size()
                    );
                    out = false;
                }
            }
        }

        let ph_start = self.fields.int("e_phoff").unwrap_or(0);
        let ph_range = (ph_start, ph_start + e_phnum * e_phentsize);
        let sh_start = self.get("e_shoff", root).unwrap_or(0);
        let sh_range = (sh_start, sh_start + e_shnum * e_shentsize);
        let eh_range = (0, self.size() as u64);

        if range_overlap(ph_range, eh_range) {
            error!(
                "Program headers overlap elf header: [{:x}, {:x}] vs [{:x}, {:x}]",
                ph_range.0, ph_range.1, eh_range.0, eh_range.1
            );
            out = false;
        }
        if range_overlap(sh_range, eh_range) {
            error!(
                "Section headers overlap elf header: [{:x}, {:x}] vs [{:x}, {:x}]",
                sh_range.0, sh_range.1, eh_range.0, eh_range.1
            );
            out = false;
        }
        if range_overlap(ph_range, sh_range) {
            error!(
                "Program headers overlap section headers: [{:x}, {:x}] vs [{:x}, {:x}]",
                ph_range.0, ph_range.1, sh_range.0, sh_range.1
            );
            out = false;
        }

        for section in root.section_headers().iter() {
            // NOBITS sections occupy no file bytes
            if section.section_type() == Some(SectionType::NoBits) {
                continue;
            }
            let start = section.fields.int("sh_offset").unwrap_or(0);
            let sect_range = (start, start + section.fields.int("sh_size").unwrap_or(0));
            let name = section.name_string(root).unwrap_or_default();
            if range_overlap(ph_range, sect_range) {
                error!(
                    "Program headers overlap section {}: [{:x}, {:x}] vs [{:x}, {:x}]",
                    name, ph_range.0, ph_range.1, sect_range.0, sect_range.1
                );
                out = false;
            }
            if range_overlap(sh_range, sect_range) {
                error!(
                    "Section headers overlap section {}: [{:x}, {:x}] vs [{:x}, {:x}]",
                    name, sh_range.0, sh_range.1, sect_range.0, sect_range.1
                );
                out = false;
            }
        }

        match self
            .refs
            .referenced_item("e_shstrndx")
            .ok()
            .and_then(|item| root.section_header_by_id(item.item))
        {
            Some(shstrtab) => {
                if shstrtab.section_type() != Some(SectionType::StrTab) {
                    error!(
                        "Section specified as the section header string table is not a string table: type {}",
                        shstrtab.sh_type()
                    );
                    out = false;
                }
            }
            None => {
                error!("e_shstrndx does not reference a section header");
                out = false;
            }
        }
        out
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::base::{ElfClass, ElfDataEncoding};

    /// A minimal ELF64 little-endian file header
    pub(crate) fn ehdr64_bytes() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&[0x7f, 0x45, 0x4c, 0x46]); // magic
        data.extend_from_slice(&[2, 1, 1, 0, 0]); // class, data, version, osabi, abiversion
        data.extend_from_slice(&[0; 7]); // pad
        data.extend_from_slice(&3u16.to_le_bytes()); // e_type = DYN
        data.extend_from_slice(&62u16.to_le_bytes()); // e_machine
        data.extend_from_slice(&1u32.to_le_bytes()); // e_version
        data.extend_from_slice(&0x1040u64.to_le_bytes()); // e_entry
        data.extend_from_slice(&0x40u64.to_le_bytes()); // e_phoff
        data.extend_from_slice(&0x3000u64.to_le_bytes()); // e_shoff
        data.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        data.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        data.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
        data.extend_from_slice(&2u16.to_le_bytes()); // e_phnum
        data.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
        data.extend_from_slice(&5u16.to_le_bytes()); // e_shnum
        data.extend_from_slice(&4u16.to_le_bytes()); // e_shstrndx
        data
    }

    #[test]
    fn test_ident_selects_width_and_order() {
        let header = FileHeader::parse(&ehdr64_bytes()).unwrap();
        assert_eq!(header.fields.class, ElfClass::Elf64);
        assert_eq!(header.fields.encoding, ElfDataEncoding::LittleEndian);
        assert_eq!(header.size(), 64);
        assert_eq!(header.fields.int("e_entry").unwrap(), 0x1040);
        assert_eq!(header.fields.int("e_shstrndx").unwrap(), 4);
    }

    #[test]
    fn test_round_trip() {
        let data = ehdr64_bytes();
        let header = FileHeader::parse(&data).unwrap();
        let root = ElfFile::empty();
        let mut out = Vec::new();
        header.write_to(&root, &mut |b| out.extend_from_slice(b)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_bad_class_is_fatal() {
        let mut data = ehdr64_bytes();
        data[4] = 9;
        assert!(FileHeader::parse(&data).is_err());
    }
}
