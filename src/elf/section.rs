//! Section headers and the section header table.
//!
//! Each header owns a typed body selected from its `sh_type`. The table's
//! organize pass deconflicts file-offset overlaps by shifting later sections
//! forward, but refuses to move program bits: those are pinned to their
//! addresses.

use lazy_static::lazy_static;
use log::error;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::sections::SectionBody;
use crate::elf::ElfFile;
use crate::error::{Error, Result};
use crate::refs::{plan_record, PlannedAction, RecordAddr, RefBinder};
use crate::schema::{Fields, RecordSchema, SchemaHooks};
use crate::table_item;

#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[non_exhaustive]
/// Section types with dedicated handling. Values outside this set keep an
/// opaque body.
pub enum SectionType {
    /// Inactive header
    Null = 0,
    /// Program-defined contents
    ProgBits = 1,
    /// A static symbol table
    SymTab = 2,
    /// A string table
    StrTab = 3,
    /// Relocations with addends
    Rela = 4,
    /// A SysV hash table
    Hash = 5,
    /// Dynamic linking metadata
    Dynamic = 6,
    /// A note section
    Note = 7,
    /// Contents occupying no file bytes
    NoBits = 8,
    /// Relocations without addends
    Rel = 9,
    /// Reserved
    ShLib = 10,
    /// The dynamic symbol table
    DynSym = 11,
    /// Constructor pointers
    InitArray = 14,
    /// Destructor pointers
    FiniArray = 15,
    /// Pre-constructor pointers
    PreinitArray = 16,
    /// A section group
    Group = 17,
    /// Extended section indexes
    SymTabShndx = 18,
    /// A GNU hash section
    GnuHash = 0x6ffffff6,
    /// Version dependencies
    VerNeed = 0x6ffffffe,
    /// Symbol version indexes
    VerSym = 0x6fffffff,
}

const SCHEMA_TEXT: &str = "\
FIELD,sh_name,as_int,4,4
FIELD,sh_type,as_int,4,4
FIELD,sh_flags,as_int,4,8
FIELD,sh_addr,as_int,4,8
FIELD,sh_offset,as_int,4,8
FIELD,sh_size,as_int,4,8
FIELD,sh_link,as_int,4,4
FIELD,sh_info,as_int,4,4
FIELD,sh_addralign,as_int,4,8
FIELD,sh_entsize,as_int,4,8
ENUM,sh_type,0,NULL
ENUM,sh_type,1,PROGBITS
ENUM,sh_type,2,SYMTAB
ENUM,sh_type,3,STRTAB
ENUM,sh_type,4,RELA
ENUM,sh_type,5,HASH
ENUM,sh_type,6,DYNAMIC
ENUM,sh_type,7,NOTE
ENUM,sh_type,8,NOBITS
ENUM,sh_type,9,REL
ENUM,sh_type,10,SHLIB
ENUM,sh_type,11,DYNSYM
ENUM,sh_type,14,INIT_ARRAY
ENUM,sh_type,15,FINI_ARRAY
ENUM,sh_type,16,PREINIT_ARRAY
ENUM,sh_type,17,GROUP
ENUM,sh_type,18,SYMTAB_SHNDX
ENUM,sh_type,0x6ffffff6,GNU_HASH
ENUM,sh_type,0x6ffffffe,VERNEED
ENUM,sh_type,0x6fffffff,VERSYM
BITMASK,sh_flags,0x1,WRITE
BITMASK,sh_flags,0x2,ALLOC
BITMASK,sh_flags,0x4,EXECINSTR
BITMASK,sh_flags,0x10,MERGE
BITMASK,sh_flags,0x20,STRINGS
BITMASK,sh_flags,0x40,INFO_LINK
BITMASK,sh_flags,0x80,LINK_ORDER
BITMASK,sh_flags,0x200,GROUP
BITMASK,sh_flags,0x400,TLS
ALT,sh_name,get_referenced_object
REFERENCE,sh_name,off,get_shstrtab
REFERENCE,sh_link,idx,get_sect_headers
IGNORE,sh_link,0,dec
";

const HOOKS: SchemaHooks = SchemaHooks {
    options: &[],
    alts: &["get_referenced_object"],
    lookups: &["get_shstrtab", "get_section", "get_sect_headers"],
};

lazy_static! {
    static ref SCHEMA: Result<RecordSchema> = RecordSchema::parse(SCHEMA_TEXT, &HOOKS);
}

/// The parsed section header schema
pub fn schema() -> Result<&'static RecordSchema> {
    SCHEMA.as_ref().map_err(Clone::clone)
}

/// One section header, owning its typed body
#[derive(Debug, Clone)]
pub struct SectionHeader {
    id: ItemId,
    idx: usize,
    offset: usize,
    /// The decoded fields
    pub fields: Fields,
    /// The resolved references
    pub refs: RefBinder,
    /// The section's typed contents
    pub body: SectionBody,
}

impl SectionHeader {
    /// Parse a header at (idx, offset) from the head of `data`. The body is
    /// loaded separately once the whole table is known.
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
            refs: RefBinder::new(),
            body: SectionBody::default(),
        })
    }

    /// The header's serialized size
    pub fn size(&self) -> usize {
        schema().map(|s| self.fields.size(s)).unwrap_or(0)
    }

    /// The header's stable identity
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// The current value of a field, reading through references
    pub fn get(&self, name: &str, root: &ElfFile) -> Result<u64> {
        match self.refs.read(name, root)? {
            Some(v) => Ok(v),
            None => self.fields.int(name),
        }
    }

    /// The raw `sh_type` value
    pub fn sh_type(&self) -> u64 {
        self.fields.int("sh_type").unwrap_or(0)
    }

    /// The decoded section type, if it has dedicated handling
    pub fn section_type(&self) -> Option<SectionType> {
        SectionType::from_u64(self.sh_type())
    }

    /// The section's name bytes, terminator included
    pub fn name_bytes<'a>(&self, root: &'a ElfFile) -> Result<&'a [u8]> {
        let item = self.refs.referenced_item("sh_name")?;
        Ok(root.str_item(&item)?.data())
    }

    /// The section's name, terminator stripped
    pub fn name_string(&self, root: &ElfFile) -> Result<String> {
        let bytes = self.name_bytes(root)?;
        let trimmed = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        Ok(String::from_utf8_lossy(trimmed).into_owned())
    }

    /// Whether the section's name equals `name` read as ASCII plus a
    /// terminator
    pub fn name_matches(&self, root: &ElfFile, name: &str) -> bool {
        let mut expected = name.as_bytes().to_vec();
        expected.push(0);
        self.name_bytes(root).map(|b| b == expected).unwrap_or(false)
    }

    /// Plan this header's references
    pub fn plan(&self, addr: RecordAddr, root: &ElfFile) -> Result<Vec<PlannedAction>> {
        plan_record(schema()?, &self.fields, addr, root)
    }

    /// Serialize the header
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.fields
            .serialize(schema()?, &|name| self.refs.read(name, root), write)
    }

    /// Display the header's fields
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        let schema = schema()?;
        self.fields.render(
            schema,
            &|name| self.refs.read(name, root),
            &|name| match schema.alt_handler(name) {
                Some("get_referenced_object") => self.name_string(root).ok(),
                _ => None,
            },
        )
    }
}

table_item!(SectionHeader);

impl crate::table::Record for SectionHeader {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        SectionHeader::write_to(self, root, write)
    }
}

/// The minimal non-negative shift that puts a range starting at `b_start`
/// at or after the end of (`a_start`, `a_size`), keeping `b_align`
fn compute_diff(a_start: u64, a_size: u64, b_start: u64, b_align: u64) -> u64 {
    let a_end = a_start + a_size;
    if b_start >= a_end {
        return 0;
    }
    let mut diff = a_end - b_start;
    if b_align != 0 {
        let rem = diff % b_align;
        if rem != 0 {
            diff += b_align - rem;
        }
    }
    diff
}

impl ElfFile {
    /// Deconflict file-offset overlaps between sections: walk the headers in
    /// offset order and shift each overlapping section past its predecessor,
    /// aligned. Program bits are pinned; having to move them is fatal.
    pub(crate) fn organize_section_headers(&mut self) -> Result<()> {
        self.sect_headers_mut().clean();
        if self.section_headers().is_empty() {
            return Ok(());
        }
        let mut order = (0..self.section_headers().len()).collect::<Vec<_>>();
        order.sort_by_key(|&pos| {
            self.section_headers()
                .get(pos)
                .and_then(|h| h.fields.int("sh_offset").ok())
                .unwrap_or(0)
        });

        // The first occupying section is also checked against the program
        // header table
        let ph_off = self.header().fields.int("e_phoff")?;
        let ph_size =
            self.header().fields.int("e_phentsize")? * self.header().fields.int("e_phnum")?;
        let first = order.iter().copied().find(|&pos| {
            self.section_headers()
                .get(pos)
                .and_then(|h| h.fields.int("sh_size").ok())
                .unwrap_or(0)
                != 0
        });
        if let Some(first) = first {
            self.shift_section_if_overlapping(first, ph_off, ph_size)?;
        }

        for i in 1..order.len() {
            let a = order[i - 1];
            let b = order[i];
            let a_nobits = self
                .section_headers()
                .get(a)
                .map(|h| h.section_type() == Some(SectionType::NoBits))
                .unwrap_or(false);
            let b_nobits = self
                .section_headers()
                .get(b)
                .map(|h| h.section_type() == Some(SectionType::NoBits))
                .unwrap_or(false);
            if a_nobits || b_nobits {
                continue;
            }
            let (a_off, a_size) = match self.section_headers().get(a) {
                Some(h) => (h.fields.int("sh_offset")?, h.fields.int("sh_size")?),
                None => continue,
            };
            self.shift_section_if_overlapping(b, a_off, a_size)?;
        }
        Ok(())
    }

    fn shift_section_if_overlapping(
        &mut self,
        pos: usize,
        a_start: u64,
        a_size: u64,
    ) -> Result<()> {
        let Some(header) = self.section_headers().get(pos) else {
            return Ok(());
        };
        // An empty section occupies nothing and cannot collide
        if header.fields.int("sh_size")? == 0 {
            return Ok(());
        }
        let b_off = header.fields.int("sh_offset")?;
        let b_align = header.fields.int("sh_addralign")?;
        let diff = compute_diff(a_start, a_size, b_off, b_align);
        if diff == 0 {
            return Ok(());
        }
        if header.section_type() == Some(SectionType::ProgBits) {
            let name = header.name_string(self).unwrap_or_default();
            error!("Tried to move progbits section {name}");
            return Err(Error::IllegalSectionMove { name });
        }
        let b_addr = header.fields.int("sh_addr")?;
        if let Some(header) = self.sect_headers_mut().get_mut(pos) {
            header.fields.set_int("sh_offset", b_off + diff);
            header.fields.set_int("sh_addr", b_addr + diff);
        }
        Ok(())
    }

    /// Check the section-to-segment map, file-offset and image-address
    /// overlaps, and address alignment
    pub(crate) fn verify_section_headers(&self) -> bool {
        let mut out = true;
        let headers = self.section_headers();

        // Which sections land inside a segment, and do they fit
        let mut in_a_segment = vec![false; headers.len()];
        for segment in self.program_headers().iter() {
            let off_start = segment.fields.int("p_offset").unwrap_or(0);
            let off_end = off_start + segment.fields.int("p_filesz").unwrap_or(0);
            for (pos, section) in headers.iter().enumerate() {
                let sect_start = section.fields.int("sh_offset").unwrap_or(0);
                let sect_end = sect_start + section.fields.int("sh_size").unwrap_or(0);
                if sect_start >= off_start && sect_start < off_end {
                    in_a_segment[pos] = true;
                    if sect_end > off_end {
                        error!(
                            "Section {} ends outside its segment: segment [{:x}, {:x}] vs section [{:x}, {:x}]",
                            section.name_string(self).unwrap_or_default(),
                            off_start,
                            off_end,
                            sect_start,
                            sect_end
                        );
                        out = false;
                    }
                }
            }
        }

        // Overlap checks over offset-sorted adjacent pairs
        let mut order = (0..headers.len()).collect::<Vec<_>>();
        order.sort_by_key(|&pos| {
            headers
                .get(pos)
                .and_then(|h| h.fields.int("sh_offset").ok())
                .unwrap_or(0)
        });
        for pair in order.windows(2) {
            let (Some(item_a), Some(item_b)) = (headers.get(pair[0]), headers.get(pair[1])) else {
                continue;
            };
            let a_off = item_a.fields.int("sh_offset").unwrap_or(0);
            let b_off = item_b.fields.int("sh_offset").unwrap_or(0);
            let a_size = item_a.fields.int("sh_size").unwrap_or(0);
            let b_size = item_b.fields.int("sh_size").unwrap_or(0);
            let a_nobits = item_a.section_type() == Some(SectionType::NoBits);
            let b_nobits = item_b.section_type() == Some(SectionType::NoBits);
            if !a_nobits && !b_nobits && a_off + a_size > b_off && b_off + b_size > a_off {
                error!(
                    "Sections {} and {} overlap in the file: {:#x}+{:#x} vs {:#x}",
                    item_a.name_string(self).unwrap_or_default(),
                    item_b.name_string(self).unwrap_or_default(),
                    a_off,
                    a_size,
                    b_off
                );
                out = false;
            }

            // Sections outside every segment never make it into memory, so
            // their addresses may collide freely
            if in_a_segment[pair[0]] && in_a_segment[pair[1]] {
                let a_addr = item_a.fields.int("sh_addr").unwrap_or(0);
                let b_addr = item_b.fields.int("sh_addr").unwrap_or(0);
                if a_addr + a_size > b_addr && b_addr + b_size > a_addr {
                    error!(
                        "Sections {} and {} overlap in the image: {:#x}+{:#x} vs {:#x}",
                        item_a.name_string(self).unwrap_or_default(),
                        item_b.name_string(self).unwrap_or_default(),
                        a_addr,
                        a_size,
                        b_addr
                    );
                    out = false;
                }
            }
        }

        for item in headers.iter() {
            let align = item.fields.int("sh_addralign").unwrap_or(0);
            if align != 0 {
                let addr = item.fields.int("sh_addr").unwrap_or(0);
                if addr % align != 0 {
                    error!(
                        "Section {} is out of alignment: {:#x} mod {} == {:#x}",
                        item.name_string(self).unwrap_or_default(),
                        addr,
                        align,
                        addr % align
                    );
                    out = false;
                }
            }
        }
        out
    }
}
