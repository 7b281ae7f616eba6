//! Relocation sections with explicit addends (`RELA`).
//!
//! `r_info` packs a relocation type and a symbol index; it is declared as
//! two fields on its little-endian byte layout so the symbol half can
//! reference the symbol table named by the owning header's `sh_link`.

use lazy_static::lazy_static;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::ElfFile;
use crate::error::Result;
use crate::refs::{plan_record, PlannedAction, RecordAddr, RefBinder};
use crate::schema::{Fields, RecordSchema, SchemaHooks};
use crate::table::Table;
use crate::table_item;

const SCHEMA_TEXT: &str = "\
FIELD,r_offset,as_int,4,8
FIELD,r_type,as_int,1,4
FIELD,r_sym,as_int,3,4
FIELD,r_addend,as_int,4,8
ALT,r_sym,get_referenced_object
REFERENCE,r_sym,idx,get_symtab
IGNORE,r_sym,0,dec
";

const HOOKS: SchemaHooks = SchemaHooks {
    options: &[],
    alts: &["get_referenced_object"],
    lookups: &["get_symtab"],
};

lazy_static! {
    static ref SCHEMA: Result<RecordSchema> = RecordSchema::parse(SCHEMA_TEXT, &HOOKS);
}

/// The parsed relocation schema
pub fn schema() -> Result<&'static RecordSchema> {
    SCHEMA.as_ref().map_err(Clone::clone)
}

/// One relocation entry
#[derive(Debug, Clone)]
pub struct RelaEntry {
    id: ItemId,
    idx: usize,
    offset: usize,
    /// The decoded fields
    pub fields: Fields,
    /// The resolved references
    pub refs: RefBinder,
}

impl RelaEntry {
    /// Parse a relocation at (idx, offset) from the head of `data`
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
        })
    }

    /// The entry's serialized size
    pub fn size(&self) -> usize {
        schema().map(|s| self.fields.size(s)).unwrap_or(0)
    }

    /// Plan this entry's references
    pub fn plan(&self, addr: RecordAddr, root: &ElfFile) -> Result<Vec<PlannedAction>> {
        plan_record(schema()?, &self.fields, addr, root)
    }

    /// Serialize the entry
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.fields
            .serialize(schema()?, &|name| self.refs.read(name, root), write)
    }

    /// Display the entry's fields
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        let schema = schema()?;
        self.fields.render(
            schema,
            &|name| self.refs.read(name, root),
            &|name| match schema.alt_handler(name) {
                Some("get_referenced_object") => self
                    .refs
                    .referenced_item("r_sym")
                    .ok()
                    .and_then(|item| root.symbol_by_ref(&item))
                    .and_then(|sym| sym.name_bytes(root).ok())
                    .map(|b| String::from_utf8_lossy(b).into_owned()),
                _ => None,
            },
        )
    }
}

table_item!(RelaEntry);

impl crate::table::Record for RelaEntry {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        RelaEntry::write_to(self, root, write)
    }
}

/// A relocation section body
#[derive(Debug, Clone, Default)]
pub struct RelaSection {
    /// The relocations in table order
    pub table: Table<RelaEntry>,
    /// The identity of the associated symbol table's section header, from
    /// the owning header's `sh_link`
    pub symtab: Option<ItemId>,
}

impl RelaSection {
    /// Parse a relocation section from the section's bytes
    pub fn from_bytes(
        data: &[u8],
        class: ElfClass,
        encoding: ElfDataEncoding,
        symtab: Option<ItemId>,
    ) -> Result<Self> {
        let mut out = Self {
            table: Table::new(),
            symtab,
        };
        out.table.parse(data, |idx, offset, tail| {
            RelaEntry::parse(idx, offset, tail, class, encoding)
        })?;
        Ok(out)
    }

    /// The table's serialized size
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// Plan every entry's references
    pub fn plan(&self, section: usize, root: &ElfFile) -> Result<Vec<PlannedAction>> {
        let mut out = Vec::new();
        for (item, entry) in self.table.iter().enumerate() {
            out.extend(entry.plan(RecordAddr::SectionItem { section, item }, root)?);
        }
        Ok(out)
    }

    /// Serialize the entries in order
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.table.write_to(root, write)
    }

    /// Table invariants
    pub fn verify(&self, root: &ElfFile) -> bool {
        self.table.verify(root)
    }

    /// Display every entry
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        let mut out = String::new();
        for entry in self.table.iter() {
            out.push_str(&format!("{}[{:x}]:\nRelaEntry\n", entry.idx, entry.offset));
            out.push_str(&entry.render(root)?);
        }
        Ok(out)
    }
}
