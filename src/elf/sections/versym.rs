//! Symbol version sections (`VERSYM`): one 16-bit version index per symbol
//! of the referenced symbol table. 0 marks a local symbol, 1 a global one,
//! and larger values must appear as some verneed auxiliary's `vna_other`.

use std::collections::HashSet;

use lazy_static::lazy_static;
use log::error;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::ElfFile;
use crate::error::Result;
use crate::schema::{Fields, RecordSchema, SchemaHooks};
use crate::table::Table;
use crate::table_item;

const SCHEMA_TEXT: &str = "\
FIELD,versym,as_int,2,2
ALT,versym,get_ver_string
";

const HOOKS: SchemaHooks = SchemaHooks {
    options: &[],
    alts: &["get_ver_string"],
    lookups: &[],
};

lazy_static! {
    static ref SCHEMA: Result<RecordSchema> = RecordSchema::parse(SCHEMA_TEXT, &HOOKS);
}

/// The parsed versym schema
pub fn schema() -> Result<&'static RecordSchema> {
    SCHEMA.as_ref().map_err(Clone::clone)
}

/// One version index
#[derive(Debug, Clone)]
pub struct VerSym {
    id: ItemId,
    idx: usize,
    offset: usize,
    /// The decoded fields
    pub fields: Fields,
}

impl VerSym {
    /// Parse a version index at (idx, offset) from the head of `data`
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

    /// The entry's serialized size
    pub fn size(&self) -> usize {
        schema().map(|s| self.fields.size(s)).unwrap_or(0)
    }

    /// The version value
    pub fn value(&self) -> u64 {
        self.fields.int("versym").unwrap_or(0)
    }

    /// Overwrite the version value
    pub fn assign(&mut self, value: u64) {
        self.fields.set_int("versym", value);
    }

    /// Serialize the entry
    pub fn write_to(&self, _root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.fields.serialize(schema()?, &|_| Ok(None), write)
    }
}

table_item!(VerSym);

impl crate::table::Record for VerSym {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        VerSym::write_to(self, root, write)
    }
}

/// A symbol version section body
#[derive(Debug, Clone, Default)]
pub struct VerSymSection {
    /// The version indexes in symbol order
    pub table: Table<VerSym>,
    /// The identity of the associated symbol table's section header, from
    /// the owning header's `sh_link`
    pub symtab: Option<ItemId>,
}

impl VerSymSection {
    /// Parse a versym section from the section's bytes
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
            VerSym::parse(idx, offset, tail, class, encoding)
        })?;
        Ok(out)
    }

    /// The table's serialized size
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// Table invariants, plus: same length as the symbol table, and every
    /// version value in the known set
    pub fn verify(&self, root: &ElfFile) -> bool {
        let mut out = self.table.verify(root);
        let symtab_len = self
            .symtab
            .and_then(|id| root.symtab_by_header_id(id))
            .map(|tab| tab.table.len());
        match symtab_len {
            Some(len) if len != self.table.len() => {
                error!(
                    "Table size mismatch; expected {} entries, but found {}",
                    len,
                    self.table.len()
                );
                out = false;
            }
            Some(_) => {}
            None => {
                error!("Versym section has no matching symbol table");
                out = false;
            }
        }
        let mut versions = root.verneed_versions();
        versions.insert(0);
        versions.insert(1);
        for (i, item) in self.table.iter().enumerate() {
            if !versions.contains(&item.value()) {
                error!("Unknown version for symbol {}: {}", i, item.value());
                out = false;
            }
        }
        out
    }

    /// Re-derive the bookkeeping, then reset any version outside the known
    /// set to 1 (global). Verdef-defined versions are out of scope, so
    /// unknown values cannot be kept.
    pub fn organize_with(&mut self, known: &HashSet<u64>) {
        self.table.clean();
        for item in self.table.iter_mut() {
            let value = item.value();
            if value > 1 && !known.contains(&value) {
                item.assign(1);
            }
        }
    }

    /// Serialize the entries in order
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.table.write_to(root, write)
    }

    /// Display each entry with its symbol and version names
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        let mut out = String::new();
        for (i, item) in self.table.iter().enumerate() {
            let symbol = self
                .symtab
                .and_then(|id| root.symtab_by_header_id(id))
                .and_then(|tab| tab.table.get(i))
                .and_then(|sym| sym.name_bytes(root).ok())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_else(|| "OUT OF BOUNDS".into());
            let text = match item.value() {
                0 => format!("{symbol}:\t0 (*local*)"),
                1 => format!("{symbol}:\t1 (*global*)"),
                v => match root.verneed_version_name(v) {
                    Some(name) => format!("{symbol}:\t{v} ({name})"),
                    None => format!("{symbol}:\t{v} ( UNKNOWN!!! )"),
                },
            };
            out.push_str(&text);
            out.push('\n');
        }
        Ok(out)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_and_assign() {
        let data = [0x00, 0x00, 0x01, 0x00, 0x02, 0x00];
        let mut sect = VerSymSection::from_bytes(
            &data,
            ElfClass::Elf64,
            ElfDataEncoding::LittleEndian,
            None,
        )
        .unwrap();
        assert_eq!(sect.table.len(), 3);
        assert_eq!(sect.table.get(2).unwrap().value(), 2);
        sect.table.get_mut(2).unwrap().assign(3);
        assert_eq!(sect.table.get(2).unwrap().value(), 3);
        let root = ElfFile::empty();
        let mut out = Vec::new();
        sect.write_to(&root, &mut |b| out.extend_from_slice(b)).unwrap();
        assert_eq!(out, [0x00, 0x00, 0x01, 0x00, 0x03, 0x00]);
    }

    #[test]
    fn test_organize_resets_unknown_versions() {
        let data = [0x00, 0x00, 0x01, 0x00, 0x05, 0x00, 0x02, 0x00];
        let mut sect = VerSymSection::from_bytes(
            &data,
            ElfClass::Elf64,
            ElfDataEncoding::LittleEndian,
            None,
        )
        .unwrap();
        let known = HashSet::from([2u64]);
        sect.organize_with(&known);
        assert_eq!(sect.table.get(0).unwrap().value(), 0);
        assert_eq!(sect.table.get(1).unwrap().value(), 1);
        assert_eq!(sect.table.get(2).unwrap().value(), 1);
        assert_eq!(sect.table.get(3).unwrap().value(), 2);
    }
}
