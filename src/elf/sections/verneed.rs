//! Version dependency sections (`VERNEED`): variable-length entries, each a
//! fixed record followed by `vn_cnt` auxiliaries of 0x10 bytes.
//!
//! Entries are parsed back-to-back until the section is exhausted rather
//! than chasing `vn_next`, which holds for single-file inputs where the
//! entries run straight.

use lazy_static::lazy_static;
use log::error;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::ElfFile;
use crate::error::Result;
use crate::refs::{plan_record, PlannedAction, RecordAddr, RefBinder};
use crate::schema::{Fields, RecordSchema, SchemaHooks};
use crate::table::Table;
use crate::table_item;

const NEED_SCHEMA_TEXT: &str = "\
FIELD,vn_version,as_int,2,2
FIELD,vn_cnt,as_int,2,2
FIELD,vn_file,as_int,4,4
FIELD,vn_aux,as_int,4,4
FIELD,vn_next,as_int,4,4
ALT,vn_file,get_referenced_object
REFERENCE,vn_file,off,get_strtab
";

const AUX_SCHEMA_TEXT: &str = "\
FIELD,vna_hash,as_int,4,4
FIELD,vna_flags,as_int,2,2
FIELD,vna_other,as_int,2,2
FIELD,vna_name,as_int,4,4
FIELD,vna_next,as_int,4,4
ALT,vna_name,get_referenced_object
REFERENCE,vna_name,off,get_strtab
";

const HOOKS: SchemaHooks = SchemaHooks {
    options: &[],
    alts: &["get_referenced_object"],
    lookups: &["get_strtab"],
};

lazy_static! {
    static ref NEED_SCHEMA: Result<RecordSchema> = RecordSchema::parse(NEED_SCHEMA_TEXT, &HOOKS);
    static ref AUX_SCHEMA: Result<RecordSchema> = RecordSchema::parse(AUX_SCHEMA_TEXT, &HOOKS);
}

/// The parsed verneed fixed-record schema
pub fn need_schema() -> Result<&'static RecordSchema> {
    NEED_SCHEMA.as_ref().map_err(Clone::clone)
}

/// The parsed verneed auxiliary schema
pub fn aux_schema() -> Result<&'static RecordSchema> {
    AUX_SCHEMA.as_ref().map_err(Clone::clone)
}

/// The fixed record at the head of a verneed entry
#[derive(Debug, Clone)]
pub struct VerNeed {
    /// The decoded fields
    pub fields: Fields,
    /// The resolved references
    pub refs: RefBinder,
}

impl VerNeed {
    fn parse(data: &[u8], class: ElfClass, encoding: ElfDataEncoding) -> Result<Self> {
        Ok(Self {
            fields: Fields::new(class, encoding).from_bytes(need_schema()?, data, &|_, _| true)?,
            refs: RefBinder::new(),
        })
    }

    /// The record's serialized size
    pub fn size(&self) -> usize {
        need_schema().map(|s| self.fields.size(s)).unwrap_or(0)
    }

    /// The aux offset must be the size of this record; the auxiliaries
    /// follow immediately
    pub fn verify(&self, _root: &ElfFile) -> bool {
        let vn_aux = self.fields.int("vn_aux").unwrap_or(0);
        if vn_aux != 0x10 {
            error!("Veraux offset is weird: {vn_aux:#010x}");
            return false;
        }
        true
    }

    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.fields
            .serialize(need_schema()?, &|name| self.refs.read(name, root), write)
    }
}

/// One auxiliary record of a verneed entry
#[derive(Debug, Clone)]
pub struct VerNeedAux {
    id: ItemId,
    idx: usize,
    offset: usize,
    /// The decoded fields
    pub fields: Fields,
    /// The resolved references
    pub refs: RefBinder,
}

impl VerNeedAux {
    fn parse(
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
            fields: Fields::new(class, encoding).from_bytes(aux_schema()?, data, &|_, _| true)?,
            refs: RefBinder::new(),
        })
    }

    /// The auxiliary's serialized size
    pub fn size(&self) -> usize {
        aux_schema().map(|s| self.fields.size(s)).unwrap_or(0)
    }

    /// The `vna_other` value versym entries refer to
    pub fn other(&self) -> u64 {
        self.fields.int("vna_other").unwrap_or(0)
    }

    /// The version's name bytes, if resolved
    pub fn name_bytes<'a>(&self, root: &'a ElfFile) -> Option<&'a [u8]> {
        self.refs
            .referenced_item("vna_name")
            .ok()
            .and_then(|item| root.str_item(&item).ok())
            .map(|item| item.data())
    }

    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.fields
            .serialize(aux_schema()?, &|name| self.refs.read(name, root), write)
    }
}

table_item!(VerNeedAux);

impl crate::table::Record for VerNeedAux {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        VerNeedAux::write_to(self, root, write)
    }
}

/// One verneed entry: the fixed record plus its auxiliaries
#[derive(Debug, Clone)]
pub struct VerNeedEntry {
    id: ItemId,
    idx: usize,
    offset: usize,
    /// The fixed record
    pub need: VerNeed,
    /// The auxiliaries, `vn_cnt` of them
    pub aux: Table<VerNeedAux>,
}

impl VerNeedEntry {
    /// Parse an entry at (idx, offset) from the head of `data`. The entry
    /// supplies its own size: the fixed record plus `vn_cnt` auxiliaries of
    /// 0x10 bytes each.
    pub fn parse(
        idx: usize,
        offset: usize,
        data: &[u8],
        class: ElfClass,
        encoding: ElfDataEncoding,
    ) -> Result<Self> {
        let need = VerNeed::parse(data, class, encoding)?;
        let head = need.size();
        let count = need.fields.int("vn_cnt")? as usize;
        let end = head + count * 0x10;
        let region = data
            .get(head..end)
            .ok_or(crate::error::Error::TruncatedFile {
                what: "verneed auxiliaries".into(),
                offset: offset + head,
            })?;
        let mut aux = Table::new();
        aux.parse(region, |aidx, aoffset, tail| {
            VerNeedAux::parse(aidx, aoffset, tail, class, encoding)
        })?;
        Ok(Self {
            id: ItemId::fresh(),
            idx,
            offset,
            need,
            aux,
        })
    }

    /// The entry's serialized size
    pub fn size(&self) -> usize {
        self.need.size() + self.aux.size()
    }

    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        let mut out = self.need.write_to(root, write)?;
        out += self.aux.write_to(root, write)?;
        Ok(out)
    }

    fn verify(&self, root: &ElfFile) -> bool {
        self.need.verify(root) & self.aux.verify(root)
    }
}

table_item!(VerNeedEntry);

impl crate::table::Record for VerNeedEntry {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        VerNeedEntry::write_to(self, root, write)
    }

    fn verify(&self, root: &ElfFile) -> bool {
        VerNeedEntry::verify(self, root)
    }
}

/// A version dependency section body
#[derive(Debug, Clone, Default)]
pub struct VerNeedSection {
    /// The entries in table order
    pub table: Table<VerNeedEntry>,
    /// The identity of the associated string table's section header, from
    /// the owning header's `sh_link`
    pub strtab: Option<ItemId>,
}

impl VerNeedSection {
    /// Parse a verneed section from the section's bytes
    pub fn from_bytes(
        data: &[u8],
        class: ElfClass,
        encoding: ElfDataEncoding,
        strtab: Option<ItemId>,
    ) -> Result<Self> {
        let mut out = Self {
            table: Table::new(),
            strtab,
        };
        out.table.parse(data, |idx, offset, tail| {
            VerNeedEntry::parse(idx, offset, tail, class, encoding)
        })?;
        Ok(out)
    }

    /// The table's serialized size
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// All `vna_other` values exposed by this section
    pub fn versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.table
            .iter()
            .flat_map(|entry| entry.aux.iter().map(VerNeedAux::other))
    }

    /// The version name bound to a `vna_other` value
    pub fn version_name(&self, root: &ElfFile, version: u64) -> Option<String> {
        self.table
            .iter()
            .flat_map(|entry| entry.aux.iter())
            .find(|aux| aux.other() == version)
            .and_then(|aux| aux.name_bytes(root))
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Plan every record's references
    pub fn plan(&self, section: usize, root: &ElfFile) -> Result<Vec<PlannedAction>> {
        let mut out = Vec::new();
        for (entry_pos, entry) in self.table.iter().enumerate() {
            out.extend(plan_record(
                need_schema()?,
                &entry.need.fields,
                RecordAddr::VerNeedMain {
                    section,
                    entry: entry_pos,
                },
                root,
            )?);
            for (aux_pos, aux) in entry.aux.iter().enumerate() {
                out.extend(plan_record(
                    aux_schema()?,
                    &aux.fields,
                    RecordAddr::VerNeedAux {
                        section,
                        entry: entry_pos,
                        aux: aux_pos,
                    },
                    root,
                )?);
            }
        }
        Ok(out)
    }

    /// Serialize the entries in order
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.table.write_to(root, write)
    }

    /// Table invariants plus each entry's aux-offset check
    pub fn verify(&self, root: &ElfFile) -> bool {
        self.table.verify(root)
    }

    /// Display every entry
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        let mut out = String::new();
        for entry in self.table.iter() {
            out.push_str(&format!("{}[{:x}]:\nMain:\nVerNeed\n", entry.idx, entry.offset));
            out.push_str(&entry.need.fields.render(
                need_schema()?,
                &|name| entry.need.refs.read(name, root),
                &|_| None,
            )?);
            out.push_str("Aux:\n");
            for aux in entry.aux.iter() {
                out.push_str("VerNeedAux\n");
                out.push_str(&aux.fields.render(
                    aux_schema()?,
                    &|name| aux.refs.read(name, root),
                    &|name| match aux_schema().ok()?.alt_handler(name) {
                        Some("get_referenced_object") => aux
                            .name_bytes(root)
                            .map(|b| String::from_utf8_lossy(b).into_owned()),
                        _ => None,
                    },
                )?);
            }
        }
        Ok(out)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    // One verneed entry (libc.so.6 at strtab offset 1) with two auxiliaries
    fn verneed_bytes() -> Vec<u8> {
        let mut data = Vec::new();
        // vn_version=1, vn_cnt=2, vn_file=1, vn_aux=0x10, vn_next=0
        data.extend_from_slice(&[0x01, 0x00, 0x02, 0x00]);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&0x10u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        // aux 0: hash, flags=0, other=2, name=10, next=0x10
        data.extend_from_slice(&0x0d696910u32.to_le_bytes());
        data.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
        data.extend_from_slice(&10u32.to_le_bytes());
        data.extend_from_slice(&0x10u32.to_le_bytes());
        // aux 1: hash, flags=0, other=3, name=20, next=0
        data.extend_from_slice(&0x0d696911u32.to_le_bytes());
        data.extend_from_slice(&[0x00, 0x00, 0x03, 0x00]);
        data.extend_from_slice(&20u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data
    }

    #[test]
    fn test_parse_counted_auxes() {
        let data = verneed_bytes();
        let sect = VerNeedSection::from_bytes(
            &data,
            ElfClass::Elf64,
            ElfDataEncoding::LittleEndian,
            None,
        )
        .unwrap();
        assert_eq!(sect.table.len(), 1);
        let entry = sect.table.get(0).unwrap();
        assert_eq!(entry.aux.len(), 2);
        assert_eq!(entry.size(), 0x30);
        assert_eq!(sect.versions().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_round_trip() {
        let data = verneed_bytes();
        let sect = VerNeedSection::from_bytes(
            &data,
            ElfClass::Elf64,
            ElfDataEncoding::LittleEndian,
            None,
        )
        .unwrap();
        let root = ElfFile::empty();
        let mut out = Vec::new();
        sect.write_to(&root, &mut |b| out.extend_from_slice(b)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_verify_checks_aux_offset() {
        let mut data = verneed_bytes();
        data[8] = 0x20; // vn_aux
        let sect = VerNeedSection::from_bytes(
            &data,
            ElfClass::Elf64,
            ElfDataEncoding::LittleEndian,
            None,
        )
        .unwrap();
        let root = ElfFile::empty();
        assert!(!sect.verify(&root));
    }
}
