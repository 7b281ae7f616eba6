//! Dynamic sections (`DYNAMIC`).
//!
//! Each entry is a tag plus one union field. The union field materializes as
//! `d_val_<tagname>` or `d_ptr_<tagname>` depending on which name the tag
//! matches; a catch-all field keeps entry sizes correct for tags outside the
//! catalog. String-valued tags reference the dynamic string table by offset,
//! and pointer tags reference the section whose `sh_addr` equals the
//! pointer, so both keep tracking their targets across re-layout.

use lazy_static::lazy_static;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::ElfFile;
use crate::error::{Error, Result};
use crate::refs::{plan_record, PlannedAction, RecordAddr, RefBinder};
use crate::schema::{Fields, RecordSchema, SchemaHooks};
use crate::table::Table;
use crate::table_item;

/// DT_NULL
pub const DT_NULL: u64 = 0x00;
/// DT_NEEDED
pub const DT_NEEDED: u64 = 0x01;
/// DT_STRTAB
pub const DT_STRTAB: u64 = 0x05;
/// DT_SYMTAB
pub const DT_SYMTAB: u64 = 0x06;
/// DT_GNU_HASH
pub const DT_GNU_HASH: u64 = 0x6ffffef5;
/// DT_VERSYM
pub const DT_VERSYM: u64 = 0x6ffffff0;
/// DT_VERNEED
pub const DT_VERNEED: u64 = 0x6ffffffe;

/// The dynamic tag catalog: tag value, short name, and whether the union
/// field is a pointer (`d_ptr_*`) or a value (`d_val_*`)
pub const DT_TAGS: &[(u64, &str, bool)] = &[
    (0x00, "NULL", false),
    (0x01, "NEEDED", false),
    (0x02, "PLTRELSZ", false),
    (0x03, "PLTGOT", true),
    (0x04, "HASH", true),
    (0x05, "STRTAB", true),
    (0x06, "SYMTAB", true),
    (0x07, "RELA", true),
    (0x08, "RELASZ", false),
    (0x09, "RELAENT", false),
    (0x0a, "STRSZ", false),
    (0x0b, "SYMENT", false),
    (0x0c, "INIT", true),
    (0x0d, "FINI", true),
    (0x0e, "SONAME", false),
    (0x0f, "RPATH", false),
    (0x10, "SYMBOLIC", false),
    (0x11, "REL", true),
    (0x12, "RELSZ", false),
    (0x13, "RELENT", false),
    (0x14, "PLTREL", false),
    (0x15, "DEBUG", true),
    (0x16, "TEXTREL", false),
    (0x17, "JMPREL", true),
    (0x18, "BIND_NOW", false),
    (0x19, "INIT_ARRAY", true),
    (0x1a, "FINI_ARRAY", true),
    (0x1b, "INIT_ARRAYSZ", false),
    (0x1c, "FINI_ARRAYSZ", false),
    (0x1d, "RUNPATH", false),
    (0x1e, "FLAGS", false),
    (0x20, "PREINIT_ARRAY", true),
    (0x21, "PREINIT_ARRAYSZ", false),
    (0x22, "SYMTAB_SHNDX", false),
    (0x23, "NUM", false),
    (0x6ffffef5, "GNU_HASH", true),
    (0x6ffffff0, "VERSYM", true),
    (0x6ffffff9, "RELACOUNT", false),
    (0x6ffffffa, "RELCOUNT", false),
    (0x6ffffffb, "FLAGS_1", false),
    (0x6ffffffc, "VERDEF", true),
    (0x6ffffffd, "VERDEFNUM", false),
    (0x6ffffffe, "VERNEED", true),
    (0x6fffffff, "VERNEEDNUM", false),
];

/// The catalog name for a tag value
pub fn tag_name(tag: u64) -> Option<&'static str> {
    DT_TAGS
        .iter()
        .find(|(value, _, _)| *value == tag)
        .map(|(_, name, _)| *name)
}

/// The tag value for a `DT_`-prefixed or bare catalog name
pub fn tag_value(name: &str) -> Option<u64> {
    let bare = name.strip_prefix("DT_").unwrap_or(name);
    DT_TAGS
        .iter()
        .find(|(_, tag, _)| *tag == bare)
        .map(|(value, _, _)| *value)
}

/// The union field name for a tag value: `d_ptr_<name>` or `d_val_<name>`
pub fn union_field_for(tag: u64) -> Option<String> {
    DT_TAGS
        .iter()
        .find(|(value, _, _)| *value == tag)
        .map(|(_, name, ptr)| {
            if *ptr {
                format!("d_ptr_{}", name.to_lowercase())
            } else {
                format!("d_val_{}", name.to_lowercase())
            }
        })
}

lazy_static! {
    static ref SCHEMA_TEXT: String = {
        let mut out = String::from("FIELD,d_tag,as_int,4,8\nALT,d_tag,alt_tag\n");
        for (_, name, ptr) in DT_TAGS {
            let field = if *ptr {
                format!("d_ptr_{}", name.to_lowercase())
            } else {
                format!("d_val_{}", name.to_lowercase())
            };
            out.push_str(&format!("FIELD,{field},as_int,4,8\n"));
            out.push_str(&format!("OPTION,{field},tag_match\n"));
        }
        // Tags outside the catalog still occupy a union slot
        out.push_str("FIELD,d_un,as_int,4,8\nOPTION,d_un,tag_unknown\n");
        // String-valued tags hold offsets into the dynamic string table
        for field in ["d_val_needed", "d_val_soname", "d_val_rpath", "d_val_runpath"] {
            out.push_str(&format!("REFERENCE,{field},off,dynstr_ref\n"));
        }
        out.push_str("ALT,d_val_needed,get_referenced_object\n");
        // Pointer tags bind the section found at the pointed-to address
        for name in [
            "pltgot",
            "hash",
            "strtab",
            "symtab",
            "rela",
            "init",
            "fini",
            "rel",
            "debug",
            "jmprel",
            "init_array",
            "fini_array",
            "preinit_array",
            "gnu_hash",
            "versym",
            "verdef",
            "verneed",
        ] {
            out.push_str(&format!(
                "REFERENCE,d_ptr_{name},field,sh_addr,get_sheaders\n"
            ));
            out.push_str(&format!("IGNORE,d_ptr_{name},0,hex\n"));
        }
        out
    };
    static ref SCHEMA: Result<RecordSchema> = RecordSchema::parse(
        SCHEMA_TEXT.as_str(),
        &SchemaHooks {
            options: &["tag_match", "tag_unknown"],
            alts: &["alt_tag", "get_referenced_object"],
            lookups: &["dynstr_ref", "get_sheaders"],
        },
    );
}

/// The parsed dynamic entry schema
pub fn schema() -> Result<&'static RecordSchema> {
    SCHEMA.as_ref().map_err(Clone::clone)
}

/// The union-field predicate: a `d_val_*`/`d_ptr_*` field materializes only
/// when its name matches the already-decoded tag
fn union_predicate(fields: &Fields, name: &str) -> bool {
    let Ok(tag) = fields.int("d_tag") else {
        return false;
    };
    if name == "d_un" {
        return tag_name(tag).is_none();
    }
    let actual = name
        .strip_prefix("d_val_")
        .or_else(|| name.strip_prefix("d_ptr_"))
        .unwrap_or(name)
        .to_uppercase();
    tag_name(tag) == Some(actual.as_str())
}

/// One dynamic entry
#[derive(Debug, Clone)]
pub struct DynamicEntry {
    id: ItemId,
    idx: usize,
    offset: usize,
    /// The decoded fields
    pub fields: Fields,
    /// The resolved references
    pub refs: RefBinder,
}

impl DynamicEntry {
    /// Parse an entry at (idx, offset) from the head of `data`
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
            fields: Fields::new(class, encoding).from_bytes(schema()?, data, &union_predicate)?,
            refs: RefBinder::new(),
        })
    }

    /// Build an entry from a key/value map, as the edit commands do
    pub fn from_map(
        data: &std::collections::HashMap<String, u64>,
        class: ElfClass,
        encoding: ElfDataEncoding,
    ) -> Result<Self> {
        Ok(Self {
            id: ItemId::fresh(),
            idx: 0,
            offset: 0,
            fields: Fields::new(class, encoding).from_map(schema()?, data, &union_predicate)?,
            refs: RefBinder::new(),
        })
    }

    /// The entry's serialized size
    pub fn size(&self) -> usize {
        schema().map(|s| self.fields.size(s)).unwrap_or(0)
    }

    /// The entry's tag
    pub fn tag(&self) -> u64 {
        self.fields.int("d_tag").unwrap_or(0)
    }

    /// The name of the entry's materialized union field
    pub fn union_field(&self) -> Result<String> {
        union_field_for(self.tag())
            .or_else(|| self.fields.has("d_un").then(|| "d_un".to_string()))
            .ok_or_else(|| Error::NoUnionField {
                tag: format!("{:#x}", self.tag()),
            })
    }

    /// The current value of a field, reading through references
    pub fn get(&self, name: &str, root: &ElfFile) -> Result<u64> {
        match self.refs.read(name, root)? {
            Some(v) => Ok(v),
            None => self.fields.int(name),
        }
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
                Some("alt_tag") => Some(match tag_name(self.tag()) {
                    Some(name) => format!("DT_{name}"),
                    None => format!("{:#010x}", self.tag()),
                }),
                Some("get_referenced_object") => self
                    .refs
                    .referenced_item(name)
                    .ok()
                    .and_then(|item| root.str_item(&item).ok())
                    .map(|item| String::from_utf8_lossy(item.data()).into_owned()),
                _ => None,
            },
        )
    }
}

table_item!(DynamicEntry);

impl crate::table::Record for DynamicEntry {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        DynamicEntry::write_to(self, root, write)
    }
}

/// A dynamic section body
#[derive(Debug, Clone, Default)]
pub struct DynamicSection {
    /// The entries in table order
    pub table: Table<DynamicEntry>,
}

impl DynamicSection {
    /// Parse a dynamic section from the section's bytes
    pub fn from_bytes(data: &[u8], class: ElfClass, encoding: ElfDataEncoding) -> Result<Self> {
        let mut out = Self {
            table: Table::new(),
        };
        out.table.parse(data, |idx, offset, tail| {
            DynamicEntry::parse(idx, offset, tail, class, encoding)
        })?;
        Ok(out)
    }

    /// The table's serialized size
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// All entries carrying `tag_id`, by position
    pub fn get_tags_by_id(&self, tag_id: u64) -> Vec<usize> {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.tag() == tag_id)
            .map(|(i, _)| i)
            .collect()
    }

    /// The section header whose `sh_addr` equals the pointer held by the
    /// entry with `tag_id`
    pub fn find_section_by_ptr_tag(&self, root: &ElfFile, tag_id: u64) -> Result<ItemId> {
        let entry = self
            .table
            .iter()
            .filter(|entry| entry.tag() == tag_id)
            .last()
            .ok_or(Error::TagNotFound { tag: tag_id })?;
        let field = entry.union_field()?;
        let addr = entry.get(&field, root)?;
        root.section_headers()
            .iter()
            .find(|header| header.get("sh_addr", root).ok() == Some(addr))
            .map(|header| header.id())
            .ok_or(Error::NoSectionForPointer { addr })
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

    /// Table invariants; entry contents hold as long as their references do
    pub fn verify(&self, root: &ElfFile) -> bool {
        self.table.verify(root)
    }

    /// Display every entry
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        let mut out = String::new();
        for entry in self.table.iter() {
            out.push_str(&format!("{}[{:x}]:\nDynamicEntry\n", entry.idx, entry.offset));
            out.push_str(&entry.render(root)?);
        }
        Ok(out)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::table::TableItem;
    use std::collections::HashMap;

    fn entry64(tag: u64, value: u64) -> Vec<u8> {
        let mut out = tag.to_le_bytes().to_vec();
        out.extend_from_slice(&value.to_le_bytes());
        out
    }

    #[test]
    fn test_union_field_selection() {
        let data = entry64(DT_NEEDED, 0x2a);
        let entry = DynamicEntry::parse(0, 0, &data, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
            .unwrap();
        assert_eq!(entry.size(), 16);
        assert!(entry.fields.has("d_val_needed"));
        assert!(!entry.fields.has("d_ptr_strtab"));
        assert_eq!(entry.union_field().unwrap(), "d_val_needed");
        assert_eq!(entry.fields.int("d_val_needed").unwrap(), 0x2a);

        let data = entry64(DT_STRTAB, 0x4000);
        let entry = DynamicEntry::parse(0, 0, &data, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
            .unwrap();
        assert_eq!(entry.union_field().unwrap(), "d_ptr_strtab");
        assert_eq!(entry.fields.int("d_ptr_strtab").unwrap(), 0x4000);
    }

    #[test]
    fn test_unknown_tag_uses_catch_all() {
        let data = entry64(0x6ffffdf8, 0x99);
        let entry = DynamicEntry::parse(0, 0, &data, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
            .unwrap();
        assert_eq!(entry.size(), 16);
        assert!(entry.fields.has("d_un"));
        assert_eq!(entry.union_field().unwrap(), "d_un");
    }

    #[test]
    fn test_round_trip_section() {
        let mut data = entry64(DT_NEEDED, 1);
        data.extend(entry64(DT_STRTAB, 0x4000));
        data.extend(entry64(DT_NULL, 0));
        let sect =
            DynamicSection::from_bytes(&data, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
                .unwrap();
        assert_eq!(sect.table.len(), 3);
        let root = ElfFile::empty();
        let mut out = Vec::new();
        sect.write_to(&root, &mut |b| out.extend_from_slice(b)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_from_map() {
        let mut map = HashMap::new();
        map.insert("d_tag".to_string(), DT_NEEDED);
        map.insert("d_val_needed".to_string(), 0x17u64);
        let entry =
            DynamicEntry::from_map(&map, ElfClass::Elf64, ElfDataEncoding::LittleEndian).unwrap();
        assert_eq!(entry.tag(), DT_NEEDED);
        assert_eq!(entry.fields.int("d_val_needed").unwrap(), 0x17);
        assert_eq!(entry.size(), 16);
    }

    #[test]
    fn test_tag_catalog() {
        assert_eq!(tag_value("DT_NEEDED"), Some(DT_NEEDED));
        assert_eq!(tag_value("VERSYM"), Some(DT_VERSYM));
        assert_eq!(tag_name(DT_GNU_HASH), Some("GNU_HASH"));
        assert_eq!(union_field_for(DT_VERNEED).unwrap(), "d_ptr_verneed");
        assert!(tag_value("DT_BOGUS").is_none());
    }

    #[test]
    fn test_get_tags_by_id() {
        let mut data = entry64(DT_NEEDED, 1);
        data.extend(entry64(DT_NEEDED, 9));
        data.extend(entry64(DT_NULL, 0));
        let sect =
            DynamicSection::from_bytes(&data, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
                .unwrap();
        assert_eq!(sect.get_tags_by_id(DT_NEEDED), vec![0, 1]);
        assert_eq!(sect.get_tags_by_id(DT_STRTAB), Vec::<usize>::new());
        let _ = sect.table.get(0).unwrap().id();
    }
}
