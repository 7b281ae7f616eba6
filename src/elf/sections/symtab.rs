//! Symbol table sections (`SYMTAB` and `DYNSYM`).

use lazy_static::lazy_static;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::ElfFile;
use crate::error::Result;
use crate::refs::{plan_record, PlannedAction, RecordAddr, RefBinder};
use crate::schema::{Fields, RecordSchema, SchemaHooks};
use crate::table::Table;
use crate::table_item;

/// Field layout and reference wiring for one symbol. The 32-bit and 64-bit
/// layouts order the value/size pair differently, so those fields are
/// declared once per width.
const SCHEMA_TEXT: &str = "\
FIELD,st_name,as_int,4,4
FIELD,st_value,as_int,4,
FIELD,st_size,as_int,4,
FIELD,st_info,as_int,1,1
FIELD,st_other,as_int,1,1
FIELD,st_shndx,as_int,2,2
FIELD,st_value,as_int,,8
FIELD,st_size,as_int,,8
ALT,st_name,get_referenced_object
ALT,st_info,print_info
ALT,st_shndx,get_shndx_name
REFERENCE,st_name,off,get_strtab
REFERENCE,st_shndx,idx,get_section_list
IGNORE,st_shndx,0,dec
IGNORE,st_shndx,0xFFF1,hex
";

const HOOKS: SchemaHooks = SchemaHooks {
    options: &[],
    alts: &["get_referenced_object", "print_info", "get_shndx_name"],
    lookups: &["get_strtab", "get_section_list"],
};

lazy_static! {
    static ref SCHEMA: Result<RecordSchema> = RecordSchema::parse(SCHEMA_TEXT, &HOOKS);
}

/// The parsed symbol schema
pub fn schema() -> Result<&'static RecordSchema> {
    SCHEMA.as_ref().map_err(Clone::clone)
}

/// The display name for a symbol type nibble
fn type_name(value: u64) -> String {
    match value {
        0 => "NONE".into(),
        1 => "OBJECT".into(),
        2 => "FUNC".into(),
        3 => "SECTION".into(),
        4 => "FILE".into(),
        5 => "COMMON".into(),
        6 => "TLS".into(),
        other => format!("{other}"),
    }
}

/// The display name for a symbol binding nibble
fn binding_name(value: u64) -> String {
    match value {
        0 => "LOCAL".into(),
        1 => "GLOBAL".into(),
        2 => "WEAK".into(),
        other => format!("{other}"),
    }
}

/// One symbol table entry
#[derive(Debug, Clone)]
pub struct Symbol {
    id: ItemId,
    idx: usize,
    offset: usize,
    /// The decoded fields
    pub fields: Fields,
    /// The resolved references
    pub refs: RefBinder,
}

impl Symbol {
    /// Parse a symbol at (idx, offset) from the head of `data`
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

    /// The symbol's serialized size
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

    /// The symbol's name bytes, terminator included
    pub fn name_bytes<'a>(&self, root: &'a ElfFile) -> Result<&'a [u8]> {
        let item = self.refs.referenced_item("st_name")?;
        Ok(root.str_item(&item)?.data())
    }

    /// The (type, binding) pair packed into `st_info`'s low and high nibbles
    pub fn info(&self) -> Result<(String, String)> {
        let info = self.fields.int("st_info")?;
        Ok((type_name(info & 0xF), binding_name((info >> 4) & 0xF)))
    }

    /// The display name for the symbol's defining section: `*UND*` for the
    /// null section, `*ABS*` for absolute symbols, otherwise the section name
    pub fn shndx_name(&self, root: &ElfFile) -> String {
        match self.fields.int("st_shndx") {
            Ok(0xFFF1) => "*ABS*".into(),
            Ok(0x00) => "*UND*".into(),
            raw => self
                .refs
                .referenced_item("st_shndx")
                .ok()
                .and_then(|item| root.section_header_by_id(item.item))
                .and_then(|header| header.name_string(root).ok())
                .unwrap_or_else(|| format!("ERROR{:x}", raw.unwrap_or(0))),
        }
    }

    /// Plan this symbol's references
    pub fn plan(&self, addr: RecordAddr, root: &ElfFile) -> Result<Vec<PlannedAction>> {
        plan_record(schema()?, &self.fields, addr, root)
    }

    /// Serialize the symbol
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.fields
            .serialize(schema()?, &|name| self.refs.read(name, root), write)
    }

    /// Display the symbol's fields
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        let schema = schema()?;
        self.fields.render(
            schema,
            &|name| self.refs.read(name, root),
            &|name| match schema.alt_handler(name) {
                Some("print_info") => self
                    .info()
                    .ok()
                    .map(|(t, b)| format!("{t}, {b}")),
                Some("get_shndx_name") => Some(self.shndx_name(root)),
                Some("get_referenced_object") => self
                    .name_bytes(root)
                    .ok()
                    .map(|b| String::from_utf8_lossy(b).into_owned()),
                _ => None,
            },
        )
    }
}

table_item!(Symbol);

impl crate::table::Record for Symbol {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        Symbol::write_to(self, root, write)
    }
}

/// A symbol table section body
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    /// The symbols in table order
    pub table: Table<Symbol>,
    /// The identity of the associated string table's section header, from
    /// the owning header's `sh_link`
    pub strtab: Option<ItemId>,
}

impl SymbolTable {
    /// Parse a symbol table from the section's bytes
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
        out.table
            .parse(data, |idx, offset, tail| {
                Symbol::parse(idx, offset, tail, class, encoding)
            })?;
        Ok(out)
    }

    /// The table's serialized size
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// The position of the symbol whose name equals `name`
    pub fn find_symbol(&self, root: &ElfFile, name: &str) -> Option<usize> {
        let mut expected = name.as_bytes().to_vec();
        expected.push(0);
        self.table
            .iter()
            .position(|sym| sym.name_bytes(root).map(|b| b == expected).unwrap_or(false))
    }

    /// Plan every symbol's references
    pub fn plan(&self, section: usize, root: &ElfFile) -> Result<Vec<PlannedAction>> {
        let mut out = Vec::new();
        for (item, sym) in self.table.iter().enumerate() {
            out.extend(sym.plan(RecordAddr::SectionItem { section, item }, root)?);
        }
        Ok(out)
    }

    /// Serialize the symbols in order
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.table.write_to(root, write)
    }

    /// Table invariants
    pub fn verify(&self, root: &ElfFile) -> bool {
        self.table.verify(root)
    }

    /// Display every symbol
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        let mut out = String::new();
        for sym in self.table.iter() {
            out.push_str(&format!("{}[{:x}]:\nSymbol\n", sym.idx, sym.offset));
            out.push_str(&sym.render(root)?);
        }
        Ok(out)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    // One 64-bit little-endian symbol: st_name=5, FUNC/GLOBAL, shndx=1,
    // value=0x1000, size=0x10
    const SYM64: [u8; 24] = [
        0x05, 0x00, 0x00, 0x00, // st_name
        0x12, // st_info: GLOBAL<<4 | FUNC
        0x00, // st_other
        0x01, 0x00, // st_shndx
        0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // st_value
        0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // st_size
    ];

    #[test]
    fn test_parse_symbol_64() {
        let sym = Symbol::parse(0, 0, &SYM64, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
            .unwrap();
        assert_eq!(sym.size(), 24);
        assert_eq!(sym.fields.int("st_name").unwrap(), 5);
        assert_eq!(sym.fields.int("st_value").unwrap(), 0x1000);
        let (t, b) = sym.info().unwrap();
        assert_eq!(t, "FUNC");
        assert_eq!(b, "GLOBAL");
    }

    #[test]
    fn test_round_trip_symbol_64() {
        let sym = Symbol::parse(0, 0, &SYM64, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
            .unwrap();
        let root = ElfFile::empty();
        let mut out = Vec::new();
        sym.write_to(&root, &mut |b| out.extend_from_slice(b)).unwrap();
        assert_eq!(out, SYM64);
    }

    #[test]
    fn test_symbol_32_field_order() {
        // st_name=1, value=0x2000, size=8, info=0x11, other=0, shndx=2
        let data: [u8; 16] = [
            0x01, 0x00, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x11, 0x00,
            0x02, 0x00,
        ];
        let sym = Symbol::parse(0, 0, &data, ElfClass::Elf32, ElfDataEncoding::LittleEndian)
            .unwrap();
        assert_eq!(sym.size(), 16);
        assert_eq!(sym.fields.int("st_value").unwrap(), 0x2000);
        assert_eq!(sym.fields.int("st_shndx").unwrap(), 2);
    }

    #[test]
    fn test_shndx_special_names() {
        let mut und = SYM64;
        und[6] = 0x00;
        und[7] = 0x00;
        let root = ElfFile::empty();
        let sym = Symbol::parse(0, 0, &und, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
            .unwrap();
        assert_eq!(sym.shndx_name(&root), "*UND*");
        let mut abs = SYM64;
        abs[6] = 0xF1;
        abs[7] = 0xFF;
        let sym = Symbol::parse(0, 0, &abs, ElfClass::Elf64, ElfDataEncoding::LittleEndian)
            .unwrap();
        assert_eq!(sym.shndx_name(&root), "*ABS*");
    }
}
