//! Typed section bodies, selected from the owning header's `sh_type`.

pub mod dynamic;
pub mod gnu_hash;
pub mod nobits;
pub mod progbits;
pub mod rela;
pub mod strtab;
pub mod symtab;
pub mod verneed;
pub mod versym;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::section::SectionType;
use crate::elf::ElfFile;
use crate::error::{Error, Result};
use crate::refs::PlannedAction;
use crate::schema::Fields;
use crate::table::TableItem;

pub use dynamic::{DynamicEntry, DynamicSection};
pub use gnu_hash::GnuHashSection;
pub use nobits::NoBits;
pub use progbits::ProgBits;
pub use rela::{RelaEntry, RelaSection};
pub use strtab::{StrItem, StringTable};
pub use symtab::{Symbol, SymbolTable};
pub use verneed::{VerNeed, VerNeedAux, VerNeedEntry, VerNeedSection};
pub use versym::{VerSym, VerSymSection};

/// A section's typed contents. Unknown section types fall back to the
/// opaque byte-blob body.
#[derive(Debug, Clone)]
pub enum SectionBody {
    /// Opaque bytes
    ProgBits(ProgBits),
    /// No file contents
    NoBits(NoBits),
    /// A string table
    StrTab(StringTable),
    /// A symbol table
    SymTab(SymbolTable),
    /// A relocation table
    Rela(RelaSection),
    /// The dynamic section
    Dynamic(DynamicSection),
    /// A GNU hash section
    GnuHash(GnuHashSection),
    /// A symbol version table
    VerSym(VerSymSection),
    /// A version dependency table
    VerNeed(VerNeedSection),
}

impl SectionBody {
    /// Construct the body for a section of the given type. `link` carries
    /// the identity of the section header named by the owner's `sh_link`,
    /// and `logical_size` the owner's `sh_size` for bodies with no file
    /// contents.
    pub fn parse(
        kind: Option<SectionType>,
        data: &[u8],
        class: ElfClass,
        encoding: ElfDataEncoding,
        link: Option<ItemId>,
        logical_size: usize,
    ) -> Result<Self> {
        Ok(match kind {
            Some(SectionType::Null | SectionType::NoBits) => {
                Self::NoBits(NoBits::with_size(logical_size))
            }
            Some(SectionType::StrTab) => Self::StrTab(StringTable::from_bytes(data)?),
            Some(SectionType::SymTab | SectionType::DynSym) => {
                Self::SymTab(SymbolTable::from_bytes(data, class, encoding, link)?)
            }
            Some(SectionType::Rela) => {
                Self::Rela(RelaSection::from_bytes(data, class, encoding, link)?)
            }
            Some(SectionType::Dynamic) => {
                Self::Dynamic(DynamicSection::from_bytes(data, class, encoding)?)
            }
            Some(SectionType::GnuHash) => {
                Self::GnuHash(GnuHashSection::from_bytes(data, class, encoding, link)?)
            }
            Some(SectionType::VerSym) => {
                Self::VerSym(VerSymSection::from_bytes(data, class, encoding, link)?)
            }
            Some(SectionType::VerNeed) => {
                Self::VerNeed(VerNeedSection::from_bytes(data, class, encoding, link)?)
            }
            _ => Self::ProgBits(ProgBits::from_bytes(data)),
        })
    }

    /// The body's serialized size
    pub fn size(&self) -> usize {
        match self {
            Self::ProgBits(b) => b.size(),
            Self::NoBits(b) => b.size(),
            Self::StrTab(b) => b.size(),
            Self::SymTab(b) => b.size(),
            Self::Rela(b) => b.size(),
            Self::Dynamic(b) => b.size(),
            Self::GnuHash(b) => b.size(),
            Self::VerSym(b) => b.size(),
            Self::VerNeed(b) => b.size(),
        }
    }

    /// Serialize the body
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        match self {
            Self::ProgBits(b) => b.write_to(root, write),
            Self::NoBits(b) => b.write_to(root, write),
            Self::StrTab(b) => b.write_to(root, write),
            Self::SymTab(b) => b.write_to(root, write),
            Self::Rela(b) => b.write_to(root, write),
            Self::Dynamic(b) => b.write_to(root, write),
            Self::GnuHash(b) => b.write_to(root, write),
            Self::VerSym(b) => b.write_to(root, write),
            Self::VerNeed(b) => b.write_to(root, write),
        }
    }

    /// Check the body's invariants
    pub fn verify(&self, root: &ElfFile) -> bool {
        match self {
            Self::ProgBits(b) => b.verify(root),
            Self::NoBits(b) => b.verify(root),
            Self::StrTab(b) => b.verify(root),
            Self::SymTab(b) => b.verify(root),
            Self::Rela(b) => b.verify(root),
            Self::Dynamic(b) => b.verify(root),
            Self::GnuHash(b) => b.verify(root),
            Self::VerSym(b) => b.verify(root),
            Self::VerNeed(b) => b.verify(root),
        }
    }

    /// Display the body
    pub fn render(&self, root: &ElfFile) -> Result<String> {
        match self {
            Self::ProgBits(b) => b.render(root),
            Self::NoBits(b) => b.render(root),
            Self::StrTab(b) => b.render(root),
            Self::SymTab(b) => b.render(root),
            Self::Rela(b) => b.render(root),
            Self::Dynamic(b) => b.render(root),
            Self::GnuHash(b) => b.render(root),
            Self::VerSym(b) => b.render(root),
            Self::VerNeed(b) => b.render(root),
        }
    }

    /// Plan the references of every record in the body
    pub fn plan(&self, section: usize, root: &ElfFile) -> Result<Vec<PlannedAction>> {
        match self {
            Self::SymTab(b) => b.plan(section, root),
            Self::Rela(b) => b.plan(section, root),
            Self::Dynamic(b) => b.plan(section, root),
            Self::VerNeed(b) => b.plan(section, root),
            _ => Ok(Vec::new()),
        }
    }

    /// The number of items, for table-typed bodies
    pub fn table_len(&self) -> Option<usize> {
        match self {
            Self::StrTab(b) => Some(b.table.len()),
            Self::SymTab(b) => Some(b.table.len()),
            Self::Rela(b) => Some(b.table.len()),
            Self::Dynamic(b) => Some(b.table.len()),
            Self::VerSym(b) => Some(b.table.len()),
            Self::VerNeed(b) => Some(b.table.len()),
            _ => None,
        }
    }

    /// The identity of the item at `idx`, for table-typed bodies
    pub fn id_at(&self, idx: usize) -> Option<ItemId> {
        match self {
            Self::StrTab(b) => b.table.id_at(idx),
            Self::SymTab(b) => b.table.id_at(idx),
            Self::Rela(b) => b.table.id_at(idx),
            Self::Dynamic(b) => b.table.id_at(idx),
            Self::VerSym(b) => b.table.id_at(idx),
            Self::VerNeed(b) => b.table.id_at(idx),
            _ => None,
        }
    }

    /// The position of the item with identity `id`
    pub fn position_of(&self, id: ItemId) -> Option<usize> {
        match self {
            Self::StrTab(b) => b.table.position_of(id),
            Self::SymTab(b) => b.table.position_of(id),
            Self::Rela(b) => b.table.position_of(id),
            Self::Dynamic(b) => b.table.position_of(id),
            Self::VerSym(b) => b.table.position_of(id),
            Self::VerNeed(b) => b.table.position_of(id),
            _ => None,
        }
    }

    /// The current offset of the item with identity `id`
    pub fn offset_of(&self, id: ItemId) -> Option<usize> {
        match self {
            Self::StrTab(b) => b.table.by_id(id).map(TableItem::offset),
            Self::SymTab(b) => b.table.by_id(id).map(TableItem::offset),
            Self::Rela(b) => b.table.by_id(id).map(TableItem::offset),
            Self::Dynamic(b) => b.table.by_id(id).map(TableItem::offset),
            Self::VerSym(b) => b.table.by_id(id).map(TableItem::offset),
            Self::VerNeed(b) => b.table.by_id(id).map(TableItem::offset),
            _ => None,
        }
    }

    /// The identity of the item recorded at exactly `offset`
    pub fn id_at_offset(&self, offset: usize) -> Option<ItemId> {
        match self {
            Self::StrTab(b) => b.table.id_at_offset(offset),
            Self::SymTab(b) => b.table.id_at_offset(offset),
            Self::Rela(b) => b.table.id_at_offset(offset),
            Self::Dynamic(b) => b.table.id_at_offset(offset),
            Self::VerSym(b) => b.table.id_at_offset(offset),
            Self::VerNeed(b) => b.table.id_at_offset(offset),
            _ => None,
        }
    }

    /// The item at `offset`, synthesizing a suffix-sharing string item when
    /// the body is a string table and the offset lands inside an entry
    pub fn ensure_item_at_offset(&mut self, offset: usize) -> Result<ItemId> {
        match self {
            Self::StrTab(b) => b.get_item_by_offset(offset),
            other => other
                .id_at_offset(offset)
                .ok_or(Error::NoItemAtOffset { offset }),
        }
    }

    /// Mutable access to a record's fields and references, for installing
    /// resolved links
    pub fn item_parts_mut(
        &mut self,
        item: usize,
    ) -> Option<(&mut Fields, &mut crate::refs::RefBinder)> {
        match self {
            Self::SymTab(b) => b
                .table
                .get_mut(item)
                .map(|s| (&mut s.fields, &mut s.refs)),
            Self::Rela(b) => b
                .table
                .get_mut(item)
                .map(|e| (&mut e.fields, &mut e.refs)),
            Self::Dynamic(b) => b
                .table
                .get_mut(item)
                .map(|e| (&mut e.fields, &mut e.refs)),
            _ => None,
        }
    }

    /// The string table contents, when the body is one
    pub fn as_strtab(&self) -> Option<&StringTable> {
        match self {
            Self::StrTab(b) => Some(b),
            _ => None,
        }
    }

    /// The string table contents, mutably
    pub fn as_strtab_mut(&mut self) -> Option<&mut StringTable> {
        match self {
            Self::StrTab(b) => Some(b),
            _ => None,
        }
    }

    /// The symbol table contents, when the body is one
    pub fn as_symtab(&self) -> Option<&SymbolTable> {
        match self {
            Self::SymTab(b) => Some(b),
            _ => None,
        }
    }

    /// The symbol table contents, mutably
    pub fn as_symtab_mut(&mut self) -> Option<&mut SymbolTable> {
        match self {
            Self::SymTab(b) => Some(b),
            _ => None,
        }
    }

    /// The dynamic section contents, when the body is one
    pub fn as_dynamic(&self) -> Option<&DynamicSection> {
        match self {
            Self::Dynamic(b) => Some(b),
            _ => None,
        }
    }

    /// The dynamic section contents, mutably
    pub fn as_dynamic_mut(&mut self) -> Option<&mut DynamicSection> {
        match self {
            Self::Dynamic(b) => Some(b),
            _ => None,
        }
    }

    /// The versym contents, when the body is one
    pub fn as_versym(&self) -> Option<&VerSymSection> {
        match self {
            Self::VerSym(b) => Some(b),
            _ => None,
        }
    }

    /// The versym contents, mutably
    pub fn as_versym_mut(&mut self) -> Option<&mut VerSymSection> {
        match self {
            Self::VerSym(b) => Some(b),
            _ => None,
        }
    }

    /// The verneed contents, when the body is one
    pub fn as_verneed(&self) -> Option<&VerNeedSection> {
        match self {
            Self::VerNeed(b) => Some(b),
            _ => None,
        }
    }

    /// Whether the body is a NOBITS body
    pub fn is_nobits(&self) -> bool {
        matches!(self, Self::NoBits(_))
    }
}

impl Default for SectionBody {
    fn default() -> Self {
        Self::ProgBits(ProgBits::default())
    }
}
