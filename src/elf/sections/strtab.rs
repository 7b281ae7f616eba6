//! String table sections: ordered null-terminated byte strings addressed by
//! offset.
//!
//! String tables overlap strings by suffix: `vfprintf`, `fprintf` and
//! `printf` may all live inside one stored `vfprintf\0`, referenced at
//! offset, offset + 1, and offset + 2. An offset lookup that lands inside an
//! existing item synthesizes a fresh item from that item's tail.

use crate::base::ItemId;
use crate::elf::ElfFile;
use crate::error::{Error, Result};
use crate::table::Table;
use crate::table_item;

/// One null-terminated entry of a string table
#[derive(Debug, Clone)]
pub struct StrItem {
    id: ItemId,
    idx: usize,
    offset: usize,
    data: Vec<u8>,
}

impl StrItem {
    /// A new entry holding `data` verbatim
    pub fn new(idx: usize, offset: usize, data: Vec<u8>) -> Self {
        Self {
            id: ItemId::fresh(),
            idx,
            offset,
            data,
        }
    }

    /// The entry's bytes, terminator included
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The entry's size
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the entry equals `text` read as ASCII plus a terminator
    pub fn eq_text(&self, text: &str) -> bool {
        let mut expected = text.as_bytes().to_vec();
        expected.push(0);
        self.data == expected
    }

    /// Replace the entry's bytes with `text` as ASCII plus a terminator.
    /// The owning table must be cleaned afterwards; use
    /// [StringTable::rename] for the combined edit.
    pub fn set_text(&mut self, text: &str) {
        self.data = text.as_bytes().to_vec();
        self.data.push(0);
    }

    /// Serialize the bytes verbatim
    pub fn write_to(&self, _root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        write(&self.data);
        Ok(self.data.len())
    }

    /// Every entry must end in a terminator
    pub fn verify(&self, _root: &ElfFile) -> bool {
        if self.data.last() != Some(&0) {
            log::error!("String entry {:?} was not null-terminated", self.data);
            return false;
        }
        true
    }
}

table_item!(StrItem);

impl crate::table::Record for StrItem {
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        StrItem::write_to(self, root, write)
    }

    fn verify(&self, root: &ElfFile) -> bool {
        StrItem::verify(self, root)
    }
}

/// A string table section body
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    /// The entries in offset order
    pub table: Table<StrItem>,
}

impl StringTable {
    /// Parse a string table from the section's bytes, splitting at each
    /// terminator
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut out = Self::default();
        out.table.parse(data, |idx, offset, tail| {
            let end = tail
                .iter()
                .position(|&b| b == 0)
                .ok_or(Error::UnterminatedString { offset })?;
            Ok(StrItem::new(idx, offset, tail[..=end].to_vec()))
        })?;
        Ok(out)
    }

    /// The table's serialized size
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// Get the identity of the entry at `offset`, synthesizing a
    /// suffix-sharing entry when the offset lands inside an existing one
    pub fn get_item_by_offset(&mut self, offset: usize) -> Result<ItemId> {
        if let Some(id) = self.table.id_at_offset(offset) {
            return Ok(id);
        }
        let closest = self
            .table
            .offsets()
            .filter(|&o| o < offset)
            .max()
            .ok_or(Error::NoItemAtOffset { offset })?;
        let diff = offset - closest;
        let source = self
            .table
            .id_at_offset(closest)
            .and_then(|id| self.table.by_id(id))
            .ok_or(Error::NoItemAtOffset { offset })?;
        if diff >= source.data.len() {
            return Err(Error::NoItemAtOffset { offset });
        }
        let suffix = source.data[diff..].to_vec();
        let item = StrItem::new(0, 0, suffix);
        let id = item.id;
        self.table.push(item);
        Ok(id)
    }

    /// The entry equal to `text`, if one exists
    pub fn find_text(&self, text: &str) -> Option<&StrItem> {
        self.table.iter().find(|item| item.eq_text(text))
    }

    /// Append a new entry holding `text` and return its identity
    pub fn add_string(&mut self, text: &str) -> ItemId {
        let mut item = StrItem::new(0, 0, vec![0]);
        item.set_text(text);
        let id = item.id;
        self.table.push(item);
        id
    }

    /// Replace the bytes of the entry with identity `id` and re-derive the
    /// table's offsets
    pub fn rename(&mut self, id: ItemId, text: &str) -> Result<()> {
        self.table
            .by_id_mut(id)
            .ok_or(Error::DanglingReference {
                name: "string".into(),
            })?
            .set_text(text);
        self.table.clean();
        Ok(())
    }

    /// Serialize the entries in order
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        self.table.write_to(root, write)
    }

    /// Table invariants plus per-entry termination
    pub fn verify(&self, root: &ElfFile) -> bool {
        self.table.verify(root)
    }

    /// Display all entries
    pub fn render(&self, _root: &ElfFile) -> Result<String> {
        let mut out = String::new();
        for item in self.table.iter() {
            out.push_str(&format!(
                "{}[{:x}]: {}\n",
                item.idx,
                item.offset,
                String::from_utf8_lossy(&item.data)
            ));
        }
        Ok(out)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    fn strtab() -> StringTable {
        StringTable::from_bytes(b"\0vfprintf\0main\0").unwrap()
    }

    #[test]
    fn test_parse_offsets() {
        let tab = strtab();
        assert_eq!(tab.table.len(), 3);
        assert_eq!(tab.table.get(0).unwrap().data(), b"\0");
        assert_eq!(tab.table.get(1).unwrap().data(), b"vfprintf\0");
        assert_eq!(tab.table.get(1).unwrap().offset, 1);
        assert_eq!(tab.table.get(2).unwrap().offset, 10);
        assert_eq!(tab.size(), 15);
    }

    #[test]
    fn test_suffix_share() {
        let mut tab = strtab();
        // Offset 3 lands inside "vfprintf": the "printf" suffix
        let id = tab.get_item_by_offset(3).unwrap();
        let item = tab.table.by_id(id).unwrap();
        assert_eq!(item.data(), b"printf\0");
        // The original item is intact
        assert_eq!(tab.table.get(1).unwrap().data(), b"vfprintf\0");
        assert_eq!(tab.table.len(), 4);
    }

    #[test]
    fn test_exact_offset_does_not_duplicate() {
        let mut tab = strtab();
        let id = tab.get_item_by_offset(10).unwrap();
        assert_eq!(tab.table.by_id(id).unwrap().data(), b"main\0");
        assert_eq!(tab.table.len(), 3);
    }

    #[test]
    fn test_rename_recomputes_offsets() {
        let mut tab = strtab();
        let id = tab.table.get(1).unwrap().id;
        tab.rename(id, "vsnprintf").unwrap();
        assert_eq!(tab.table.get(1).unwrap().data(), b"vsnprintf\0");
        assert_eq!(tab.table.get(2).unwrap().offset, 11);
    }

    #[test]
    fn test_find_and_add() {
        let mut tab = strtab();
        assert!(tab.find_text("main").is_some());
        assert!(tab.find_text("nope").is_none());
        let id = tab.add_string("libfoo.so.1");
        assert_eq!(tab.table.by_id(id).unwrap().data(), b"libfoo.so.1\0");
        assert!(tab.table.by_id(id).unwrap().verify(&crate::elf::ElfFile::empty()));
    }

    #[test]
    fn test_unterminated_is_error() {
        assert!(matches!(
            StringTable::from_bytes(b"\0abc"),
            Err(Error::UnterminatedString { .. })
        ));
    }
}
