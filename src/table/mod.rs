//! Homogeneous ordered sequences of records with index and offset
//! bookkeeping.
//!
//! Items carry their own `idx` and `offset`; `clean()` re-derives both for
//! every item and rebuilds the offset map, so after any structural edit the
//! invariants hold again: `items[i].idx == i`, `items[0].offset == 0`, and
//! each offset is the previous offset plus the previous item's size.

use std::collections::HashMap;

use log::error;

use crate::base::ItemId;
use crate::elf::ElfFile;
use crate::error::{Error, Result};

/// A record that can live in a [Table]: it knows its identity, its position
/// bookkeeping, and its serialized size
pub trait TableItem {
    /// The item's stable identity
    fn id(&self) -> ItemId;
    /// The item's index within its table
    fn idx(&self) -> usize;
    /// Renumber the item
    fn set_idx(&mut self, idx: usize);
    /// The item's byte offset within its table
    fn offset(&self) -> usize;
    /// Reposition the item
    fn set_offset(&mut self, offset: usize);
    /// The item's serialized size in bytes
    fn size(&self) -> usize;
}

/// A table item that can be serialized and verified against the file root
pub trait Record: TableItem {
    /// Serialize the item, handing each buffer to `write`; returns the
    /// number of bytes written
    fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize>;

    /// Check the item's own invariants
    fn verify(&self, _root: &ElfFile) -> bool {
        true
    }
}

/// Implement [TableItem] for a record struct carrying `id`, `idx` and
/// `offset` fields and an inherent `size()` method.
#[macro_export]
macro_rules! table_item {
    ($ty:ty) => {
        impl $crate::table::TableItem for $ty {
            fn id(&self) -> $crate::base::ItemId {
                self.id
            }

            fn idx(&self) -> usize {
                self.idx
            }

            fn set_idx(&mut self, idx: usize) {
                self.idx = idx;
            }

            fn offset(&self) -> usize {
                self.offset
            }

            fn set_offset(&mut self, offset: usize) {
                self.offset = offset;
            }

            fn size(&self) -> usize {
                self.size()
            }
        }
    };
}

/// An ordered sequence of items plus an offset-to-item map
#[derive(Debug, Clone)]
pub struct Table<T> {
    items: Vec<T>,
    offset_to_item: HashMap<usize, ItemId>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            offset_to_item: HashMap::new(),
        }
    }
}

impl<T: TableItem> Table<T> {
    /// An empty table
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            offset_to_item: HashMap::new(),
        }
    }

    /// The number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The item at `idx`
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.items.get(idx)
    }

    /// The item at `idx`, mutably
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.items.get_mut(idx)
    }

    /// Iterate the items in order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Iterate the items in order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// The item with the given identity
    pub fn by_id(&self, id: ItemId) -> Option<&T> {
        self.items.iter().find(|i| i.id() == id)
    }

    /// The item with the given identity, mutably
    pub fn by_id_mut(&mut self, id: ItemId) -> Option<&mut T> {
        self.items.iter_mut().find(|i| i.id() == id)
    }

    /// The position of the item with the given identity
    pub fn position_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|i| i.id() == id)
    }

    /// The identity of the item at `idx`
    pub fn id_at(&self, idx: usize) -> Option<ItemId> {
        self.items.get(idx).map(TableItem::id)
    }

    /// The identity of the item recorded at exactly `offset`
    pub fn id_at_offset(&self, offset: usize) -> Option<ItemId> {
        self.offset_to_item.get(&offset).copied()
    }

    /// The recorded offsets, for closest-preceding-offset searches
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.offset_to_item.keys().copied()
    }

    /// Parse items from a contiguous byte blob: repeatedly instantiate an
    /// item at the current (idx, offset) from the tail of the buffer until
    /// the buffer is exhausted
    pub fn parse<F>(&mut self, data: &[u8], mut make: F) -> Result<()>
    where
        F: FnMut(usize, usize, &[u8]) -> Result<T>,
    {
        let mut offset = 0;
        let mut idx = 0;
        while offset < data.len() {
            let item = make(idx, offset, &data[offset..])?;
            let size = item.size();
            if size == 0 {
                return Err(Error::ZeroSizeItem { offset });
            }
            self.offset_to_item.insert(offset, item.id());
            self.items.push(item);
            offset += size;
            idx += 1;
        }
        Ok(())
    }

    /// Re-derive `idx` and `offset` for all items and rebuild the offset map
    pub fn clean(&mut self) {
        let mut offset = 0;
        self.offset_to_item.clear();
        for (idx, item) in self.items.iter_mut().enumerate() {
            item.set_idx(idx);
            item.set_offset(offset);
            self.offset_to_item.insert(offset, item.id());
            offset += item.size();
        }
    }

    /// Insert an item at `idx` and re-derive the bookkeeping
    pub fn insert(&mut self, idx: usize, item: T) {
        self.items.insert(idx, item);
        self.clean();
    }

    /// Append an item and re-derive the bookkeeping
    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.clean();
    }

    /// Remove the item at `idx` and re-derive the bookkeeping
    pub fn remove(&mut self, idx: usize) -> T {
        let item = self.items.remove(idx);
        self.clean();
        item
    }

    /// Rearrange the items so position `i` holds what was at `order[i]`,
    /// then re-derive the bookkeeping. `order` must be a permutation.
    pub fn reorder(&mut self, order: &[usize]) -> Result<()> {
        if order.len() != self.items.len() {
            return Err(Error::BadReorder);
        }
        let mut old = self.items.drain(..).map(Some).collect::<Vec<_>>();
        let mut new = Vec::with_capacity(old.len());
        for &pos in order {
            match old.get_mut(pos).and_then(Option::take) {
                Some(item) => new.push(item),
                None => return Err(Error::BadReorder),
            }
        }
        self.items = new;
        self.clean();
        Ok(())
    }

    /// The table's serialized size: the sum of item sizes
    pub fn size(&self) -> usize {
        self.items.iter().map(TableItem::size).sum()
    }

    /// Check the index/offset/offset-map invariants
    pub fn verify_layout(&self) -> bool {
        let mut out = true;
        let mut offset = 0;
        for (i, item) in self.items.iter().enumerate() {
            if item.idx() != i {
                error!("Index mismatch: expected {} but found {}", i, item.idx());
                out = false;
            }
            if item.offset() != offset {
                error!(
                    "Offset mismatch: expected {} but found {}",
                    offset,
                    item.offset()
                );
                out = false;
            } else if self.offset_to_item.get(&offset) != Some(&item.id()) {
                error!(
                    "Bad offset table: item {} was not available under offset {}",
                    i, offset
                );
                out = false;
            }
            offset += item.size();
        }
        out
    }
}

impl<T: Record> Table<T> {
    /// Serialize the items in order
    pub fn write_to(&self, root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        let mut out = 0;
        for item in &self.items {
            out += item.write_to(root, write)?;
        }
        Ok(out)
    }

    /// Check the layout invariants and every item's own invariants
    pub fn verify(&self, root: &ElfFile) -> bool {
        let mut out = self.verify_layout();
        for item in &self.items {
            out &= item.verify(root);
        }
        out
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::table_item;

    #[derive(Debug)]
    struct Blob {
        id: ItemId,
        idx: usize,
        offset: usize,
        len: usize,
    }

    impl Blob {
        fn new(len: usize) -> Self {
            Self {
                id: ItemId::fresh(),
                idx: 0,
                offset: 0,
                len,
            }
        }

        fn size(&self) -> usize {
            self.len
        }
    }

    table_item!(Blob);

    #[test]
    fn test_parse_assigns_indexes_and_offsets() {
        let mut table: Table<Blob> = Table::new();
        table
            .parse(&[0u8; 12], |idx, offset, _| {
                let mut item = Blob::new(4);
                item.idx = idx;
                item.offset = offset;
                Ok(item)
            })
            .unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.verify_layout());
        assert_eq!(table.get(2).unwrap().offset, 8);
    }

    #[test]
    fn test_zero_size_item_is_rejected() {
        let mut table: Table<Blob> = Table::new();
        let err = table
            .parse(&[0u8; 4], |_, _, _| Ok(Blob::new(0)))
            .unwrap_err();
        assert_eq!(err, Error::ZeroSizeItem { offset: 0 });
    }

    #[test]
    fn test_clean_rederives_after_insert() {
        let mut table = Table::new();
        table.push(Blob::new(4));
        table.push(Blob::new(2));
        table.insert(1, Blob::new(6));
        assert!(table.verify_layout());
        assert_eq!(table.get(1).unwrap().offset, 4);
        assert_eq!(table.get(2).unwrap().offset, 10);
        assert_eq!(table.get(2).unwrap().idx, 2);
        assert_eq!(table.size(), 12);
        let id = table.get(1).unwrap().id;
        assert_eq!(table.id_at_offset(4), Some(id));
    }

    #[test]
    fn test_remove_and_reorder() {
        let mut table = Table::new();
        for len in [1, 2, 3] {
            table.push(Blob::new(len));
        }
        let removed = table.remove(0);
        assert_eq!(removed.len, 1);
        assert!(table.verify_layout());
        table.reorder(&[1, 0]).unwrap();
        assert_eq!(table.get(0).unwrap().len, 3);
        assert_eq!(table.get(1).unwrap().offset, 3);
        assert!(table.reorder(&[0]).is_err());
        assert!(table.reorder(&[0, 0]).is_err());
    }

    #[test]
    fn test_by_id_tracks_reorder() {
        let mut table = Table::new();
        table.push(Blob::new(1));
        table.push(Blob::new(2));
        let id = table.get(0).unwrap().id;
        table.reorder(&[1, 0]).unwrap();
        assert_eq!(table.position_of(id), Some(1));
        assert_eq!(table.by_id(id).unwrap().offset, 2);
    }
}
