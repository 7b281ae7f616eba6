//! Reference resolution.
//!
//! Some fields semantically point at entries in other tables: by index, by
//! byte offset, or by matching a field value. After resolution the raw
//! scalar is removed from the record and replaced by a typed link, so a read
//! of the original field name returns the target's *current* index, offset,
//! or field value. Edits that move a target item keep every referring field
//! correct at serialization time.
//!
//! Records do not hold parent pointers; links address their target as
//! (table, stable item id) and are read back through the file root, which is
//! passed in wherever a current value is needed. Resolution itself runs as
//! plan-then-apply over the whole file: lookups are evaluated against the
//! immutable file, then the computed links are installed.

use std::collections::BTreeMap;

use crate::base::ItemId;
use crate::elf::ElfFile;
use crate::error::{Error, Result};
use crate::schema::{Fields, RecordSchema};

/// A table within the file that a reference can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRef {
    /// The program header table
    ProgramHeaders,
    /// The section header table
    SectionHeaders,
    /// The table-typed body of the section header with this identity
    SectionBody(ItemId),
}

/// A link to one item of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    /// The table holding the target
    pub table: TableRef,
    /// The target item's stable identity
    pub item: ItemId,
}

/// What a field reference resolved to: a matched item when searching, or the
/// table itself for `no_search` references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// A single matched item
    Item(ItemRef),
    /// The whole table
    Table(TableRef),
}

/// The resolved references of one record, in three per-kind maps keyed by
/// field name
#[derive(Debug, Clone, Default)]
pub struct RefBinder {
    idx: BTreeMap<String, ItemRef>,
    off: BTreeMap<String, ItemRef>,
    field: BTreeMap<String, (RefTarget, String)>,
}

impl RefBinder {
    /// An empty binder
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an idx-reference for `name`
    pub fn install_idx(&mut self, name: &str, target: ItemRef) {
        self.idx.insert(name.into(), target);
    }

    /// Install an off-reference for `name`
    pub fn install_off(&mut self, name: &str, target: ItemRef) {
        self.off.insert(name.into(), target);
    }

    /// Install a field-reference for `name`
    pub fn install_field(&mut self, name: &str, target: RefTarget, other_field: &str) {
        self.field.insert(name.into(), (target, other_field.into()));
    }

    /// Whether `name` has been resolved
    pub fn has(&self, name: &str) -> bool {
        self.idx.contains_key(name) || self.off.contains_key(name) || self.field.contains_key(name)
    }

    /// Read the current value of a resolved reference: the target's index,
    /// offset, or field value. `Ok(None)` when `name` is not a reference.
    pub fn read(&self, name: &str, root: &ElfFile) -> Result<Option<u64>> {
        if let Some(target) = self.idx.get(name) {
            return Ok(Some(root.item_idx(target).map_err(|_| {
                Error::DanglingReference { name: name.into() }
            })? as u64));
        }
        if let Some(target) = self.off.get(name) {
            return Ok(Some(root.item_offset(target).map_err(|_| {
                Error::DanglingReference { name: name.into() }
            })? as u64));
        }
        if let Some((target, other_field)) = self.field.get(name) {
            return match target {
                RefTarget::Item(item) => Ok(Some(root.item_field(item, other_field)?)),
                RefTarget::Table(_) => Err(Error::ReferencedNonTable { field: name.into() }),
            };
        }
        Ok(None)
    }

    /// The object a resolved reference points at
    pub fn referenced(&self, name: &str) -> Result<RefTarget> {
        if let Some(target) = self.idx.get(name) {
            return Ok(RefTarget::Item(*target));
        }
        if let Some(target) = self.off.get(name) {
            return Ok(RefTarget::Item(*target));
        }
        if let Some((target, _)) = self.field.get(name) {
            return Ok(*target);
        }
        Err(Error::UnknownReference { name: name.into() })
    }

    /// The referenced item, for references that must point at one
    pub fn referenced_item(&self, name: &str) -> Result<ItemRef> {
        match self.referenced(name)? {
            RefTarget::Item(item) => Ok(item),
            RefTarget::Table(_) => Err(Error::ReferencedNonTable { field: name.into() }),
        }
    }
}

/// The location of a record within the file, used to install planned
/// references and to give lookups their context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAddr {
    /// The file header
    FileHeader,
    /// A program header, by table position
    ProgramHeader(usize),
    /// A section header, by table position
    SectionHeader(usize),
    /// An item of a table-typed section body
    SectionItem {
        /// The owning section header's table position
        section: usize,
        /// The item's table position
        item: usize,
    },
    /// The fixed record of a verneed entry
    VerNeedMain {
        /// The owning section header's table position
        section: usize,
        /// The entry's table position
        entry: usize,
    },
    /// An auxiliary record of a verneed entry
    VerNeedAux {
        /// The owning section header's table position
        section: usize,
        /// The entry's table position
        entry: usize,
        /// The auxiliary's position within the entry
        aux: usize,
    },
}

/// One reference to resolve, as computed by the planning pass
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// Where the referring record lives
    pub addr: RecordAddr,
    /// The referring field
    pub name: String,
    /// How to locate the target
    pub kind: ActionKind,
}

/// How a planned reference locates its target
#[derive(Debug, Clone)]
pub enum ActionKind {
    /// Index into the target table
    Idx {
        /// The target table
        table: TableRef,
        /// The raw index
        index: u64,
    },
    /// Offset into the target table
    Off {
        /// The target table
        table: TableRef,
        /// The raw byte offset
        offset: u64,
    },
    /// Scan the target table for an item whose `other_field` matches
    FieldSearch {
        /// The target table
        table: TableRef,
        /// The field to match on the target
        other_field: String,
        /// The value to match
        value: u64,
    },
    /// Bind the table itself
    FieldTable {
        /// The target table
        table: TableRef,
        /// The field read through the table binding
        other_field: String,
    },
}

/// Compute the references a record wants resolved. Fields outside the
/// enabled set are skipped, as are values in the per-field ignore sets.
pub fn plan_record(
    schema: &RecordSchema,
    fields: &Fields,
    addr: RecordAddr,
    root: &ElfFile,
) -> Result<Vec<PlannedAction>> {
    let mut out = Vec::new();
    for (name, lookup) in &schema.idx_refs {
        if !fields.has(name) {
            continue;
        }
        let Some(table) = root.eval_lookup(lookup, addr)? else {
            continue;
        };
        let value = fields.int(name)?;
        if schema.is_ignored(name, &crate::schema::Value::Int(value)) {
            continue;
        }
        out.push(PlannedAction {
            addr,
            name: name.clone(),
            kind: ActionKind::Idx {
                table,
                index: value,
            },
        });
    }
    for (name, lookup) in &schema.off_refs {
        if !fields.has(name) {
            continue;
        }
        let Some(table) = root.eval_lookup(lookup, addr)? else {
            continue;
        };
        let value = fields.int(name)?;
        if schema.is_ignored(name, &crate::schema::Value::Int(value)) {
            continue;
        }
        out.push(PlannedAction {
            addr,
            name: name.clone(),
            kind: ActionKind::Off {
                table,
                offset: value,
            },
        });
    }
    for (name, spec) in &schema.field_refs {
        if !fields.has(name) {
            continue;
        }
        let Some(table) = root.eval_lookup(&spec.lookup, addr)? else {
            continue;
        };
        let kind = if spec.search {
            let value = fields.int(name)?;
            if schema.is_ignored(name, &crate::schema::Value::Int(value)) {
                continue;
            }
            ActionKind::FieldSearch {
                table,
                other_field: spec.other_field.clone(),
                value,
            }
        } else {
            ActionKind::FieldTable {
                table,
                other_field: spec.other_field.clone(),
            }
        };
        out.push(PlannedAction {
            addr,
            name: name.clone(),
            kind,
        });
    }
    Ok(out)
}
