//! The top-level ELF aggregate: parse order, reference resolution,
//! organize/verify orchestration, and serialization.
//!
//! Parsing proceeds file header, program header table, section header
//! table, then each section's typed body, and finishes by resolving every
//! record's references. Edits happen between parse and serialize; the
//! organize pass re-derives offsets, addresses and segment coverage so the
//! verify pass holds again before bytes are written.

pub mod header;
pub mod program;
pub mod section;
pub mod sections;

use std::collections::HashSet;
use std::io::{Seek, SeekFrom, Write};

use log::warn;
use num_traits::FromPrimitive;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::error::{Error, Result};
use crate::refs::{ActionKind, ItemRef, PlannedAction, RecordAddr, RefBinder, RefTarget, TableRef};
use crate::schema::Fields;
use crate::table::{Table, TableItem};

pub use header::FileHeader;
pub use program::{ProgramHeader, SegmentFlags, SegmentType};
pub use section::{SectionHeader, SectionType};
pub use sections::SectionBody;

use sections::{StrItem, StringTable, Symbol, SymbolTable};

/// A parsed ELF object file
#[derive(Debug, Clone)]
pub struct ElfFile {
    header: FileHeader,
    prog_headers: Table<ProgramHeader>,
    sect_headers: Table<SectionHeader>,
}

impl ElfFile {
    /// Parse an ELF file from raw bytes and resolve all references
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = FileHeader::parse(data)?;
        let class = header.fields.class;
        let encoding = header.fields.encoding;
        let mut file = Self {
            header,
            prog_headers: Table::new(),
            sect_headers: Table::new(),
        };

        let ph_start = file.header.fields.int("e_phoff")? as usize;
        let ph_len = (file.header.fields.int("e_phentsize")?
            * file.header.fields.int("e_phnum")?) as usize;
        let ph_data = data
            .get(ph_start..ph_start + ph_len)
            .ok_or(Error::TruncatedFile {
                what: "program header table".into(),
                offset: ph_start,
            })?;
        file.prog_headers.parse(ph_data, |idx, offset, tail| {
            ProgramHeader::parse(idx, offset, tail, class, encoding)
        })?;

        let sh_start = file.header.fields.int("e_shoff")? as usize;
        let sh_len = (file.header.fields.int("e_shentsize")?
            * file.header.fields.int("e_shnum")?) as usize;
        let sh_data = data
            .get(sh_start..sh_start + sh_len)
            .ok_or(Error::TruncatedFile {
                what: "section header table".into(),
                offset: sh_start,
            })?;
        file.sect_headers.parse(sh_data, |idx, offset, tail| {
            SectionHeader::parse(idx, offset, tail, class, encoding)
        })?;

        file.load_sections(data)?;
        file.resolve_references()?;
        Ok(file)
    }

    /// An ELF file with no contents, for exercising records in isolation
    pub(crate) fn empty() -> Self {
        Self {
            header: FileHeader {
                fields: Fields::new(ElfClass::Elf64, ElfDataEncoding::LittleEndian),
                refs: RefBinder::new(),
            },
            prog_headers: Table::new(),
            sect_headers: Table::new(),
        }
    }

    /// The file header
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// The program header table
    pub fn program_headers(&self) -> &Table<ProgramHeader> {
        &self.prog_headers
    }

    /// The program header table, mutably
    pub(crate) fn prog_headers_mut(&mut self) -> &mut Table<ProgramHeader> {
        &mut self.prog_headers
    }

    /// The section header table
    pub fn section_headers(&self) -> &Table<SectionHeader> {
        &self.sect_headers
    }

    /// The section header table, mutably
    pub(crate) fn sect_headers_mut(&mut self) -> &mut Table<SectionHeader> {
        &mut self.sect_headers
    }

    /// The file's word-size class
    pub fn class(&self) -> ElfClass {
        self.header.fields.class
    }

    /// The file's byte order
    pub fn encoding(&self) -> ElfDataEncoding {
        self.header.fields.encoding
    }

    fn load_sections(&mut self, data: &[u8]) -> Result<()> {
        let class = self.class();
        let encoding = self.encoding();
        let specs = self
            .sect_headers
            .iter()
            .map(|h| {
                Ok((
                    h.sh_type(),
                    h.fields.int("sh_offset")? as usize,
                    h.fields.int("sh_size")? as usize,
                    self.sect_headers.id_at(h.fields.int("sh_link")? as usize),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        for (pos, (sh_type, offset, size, link)) in specs.into_iter().enumerate() {
            let start = offset.min(data.len());
            let end = (offset + size).min(data.len());
            let body = SectionBody::parse(
                SectionType::from_u64(sh_type),
                &data[start..end],
                class,
                encoding,
                link,
                size,
            )?;
            if let Some(header) = self.sect_headers.get_mut(pos) {
                header.body = body;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reference resolution
    // ------------------------------------------------------------------

    /// Resolve every record's references: plan against the immutable file,
    /// then install the computed links
    pub fn resolve_references(&mut self) -> Result<()> {
        let mut actions = Vec::new();
        actions.extend(self.header.plan(self)?);
        for (pos, h) in self.sect_headers.iter().enumerate() {
            actions.extend(h.plan(RecordAddr::SectionHeader(pos), self)?);
        }
        for (pos, h) in self.sect_headers.iter().enumerate() {
            actions.extend(h.body.plan(pos, self)?);
        }
        self.apply_actions(actions)
    }

    fn apply_actions(&mut self, actions: Vec<PlannedAction>) -> Result<()> {
        enum Installed {
            Idx(ItemRef),
            Off(ItemRef),
            Field(RefTarget, String),
        }
        let mut resolved = Vec::new();
        for action in actions {
            match action.kind {
                ActionKind::Idx { table, index } => {
                    let len = self.table_len(&table)?;
                    if index as usize >= len {
                        warn!(
                            "Requested index for {} {} is out of bounds (0, {})",
                            action.name, index, len
                        );
                        continue;
                    }
                    let Some(item) = self.table_id_at(&table, index as usize) else {
                        continue;
                    };
                    resolved.push((
                        action.addr,
                        action.name,
                        Installed::Idx(ItemRef { table, item }),
                    ));
                }
                ActionKind::Off { table, offset } => {
                    let item = self.ensure_item_at_offset(&table, offset as usize)?;
                    resolved.push((
                        action.addr,
                        action.name,
                        Installed::Off(ItemRef { table, item }),
                    ));
                }
                ActionKind::FieldSearch {
                    table,
                    other_field,
                    value,
                } => {
                    let item = self.search_field(&table, &other_field, value)?;
                    resolved.push((
                        action.addr,
                        action.name,
                        Installed::Field(RefTarget::Item(ItemRef { table, item }), other_field),
                    ));
                }
                ActionKind::FieldTable { table, other_field } => {
                    resolved.push((
                        action.addr,
                        action.name,
                        Installed::Field(RefTarget::Table(table), other_field),
                    ));
                }
            }
        }
        for (addr, name, installed) in resolved {
            let Some((fields, refs)) = self.record_parts_mut(addr) else {
                continue;
            };
            fields.take(&name);
            match installed {
                Installed::Idx(target) => refs.install_idx(&name, target),
                Installed::Off(target) => refs.install_off(&name, target),
                Installed::Field(target, other_field) => {
                    refs.install_field(&name, target, &other_field)
                }
            }
        }
        Ok(())
    }

    fn record_parts_mut(
        &mut self,
        addr: RecordAddr,
    ) -> Option<(&mut Fields, &mut RefBinder)> {
        match addr {
            RecordAddr::FileHeader => Some((&mut self.header.fields, &mut self.header.refs)),
            RecordAddr::ProgramHeader(_) => None,
            RecordAddr::SectionHeader(pos) => self
                .sect_headers
                .get_mut(pos)
                .map(|h| (&mut h.fields, &mut h.refs)),
            RecordAddr::SectionItem { section, item } => self
                .sect_headers
                .get_mut(section)
                .and_then(|h| h.body.item_parts_mut(item)),
            RecordAddr::VerNeedMain { section, entry } => {
                match self.sect_headers.get_mut(section).map(|h| &mut h.body) {
                    Some(SectionBody::VerNeed(b)) => b
                        .table
                        .get_mut(entry)
                        .map(|e| (&mut e.need.fields, &mut e.need.refs)),
                    _ => None,
                }
            }
            RecordAddr::VerNeedAux { section, entry, aux } => {
                match self.sect_headers.get_mut(section).map(|h| &mut h.body) {
                    Some(SectionBody::VerNeed(b)) => b
                        .table
                        .get_mut(entry)
                        .and_then(|e| e.aux.get_mut(aux))
                        .map(|a| (&mut a.fields, &mut a.refs)),
                    _ => None,
                }
            }
        }
    }

    /// Evaluate a schema table lookup for the record at `addr`
    pub fn eval_lookup(&self, name: &str, addr: RecordAddr) -> Result<Option<TableRef>> {
        match name {
            "get_section_list" | "get_sect_headers" | "get_sheaders" => {
                Ok(Some(TableRef::SectionHeaders))
            }
            "get_segment_list" => Ok(Some(TableRef::ProgramHeaders)),
            "get_shstrtab" => {
                let idx = self.header.get("e_shstrndx", self)? as usize;
                Ok(self.sect_headers.id_at(idx).map(TableRef::SectionBody))
            }
            "get_strtab" | "get_symtab" => {
                let section = match addr {
                    RecordAddr::SectionItem { section, .. }
                    | RecordAddr::VerNeedMain { section, .. }
                    | RecordAddr::VerNeedAux { section, .. } => Some(section),
                    _ => None,
                };
                Ok(section
                    .and_then(|pos| self.section_link_target(pos))
                    .map(TableRef::SectionBody))
            }
            "dynstr_ref" => {
                let RecordAddr::SectionItem { section, .. } = addr else {
                    return Ok(None);
                };
                let Some(dynamic) = self
                    .sect_headers
                    .get(section)
                    .and_then(|h| h.body.as_dynamic())
                else {
                    return Ok(None);
                };
                let id = dynamic.find_section_by_ptr_tag(self, sections::dynamic::DT_STRTAB)?;
                Ok(Some(TableRef::SectionBody(id)))
            }
            _ => Err(Error::MissingTableLookup {
                name: name.into(),
                field: String::new(),
            }),
        }
    }

    /// The identity of the section header a section body's `sh_link`
    /// pointed at
    fn section_link_target(&self, section: usize) -> Option<ItemId> {
        match self.sect_headers.get(section).map(|h| &h.body)? {
            SectionBody::SymTab(b) => b.strtab,
            SectionBody::Rela(b) => b.symtab,
            SectionBody::VerSym(b) => b.symtab,
            SectionBody::VerNeed(b) => b.strtab,
            SectionBody::GnuHash(b) => b.symtab,
            _ => None,
        }
    }

    fn table_len(&self, table: &TableRef) -> Result<usize> {
        match table {
            TableRef::ProgramHeaders => Ok(self.prog_headers.len()),
            TableRef::SectionHeaders => Ok(self.sect_headers.len()),
            TableRef::SectionBody(id) => {
                let pos = self
                    .sect_headers
                    .position_of(*id)
                    .ok_or(Error::DanglingReference {
                        name: "section body".into(),
                    })?;
                self.sect_headers
                    .get(pos)
                    .and_then(|h| h.body.table_len())
                    .ok_or(Error::SectionBodyNotTable { idx: pos })
            }
        }
    }

    fn table_id_at(&self, table: &TableRef, idx: usize) -> Option<ItemId> {
        match table {
            TableRef::ProgramHeaders => self.prog_headers.id_at(idx),
            TableRef::SectionHeaders => self.sect_headers.id_at(idx),
            TableRef::SectionBody(id) => self
                .section_header_by_id(*id)
                .and_then(|h| h.body.id_at(idx)),
        }
    }

    fn ensure_item_at_offset(&mut self, table: &TableRef, offset: usize) -> Result<ItemId> {
        match table {
            TableRef::ProgramHeaders => self
                .prog_headers
                .id_at_offset(offset)
                .ok_or(Error::NoItemAtOffset { offset }),
            TableRef::SectionHeaders => self
                .sect_headers
                .id_at_offset(offset)
                .ok_or(Error::NoItemAtOffset { offset }),
            TableRef::SectionBody(id) => {
                let pos = self
                    .sect_headers
                    .position_of(*id)
                    .ok_or(Error::DanglingReference {
                        name: "section body".into(),
                    })?;
                self.sect_headers
                    .get_mut(pos)
                    .ok_or(Error::SectionBodyNotTable { idx: pos })?
                    .body
                    .ensure_item_at_offset(offset)
            }
        }
    }

    fn search_field(&self, table: &TableRef, other_field: &str, value: u64) -> Result<ItemId> {
        match table {
            TableRef::SectionHeaders => self
                .sect_headers
                .iter()
                .find(|h| h.get(other_field, self).ok() == Some(value))
                .map(SectionHeader::id)
                .ok_or(Error::FieldSearchMiss {
                    field: other_field.into(),
                    value,
                }),
            _ => Err(Error::ReferencedNonTable {
                field: other_field.into(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Reference reads
    // ------------------------------------------------------------------

    /// The current index of a referenced item
    pub fn item_idx(&self, target: &ItemRef) -> Result<usize> {
        let pos = match target.table {
            TableRef::ProgramHeaders => self.prog_headers.position_of(target.item),
            TableRef::SectionHeaders => self.sect_headers.position_of(target.item),
            TableRef::SectionBody(id) => self
                .section_header_by_id(id)
                .and_then(|h| h.body.position_of(target.item)),
        };
        pos.ok_or(Error::DanglingReference {
            name: "item".into(),
        })
    }

    /// The current offset of a referenced item
    pub fn item_offset(&self, target: &ItemRef) -> Result<usize> {
        let offset = match target.table {
            TableRef::ProgramHeaders => {
                self.prog_headers.by_id(target.item).map(TableItem::offset)
            }
            TableRef::SectionHeaders => {
                self.sect_headers.by_id(target.item).map(TableItem::offset)
            }
            TableRef::SectionBody(id) => self
                .section_header_by_id(id)
                .and_then(|h| h.body.offset_of(target.item)),
        };
        offset.ok_or(Error::DanglingReference {
            name: "item".into(),
        })
    }

    /// The current value of a field on a referenced item
    pub fn item_field(&self, target: &ItemRef, field: &str) -> Result<u64> {
        match target.table {
            TableRef::SectionHeaders => self
                .sect_headers
                .by_id(target.item)
                .ok_or(Error::DanglingReference {
                    name: field.into(),
                })?
                .get(field, self),
            _ => Err(Error::ReferencedNonTable {
                field: field.into(),
            }),
        }
    }

    /// The string-table item a reference points at
    pub fn str_item(&self, target: &ItemRef) -> Result<&StrItem> {
        let TableRef::SectionBody(id) = target.table else {
            return Err(Error::ReferencedNonTable {
                field: "string".into(),
            });
        };
        let pos = self
            .sect_headers
            .position_of(id)
            .ok_or(Error::DanglingReference {
                name: "string table".into(),
            })?;
        self.sect_headers
            .get(pos)
            .and_then(|h| h.body.as_strtab())
            .ok_or(Error::SectionBodyNotTable { idx: pos })?
            .table
            .by_id(target.item)
            .ok_or(Error::DanglingReference {
                name: "string".into(),
            })
    }

    /// The symbol a reference points at
    pub fn symbol_by_ref(&self, target: &ItemRef) -> Option<&Symbol> {
        let TableRef::SectionBody(id) = target.table else {
            return None;
        };
        self.section_header_by_id(id)?
            .body
            .as_symtab()?
            .table
            .by_id(target.item)
    }

    // ------------------------------------------------------------------
    // Navigation helpers
    // ------------------------------------------------------------------

    /// The section header with the given identity
    pub fn section_header_by_id(&self, id: ItemId) -> Option<&SectionHeader> {
        self.sect_headers.by_id(id)
    }

    /// The position of the section whose name equals `name`
    pub fn section_pos_by_name(&self, name: &str) -> Result<usize> {
        self.sect_headers
            .iter()
            .position(|h| h.name_matches(self, name))
            .ok_or_else(|| Error::SectionNotFound { name: name.into() })
    }

    /// The symbol table owned by the section header with the given identity
    pub fn symtab_by_header_id(&self, id: ItemId) -> Option<&SymbolTable> {
        self.section_header_by_id(id)?.body.as_symtab()
    }

    /// The string table owned by the section header with the given
    /// identity, mutably
    pub(crate) fn strtab_mut_by_header_id(&mut self, id: ItemId) -> Result<&mut StringTable> {
        let pos = self
            .sect_headers
            .position_of(id)
            .ok_or(Error::DanglingReference {
                name: "string table".into(),
            })?;
        self.sect_headers
            .get_mut(pos)
            .and_then(|h| h.body.as_strtab_mut())
            .ok_or(Error::SectionBodyNotTable { idx: pos })
    }

    /// Every `vna_other` version value exposed by the verneed section
    pub fn verneed_versions(&self) -> HashSet<u64> {
        self.sect_headers
            .iter()
            .filter_map(|h| h.body.as_verneed())
            .flat_map(|b| b.versions().collect::<Vec<_>>())
            .collect()
    }

    /// The name bound to a verneed version value
    pub fn verneed_version_name(&self, version: u64) -> Option<String> {
        self.sect_headers
            .iter()
            .filter_map(|h| h.body.as_verneed())
            .find_map(|b| b.version_name(self, version))
    }

    // ------------------------------------------------------------------
    // Organize / verify / serialize
    // ------------------------------------------------------------------

    /// Re-derive offsets, addresses and segment coverage so the verify pass
    /// holds again after structural edits
    pub fn organize(&mut self) -> Result<()> {
        self.organize_file_header()?;
        self.organize_section_bodies()?;
        self.organize_section_headers()?;
        self.organize_program_headers()?;
        Ok(())
    }

    /// Sync the header's table counts with the tables, deconflict section
    /// overlaps, and place the section header table past the last section
    fn organize_file_header(&mut self) -> Result<()> {
        self.sync_section_sizes();
        self.organize_section_headers()?;
        // The last section isn't always the last one in the list
        let mut last_off = 0;
        for h in self.sect_headers.iter() {
            let end = h.fields.int("sh_offset")? + h.fields.int("sh_size")?;
            if end > last_off {
                last_off = end;
            }
        }
        self.header.fields.set_int("e_shoff", last_off);
        let phnum = self.prog_headers.len() as u64;
        let shnum = self.sect_headers.len() as u64;
        self.header.fields.set_int("e_phnum", phnum);
        self.header.fields.set_int("e_shnum", shnum);
        Ok(())
    }

    /// Bring each header's `sh_size` back in line with its body, which may
    /// have grown or shrunk under edits
    fn sync_section_sizes(&mut self) {
        for pos in 0..self.sect_headers.len() {
            let size = match self.sect_headers.get(pos) {
                Some(h) if !h.body.is_nobits() => h.body.size() as u64,
                _ => continue,
            };
            if let Some(h) = self.sect_headers.get_mut(pos) {
                h.fields.set_int("sh_size", size);
            }
        }
    }

    fn organize_section_bodies(&mut self) -> Result<()> {
        for pos in 0..self.sect_headers.len() {
            enum Kind {
                Clean,
                VerSym,
                GnuHash,
                Other,
            }
            let kind = match self.sect_headers.get(pos).map(|h| &h.body) {
                Some(
                    SectionBody::StrTab(_)
                    | SectionBody::SymTab(_)
                    | SectionBody::Rela(_)
                    | SectionBody::Dynamic(_),
                ) => Kind::Clean,
                Some(SectionBody::VerSym(_)) => Kind::VerSym,
                Some(SectionBody::GnuHash(_)) => Kind::GnuHash,
                _ => Kind::Other,
            };
            match kind {
                Kind::Clean => {
                    if let Some(h) = self.sect_headers.get_mut(pos) {
                        match &mut h.body {
                            SectionBody::StrTab(b) => b.table.clean(),
                            SectionBody::SymTab(b) => b.table.clean(),
                            SectionBody::Rela(b) => b.table.clean(),
                            SectionBody::Dynamic(b) => b.table.clean(),
                            _ => {}
                        }
                    }
                }
                Kind::VerSym => {
                    let known = self.verneed_versions();
                    if let Some(SectionBody::VerSym(b)) =
                        self.sect_headers.get_mut(pos).map(|h| &mut h.body)
                    {
                        b.organize_with(&known);
                    }
                }
                Kind::GnuHash => self.organize_gnu_hash(pos)?,
                Kind::Other => {}
            }
        }
        Ok(())
    }

    /// Rebuild a GNU hash section: partition its symbol table into
    /// non-hashed and hashed symbols, sort the hashed ones by (bucket,
    /// hash), rewrite the symbol table in that order, and recompute the
    /// bloom, bucket and chain arrays
    fn organize_gnu_hash(&mut self, pos: usize) -> Result<()> {
        let (symtab_id, nbuckets) = match self.sect_headers.get(pos).map(|h| &h.body) {
            Some(SectionBody::GnuHash(b)) => (
                b.symtab.ok_or(Error::DanglingReference {
                    name: "gnu hash symtab".into(),
                })?,
                b.fields.int("nbuckets")? as usize,
            ),
            _ => return Ok(()),
        };
        let symtab_pos = self
            .sect_headers
            .position_of(symtab_id)
            .ok_or(Error::DanglingReference {
                name: "gnu hash symtab".into(),
            })?;
        let symtab = self
            .sect_headers
            .get(symtab_pos)
            .and_then(|h| h.body.as_symtab())
            .ok_or(Error::SectionBodyNotTable { idx: symtab_pos })?;

        let mut irrelevant = Vec::new();
        let mut relevant = Vec::new();
        for (i, sym) in symtab.table.iter().enumerate() {
            let needs_hash = sym.get("st_shndx", self).map(|v| v != 0).unwrap_or(false);
            if needs_hash {
                let hash = sections::gnu_hash::gnu_hash(sym.name_bytes(self)?);
                relevant.push((i, hash));
            } else {
                irrelevant.push(i);
            }
        }
        let bucket_of = |hash: u32| -> usize {
            if nbuckets == 0 {
                0
            } else {
                hash as usize % nbuckets
            }
        };
        relevant.sort_by_key(|&(_, hash)| (bucket_of(hash), hash));

        let symoffset = irrelevant.len();
        let mut order = irrelevant;
        order.extend(relevant.iter().map(|&(i, _)| i));
        let hashes = relevant.iter().map(|&(_, h)| h).collect::<Vec<_>>();

        if let Some(SectionBody::SymTab(b)) =
            self.sect_headers.get_mut(symtab_pos).map(|h| &mut h.body)
        {
            b.table.reorder(&order)?;
        }
        if let Some(SectionBody::GnuHash(b)) =
            self.sect_headers.get_mut(pos).map(|h| &mut h.body)
        {
            b.rebuild(symoffset, &hashes);
        }
        Ok(())
    }

    /// Check every invariant: the file header, both tables, and each
    /// section body
    pub fn verify(&self) -> bool {
        let mut out = self.header.verify(self);
        out &= self.verify_program_headers();
        out &= self.verify_section_headers();
        for h in self.sect_headers.iter() {
            out &= h.body.verify(self);
        }
        out
    }

    /// Serialize the file: header at 0, the tables at their recorded
    /// offsets, each section body at its `sh_offset`, padding with zeros
    /// whenever a target offset exceeds the bytes written so far
    pub fn to_bytes<W: Write + Seek>(&self, f: &mut W) -> Result<()> {
        let mut file_size = 0;

        let mut buf = Vec::new();
        self.header.write_to(self, &mut |b| buf.extend_from_slice(b))?;
        file_size = emit(f, 0, &buf, file_size)?;

        let mut buf = Vec::new();
        self.prog_headers
            .write_to(self, &mut |b| buf.extend_from_slice(b))?;
        file_size = emit(f, self.header.fields.int("e_phoff")?, &buf, file_size)?;

        let mut buf = Vec::new();
        self.sect_headers
            .write_to(self, &mut |b| buf.extend_from_slice(b))?;
        file_size = emit(f, self.header.fields.int("e_shoff")?, &buf, file_size)?;

        for h in self.sect_headers.iter() {
            let mut buf = Vec::new();
            h.body.write_to(self, &mut |b| buf.extend_from_slice(b))?;
            file_size = emit(f, h.fields.int("sh_offset")?, &buf, file_size)?;
        }
        Ok(())
    }
}

/// Write `bytes` at `offset`, zero-padding when the offset lies past the
/// current end of the file. Returns the new logical file size.
fn emit<W: Write + Seek>(f: &mut W, offset: u64, bytes: &[u8], file_size: u64) -> Result<u64> {
    if offset > file_size {
        f.seek(SeekFrom::End(0))?;
        let pad = vec![0u8; (offset - file_size) as usize];
        f.write_all(&pad)?;
    }
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(bytes)?;
    Ok((offset + bytes.len() as u64).max(file_size))
}
