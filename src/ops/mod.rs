//! Manipulation operations: the declarative edits the command script can
//! apply to a loaded file.
//!
//! Each operation mutates the object graph only; offsets, addresses and
//! segment coverage are restored by the organize pass before serialization.

use std::collections::HashMap;

use log::info;

use crate::elf::sections::dynamic::{self, DT_STRTAB, DT_VERNEED, DT_VERSYM};
use crate::elf::{ElfFile, ProgramHeader, SegmentFlags};
use crate::error::{Error, Result};
use crate::refs::TableRef;
use crate::table::TableItem;

fn parse_hex(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|_| {
        Error::InvalidIntLiteral {
            value: value.into(),
        }
    })
}

/// The position of the section named `name`. Under the permissive policy a
/// missing section is `None` rather than an error.
pub fn find_section_pos(
    root: &ElfFile,
    section_name: &str,
    permissive: bool,
) -> Result<Option<usize>> {
    match root.section_pos_by_name(section_name) {
        Ok(pos) => Ok(Some(pos)),
        Err(_) if permissive => Ok(None),
        Err(e) => Err(e),
    }
}

fn get_symbol_pos(
    root: &ElfFile,
    symbol_name: &str,
    table_name: &str,
    permissive: bool,
) -> Result<Option<(usize, usize)>> {
    let Some(section) = find_section_pos(root, table_name, permissive)? else {
        return Ok(None);
    };
    let symtab = root
        .section_headers()
        .get(section)
        .and_then(|h| h.body.as_symtab())
        .ok_or(Error::SectionBodyNotTable { idx: section })?;
    match symtab.find_symbol(root, symbol_name) {
        Some(pos) => Ok(Some((section, pos))),
        None if permissive => Ok(None),
        None => Err(Error::SymbolNotFound {
            symbol: symbol_name.into(),
            table: table_name.into(),
        }),
    }
}

/// Rename a symbol inside one symbol table by rewriting the string-table
/// item its `st_name` references. Returns whether a rename happened.
pub fn rename_symbol_in_table(
    root: &mut ElfFile,
    old_name: &str,
    new_name: &str,
    table_name: &str,
    permissive: bool,
) -> Result<bool> {
    let Some((section, sym_pos)) = get_symbol_pos(root, old_name, table_name, permissive)? else {
        return Ok(false);
    };
    let target = root
        .section_headers()
        .get(section)
        .and_then(|h| h.body.as_symtab())
        .and_then(|tab| tab.table.get(sym_pos))
        .ok_or(Error::SymbolNotFound {
            symbol: old_name.into(),
            table: table_name.into(),
        })?
        .refs
        .referenced_item("st_name")?;
    let TableRef::SectionBody(strtab_id) = target.table else {
        return Err(Error::ReferencedNonTable {
            field: "st_name".into(),
        });
    };
    root.strtab_mut_by_header_id(strtab_id)?
        .rename(target.item, new_name)?;
    Ok(true)
}

/// Set a dynamic symbol's library version: validate the version against the
/// verneed auxiliaries, then write it into the versym entry at the symbol's
/// index. Returns whether a write happened.
pub fn set_symbol_library_version(
    root: &mut ElfFile,
    symbol_name: &str,
    version: i64,
    permissive: bool,
) -> Result<bool> {
    if !(0..1 << 16).contains(&version) {
        return Err(Error::VersionOutOfRange { version });
    }
    let version = version as u64;

    let Some((_, sym_pos)) = get_symbol_pos(root, symbol_name, ".dynsym", permissive)? else {
        return Ok(false);
    };

    let dynamic_pos = root.section_pos_by_name(".dynamic")?;
    let dynamic = root
        .section_headers()
        .get(dynamic_pos)
        .and_then(|h| h.body.as_dynamic())
        .ok_or(Error::SectionBodyNotTable { idx: dynamic_pos })?;
    let verneed_tags = dynamic.get_tags_by_id(DT_VERNEED);
    let versym_tags = dynamic.get_tags_by_id(DT_VERSYM);
    if verneed_tags.len() != 1 {
        return Err(Error::UnexpectedTagCount {
            tag: "verneed".into(),
            count: verneed_tags.len(),
        });
    }
    if versym_tags.len() != 1 {
        return Err(Error::UnexpectedTagCount {
            tag: "versym".into(),
            count: versym_tags.len(),
        });
    }

    let versym_header = dynamic.find_section_by_ptr_tag(root, DT_VERSYM)?;

    // Versions past the two reserved values must name a known dependency
    if version > 1 && !root.verneed_versions().contains(&version) {
        return Err(Error::UnknownVersionId { version });
    }

    let versym_pos =
        root.section_headers()
            .position_of(versym_header)
            .ok_or(Error::DanglingReference {
                name: "versym".into(),
            })?;
    root.sect_headers_mut()
        .get_mut(versym_pos)
        .and_then(|h| h.body.as_versym_mut())
        .ok_or(Error::SectionBodyNotTable { idx: versym_pos })?
        .table
        .get_mut(sym_pos)
        .ok_or(Error::SymbolNotFound {
            symbol: symbol_name.into(),
            table: ".gnu.version".into(),
        })?
        .assign(version);
    Ok(true)
}

/// Move a section to the end of the file: past the highest occupied file
/// offset and virtual address, aligned for both the section and the segment
/// that will map it
pub fn move_section_to_end(root: &mut ElfFile, section_name: &str, alignment: &str) -> Result<()> {
    let alignment = parse_hex(alignment)?;
    let pos = root.section_pos_by_name(section_name)?;

    let mut far_off = 0;
    let mut far_addr = 0;
    for item in root.section_headers().iter() {
        let end_off = item.fields.int("sh_offset")? + item.fields.int("sh_size")?;
        let end_addr = item.fields.int("sh_addr")? + item.fields.int("sh_size")?;
        if far_off < end_off {
            far_off = end_off;
        }
        if far_addr < end_addr {
            far_addr = end_addr;
        }
    }

    let (old_off, old_addr, sh_addralign) = {
        let header = root
            .section_headers()
            .get(pos)
            .ok_or(Error::SectionNotFound {
                name: section_name.into(),
            })?;
        (
            header.fields.int("sh_offset")?,
            header.fields.int("sh_addr")?,
            header.fields.int("sh_addralign")?,
        )
    };

    // Both the address and offset must be 0 mod sh_addralign
    if sh_addralign != 0 {
        let mod_addr = far_addr % sh_addralign;
        let mod_off = far_off % sh_addralign;
        if mod_addr != 0 {
            far_addr += sh_addralign - mod_addr;
        }
        if mod_off != 0 {
            far_off += sh_addralign - mod_off;
        }
    }

    // The address and offset must agree mod p_align so the segment mapping
    // this section can stay page-clean. The segment isn't known here, so the
    // caller provides its alignment.
    if alignment != 0 {
        let mod_addr = far_addr % alignment;
        let mod_off = far_off % alignment;
        if mod_addr < mod_off {
            far_addr += mod_off - mod_addr;
        } else if mod_addr > mod_off {
            far_addr += alignment - mod_addr + mod_off;
        }
    }

    info!(
        "Moving {section_name} from {old_off:#x}/{old_addr:#x} to {far_off:#x}/{far_addr:#x}"
    );

    let mut header = root.sect_headers_mut().remove(pos);
    header.fields.set_int("sh_offset", far_off);
    header.fields.set_int("sh_addr", far_addr);
    let old_index = pos;
    root.sect_headers_mut().push(header);
    let new_index = root.section_headers().len() - 1;
    info!("\t{section_name} moved from index {old_index} to {new_index}");
    Ok(())
}

fn section_range(root: &ElfFile, start_name: &str, end_name: &str) -> Result<(u64, u64, u64, u64)> {
    let start_pos = root.section_pos_by_name(start_name)?;
    let end_pos = root.section_pos_by_name(end_name)?;
    let (start_off, start_addr) = {
        let h = root
            .section_headers()
            .get(start_pos)
            .ok_or(Error::SectionNotFound {
                name: start_name.into(),
            })?;
        (h.fields.int("sh_offset")?, h.fields.int("sh_addr")?)
    };
    let (end_off, end_addr, end_size) = {
        let h = root
            .section_headers()
            .get(end_pos)
            .ok_or(Error::SectionNotFound {
                name: end_name.into(),
            })?;
        (
            h.fields.int("sh_offset")?,
            h.fields.int("sh_addr")?,
            h.fields.int("sh_size")?,
        )
    };
    if start_off > end_off {
        return Err(Error::StartAfterEnd {
            start: start_name.into(),
            end: end_name.into(),
            start_off,
            end_off,
        });
    }
    Ok((
        start_off,
        start_addr,
        end_off + end_size - start_off,
        end_addr + end_size - start_addr,
    ))
}

/// Rewrite the segment at `segment_idx` to cover the file and memory range
/// spanned by two sections
pub fn move_segment_for_sections(
    root: &mut ElfFile,
    segment_idx: &str,
    start_name: &str,
    end_name: &str,
) -> Result<()> {
    let segment_idx: usize = segment_idx
        .parse()
        .map_err(|_| Error::InvalidIntLiteral {
            value: segment_idx.into(),
        })?;
    let (offset, vaddr, filesz, memsz) = section_range(root, start_name, end_name)?;

    let segment = root
        .prog_headers_mut()
        .get_mut(segment_idx)
        .ok_or(Error::NoSuchSegment { idx: segment_idx })?;
    let old_start = segment.fields.int("p_vaddr")?;
    let old_end = old_start + segment.fields.int("p_memsz")?;
    segment.fields.set_int("p_offset", offset);
    segment.fields.set_int("p_vaddr", vaddr);
    segment.fields.set_int("p_paddr", vaddr);
    segment.fields.set_int("p_filesz", filesz);
    segment.fields.set_int("p_memsz", memsz);

    info!(
        "Moving segment {segment_idx} from {old_start:#x}/{old_end:#x} to {vaddr:#x}/{:#x}",
        vaddr + memsz
    );
    Ok(())
}

/// Build a new loadable segment covering the file and memory range spanned
/// by two sections, inserted immediately after the last existing `PT_LOAD`
pub fn add_segment_for_sections(
    root: &mut ElfFile,
    segment_type: &str,
    segment_flags: &str,
    segment_align: &str,
    start_name: &str,
    end_name: &str,
) -> Result<()> {
    // Loadable is the only segment type worth creating for now
    if segment_type != "PT_LOAD" {
        return Err(Error::UnknownSegmentType {
            name: segment_type.into(),
        });
    }
    let flags = SegmentFlags::parse(segment_flags)?;
    let align = parse_hex(segment_align)?;
    let (offset, vaddr, filesz, memsz) = section_range(root, start_name, end_name)?;

    let mut p_data = HashMap::new();
    p_data.insert("p_type".to_string(), 1u64);
    p_data.insert("p_flags".to_string(), flags.bits());
    p_data.insert("p_align".to_string(), align);
    p_data.insert("p_offset".to_string(), offset);
    p_data.insert("p_vaddr".to_string(), vaddr);
    p_data.insert("p_paddr".to_string(), vaddr);
    p_data.insert("p_filesz".to_string(), filesz);
    p_data.insert("p_memsz".to_string(), memsz);

    let mut idx: i64 = -1;
    for segment in root.program_headers().iter() {
        if segment.p_type() == 1 && segment.idx() as i64 > idx {
            idx = segment.idx() as i64;
        }
    }
    let idx = (idx + 1) as usize;

    let pheader = ProgramHeader::from_map(&p_data, root.class(), root.encoding())?;
    root.prog_headers_mut().insert(idx, pheader);
    Ok(())
}

/// Add a dynamic entry whose value names a string in the dynamic string
/// table, reusing an existing entry when one matches and inserting the tag
/// at the head of the section
pub fn add_dynamic_tag(root: &mut ElfFile, tag_name: &str, val_str: &str) -> Result<()> {
    let dynamic_pos = root.section_pos_by_name(".dynamic")?;
    let dynstr_header = root
        .section_headers()
        .get(dynamic_pos)
        .and_then(|h| h.body.as_dynamic())
        .ok_or(Error::SectionBodyNotTable { idx: dynamic_pos })?
        .find_section_by_ptr_tag(root, DT_STRTAB)?;

    let tag_id = dynamic::tag_value(tag_name).ok_or(Error::UnknownDynamicTag {
        name: tag_name.into(),
    })?;
    let bare = tag_name.strip_prefix("DT_").unwrap_or(tag_name).to_lowercase();
    let schema = dynamic::schema()?;
    let val_field = format!("d_val_{bare}");
    let ptr_field = format!("d_ptr_{bare}");
    let field_name = if schema.has_field(&val_field, root.class()) {
        val_field
    } else if schema.has_field(&ptr_field, root.class()) {
        ptr_field
    } else {
        return Err(Error::NoUnionField {
            tag: tag_name.into(),
        });
    };

    let str_offset = {
        let dynstr = root.strtab_mut_by_header_id(dynstr_header)?;
        match dynstr.find_text(val_str) {
            Some(item) => item.offset() as u64,
            None => {
                let id = dynstr.add_string(val_str);
                dynstr
                    .table
                    .by_id(id)
                    .map(|item| item.offset() as u64)
                    .ok_or(Error::DanglingReference {
                        name: "dynstr".into(),
                    })?
            }
        }
    };

    let mut tag_data = HashMap::new();
    tag_data.insert("d_tag".to_string(), tag_id);
    tag_data.insert(field_name, str_offset);
    let entry = dynamic::DynamicEntry::from_map(&tag_data, root.class(), root.encoding())?;

    root.sect_headers_mut()
        .get_mut(dynamic_pos)
        .and_then(|h| h.body.as_dynamic_mut())
        .ok_or(Error::SectionBodyNotTable { idx: dynamic_pos })?
        .table
        .insert(0, entry);
    info!("Added a dynamic tag {tag_name}: {val_str}");
    Ok(())
}
