//! End-to-end scenarios over a synthetic ELF64 little-endian binary carrying
//! a static and dynamic symbol table, dynamic string table, dynamic section,
//! GNU hash section, and both version tables.

use std::collections::HashMap;
use std::io::Cursor;

use braze::elf::sections::gnu_hash::gnu_hash;
use braze::elf::ElfFile;
use braze::script::Executor;
use braze::table::TableItem;

const EHDR_SIZE: u64 = 64;
const PHDR_OFF: u64 = 0x40;
const PHENT: u64 = 56;

const TEXT_OFF: u64 = 0x200;
const INIT_OFF: u64 = 0x220;
const FINI_OFF: u64 = 0x230;
const DYNSTR_OFF: u64 = 0x240;
const DYNSYM_OFF: u64 = 0x268;
const GNU_HASH_OFF: u64 = 0x2B0;
const VERSYM_OFF: u64 = 0x2D4;
const VERNEED_OFF: u64 = 0x2DC;
const DYNAMIC_OFF: u64 = 0x300;
const SYMTAB_OFF: u64 = 0x3A0;
const STRTAB_OFF: u64 = 0x3E8;
const SHSTRTAB_OFF: u64 = 0x3F7;

const LOAD_END: u64 = 0x3A0;

struct Shdr {
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
}

fn put(buf: &mut [u8], offset: u64, bytes: &[u8]) {
    let start = offset as usize;
    buf[start..start + bytes.len()].copy_from_slice(bytes);
}

fn strtab_bytes(strings: &[&str]) -> (Vec<u8>, HashMap<String, u32>) {
    let mut data = vec![0u8];
    let mut offsets = HashMap::new();
    for s in strings {
        offsets.insert((*s).to_string(), data.len() as u32);
        data.extend_from_slice(s.as_bytes());
        data.push(0);
    }
    (data, offsets)
}

fn sym64(name: u32, info: u8, shndx: u16, value: u64, size: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&name.to_le_bytes());
    out.push(info);
    out.push(0);
    out.extend_from_slice(&shndx.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out
}

fn dyn64(tag: u64, value: u64) -> Vec<u8> {
    let mut out = tag.to_le_bytes().to_vec();
    out.extend_from_slice(&value.to_le_bytes());
    out
}

fn shdr64(s: &Shdr) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&s.name.to_le_bytes());
    out.extend_from_slice(&s.sh_type.to_le_bytes());
    out.extend_from_slice(&s.flags.to_le_bytes());
    out.extend_from_slice(&s.addr.to_le_bytes());
    out.extend_from_slice(&s.offset.to_le_bytes());
    out.extend_from_slice(&s.size.to_le_bytes());
    out.extend_from_slice(&s.link.to_le_bytes());
    out.extend_from_slice(&s.info.to_le_bytes());
    out.extend_from_slice(&s.addralign.to_le_bytes());
    out.extend_from_slice(&s.entsize.to_le_bytes());
    out
}

fn phdr64(p_type: u32, flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64, align: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&p_type.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&vaddr.to_le_bytes());
    out.extend_from_slice(&vaddr.to_le_bytes());
    out.extend_from_slice(&filesz.to_le_bytes());
    out.extend_from_slice(&memsz.to_le_bytes());
    out.extend_from_slice(&align.to_le_bytes());
    out
}

/// Build a consistent ELF64 little-endian shared object. The layout is
/// fixed-point for the organize pass so a load/save cycle is byte-identical.
fn fixture() -> Vec<u8> {
    let (dynstr, dynstr_off) = strtab_bytes(&["libc.so.6", "printf", "memcpy", "GLIBC_2.2.5"]);
    assert_eq!(dynstr.len(), 0x25);
    let (strtab, strtab_off) = strtab_bytes(&["printf", "memcpy"]);
    assert_eq!(strtab.len(), 0xF);
    let (shstrtab, sh_names) = strtab_bytes(&[
        ".text",
        ".init",
        ".fini",
        ".dynstr",
        ".dynsym",
        ".gnu.hash",
        ".gnu.version",
        ".gnu.version_r",
        ".dynamic",
        ".symtab",
        ".strtab",
        ".shstrtab",
    ]);
    assert_eq!(shstrtab.len(), 0x6C);

    let shoff = SHSTRTAB_OFF + shstrtab.len() as u64;
    let total = shoff as usize + 13 * 64;
    let mut buf = vec![0u8; total];

    // ELF header
    let mut ehdr = Vec::new();
    ehdr.extend_from_slice(&[0x7f, 0x45, 0x4c, 0x46, 2, 1, 1, 0, 0]);
    ehdr.extend_from_slice(&[0; 7]);
    ehdr.extend_from_slice(&3u16.to_le_bytes()); // e_type = DYN
    ehdr.extend_from_slice(&62u16.to_le_bytes()); // e_machine = EM_X86_64
    ehdr.extend_from_slice(&1u32.to_le_bytes());
    ehdr.extend_from_slice(&TEXT_OFF.to_le_bytes()); // e_entry
    ehdr.extend_from_slice(&PHDR_OFF.to_le_bytes());
    ehdr.extend_from_slice(&shoff.to_le_bytes());
    ehdr.extend_from_slice(&0u32.to_le_bytes());
    ehdr.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    ehdr.extend_from_slice(&(PHENT as u16).to_le_bytes());
    ehdr.extend_from_slice(&2u16.to_le_bytes()); // e_phnum
    ehdr.extend_from_slice(&64u16.to_le_bytes());
    ehdr.extend_from_slice(&13u16.to_le_bytes()); // e_shnum
    ehdr.extend_from_slice(&12u16.to_le_bytes()); // e_shstrndx
    put(&mut buf, 0, &ehdr);

    // Program headers: one big PT_LOAD plus PT_DYNAMIC
    let mut phdrs = phdr64(1, 5, 0, 0, LOAD_END, LOAD_END, 0x1000);
    phdrs.extend(phdr64(2, 6, DYNAMIC_OFF, DYNAMIC_OFF, 0xA0, 0xA0, 8));
    put(&mut buf, PHDR_OFF, &phdrs);

    // Code-carrying sections hold recognizable filler
    put(&mut buf, TEXT_OFF, &[0x90; 0x20]);
    put(&mut buf, INIT_OFF, &[0xC3; 0x10]);
    put(&mut buf, FINI_OFF, &[0xC3; 0x10]);
    put(&mut buf, DYNSTR_OFF, &dynstr);

    // Dynamic symbols, hashed ones ordered the way the hash section wants
    let h_printf = gnu_hash(b"printf");
    let h_memcpy = gnu_hash(b"memcpy");
    let mut hashed = vec![("printf", h_printf, 0x200u64), ("memcpy", h_memcpy, 0x210u64)];
    hashed.sort_by_key(|&(_, h, _)| h);

    let mut dynsym = sym64(0, 0, 0, 0, 0);
    for (name, _, value) in &hashed {
        dynsym.extend(sym64(dynstr_off[*name], 0x12, 1, *value, 8));
    }
    assert_eq!(dynsym.len(), 72);
    put(&mut buf, DYNSYM_OFF, &dynsym);

    // GNU hash: 1 bucket, 1 bloom word, shift 6, symoffset 1
    let mut gnu = Vec::new();
    gnu.extend_from_slice(&1u32.to_le_bytes()); // nbuckets
    gnu.extend_from_slice(&1u32.to_le_bytes()); // symoffset
    gnu.extend_from_slice(&1u32.to_le_bytes()); // bloomsize
    gnu.extend_from_slice(&6u32.to_le_bytes()); // bloomshift
    let mut bloom = 0u64;
    for &(_, h, _) in &hashed {
        bloom |= 1 << (h % 64);
        bloom |= 1 << ((h >> 6) % 64);
    }
    gnu.extend_from_slice(&bloom.to_le_bytes());
    gnu.extend_from_slice(&1u32.to_le_bytes()); // bucket 0 -> first hashed symbol
    gnu.extend_from_slice(&(hashed[0].1 & !1).to_le_bytes());
    gnu.extend_from_slice(&((hashed[1].1 & !1) | 1).to_le_bytes());
    assert_eq!(gnu.len(), 36);
    put(&mut buf, GNU_HASH_OFF, &gnu);

    // Versym: null symbol local, both named symbols global
    put(&mut buf, VERSYM_OFF, &[0, 0, 1, 0, 1, 0]);

    // Verneed: one libc.so.6 entry exposing GLIBC_2.2.5 as version 2
    let mut verneed = Vec::new();
    verneed.extend_from_slice(&1u16.to_le_bytes()); // vn_version
    verneed.extend_from_slice(&1u16.to_le_bytes()); // vn_cnt
    verneed.extend_from_slice(&u32::from(dynstr_off["libc.so.6"]).to_le_bytes());
    verneed.extend_from_slice(&0x10u32.to_le_bytes()); // vn_aux
    verneed.extend_from_slice(&0u32.to_le_bytes()); // vn_next
    verneed.extend_from_slice(&0x09691972u32.to_le_bytes()); // vna_hash
    verneed.extend_from_slice(&0u16.to_le_bytes()); // vna_flags
    verneed.extend_from_slice(&2u16.to_le_bytes()); // vna_other
    verneed.extend_from_slice(&u32::from(dynstr_off["GLIBC_2.2.5"]).to_le_bytes());
    verneed.extend_from_slice(&0u32.to_le_bytes()); // vna_next
    assert_eq!(verneed.len(), 32);
    put(&mut buf, VERNEED_OFF, &verneed);

    // Dynamic section
    let mut dynamic = Vec::new();
    dynamic.extend(dyn64(0x01, u64::from(dynstr_off["libc.so.6"]))); // NEEDED
    dynamic.extend(dyn64(0x05, DYNSTR_OFF)); // STRTAB
    dynamic.extend(dyn64(0x06, DYNSYM_OFF)); // SYMTAB
    dynamic.extend(dyn64(0x0a, 0x25)); // STRSZ
    dynamic.extend(dyn64(0x0b, 24)); // SYMENT
    dynamic.extend(dyn64(0x6ffffef5, GNU_HASH_OFF)); // GNU_HASH
    dynamic.extend(dyn64(0x6ffffff0, VERSYM_OFF)); // VERSYM
    dynamic.extend(dyn64(0x6ffffffe, VERNEED_OFF)); // VERNEED
    dynamic.extend(dyn64(0x6fffffff, 1)); // VERNEEDNUM
    dynamic.extend(dyn64(0, 0)); // NULL
    assert_eq!(dynamic.len(), 0xA0);
    put(&mut buf, DYNAMIC_OFF, &dynamic);

    // Static symbols mirror the dynamic ones
    let mut symtab = sym64(0, 0, 0, 0, 0);
    for (name, _, value) in &hashed {
        symtab.extend(sym64(strtab_off[*name], 0x12, 1, *value, 8));
    }
    put(&mut buf, SYMTAB_OFF, &symtab);
    put(&mut buf, STRTAB_OFF, &strtab);
    put(&mut buf, SHSTRTAB_OFF, &shstrtab);

    // Section headers
    let headers = [
        Shdr { name: 0, sh_type: 0, flags: 0, addr: 0, offset: 0, size: 0, link: 0, info: 0, addralign: 0, entsize: 0 },
        Shdr { name: sh_names[".text"], sh_type: 1, flags: 0x6, addr: TEXT_OFF, offset: TEXT_OFF, size: 0x20, link: 0, info: 0, addralign: 16, entsize: 0 },
        Shdr { name: sh_names[".init"], sh_type: 1, flags: 0x6, addr: INIT_OFF, offset: INIT_OFF, size: 0x10, link: 0, info: 0, addralign: 4, entsize: 0 },
        Shdr { name: sh_names[".fini"], sh_type: 1, flags: 0x6, addr: FINI_OFF, offset: FINI_OFF, size: 0x10, link: 0, info: 0, addralign: 4, entsize: 0 },
        Shdr { name: sh_names[".dynstr"], sh_type: 3, flags: 0x2, addr: DYNSTR_OFF, offset: DYNSTR_OFF, size: 0x25, link: 0, info: 0, addralign: 1, entsize: 0 },
        Shdr { name: sh_names[".dynsym"], sh_type: 11, flags: 0x2, addr: DYNSYM_OFF, offset: DYNSYM_OFF, size: 72, link: 4, info: 1, addralign: 8, entsize: 24 },
        Shdr { name: sh_names[".gnu.hash"], sh_type: 0x6ffffff6, flags: 0x2, addr: GNU_HASH_OFF, offset: GNU_HASH_OFF, size: 36, link: 5, info: 0, addralign: 8, entsize: 0 },
        Shdr { name: sh_names[".gnu.version"], sh_type: 0x6fffffff, flags: 0x2, addr: VERSYM_OFF, offset: VERSYM_OFF, size: 6, link: 5, info: 0, addralign: 2, entsize: 2 },
        Shdr { name: sh_names[".gnu.version_r"], sh_type: 0x6ffffffe, flags: 0x2, addr: VERNEED_OFF, offset: VERNEED_OFF, size: 32, link: 4, info: 1, addralign: 4, entsize: 0 },
        Shdr { name: sh_names[".dynamic"], sh_type: 6, flags: 0x3, addr: DYNAMIC_OFF, offset: DYNAMIC_OFF, size: 0xA0, link: 4, info: 0, addralign: 8, entsize: 16 },
        Shdr { name: sh_names[".symtab"], sh_type: 2, flags: 0, addr: 0, offset: SYMTAB_OFF, size: 72, link: 11, info: 1, addralign: 8, entsize: 24 },
        Shdr { name: sh_names[".strtab"], sh_type: 3, flags: 0, addr: 0, offset: STRTAB_OFF, size: 0xF, link: 0, info: 0, addralign: 1, entsize: 0 },
        Shdr { name: sh_names[".shstrtab"], sh_type: 3, flags: 0, addr: 0, offset: SHSTRTAB_OFF, size: 0x6C, link: 0, info: 0, addralign: 1, entsize: 0 },
    ];
    let mut shdrs = Vec::new();
    for h in &headers {
        shdrs.extend(shdr64(h));
    }
    put(&mut buf, shoff, &shdrs);
    buf
}

fn serialize(file: &ElfFile) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    file.to_bytes(&mut cursor).unwrap();
    cursor.into_inner()
}

fn dynsym_pos(file: &ElfFile, name: &str) -> Option<usize> {
    let pos = file.section_pos_by_name(".dynsym").ok()?;
    file.section_headers()
        .get(pos)?
        .body
        .as_symtab()?
        .find_symbol(file, name)
}

#[test]
fn load_save_round_trip_is_byte_identical() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    file.organize().unwrap();
    assert!(file.verify());
    assert_eq!(serialize(&file), data);
}

#[test]
fn verify_passes_on_fresh_load() {
    let data = fixture();
    let file = ElfFile::from_bytes(&data).unwrap();
    assert!(file.verify());
}

#[test]
fn rename_symbol_rewrites_both_tables_and_rebuilds_hash() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    assert!(
        braze::ops::rename_symbol_in_table(&mut file, "printf", "myprint", ".symtab", false)
            .unwrap()
    );
    assert!(
        braze::ops::rename_symbol_in_table(&mut file, "printf", "myprint", ".dynsym", false)
            .unwrap()
    );
    file.organize().unwrap();
    assert!(file.verify());

    let out = serialize(&file);
    let needle = b"myprint\0";
    assert!(out.windows(needle.len()).any(|w| w == needle));

    // The written image parses back with the renamed symbol in both tables
    let reread = ElfFile::from_bytes(&out).unwrap();
    assert!(dynsym_pos(&reread, "myprint").is_some());
    assert!(dynsym_pos(&reread, "printf").is_none());
    let symtab_pos = reread.section_pos_by_name(".symtab").unwrap();
    let symtab = reread
        .section_headers()
        .get(symtab_pos)
        .and_then(|h| h.body.as_symtab())
        .unwrap();
    assert!(symtab.find_symbol(&reread, "myprint").is_some());
    assert!(reread.verify());
}

#[test]
fn rename_missing_symbol_is_strict_error_and_permissive_noop() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    assert!(
        braze::ops::rename_symbol_in_table(&mut file, "nope", "x", ".dynsym", false).is_err()
    );
    assert!(
        !braze::ops::rename_symbol_in_table(&mut file, "nope", "x", ".dynsym", true).unwrap()
    );
}

#[test]
fn set_symbol_version_writes_versym_entry() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    assert!(
        braze::ops::set_symbol_library_version(&mut file, "memcpy", 2, false).unwrap()
    );
    file.organize().unwrap();
    assert!(file.verify());

    let out = serialize(&file);
    let reread = ElfFile::from_bytes(&out).unwrap();
    let pos = dynsym_pos(&reread, "memcpy").unwrap();
    let versym_pos = reread.section_pos_by_name(".gnu.version").unwrap();
    let versym = reread
        .section_headers()
        .get(versym_pos)
        .and_then(|h| h.body.as_versym())
        .unwrap();
    assert_eq!(versym.table.get(pos).unwrap().value(), 2);
}

#[test]
fn set_symbol_version_rejects_unknown_and_oversized_versions() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    assert!(braze::ops::set_symbol_library_version(&mut file, "memcpy", 7, false).is_err());
    assert!(braze::ops::set_symbol_library_version(&mut file, "memcpy", 1 << 16, false).is_err());
}

#[test]
fn move_section_relocates_to_the_end() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    braze::ops::move_section_to_end(&mut file, ".text", "0x1000").unwrap();
    file.organize().unwrap();
    assert!(file.verify());

    // The section landed last, aligned, past every other section
    let pos = file.section_pos_by_name(".text").unwrap();
    assert_eq!(pos, file.section_headers().len() - 1);
    let text = file.section_headers().get(pos).unwrap();
    let off = text.fields.int("sh_offset").unwrap();
    let addr = text.fields.int("sh_addr").unwrap();
    assert!(off >= 0x463);
    assert_eq!(off % 16, 0);
    assert_eq!(off % 0x1000, addr % 0x1000);

    // References track the reorder through a save/load cycle
    let out = serialize(&file);
    let reread = ElfFile::from_bytes(&out).unwrap();
    let new_pos = reread.section_pos_by_name(".text").unwrap();
    assert_eq!(new_pos, reread.section_headers().len() - 1);
    let printf_pos = dynsym_pos(&reread, "printf").unwrap();
    let dynsym_sect = reread.section_pos_by_name(".dynsym").unwrap();
    let sym = reread
        .section_headers()
        .get(dynsym_sect)
        .and_then(|h| h.body.as_symtab())
        .unwrap()
        .table
        .get(printf_pos)
        .unwrap();
    assert_eq!(sym.get("st_shndx", &reread).unwrap(), new_pos as u64);
}

#[test]
fn make_segment_inserts_after_last_load() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    braze::ops::add_segment_for_sections(&mut file, "PT_LOAD", "R|E", "0x1000", ".init", ".fini")
        .unwrap();

    assert_eq!(file.program_headers().len(), 3);
    // Inserted immediately after the existing PT_LOAD at position 0
    let seg = file.program_headers().get(1).unwrap();
    assert_eq!(seg.p_type(), 1);
    assert_eq!(seg.fields.int("p_offset").unwrap(), INIT_OFF);
    assert_eq!(seg.fields.int("p_vaddr").unwrap(), INIT_OFF);
    assert_eq!(
        seg.fields.int("p_filesz").unwrap(),
        FINI_OFF + 0x10 - INIT_OFF
    );
    assert_eq!(
        seg.fields.int("p_memsz").unwrap(),
        FINI_OFF + 0x10 - INIT_OFF
    );
    assert_eq!(seg.fields.int("p_flags").unwrap(), 0x5);
    assert_eq!(seg.fields.int("p_align").unwrap(), 0x1000);
    // The old dynamic segment moved down one slot
    assert_eq!(file.program_headers().get(2).unwrap().p_type(), 2);
}

#[test]
fn make_segment_rejects_unknown_types_and_flags() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    assert!(
        braze::ops::add_segment_for_sections(&mut file, "PT_TLS", "R", "0x1000", ".init", ".fini")
            .is_err()
    );
    assert!(
        braze::ops::add_segment_for_sections(&mut file, "PT_LOAD", "R|Q", "0x1000", ".init", ".fini")
            .is_err()
    );
    assert!(
        braze::ops::add_segment_for_sections(&mut file, "PT_LOAD", "R", "0x1000", ".fini", ".init")
            .is_err()
    );
}

#[test]
fn move_segment_rewrites_range() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    braze::ops::move_segment_for_sections(&mut file, "1", ".init", ".fini").unwrap();
    let seg = file.program_headers().get(1).unwrap();
    assert_eq!(seg.fields.int("p_offset").unwrap(), INIT_OFF);
    assert_eq!(seg.fields.int("p_vaddr").unwrap(), INIT_OFF);
    assert_eq!(seg.fields.int("p_paddr").unwrap(), INIT_OFF);
    assert_eq!(
        seg.fields.int("p_filesz").unwrap(),
        FINI_OFF + 0x10 - INIT_OFF
    );
}

#[test]
fn make_dyn_tag_prepends_entry_with_string_offset() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    braze::ops::add_dynamic_tag(&mut file, "DT_NEEDED", "libfoo.so.1").unwrap();
    file.organize().unwrap();
    assert!(file.verify());

    let out = serialize(&file);
    let needle = b"libfoo.so.1\0";
    assert!(out.windows(needle.len()).any(|w| w == needle));

    let reread = ElfFile::from_bytes(&out).unwrap();
    let dyn_pos = reread.section_pos_by_name(".dynamic").unwrap();
    let dynamic = reread
        .section_headers()
        .get(dyn_pos)
        .and_then(|h| h.body.as_dynamic())
        .unwrap();
    let first = dynamic.table.get(0).unwrap();
    assert_eq!(first.tag(), 0x01);
    // The value is the string's offset in the (re-parsed) dynamic string
    // table
    let offset = first.get("d_val_needed", &reread).unwrap();
    let dynstr_pos = reread.section_pos_by_name(".dynstr").unwrap();
    let dynstr = reread
        .section_headers()
        .get(dynstr_pos)
        .and_then(|h| h.body.as_strtab())
        .unwrap();
    let item = dynstr
        .table
        .iter()
        .find(|i| i.offset() == offset as usize)
        .unwrap();
    assert!(item.eq_text("libfoo.so.1"));
}

#[test]
fn make_dyn_tag_reuses_existing_string() {
    let data = fixture();
    let mut file = ElfFile::from_bytes(&data).unwrap();
    let dynstr_pos = file.section_pos_by_name(".dynstr").unwrap();
    let before = file
        .section_headers()
        .get(dynstr_pos)
        .and_then(|h| h.body.as_strtab())
        .unwrap()
        .table
        .len();
    braze::ops::add_dynamic_tag(&mut file, "DT_NEEDED", "libc.so.6").unwrap();
    let after = file
        .section_headers()
        .get(dynstr_pos)
        .and_then(|h| h.body.as_strtab())
        .unwrap()
        .table
        .len();
    assert_eq!(before, after);
    let dyn_pos = file.section_pos_by_name(".dynamic").unwrap();
    let first = file
        .section_headers()
        .get(dyn_pos)
        .and_then(|h| h.body.as_dynamic())
        .unwrap()
        .table
        .get(0)
        .unwrap()
        .get("d_val_needed", &file)
        .unwrap();
    assert_eq!(first, 1);
}

#[test]
fn suffix_sharing_offset_lookup_survives_round_trip() {
    // A symbol pointing into the middle of an existing string exercises the
    // tail-sharing convention
    let mut data = fixture();
    let file = ElfFile::from_bytes(&data).unwrap();
    // Patch the dynsym entry for "printf" to reference the "intf" suffix
    let pos = dynsym_pos(&file, "printf").unwrap();
    let printf_off = {
        let dynsym_sect = file.section_pos_by_name(".dynsym").unwrap();
        file.section_headers()
            .get(dynsym_sect)
            .and_then(|h| h.body.as_symtab())
            .unwrap()
            .table
            .get(pos)
            .unwrap()
            .get("st_name", &file)
            .unwrap()
    };
    let entry_off = DYNSYM_OFF as usize + pos * 24;
    data[entry_off..entry_off + 4]
        .copy_from_slice(&((printf_off as u32) + 2).to_le_bytes());

    let patched = ElfFile::from_bytes(&data).unwrap();
    let dynsym_sect = patched.section_pos_by_name(".dynsym").unwrap();
    let sym = patched
        .section_headers()
        .get(dynsym_sect)
        .and_then(|h| h.body.as_symtab())
        .unwrap()
        .table
        .get(pos)
        .unwrap();
    assert_eq!(sym.name_bytes(&patched).unwrap(), b"intf\0");
    // The original item is intact
    let dynstr_pos = patched.section_pos_by_name(".dynstr").unwrap();
    assert!(patched
        .section_headers()
        .get(dynstr_pos)
        .and_then(|h| h.body.as_strtab())
        .unwrap()
        .find_text("printf")
        .is_some());
}

#[test]
fn executor_runs_script_and_saves_with_mode() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.bin");
    std::fs::write(&input, fixture()).unwrap();
    let script = dir.path().join("edit.tcf");
    std::fs::write(
        &script,
        format!(
            "# exercise a full edit pass\n\
             LOAD,ELF,{}\n\
             RENAME_SYMBOL,printf,myprint,BOTH,STRICT\n\
             SAVE,{},OVERWRITE\n",
            input.display(),
            output.display()
        ),
    )
    .unwrap();

    let mut executor = Executor::new();
    assert_eq!(executor.execute(&script).unwrap(), 0);

    let out = std::fs::read(&output).unwrap();
    let reread = ElfFile::from_bytes(&out).unwrap();
    assert!(dynsym_pos(&reread, "myprint").is_some());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o744);
    }
}

#[test]
fn executor_stops_on_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.bin");
    std::fs::write(&input, fixture()).unwrap();
    let script = dir.path().join("bad.tcf");
    std::fs::write(
        &script,
        format!(
            "LOAD,ELF,{}\n\
             RENAME_SYMBOL,missing,other,BOTH,STRICT\n\
             SAVE,{},OVERWRITE\n",
            input.display(),
            output.display()
        ),
    )
    .unwrap();

    let mut executor = Executor::new();
    assert_eq!(executor.execute(&script).unwrap(), 1);
    assert!(!output.exists());
}

#[test]
fn save_keep_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bin");
    let output = dir.path().join("out.bin");
    std::fs::write(&input, fixture()).unwrap();
    std::fs::write(&output, b"occupied").unwrap();
    let script = dir.path().join("keep.tcf");
    std::fs::write(
        &script,
        format!(
            "LOAD,ELF,{}\nSAVE,{},KEEP\n",
            input.display(),
            output.display()
        ),
    )
    .unwrap();

    let mut executor = Executor::new();
    assert_eq!(executor.execute(&script).unwrap(), 1);
    assert_eq!(std::fs::read(&output).unwrap(), b"occupied");
}
