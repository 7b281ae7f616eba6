//! GNU hash sections (`GNU_HASH`).
//!
//! Layout: four 32-bit header words (`nbuckets`, `symoffset`, `bloomsize`,
//! `bloomshift`), `bloomsize` bloom-filter words of word-size bytes,
//! `nbuckets` 32-bit buckets, then one 32-bit chain entry per hashed symbol.
//! Symbols hash with DJB2 over their name bytes; placement is
//! `hash mod nbuckets`, and the low bit of a chain entry terminates its
//! bucket's run.

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::error;

use crate::base::{ElfClass, ElfDataEncoding, ItemId};
use crate::elf::ElfFile;
use crate::error::Result;
use crate::schema::{Fields, RecordSchema, SchemaHooks};
use crate::table::TableItem;

const SCHEMA_TEXT: &str = "\
FIELD,nbuckets,as_int,4,4
FIELD,symoffset,as_int,4,4
FIELD,bloomsize,as_int,4,4
FIELD,bloomshift,as_int,4,4
";

const HOOKS: SchemaHooks = SchemaHooks {
    options: &[],
    alts: &[],
    lookups: &[],
};

lazy_static! {
    static ref SCHEMA: Result<RecordSchema> = RecordSchema::parse(SCHEMA_TEXT, &HOOKS);
}

/// The parsed GNU hash header schema
pub fn schema() -> Result<&'static RecordSchema> {
    SCHEMA.as_ref().map_err(Clone::clone)
}

/// DJB2 over a symbol's name bytes, stopping at the terminator
pub fn gnu_hash(name: &[u8]) -> u32 {
    let mut out = 5381u32;
    for &c in name {
        if c == 0 {
            break;
        }
        out = out
            .wrapping_shl(5)
            .wrapping_add(out)
            .wrapping_add(u32::from(c));
    }
    out
}

/// A GNU hash section body
#[derive(Debug, Clone)]
pub struct GnuHashSection {
    /// The four header words
    pub fields: Fields,
    /// The bloom filter words
    pub bloom: Vec<u64>,
    /// The bucket array: chain start per hash bucket
    pub buckets: Vec<u32>,
    /// The chain array: one masked hash per hashed symbol
    pub chains: Vec<u32>,
    /// The identity of the hashed symbol table's section header, from the
    /// owning header's `sh_link`
    pub symtab: Option<ItemId>,
}

impl GnuHashSection {
    /// Parse a GNU hash section from the section's bytes
    pub fn from_bytes(
        data: &[u8],
        class: ElfClass,
        encoding: ElfDataEncoding,
        symtab: Option<ItemId>,
    ) -> Result<Self> {
        let fields = Fields::new(class, encoding).from_bytes(schema()?, data, &|_, _| true)?;
        let word = class.word_size();
        let bloomsize = fields.int("bloomsize")? as usize;
        let nbuckets = fields.int("nbuckets")? as usize;
        let mut offset = fields.size(schema()?);
        let take = |offset: &mut usize, size: usize| -> Result<u64> {
            let end = *offset + size;
            let bytes = data
                .get(*offset..end)
                .ok_or(crate::error::Error::TruncatedFile {
                    what: "gnu hash arrays".into(),
                    offset: *offset,
                })?;
            *offset = end;
            Ok(encoding.read_uint(bytes))
        };
        let mut bloom = Vec::with_capacity(bloomsize);
        for _ in 0..bloomsize {
            bloom.push(take(&mut offset, word)?);
        }
        let mut buckets = Vec::with_capacity(nbuckets);
        for _ in 0..nbuckets {
            buckets.push(take(&mut offset, 4)? as u32);
        }
        let mut chains = Vec::new();
        while offset + 4 <= data.len() {
            chains.push(take(&mut offset, 4)? as u32);
        }
        Ok(Self {
            fields,
            bloom,
            buckets,
            chains,
            symtab,
        })
    }

    /// The section's serialized size
    pub fn size(&self) -> usize {
        let word = self.fields.class.word_size();
        16 + self.bloom.len() * word + self.buckets.len() * 4 + self.chains.len() * 4
    }

    fn nbuckets(&self) -> usize {
        self.fields.int("nbuckets").unwrap_or(0) as usize
    }

    fn symoffset(&self) -> usize {
        self.fields.int("symoffset").unwrap_or(0) as usize
    }

    fn bloomsize(&self) -> usize {
        self.fields.int("bloomsize").unwrap_or(0) as usize
    }

    fn word_bits(&self) -> u32 {
        (self.fields.class.word_size() * 8) as u32
    }

    /// The bucket a hash lands in
    pub fn bucket_idx(&self, hash: u32) -> usize {
        match self.nbuckets() {
            0 => 0,
            n => hash as usize % n,
        }
    }

    /// The bloom word a hash marks
    pub fn bloom_idx(&self, hash: u32) -> usize {
        match self.bloomsize() {
            0 => 0,
            n => (hash / self.word_bits()) as usize % n,
        }
    }

    /// The two bloom bits a hash sets in its bloom word
    pub fn bloom_bits(&self, hash: u32) -> (u32, u32) {
        let w = self.word_bits();
        let shift = self.fields.int("bloomshift").unwrap_or(0) as u32;
        (hash % w, (hash >> shift) % w)
    }

    /// The chain entry for a hash: the hash with its low bit cleared
    pub fn chain_entry(hash: u32) -> u32 {
        hash & !1
    }

    /// Rebuild the bloom, bucket and chain arrays for hashed symbols whose
    /// DJB2 hashes arrive in their final symbol-table order
    pub fn rebuild(&mut self, symoffset: usize, hashes: &[u32]) {
        self.fields.set_int("symoffset", symoffset as u64);
        self.bloom = vec![0; self.bloomsize()];
        self.buckets = vec![0; self.nbuckets()];
        self.chains = hashes.iter().map(|&h| Self::chain_entry(h)).collect();
        let mut last_bucket = None;
        for (i, &hash) in hashes.iter().enumerate() {
            let bucket = self.bucket_idx(hash);
            if last_bucket != Some(bucket) {
                last_bucket = Some(bucket);
                if let Some(slot) = self.buckets.get_mut(bucket) {
                    *slot = (i + symoffset) as u32;
                }
                if i > 0 {
                    self.chains[i - 1] |= 1;
                }
            }
            let (bit_a, bit_b) = self.bloom_bits(hash);
            let idx = self.bloom_idx(hash);
            if let Some(word) = self.bloom.get_mut(idx) {
                *word |= (1u64 << bit_a) | (1u64 << bit_b);
            }
        }
        if let Some(last) = self.chains.last_mut() {
            *last |= 1;
        }
    }

    /// Check the hash structures against the symbol table: counts, bloom
    /// bits, bucket starts, and that every hashed symbol is found exactly
    /// once along its bucket's chain
    pub fn verify(&self, root: &ElfFile) -> bool {
        let mut out = true;
        if self.bloom.len() != self.bloomsize() {
            error!(
                "Expected {} bloom filter entries, but found {}",
                self.bloomsize(),
                self.bloom.len()
            );
            out = false;
        }
        if self.buckets.len() != self.nbuckets() {
            error!(
                "Expected {} buckets, but found {}",
                self.nbuckets(),
                self.buckets.len()
            );
            out = false;
        }
        let Some(symtab) = self.symtab.and_then(|id| root.symtab_by_header_id(id)) else {
            error!("GNU hash section has no matching symbol table");
            return false;
        };
        let symoffset = self.symoffset();
        let expected_chains = symtab.table.len().saturating_sub(symoffset);
        if self.chains.len() != expected_chains {
            error!(
                "Expected {} chain entries, but found {}",
                expected_chains,
                self.chains.len()
            );
            out = false;
        }

        let mut seen_names: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut seen_chain_idxs: HashMap<usize, usize> = HashMap::new();
        for symbol in symtab.table.iter().skip(symoffset) {
            let Ok(name) = symbol.name_bytes(root) else {
                error!("Hashed symbol {} has no resolvable name", symbol.idx());
                out = false;
                continue;
            };
            let sym_idx = symbol.idx();
            if let Some(prev) = seen_names.insert(name.to_vec(), sym_idx) {
                error!(
                    "Symbol {} ({}) was already entered as symbol {}",
                    sym_idx,
                    String::from_utf8_lossy(name),
                    prev
                );
                out = false;
            }

            let hash = gnu_hash(name);
            let bloom_elem = self.bloom.get(self.bloom_idx(hash)).copied().unwrap_or(0);
            let (bloom_a, bloom_b) = self.bloom_bits(hash);
            if bloom_elem & (1u64 << bloom_a) == 0 {
                error!(
                    "Missing unshifted bloom filter bit for symbol {} ({})",
                    sym_idx,
                    String::from_utf8_lossy(name)
                );
                out = false;
            }
            if bloom_elem & (1u64 << bloom_b) == 0 {
                error!(
                    "Missing shifted bloom filter bit for symbol {} ({})",
                    sym_idx,
                    String::from_utf8_lossy(name)
                );
                out = false;
            }

            let bucket = self.buckets.get(self.bucket_idx(hash)).copied().unwrap_or(0);
            if bucket == 0 {
                error!(
                    "Bucket for symbol {} ({}) is zero; symbol isn't present",
                    sym_idx,
                    String::from_utf8_lossy(name)
                );
                out = false;
                continue;
            }
            if (bucket as usize) < symoffset {
                error!(
                    "Bucket for symbol {} ({}) starts before the hashed region",
                    sym_idx,
                    String::from_utf8_lossy(name)
                );
                out = false;
                continue;
            }
            let mut chain_idx = bucket as usize - symoffset;
            if chain_idx >= self.chains.len() {
                error!(
                    "Bucket for symbol {} ({}) is outside the bounds of the chains",
                    sym_idx,
                    String::from_utf8_lossy(name)
                );
                out = false;
                continue;
            }
            let mut good = false;
            loop {
                if chain_idx >= self.chains.len() {
                    break;
                }
                if self.chains[chain_idx] & 0xFFFF_FFFE == Self::chain_entry(hash) {
                    good = true;
                    break;
                }
                if self.chains[chain_idx] & 1 != 0 {
                    break;
                }
                chain_idx += 1;
            }

            if !good {
                error!(
                    "Could not find a hash match for symbol {} ({})",
                    sym_idx,
                    String::from_utf8_lossy(name)
                );
                out = false;
            } else if symtab
                .table
                .get(symoffset + chain_idx)
                .and_then(|s| s.name_bytes(root).ok())
                != Some(name)
            {
                error!(
                    "Hash match produced false results for symbol {} ({})",
                    sym_idx,
                    String::from_utf8_lossy(name)
                );
                out = false;
            } else if symoffset + chain_idx != sym_idx {
                error!(
                    "Symbol names matched, but indexes did not; expected {} but computed {} for {}",
                    symoffset + chain_idx,
                    sym_idx,
                    String::from_utf8_lossy(name)
                );
                out = false;
            } else if let Some(prev) = seen_chain_idxs.insert(chain_idx, sym_idx) {
                error!(
                    "Hash match produced duplicate results; symbol {} was already in the table as {}",
                    sym_idx, prev
                );
                out = false;
            }
        }
        out
    }

    /// Serialize the header words and the three arrays
    pub fn write_to(&self, _root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        let mut out = self
            .fields
            .serialize(schema()?, &|_| Ok(None), write)?;
        let word = self.fields.class.word_size();
        let encoding = self.fields.encoding;
        for &b in &self.bloom {
            write(&encoding.write_uint(b, word));
            out += word;
        }
        for &b in &self.buckets {
            write(&encoding.write_uint(u64::from(b), 4));
            out += 4;
        }
        for &c in &self.chains {
            write(&encoding.write_uint(u64::from(c), 4));
            out += 4;
        }
        Ok(out)
    }

    /// Display the header and arrays
    pub fn render(&self, _root: &ElfFile) -> Result<String> {
        let mut out = String::from("GnuHash\n");
        out.push_str(&self.fields.render(schema()?, &|_| Ok(None), &|_| None)?);
        out.push_str(&format!(
            "\tBloom Filters: {:x?}\n\tBuckets:\n",
            self.bloom
        ));
        for (i, bucket) in self.buckets.iter().enumerate() {
            out.push_str(&format!("\t\t{i}: {bucket}\n"));
        }
        out.push_str("\tChains:\n");
        for (i, chain) in self.chains.iter().enumerate() {
            out.push_str(&format!("\t\t{i}: {chain:x}\n"));
        }
        Ok(out)
    }
}
