//! Script-driven editing of ELF object files.
//!
//! A binary is parsed into an object graph of schema-driven records linked
//! by typed references, mutated by declarative commands (rename symbols,
//! set symbol library versions, move sections, add or move loadable
//! segments, add dynamic entries), re-laid-out so the format's invariants
//! still hold, and emitted bit-exact.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod base;
pub mod elf;
pub mod error;
pub mod ops;
pub mod refs;
pub mod schema;
pub mod script;
pub mod table;

pub use elf::ElfFile;
pub use error::{Error, Result};

/// Parse every embedded schema, surfacing a broken directive as a startup
/// error instead of a failure at first use
pub fn init() -> Result<()> {
    elf::header::schema()?;
    elf::program::schema()?;
    elf::section::schema()?;
    elf::sections::symtab::schema()?;
    elf::sections::rela::schema()?;
    elf::sections::dynamic::schema()?;
    elf::sections::gnu_hash::schema()?;
    elf::sections::versym::schema()?;
    elf::sections::verneed::need_schema()?;
    elf::sections::verneed::aux_schema()?;
    Ok(())
}
