//! Sections that occupy no file bytes, such as `.bss`. Only the logical
//! size is recorded; serialization emits nothing.

use crate::elf::ElfFile;
use crate::error::Result;

/// A section body with no file contents
#[derive(Debug, Clone, Default)]
pub struct NoBits {
    size: usize,
}

impl NoBits {
    /// Record a logical size taken from the section header
    pub fn with_size(size: usize) -> Self {
        Self { size }
    }

    /// The logical size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Serializes to zero bytes
    pub fn write_to(&self, _root: &ElfFile, _write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        Ok(0)
    }

    /// Nothing to check
    pub fn verify(&self, _root: &ElfFile) -> bool {
        true
    }

    /// Display summary
    pub fn render(&self, _root: &ElfFile) -> Result<String> {
        Ok(format!("NoBits[ {} bytes ]\n", self.size))
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_writes_nothing() {
        let body = NoBits::with_size(0x400);
        assert_eq!(body.size(), 0x400);
        let mut out = Vec::new();
        let root = crate::elf::ElfFile::empty();
        let n = body.write_to(&root, &mut |b| out.extend_from_slice(b)).unwrap();
        assert_eq!(n, 0);
        assert!(out.is_empty());
    }
}
