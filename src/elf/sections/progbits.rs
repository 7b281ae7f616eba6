//! Opaque section contents. Program bits are carried through untouched, and
//! any section type without a dedicated body falls back to this one.

use crate::elf::ElfFile;
use crate::error::Result;

/// A section body held as raw bytes
#[derive(Debug, Clone, Default)]
pub struct ProgBits {
    data: Vec<u8>,
}

impl ProgBits {
    /// Capture the section's bytes verbatim
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// The section's size
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Write the bytes back verbatim
    pub fn write_to(&self, _root: &ElfFile, write: &mut dyn FnMut(&[u8])) -> Result<usize> {
        write(&self.data);
        Ok(self.data.len())
    }

    /// Program bits have no internal structure to check
    pub fn verify(&self, _root: &ElfFile) -> bool {
        true
    }

    /// Display summary
    pub fn render(&self, _root: &ElfFile) -> Result<String> {
        Ok(format!("ProgBits[ {} bytes ]\n", self.data.len()))
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip() {
        let body = ProgBits::from_bytes(&[1, 2, 3]);
        assert_eq!(body.size(), 3);
        let mut out = Vec::new();
        let root = crate::elf::ElfFile::empty();
        let n = body.write_to(&root, &mut |b| out.extend_from_slice(b)).unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, vec![1, 2, 3]);
    }
}
