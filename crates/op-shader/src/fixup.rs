//! Program code fixups for known-broken shader binaries
//!
//! Some titles ship geometry shaders without a terminating END that rely on a
//! hardware quirk where output registers are written through. A fixup maps
//! the content hash of such a program to a corrective instruction and the
//! offset where it, followed by END, must be placed.
//!
//! No entries are built in. Per-title entries come from
//! `gpu.shader_fixups` in the configuration, keyed by the hash that
//! `--dump-shaders` prints.

use std::sync::Arc;

use once_cell::sync::Lazy;
use op_core::ShaderFixup;

/// Encoded END instruction
pub const END_INSTRUCTION: u32 = 0x8800_0000;

/// One table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramFixup {
    /// XXH3-64 of the first `biggest_program_size` program words
    pub hash: u64,
    /// Word offset of the corrective instruction
    pub offset: usize,
    /// Corrective instruction, END is written after it
    pub patch: u32,
}

/// Immutable lookup table of program fixups
#[derive(Debug, Clone, Default)]
pub struct ProgramFixupTable {
    entries: Vec<ProgramFixup>,
}

impl ProgramFixupTable {
    /// Create a table from explicit entries
    pub fn new(entries: Vec<ProgramFixup>) -> Self {
        Self { entries }
    }

    /// Find the fixup for a program hash
    pub fn lookup(&self, hash: u64) -> Option<&ProgramFixup> {
        self.entries.iter().find(|entry| entry.hash == hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<&ShaderFixup> for ProgramFixup {
    fn from(fixup: &ShaderFixup) -> Self {
        Self {
            hash: fixup.hash,
            offset: fixup.offset,
            patch: fixup.patch,
        }
    }
}

impl From<&[ShaderFixup]> for ProgramFixupTable {
    fn from(fixups: &[ShaderFixup]) -> Self {
        Self::new(fixups.iter().map(ProgramFixup::from).collect())
    }
}

/// Shared empty table used when no fixups are configured
pub static NO_FIXUPS: Lazy<Arc<ProgramFixupTable>> =
    Lazy::new(|| Arc::new(ProgramFixupTable::default()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_builtin_entries() {
        assert!(NO_FIXUPS.is_empty());
        assert!(NO_FIXUPS.lookup(0).is_none());
    }

    #[test]
    fn test_table_from_config() {
        let configured = [
            ShaderFixup {
                hash: 0x1111,
                offset: 0x6e,
                patch: 0x4c00_0f80,
            },
            ShaderFixup {
                hash: 0x2222,
                offset: 0x13b,
                patch: 0x4c20_1f80,
            },
        ];
        let table = ProgramFixupTable::from(&configured[..]);
        assert_eq!(table.len(), 2);
        let entry = table.lookup(0x2222).unwrap();
        assert_eq!((entry.offset, entry.patch), (0x13b, 0x4c20_1f80));
        assert!(table.lookup(0x3333).is_none());
    }
}
