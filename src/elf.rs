//! ELF symbol table loading, via `goblin` rather than the original's `libelf`/`elfio` —
//! `goblin` is the pure-Rust ELF parser the retrieval pack's newer repos reach for, and it
//! needs no system `libelf` to be installed.
//!
//! Ground truth for *which* symbols end up queryable is `SymbolTable`'s constructor in the
//! original implementation: only named, statically-bound symbols are kept. Dynamic symbols
//! exist in the enum for completeness (and because `.dynsym` entries still show up while
//! iterating) but are filtered out before the table is built, matching an assembly grading
//! harness's actual need — it only ever resolves symbols the student's own `.s` file defines.

use std::fs;
use std::path::Path;

use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
    Other,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub address: u64,
    pub binding: SymbolBinding,
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {:#x}", self.name, self.address)
    }
}

fn binding_from_raw(b: u8) -> SymbolBinding {
    match b {
        goblin::elf::sym::STB_LOCAL => SymbolBinding::Local,
        goblin::elf::sym::STB_GLOBAL => SymbolBinding::Global,
        goblin::elf::sym::STB_WEAK => SymbolBinding::Weak,
        _ => SymbolBinding::Other,
    }
}

/// The first four bytes of an ELF file: `0x7F 'E' 'L' 'F'`.
pub fn check_is_elf(path: &Path) -> Result<bool> {
    let bytes = fs::read(path).map_err(ErrorKind::from)?;
    Ok(bytes.len() >= 4 && bytes[0..4] == [0x7F, b'E', b'L', b'F'])
}

/// A flat, queryable table of a binary's statically-bound named symbols.
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Parse `path`'s ELF symbol table(s) (`.symtab` and `.dynsym`), keeping only static,
    /// named entries. Returns `ErrorKind::UnknownError` if the binary has no static symbols
    /// at all — a student binary assembled without `-g`/with symbols stripped can't be graded
    /// by name, which the original implementation treats as a hard construction failure
    /// rather than a lazily-discovered lookup miss.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(ErrorKind::from)?;
        let elf = goblin::elf::Elf::parse(&bytes).map_err(|_| ErrorKind::UnknownError)?;

        let mut symbols = Vec::new();
        for sym in elf.syms.iter() {
            if sym.st_name == 0 {
                continue;
            }
            let Some(name) = elf.strtab.get_at(sym.st_name) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }

            let binding = binding_from_raw(sym.st_bind());
            // goblin exposes .symtab and .dynsym through the same `syms` container only when
            // the binary lacks a section header split between them; in practice ELF always
            // keeps them distinct, so anything reachable via `elf.syms` here is .symtab, i.e.
            // static.
            symbols.push(Symbol {
                name: name.to_string(),
                kind: SymbolKind::Static,
                address: sym.st_value,
                binding,
            });
        }

        if symbols.is_empty() {
            log::debug!("{path:?} has no named static symbols");
            return Err(ErrorKind::UnknownError);
        }

        Ok(SymbolTable { symbols })
    }

    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// The symbol whose address is the greatest one not exceeding `address` — "which function
    /// is this instruction pointer currently inside". Named `find_closest_below` to match
    /// this crate's own convention, even though the value returned is an at-or-below match,
    /// not a strict less-than.
    pub fn find_closest_below(&self, address: u64) -> Option<&Symbol> {
        self.symbols
            .iter()
            .filter(|s| s.address <= address)
            .max_by_key(|s| s.address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, address: u64) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Static,
            address,
            binding: SymbolBinding::Global,
        }
    }

    fn table() -> SymbolTable {
        SymbolTable {
            symbols: vec![sym("_start", 0x1000), sym("sum", 0x1020), sym("strHello", 0x2000)],
        }
    }

    #[test]
    fn check_is_elf_accepts_the_magic_bytes() {
        crate::logging::init();
        let dir = std::env::temp_dir();
        let path = dir.join(format!("elf_magic_test_{}", std::process::id()));
        std::fs::write(&path, [0x7F, b'E', b'L', b'F', 1, 2, 3]).unwrap();
        assert!(check_is_elf(&path).unwrap());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn check_is_elf_rejects_other_files() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("elf_magic_test_reject_{}", std::process::id()));
        std::fs::write(&path, b"not an elf file").unwrap();
        assert!(!check_is_elf(&path).unwrap());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn find_looks_up_by_exact_name() {
        let t = table();
        assert_eq!(t.find("sum").unwrap().address, 0x1020);
        assert!(t.find("nonexistent").is_none());
    }

    #[test]
    fn find_closest_below_picks_the_highest_address_at_or_under() {
        let t = table();
        assert_eq!(t.find_closest_below(0x1025).unwrap().name, "sum");
        assert_eq!(t.find_closest_below(0x1000).unwrap().name, "_start");
        assert!(t.find_closest_below(0x500).is_none());
    }

    #[test]
    fn binding_from_raw_maps_known_values() {
        assert_eq!(binding_from_raw(goblin::elf::sym::STB_LOCAL), SymbolBinding::Local);
        assert_eq!(binding_from_raw(goblin::elf::sym::STB_GLOBAL), SymbolBinding::Global);
        assert_eq!(binding_from_raw(goblin::elf::sym::STB_WEAK), SymbolBinding::Weak);
        assert_eq!(binding_from_raw(0xFF), SymbolBinding::Other);
    }
}
