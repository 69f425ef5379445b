//! Byte-level access to a traced process's address space via `PTRACE_PEEKTEXT`/
//! `PTRACE_POKETEXT`, word-aligned the way the kernel requires.
//!
//! `ptrace` only reads and writes whole `long`s (8 bytes on both supported architectures),
//! at addresses that needn't themselves be 8-byte aligned — the kernel still returns/accepts
//! a full word straddling the requested address. Ground truth for the alignment algorithm is
//! `read_block_impl`/`write_block_impl` in the original implementation's ptrace-backed memory
//! I/O: reads round the start address down to the containing word and the end address up to
//! the next word boundary, discarding the slop; writes that aren't a whole number of words
//! read-modify-write the first and last word so they don't clobber neighboring bytes.

pub mod serde;

use std::marker::PhantomData;

use nix::unistd::Pid;

use crate::error::{ErrorKind, Result};
use crate::linux;

const WORD_SIZE: usize = std::mem::size_of::<libc::c_long>();
const ALIGN_MASK: u64 = (WORD_SIZE - 1) as u64;

/// A typed pointer into a traced process's address space. Carries no ownership of the bytes
/// it names — it's a plain address annotated with the type `T` stored there, the way the
/// teacher's own task interface names `RemotePtr<T>`.
pub struct RemotePtr<T> {
    addr: u64,
    _marker: PhantomData<T>,
}

impl<T> Clone for RemotePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for RemotePtr<T> {}

impl<T> RemotePtr<T> {
    pub fn new(addr: u64) -> Self {
        RemotePtr {
            addr,
            _marker: PhantomData,
        }
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    pub fn offset(&self, bytes: u64) -> Self {
        RemotePtr::new(self.addr + bytes)
    }

    pub fn cast<U>(&self) -> RemotePtr<U> {
        RemotePtr::new(self.addr)
    }
}

/// Byte-granular access to one traced process's memory. Implemented here over `ptrace`;
/// [`crate::memory::serde`] layers typed reads/writes on top.
pub trait MemoryIo {
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>>;
    fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<()>;

    /// Read bytes one word at a time until `pred` returns true for some byte, or `max_len`
    /// bytes have been read, whichever comes first. Used to find e.g. a string's NUL
    /// terminator without a length prefix. Mirrors the original's `read_until` helper.
    ///
    /// Takes `pred` as a `&dyn Fn` rather than `impl Fn`: this module is used almost
    /// exclusively through `&dyn MemoryIo` (see [`crate::memory::serde`] and
    /// [`crate::syscall_table`]), and a generic parameter here would make the trait itself
    /// non-object-safe.
    fn read_until(&self, addr: u64, max_len: usize, pred: &dyn Fn(u8) -> bool) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = addr;
        while out.len() < max_len {
            let chunk = self.read_bytes(cursor, WORD_SIZE)?;
            for &b in &chunk {
                if pred(b) {
                    return Ok(out);
                }
                out.push(b);
                if out.len() >= max_len {
                    return Ok(out);
                }
            }
            cursor += WORD_SIZE as u64;
        }
        Ok(out)
    }
}

/// `MemoryIo` backed by `PTRACE_PEEKTEXT`/`PTRACE_POKETEXT` against a specific tracee.
pub struct PtraceMemoryIo {
    pid: Pid,
}

impl PtraceMemoryIo {
    pub fn new(pid: Pid) -> Self {
        PtraceMemoryIo { pid }
    }

    fn peek_word(&self, addr: u64) -> Result<u64> {
        // SAFETY: PTRACE_PEEKTEXT's "data" argument is ignored; it returns the word directly.
        let word = unsafe {
            linux::ptrace_raw(
                libc::PTRACE_PEEKTEXT as libc::c_uint,
                self.pid,
                addr as *mut libc::c_void,
                std::ptr::null_mut(),
            )?
        };
        Ok(word as u64)
    }

    fn poke_word(&self, addr: u64, word: u64) -> Result<()> {
        // SAFETY: PTRACE_POKETEXT interprets "data" as the word to write, not a pointer.
        unsafe {
            linux::ptrace_raw(
                libc::PTRACE_POKETEXT as libc::c_uint,
                self.pid,
                addr as *mut libc::c_void,
                word as *mut libc::c_void,
            )?;
        }
        Ok(())
    }
}

/// A `MemoryIo` backed by a plain byte map instead of a live tracee, used to unit-test the
/// serde round-trip properties (distilled spec §8, properties 1-3) without forking a child
/// process. `PtraceMemoryIo`'s own word-alignment algorithm is exercised instead by the
/// integration tests under `tests/`, which are the only place a real tracee is available.
#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::MemoryIo;
    use crate::error::Result;

    #[derive(Default)]
    pub(crate) struct FakeMemoryIo {
        bytes: RefCell<HashMap<u64, u8>>,
    }

    impl FakeMemoryIo {
        pub(crate) fn new() -> Self {
            Self::default()
        }
    }

    impl MemoryIo for FakeMemoryIo {
        fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
            let map = self.bytes.borrow();
            Ok((0..len as u64)
                .map(|i| *map.get(&(addr + i)).unwrap_or(&0))
                .collect())
        }

        fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<()> {
            let mut map = self.bytes.borrow_mut();
            for (i, &b) in data.iter().enumerate() {
                map.insert(addr + i as u64, b);
            }
            Ok(())
        }
    }
}

impl MemoryIo for PtraceMemoryIo {
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let aligned_start = addr & !ALIGN_MASK;
        let end = addr + len as u64;
        let aligned_end = (end + ALIGN_MASK) & !ALIGN_MASK;

        let mut words = Vec::with_capacity(((aligned_end - aligned_start) / WORD_SIZE as u64) as usize);
        let mut cursor = aligned_start;
        while cursor < aligned_end {
            words.extend_from_slice(&self.peek_word(cursor)?.to_ne_bytes());
            cursor += WORD_SIZE as u64;
        }

        let skip = (addr - aligned_start) as usize;
        Ok(words[skip..skip + len].to_vec())
    }

    fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let aligned_start = addr & !ALIGN_MASK;
        let end = addr + data.len() as u64;
        let aligned_end = (end + ALIGN_MASK) & !ALIGN_MASK;

        let total = (aligned_end - aligned_start) as usize;
        let mut buf = vec![0u8; total];

        // Word-align by read-modify-write: pull in the words we're about to partially
        // overwrite so the bytes outside [addr, addr+len) survive unchanged.
        let mut cursor = aligned_start;
        let mut i = 0;
        while cursor < aligned_end {
            buf[i..i + WORD_SIZE].copy_from_slice(&self.peek_word(cursor)?.to_ne_bytes());
            cursor += WORD_SIZE as u64;
            i += WORD_SIZE;
        }

        let skip = (addr - aligned_start) as usize;
        buf[skip..skip + data.len()].copy_from_slice(data);

        let mut cursor = aligned_start;
        let mut i = 0;
        while cursor < aligned_end {
            let word = u64::from_ne_bytes(
                buf[i..i + WORD_SIZE]
                    .try_into()
                    .map_err(|_| ErrorKind::UnknownError)?,
            );
            self.poke_word(cursor, word)?;
            cursor += WORD_SIZE as u64;
            i += WORD_SIZE;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeMemoryIo;
    use super::*;

    #[test]
    fn remote_ptr_offset_and_cast() {
        crate::logging::init();
        let p: RemotePtr<u32> = RemotePtr::new(0x2000);
        assert_eq!(p.offset(4).addr(), 0x2004);
        assert!(!p.is_null());
        assert!(RemotePtr::<u32>::new(0).is_null());
        let casted: RemotePtr<u8> = p.cast();
        assert_eq!(casted.addr(), 0x2000);
    }

    #[test]
    fn read_until_stops_at_predicate_byte() {
        let io = FakeMemoryIo::new();
        io.write_bytes(0x100, b"hello\0world").unwrap();
        let out = io.read_until(0x100, 64, &|b| b == 0).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn read_until_respects_max_len() {
        let io = FakeMemoryIo::new();
        io.write_bytes(0x100, b"no terminator at all here").unwrap();
        let out = io.read_until(0x100, 5, &|b| b == 0).unwrap();
        assert_eq!(out.len(), 5);
    }
}
