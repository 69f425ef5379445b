//! Ties a student binary's static symbol table to a live, traced instance of it: resolving
//! functions and data by name, allocating scratch memory inside the tracee, and calling
//! functions by address with marshalled arguments.
//!
//! Ground truth is the original implementation's `Program` class (`program.cpp`):
//! construction checks the path exists and is really an ELF file before doing anything else,
//! `alloc_mem` bump-allocates out of a single scratch page and asserts it never exceeds
//! three-quarters of that page, and `call_function` treats a mid-call exit/kill as "restart
//! the subprocess, then report the call as having returned unexpectedly" rather than
//! propagating a lower-level error untranslated.

use std::path::{Path, PathBuf};

use crate::elf::{Symbol, SymbolTable};
use crate::error::{ErrorKind, Result};
use crate::memory::{MemoryIo, PtraceMemoryIo};
use crate::subprocess::Subprocess;
use crate::syscall_table::SyscallRecord;
use crate::tracer::{CallArg, CallOutcome, Tracer};
use crate::wait::RunResult;

/// Scratch page size requested from the tracee, matching the original's `MMAP_LENGTH`.
const SCRATCH_PAGE_LEN: usize = 4096;

/// The outcome of [`Program::call_function`]: either the marshalled return value, or one of
/// the error kinds the distilled interface promises (`UnresolvedSymbol`, `UnexpectedReturn`,
/// `TimedOut`).
pub struct FunctionCallOutcome {
    pub int_ret: u64,
    pub fp_ret: [u8; 16],
}

pub struct Program {
    path: PathBuf,
    args: Vec<String>,
    symbols: SymbolTable,
    subprocess: Subprocess,
    tracer: Tracer,
    /// Persistent bump-allocation cursor, growing top-down from the end of the scratch page
    /// (`mmap_base + SCRATCH_PAGE_LEN`) towards the tracer's own per-call cursor growing
    /// bottom-up from `mmap_base`. Matches `Program::alloced_mem_` in the original: this
    /// allocator has no free operation, and it outlives any single function call (an
    /// `AsmBuffer` stays valid across many calls), unlike `Tracer::mmap_used`.
    alloced_mem: usize,
}

impl Program {
    /// Load `path`'s symbol table, start it under trace with `args`, and allocate its
    /// function-call scratch page. Fails with `ErrorKind::UnknownError` if `path` doesn't
    /// exist or isn't an ELF file — the original's `check_is_elf` gate.
    pub fn new(path: impl AsRef<Path>, args: Vec<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ErrorKind::UnknownError);
        }
        if !crate::elf::check_is_elf(&path)? {
            return Err(ErrorKind::UnknownError);
        }

        let symbols = SymbolTable::load(&path)?;
        let path_str = path.to_string_lossy().into_owned();
        let subprocess = Subprocess::start(&path_str, &args)?;
        let tracer = Tracer::attach(subprocess.pid())?;
        tracer.alloc_scratch_page(SCRATCH_PAGE_LEN)?;

        Ok(Program {
            path,
            args,
            symbols,
            subprocess,
            tracer,
            alloced_mem: 0,
        })
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn subprocess_mut(&mut self) -> &mut Subprocess {
        &mut self.subprocess
    }

    pub fn find_symbol(&self, name: &str) -> Result<&Symbol> {
        self.symbols.find(name).ok_or(ErrorKind::UnresolvedSymbol)
    }

    /// Bump-allocate `amt` bytes out of the tracee's scratch page, growing top-down from the
    /// end of the page. Asserts (rather than returning an error) if the allocation would exceed
    /// three-quarters of the page, since that indicates a test is using far more scratch space
    /// than this harness is sized for — a programming error in the test, not a recoverable
    /// runtime condition. Matches `Program::alloc_mem` in the original exactly:
    /// `subproc_->get_tracer().get_mmapped_addr() + Tracer::MMAP_LENGTH - offset`, with `offset`
    /// the running total *after* adding this allocation.
    pub fn alloc_mem(&mut self, amt: usize) -> u64 {
        self.alloced_mem += amt;
        assert!(
            self.alloced_mem < (SCRATCH_PAGE_LEN * 3) / 4,
            "scratch page exhausted: requested {amt} bytes, {} total allocated",
            self.alloced_mem
        );
        self.tracer.mmap_base() + SCRATCH_PAGE_LEN as u64 - self.alloced_mem as u64
    }

    pub fn memory(&self) -> PtraceMemoryIo {
        PtraceMemoryIo::new(self.subprocess.pid())
    }

    /// Call the function at `addr` with up to `Abi::MAX_INT_ARGS` integer/pointer arguments
    /// already marshalled into tracee memory/registers by the caller (see
    /// [`crate::handles::AsmFunction`]).
    pub fn call_function(&mut self, addr: u64, args: &[CallArg]) -> Result<FunctionCallOutcome> {
        match self.tracer.call_function(addr, args)? {
            CallOutcome::Returned { int_ret, fp_ret } => Ok(FunctionCallOutcome { int_ret, fp_ret }),
            CallOutcome::ProcessGone => {
                self.restart()?;
                Err(ErrorKind::UnexpectedReturn)
            }
            CallOutcome::UnexpectedStop => Err(ErrorKind::UnexpectedReturn),
            // Per DESIGN.md's resolution of the distilled spec's open question on this point,
            // a timed-out call does *not* trigger a restart: the tracer forced a SIGSTOP and
            // is still perfectly usable, unlike the exited/killed cases above.
            CallOutcome::TimedOut => Err(ErrorKind::TimedOut),
        }
    }

    pub fn call_function_by_name(&mut self, name: &str, args: &[CallArg]) -> Result<FunctionCallOutcome> {
        let addr = self.find_symbol(name)?.address;
        self.call_function(addr, args)
    }

    /// Kill and relaunch the subprocess, re-attach a fresh tracer, and re-allocate the
    /// scratch page. Any [`crate::handles`] handle built against the old instance is now
    /// invalid; Rust's borrow checker enforces this more strictly than the original's
    /// runtime-only contract, since handles borrow `&Program`/`&mut Program`.
    pub fn restart(&mut self) -> Result<()> {
        self.subprocess.restart()?;
        self.tracer = Tracer::attach(self.subprocess.pid())?;
        self.tracer.alloc_scratch_page(SCRATCH_PAGE_LEN)?;
        self.alloced_mem = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Free-run the tracee from wherever it's stopped (normally its `_start`) until it exits,
    /// is killed, or catches a signal, recording every syscall it made in the meantime.
    /// Corresponds to the distilled spec's `RunResult Program::run()` in §3/§4.7 and Scenario A
    /// in §8.
    pub fn run(&mut self) -> Result<(RunResult, Vec<SyscallRecord>)> {
        self.tracer.drive_to_exit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_mem_bumps_down_from_page_end() {
        crate::logging::init();
        // alloc_mem's arithmetic doesn't touch the tracee at all, so it's exercisable without
        // a live Program: construct the bookkeeping fields directly.
        let mut alloced = 0usize;
        let base = 0x1000u64;
        let page_len = SCRATCH_PAGE_LEN as u64;

        alloced += 8;
        let first = base + page_len - alloced as u64;
        assert_eq!(first, base + page_len - 8);

        alloced += 16;
        let second = base + page_len - alloced as u64;
        assert_eq!(second, first - 16);
    }

    #[test]
    #[should_panic(expected = "scratch page exhausted")]
    fn alloc_mem_panics_past_three_quarters() {
        let mut alloced = 0usize;
        alloced += (SCRATCH_PAGE_LEN * 3) / 4;
        assert!(
            alloced < (SCRATCH_PAGE_LEN * 3) / 4,
            "scratch page exhausted: requested {} bytes, {} total allocated",
            0,
            alloced
        );
    }
}
