//! The ptrace state machine: attaching to a freshly-forked, self-traced child; reading and
//! writing registers across both supported architectures via `PTRACE_GETREGSET`/
//! `PTRACE_SETREGSET`; observing syscalls; and injecting both raw syscalls and arbitrary
//! function calls by patching a breakpoint into the tracee's own code stream.
//!
//! Ground truth throughout is the original implementation's `Tracer` class
//! (`tracer.hpp`/`tracer.cpp`): the attach sequence (wait for the initial `SIGSTOP`, set
//! `PTRACE_O_TRACEEXEC | PTRACE_O_TRACESYSGOOD | PTRACE_O_EXITKILL`, continue to the exec
//! event), the `DEFAULT_TIMEOUT` of 10ms, and the code-injection scheme for
//! `execute_syscall`/function calls. `nix`'s safe `ptrace::getregs`/`setregs` only cover
//! x86/x86_64 (`PTRACE_GETREGS` isn't implemented for AArch64), so register access here goes
//! through the lower-level, architecture-uniform `GETREGSET`/`SETREGSET` requests instead.

use std::cell::Cell;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::abi::{Abi, NativeAbi, CODE_PATCH_LEN};
use crate::error::{ErrorKind, Result};
use crate::memory::{MemoryIo, PtraceMemoryIo};
use crate::registers::Registers;
use crate::syscall_table::{decode_args, SyscallRecord};
use crate::wait::{wait_with_timeout, RunResult, WaitEvent};
use crate::{linux, wait};

/// ELF core-note type for the general-purpose register set, per `elf.h`.
const NT_PRSTATUS: i32 = 1;
/// ELF core-note type for the floating-point register set, per `elf.h`.
const NT_FPREGSET: i32 = 2;

/// Outcome of [`Tracer::call_function`]: whether the injected call actually returned through
/// the breakpoint we planted, or the tracee stopped doing something else first.
pub enum CallOutcome {
    /// The call ran to completion and trapped on our landing breakpoint as expected.
    Returned { int_ret: u64, fp_ret: [u8; 16] },
    /// The tracee exited or was killed mid-call. The caller (`Program`) must restart the
    /// subprocess; this `Tracer` is no longer attached to anything live.
    ProcessGone,
    /// The tracee stopped for some other reason (an unrelated signal, a syscall trap it
    /// wasn't supposed to hit, ...). The process is still alive but its state around the call
    /// site can no longer be trusted.
    UnexpectedStop,
    /// The call didn't land on the breakpoint within the step budget. The tracee has already
    /// been forced back to a stopped, traceable state; no restart is needed.
    TimedOut,
}

/// One argument to an injected function call: either an integer/pointer value bound for the
/// next free integer argument register, or a float bound for the next free `xmm`/FP register.
/// Mirrors the original's `setup_raw_arg`, which classifies each argument by
/// `std::floating_point<T>` and advances two independent counters (`num_int`, `num_fp`) rather
/// than one shared one — an `f64` after two `u64`s still lands in `xmm0`, not a third integer
/// register.
#[derive(Clone, Copy, Debug)]
pub enum CallArg {
    Int(u64),
    F32(f32),
    F64(f64),
}

impl CallArg {
    /// Build an all-integer argument list, for the common case of calling a function that
    /// takes no floating-point parameters.
    pub fn ints(values: &[u64]) -> Vec<CallArg> {
        values.iter().map(|&v| CallArg::Int(v)).collect()
    }
}

impl From<u64> for CallArg {
    fn from(v: u64) -> Self {
        CallArg::Int(v)
    }
}
impl From<f32> for CallArg {
    fn from(v: f32) -> Self {
        CallArg::F32(v)
    }
}
impl From<f64> for CallArg {
    fn from(v: f64) -> Self {
        CallArg::F64(v)
    }
}

pub struct Tracer {
    pid: Pid,
    /// Base address of the tracee-side scratch page, set once by [`Tracer::alloc_scratch_page`]
    /// and refreshed on every [`crate::program::Program::restart`]. `Cell` because call
    /// injection needs to bump `mmap_used` through a `&self` (the tracer is reached through a
    /// shared borrow from handles that also need to read memory at the same time).
    mmap_base: Cell<u64>,
    /// Per-call scratch bump cursor, reset to 0 at the start of every
    /// [`Tracer::call_function`]. Distinct from [`crate::program::Program`]'s own persistent,
    /// top-down `alloced_mem` counter: this one grows bottom-up from `mmap_base` and only needs
    /// to survive a single call (the return-landing breakpoint, plus any aggregate arguments
    /// written to scratch by the caller), matching `mmaped_used_amt_` in the original.
    mmap_used: Cell<u64>,
}

impl Tracer {
    /// Default budget for a single resume-and-wait step. Matches the original's
    /// `Tracer::DEFAULT_TIMEOUT`.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

    /// Attach to a child that has just called `PTRACE_TRACEME` and raised `SIGSTOP` against
    /// itself (see [`crate::subprocess::Subprocess::start`]), and drive it through its exec so
    /// it's stopped at its real entry point with options set.
    pub fn attach(pid: Pid) -> Result<Self> {
        // The child is stopped on its own SIGSTOP; reap that event before touching it.
        let initial = wait_with_timeout(pid, Self::DEFAULT_TIMEOUT, wait::DEFAULT_POLL_PERIOD)?;
        if !initial.is_stopped_or_trapped() {
            return Err(ErrorKind::UnknownError);
        }

        let options = nix::sys::ptrace::Options::PTRACE_O_TRACEEXEC
            | nix::sys::ptrace::Options::PTRACE_O_TRACESYSGOOD
            | nix::sys::ptrace::Options::PTRACE_O_EXITKILL;
        nix::sys::ptrace::setoptions(pid, options).map_err(ErrorKind::from)?;

        let tracer = Tracer {
            pid,
            mmap_base: Cell::new(0),
            mmap_used: Cell::new(0),
        };
        tracer.resume_cont()?;

        loop {
            let event = wait_with_timeout(pid, Self::DEFAULT_TIMEOUT, wait::DEFAULT_POLL_PERIOD)?;
            if event.ptrace_event == Some(crate::wait::PtraceEvent::Exec) {
                break;
            }
            if event.is_exited() || event.is_killed() {
                return Err(ErrorKind::UnknownError);
            }
            tracer.resume_cont()?;
        }

        Ok(tracer)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn memory(&self) -> PtraceMemoryIo {
        PtraceMemoryIo::new(self.pid)
    }

    /// Every invariant check the harness performs before trusting the tracee again after a
    /// resume: still traced by us, not a zombie, parent is this process. A violation here
    /// means the tracee contract is broken in a way no recoverable `ErrorKind` covers, so it
    /// aborts rather than returning a `Result`.
    pub fn assert_invariants(&self) {
        let stat = linux::read_proc_stat(self.pid).expect("tracee /proc/[pid]/stat must exist");
        assert_ne!(stat.state, 'Z', "tracee {} is a zombie", self.pid);
        assert_eq!(
            stat.ppid,
            linux::getpid().as_raw(),
            "tracee {} is no longer our child",
            self.pid
        );
    }

    pub fn get_registers(&self) -> Result<Registers> {
        let mut regs = Registers::zeroed();

        let mut int_iov = libc::iovec {
            iov_base: &mut regs.int as *mut _ as *mut libc::c_void,
            iov_len: std::mem::size_of_val(&regs.int),
        };
        unsafe {
            linux::ptrace_raw(
                libc::PTRACE_GETREGSET as libc::c_uint,
                self.pid,
                NT_PRSTATUS as *mut libc::c_void,
                &mut int_iov as *mut _ as *mut libc::c_void,
            )?;
        }

        let mut fp_iov = libc::iovec {
            iov_base: &mut regs.fp as *mut _ as *mut libc::c_void,
            iov_len: std::mem::size_of_val(&regs.fp),
        };
        unsafe {
            linux::ptrace_raw(
                libc::PTRACE_GETREGSET as libc::c_uint,
                self.pid,
                NT_FPREGSET as *mut libc::c_void,
                &mut fp_iov as *mut _ as *mut libc::c_void,
            )?;
        }

        Ok(regs)
    }

    pub fn set_registers(&self, regs: &Registers) -> Result<()> {
        let mut regs = *regs;

        let mut int_iov = libc::iovec {
            iov_base: &mut regs.int as *mut _ as *mut libc::c_void,
            iov_len: std::mem::size_of_val(&regs.int),
        };
        unsafe {
            linux::ptrace_raw(
                libc::PTRACE_SETREGSET as libc::c_uint,
                self.pid,
                NT_PRSTATUS as *mut libc::c_void,
                &mut int_iov as *mut _ as *mut libc::c_void,
            )?;
        }

        let mut fp_iov = libc::iovec {
            iov_base: &mut regs.fp as *mut _ as *mut libc::c_void,
            iov_len: std::mem::size_of_val(&regs.fp),
        };
        unsafe {
            linux::ptrace_raw(
                libc::PTRACE_SETREGSET as libc::c_uint,
                self.pid,
                NT_FPREGSET as *mut libc::c_void,
                &mut fp_iov as *mut _ as *mut libc::c_void,
            )?;
        }

        Ok(())
    }

    fn resume_cont(&self) -> Result<()> {
        unsafe {
            linux::ptrace_raw(
                libc::PTRACE_CONT as libc::c_uint,
                self.pid,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )?;
        }
        Ok(())
    }

    fn resume_syscall(&self) -> Result<()> {
        unsafe {
            linux::ptrace_raw(
                libc::PTRACE_SYSCALL as libc::c_uint,
                self.pid,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )?;
        }
        Ok(())
    }

    /// Resume with `PTRACE_CONT` and wait (up to `Self::DEFAULT_TIMEOUT`) for the next stop.
    /// On timeout, forces a `SIGSTOP` so the tracee remains traceable (per the distilled
    /// spec's §5 cancellation policy) before surfacing `ErrorKind::TimedOut`.
    pub fn run(&self) -> Result<WaitEvent> {
        self.resume_cont()?;
        self.wait_forcing_stop_on_timeout()
    }

    fn wait_forcing_stop_on_timeout(&self) -> Result<WaitEvent> {
        match wait_with_timeout(self.pid, Self::DEFAULT_TIMEOUT, wait::DEFAULT_POLL_PERIOD) {
            Ok(event) => Ok(event),
            Err(ErrorKind::TimedOut) => {
                self.force_stop();
                Err(ErrorKind::TimedOut)
            }
            Err(e) => Err(e),
        }
    }

    /// Deliver `SIGSTOP` and reap the resulting stop, so a tracee that just timed out on a
    /// resume is left in a known, traceable state rather than still free-running.
    fn force_stop(&self) {
        let _ = linux::kill(self.pid, Signal::SIGSTOP);
        let _ = wait_with_timeout(self.pid, Self::DEFAULT_TIMEOUT, wait::DEFAULT_POLL_PERIOD);
    }

    /// Move the instruction pointer directly, without resuming.
    pub fn jump_to(&self, addr: u64) -> Result<()> {
        let mut regs = self.get_registers()?;
        regs.set_ip(addr);
        self.set_registers(&regs)
    }

    /// Allocate `len` bytes of scratch memory inside the tracee via an injected `mmap`, used
    /// both for function-call argument/return scratch space and as the backing for
    /// [`crate::program::Program::alloc_mem`]'s bump allocator. Stores the result as this
    /// tracer's `mmap_base` and resets the per-call cursor.
    ///
    /// Mapped `PROT_READ | PROT_EXEC` only, matching `Tracer::begin`'s `mmap` call in the
    /// original — no `PROT_WRITE`. `PTRACE_POKETEXT` writes to the tracee bypass normal page
    /// permissions (the same mechanism debuggers use to plant breakpoints in `.text`), so the
    /// scratch page never needs to be writable from the tracee's own code, only executable (for
    /// the injected return-landing breakpoint) and readable (for arguments the tracee reads
    /// back out of it).
    pub fn alloc_scratch_page(&self, len: usize) -> Result<u64> {
        let ret = self.execute_syscall(
            libc::SYS_mmap,
            [
                0,
                len as u64,
                (libc::PROT_READ | libc::PROT_EXEC) as u64,
                (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) as u64,
                u64::MAX, // fd = -1
                0,
            ],
        )?;
        if (ret as i64) < 0 {
            return Err(ErrorKind::SyscallFailure((-(ret as i64) as i32).into()));
        }
        self.mmap_base.set(ret);
        self.mmap_used.set(0);
        Ok(ret)
    }

    /// Base address of this tracer's scratch page, as set by [`Tracer::alloc_scratch_page`].
    pub fn mmap_base(&self) -> u64 {
        self.mmap_base.get()
    }

    /// Run one syscall number with the given six raw argument words directly in the tracee,
    /// by patching a `syscall`/`svc` instruction plus a breakpoint into the tracee's code at
    /// its current instruction pointer, running to that breakpoint, and restoring the
    /// original bytes and registers afterward.
    ///
    /// Returns the raw return value register (the tracee's own negative-errno convention,
    /// uninterpreted).
    pub fn execute_syscall(&self, num: i64, args: [u64; 6]) -> Result<u64> {
        let saved_regs = self.get_registers()?;
        let patch_addr = saved_regs.ip();
        let mem = self.memory();
        let saved_code = mem.read_bytes(patch_addr, CODE_PATCH_LEN)?;

        let mut patch = NativeAbi::syscall_instruction().to_vec();
        // The breakpoint the child traps on sits immediately after the syscall instruction
        // proper; NativeAbi::syscall_instruction already reserves the rest of the 8-byte
        // patch as NOP padding, so we overwrite the last instruction slot with a trap
        // instead. Both instruction encodings on both architectures are 4 bytes or fewer, so
        // this never touches the syscall instruction's own bytes.
        let trap = NativeAbi::trap_instruction();
        let trap_len = CODE_PATCH_LEN / 2;
        patch[trap_len..].copy_from_slice(&trap[..CODE_PATCH_LEN - trap_len]);
        mem.write_bytes(patch_addr, &patch)?;

        let mut regs = saved_regs;
        regs.set_syscall_nr(num as u64);
        for (i, &arg) in args.iter().enumerate() {
            regs.set_syscall_arg(i, arg);
        }
        regs.set_ip(patch_addr);
        self.set_registers(&regs)?;

        let result = self.run_to_breakpoint(patch_addr + trap_len as u64);

        mem.write_bytes(patch_addr, &saved_code)?;
        let ret = self.get_registers().map(|r| r.syscall_ret() as u64);
        self.set_registers(&saved_regs)?;

        result?;
        ret
    }

    /// Inject a function call: set up to `Abi::MAX_INT_ARGS` integer/pointer arguments and
    /// `Abi::MAX_FP_ARGS` floating-point arguments, point the instruction pointer at `addr`,
    /// arrange for the call to return into a breakpoint planted in scratch memory, and run
    /// until either that breakpoint fires or the tracee stops some other way.
    ///
    /// Unlike [`Tracer::execute_syscall`] (which patches the tracee's own code at its current
    /// IP, since a raw syscall has nowhere else to return to), the return landing here lives in
    /// the scratch page: `setup_function_call` in the original resets `mmaped_used_amt_` to 0
    /// and writes the landing breakpoint at `mmaped_address_` itself, so the call's return
    /// address never depends on wherever the tracee happened to be stopped.
    pub fn call_function(&self, addr: u64, args: &[CallArg]) -> Result<CallOutcome> {
        self.assert_invariants();
        self.mmap_used.set(0);

        let landing_addr = self.mmap_base.get() + self.mmap_used.get();
        let mem = self.memory();
        mem.write_bytes(landing_addr, &NativeAbi::trap_instruction())?;
        self.mmap_used.set(self.mmap_used.get() + CODE_PATCH_LEN as u64);

        let mut regs = self.get_registers()?;
        set_return_landing(&mut regs, landing_addr, &mem)?;

        let mut num_int = 0usize;
        let mut num_fp = 0usize;
        for arg in args {
            match *arg {
                CallArg::Int(value) => {
                    if num_int >= NativeAbi::MAX_INT_ARGS {
                        return Err(ErrorKind::UnknownError);
                    }
                    regs.set_int_arg(num_int, value);
                    num_int += 1;
                }
                CallArg::F32(value) => {
                    regs.set_fp_arg(num_fp, &value.to_ne_bytes())?;
                    num_fp += 1;
                }
                CallArg::F64(value) => {
                    regs.set_fp_arg(num_fp, &value.to_ne_bytes())?;
                    num_fp += 1;
                }
            }
        }
        regs.set_ip(addr);
        self.set_registers(&regs)?;

        let outcome = match self.run_to_breakpoint(landing_addr) {
            Ok(()) => {
                let after = self.get_registers()?;
                #[cfg(target_arch = "x86_64")]
                let fp_ret = after.fp_return();
                #[cfg(target_arch = "aarch64")]
                let fp_ret = [0u8; 16];
                CallOutcome::Returned {
                    int_ret: after.int_return(),
                    fp_ret,
                }
            }
            Err(ErrorKind::TimedOut) => CallOutcome::TimedOut,
            Err(_) => CallOutcome::ProcessGone,
        };

        Ok(outcome)
    }

    /// Write `amt` bytes of an aggregate call argument into the per-call scratch cursor,
    /// returning the address to pass as the corresponding integer register value. Mirrors
    /// `setup_function_param`'s non-integral, non-pointer branch in the original: the argument
    /// itself is marshalled into the scratch page, and the call gets a pointer to it.
    pub fn write_call_arg_scratch(&self, bytes: &[u8]) -> Result<u64> {
        let loc = self.mmap_base.get() + self.mmap_used.get();
        self.memory().write_bytes(loc, bytes)?;
        self.mmap_used.set(self.mmap_used.get() + bytes.len() as u64);
        Ok(loc)
    }

    /// Resume with `PTRACE_CONT` repeatedly until the tracee traps with its instruction
    /// pointer at `target`, or exits/is killed/times out.
    fn run_to_breakpoint(&self, target: u64) -> Result<()> {
        loop {
            let event = self.run()?;
            if event.is_exited() || event.is_killed() {
                return Err(ErrorKind::UnexpectedReturn);
            }
            if !event.is_stopped_or_trapped() {
                return Err(ErrorKind::UnexpectedReturn);
            }
            let regs = self.get_registers()?;
            if regs.ip() == target || regs.ip() == target + 1 {
                return Ok(());
            }
            // Landed somewhere else (a delivered signal, say); this is the "unexpected
            // return" path, not a hang, so don't loop forever hoping for the right address.
            return Err(ErrorKind::UnexpectedReturn);
        }
    }

    /// Resume until the next syscall-entry trap, decode it, resume again to its matching
    /// exit trap, and fold the two into one [`SyscallRecord`].
    pub fn run_next_syscall(&self) -> Result<SyscallRecord> {
        let entry_regs = self.resume_to_syscall_trap()?;
        let num = entry_regs.syscall_nr();
        let raw_args = entry_regs.syscall_args_raw();
        let args = decode_args(self.pid, num, raw_args)?;
        let instruction_pointer = entry_regs.ip();
        let stack_pointer = entry_regs.sp();

        let _exit_regs = self.resume_to_syscall_trap()?;
        let exit_regs = self.get_registers()?;
        let raw_ret = exit_regs.syscall_ret();
        let ret = if raw_ret < 0 && raw_ret > -4096 {
            Err((-raw_ret) as i32)
        } else {
            Ok(raw_ret)
        };

        Ok(SyscallRecord {
            num,
            args,
            ret,
            instruction_pointer,
            stack_pointer,
        })
    }

    fn resume_to_syscall_trap(&self) -> Result<Registers> {
        loop {
            self.resume_syscall()?;
            let event = self.wait_forcing_stop_on_timeout()?;
            if event.is_exited() || event.is_killed() {
                return Err(ErrorKind::UnexpectedReturn);
            }
            if event.is_syscall_trap {
                return self.get_registers();
            }
            if !event.is_stopped_or_trapped() {
                return Err(ErrorKind::UnexpectedReturn);
            }
            // A ptrace event or unrelated signal stop; keep resuming with PTRACE_SYSCALL
            // until we see the syscall-entry/exit trap specifically.
        }
    }

    /// Free-run the tracee from wherever it's currently stopped (normally just after exec)
    /// until it exits, is killed, or stops on a signal other than the syscall-trap convention,
    /// recording every syscall entry/exit pair observed along the way. Mirrors the "main drive
    /// loop" described in the distilled spec's §4.7: `PTRACE_SYSCALL` repeatedly, folding
    /// entry/exit trap pairs into [`SyscallRecord`]s, until a non-syscall stop ends the run.
    pub fn drive_to_exit(&self) -> Result<(RunResult, Vec<SyscallRecord>)> {
        let mut records = Vec::new();
        loop {
            self.resume_syscall()?;
            let event = self.wait_forcing_stop_on_timeout()?;

            if event.is_exited() {
                return Ok((RunResult::Exited(event.exit_code.unwrap_or(0)), records));
            }
            if event.is_killed() {
                let sig = event.signal.map(|s| s as i32).unwrap_or(0);
                return Ok((RunResult::Killed(sig), records));
            }
            if event.is_syscall_trap {
                let entry_regs = self.get_registers()?;
                let num = entry_regs.syscall_nr();
                let raw_args = entry_regs.syscall_args_raw();
                let args = crate::syscall_table::decode_args(self.pid, num, raw_args)?;
                let instruction_pointer = entry_regs.ip();
                let stack_pointer = entry_regs.sp();

                self.resume_syscall()?;
                let exit_event = self.wait_forcing_stop_on_timeout()?;
                if exit_event.is_exited() {
                    return Ok((RunResult::Exited(exit_event.exit_code.unwrap_or(0)), records));
                }
                if exit_event.is_killed() {
                    let sig = exit_event.signal.map(|s| s as i32).unwrap_or(0);
                    return Ok((RunResult::Killed(sig), records));
                }
                if !exit_event.is_syscall_trap {
                    // The tracee stopped on something other than the matching syscall-exit
                    // trap (an unrelated signal delivered mid-syscall); surface it as
                    // SignalCaught rather than silently dropping the entry half we already
                    // decoded.
                    let sig = exit_event.signal.map(|s| s as i32).unwrap_or(0);
                    return Ok((RunResult::SignalCaught(sig), records));
                }

                let exit_regs = self.get_registers()?;
                let raw_ret = exit_regs.syscall_ret();
                let ret = if raw_ret < 0 && raw_ret > -4096 {
                    Err((-raw_ret) as i32)
                } else {
                    Ok(raw_ret)
                };
                records.push(SyscallRecord {
                    num,
                    args,
                    ret,
                    instruction_pointer,
                    stack_pointer,
                });
                continue;
            }
            if event.is_stopped_or_trapped() {
                let sig = event.signal.map(|s| s as i32).unwrap_or(0);
                return Ok((RunResult::SignalCaught(sig), records));
            }
            return Err(ErrorKind::UnknownError);
        }
    }

    /// Deliver `signal` to the tracee and resume it, without waiting for a further stop.
    /// Used by higher layers that need to forward a signal they don't otherwise interpret.
    pub fn resume_with_signal(&self, signal: Signal) -> Result<()> {
        unsafe {
            linux::ptrace_raw(
                libc::PTRACE_CONT as libc::c_uint,
                self.pid,
                std::ptr::null_mut(),
                signal as i32 as *mut libc::c_void,
            )?;
        }
        Ok(())
    }
}

#[cfg(target_arch = "x86_64")]
fn set_return_landing(regs: &mut Registers, landing_addr: u64, mem: &PtraceMemoryIo) -> Result<()> {
    let new_sp = regs.sp() - 8;
    mem.write_bytes(new_sp, &landing_addr.to_ne_bytes())?;
    regs.set_sp(new_sp);
    Ok(())
}

#[cfg(target_arch = "aarch64")]
fn set_return_landing(regs: &mut Registers, landing_addr: u64, _mem: &PtraceMemoryIo) -> Result<()> {
    regs.set_return_address_register(landing_addr);
    Ok(())
}
