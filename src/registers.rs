//! A snapshot of a traced process's integer and floating-point register files.
//!
//! [`crate::tracer::Tracer`] fills these in via `PTRACE_GETREGSET`/`PTRACE_SETREGSET`
//! (`NT_PRSTATUS` and `NT_FPREGSET`); this module only knows how to read and write the fields
//! within a snapshot already in hand, dispatching to the active [`crate::abi::NativeAbi`]'s
//! register layout.

use crate::abi;
use crate::error::{ErrorKind, Result};

#[cfg(target_arch = "x86_64")]
pub type FpRegs = libc::user_fpregs_struct;

#[cfg(target_arch = "aarch64")]
pub type FpRegs = libc::user_fpsimd_struct;

/// The combined general-purpose and floating-point register state of a traced process at a
/// single stop. `Copy` so call-injection code can stash a pre-call snapshot and restore it
/// afterward without fighting the borrow checker.
#[derive(Clone, Copy)]
pub struct Registers {
    pub int: libc::user_regs_struct,
    pub fp: FpRegs,
}

impl Registers {
    /// A snapshot, but entirely zeroed. Callers fill `int`/`fp` in via ptrace before reading
    /// any accessor below.
    pub fn zeroed() -> Self {
        // SAFETY: both fields are plain-old-data register structs; zero is a valid bit
        // pattern for both on the architectures this crate supports.
        unsafe { std::mem::zeroed() }
    }

    pub fn ip(&self) -> u64 {
        arch_impl::ip(&self.int)
    }

    pub fn set_ip(&mut self, addr: u64) {
        arch_impl::set_ip(&mut self.int, addr)
    }

    pub fn sp(&self) -> u64 {
        arch_impl::sp(&self.int)
    }

    pub fn set_sp(&mut self, addr: u64) {
        arch_impl::set_sp(&mut self.int, addr)
    }

    /// Set the `n`th integer/pointer argument register for an injected function call
    /// (0-indexed). Panics if `n >= Abi::MAX_INT_ARGS`.
    pub fn set_int_arg(&mut self, n: usize, value: u64) {
        arch_impl::set_int_arg(&mut self.int, n, value)
    }

    /// Set the `n`th argument register for an injected syscall (0-indexed, syscall calling
    /// convention, which differs from the C calling convention on x86-64).
    pub fn set_syscall_arg(&mut self, n: usize, value: u64) {
        arch_impl::set_syscall_arg(&mut self.int, n, value)
    }

    pub fn set_syscall_nr(&mut self, nr: u64) {
        arch_impl::set_syscall_nr(&mut self.int, nr)
    }

    /// The syscall number captured at a syscall-entry trap.
    pub fn syscall_nr(&self) -> i64 {
        arch_impl::syscall_nr(&self.int)
    }

    /// The raw six syscall-argument registers, in calling-convention order.
    pub fn syscall_args_raw(&self) -> [u64; 6] {
        arch_impl::syscall_args(&self.int)
    }

    /// Raw return value of a syscall, before the negative-errno convention is interpreted.
    pub fn syscall_ret(&self) -> i64 {
        arch_impl::syscall_ret(&self.int)
    }

    /// Raw return value of a function call injected via the C calling convention.
    pub fn int_return(&self) -> u64 {
        arch_impl::int_return(&self.int)
    }

    #[cfg(target_arch = "x86_64")]
    pub fn fp_return(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        // First two u32 lanes of xmm0, reinterpreted as a 16-byte scratch buffer; callers
        // narrow to f32/f64 as needed.
        out[0..4].copy_from_slice(&self.fp.xmm_space[0].to_ne_bytes());
        out[4..8].copy_from_slice(&self.fp.xmm_space[1].to_ne_bytes());
        out[8..12].copy_from_slice(&self.fp.xmm_space[2].to_ne_bytes());
        out[12..16].copy_from_slice(&self.fp.xmm_space[3].to_ne_bytes());
        out
    }

    /// Set the return address a call-injection sequence's `ret`/branch lands on. On x86-64
    /// this means pushing the address onto the stack (the `call` convention); on AArch64 it
    /// means writing the link register, since `bl`/`ret` don't touch the stack.
    #[cfg(target_arch = "aarch64")]
    pub fn set_return_address_register(&mut self, addr: u64) {
        abi::aarch64::set_lr(&mut self.int, addr)
    }

    /// Set the `n`th floating-point argument register for an injected function call
    /// (0-indexed). `bytes` is the little/native-endian representation of the argument,
    /// `sizeof(f32)` or `sizeof(f64)` long, copied into the low bytes of `xmm`n the way the
    /// original's `setup_raw_arg` does with a raw `memcpy`.
    ///
    /// AArch64 floating-point arguments are an explicit non-goal (see `original_source`'s
    /// `"Floating point parameters not yet supported for aarch64"` static assert), so this
    /// always fails there rather than silently writing to the wrong register file.
    #[cfg(target_arch = "x86_64")]
    pub fn set_fp_arg(&mut self, n: usize, bytes: &[u8]) -> Result<()> {
        use crate::abi::Abi;
        if n >= abi::NativeAbi::MAX_FP_ARGS {
            return Err(ErrorKind::UnknownError);
        }
        let word_off = n * 4;
        let dst = &mut self.fp.xmm_space[word_off] as *mut u32 as *mut u8;
        // SAFETY: `xmm_space` is a `[u32; 64]`, so each of the 16 xmm slots has 16 bytes of
        // room; `bytes` is at most 8 (an f64), well inside one slot.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        Ok(())
    }

    #[cfg(target_arch = "aarch64")]
    pub fn set_fp_arg(&mut self, _n: usize, _bytes: &[u8]) -> Result<()> {
        Err(ErrorKind::UnknownError)
    }
}

#[cfg(target_arch = "x86_64")]
mod arch_impl {
    pub use crate::abi::x86_64::{
        int_return, ip, set_ip, set_int_arg, set_sp, set_syscall_arg, set_syscall_nr, sp,
        syscall_args, syscall_nr, syscall_ret,
    };
}

#[cfg(target_arch = "aarch64")]
mod arch_impl {
    pub use crate::abi::aarch64::{
        int_return, ip, set_ip, set_int_arg, set_sp, set_syscall_arg, set_syscall_nr, sp,
        syscall_args, syscall_nr, syscall_ret,
    };
}
