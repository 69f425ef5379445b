//! Cross-architecture ABI facts the tracer needs to inject syscalls and function calls.
//!
//! The distilled spec's §9 design notes ask for exactly this seam: "an ABI interface that
//! provides: syscall-arg registers; syscall-number register; function-arg registers
//! (integer and FP); return-value registers; IP and SP getters/setters; encoding of a 'trap
//! here' instruction; encoding of a 'syscall' instruction; the aligned padding length for
//! code injection." `x86_64` and `aarch64` each get one implementation; a traced child is
//! always the tracer's own architecture, since ptrace requires matching word size, so the
//! active ABI is chosen once via `#[cfg(target_arch)]` rather than at runtime.

pub(crate) mod aarch64;
pub(crate) mod x86_64;

pub use aarch64::Aarch64Abi;
pub use x86_64::X86_64Abi;

/// Number of bytes of tracee code a syscall/call injection sequence overwrites and restores.
/// Fixed at 8 on both supported architectures (one instruction plus padding).
pub const CODE_PATCH_LEN: usize = 8;

/// Architecture-specific facts needed by [`crate::tracer::Tracer`].
///
/// Implementations are zero-sized; the trait exists purely to give the tracer one
/// compile-time-selected place to ask "which register holds X".
pub trait Abi {
    /// Maximum number of integer/pointer arguments the call-injection path supports.
    const MAX_INT_ARGS: usize;
    /// Maximum number of floating-point arguments the call-injection path supports (0 on
    /// AArch64, per the distilled spec's non-goals).
    const MAX_FP_ARGS: usize;

    /// Machine code for a breakpoint ("trap here") instruction, used as the return-landing
    /// sentinel for function-call injection.
    fn trap_instruction() -> [u8; CODE_PATCH_LEN];

    /// Machine code for a raw syscall instruction, used to inject arbitrary syscalls.
    fn syscall_instruction() -> [u8; CODE_PATCH_LEN];
}

#[cfg(target_arch = "x86_64")]
pub type NativeAbi = X86_64Abi;

#[cfg(target_arch = "aarch64")]
pub type NativeAbi = Aarch64Abi;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("asmgrader only supports tracing x86_64 and aarch64 children");
