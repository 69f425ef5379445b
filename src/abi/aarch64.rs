//! AArch64 AAPCS64 ABI facts, as used by the subset of the calling convention the tracer
//! cares about: syscall entry (`x0..x5`, number in `x8`) and the standard calling
//! convention's integer-argument registers (`x0..x5`) and link register (`x30`) for the
//! return address.
//!
//! Per the distilled spec's non-goals, floating-point arguments and returns are not
//! supported on this architecture.

use super::{Abi, CODE_PATCH_LEN};

pub struct Aarch64Abi;

impl Abi for Aarch64Abi {
    const MAX_INT_ARGS: usize = 6;
    const MAX_FP_ARGS: usize = 0;

    fn trap_instruction() -> [u8; CODE_PATCH_LEN] {
        // BRK #0x1234, little-endian encoding, followed by a NOP (both 4-byte, 32-bit
        // aligned instructions as required by AArch64).
        let brk: u32 = 0xD420_0000 | ((0x1234_u32 & 0xFFFF) << 5);
        let nop: u32 = 0xD503_201F;
        let mut out = [0u8; CODE_PATCH_LEN];
        out[0..4].copy_from_slice(&brk.to_le_bytes());
        out[4..8].copy_from_slice(&nop.to_le_bytes());
        out
    }

    fn syscall_instruction() -> [u8; CODE_PATCH_LEN] {
        // SVC #0, followed by a NOP.
        let svc: u32 = 0xD400_0001;
        let nop: u32 = 0xD503_201F;
        let mut out = [0u8; CODE_PATCH_LEN];
        out[0..4].copy_from_slice(&svc.to_le_bytes());
        out[4..8].copy_from_slice(&nop.to_le_bytes());
        out
    }
}

pub fn set_int_arg(regs: &mut libc::user_regs_struct, n: usize, value: u64) {
    assert!(n < 6, "aarch64 call injection only supports 6 integer arguments");
    regs.regs[n] = value;
}

pub fn set_syscall_arg(regs: &mut libc::user_regs_struct, n: usize, value: u64) {
    assert!(n < 6, "syscalls take at most 6 arguments");
    regs.regs[n] = value;
}

pub fn set_syscall_nr(regs: &mut libc::user_regs_struct, nr: u64) {
    regs.regs[8] = nr;
}

/// The syscall number at entry, from `x8`. Unlike x86-64, AArch64 keeps the syscall number
/// and the return value in different registers, so no `orig_x8` shadow copy is needed.
pub fn syscall_nr(regs: &libc::user_regs_struct) -> i64 {
    regs.regs[8] as i64
}

pub fn syscall_args(regs: &libc::user_regs_struct) -> [u64; 6] {
    [
        regs.regs[0],
        regs.regs[1],
        regs.regs[2],
        regs.regs[3],
        regs.regs[4],
        regs.regs[5],
    ]
}

pub fn syscall_ret(regs: &libc::user_regs_struct) -> i64 {
    regs.regs[0] as i64
}

pub fn ip(regs: &libc::user_regs_struct) -> u64 {
    regs.pc
}

pub fn set_ip(regs: &mut libc::user_regs_struct, addr: u64) {
    regs.pc = addr;
}

pub fn sp(regs: &libc::user_regs_struct) -> u64 {
    regs.sp
}

pub fn set_sp(regs: &mut libc::user_regs_struct, addr: u64) {
    regs.sp = addr;
}

/// Link register (x30); where the callee's `ret` transfers control to.
pub fn set_lr(regs: &mut libc::user_regs_struct, addr: u64) {
    regs.regs[30] = addr;
}

pub fn int_return(regs: &libc::user_regs_struct) -> u64 {
    regs.regs[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_instruction_is_brk_padded_with_a_nop() {
        crate::logging::init();
        let bytes = Aarch64Abi::trap_instruction();
        let brk = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let nop = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(brk & 0xFFE0_001F, 0xD420_0000);
        assert_eq!(nop, 0xD503_201F);
    }

    #[test]
    fn syscall_instruction_is_svc_zero_padded_with_a_nop() {
        let bytes = Aarch64Abi::syscall_instruction();
        let svc = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(svc, 0xD400_0001);
    }

    #[test]
    fn int_args_land_in_x0_through_x5() {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        for (i, v) in [1u64, 2, 3, 4, 5, 6].iter().enumerate() {
            set_int_arg(&mut regs, i, *v);
        }
        assert_eq!(&regs.regs[0..6], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn syscall_nr_reads_x8() {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        set_syscall_nr(&mut regs, 93);
        assert_eq!(syscall_nr(&regs), 93);
    }

    #[test]
    fn lr_and_pc_are_distinct_registers() {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        set_ip(&mut regs, 0x1000);
        set_lr(&mut regs, 0x2000);
        assert_eq!(ip(&regs), 0x1000);
        assert_eq!(regs.regs[30], 0x2000);
    }
}
