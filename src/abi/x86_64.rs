//! x86-64 SysV ABI facts, as used by the subset of the calling convention the tracer cares
//! about: syscall entry (`rdi, rsi, rdx, r10, r8, r9`, number in `rax`) and the C calling
//! convention's integer-argument registers (`rdi, rsi, rdx, rcx, r8, r9`).

use super::{Abi, CODE_PATCH_LEN};

pub struct X86_64Abi;

impl Abi for X86_64Abi {
    const MAX_INT_ARGS: usize = 6;
    const MAX_FP_ARGS: usize = 8;

    fn trap_instruction() -> [u8; CODE_PATCH_LEN] {
        // INT3 (0xCC) followed by NOP padding.
        [0xCC, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90]
    }

    fn syscall_instruction() -> [u8; CODE_PATCH_LEN] {
        // SYSCALL (0F 05) followed by NOP padding.
        [0x0F, 0x05, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90]
    }
}

/// Write `value` into the `n`th integer-argument register (0-indexed, SysV order:
/// rdi, rsi, rdx, rcx, r8, r9). Panics on `n >= 6` — the caller (the tracer's argument
/// marshalling loop) already enforces `MAX_INT_ARGS`.
pub fn set_int_arg(regs: &mut libc::user_regs_struct, n: usize, value: u64) {
    match n {
        0 => regs.rdi = value,
        1 => regs.rsi = value,
        2 => regs.rdx = value,
        3 => regs.rcx = value,
        4 => regs.r8 = value,
        5 => regs.r9 = value,
        _ => unreachable!("x86_64 call injection only supports 6 integer arguments"),
    }
}

/// Write `value` into the `n`th syscall-argument register (SysV syscall order:
/// rdi, rsi, rdx, r10, r8, r9 — note r10 replaces rcx, since the `syscall` instruction
/// clobbers rcx with the return address).
pub fn set_syscall_arg(regs: &mut libc::user_regs_struct, n: usize, value: u64) {
    match n {
        0 => regs.rdi = value,
        1 => regs.rsi = value,
        2 => regs.rdx = value,
        3 => regs.r10 = value,
        4 => regs.r8 = value,
        5 => regs.r9 = value,
        _ => unreachable!("syscalls take at most 6 arguments"),
    }
}

pub fn set_syscall_nr(regs: &mut libc::user_regs_struct, nr: u64) {
    regs.rax = nr;
}

/// The syscall number at entry. Read from `orig_rax`, not `rax` — `rax` is also the return
/// value register, so only `orig_rax` is guaranteed to still hold the number once the kernel
/// has started servicing the call.
pub fn syscall_nr(regs: &libc::user_regs_struct) -> i64 {
    regs.orig_rax as i64
}

/// The six syscall-argument registers in calling-convention order, regardless of how many
/// the specific syscall actually uses.
pub fn syscall_args(regs: &libc::user_regs_struct) -> [u64; 6] {
    [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9]
}

pub fn syscall_ret(regs: &libc::user_regs_struct) -> i64 {
    regs.rax as i64
}

pub fn ip(regs: &libc::user_regs_struct) -> u64 {
    regs.rip
}

pub fn set_ip(regs: &mut libc::user_regs_struct, addr: u64) {
    regs.rip = addr;
}

pub fn sp(regs: &libc::user_regs_struct) -> u64 {
    regs.rsp
}

pub fn set_sp(regs: &mut libc::user_regs_struct, addr: u64) {
    regs.rsp = addr;
}

pub fn int_return(regs: &libc::user_regs_struct) -> u64 {
    regs.rax
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_instruction_is_int3_padded_with_nops() {
        crate::logging::init();
        let bytes = X86_64Abi::trap_instruction();
        assert_eq!(bytes[0], 0xCC);
        assert!(bytes[1..].iter().all(|&b| b == 0x90));
    }

    #[test]
    fn syscall_instruction_is_syscall_opcode_padded_with_nops() {
        let bytes = X86_64Abi::syscall_instruction();
        assert_eq!(&bytes[0..2], &[0x0F, 0x05]);
        assert!(bytes[2..].iter().all(|&b| b == 0x90));
    }

    #[test]
    fn int_args_land_in_sysv_order() {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        for (i, v) in [1u64, 2, 3, 4, 5, 6].iter().enumerate() {
            set_int_arg(&mut regs, i, *v);
        }
        assert_eq!((regs.rdi, regs.rsi, regs.rdx, regs.rcx, regs.r8, regs.r9), (1, 2, 3, 4, 5, 6));
    }

    #[test]
    fn syscall_args_replace_rcx_with_r10() {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        for (i, v) in [10u64, 20, 30, 40, 50, 60].iter().enumerate() {
            set_syscall_arg(&mut regs, i, *v);
        }
        assert_eq!(regs.r10, 40);
        assert_eq!(syscall_args(&regs), [10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn syscall_nr_reads_orig_rax_not_rax() {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        regs.orig_rax = 59;
        regs.rax = 0xdeadbeef;
        assert_eq!(syscall_nr(&regs), 59);
    }

    #[test]
    fn ip_and_sp_round_trip() {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        set_ip(&mut regs, 0x4000);
        set_sp(&mut regs, 0x7fff0000);
        assert_eq!(ip(&regs), 0x4000);
        assert_eq!(sp(&regs), 0x7fff0000);
    }
}
