//! Describes the argument shape of the handful of syscalls the harness knows how to decode
//! into a human-readable [`SyscallRecord`], so `require()` assertions can read `args[1]` as a
//! string instead of a raw register value.
//!
//! Ground truth is the original implementation's `SyscallEntry`/`Param` table
//! (`subprocess/syscall.hpp`): each syscall number maps to a fixed list of parameter kinds,
//! built once as a `const` table rather than looked up from any external database. Only the
//! syscalls this crate's own test scenarios and injected I/O (`read`, `write`, `poll`) need
//! are populated; anything else decodes its arguments as plain integers.

use nix::unistd::Pid;

use crate::error::Result;
use crate::memory::serde::{read_array_until, CString0};
use crate::memory::{MemoryIo, PtraceMemoryIo};

/// How to interpret one argument register when decoding a syscall entry/exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Unused,
    Int32,
    Int64,
    Uint32,
    Uint64,
    VoidPtr,
    CString,
    TimeSpecPtr,
    /// A pointer to a NUL-pointer-terminated array of C-string pointers, as `argv`/`envp` are
    /// passed to `execve`. Corresponds to the original's `NTCStringArray` parameter type.
    NTCStringArray,
}

/// A decoded syscall argument: the raw register value plus, where the parameter kind calls
/// for it, a resolved interpretation (a string read out of tracee memory, say).
#[derive(Debug, Clone)]
pub enum SyscallArg {
    Int(i64),
    UInt(u64),
    Ptr(u64),
    Str(String),
    StrArray(Vec<String>),
}

/// One observed syscall, paired with its decoded arguments and outcome. Returned by
/// [`crate::tracer::Tracer::run_next_syscall`] and accumulated by
/// [`crate::test_context::TestContext::get_syscall_records`].
#[derive(Debug, Clone)]
pub struct SyscallRecord {
    pub num: i64,
    pub args: Vec<SyscallArg>,
    pub ret: std::result::Result<i64, i32>,
    pub instruction_pointer: u64,
    pub stack_pointer: u64,
}

const MAX_CSTRING_LEN: usize = 4096;
/// Cap on how many entries an `NTCStringArray` read will follow before giving up, so a
/// corrupt/unterminated `argv` in the tracee can't make a decode loop forever.
const MAX_NT_ARRAY_LEN: usize = 256;

fn param_kinds(num: i64) -> &'static [ParamKind] {
    use ParamKind::*;
    match num {
        libc::SYS_read => &[Int32, VoidPtr, Uint64],
        libc::SYS_write => &[Int32, VoidPtr, Uint64],
        libc::SYS_poll | libc::SYS_ppoll => &[VoidPtr, Uint64, TimeSpecPtr, VoidPtr],
        libc::SYS_nanosleep => &[TimeSpecPtr, TimeSpecPtr],
        libc::SYS_execve => &[CString, NTCStringArray, NTCStringArray],
        libc::SYS_exit | libc::SYS_exit_group => &[Int32],
        _ => &[Int64, Int64, Int64, Int64, Int64, Int64],
    }
}

/// Decode the six raw argument registers of a syscall entry according to its known param
/// table, resolving `CString`/`VoidPtr` arguments that need a memory read to become useful.
pub fn decode_args(pid: Pid, num: i64, raw: [u64; 6]) -> Result<Vec<SyscallArg>> {
    let io = PtraceMemoryIo::new(pid);
    let kinds = param_kinds(num);

    let mut out = Vec::with_capacity(raw.len());
    for (i, &value) in raw.iter().enumerate() {
        let kind = kinds.get(i).copied().unwrap_or(ParamKind::Unused);
        out.push(match kind {
            ParamKind::Unused => SyscallArg::UInt(value),
            ParamKind::Int32 => SyscallArg::Int(value as i32 as i64),
            ParamKind::Int64 => SyscallArg::Int(value as i64),
            ParamKind::Uint32 => SyscallArg::UInt(value as u32 as u64),
            ParamKind::Uint64 => SyscallArg::UInt(value),
            ParamKind::VoidPtr => SyscallArg::Ptr(value),
            ParamKind::TimeSpecPtr => SyscallArg::Ptr(value),
            ParamKind::CString => {
                if value == 0 {
                    SyscallArg::Str(String::new())
                } else {
                    match CString0::read_bounded(&io, value, MAX_CSTRING_LEN) {
                        Ok(s) => SyscallArg::Str(s.value),
                        Err(_) => SyscallArg::Ptr(value),
                    }
                }
            }
            ParamKind::NTCStringArray => {
                if value == 0 {
                    SyscallArg::StrArray(Vec::new())
                } else {
                    let ptrs: Vec<u64> =
                        read_array_until(&io, value, MAX_NT_ARRAY_LEN, |p: &u64| *p == 0)
                            .unwrap_or_default();
                    let strs = ptrs
                        .into_iter()
                        .map(|p| {
                            CString0::read_bounded(&io, p, MAX_CSTRING_LEN)
                                .map(|s| s.value)
                                .unwrap_or_default()
                        })
                        .collect();
                    SyscallArg::StrArray(strs)
                }
            }
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_takes_an_fd_buffer_and_length() {
        crate::logging::init();
        assert_eq!(
            param_kinds(libc::SYS_write),
            &[ParamKind::Int32, ParamKind::VoidPtr, ParamKind::Uint64]
        );
    }

    #[test]
    fn exit_takes_a_single_status_code() {
        assert_eq!(param_kinds(libc::SYS_exit), &[ParamKind::Int32]);
        assert_eq!(param_kinds(libc::SYS_exit_group), &[ParamKind::Int32]);
    }

    #[test]
    fn unknown_syscalls_decode_as_six_plain_integers() {
        assert_eq!(param_kinds(999_999), &[ParamKind::Int64; 6]);
    }

    #[test]
    fn decode_args_treats_a_null_cstring_pointer_as_empty() {
        // pid is never dereferenced for a null CString pointer, so any pid value is safe here.
        let pid = Pid::from_raw(1);
        let args = decode_args(pid, libc::SYS_execve, [0, 0, 0, 0, 0, 0]).unwrap();
        match &args[0] {
            SyscallArg::Str(s) => assert!(s.is_empty()),
            other => panic!("expected Str, got {other:?}"),
        }
        match &args[1] {
            SyscallArg::StrArray(v) => assert!(v.is_empty()),
            other => panic!("expected StrArray, got {other:?}"),
        }
    }

    #[test]
    fn decode_args_sign_and_zero_extends_by_width() {
        let pid = Pid::from_raw(1);
        let raw: u64 = 0xFFFF_FFFF_FFFF_FFFF;
        let args = decode_args(pid, libc::SYS_read, [raw, raw, raw, 0, 0, 0]).unwrap();
        match args[0] {
            SyscallArg::Int(v) => assert_eq!(v, -1), // Int32 sign-extends
            _ => panic!("expected Int"),
        }
        match args[2] {
            SyscallArg::UInt(v) => assert_eq!(v, raw), // Uint64 passes through unchanged
            _ => panic!("expected UInt"),
        }
    }
}
