//! Crate-wide error type.
//!
//! Mirrors the original implementation's `util::ErrorKind` / `util::Expected<T, ErrorKind>`
//! pair: every fallible operation in this crate returns one of these five kinds rather than
//! a richer error hierarchy, so that test code can match on it directly.

use std::fmt;

/// The five error kinds surfaced at the harness's public interface.
///
/// Contract violations (the child is a zombie, has the wrong parent, or the wait event is
/// nonsense) are not represented here: those abort the process via `assert_invariants`,
/// because at that point nothing about the tracee can be trusted.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A resume step did not observe its expected event within the budget. The tracee is
    /// left force-stopped and usable.
    #[error("operation timed out")]
    TimedOut,

    /// A function or data symbol requested by name is not in the static symbol table.
    #[error("symbol not found in static symbol table")]
    UnresolvedSymbol,

    /// A function invocation returned via some path other than the injected breakpoint.
    /// The subprocess has already been restarted by the time this is returned.
    #[error("function call returned via unexpected path")]
    UnexpectedReturn,

    /// A Linux syscall failed, either host-side in a wrapper or inside the child when
    /// invoked via syscall injection.
    #[error("a Linux syscall failed: {0}")]
    SyscallFailure(SyscallFailureReason),

    /// Catch-all for programming errors that should not normally occur.
    #[error("unknown/internal error")]
    UnknownError,
}

/// The errno captured at the point a wrapped syscall failed, kept distinct from `ErrorKind`
/// itself so that `ErrorKind` stays cheaply `Copy` and comparable while still letting callers
/// inspect *why* a syscall failed when they need to (e.g. distinguishing `ESRCH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallFailureReason(pub i32);

impl fmt::Display for SyscallFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", nix::errno::Errno::from_raw(self.0))
    }
}

impl From<nix::errno::Errno> for SyscallFailureReason {
    fn from(e: nix::errno::Errno) -> Self {
        SyscallFailureReason(e as i32)
    }
}

impl From<i32> for SyscallFailureReason {
    fn from(errno: i32) -> Self {
        SyscallFailureReason(errno)
    }
}

impl From<nix::Error> for ErrorKind {
    fn from(e: nix::Error) -> Self {
        ErrorKind::SyscallFailure(e.into())
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(e: std::io::Error) -> Self {
        let raw = e.raw_os_error().unwrap_or(0);
        ErrorKind::SyscallFailure(SyscallFailureReason(raw))
    }
}

/// Crate-wide result alias, matching `util::Result<T>` in the original implementation.
pub type Result<T> = std::result::Result<T, ErrorKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nix_errno_converts_to_syscall_failure() {
        crate::logging::init();
        let err: ErrorKind = nix::Error::from(nix::errno::Errno::ENOENT).into();
        assert_eq!(err, ErrorKind::SyscallFailure(SyscallFailureReason(nix::errno::Errno::ENOENT as i32)));
    }

    #[test]
    fn io_error_with_os_code_converts_to_syscall_failure() {
        let io_err = std::io::Error::from_raw_os_error(libc::EACCES);
        let err: ErrorKind = io_err.into();
        assert_eq!(err, ErrorKind::SyscallFailure(SyscallFailureReason(libc::EACCES)));
    }

    #[test]
    fn io_error_without_os_code_defaults_to_zero() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "no os code here");
        let err: ErrorKind = io_err.into();
        assert_eq!(err, ErrorKind::SyscallFailure(SyscallFailureReason(0)));
    }

    #[test]
    fn syscall_failure_reason_displays_errno_text() {
        let reason = SyscallFailureReason(nix::errno::Errno::EINVAL as i32);
        assert_eq!(reason.to_string(), nix::errno::Errno::EINVAL.to_string());
    }

    #[test]
    fn error_kind_is_copy_and_comparable() {
        let a = ErrorKind::TimedOut;
        let b = a;
        assert_eq!(a, b);
        assert_ne!(ErrorKind::TimedOut, ErrorKind::UnresolvedSymbol);
    }
}
