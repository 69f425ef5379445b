//! Typed, failure-reporting adapters over the handful of raw Linux syscalls the harness
//! needs: `read`, `write`, `close`, `fork`, `execve`, `dup2`, `pipe2`, `fcntl`, `ioctl`,
//! `waitid`, `kill`, `ptrace`, `stat`, `getpid`.
//!
//! This is the only module that calls into `libc`/`nix` directly for process and fd
//! management; everything above it goes through these wrappers. Each wrapper logs at debug
//! level on failure and returns `ErrorKind::SyscallFailure` rather than panicking or
//! propagating a raw `errno`.

use std::ffi::CString;
use std::os::unix::io::RawFd;

use nix::sys::signal::Signal;
use nix::sys::wait::Id;
use nix::unistd::Pid;

use crate::error::{ErrorKind, Result};

/// Result of a `fork()`, distinguishing which branch of the split we're in.
pub enum Fork {
    Parent { child: Pid },
    Child,
}

/// Perform `fork()`. Safety of what runs in the child branch is the caller's
/// responsibility — see `nix::unistd::fork`'s own safety notes about async-signal-safety.
///
/// # Safety
/// The child branch must only call async-signal-safe functions until it execs or exits,
/// per `fork(2)`.
pub unsafe fn fork() -> Result<Fork> {
    match nix::unistd::fork() {
        Ok(nix::unistd::ForkResult::Parent { child }) => Ok(Fork::Parent { child }),
        Ok(nix::unistd::ForkResult::Child) => Ok(Fork::Child),
        Err(e) => {
            log::debug!("fork failed: {e}");
            Err(e.into())
        }
    }
}

/// `execve(path, [path, ...args], [])` with an empty environment, per the harness's
/// external-interface contract (§6): the student binary never sees host environment
/// variables.
pub fn execve(path: &str, args: &[String]) -> Result<()> {
    let c_path = CString::new(path).map_err(|_| ErrorKind::UnknownError)?;
    let mut c_args = Vec::with_capacity(args.len() + 1);
    c_args.push(CString::new(path).map_err(|_| ErrorKind::UnknownError)?);
    for a in args {
        c_args.push(CString::new(a.as_str()).map_err(|_| ErrorKind::UnknownError)?);
    }
    let empty_env: [CString; 0] = [];

    let res = nix::unistd::execve(&c_path, &c_args, &empty_env);
    // execve only returns on failure.
    log::debug!("execve({path:?}, {args:?}) failed: {res:?}");
    Err(res.unwrap_err().into())
}

// dup2/close/pipe2/read/write go straight to libc rather than through `nix::unistd`: this
// crate keeps pipe fds as plain `RawFd` fields on `Subprocess` (matching the rest of this
// module's raw-fd style for pids and addresses), and nix's I/O-safety-era signatures for
// these five move fd ownership around instead of taking/returning bare `RawFd`s.

pub fn dup2(old_fd: RawFd, new_fd: RawFd) -> Result<()> {
    // SAFETY: `old_fd`/`new_fd` are plain integers; dup2 itself validates them.
    let res = unsafe { libc::dup2(old_fd, new_fd) };
    if res == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("dup2({old_fd}, {new_fd}) failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    Ok(())
}

pub fn close(fd: RawFd) -> Result<()> {
    // SAFETY: `fd` is a plain integer; close itself validates it.
    let res = unsafe { libc::close(fd) };
    if res == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("close({fd}) failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    Ok(())
}

/// A pipe's two ends, read end first — matches the ordering `pipe2(2)` uses for its
/// `int pipefd[2]` out-parameter.
pub struct Pipe {
    pub read_fd: RawFd,
    pub write_fd: RawFd,
}

pub fn pipe2(flags: nix::fcntl::OFlag) -> Result<Pipe> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // SAFETY: `fds` is a valid 2-element out-parameter for pipe2(2).
    let res = unsafe { libc::pipe2(fds.as_mut_ptr(), flags.bits()) };
    if res == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("pipe2 failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    Ok(Pipe {
        read_fd: fds[0],
        write_fd: fds[1],
    })
}

pub fn read(fd: RawFd, count: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    // SAFETY: `buf` is valid for `count` bytes and owned for the duration of the call.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, count) };
    if n == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("read({fd}, {count}) failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    buf.truncate(n as usize);
    Ok(buf)
}

pub fn write(fd: RawFd, data: &[u8]) -> Result<usize> {
    // SAFETY: `data` is valid for its own length for the duration of the call.
    let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    if n == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("write({fd}) failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    Ok(n as usize)
}

pub fn fcntl_getfl(fd: RawFd) -> Result<nix::fcntl::OFlag> {
    // SAFETY: F_GETFL takes no variadic argument.
    let raw = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if raw == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("fcntl(F_GETFL, {fd}) failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    Ok(nix::fcntl::OFlag::from_bits_truncate(raw))
}

pub fn fcntl_setfl(fd: RawFd, flags: nix::fcntl::OFlag) -> Result<()> {
    // SAFETY: F_SETFL's variadic argument is a plain `c_int` of flag bits.
    let res = unsafe { libc::fcntl(fd, libc::F_SETFL, flags.bits()) };
    if res == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("fcntl(F_SETFL, {fd}) failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    Ok(())
}

/// `ioctl(fd, FIONREAD, &mut n)`: number of bytes currently available to read without
/// blocking.
pub fn ioctl_fionread(fd: RawFd) -> Result<usize> {
    let mut avail: libc::c_int = 0;
    // SAFETY: FIONREAD writes exactly one `c_int` through the pointer we give it.
    let res = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut avail as *mut libc::c_int) };
    if res == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("ioctl(FIONREAD, {fd}) failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    Ok(avail.max(0) as usize)
}

pub fn kill(pid: Pid, signal: Signal) -> Result<()> {
    nix::sys::signal::kill(pid, signal).map_err(|e| {
        log::debug!("kill({pid}, {signal}) failed: {e}");
        e.into()
    })
}

/// `kill(pid, 0)` used purely to probe liveness; `ESRCH` means "not alive", any other
/// outcome (including success) means "alive".
pub fn is_alive(pid: Pid) -> bool {
    !matches!(
        nix::sys::signal::kill(pid, None),
        Err(nix::errno::Errno::ESRCH)
    )
}

pub fn getpid() -> Pid {
    nix::unistd::getpid()
}

/// The subset of `/proc/[pid]/stat` fields the tracer's invariant check needs: pid, comm,
/// state character, ppid. See proc(5).
pub struct ProcStat {
    pub pid: i32,
    pub state: char,
    pub ppid: i32,
}

pub fn read_proc_stat(pid: Pid) -> Result<ProcStat> {
    let path = format!("/proc/{pid}/stat");
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        log::debug!("reading {path} failed: {e}");
        ErrorKind::from(e)
    })?;
    parse_proc_stat(&contents)
}

/// Parse the contents of `/proc/[pid]/stat`, pulled out of [`read_proc_stat`] so the format's
/// quirks (`comm` is parenthesized and may itself contain spaces or parens) can be unit
/// tested against literal strings instead of a live `/proc` entry.
fn parse_proc_stat(contents: &str) -> Result<ProcStat> {
    // comm is parenthesized and may itself contain spaces/parens, so split on the last ')'.
    let close_paren = contents.rfind(')').ok_or(ErrorKind::UnknownError)?;
    let rest = &contents[close_paren + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields
        .next()
        .and_then(|s| s.chars().next())
        .ok_or(ErrorKind::UnknownError)?;
    let ppid: i32 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(ErrorKind::UnknownError)?;

    let pid_field: i32 = contents
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or(ErrorKind::UnknownError)?;

    Ok(ProcStat {
        pid: pid_field,
        state,
        ppid,
    })
}


/// Wait for any state change in `id`, per `waitid(2)`. Used both directly and by the
/// timeout-polling loop in [`crate::wait`].
pub fn waitid(id: Id, options: nix::sys::wait::WaitPidFlag) -> Result<nix::libc::siginfo_t> {
    // nix's waitid API doesn't expose the raw siginfo_t, but the event decoder needs the raw
    // si_code/si_status encoding described in ptrace(2), so we call libc directly here.
    let mut info: nix::libc::siginfo_t = unsafe { std::mem::zeroed() };
    let (idtype, id_val): (libc::idtype_t, libc::id_t) = match id {
        Id::Pid(p) => (libc::P_PID, p.as_raw() as libc::id_t),
        Id::PGid(p) => (libc::P_PGID, p.as_raw() as libc::id_t),
        Id::All => (libc::P_ALL, 0),
        #[allow(unreachable_patterns)]
        _ => (libc::P_PID, 0),
    };

    // SAFETY: `info` is zero-initialized and large enough; waitid fills it in on success.
    let res = unsafe { libc::waitid(idtype, id_val, &mut info, options.bits()) };
    if res == -1 {
        let e = nix::errno::Errno::last();
        log::debug!("waitid failed: {e}");
        return Err(ErrorKind::SyscallFailure(e.into()));
    }
    Ok(info)
}

pub fn raise(signal: Signal) -> Result<()> {
    nix::sys::signal::raise(signal).map_err(|e| {
        log::debug!("raise({signal}) failed: {e}");
        e.into()
    })
}

/// Raw `ptrace(2)` call. `ptrace` is unusual among syscalls in that it can legitimately
/// return -1 on success (e.g. `PTRACE_PEEKTEXT` returning a word whose bit pattern happens
/// to equal -1), so the convention here is: clear errno before the call, and only treat a
/// -1 return as failure if errno was actually set.
///
/// # Safety
/// `addr` and `data` must be valid for whatever `request` interprets them as (a raw address
/// in the tracee, or a pointer to/from host memory, depending on the request).
pub unsafe fn ptrace_raw(
    request: libc::c_uint,
    pid: Pid,
    addr: *mut libc::c_void,
    data: *mut libc::c_void,
) -> Result<libc::c_long> {
    nix::errno::Errno::clear();
    let res = libc::ptrace(request as libc::c_uint, pid.as_raw(), addr, data);
    if res == -1 {
        let e = nix::errno::Errno::last();
        if e != nix::errno::Errno::UnknownErrno && (e as i32) != 0 {
            log::debug!("ptrace(request={request}, pid={pid}) failed: {e}");
            return Err(ErrorKind::SyscallFailure(e.into()));
        }
    }
    Ok(res)
}
