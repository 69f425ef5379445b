//! Spawns and manages the lifecycle of the student binary being graded: fork/exec with piped
//! stdio, liveness and exit-status tracking, and a non-blocking, cursor-based view onto
//! whatever the child has written to stdout so far.
//!
//! Ground truth is the original implementation's `Subprocess` class (`subprocess.cpp`):
//! `pipe2` both directions, `fork`, the child traces itself and execs, the parent makes the
//! stdout read end non-blocking and polls it with `ioctl(FIONREAD)` rather than blocking
//! `read`. [`crate::tracer::Tracer`] owns the ptrace side of the relationship; this module
//! only owns getting the process running and talking to it over its pipes.

use std::time::Duration;

use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::error::{ErrorKind, Result};
use crate::linux;
use crate::wait::{wait_with_timeout, WaitEvent};

/// How long [`Subprocess::kill`] waits for the child to actually die before giving up.
const KILL_TIMEOUT: Duration = Duration::from_millis(10);

pub struct Subprocess {
    path: String,
    args: Vec<String>,
    pid: Pid,
    stdin_fd: std::os::unix::io::RawFd,
    stdout_fd: std::os::unix::io::RawFd,
    /// Everything read from the child's stdout so far, plus a cursor marking how much of it
    /// [`Subprocess::read_stdout`] has already handed back — matches the original's
    /// read-then-advance-cursor buffering, which lets callers re-read from an earlier point
    /// without losing bytes still in flight.
    stdout_buf: Vec<u8>,
    stdout_cursor: usize,
}

impl Subprocess {
    /// Fork, set the child up to be traced, and exec `path` with `args`. The caller is
    /// expected to be the one doing the tracing (this is always used by
    /// [`crate::program::Program`], which owns a [`crate::tracer::Tracer`] for `pid()`).
    pub fn start(path: &str, args: &[String]) -> Result<Self> {
        let stdin_pipe = linux::pipe2(OFlag::empty())?;
        let stdout_pipe = linux::pipe2(OFlag::empty())?;

        // SAFETY: the child branch below only calls functions documented as
        // async-signal-safe (dup2, close, ptrace, raise, execve) before it execs or exits.
        match unsafe { linux::fork()? } {
            linux::Fork::Child => {
                let _ = linux::close(stdin_pipe.write_fd);
                let _ = linux::close(stdout_pipe.read_fd);
                let _ = linux::dup2(stdin_pipe.read_fd, libc::STDIN_FILENO);
                let _ = linux::dup2(stdout_pipe.write_fd, libc::STDOUT_FILENO);
                let _ = linux::close(stdin_pipe.read_fd);
                let _ = linux::close(stdout_pipe.write_fd);

                if nix::sys::ptrace::traceme().is_err() {
                    std::process::exit(127);
                }
                // Stop here so the parent can set ptrace options before the real exec runs;
                // the parent resumes us, and PTRACE_O_TRACEEXEC reports the exec as a
                // distinct stop the parent waits for next.
                let _ = linux::raise(Signal::SIGSTOP);

                let _ = linux::execve(path, args);
                std::process::exit(127);
            }
            linux::Fork::Parent { child } => {
                linux::close(stdin_pipe.read_fd)?;
                linux::close(stdout_pipe.write_fd)?;

                let flags = linux::fcntl_getfl(stdout_pipe.read_fd)?;
                linux::fcntl_setfl(stdout_pipe.read_fd, flags | OFlag::O_NONBLOCK)?;

                Ok(Subprocess {
                    path: path.to_string(),
                    args: args.to_vec(),
                    pid: child,
                    stdin_fd: stdin_pipe.write_fd,
                    stdout_fd: stdout_pipe.read_fd,
                    stdout_buf: Vec::new(),
                    stdout_cursor: 0,
                })
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        linux::is_alive(self.pid)
    }

    /// Block (up to `timeout`) for the child to exit, returning its exit code.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Result<i32> {
        let event = wait_with_timeout(self.pid, timeout, crate::wait::DEFAULT_POLL_PERIOD)?;
        event.exit_code.ok_or(ErrorKind::UnknownError)
    }

    /// Send `SIGKILL` and block briefly for the resulting `CLD_KILLED` report. Idempotent:
    /// killing an already-dead child is not an error.
    pub fn kill(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.close_pipes();
        linux::kill(self.pid, Signal::SIGKILL)?;
        let event = wait_with_timeout(self.pid, KILL_TIMEOUT, crate::wait::DEFAULT_POLL_PERIOD)?;
        if !event.is_killed() && !event.is_exited() {
            log::debug!("kill({}) did not observe CLD_KILLED: {event:?}", self.pid);
        }
        Ok(())
    }

    /// Kill the current child (if still alive) and start a fresh one with the same path and
    /// arguments. Used both for explicit test-requested restarts and as recovery after a
    /// function call returns through an unexpected path.
    pub fn restart(&mut self) -> Result<()> {
        let _ = self.kill();
        let fresh = Subprocess::start(&self.path, &self.args)?;
        *self = fresh;
        Ok(())
    }

    fn close_pipes(&mut self) {
        // Drain whatever's buffered before closing, so callers that already called
        // get_full_stdout see everything the child managed to write before it died.
        let _ = self.read_stdout_into_buf();
        let _ = linux::close(self.stdin_fd);
        let _ = linux::close(self.stdout_fd);
    }

    pub fn send_stdin(&self, data: &[u8]) -> Result<usize> {
        linux::write(self.stdin_fd, data)
    }

    fn read_stdout_into_buf(&mut self) -> Result<()> {
        let avail = match linux::ioctl_fionread(self.stdout_fd) {
            Ok(n) => n,
            Err(_) => return Ok(()),
        };
        if avail == 0 {
            return Ok(());
        }
        match linux::read(self.stdout_fd, avail) {
            Ok(bytes) => {
                self.stdout_buf.extend_from_slice(&bytes);
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }

    /// Everything written to stdout since the last call to `read_stdout`, advancing the
    /// cursor so the next call only returns new output.
    pub fn read_stdout(&mut self) -> Result<Vec<u8>> {
        self.read_stdout_into_buf()?;
        let out = self.stdout_buf[self.stdout_cursor..].to_vec();
        self.stdout_cursor = self.stdout_buf.len();
        Ok(out)
    }

    /// Like [`Subprocess::read_stdout`], but first `poll`s the host-side read end for up to
    /// `timeout` so a caller that expects output soon doesn't have to busy-loop calling
    /// `read_stdout` itself. A `poll` timeout is not an error — it just means nothing new had
    /// arrived yet, so the call still returns whatever (possibly empty) output is available.
    pub fn read_stdout_with_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.stdout_fd) };
        let mut fds = [nix::poll::PollFd::new(&borrowed, nix::poll::PollFlags::POLLIN)];
        let millis: i32 = timeout.as_millis().try_into().unwrap_or(i32::MAX);
        let _ = nix::poll::poll(&mut fds, millis);
        self.read_stdout()
    }

    /// Everything the child has ever written to stdout, ignoring the read cursor.
    pub fn get_full_stdout(&mut self) -> Result<Vec<u8>> {
        self.read_stdout_into_buf()?;
        Ok(self.stdout_buf.clone())
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = linux::kill(self.pid, Signal::SIGKILL);
            let _ = wait_with_timeout(self.pid, KILL_TIMEOUT, crate::wait::DEFAULT_POLL_PERIOD);
        }
    }
}
