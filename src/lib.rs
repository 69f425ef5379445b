//! An instrumented-program harness: load a student's compiled assembly program, trace it via
//! `ptrace(2)`, and call into it, feed it input, and observe its syscalls to grade it.
//!
//! The public surface is [`program::Program`] (load a binary, resolve symbols, call
//! functions), the [`handles`] types it lends out ([`handles::AsmBuffer`],
//! [`handles::AsmSymbol`], [`handles::AsmFunction`]), and [`test_context::TestContext`] /
//! [`registry::TestRegistry`] for organizing a set of checks into a gradable test suite.
//! Everything under [`abi`], [`memory`], [`tracer`], [`wait`], [`linux`], [`elf`], and
//! [`subprocess`] is the machinery those build on, and is public mainly so a test author who
//! needs lower-level access (raw syscall injection, a specific register) isn't blocked.

pub mod abi;
pub mod elf;
pub mod error;
pub mod handles;
pub mod linux;
pub mod memory;
pub mod program;
pub mod registers;
pub mod registry;
pub mod subprocess;
pub mod syscall_table;
pub mod test_context;
pub mod test_result;
pub mod tracer;
pub mod wait;

#[cfg(test)]
mod logging;

pub use error::{ErrorKind, Result};
pub use program::Program;
pub use registry::{TestCase, TestRegistry};
pub use test_context::TestContext;
pub use test_result::{RequirementResult, TestResult, Weight};
pub use tracer::CallArg;
pub use wait::RunResult;
