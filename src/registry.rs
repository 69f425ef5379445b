//! An explicit, in-process registry of test cases.
//!
//! The original implementation discovers tests via a global static registrar: each
//! `ASSIGNMENT_TEST` macro invocation runs a constructor at static-init time that pushes
//! itself onto a process-wide singleton list. Rust has no equivalent to C++'s
//! static-initialization-order-controlled global registrars without reaching for a
//! proc-macro/`inventory`-style setup, and the distilled interface doesn't ask for one —
//! callers build a [`TestRegistry`] explicitly and register cases into it, which is both
//! simpler and keeps test discovery free of init-order surprises.

use crate::error::Result;
use crate::program::Program;
use crate::test_context::TestContext;
use crate::test_result::{TestResult, Weight};

/// One runnable test case: a name, an optional weight override, and the closure that
/// exercises the student program via a [`TestContext`].
pub struct TestCase {
    pub name: String,
    pub weight: Weight,
    run: Box<dyn Fn(&mut TestContext) -> Result<()>>,
}

impl TestCase {
    pub fn new(
        name: impl Into<String>,
        weight: Weight,
        run: impl Fn(&mut TestContext) -> Result<()> + 'static,
    ) -> Self {
        TestCase {
            name: name.into(),
            weight,
            run: Box::new(run),
        }
    }
}

#[derive(Default)]
pub struct TestRegistry {
    cases: Vec<TestCase>,
}

impl TestRegistry {
    pub fn new() -> Self {
        TestRegistry::default()
    }

    pub fn register(&mut self, case: TestCase) {
        self.cases.push(case);
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Run every registered case against a fresh [`Program`] built from `binary_path`,
    /// restarting the program between cases so one test's state can't leak into the next.
    pub fn run_all(&self, binary_path: &str, args: &[String]) -> Result<Vec<TestResult>> {
        let mut results = Vec::with_capacity(self.cases.len());
        for case in &self.cases {
            let mut program = Program::new(binary_path, args.to_vec())?;
            let mut ctx = TestContext::new(&mut program, case.name.clone(), case.weight);
            if let Err(e) = (case.run)(&mut ctx) {
                log::debug!("test {:?} aborted: {e}", case.name);
                ctx.set_error(e);
            }
            results.push(ctx.into_result());
        }
        Ok(results)
    }
}
