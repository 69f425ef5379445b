//! Outcome types produced by running one test: the individual `require()` checks made along
//! the way, and the rolled-up pass/fail/weight summary.
//!
//! Ground truth is `TestContext::finalize`/`require` in the original implementation: a test
//! passes only if every requirement it made passed, and its weight (used for partial credit
//! across a whole assignment) defaults to 1 unless the test declares otherwise.

/// A relative point value used to weight one test's contribution to an assignment's total
/// score. Wraps a plain `u32` rather than exposing it bare so a test registration can't
/// accidentally pass a requirement count or a byte length where a weight was meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Weight(pub u32);

impl Default for Weight {
    fn default() -> Self {
        Weight(1)
    }
}

/// The outcome of a single `require()` call within a test.
#[derive(Debug, Clone)]
pub struct RequirementResult {
    pub condition: bool,
    pub message: String,
    /// Extra context captured at the call site (e.g. the values being compared), formatted
    /// ahead of time so the harness never needs to re-invoke a student's `Display` impl.
    pub debug_info: Option<String>,
}

/// The full record of one test's execution: every requirement it made, in order, its
/// declared weight, and (if the test body itself returned an error rather than failing a
/// `require()`) that error.
#[derive(Debug, Clone, Default)]
pub struct TestResult {
    pub name: String,
    pub requirements: Vec<RequirementResult>,
    pub weight: Weight,
    /// Set when the test's closure returned `Err` (a harness-level failure like
    /// `UnresolvedSymbol` or `UnexpectedReturn`) rather than completing and letting its
    /// `require()` calls speak for themselves. Per the distilled spec's §3: "a test with an
    /// error counts as failed regardless of requirements."
    pub error: Option<crate::error::ErrorKind>,
}

impl TestResult {
    pub fn new(name: impl Into<String>) -> Self {
        TestResult {
            name: name.into(),
            requirements: Vec::new(),
            weight: Weight::default(),
            error: None,
        }
    }

    /// A test passes iff it raised no harness-level error, made at least one requirement, and
    /// every one of them held. Matches the original's `finalize()`: a test that never calls
    /// `require()` at all is not silently counted as passing.
    pub fn passed(&self) -> bool {
        self.error.is_none()
            && !self.requirements.is_empty()
            && self.requirements.iter().all(|r| r.condition)
    }

    pub fn requirements_passed(&self) -> usize {
        self.requirements.iter().filter(|r| r.condition).count()
    }

    pub fn num_total(&self) -> usize {
        self.requirements.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(passed: bool) -> RequirementResult {
        RequirementResult {
            condition: passed,
            message: "check".into(),
            debug_info: None,
        }
    }

    #[test]
    fn empty_test_does_not_pass() {
        crate::logging::init();
        let result = TestResult::new("empty");
        assert!(!result.passed());
    }

    #[test]
    fn all_requirements_passing_passes() {
        let mut result = TestResult::new("t");
        result.requirements.push(req(true));
        result.requirements.push(req(true));
        assert!(result.passed());
        assert_eq!(result.requirements_passed(), 2);
        assert_eq!(result.num_total(), 2);
    }

    #[test]
    fn one_failing_requirement_fails_the_whole_test() {
        let mut result = TestResult::new("t");
        result.requirements.push(req(true));
        result.requirements.push(req(false));
        assert!(!result.passed());
        assert_eq!(result.requirements_passed(), 1);
    }

    #[test]
    fn an_error_fails_the_test_even_with_all_requirements_passing() {
        let mut result = TestResult::new("t");
        result.requirements.push(req(true));
        result.error = Some(crate::error::ErrorKind::UnexpectedReturn);
        assert!(!result.passed());
    }

    #[test]
    fn default_weight_is_one() {
        assert_eq!(Weight::default(), Weight(1));
    }
}
