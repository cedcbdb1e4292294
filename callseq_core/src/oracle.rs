use crate::executor::{ExecutionStatus, StepExecution};
use crate::step::{Expect, Step};
use crate::value::Value;
use serde::Serialize;

/// A step whose observed result did not satisfy its predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub step: usize,
    pub op: String,
    pub expected: String,
    pub observed: String,
    /// MD5 over operation, expectation and observation; equal failures share it.
    pub fingerprint: String,
}

impl Violation {
    pub fn new(step: usize, op: &str, expected: String, observed: String) -> Self {
        let digest = md5::compute(format!("{op}\n{expected}\n{observed}"));
        Self {
            step,
            op: op.to_string(),
            expected,
            observed,
            fingerprint: format!("{digest:x}"),
        }
    }
}

/// An `Oracle` examines the outcome of one step to decide whether the library
/// behaved as the step expects.
///
/// Oracles only judge; what happens after a violation (stop or keep going)
/// is decided by the runner from the case's validation mode.
pub trait Oracle {
    /// Examines a step's execution against the step's expectation.
    ///
    /// # Arguments
    /// * `index`: Position of the step within its case, copied into the violation.
    /// * `step`: The step that ran, carrying its `Expect` predicate and `on` target.
    /// * `execution`: Status and reply returned by the `Executor`.
    ///
    /// # Returns
    /// `Some(Violation)` if the expectation does not hold, otherwise `None`.
    fn examine(&self, index: usize, step: &Step, execution: &StepExecution) -> Option<Violation>;
}

/// Evaluates the step's own [`Expect`] predicate.
#[derive(Debug, Default)]
pub struct PredicateOracle;

impl PredicateOracle {
    pub fn new() -> Self {
        PredicateOracle
    }
}

/// The value a predicate looks at: out-parameter `on` if set, else the return
/// value. Missing replies and out-parameters read as `null`.
fn target(step: &Step, execution: &StepExecution) -> Value {
    let Some(reply) = &execution.reply else {
        return Value::Null;
    };
    match step.on {
        Some(k) => reply.out.get(k).cloned().unwrap_or(Value::Null),
        None => reply.ret.clone(),
    }
}

pub fn holds(expect: &Expect, status: &ExecutionStatus, value: &Value) -> bool {
    match expect {
        Expect::Any => true,
        Expect::Crashed => matches!(status, ExecutionStatus::Crash(_)),
        _ if !status.is_ok() => false,
        Expect::Ok => value.is_ok(),
        Expect::Failed => !value.is_ok(),
        Expect::Value(v) => value == v,
        Expect::NonNull => !value.is_null(),
        Expect::Null => value.is_null(),
        Expect::ByteEquals(b) => value.as_bytes() == Some(b.as_slice()),
        Expect::Len(n) => value.as_bytes().map(<[u8]>::len) == Some(*n),
    }
}

fn describe(status: &ExecutionStatus, value: &Value) -> String {
    match status {
        ExecutionStatus::Ok => value.to_string(),
        ExecutionStatus::Timeout => "timeout".to_string(),
        ExecutionStatus::Crash(desc) => format!("crash ({desc})"),
        ExecutionStatus::Other(desc) => format!("not run ({desc})"),
    }
}

impl Oracle for PredicateOracle {
    fn examine(&self, index: usize, step: &Step, execution: &StepExecution) -> Option<Violation> {
        let value = target(step, execution);
        if holds(&step.expect, &execution.status, &value) {
            return None;
        }
        let expected = match step.on {
            Some(k) => format!("{} on out[{k}]", step.expect),
            None => step.expect.to_string(),
        };
        Some(Violation::new(
            index,
            step.op.name(),
            expected,
            describe(&execution.status, &value),
        ))
    }
}
