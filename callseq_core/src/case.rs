use crate::fixture::{FixtureKind, FixtureSpec};
use crate::step::{Arg, Expect, Step};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Authoring errors, reported when a case is built and never at run time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaseError {
    #[error("Case id must not be empty")]
    EmptyId,
    #[error("Case '{case}': fixture '{name}' is declared twice")]
    DuplicateFixture { case: String, name: String },
    #[error("Case '{case}': capture target '{name}' is not a declared temp-file fixture")]
    BadCapture { case: String, name: String },
    #[error("Case '{case}', step {step} ({op}): expected {expected} arguments, got {got}")]
    Arity {
        case: String,
        step: usize,
        op: String,
        expected: usize,
        got: usize,
    },
    #[error("Case '{case}', step {step}: unknown fixture '{name}'")]
    UnknownFixture {
        case: String,
        step: usize,
        name: String,
    },
    #[error("Case '{case}', step {step}: step {target} is not an earlier step")]
    ForwardReference {
        case: String,
        step: usize,
        target: usize,
    },
    #[error("Case '{case}', step {step}: cannot inject {edge} at argument {arg}")]
    Injection {
        case: String,
        step: usize,
        edge: String,
        arg: usize,
    },
    #[error("Case '{case}', step {step} ({op}) must run isolated")]
    MustIsolate {
        case: String,
        step: usize,
        op: String,
    },
    #[error("Case '{case}', step {step} ({op}) works on shared files and cannot run isolated")]
    CannotIsolate {
        case: String,
        step: usize,
        op: String,
    },
}

/// How predicate violations affect the rest of a run.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ValidatorMode {
    /// Stop at the first violation.
    #[default]
    Terminating,
    /// Record every violation and attempt every step.
    NonTerminating,
}

/// What happens after a fatal step (crash, timeout, allocation failure).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FatalPolicy {
    #[default]
    Abort,
    Continue,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    #[default]
    Passed,
    Failed,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => write!(f, "passed"),
            Verdict::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle of one run:
/// `Created → Building → Running → {Passed | Failed} → TornDown`, with
/// `Building → Failed` on fixture failure and `TornDown` reachable from anywhere.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CaseState {
    Created,
    Building,
    Running,
    Passed,
    Failed,
    TornDown,
}

impl CaseState {
    pub fn can_transition_to(self, next: CaseState) -> bool {
        use CaseState::*;
        match (self, next) {
            (TornDown, _) => false,
            (_, TornDown) => true,
            (Created, Building) => true,
            (Building, Running) | (Building, Failed) => true,
            (Running, Passed) | (Running, Failed) => true,
            _ => false,
        }
    }
}

/// A case as written in a suite file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CaseSpec {
    pub id: String,
    #[serde(default)]
    pub validation: ValidatorMode,
    #[serde(default)]
    pub on_fatal: FatalPolicy,
    #[serde(default)]
    pub expect_verdict: Verdict,
    #[serde(default)]
    pub capture: Vec<String>,
    #[serde(default, rename = "fixture")]
    pub fixtures: Vec<FixtureSpec>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// A validated, immutable harness scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessCase {
    spec: CaseSpec,
}

impl HarnessCase {
    pub fn builder(id: impl Into<String>) -> CaseBuilder {
        CaseBuilder {
            spec: CaseSpec {
                id: id.into(),
                validation: ValidatorMode::default(),
                on_fatal: FatalPolicy::default(),
                expect_verdict: Verdict::default(),
                capture: Vec::new(),
                fixtures: Vec::new(),
                steps: Vec::new(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn fixtures(&self) -> &[FixtureSpec] {
        &self.spec.fixtures
    }

    pub fn steps(&self) -> &[Step] {
        &self.spec.steps
    }

    pub fn validation(&self) -> ValidatorMode {
        self.spec.validation
    }

    pub fn on_fatal(&self) -> FatalPolicy {
        self.spec.on_fatal
    }

    pub fn capture(&self) -> &[String] {
        &self.spec.capture
    }

    pub fn expected_verdict(&self) -> Verdict {
        self.spec.expect_verdict
    }
}

impl TryFrom<CaseSpec> for HarnessCase {
    type Error = CaseError;

    fn try_from(spec: CaseSpec) -> Result<Self, Self::Error> {
        validate(&spec)?;
        Ok(Self { spec })
    }
}

pub struct CaseBuilder {
    spec: CaseSpec,
}

impl CaseBuilder {
    pub fn fixture(mut self, name: impl Into<String>, kind: FixtureKind) -> Self {
        self.spec.fixtures.push(FixtureSpec::new(name, kind));
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.spec.steps.push(step);
        self
    }

    pub fn validation(mut self, mode: ValidatorMode) -> Self {
        self.spec.validation = mode;
        self
    }

    pub fn on_fatal(mut self, policy: FatalPolicy) -> Self {
        self.spec.on_fatal = policy;
        self
    }

    pub fn capture(mut self, fixture: impl Into<String>) -> Self {
        self.spec.capture.push(fixture.into());
        self
    }

    pub fn expect_verdict(mut self, verdict: Verdict) -> Self {
        self.spec.expect_verdict = verdict;
        self
    }

    pub fn build(self) -> Result<HarnessCase, CaseError> {
        HarnessCase::try_from(self.spec)
    }
}

fn validate(spec: &CaseSpec) -> Result<(), CaseError> {
    let case = spec.id.trim();
    if case.is_empty() {
        return Err(CaseError::EmptyId);
    }
    let case = case.to_string();

    let mut declared = HashSet::new();
    for fixture in &spec.fixtures {
        if !declared.insert(fixture.name.as_str()) {
            return Err(CaseError::DuplicateFixture {
                case,
                name: fixture.name.clone(),
            });
        }
    }

    for name in &spec.capture {
        let is_file = spec
            .fixtures
            .iter()
            .any(|f| &f.name == name && matches!(f.kind, FixtureKind::TempFile { .. }));
        if !is_file {
            return Err(CaseError::BadCapture {
                case,
                name: name.clone(),
            });
        }
    }

    for (index, step) in spec.steps.iter().enumerate() {
        let params = step.op.params();
        if step.args.len() != params.len() {
            return Err(CaseError::Arity {
                case,
                step: index,
                op: step.op.name().to_string(),
                expected: params.len(),
                got: step.args.len(),
            });
        }

        for arg in &step.args {
            if let Arg::Fixture(name) = arg {
                if !declared.contains(name.as_str()) {
                    return Err(CaseError::UnknownFixture {
                        case,
                        step: index,
                        name: name.clone(),
                    });
                }
            }
            if let Some(target) = arg.referenced_step() {
                if target >= index {
                    return Err(CaseError::ForwardReference {
                        case,
                        step: index,
                        target,
                    });
                }
            }
        }

        if let Some(injection) = &step.inject {
            let applicable = params
                .get(injection.arg)
                .is_some_and(|kind| injection.edge.applies_to(*kind));
            if !applicable {
                return Err(CaseError::Injection {
                    case,
                    step: index,
                    edge: injection.edge.to_string(),
                    arg: injection.arg,
                });
            }
            if let crate::inject::EdgeCase::MismatchedHandle(name) = &injection.edge {
                if !declared.contains(name.as_str()) {
                    return Err(CaseError::UnknownFixture {
                        case,
                        step: index,
                        name: name.clone(),
                    });
                }
            }
        }

        let needs_isolation = step.op.terminates_process() || step.expect == Expect::Crashed;
        if needs_isolation && !step.isolate {
            return Err(CaseError::MustIsolate {
                case,
                step: index,
                op: step.op.name().to_string(),
            });
        }
        if step.isolate && step.op.touches_files() {
            return Err(CaseError::CannotIsolate {
                case,
                step: index,
                op: step.op.name().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::EdgeCase;
    use crate::step::Operation;

    fn deflate_step() -> Step {
        Step::new(Operation::Deflate).args([
            Arg::Fixture("z".into()),
            Arg::Text("abc".into()),
            Arg::Int(64),
            Arg::Int(4),
        ])
    }

    fn base() -> CaseBuilder {
        HarnessCase::builder("case").fixture("z", FixtureKind::Deflate { level: 6 })
    }

    #[test]
    fn valid_case_builds_with_defaults() {
        let case = base().step(deflate_step()).build().expect("valid case");
        assert_eq!(case.id(), "case");
        assert_eq!(case.steps().len(), 1);
        assert_eq!(case.validation(), ValidatorMode::Terminating);
        assert_eq!(case.on_fatal(), FatalPolicy::Abort);
        assert_eq!(case.expected_verdict(), Verdict::Passed);
    }

    #[test]
    fn arity_is_checked() {
        let err = base()
            .step(Step::new(Operation::Deflate).arg(Arg::Fixture("z".into())))
            .build()
            .unwrap_err();
        assert!(
            matches!(err, CaseError::Arity { expected: 4, got: 1, .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn unknown_fixtures_are_rejected() {
        let err = HarnessCase::builder("c")
            .step(deflate_step())
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            CaseError::UnknownFixture {
                case: "c".into(),
                step: 0,
                name: "z".into()
            }
        );
    }

    #[test]
    fn references_must_point_backwards() {
        let err = base()
            .step(Step::new(Operation::CompressBound).arg(Arg::Ref(0)))
            .build()
            .unwrap_err();
        assert!(
            matches!(err, CaseError::ForwardReference { step: 0, target: 0, .. }),
            "self reference is forward: {err:?}"
        );
        let ok = base()
            .step(deflate_step())
            .step(Step::new(Operation::Crc32).args([Arg::Int(0), Arg::Out(0, 0)]))
            .build();
        assert!(ok.is_ok(), "backward out reference is fine: {ok:?}");
    }

    #[test]
    fn incompatible_injections_are_rejected() {
        let err = base()
            .step(deflate_step().inject(EdgeCase::MinimumCapacity, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, CaseError::Injection { arg: 1, .. }), "got {err:?}");

        let out_of_bounds = base()
            .step(deflate_step().inject(EdgeCase::ZeroLength, 9))
            .build();
        assert!(out_of_bounds.is_err());

        let mismatched = base()
            .step(deflate_step().inject(EdgeCase::MismatchedHandle("nope".into()), 0))
            .build()
            .unwrap_err();
        assert!(matches!(mismatched, CaseError::UnknownFixture { .. }));
    }

    #[test]
    fn process_abort_and_crash_expectations_require_isolation() {
        let err = HarnessCase::builder("abort")
            .step(Step::new(Operation::ProcessAbort))
            .build()
            .unwrap_err();
        assert!(matches!(err, CaseError::MustIsolate { .. }));

        let crash_expected = HarnessCase::builder("crash")
            .step(Step::new(Operation::CompressBound).arg(Arg::Int(1)).expect(Expect::Crashed))
            .build();
        assert!(crash_expected.is_err());

        let isolated = HarnessCase::builder("abort")
            .step(Step::new(Operation::ProcessAbort).isolated().expect(Expect::Crashed))
            .build();
        assert!(isolated.is_ok());
    }

    #[test]
    fn file_operations_cannot_run_isolated() {
        let file_write = HarnessCase::builder("isolated-append")
            .fixture("f", FixtureKind::TempFile { contents: None })
            .step(
                Step::new(Operation::FileWrite)
                    .args([Arg::Fixture("f".into()), Arg::Text("x".into())])
                    .isolated(),
            )
            .build()
            .unwrap_err();
        assert!(
            matches!(file_write, CaseError::CannotIsolate { step: 0, ref op, .. } if op == "file-write"),
            "got {file_write:?}"
        );

        let gz_close = HarnessCase::builder("isolated-gz-close")
            .fixture("f", FixtureKind::TempFile { contents: None })
            .step(Step::new(Operation::GzOpen).args([Arg::Fixture("f".into()), Arg::Text("wb".into())]))
            .step(Step::new(Operation::GzClose).arg(Arg::Ref(0)).isolated())
            .build()
            .unwrap_err();
        assert!(matches!(gz_close, CaseError::CannotIsolate { step: 1, .. }), "got {gz_close:?}");

        let reading_a_file_as_bytes = HarnessCase::builder("isolated-crc")
            .fixture("f", FixtureKind::TempFile { contents: None })
            .step(
                Step::new(Operation::Crc32)
                    .args([Arg::Int(0), Arg::Fixture("f".into())])
                    .isolated(),
            )
            .build();
        assert!(
            reading_a_file_as_bytes.is_ok(),
            "checksums only read the file and may run isolated"
        );
    }

    #[test]
    fn duplicate_fixtures_and_bad_captures_are_rejected() {
        let dup = base()
            .fixture("z", FixtureKind::Inflate)
            .build()
            .unwrap_err();
        assert!(matches!(dup, CaseError::DuplicateFixture { .. }));

        let capture = base().capture("z").build().unwrap_err();
        assert!(
            matches!(capture, CaseError::BadCapture { .. }),
            "a deflate stream has no bytes to capture"
        );
        assert!(HarnessCase::builder("  ").build().is_err(), "blank ids are rejected");
    }

    #[test]
    fn case_spec_parses_from_toml() {
        let text = r#"
            id = "toml-case"
            validation = "non-terminating"
            on-fatal = "continue"
            expect-verdict = "failed"
            capture = ["f"]

            [[fixture]]
            name = "f"
            kind = { temp-file = {} }

            [[fixture]]
            name = "inf"
            kind = "inflate"

            [[step]]
            op = "file-read"
            args = [{ fixture = "f" }, { int = 16 }]
            expect = { value = { int = 0 } }
            inject = { edge = "zero-length", arg = 1 }

            [[step]]
            op = "deflate-end"
            args = [{ fixture = "inf" }]
            expect = "failed"
            inject = { edge = { mismatched-handle = "inf" }, arg = 0 }
        "#;
        let spec: CaseSpec = toml::from_str(text).expect("case parses");
        let case = HarnessCase::try_from(spec).expect("case validates");
        assert_eq!(case.validation(), ValidatorMode::NonTerminating);
        assert_eq!(case.on_fatal(), FatalPolicy::Continue);
        assert_eq!(case.expected_verdict(), Verdict::Failed);
        assert_eq!(case.fixtures().len(), 2);
        assert_eq!(case.steps()[1].expect, Expect::Failed);
        assert_eq!(case.capture(), ["f".to_string()]);
    }

    #[test]
    fn state_machine_allows_only_documented_transitions() {
        use CaseState::*;
        assert!(Created.can_transition_to(Building));
        assert!(Building.can_transition_to(Failed), "fixture failure");
        assert!(Running.can_transition_to(Passed));
        assert!(!Created.can_transition_to(Running));
        assert!(!Passed.can_transition_to(Failed));
        for state in [Created, Building, Running, Passed, Failed] {
            assert!(state.can_transition_to(TornDown), "{state:?} can tear down");
        }
        assert!(!TornDown.can_transition_to(TornDown), "teardown happens once");
    }
}
