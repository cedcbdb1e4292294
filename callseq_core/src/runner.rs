use crate::case::{CaseState, FatalPolicy, HarnessCase, ValidatorMode, Verdict};
use crate::config::RunnerSettings;
use crate::executor::{ChildProcessExecutor, ExecutionStatus, Executor, InProcessExecutor, StepExecution};
use crate::fixture::{FixtureError, FixtureSet, TeardownReport};
use crate::inject;
use crate::libs::{self, zlib::ZStatus};
use crate::observer::{Capture, FileCaptureObserver, Observer, StepLogObserver};
use crate::oracle::{Oracle, PredicateOracle, Violation};
use crate::report::Summary;
use crate::step::{Arg, Expect, Operation, Step};
use crate::value::{Reply, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What happened to one attempted step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub op: Operation,
    pub label: Option<String>,
    /// The injected edge case, if any, as `edge@arg`.
    pub injected: Option<String>,
    pub isolated: bool,
    pub status: ExecutionStatus,
    pub reply: Option<Reply>,
    pub passed: bool,
}

/// Everything one run of a [`HarnessCase`] produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub case_id: String,
    pub verdict: Verdict,
    pub expected: Verdict,
    /// Lifecycle states in the order they were entered.
    pub states: Vec<CaseState>,
    pub steps: Vec<StepRecord>,
    pub violations: Vec<Violation>,
    pub fixture_error: Option<FixtureError>,
    /// Index of the step after which the run stopped early.
    pub aborted_at: Option<usize>,
    pub captures: Vec<Capture>,
    pub teardown: TeardownReport,
    /// Fixtures still live after teardown. Always empty unless teardown is broken.
    pub leaks: Vec<String>,
    pub observer_errors: Vec<String>,
    /// What each observer collected, keyed by observer name.
    pub observer_data: BTreeMap<String, String>,
}

impl RunResult {
    fn new(case: &HarnessCase) -> Self {
        Self {
            case_id: case.id().to_string(),
            verdict: Verdict::Failed,
            expected: case.expected_verdict(),
            states: vec![CaseState::Created],
            steps: Vec::new(),
            violations: Vec::new(),
            fixture_error: None,
            aborted_at: None,
            captures: Vec::new(),
            teardown: TeardownReport::default(),
            leaks: Vec::new(),
            observer_errors: Vec::new(),
            observer_data: BTreeMap::new(),
        }
    }

    pub fn as_expected(&self) -> bool {
        self.verdict == self.expected
    }

    pub fn final_state(&self) -> CaseState {
        self.states.last().copied().unwrap_or(CaseState::Created)
    }

    fn advance(&mut self, next: CaseState) {
        let current = self.final_state();
        if !current.can_transition_to(next) {
            tracing::error!(case = %self.case_id, from = ?current, to = ?next, "illegal case state transition");
        }
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current:?} -> {next:?}"
        );
        self.states.push(next);
    }

    fn observer_error(&mut self, observer: &str, hook: &str, err: anyhow::Error) {
        let msg = format!("Observer '{observer}' {hook} failed: {err}");
        tracing::warn!(case = %self.case_id, "{msg}");
        self.observer_errors.push(msg);
    }
}

/// Runs harness cases one at a time: build fixtures, execute the steps,
/// validate each reply, tear down.
pub struct Runner {
    temp_root: Option<PathBuf>,
    in_process: InProcessExecutor,
    child: ChildProcessExecutor,
    oracle: PredicateOracle,
}

impl Runner {
    pub fn new(settings: &RunnerSettings) -> Self {
        Self {
            temp_root: settings.temp_root.clone(),
            in_process: InProcessExecutor,
            child: ChildProcessExecutor::new(settings.child_timeout()),
            oracle: PredicateOracle::new(),
        }
    }

    pub fn run_all(&mut self, cases: &[HarnessCase]) -> Summary {
        Summary::from_results(cases.iter().map(|case| self.run_case(case)).collect())
    }

    pub fn run_case(&mut self, case: &HarnessCase) -> RunResult {
        let mut result = RunResult::new(case);
        let mut log = StepLogObserver::new(case.id());
        let mut capture = FileCaptureObserver::new(case.capture());

        {
            let mut observers: [&mut dyn Observer; 2] = [&mut log, &mut capture];
            for obs in observers.iter_mut() {
                if let Err(e) = obs.reset() {
                    result.observer_error(obs.name(), "reset", e);
                }
            }

            result.advance(CaseState::Building);
            let mut fixtures = match FixtureSet::new(case.id(), self.temp_root.as_deref()) {
                Ok(set) => set,
                Err(e) => {
                    tracing::warn!(case = %case.id(), error = %e, "fixture set could not be created");
                    result.fixture_error = Some(e);
                    result.advance(CaseState::Failed);
                    result.advance(CaseState::TornDown);
                    result.verdict = Verdict::Failed;
                    return result;
                }
            };

            match fixtures.build_all(case.fixtures()) {
                Ok(()) => {
                    result.advance(CaseState::Running);
                    self.run_steps(case, &mut fixtures, &mut observers, &mut result);
                    let failed = !result.violations.is_empty() || result.aborted_at.is_some();
                    result.advance(if failed {
                        CaseState::Failed
                    } else {
                        CaseState::Passed
                    });
                }
                Err(e) => {
                    tracing::warn!(case = %case.id(), error = %e, "fixture build failed");
                    result.fixture_error = Some(e);
                    result.advance(CaseState::Failed);
                }
            }

            for obs in observers.iter_mut() {
                if let Err(e) = obs.before_teardown(&fixtures) {
                    result.observer_error(obs.name(), "before_teardown", e);
                }
            }

            result.teardown = fixtures.teardown();
            if let Err(leak) = fixtures.check_leaks() {
                tracing::error!(case = %case.id(), error = %leak, "resource leak after teardown");
                result.leaks = leak.fixtures;
            }

            for obs in observers.iter() {
                if let Some(data) = obs.serialize_data() {
                    result
                        .observer_data
                        .insert(obs.name().to_string(), String::from_utf8_lossy(&data).into_owned());
                }
            }
        }

        result.verdict = if result.states.contains(&CaseState::Passed) {
            Verdict::Passed
        } else {
            Verdict::Failed
        };
        result.advance(CaseState::TornDown);
        result.captures = capture.captures().to_vec();

        tracing::info!(
            case = %result.case_id,
            verdict = %result.verdict,
            expected = %result.expected,
            steps = result.steps.len(),
            violations = result.violations.len(),
            "case finished"
        );
        result
    }

    fn run_steps(
        &mut self,
        case: &HarnessCase,
        fixtures: &mut FixtureSet,
        observers: &mut [&mut dyn Observer],
        result: &mut RunResult,
    ) {
        let mut replies: Vec<Option<Reply>> = Vec::with_capacity(case.steps().len());

        for (index, step) in case.steps().iter().enumerate() {
            for obs in observers.iter_mut() {
                if let Err(e) = obs.pre_step(index, step) {
                    result.observer_error(obs.name(), "pre_step", e);
                }
            }

            let mut args = resolve_args(step, &replies, fixtures);
            if let Some(injection) = &step.inject {
                inject::apply(
                    &injection.edge,
                    injection.arg,
                    step.op.params(),
                    &mut args,
                    fixtures,
                );
            }

            let execution = {
                let mut call = || libs::invoke(step.op, &args, fixtures);
                if step.isolate {
                    self.child.execute_step(&mut call)
                } else {
                    self.in_process.execute_step(&mut call)
                }
            };

            let violation = self.oracle.examine(index, step, &execution);
            let record = StepRecord {
                index,
                op: step.op,
                label: step.label.clone(),
                injected: step
                    .inject
                    .as_ref()
                    .map(|i| format!("{}@{}", i.edge, i.arg)),
                isolated: step.isolate,
                status: execution.status.clone(),
                reply: execution.reply.clone(),
                passed: violation.is_none(),
            };
            for obs in observers.iter_mut() {
                if let Err(e) = obs.post_step(&record) {
                    result.observer_error(obs.name(), "post_step", e);
                }
            }
            result.steps.push(record);
            let fatal = is_fatal(step, &execution);
            replies.push(execution.reply);

            if let Some(violation) = violation {
                tracing::info!(
                    case = %case.id(),
                    step = index,
                    op = %step.op,
                    expected = %violation.expected,
                    observed = %violation.observed,
                    "predicate violated"
                );
                result.violations.push(violation);
                if case.validation() == ValidatorMode::Terminating {
                    result.aborted_at = Some(index);
                    return;
                }
            }

            if fatal {
                tracing::warn!(case = %case.id(), step = index, op = %step.op, "fatal step");
                if case.on_fatal() == FatalPolicy::Abort {
                    result.aborted_at = Some(index);
                    return;
                }
            }
        }
    }
}

/// A step is fatal when its call did not return (unless a crash was the
/// point of the step) or the library ran out of memory.
fn is_fatal(step: &Step, execution: &StepExecution) -> bool {
    match &execution.status {
        ExecutionStatus::Ok => execution
            .reply
            .as_ref()
            .is_some_and(|r| matches!(r.ret, Value::Code(code) if ZStatus::is_fatal_code(code))),
        ExecutionStatus::Crash(_) => step.expect != Expect::Crashed,
        ExecutionStatus::Timeout | ExecutionStatus::Other(_) => true,
    }
}

/// Binds a step's arguments against earlier replies and the fixture arena.
/// References to steps without a reply read as `null`.
fn resolve_args(step: &Step, replies: &[Option<Reply>], fixtures: &FixtureSet) -> Vec<Value> {
    let reply = |n: usize| replies.get(n).and_then(Option::as_ref);
    step.args
        .iter()
        .map(|arg| match arg {
            Arg::Ref(n) => reply(*n).map(|r| r.ret.clone()).unwrap_or(Value::Null),
            Arg::Out(n, k) => reply(*n)
                .and_then(|r| r.out.get(*k).cloned())
                .unwrap_or(Value::Null),
            Arg::Fixture(name) => fixtures
                .lookup(name)
                .map(Value::Handle)
                .unwrap_or(Value::Null),
            literal => literal.literal().unwrap_or(Value::Null),
        })
        .collect()
}
