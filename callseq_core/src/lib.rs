pub mod case;
pub mod catalog;
pub mod config;
pub mod executor;
pub mod fixture;
pub mod inject;
pub mod libs;
pub mod observer;
pub mod oracle;
pub mod report;
pub mod runner;
pub mod step;
pub mod suite;
pub mod value;

pub use case::{
    CaseBuilder, CaseError, CaseSpec, CaseState, FatalPolicy, HarnessCase, ValidatorMode, Verdict,
};
pub use config::{CallseqConfig, ReportFormat, RunnerSettings, SuiteSettings};
pub use executor::{
    ChildProcessExecutor, ExecutionStatus, Executor, InProcessExecutor, StepExecution,
};
pub use fixture::{FixtureError, FixtureKind, FixtureSet, FixtureSpec, ResourceLeakError};
pub use inject::EdgeCase;
pub use observer::{FileCaptureObserver, NoOpObserver, Observer, StepLogObserver};
pub use oracle::{Oracle, PredicateOracle, Violation};
pub use report::Summary;
pub use runner::{RunResult, Runner, StepRecord};
pub use step::{Arg, Expect, Operation, Payload, Step};
pub use suite::SuiteError;
pub use value::{HandleId, Reply, Value};
