use crate::fixture::FixtureSet;
use crate::runner::StepRecord;
use crate::step::Step;
use serde::Serialize;

/// An `Observer` watches one harness run and collects side-channel data about
/// it without influencing its verdict.
///
/// The runner calls `reset` when a case starts, `pre_step`/`post_step` around
/// every attempted step, and `before_teardown` once while every fixture is
/// still live. Errors are recorded on the run result and logged.
pub trait Observer {
    /// Returns a static string name identifying the observer.
    ///
    /// The runner keys the observer's collected data by this name in
    /// `RunResult::observer_data`, and uses it in observer error messages.
    fn name(&self) -> &'static str;

    /// Called by the runner before a step's arguments are bound and its call is made.
    ///
    /// # Arguments
    /// * `index`: Position of the step within its case.
    /// * `step`: The step as authored, before any edge-case injection.
    ///
    /// # Returns
    /// `Ok(())` on success, or an `anyhow::Error` if the observer could not
    /// record the step. The error is logged; the step still runs.
    fn pre_step(&mut self, _index: usize, _step: &Step) -> Result<(), anyhow::Error> {
        Ok(())
    }

    /// Called by the runner after a step was executed and examined by the oracle.
    ///
    /// # Arguments
    /// * `record`: The execution status, reply and predicate outcome of the step.
    ///
    /// # Returns
    /// `Ok(())` on success, or an `anyhow::Error` if data collection fails.
    fn post_step(&mut self, _record: &StepRecord) -> Result<(), anyhow::Error> {
        Ok(())
    }

    /// Called once per run after the last step, while every fixture is still live.
    ///
    /// This is the last chance to look at external state (for example the
    /// bytes of a temp file) before teardown releases it.
    ///
    /// # Arguments
    /// * `fixtures`: The run's fixture arena, read-only.
    ///
    /// # Returns
    /// `Ok(())` on success, or an `anyhow::Error` if the expected state was not
    /// there.
    fn before_teardown(&mut self, _fixtures: &FixtureSet) -> Result<(), anyhow::Error> {
        Ok(())
    }

    /// Resets the internal state of the observer.
    ///
    /// Called when a case starts so that data from one run does not leak into
    /// the next.
    ///
    /// # Returns
    /// `Ok(())` on success, or an `anyhow::Error` if resetting fails.
    fn reset(&mut self) -> Result<(), anyhow::Error>;

    /// Serializes the data collected during the last run.
    ///
    /// # Returns
    /// `Some(bytes)` in an observer-specific format, or `None` if the observer
    /// collected nothing. The runner stores the bytes as lossy UTF-8.
    fn serialize_data(&self) -> Option<Vec<u8>>;
}

/// An observer that does nothing; a placeholder where one is required.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpObserver;

impl Observer for NoOpObserver {
    fn name(&self) -> &'static str {
        "NoOpObserver"
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    fn serialize_data(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Bytes of a temp-file fixture as they were just before teardown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capture {
    pub fixture: String,
    pub len: usize,
    /// Hex MD5 of the captured bytes.
    pub md5: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Capture {
    pub fn new(fixture: &str, bytes: Vec<u8>) -> Self {
        Self {
            fixture: fixture.to_string(),
            len: bytes.len(),
            md5: format!("{:x}", md5::compute(&bytes)),
            bytes,
        }
    }
}

/// Captures the contents of the named temp-file fixtures before teardown
/// deletes them.
#[derive(Debug, Clone, Default)]
pub struct FileCaptureObserver {
    targets: Vec<String>,
    captures: Vec<Capture>,
}

impl FileCaptureObserver {
    pub fn new(targets: &[String]) -> Self {
        Self {
            targets: targets.to_vec(),
            captures: Vec::new(),
        }
    }

    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }
}

impl Observer for FileCaptureObserver {
    fn name(&self) -> &'static str {
        "FileCaptureObserver"
    }

    fn before_teardown(&mut self, fixtures: &FixtureSet) -> Result<(), anyhow::Error> {
        let mut missing = Vec::new();
        for target in &self.targets {
            match fixtures.file_bytes(target) {
                Some(bytes) => self.captures.push(Capture::new(target, bytes)),
                None => missing.push(target.as_str()),
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "not live temp-file fixtures: {}",
                missing.join(", ")
            ))
        }
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        self.captures.clear();
        Ok(())
    }

    fn serialize_data(&self) -> Option<Vec<u8>> {
        if self.captures.is_empty() {
            return None;
        }
        serde_json::to_vec(&self.captures).ok()
    }
}

/// Emits a `debug` event per step and keeps a one-line trace of the run.
#[derive(Debug, Clone, Default)]
pub struct StepLogObserver {
    case_id: String,
    lines: Vec<String>,
}

impl StepLogObserver {
    pub fn new(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            lines: Vec::new(),
        }
    }
}

impl Observer for StepLogObserver {
    fn name(&self) -> &'static str {
        "StepLogObserver"
    }

    fn pre_step(&mut self, index: usize, step: &Step) -> Result<(), anyhow::Error> {
        tracing::trace!(case = %self.case_id, step = index, op = %step.op, "step starting");
        Ok(())
    }

    fn post_step(&mut self, record: &StepRecord) -> Result<(), anyhow::Error> {
        let reply = record
            .reply
            .as_ref()
            .map(|r| r.ret.to_string())
            .unwrap_or_else(|| "-".to_string());
        tracing::debug!(
            case = %self.case_id,
            step = record.index,
            op = %record.op,
            status = ?record.status,
            ret = %reply,
            passed = record.passed,
            "step executed"
        );
        self.lines.push(format!(
            "{} {} {:?} {} {}",
            record.index,
            record.op,
            record.status,
            reply,
            if record.passed { "ok" } else { "violated" }
        ));
        Ok(())
    }

    fn reset(&mut self) -> Result<(), anyhow::Error> {
        self.lines.clear();
        Ok(())
    }

    fn serialize_data(&self) -> Option<Vec<u8>> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.join("\n").into_bytes())
        }
    }
}
