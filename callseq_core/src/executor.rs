use crate::value::Reply;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Crash(String),
    Other(String),
}

impl ExecutionStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ExecutionStatus::Ok)
    }
}

/// Outcome of running one step's library call. `reply` is `None` whenever the
/// call did not return normally.
#[derive(Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub status: ExecutionStatus,
    pub reply: Option<Reply>,
}

impl StepExecution {
    pub fn completed(reply: Reply) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            reply: Some(reply),
        }
    }

    pub fn failed(status: ExecutionStatus) -> Self {
        Self {
            status,
            reply: None,
        }
    }
}

pub trait Executor {
    fn execute_step(&mut self, call: &mut dyn FnMut() -> Reply) -> StepExecution;
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

/// Runs the call on the runner's own thread. A panic becomes a crash; an abort
/// takes the runner down with it, which is why such steps are isolated.
#[derive(Debug, Default)]
pub struct InProcessExecutor;

impl Executor for InProcessExecutor {
    fn execute_step(&mut self, call: &mut dyn FnMut() -> Reply) -> StepExecution {
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(reply) => StepExecution::completed(reply),
            Err(payload) => StepExecution::failed(ExecutionStatus::Crash(panic_message(payload))),
        }
    }
}

/// Runs the call in a forked child. The child's reply travels back as JSON
/// through a temp file; any state it mutated stays in the child.
#[derive(Debug, Clone)]
pub struct ChildProcessExecutor {
    timeout: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit code of a child whose call panicked, matching Rust's panic exit code.
#[cfg(unix)]
const PANIC_EXIT_CODE: i32 = 101;

impl ChildProcessExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[cfg(unix)]
impl Executor for ChildProcessExecutor {
    fn execute_step(&mut self, call: &mut dyn FnMut() -> Reply) -> StepExecution {
        let reply_file = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => {
                return StepExecution::failed(ExecutionStatus::Other(format!(
                    "Failed to create reply file: {e}"
                )));
            }
        };
        let reply_path = reply_file.path().to_path_buf();

        // SAFETY: the child only runs the step, writes its reply and leaves
        // through `_exit`, never returning into the parent's stack.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return StepExecution::failed(ExecutionStatus::Other(format!(
                "fork failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        if pid == 0 {
            let code = match catch_unwind(AssertUnwindSafe(call)) {
                Ok(reply) => match serde_json::to_vec(&reply.without_handles())
                    .map_err(std::io::Error::from)
                    .and_then(|json| std::fs::write(&reply_path, json))
                {
                    Ok(()) => 0,
                    Err(_) => 1,
                },
                Err(_) => PANIC_EXIT_CODE,
            };
            // SAFETY: terminates the child without running the parent's
            // destructors or atexit handlers.
            unsafe { libc::_exit(code) }
        }

        let status = match wait_with_timeout(pid, self.timeout) {
            Ok(status) => status,
            Err(failure) => return StepExecution::failed(failure),
        };

        if libc::WIFEXITED(status) {
            let code = libc::WEXITSTATUS(status);
            if code != 0 {
                return StepExecution::failed(ExecutionStatus::Crash(format!(
                    "Exited with code {code}"
                )));
            }
            match std::fs::read(&reply_path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| serde_json::from_slice::<Reply>(&bytes).map_err(|e| e.to_string()))
            {
                Ok(reply) => StepExecution::completed(reply),
                Err(e) => StepExecution::failed(ExecutionStatus::Other(format!(
                    "Unreadable child reply: {e}"
                ))),
            }
        } else if libc::WIFSIGNALED(status) {
            StepExecution::failed(ExecutionStatus::Crash(format!(
                "Terminated by signal {}",
                libc::WTERMSIG(status)
            )))
        } else {
            StepExecution::failed(ExecutionStatus::Crash("Exited abnormally".to_string()))
        }
    }
}

#[cfg(unix)]
fn wait_with_timeout(pid: libc::pid_t, timeout: Duration) -> Result<libc::c_int, ExecutionStatus> {
    let start_time = std::time::Instant::now();
    let mut status: libc::c_int = 0;

    loop {
        // SAFETY: `pid` is our own child and `status` outlives the call.
        let waited = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if waited == pid {
            return Ok(status);
        }
        if waited < 0 {
            let e = std::io::Error::last_os_error();
            tracing::error!(pid, error = %e, "waiting for isolated step failed");
            return Err(ExecutionStatus::Other(format!("Error waiting for child: {e}")));
        }
        if start_time.elapsed() > timeout {
            tracing::warn!(pid, ?timeout, "isolated step timed out, killing");
            // SAFETY: as above; the blocking wait reaps the killed child.
            unsafe {
                libc::kill(pid, libc::SIGKILL);
                libc::waitpid(pid, &mut status, 0);
            }
            return Err(ExecutionStatus::Timeout);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(not(unix))]
impl Executor for ChildProcessExecutor {
    fn execute_step(&mut self, _call: &mut dyn FnMut() -> Reply) -> StepExecution {
        StepExecution::failed(ExecutionStatus::Other(
            "process isolation unsupported".to_string(),
        ))
    }
}


#[cfg(all(test, unix))]
mod child_process_executor_tests {
    use super::*;
    use crate::value::{HandleId, Value};

    fn executor() -> ChildProcessExecutor {
        ChildProcessExecutor::new(Duration::from_secs(5))
    }

    #[test]
    fn child_reply_reaches_the_parent() {
        let reply = Reply::with_out(Value::Code(1), vec![Value::Bytes(b"abc".to_vec())]);
        let expected = reply.clone();
        let execution = executor().execute_step(&mut || reply.clone());
        assert_eq!(execution, StepExecution::completed(expected));
    }

    #[test]
    fn child_handles_are_reported_as_null() {
        let execution = executor().execute_step(&mut || Reply::ret(Value::Handle(HandleId(3))));
        assert_eq!(execution.reply, Some(Reply::ret(Value::Null)));
    }

    #[test]
    fn child_side_effects_do_not_reach_the_parent() {
        let mut counter = 0;
        let execution = executor().execute_step(&mut || {
            counter += 1;
            Reply::unit()
        });
        assert!(execution.status.is_ok());
        assert_eq!(counter, 0, "mutation happened in the child only");
    }

    #[test]
    fn abort_is_reported_as_a_signal_crash() {
        let execution = executor().execute_step(&mut || std::process::abort());
        match execution.status {
            ExecutionStatus::Crash(desc) => assert!(
                desc.contains(&format!("signal {}", libc::SIGABRT)),
                "Unexpected crash desc: {desc}"
            ),
            other => panic!("Expected a crash, got {other:?}"),
        }
    }

    #[test]
    fn panic_in_child_is_reported_as_exit_code() {
        let execution = executor().execute_step(&mut || panic!("child panic"));
        assert_eq!(
            execution.status,
            ExecutionStatus::Crash(format!("Exited with code {PANIC_EXIT_CODE}"))
        );
    }

    #[test]
    fn slow_child_times_out() {
        let mut executor = ChildProcessExecutor::new(Duration::from_millis(100));
        let execution = executor.execute_step(&mut || {
            std::thread::sleep(Duration::from_secs(5));
            Reply::unit()
        });
        assert_eq!(execution.status, ExecutionStatus::Timeout);
    }
}
