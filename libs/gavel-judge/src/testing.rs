//! In-process stand-ins for the judger, testcase sources and caches.

use crate::error::{SandboxError, TestcaseError};
use crate::language::COMPILE_OUT_FILE;
use crate::sandbox::{ExecArgs, ExecutionOutcome, Sandbox, StatusCode};
use crate::testcase::DataSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// What a fake run of the submitted program does.
pub struct FakeRun {
    pub status: StatusCode,
    /// Written to the per-test output file; `None` leaves it missing
    pub stdout: Option<Vec<u8>>,
    pub stderr: Vec<u8>,
}

impl FakeRun {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::Success,
            stdout: Some(stdout.into()),
            stderr: Vec::new(),
        }
    }

    pub fn failed(status: StatusCode, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            stdout: Some(Vec::new()),
            stderr: stderr.into(),
        }
    }
}

type RunScript = Box<dyn Fn(&[u8]) -> FakeRun + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Call {
    pub args: ExecArgs,
    pub input: Vec<u8>,
}

/// Sandbox that never spawns anything. Compilation returns a canned status;
/// runs are scripted on the stdin they receive and write the capture files
/// the real judger would write. The default program echoes its input.
pub struct FakeSandbox {
    compile_status: StatusCode,
    compile_fails: bool,
    run: RunScript,
    calls: Mutex<Vec<Call>>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self {
            compile_status: StatusCode::Success,
            compile_fails: false,
            run: Box::new(|input| FakeRun::ok(input.to_vec())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn compile_status(mut self, status: StatusCode) -> Self {
        self.compile_status = status;
        self
    }

    pub fn fail_compile(mut self) -> Self {
        self.compile_fails = true;
        self
    }

    pub fn run_with(mut self, run: impl Fn(&[u8]) -> FakeRun + Send + Sync + 'static) -> Self {
        self.run = Box::new(run);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn is_compile(args: &ExecArgs) -> bool {
        args.output_path
            .as_deref()
            .and_then(|p| p.file_name())
            .map_or(false, |name| name == COMPILE_OUT_FILE)
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn execute(&self, args: &ExecArgs, input: &[u8]) -> Result<ExecutionOutcome, SandboxError> {
        self.calls.lock().unwrap().push(Call {
            args: args.clone(),
            input: input.to_vec(),
        });

        if Self::is_compile(args) {
            if self.compile_fails {
                return Err(SandboxError::Spawn(io::Error::new(io::ErrorKind::NotFound, "no judger")));
            }
            return Ok(ExecutionOutcome::new(self.compile_status));
        }

        let run = (self.run)(input);
        if let (Some(stdout), Some(path)) = (&run.stdout, &args.output_path) {
            std::fs::write(path, stdout).map_err(SandboxError::Wait)?;
        }
        if !run.status.is_success() {
            if let Some(path) = &args.error_path {
                std::fs::write(path, &run.stderr).map_err(SandboxError::Wait)?;
            }
        }

        let mut outcome = ExecutionOutcome::new(run.status);
        outcome.cpu_time = 3;
        outcome.real_time = 5;
        outcome.memory = 1_048_576;
        Ok(outcome)
    }
}

/// Data source backed by a map, counting fetches.
#[derive(Default)]
pub struct FakeSource {
    blobs: HashMap<String, Vec<u8>>,
    pub fetches: AtomicUsize,
}

impl FakeSource {
    pub fn with(mut self, problem_id: &str, blob: impl Into<Vec<u8>>) -> Self {
        self.blobs.insert(problem_id.to_string(), blob.into());
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn get(&self, problem_id: &str) -> Result<Vec<u8>, TestcaseError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.blobs.get(problem_id).cloned().ok_or_else(|| TestcaseError::Source {
            problem_id: problem_id.to_string(),
            message: "not found".to_string(),
        })
    }
}
