//! Submission Orchestrator
//!
//! **Per submission:**
//! 1. Validate the request (nothing touches disk before this passes)
//! 2. Stage a private working directory and write the source into it
//! 3. Fetch testcases and compile concurrently, waiting for both
//! 4. Classify: testcase error, then sandbox fault, then compile error
//! 5. Fan out one run+grade task per test element
//! 6. Remove the working directory, then close the result stream
//!
//! Every submission ends with either one `Err` message or exactly one
//! `JudgeResult` per test element. Results arrive in completion order, so
//! consumers must key them by `testcase_id`.

use crate::compiler::Compiler;
use crate::error::HandlerError;
use crate::grader;
use crate::language::ProfileRegistry;
use crate::runner::{RunResult, Runner};
use crate::sandbox::{ExecutionLimits, Sandbox, StatusCode};
use crate::testcase::{Testcase, TestcaseStore};
use crate::workdir::WorkDir;
use gavel_common::types::{JudgeRequest, JudgeResult, Language, TestElement, Verdict};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

/// Captured program output kept in a result, in bytes
pub const MAX_OUTPUT: usize = 1000;

pub const CANCELED_MESSAGE: &str = "Execution canceled due to previous test case failure";

/// One message on a submission's result stream.
pub type JudgeMessage = Result<JudgeResult, HandlerError>;

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub language: Language,
    pub problem_id: i64,
    pub limits: ExecutionLimits,
}

/// Check a raw request, reporting the first problem found.
pub fn validate(request: &JudgeRequest) -> Result<ValidatedRequest, HandlerError> {
    let invalid = |message: &str| Err(HandlerError::Validation(message.to_string()));

    if request.code.is_empty() {
        return invalid("code must not be empty");
    }
    if request.language.is_empty() {
        return invalid("language must not be empty");
    }
    let language: Language = request
        .language
        .parse()
        .map_err(|e: gavel_common::types::UnsupportedLanguage| HandlerError::Validation(e.to_string()))?;
    if request.problem_id <= 0 {
        return invalid("problemId must not be empty or zero");
    }
    if request.time_limit <= 0 {
        return invalid("timeLimit must not be empty or less than 0");
    }
    if request.memory_limit <= 0 {
        return invalid("memoryLimit must not be empty or less than 0");
    }
    let Some(limits) = ExecutionLimits::checked(request.time_limit, request.memory_limit) else {
        return invalid("timeLimit or memoryLimit is too large");
    };

    Ok(ValidatedRequest {
        language,
        problem_id: request.problem_id,
        limits,
    })
}

#[derive(Clone)]
pub struct JudgeHandler {
    compiler: Compiler,
    runner: Runner,
    profiles: Arc<ProfileRegistry>,
    testcases: TestcaseStore,
    results_dir: PathBuf,
    max_parallel_tests: Option<usize>,
}

impl JudgeHandler {
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        profiles: Arc<ProfileRegistry>,
        testcases: TestcaseStore,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            compiler: Compiler::new(sandbox.clone(), profiles.clone()),
            runner: Runner::new(sandbox, profiles.clone()),
            profiles,
            testcases,
            results_dir: results_dir.into(),
            max_parallel_tests: None,
        }
    }

    /// Bound how many tests of one submission run at once. Zero means
    /// unbounded.
    pub fn with_max_parallel_tests(mut self, limit: usize) -> Self {
        self.max_parallel_tests = (limit > 0).then_some(limit);
        self
    }

    /// Judge one submission, streaming messages into `out`.
    ///
    /// The stream is closed when this returns, always after the working
    /// directory is gone.
    #[tracing::instrument(skip(self, data, out), fields(submission_id = %submission_id))]
    pub async fn handle(&self, submission_id: &str, data: &[u8], out: mpsc::Sender<JudgeMessage>) {
        // `judge` owns the working directory, so it is removed before the
        // terminal error is sent and before `out` is dropped.
        if let Err(e) = self.judge(submission_id, data, &out).await {
            match &e {
                HandlerError::Compile(_) => info!("Submission did not compile"),
                HandlerError::Validation(message) => warn!(reason = %message, "Rejected submission"),
                other => error!(error = %other, "Submission failed"),
            }
            emit(&out, Err(e)).await;
        }
    }

    async fn judge(
        &self,
        submission_id: &str,
        data: &[u8],
        out: &mpsc::Sender<JudgeMessage>,
    ) -> Result<(), HandlerError> {
        let request: JudgeRequest = serde_json::from_slice(data)
            .map_err(|e| HandlerError::Validation(format!("invalid request: {}", e)))?;
        let valid = validate(&request)?;

        info!(
            problem_id = valid.problem_id,
            language = %valid.language,
            time_limit = valid.limits.cpu_time_ms,
            memory_limit = valid.limits.memory_kb,
            "Judging submission"
        );

        let workdir = WorkDir::create(&self.results_dir, submission_id)
            .await
            .map_err(HandlerError::Stage)?;
        let judged = self.judge_in(workdir.path(), &request, &valid, out).await;
        workdir.cleanup().await;
        judged?;

        info!("Submission judged");
        Ok(())
    }

    async fn judge_in(
        &self,
        dir: &Path,
        request: &JudgeRequest,
        valid: &ValidatedRequest,
        out: &mpsc::Sender<JudgeMessage>,
    ) -> Result<(), HandlerError> {
        let source_path = self.profiles.source_path(dir, valid.language);
        tokio::fs::write(&source_path, &request.code)
            .await
            .map_err(HandlerError::Stage)?;

        let (testcase, compiled) = tokio::join!(
            self.fetch_testcase(request),
            self.compiler.compile(dir, valid.language)
        );

        let testcase = testcase?;
        let compiled = compiled.map_err(HandlerError::Sandbox)?;
        if !compiled.is_success() {
            return Err(HandlerError::Compile(compiled.diagnostic));
        }
        debug!(tests = testcase.len(), "Compiled, running tests");

        if request.stop_on_not_accepted {
            self.run_sequential(dir, valid, testcase, out).await;
        } else {
            self.run_concurrent(dir, valid, testcase, out).await;
        }
        Ok(())
    }

    /// User testcases are judged as given; the hidden filter applies to
    /// stored testcases only.
    async fn fetch_testcase(&self, request: &JudgeRequest) -> Result<Testcase, HandlerError> {
        match &request.user_testcases {
            Some(elements) => Ok(Testcase::new(elements.clone())),
            None => {
                let testcase = self.testcases.get(&request.problem_id.to_string()).await?;
                if request.judge_only_hidden_testcases {
                    Ok(testcase.hidden_only())
                } else {
                    Ok(testcase)
                }
            }
        }
    }

    /// One task per element. A task that panics still yields a result for
    /// its element.
    async fn run_concurrent(
        &self,
        dir: &Path,
        valid: &ValidatedRequest,
        testcase: Testcase,
        out: &mpsc::Sender<JudgeMessage>,
    ) {
        let semaphore = self.max_parallel_tests.map(|n| Arc::new(Semaphore::new(n)));
        let mut handles = Vec::with_capacity(testcase.len());

        for (order, element) in testcase.elements.into_iter().enumerate() {
            let runner = self.runner.clone();
            let dir = dir.to_path_buf();
            let out = out.clone();
            let semaphore = semaphore.clone();
            let language = valid.language;
            let limits = valid.limits;
            let test_id = element.id;

            let handle = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let result = judge_one(&runner, &dir, language, order, &limits, &element).await;
                emit(&out, Ok(result)).await;
            });
            handles.push((test_id, handle));
        }

        for (test_id, handle) in handles {
            if let Err(e) = handle.await {
                emit(out, Ok(aborted(test_id, e))).await;
            }
        }
    }

    /// In order, one at a time. After the first non-accepted verdict the
    /// remaining elements are canceled without running.
    async fn run_sequential(
        &self,
        dir: &Path,
        valid: &ValidatedRequest,
        testcase: Testcase,
        out: &mpsc::Sender<JudgeMessage>,
    ) {
        let mut stopped = false;
        for (order, element) in testcase.elements.into_iter().enumerate() {
            let test_id = element.id;
            let result = if stopped {
                JudgeResult::bare(test_id, Verdict::Canceled, CANCELED_MESSAGE)
            } else {
                let runner = self.runner.clone();
                let dir = dir.to_path_buf();
                let language = valid.language;
                let limits = valid.limits;
                let handle = tokio::spawn(async move {
                    judge_one(&runner, &dir, language, order, &limits, &element).await
                });
                match handle.await {
                    Ok(result) => result,
                    Err(e) => aborted(test_id, e),
                }
            };
            if !result.result_code.is_accepted() && !stopped {
                debug!(test_id, verdict = ?result.result_code, "Stopping at first failure");
                stopped = true;
            }
            emit(out, Ok(result)).await;
        }
    }
}

async fn emit(out: &mpsc::Sender<JudgeMessage>, message: JudgeMessage) {
    if out.send(message).await.is_err() {
        debug!("Result receiver dropped");
    }
}

/// SystemError result for a test whose task panicked or was cancelled.
fn aborted(test_id: i64, e: tokio::task::JoinError) -> JudgeResult {
    error!(test_id, error = %e, "Test task aborted");
    JudgeResult::bare(test_id, Verdict::SystemError, format!("test task aborted: {}", e))
}

async fn judge_one(
    runner: &Runner,
    dir: &Path,
    language: Language,
    order: usize,
    limits: &ExecutionLimits,
    element: &TestElement,
) -> JudgeResult {
    match runner.run(dir, language, order, limits, element.input.as_bytes()).await {
        Ok(run) => {
            let verdict = verdict_of(&run, element);
            debug!(test_id = element.id, verdict = ?verdict, "Test judged");
            JudgeResult {
                testcase_id: element.id,
                result_code: verdict,
                cpu_time: run.outcome.cpu_time,
                real_time: run.outcome.real_time,
                memory: run.outcome.memory,
                signal: run.outcome.signal,
                exit_code: run.outcome.exit_code,
                error_code: run.outcome.error_code,
                output: truncate_output(&run.output),
                error: truncate_output(&run.err_output),
            }
        }
        Err(e) => {
            warn!(test_id = element.id, error = %e, "Test run failed");
            JudgeResult::bare(element.id, Verdict::SystemError, e.to_string())
        }
    }
}

fn verdict_of(run: &RunResult, element: &TestElement) -> Verdict {
    match run.outcome.status {
        StatusCode::Success => {
            if grader::grade(element.output.as_bytes(), &run.output) {
                Verdict::Accepted
            } else {
                Verdict::WrongAnswer
            }
        }
        StatusCode::CpuTimeLimitExceeded => Verdict::CpuTimeLimitExceeded,
        StatusCode::RealTimeLimitExceeded => Verdict::RealTimeLimitExceeded,
        StatusCode::MemoryLimitExceeded => Verdict::MemoryLimitExceeded,
        StatusCode::RuntimeError => Verdict::RuntimeError,
        StatusCode::SystemError => Verdict::SystemError,
    }
}

/// Lossy text of at most `MAX_OUTPUT` bytes, cut on a character boundary.
fn truncate_output(bytes: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if text.len() > MAX_OUTPUT {
        let mut end = MAX_OUTPUT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
