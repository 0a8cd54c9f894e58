use crate::error::ExecError;
use crate::language::ProfileRegistry;
use crate::sandbox::{ExecutionLimits, ExecutionOutcome, Sandbox, StatusCode};
use crate::workdir::read_capture;
use gavel_common::types::Language;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// One execution of the compiled artifact against one test input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub outcome: ExecutionOutcome,
    /// Captured stdout, possibly partial when a limit was hit
    pub output: Vec<u8>,
    /// Captured stderr; only read when the run did not succeed
    pub err_output: Vec<u8>,
}

#[derive(Clone)]
pub struct Runner {
    sandbox: Arc<dyn Sandbox>,
    profiles: Arc<ProfileRegistry>,
}

impl Runner {
    pub fn new(sandbox: Arc<dyn Sandbox>, profiles: Arc<ProfileRegistry>) -> Self {
        Self { sandbox, profiles }
    }

    /// Run test number `order` (zero based) with `input` as stdin.
    ///
    /// Capture files are namespaced by `order`, so any number of runs may
    /// share one working directory concurrently.
    pub async fn run(
        &self,
        dir: &Path,
        language: Language,
        order: usize,
        limits: &ExecutionLimits,
        input: &[u8],
    ) -> Result<RunResult, ExecError> {
        let args = self.profiles.run_args(dir, language, order, limits)?;
        let outcome = self.sandbox.execute(&args, input).await?;
        let status = outcome.status;

        let mut err_output = Vec::new();
        if !status.is_success() {
            err_output = self
                .read_or_tolerate(&self.profiles.run_error_path(dir, order), status)
                .await?;
        }
        let output = self
            .read_or_tolerate(&self.profiles.run_output_path(dir, order), status)
            .await?;

        debug!(
            order,
            status = ?status,
            cpu_time = outcome.cpu_time,
            memory = outcome.memory,
            "Run finished"
        );

        Ok(RunResult {
            outcome,
            output,
            err_output,
        })
    }

    /// A judger system error may leave no capture files behind; that is not
    /// a second failure.
    async fn read_or_tolerate(&self, path: &Path, status: StatusCode) -> Result<Vec<u8>, ExecError> {
        match read_capture(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if status == StatusCode::SystemError => {
                warn!(error = %e, "Capture file missing after sandbox system error");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRun, FakeSandbox};

    fn runner(sandbox: FakeSandbox) -> (Runner, Arc<FakeSandbox>) {
        let sandbox = Arc::new(sandbox);
        let profiles = Arc::new(ProfileRegistry::new("/tmp/gavel-logs", "/policy", 1000, 1000));
        (Runner::new(sandbox.clone(), profiles), sandbox)
    }

    #[tokio::test]
    async fn test_success_reads_output_only() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, sandbox) = runner(FakeSandbox::new());
        let limits = ExecutionLimits::new(1000, 65536);

        let result = runner.run(dir.path(), Language::C, 0, &limits, b"5\n").await.unwrap();
        assert_eq!(result.outcome.status, StatusCode::Success);
        assert_eq!(result.output, b"5\n");
        assert!(result.err_output.is_empty());

        let call = &sandbox.calls()[0];
        assert_eq!(call.input, b"5\n");
        assert_eq!(call.args.output_path.as_deref(), Some(dir.path().join("0.out").as_path()));
        assert_eq!(call.args.max_real_time, 3000);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_output_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = runner(FakeSandbox::new().run_with(|_| FakeRun {
            status: StatusCode::CpuTimeLimitExceeded,
            stdout: Some(b"partial".to_vec()),
            stderr: b"killed".to_vec(),
        }));
        let limits = ExecutionLimits::new(1000, 65536);

        let result = runner.run(dir.path(), Language::Cpp, 3, &limits, b"").await.unwrap();
        assert_eq!(result.outcome.status, StatusCode::CpuTimeLimitExceeded);
        assert_eq!(result.output, b"partial");
        assert_eq!(result.err_output, b"killed");
        assert!(dir.path().join("3.error").exists());
    }

    #[tokio::test]
    async fn test_missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = runner(FakeSandbox::new().run_with(|_| FakeRun {
            status: StatusCode::Success,
            stdout: None,
            stderr: Vec::new(),
        }));
        let limits = ExecutionLimits::new(1000, 65536);

        let err = runner.run(dir.path(), Language::C, 0, &limits, b"").await.unwrap_err();
        assert!(matches!(err, ExecError::Read { .. }));
    }

    #[tokio::test]
    async fn test_missing_files_after_system_error_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = runner(FakeSandbox::new().run_with(|_| FakeRun {
            status: StatusCode::SystemError,
            stdout: None,
            stderr: Vec::new(),
        }));
        let limits = ExecutionLimits::new(1000, 65536);

        let result = runner.run(dir.path(), Language::C, 1, &limits, b"").await.unwrap();
        assert_eq!(result.outcome.status, StatusCode::SystemError);
        assert!(result.output.is_empty());
    }
}
