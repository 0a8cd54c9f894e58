use crate::error::ExecError;
use crate::language::ProfileRegistry;
use crate::sandbox::{ExecutionOutcome, Sandbox, StatusCode};
use crate::workdir::{read_capture, read_tail};
use gavel_common::types::Language;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// How much of the shared judger log is attached to a system error
const SANDBOX_LOG_TAIL: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    pub outcome: ExecutionOutcome,
    /// Compiler output; empty when compilation succeeded
    pub diagnostic: String,
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        self.outcome.status.is_success()
    }
}

#[derive(Clone)]
pub struct Compiler {
    sandbox: Arc<dyn Sandbox>,
    profiles: Arc<ProfileRegistry>,
}

impl Compiler {
    pub fn new(sandbox: Arc<dyn Sandbox>, profiles: Arc<ProfileRegistry>) -> Self {
        Self { sandbox, profiles }
    }

    /// Compile the source staged in `dir`.
    ///
    /// A judger system error is returned as `Err`: it is an infrastructure
    /// fault and must never reach the submitter as a compile error. Every
    /// other non-success status is an ordinary failed compilation.
    pub async fn compile(&self, dir: &Path, language: Language) -> Result<CompileResult, ExecError> {
        let args = self.profiles.compile_args(dir, language)?;
        let outcome = self.sandbox.execute(&args, &[]).await?;

        match outcome.status {
            StatusCode::Success => {
                debug!(language = %language, cpu_time = outcome.cpu_time, "Compilation succeeded");
                Ok(CompileResult {
                    outcome,
                    diagnostic: String::new(),
                })
            }
            StatusCode::SystemError => {
                let log_path = self.profiles.compile_log_path();
                let log = read_tail(&log_path, SANDBOX_LOG_TAIL)
                    .await
                    .unwrap_or_else(|e| format!("sandbox log unavailable: {}", e));
                error!(language = %language, error_code = outcome.error_code, "Sandbox system error during compilation");
                Err(ExecError::System { log })
            }
            status => {
                let output = read_capture(&self.profiles.compile_output_path(dir)).await?;
                let diagnostic = String::from_utf8_lossy(&output).into_owned();
                warn!(
                    language = %language,
                    status = ?status,
                    error_preview = diagnostic.lines().next().unwrap_or(""),
                    "Compilation failed"
                );
                Ok(CompileResult { outcome, diagnostic })
            }
        }
    }
}
