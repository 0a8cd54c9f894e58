//! Sandboxed Executor - one judger subprocess per call
//!
//! The judger is an external, already-hardened isolation binary. It takes
//! its limits and file paths as `--flag=value` arguments, forwards its own
//! stdin to the confined program and prints a single JSON result record on
//! stdout. This module builds that argument vector, runs the binary once and
//! decodes the record. It never retries.

use crate::error::SandboxError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const MAX_CPU_TIME: &str = "--max_cpu_time=";
const MAX_REAL_TIME: &str = "--max_real_time=";
const MAX_MEMORY: &str = "--max_memory=";
const MAX_STACK: &str = "--max_stack=";
const MAX_OUTPUT_SIZE: &str = "--max_output_size=";
const EXE_PATH: &str = "--exe_path=";
const INPUT_PATH: &str = "--input_path=";
const OUTPUT_PATH: &str = "--output_path=";
const ERROR_PATH: &str = "--error_path=";
const LOG_PATH: &str = "--log_path=";
const ARGS: &str = "--args=";
const ENV: &str = "--env=";
const SECCOMP_RULE_NAME: &str = "--seccomp_rule_name=";
const MEMORY_LIMIT_CHECK_ONLY: &str = "--memory_limit_check_only=";
const UID: &str = "--uid=";
const GID: &str = "--gid=";

/// Ids the judger may drop privileges to. Root and `nobody` are excluded.
const SAFE_ID_RANGE: std::ops::Range<i64> = 1..65534;

/// Unlimited value understood by the judger for numeric ceilings
pub const UNLIMITED: i64 = -1;

/// Wall-clock ceiling as a multiple of the cpu-time ceiling, so a program
/// blocked on I/O or sleeping cannot stall a worker forever.
pub const REAL_TIME_FACTOR: i64 = 3;

/// Resource ceilings for one run of a submitted program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub cpu_time_ms: i64,
    pub real_time_ms: i64,
    pub memory_kb: i64,
}

impl ExecutionLimits {
    /// Derived ceilings saturate at `i64::MAX`.
    pub fn new(cpu_time_ms: i64, memory_kb: i64) -> Self {
        Self {
            cpu_time_ms,
            real_time_ms: cpu_time_ms.saturating_mul(REAL_TIME_FACTOR),
            memory_kb,
        }
    }

    /// Like `new`, but `None` when a derived ceiling does not fit in an i64.
    pub fn checked(cpu_time_ms: i64, memory_kb: i64) -> Option<Self> {
        let real_time_ms = cpu_time_ms.checked_mul(REAL_TIME_FACTOR)?;
        memory_kb.checked_mul(1024)?;
        Some(Self {
            cpu_time_ms,
            real_time_ms,
            memory_kb,
        })
    }

    pub fn memory_bytes(&self) -> i64 {
        self.memory_kb.saturating_mul(1024)
    }
}

/// Everything a single judger invocation needs.
///
/// Zero numeric ceilings and `None` paths are left off the command line so
/// the judger applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecArgs {
    pub max_cpu_time: i64,
    pub max_real_time: i64,
    pub max_memory: i64,
    pub max_stack: i64,
    pub max_output_size: i64,
    pub uid: i64,
    pub gid: i64,
    pub exe_path: PathBuf,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub error_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub seccomp_rule_name: Option<String>,
    pub memory_limit_check_only: bool,
    pub args: Vec<String>,
    pub env: Vec<String>,
}

impl ExecArgs {
    /// Flag-style argument vector in the order the judger documents.
    pub fn to_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();

        let numeric = [
            (MAX_CPU_TIME, self.max_cpu_time),
            (MAX_REAL_TIME, self.max_real_time),
            (MAX_MEMORY, self.max_memory),
            (MAX_STACK, self.max_stack),
            (MAX_OUTPUT_SIZE, self.max_output_size),
        ];
        for (flag, value) in numeric {
            if value != 0 {
                flags.push(format!("{}{}", flag, value));
            }
        }

        if SAFE_ID_RANGE.contains(&self.uid) {
            flags.push(format!("{}{}", UID, self.uid));
        }
        if SAFE_ID_RANGE.contains(&self.gid) {
            flags.push(format!("{}{}", GID, self.gid));
        }

        flags.push(format!("{}{}", EXE_PATH, self.exe_path.display()));

        let paths = [
            (INPUT_PATH, &self.input_path),
            (OUTPUT_PATH, &self.output_path),
            (ERROR_PATH, &self.error_path),
            (LOG_PATH, &self.log_path),
        ];
        for (flag, path) in paths {
            if let Some(path) = path {
                flags.push(format!("{}{}", flag, path.display()));
            }
        }

        if let Some(rule) = &self.seccomp_rule_name {
            flags.push(format!("{}{}", SECCOMP_RULE_NAME, rule));
        }

        flags.push(format!(
            "{}{}",
            MEMORY_LIMIT_CHECK_ONLY,
            u8::from(self.memory_limit_check_only)
        ));

        flags.extend(self.args.iter().map(|arg| format!("{}{}", ARGS, arg)));
        flags.extend(self.env.iter().map(|env| format!("{}{}", ENV, env)));
        flags
    }
}

/// Low-level outcome reported by the judger, before any verdict mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    CpuTimeLimitExceeded,
    RealTimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
}

impl StatusCode {
    /// Map the judger's `result` field. Codes outside the documented set are
    /// treated as a system error rather than success.
    pub fn from_judger(code: i64) -> Self {
        match code {
            0 => StatusCode::Success,
            1 => StatusCode::CpuTimeLimitExceeded,
            2 => StatusCode::RealTimeLimitExceeded,
            3 => StatusCode::MemoryLimitExceeded,
            4 => StatusCode::RuntimeError,
            5 => StatusCode::SystemError,
            other => {
                warn!(result = other, "Unknown judger result code, treating as system error");
                StatusCode::SystemError
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

/// Resource usage and status of one judger invocation.
/// Times are milliseconds, memory is bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub cpu_time: i64,
    pub real_time: i64,
    pub memory: i64,
    pub signal: i64,
    pub exit_code: i64,
    pub error_code: i64,
    pub status: StatusCode,
}

impl ExecutionOutcome {
    pub fn new(status: StatusCode) -> Self {
        Self {
            cpu_time: 0,
            real_time: 0,
            memory: 0,
            signal: 0,
            exit_code: 0,
            error_code: 0,
            status,
        }
    }

    /// Decode the JSON record the judger prints on stdout.
    pub fn from_record(stdout: &[u8]) -> Result<Self, SandboxError> {
        let text = std::str::from_utf8(stdout).map_err(|_| SandboxError::NotUtf8)?;
        let record: JudgerRecord = serde_json::from_str(text).map_err(SandboxError::MalformedResult)?;
        Ok(Self {
            cpu_time: record.cpu_time,
            real_time: record.real_time,
            memory: record.memory,
            signal: record.signal,
            exit_code: record.exit_code,
            error_code: record.error,
            status: StatusCode::from_judger(record.result),
        })
    }
}

#[derive(Debug, Deserialize)]
struct JudgerRecord {
    cpu_time: i64,
    real_time: i64,
    memory: i64,
    signal: i64,
    exit_code: i64,
    error: i64,
    result: i64,
}

/// The isolation capability: one call, one confined process lifecycle.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(&self, args: &ExecArgs, input: &[u8]) -> Result<ExecutionOutcome, SandboxError>;
}

/// Runs the judger binary as a subprocess.
#[derive(Debug, Clone)]
pub struct Judger {
    binary_path: PathBuf,
}

impl Judger {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl Sandbox for Judger {
    async fn execute(&self, args: &ExecArgs, input: &[u8]) -> Result<ExecutionOutcome, SandboxError> {
        let mut flags = args.to_flags();
        flags.push(format!("{}PATH={}", ENV, std::env::var("PATH").unwrap_or_default()));

        let mut child = Command::new(&self.binary_path)
            .args(&flags)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Spawn)?;

        // Feed stdin from its own task so a program that never reads cannot
        // deadlock us against a full pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        warn!(error = %e, "Failed to write judger stdin");
                    }
                }
            });
        }

        let output = child.wait_with_output().await.map_err(SandboxError::Wait)?;
        if !output.status.success() {
            return Err(SandboxError::Exited {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        debug!(record = %String::from_utf8_lossy(&output.stdout), "Judger result");
        ExecutionOutcome::from_record(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_args() -> ExecArgs {
        ExecArgs {
            max_cpu_time: 1000,
            max_real_time: 3000,
            max_memory: 256 * 1024 * 1024,
            max_stack: 128 * 1024 * 1024,
            max_output_size: 10 * 1024 * 1024,
            uid: 1000,
            gid: 1000,
            exe_path: "/w/main".into(),
            input_path: None,
            output_path: Some("/w/0.out".into()),
            error_path: Some("/w/0.error".into()),
            log_path: Some("/logs/run.log".into()),
            seccomp_rule_name: Some("c_cpp".into()),
            memory_limit_check_only: false,
            args: vec!["-a".into(), "b".into()],
            env: vec!["LANG=en_US.UTF-8".into()],
        }
    }

    #[test]
    fn test_flag_order() {
        assert_eq!(
            full_args().to_flags(),
            vec![
                "--max_cpu_time=1000",
                "--max_real_time=3000",
                "--max_memory=268435456",
                "--max_stack=134217728",
                "--max_output_size=10485760",
                "--uid=1000",
                "--gid=1000",
                "--exe_path=/w/main",
                "--output_path=/w/0.out",
                "--error_path=/w/0.error",
                "--log_path=/logs/run.log",
                "--seccomp_rule_name=c_cpp",
                "--memory_limit_check_only=0",
                "--args=-a",
                "--args=b",
                "--env=LANG=en_US.UTF-8",
            ]
        );
    }

    #[test]
    fn test_zero_limits_are_omitted_and_unlimited_is_kept() {
        let args = ExecArgs {
            max_memory: UNLIMITED,
            exe_path: "/usr/bin/java".into(),
            memory_limit_check_only: true,
            ..Default::default()
        };
        assert_eq!(
            args.to_flags(),
            vec!["--max_memory=-1", "--exe_path=/usr/bin/java", "--memory_limit_check_only=1"]
        );
    }

    #[test]
    fn test_privileged_ids_are_never_passed() {
        for id in [0, -1, 65534, 70000] {
            let args = ExecArgs { uid: id, gid: id, ..Default::default() };
            let flags = args.to_flags();
            assert!(!flags.iter().any(|f| f.starts_with(UID) || f.starts_with(GID)), "id {}", id);
        }
    }

    #[test]
    fn test_decode_record() {
        let record = br#"{"cpu_time":12,"real_time":30,"memory":4194304,"signal":0,"exit_code":0,"error":0,"result":0}"#;
        let outcome = ExecutionOutcome::from_record(record).unwrap();
        assert_eq!(outcome.status, StatusCode::Success);
        assert_eq!(outcome.cpu_time, 12);
        assert_eq!(outcome.memory, 4194304);
    }

    #[test]
    fn test_decode_maps_every_documented_code() {
        let expected = [
            StatusCode::Success,
            StatusCode::CpuTimeLimitExceeded,
            StatusCode::RealTimeLimitExceeded,
            StatusCode::MemoryLimitExceeded,
            StatusCode::RuntimeError,
            StatusCode::SystemError,
        ];
        for (code, status) in expected.into_iter().enumerate() {
            assert_eq!(StatusCode::from_judger(code as i64), status);
        }
        assert_eq!(StatusCode::from_judger(42), StatusCode::SystemError);
        assert_eq!(StatusCode::from_judger(-1), StatusCode::SystemError);
    }

    #[test]
    fn test_malformed_record_is_an_error() {
        assert!(matches!(
            ExecutionOutcome::from_record(b"segfault"),
            Err(SandboxError::MalformedResult(_))
        ));
        assert!(matches!(
            ExecutionOutcome::from_record(br#"{"cpu_time":1}"#),
            Err(SandboxError::MalformedResult(_))
        ));
        assert!(matches!(
            ExecutionOutcome::from_record(&[0xff, 0xfe]),
            Err(SandboxError::NotUtf8)
        ));
    }

    #[test]
    fn test_limits_derive_real_time() {
        let limits = ExecutionLimits::new(2000, 262144);
        assert_eq!(limits.real_time_ms, 6000);
        assert_eq!(limits.memory_bytes(), 268435456);
    }

    #[test]
    fn test_huge_limits_do_not_overflow() {
        assert!(ExecutionLimits::checked(i64::MAX / 2, 1024).is_none());
        assert!(ExecutionLimits::checked(1000, i64::MAX / 512).is_none());
        assert_eq!(ExecutionLimits::checked(1000, 1024), Some(ExecutionLimits::new(1000, 1024)));

        let limits = ExecutionLimits::new(i64::MAX / 2, i64::MAX / 512);
        assert_eq!(limits.real_time_ms, i64::MAX);
        assert_eq!(limits.memory_bytes(), i64::MAX);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let judger = Judger::new("/nonexistent/gavel-judger");
        let err = judger.execute(&ExecArgs::default(), b"").await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn(_)));
    }
}
