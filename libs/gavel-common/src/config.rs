// Runtime configuration read from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

/// Where problem testcases are read from on a cache miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestcaseSourceConfig {
    Dir(PathBuf),
    Http(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub judger_path: PathBuf,
    pub results_dir: PathBuf,
    pub log_dir: PathBuf,
    pub java_policy_path: PathBuf,
    pub testcase_source: TestcaseSourceConfig,
    pub testcase_ttl_secs: u64,
    pub sandbox_uid: i64,
    pub sandbox_gid: i64,
    pub max_parallel_jobs: usize,
    /// 0 leaves per-test fan-out unbounded
    pub max_parallel_tests: usize,
    pub submission_queue: String,
    pub result_queue: String,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests don't touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let testcase_source = match (lookup("GAVEL_TESTCASE_URL"), lookup("GAVEL_TESTCASE_DIR")) {
            (Some(url), _) if !url.is_empty() => TestcaseSourceConfig::Http(url),
            (_, Some(dir)) if !dir.is_empty() => TestcaseSourceConfig::Dir(PathBuf::from(dir)),
            _ => TestcaseSourceConfig::Dir(PathBuf::from("/app/testcases")),
        };

        Ok(Self {
            redis_url: string("REDIS_URL", "redis://127.0.0.1:6379"),
            judger_path: string("GAVEL_JUDGER_PATH", "/app/sandbox/libjudger.so").into(),
            results_dir: string("GAVEL_RESULTS_DIR", "/app/sandbox/results").into(),
            log_dir: string("GAVEL_LOG_DIR", "/app/sandbox/logs").into(),
            java_policy_path: string("GAVEL_JAVA_POLICY", "/app/sandbox/policy/java_policy").into(),
            testcase_source,
            testcase_ttl_secs: parse(&lookup, "GAVEL_TESTCASE_TTL_SECS", 86400)?,
            sandbox_uid: parse(&lookup, "GAVEL_SANDBOX_UID", 1000)?,
            sandbox_gid: parse(&lookup, "GAVEL_SANDBOX_GID", 1000)?,
            max_parallel_jobs: parse(&lookup, "GAVEL_MAX_PARALLEL_JOBS", 4)?,
            max_parallel_tests: parse(&lookup, "GAVEL_MAX_PARALLEL_TESTS", 0)?,
            submission_queue: string("GAVEL_SUBMISSION_QUEUE", crate::redis::SUBMISSION_QUEUE),
            result_queue: string("GAVEL_RESULT_QUEUE", crate::redis::RESULT_QUEUE),
            json_logs: lookup("GAVEL_LOG_FORMAT").as_deref() == Some("json"),
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError { key, value }),
    }
}
