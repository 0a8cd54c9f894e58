use gavel_common::types::ResultCode;
use std::io;
use std::process::ExitStatus;
use thiserror::Error;

/// Failures resolving a language profile into concrete paths and arguments.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("unresolved placeholder {placeholder} in `{template}`")]
    UnresolvedPlaceholder { template: String, placeholder: String },
}

/// A single judger invocation that produced no usable result record.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn judger: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to wait for judger: {0}")]
    Wait(#[source] io::Error),
    #[error("judger exited with {status}: {stderr}")]
    Exited { status: ExitStatus, stderr: String },
    #[error("judger output is not valid UTF-8")]
    NotUtf8,
    #[error("failed to decode judger result: {0}")]
    MalformedResult(#[source] serde_json::Error),
}

/// Fatal outcome of a compile or run step.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("sandbox reported a system error: {log}")]
    System { log: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TestcaseError {
    #[error("testcase source failed for problem {problem_id}: {message}")]
    Source { problem_id: String, message: String },
    #[error("testcase cache failed: {0}")]
    Cache(String),
    #[error("invalid testcase data for problem {problem_id}: {source}")]
    InvalidTestcaseData {
        problem_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Submission-level failures. Each one is a terminal message on the
/// submission's result stream.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("testcase retrieval failed: {0}")]
    Testcase(#[from] TestcaseError),
    #[error("sandbox failed during compilation: {0}")]
    Sandbox(#[source] ExecError),
    #[error("compile error")]
    Compile(String),
    #[error("failed to stage submission: {0}")]
    Stage(#[source] io::Error),
    #[error("failed to marshal result: {0}")]
    Marshal(#[from] serde_json::Error),
}

impl HandlerError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            HandlerError::Compile(_) => ResultCode::CompileError,
            HandlerError::Testcase(_) => ResultCode::TestcaseError,
            HandlerError::Validation(_)
            | HandlerError::Sandbox(_)
            | HandlerError::Stage(_)
            | HandlerError::Marshal(_) => ResultCode::ServerError,
        }
    }

    /// Text shown to the submitter. Compile errors carry the compiler output
    /// verbatim; everything else carries the error chain's top message.
    pub fn user_message(&self) -> String {
        match self {
            HandlerError::Compile(diagnostic) => diagnostic.clone(),
            HandlerError::Validation(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
