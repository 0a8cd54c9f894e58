use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Languages a submission may be written in.
///
/// The serialized names are the tags the submission producer sends on the
/// wire; adding a language means adding a variant here and a profile row in
/// the judge's language table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    C,
    Cpp,
    Java,
    Python3,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::C, Language::Cpp, Language::Java, Language::Python3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "C",
            Language::Cpp => "Cpp",
            Language::Java => "Java",
            Language::Python3 => "Python3",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| UnsupportedLanguage(s.to_string()))
    }
}

/// One input/expected-output pair of a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestElement {
    pub id: i64,
    #[serde(rename = "in")]
    pub input: String,
    #[serde(rename = "out")]
    pub output: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

/// Submission body as delivered by the transport, before validation.
///
/// `language` stays a plain string here so that an empty tag and an unknown
/// tag can be reported differently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub problem_id: i64,
    #[serde(default)]
    pub time_limit: i64,
    #[serde(default)]
    pub memory_limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_testcases: Option<Vec<TestElement>>,
    #[serde(default)]
    pub stop_on_not_accepted: bool,
    #[serde(default)]
    pub judge_only_hidden_testcases: bool,
}

/// Per-test classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    CpuTimeLimitExceeded,
    RealTimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
    Canceled,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

impl From<Verdict> for u8 {
    fn from(verdict: Verdict) -> Self {
        ResultCode::from(verdict) as u8
    }
}

impl TryFrom<u8> for Verdict {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match ResultCode::try_from(code)? {
            ResultCode::Accepted => Ok(Verdict::Accepted),
            ResultCode::WrongAnswer => Ok(Verdict::WrongAnswer),
            ResultCode::CpuTimeLimitExceeded => Ok(Verdict::CpuTimeLimitExceeded),
            ResultCode::RealTimeLimitExceeded => Ok(Verdict::RealTimeLimitExceeded),
            ResultCode::MemoryLimitExceeded => Ok(Verdict::MemoryLimitExceeded),
            ResultCode::RuntimeError => Ok(Verdict::RuntimeError),
            ResultCode::ServerError => Ok(Verdict::SystemError),
            ResultCode::Canceled => Ok(Verdict::Canceled),
            other => Err(format!("result code {} is not a test verdict", other as u8)),
        }
    }
}

/// Classification carried by every published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ResultCode {
    Accepted = 0,
    WrongAnswer = 1,
    CpuTimeLimitExceeded = 2,
    RealTimeLimitExceeded = 3,
    MemoryLimitExceeded = 4,
    RuntimeError = 5,
    CompileError = 6,
    TestcaseError = 7,
    ServerError = 8,
    Canceled = 9,
}

impl From<ResultCode> for u8 {
    fn from(code: ResultCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ResultCode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => ResultCode::Accepted,
            1 => ResultCode::WrongAnswer,
            2 => ResultCode::CpuTimeLimitExceeded,
            3 => ResultCode::RealTimeLimitExceeded,
            4 => ResultCode::MemoryLimitExceeded,
            5 => ResultCode::RuntimeError,
            6 => ResultCode::CompileError,
            7 => ResultCode::TestcaseError,
            8 => ResultCode::ServerError,
            9 => ResultCode::Canceled,
            other => return Err(format!("unknown result code {}", other)),
        })
    }
}

impl From<Verdict> for ResultCode {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted => ResultCode::Accepted,
            Verdict::WrongAnswer => ResultCode::WrongAnswer,
            Verdict::CpuTimeLimitExceeded => ResultCode::CpuTimeLimitExceeded,
            Verdict::RealTimeLimitExceeded => ResultCode::RealTimeLimitExceeded,
            Verdict::MemoryLimitExceeded => ResultCode::MemoryLimitExceeded,
            Verdict::RuntimeError => ResultCode::RuntimeError,
            Verdict::SystemError => ResultCode::ServerError,
            Verdict::Canceled => ResultCode::Canceled,
        }
    }
}

/// Outcome of judging one test element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeResult {
    pub testcase_id: i64,
    pub result_code: Verdict,
    pub cpu_time: i64,
    pub real_time: i64,
    pub memory: i64,
    pub signal: i64,
    pub exit_code: i64,
    pub error_code: i64,
    pub output: String,
    pub error: String,
}

impl JudgeResult {
    /// Result with no resource usage, for tests that never ran to completion.
    pub fn bare(testcase_id: i64, verdict: Verdict, error: impl Into<String>) -> Self {
        Self {
            testcase_id,
            result_code: verdict,
            cpu_time: 0,
            real_time: 0,
            memory: 0,
            signal: 0,
            exit_code: 0,
            error_code: 0,
            output: String::new(),
            error: error.into(),
        }
    }
}

/// A submission as it sits on the submission queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionEnvelope {
    pub submission_id: String,
    pub body: serde_json::Value,
}

/// A single streamed message as published on the result queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub submission_id: String,
    pub result_code: ResultCode,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_result: Option<JudgeResult>,
    pub judged_at: DateTime<Utc>,
}

impl ResultEnvelope {
    pub fn judged(submission_id: &str, result: JudgeResult) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            result_code: result.result_code.into(),
            error: String::new(),
            judge_result: Some(result),
            judged_at: Utc::now(),
        }
    }

    pub fn failed(submission_id: &str, code: ResultCode, error: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            result_code: code,
            error: error.into(),
            judge_result: None,
            judged_at: Utc::now(),
        }
    }
}
