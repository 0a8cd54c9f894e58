// CLI commands for judging locally and inspecting profiles
use crate::HostArgs;
use anyhow::{bail, Context, Result};
use gavel_common::types::{JudgeRequest, JudgeResult, Language, SubmissionEnvelope, TestElement, Verdict};
use gavel_judge::language::{LanguageProfile, ProfileRegistry, PROFILES};
use gavel_judge::sandbox::ExecutionLimits;
use gavel_judge::testcase::{DataSource, FileSource, MemoryCache, Testcase};
use gavel_judge::{HandlerError, JudgeHandler, JudgeMessage, Judger, TestcaseStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct JudgeOptions {
    pub language: String,
    pub source: PathBuf,
    pub testcases: Option<PathBuf>,
    pub testcase_dir: Option<PathBuf>,
    pub problem_id: i64,
    pub time_limit: i64,
    pub memory_limit: i64,
    pub stop_on_not_accepted: bool,
    pub only_hidden: bool,
    pub max_parallel_tests: usize,
}

fn registry(host: &HostArgs) -> ProfileRegistry {
    ProfileRegistry::new(host.log_dir.clone(), host.java_policy.clone(), host.uid, host.gid)
}

/// Load a local testcase file
fn load_testcases(path: &Path) -> Result<Vec<TestElement>> {
    let blob = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let testcase = Testcase::decode(&path.display().to_string(), &blob)?;
    Ok(testcase.elements)
}

/// What one judged submission came to.
#[derive(Debug)]
pub struct Summary {
    pub results: Vec<JudgeResult>,
    pub failure: Option<HandlerError>,
}

impl Summary {
    pub fn from_messages(messages: Vec<JudgeMessage>) -> Self {
        let mut results = Vec::new();
        let mut failure = None;
        for message in messages {
            match message {
                Ok(result) => results.push(result),
                Err(e) => failure = Some(e),
            }
        }
        results.sort_by_key(|r| r.testcase_id);
        Self { results, failure }
    }

    pub fn accepted(&self) -> usize {
        self.results.iter().filter(|r| r.result_code == Verdict::Accepted).count()
    }

    pub fn all_accepted(&self) -> bool {
        self.failure.is_none() && self.accepted() == self.results.len()
    }
}

pub async fn judge(options: &JudgeOptions, host: &HostArgs) -> Result<()> {
    let code = fs::read_to_string(&options.source)
        .with_context(|| format!("Failed to read {}", options.source.display()))?;

    let user_testcases = match &options.testcases {
        Some(path) => Some(load_testcases(path)?),
        None => None,
    };
    if user_testcases.is_none() && options.testcase_dir.is_none() {
        bail!("Either --testcases or --testcase-dir is required");
    }

    fs::create_dir_all(&host.log_dir)
        .with_context(|| format!("Failed to create {}", host.log_dir.display()))?;

    let source: Arc<dyn DataSource> = Arc::new(FileSource::new(options.testcase_dir.clone().unwrap_or_default()));
    let store = TestcaseStore::new(source, Arc::new(MemoryCache::new()));
    let handler = JudgeHandler::new(
        Arc::new(Judger::new(host.judger.clone())),
        Arc::new(registry(host)),
        store,
        host.results_dir.clone(),
    )
    .with_max_parallel_tests(options.max_parallel_tests);

    let request = JudgeRequest {
        code,
        language: options.language.clone(),
        problem_id: options.problem_id,
        time_limit: options.time_limit,
        memory_limit: options.memory_limit,
        user_testcases,
        stop_on_not_accepted: options.stop_on_not_accepted,
        judge_only_hidden_testcases: options.only_hidden,
    };
    let body = serde_json::to_vec(&request)?;
    let submission_id = format!("cli-{}", uuid::Uuid::new_v4().simple());

    println!("⚖️  Judging {} as {}...", options.source.display(), options.language);

    let (tx, mut rx) = mpsc::channel(32);
    let collect = async {
        let mut messages = Vec::new();
        while let Some(message) = rx.recv().await {
            messages.push(message);
        }
        messages
    };
    let ((), messages) = tokio::join!(handler.handle(&submission_id, &body, tx), collect);

    let summary = Summary::from_messages(messages);
    print_summary(&summary);

    if let Some(failure) = summary.failure {
        bail!("Submission failed: {:?}", failure.result_code());
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    if let Some(failure) = &summary.failure {
        match failure {
            HandlerError::Compile(diagnostic) => {
                println!("\n❌ Compile error:\n{}", diagnostic);
            }
            other => {
                println!("\n❌ {}", other.user_message());
            }
        }
        return;
    }

    println!(
        "\n{:<8} {:<24} {:>8} {:>8} {:>12}",
        "TEST", "VERDICT", "CPU ms", "REAL ms", "MEMORY KB"
    );
    println!("{}", "─".repeat(64));
    for result in &summary.results {
        println!(
            "{:<8} {:<24} {:>8} {:>8} {:>12}",
            result.testcase_id,
            format!("{:?}", result.result_code),
            result.cpu_time,
            result.real_time,
            result.memory / 1024
        );
        if !result.error.is_empty() {
            println!("         {}", result.error.lines().next().unwrap_or(""));
        }
    }

    let marker = if summary.all_accepted() { "✅" } else { "⚠️ " };
    println!("\n{} {}/{} accepted", marker, summary.accepted(), summary.results.len());
}

pub fn list_languages() {
    println!("📋 Supported Languages:\n");
    println!(
        "{:<10} {:<14} {:<40} {:<18} {:<10}",
        "LANGUAGE", "SOURCE", "ARTIFACT", "COMPILER", "SECCOMP"
    );
    println!("{}", "─".repeat(96));

    for profile in PROFILES.iter() {
        let seccomp = match (profile.seccomp_rule, profile.memory_limit_check_only) {
            (Some(rule), _) => rule.to_string(),
            (None, true) => "none (mem check)".to_string(),
            (None, false) => "none".to_string(),
        };
        println!(
            "{:<10} {:<14} {:<40} {:<18} {:<10}",
            profile.language.as_str(), profile.src_name, profile.exe_name, profile.compiler_path, seccomp
        );
    }

    println!("\n✅ Total: {} language(s)", PROFILES.len());
}

/// Judger flags for one compile or run step
pub fn judger_flags(
    tag: &str,
    compile: bool,
    dir: &Path,
    order: usize,
    limits: &ExecutionLimits,
    host: &HostArgs,
) -> Result<Vec<String>> {
    let language: Language = LanguageProfile::resolve(tag)?.language;
    let registry = registry(host);
    let args = if compile {
        registry.compile_args(dir, language)?
    } else {
        registry.run_args(dir, language, order, limits)?
    };
    Ok(args.to_flags())
}

pub fn print_args(
    tag: &str,
    compile: bool,
    dir: &Path,
    order: usize,
    time_limit: i64,
    memory_limit: i64,
    host: &HostArgs,
) -> Result<()> {
    let limits = ExecutionLimits::new(time_limit, memory_limit);
    let flags = judger_flags(tag, compile, dir, order, &limits, host)?;

    println!("{} \\", host.judger.display());
    for (i, flag) in flags.iter().enumerate() {
        let continuation = if i + 1 < flags.len() { " \\" } else { "" };
        println!("    '{}'{}", flag, continuation);
    }
    Ok(())
}

pub async fn submit(file: &Path, id: Option<String>, redis_url: &str, queue: &str) -> Result<()> {
    let content = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let body: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", file.display()))?;

    let submission = SubmissionEnvelope {
        submission_id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        body,
    };

    let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
    let mut conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    gavel_common::redis::push_submission(&mut conn, queue, &submission)
        .await
        .context("Failed to push submission")?;

    println!("📨 Submitted {} to {}", submission.submission_id, queue);
    Ok(())
}
