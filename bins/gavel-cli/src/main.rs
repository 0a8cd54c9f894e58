mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gavel-cli")]
#[command(about = "Gavel CLI - Judge submissions locally and inspect language profiles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Phase {
    Compile,
    Run,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge a source file through the real sandbox
    Judge {
        /// Language tag (C, Cpp, Java, Python3)
        #[arg(short, long)]
        language: String,

        /// Source file to judge
        #[arg(short, long)]
        source: PathBuf,

        /// JSON file with an array of {id, in, out} test elements
        #[arg(short, long, conflicts_with = "testcase_dir")]
        testcases: Option<PathBuf>,

        /// Directory holding <problem id>.json testcase files
        #[arg(long)]
        testcase_dir: Option<PathBuf>,

        /// Problem id to look up in --testcase-dir
        #[arg(short, long, default_value = "1")]
        problem_id: i64,

        /// CPU time limit in milliseconds
        #[arg(long, default_value = "1000")]
        time_limit: i64,

        /// Memory limit in kilobytes
        #[arg(long, default_value = "262144")]
        memory_limit: i64,

        /// Judge tests in order and cancel the rest after the first failure
        #[arg(long, default_value = "false")]
        stop_on_not_accepted: bool,

        /// Judge only the elements flagged hidden
        #[arg(long, default_value = "false")]
        only_hidden: bool,

        /// Tests run at once (0 = all)
        #[arg(long, default_value = "0")]
        max_parallel_tests: usize,

        #[command(flatten)]
        host: HostArgs,
    },

    /// List supported languages and their profiles
    Languages,

    /// Print the judger arguments a profile produces
    Args {
        #[arg(short, long)]
        language: String,

        #[arg(long, value_enum, default_value = "run")]
        phase: Phase,

        /// Working directory to expand paths against
        #[arg(short, long, default_value = "/tmp/gavel")]
        dir: PathBuf,

        /// Zero-based test index (run phase)
        #[arg(short, long, default_value = "0")]
        order: usize,

        #[arg(long, default_value = "1000")]
        time_limit: i64,

        #[arg(long, default_value = "262144")]
        memory_limit: i64,

        #[command(flatten)]
        host: HostArgs,
    },

    /// Push a judge request onto the worker's submission queue
    Submit {
        /// JSON request body
        #[arg(short, long)]
        file: PathBuf,

        /// Submission id (random when omitted)
        #[arg(short, long)]
        id: Option<String>,

        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,

        #[arg(long, env = "GAVEL_SUBMISSION_QUEUE", default_value = gavel_common::redis::SUBMISSION_QUEUE)]
        queue: String,
    },
}

/// Host paths and ids, same meaning as the worker's environment.
#[derive(clap::Args, Clone)]
pub struct HostArgs {
    #[arg(long, env = "GAVEL_JUDGER_PATH", default_value = "/app/sandbox/libjudger.so")]
    pub judger: PathBuf,

    #[arg(long, env = "GAVEL_RESULTS_DIR", default_value = "/app/sandbox/results")]
    pub results_dir: PathBuf,

    #[arg(long, env = "GAVEL_LOG_DIR", default_value = "/app/sandbox/logs")]
    pub log_dir: PathBuf,

    #[arg(long, env = "GAVEL_JAVA_POLICY", default_value = "/app/sandbox/policy/java_policy")]
    pub java_policy: PathBuf,

    #[arg(long, env = "GAVEL_SANDBOX_UID", default_value = "1000")]
    pub uid: i64,

    #[arg(long, env = "GAVEL_SANDBOX_GID", default_value = "1000")]
    pub gid: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Judge {
            language,
            source,
            testcases,
            testcase_dir,
            problem_id,
            time_limit,
            memory_limit,
            stop_on_not_accepted,
            only_hidden,
            max_parallel_tests,
            host,
        } => {
            let options = commands::JudgeOptions {
                language,
                source,
                testcases,
                testcase_dir,
                problem_id,
                time_limit,
                memory_limit,
                stop_on_not_accepted,
                only_hidden,
                max_parallel_tests,
            };
            commands::judge(&options, &host).await?;
        }
        Commands::Languages => {
            commands::list_languages();
        }
        Commands::Args {
            language,
            phase,
            dir,
            order,
            time_limit,
            memory_limit,
            host,
        } => {
            let compile = matches!(phase, Phase::Compile);
            commands::print_args(&language, compile, &dir, order, time_limit, memory_limit, &host)?;
        }
        Commands::Submit {
            file,
            id,
            redis_url,
            queue,
        } => {
            commands::submit(&file, id, &redis_url, &queue).await?;
        }
    }

    Ok(())
}
