mod dispatch;

use anyhow::Context;
use gavel_common::config::{Config, TestcaseSourceConfig};
use gavel_common::redis;
use gavel_judge::language::ProfileRegistry;
use gavel_judge::testcase::{DataSource, FileSource, HttpSource, RedisCache};
use gavel_judge::{JudgeHandler, Judger, TestcaseStore};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid worker configuration")?;

    // Initialize tracing subscriber
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);
    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    info!("Gavel worker booting...");

    for dir in [&config.results_dir, &config.log_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    // Connect to Redis
    let client = ::redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    let handler = Arc::new(build_handler(&config, redis_conn.clone()));

    info!(
        judger = %config.judger_path.display(),
        queue = %config.submission_queue,
        result_queue = %config.result_queue,
        max_parallel_jobs = config.max_parallel_jobs,
        max_parallel_tests = config.max_parallel_tests,
        "Worker configured"
    );

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        warn!("Received shutdown signal, stopping intake...");
    };

    tokio::select! {
        result = worker_loop(redis_conn, handler, &config) => result?,
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn build_handler(config: &Config, redis_conn: ::redis::aio::ConnectionManager) -> JudgeHandler {
    let source: Arc<dyn DataSource> = match &config.testcase_source {
        TestcaseSourceConfig::Dir(root) => Arc::new(FileSource::new(root.clone())),
        TestcaseSourceConfig::Http(base_url) => Arc::new(HttpSource::new(base_url.clone())),
    };
    let cache = Arc::new(RedisCache::new(redis_conn, config.testcase_ttl_secs));
    let profiles = Arc::new(ProfileRegistry::new(
        config.log_dir.clone(),
        config.java_policy_path.clone(),
        config.sandbox_uid,
        config.sandbox_gid,
    ));

    JudgeHandler::new(
        Arc::new(Judger::new(config.judger_path.clone())),
        profiles,
        TestcaseStore::new(source, cache),
        config.results_dir.clone(),
    )
    .with_max_parallel_tests(config.max_parallel_tests)
}

#[instrument(skip_all, fields(queue = %config.submission_queue))]
async fn worker_loop(
    mut redis_conn: ::redis::aio::ConnectionManager,
    handler: Arc<JudgeHandler>,
    config: &Config,
) -> anyhow::Result<()> {
    let slots = Arc::new(Semaphore::new(config.max_parallel_jobs.max(1)));

    loop {
        // Only take work off the queue when a slot is free
        let permit = slots.clone().acquire_owned().await?;

        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_submission(&mut redis_conn, &config.submission_queue, 5.0).await {
            Ok(Some(submission)) => {
                info!(submission_id = %submission.submission_id, "Received submission");
                let handler = handler.clone();
                let conn = redis_conn.clone();
                let result_queue = config.result_queue.clone();
                tokio::spawn(async move {
                    dispatch::process_submission(handler, conn, &result_queue, submission).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
