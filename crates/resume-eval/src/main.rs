use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use resume_eval::candidate::{CandidateId, CandidateStatus};
use resume_eval::config::{load_config, load_job_description, validate_config, Config};
use resume_eval::db::Database;
use resume_eval::evaluator::LlmEvaluator;
use resume_eval::logging;
use resume_eval::pipeline::{NoopProgress, Pipeline, PipelineConfig};
use resume_eval::secrets::resolve_secret_optional;
use resume_eval::service::CandidateService;
use resume_eval::storage::CandidateStorage;
use resume_eval::store::{ListFilter, StatusStore};
use resume_eval::worker::{JobOutcome, WorkerPool};

#[derive(Parser)]
#[command(name = "resume-eval")]
#[command(about = "Extract, parse and score resumes against a job description")]
#[command(version)]
struct Cli {
    /// Config file path (defaults apply when omitted)
    #[arg(short, long, global = true, env = "RESUME_EVAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload PDFs and process them, together with any unfinished candidates
    Process {
        /// Resume PDFs to upload
        files: Vec<PathBuf>,
    },

    /// Show a candidate's status
    Status {
        /// Candidate ID
        id: String,
    },

    /// Show a candidate's full result
    Result {
        /// Candidate ID
        id: String,
    },

    /// Reset a DONE, FAILED or PENDING candidate and process it again
    Reevaluate {
        /// Candidate ID
        id: String,
    },

    /// List candidates, newest first
    List {
        /// Only candidates with this status (PENDING, PROCESSING, DONE, FAILED)
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long, default_value = "100")]
        limit: u64,
        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Show the failure audit trail of a candidate
    Failures {
        /// Candidate ID
        id: String,
    },
}

fn parse_id(id: &str) -> anyhow::Result<CandidateId> {
    id.parse()
        .with_context(|| format!("Invalid candidate id '{}'", id))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let config = Config::with_defaults();
            validate_config(&config)?;
            config
        }
    };

    logging::init_logging(&config.logging)?;

    let db = Database::open(&config.database_path()).context("Failed to open database")?;
    let store = StatusStore::new(db);

    match cli.command {
        Commands::Status { id } => print_json(&store.status_view(parse_id(&id)?)?),
        Commands::Result { id } => print_json(&store.result_view(parse_id(&id)?)?),
        Commands::Failures { id } => print_json(&store.failures(parse_id(&id)?)?),
        Commands::List {
            status,
            limit,
            offset,
        } => {
            let status = status
                .map(|s| s.parse::<CandidateStatus>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let (candidates, total) = store.list(&ListFilter {
                status,
                limit: Some(limit),
                offset: Some(offset),
            })?;
            let views: Vec<_> = candidates.iter().map(|c| c.status_view()).collect();
            print_json(&serde_json::json!({ "total": total, "candidates": views }))
        }
        Commands::Process { files } => run_pipeline(&config, store, Work::Upload(files)).await,
        Commands::Reevaluate { id } => {
            run_pipeline(&config, store, Work::Reevaluate(parse_id(&id)?)).await
        }
    }
}

enum Work {
    Upload(Vec<PathBuf>),
    Reevaluate(CandidateId),
}

/// Starts the worker pool, enqueues unfinished candidates and the new work,
/// and prints one JSON line per job result until every candidate settles.
async fn run_pipeline(config: &Config, store: StatusStore, work: Work) -> anyhow::Result<()> {
    let api_key = resolve_secret_optional(
        config.evaluation.api_key.as_deref(),
        config.evaluation.api_key_file.as_deref(),
        config.evaluation.api_key_env_var.as_deref(),
    )?;
    let evaluator = LlmEvaluator::new(&config.evaluation, api_key, load_job_description(config))?;

    let pipeline_config = Arc::new(PipelineConfig::from_config(config));
    let storage = CandidateStorage::new(&pipeline_config.storage_root);
    let pipeline = Arc::new(Pipeline::from_config(
        pipeline_config,
        store.clone(),
        Arc::new(evaluator),
    ));

    let mut pool = WorkerPool::new(pipeline, config.worker_count, Arc::new(NoopProgress));
    let service = CandidateService::new(store, storage, pool.queue());

    let mut pending: HashSet<CandidateId> = service.recover().await?.into_iter().collect();
    let mut rejected = 0usize;

    match work {
        Work::Upload(files) => {
            for path in files {
                let uploaded = match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        let name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        service.upload(&name, &bytes).await.map_err(anyhow::Error::from)
                    }
                    Err(e) => Err(anyhow::Error::from(e)),
                };
                match uploaded {
                    Ok(view) => {
                        pending.insert(view.id);
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Upload rejected");
                        rejected += 1;
                    }
                }
            }
        }
        Work::Reevaluate(id) => {
            let view = service.reevaluate(id).await?;
            pending.insert(view.id);
        }
    }

    info!(candidates = pending.len(), "Processing");

    let mut failed = 0usize;
    while !pending.is_empty() {
        tokio::select! {
            result = pool.recv_result() => {
                let Some(result) = result else { break };
                println!("{}", serde_json::to_string(&result)?);
                if result.outcome.is_final()
                    && pending.remove(&result.candidate_id)
                    && matches!(result.outcome, JobOutcome::Failed { .. } | JobOutcome::Missing)
                {
                    failed += 1;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!(
                    unfinished = pending.len(),
                    "Interrupted; unfinished candidates resume on the next run"
                );
                break;
            }
        }
    }

    pool.shutdown();
    pool.wait().await;

    if failed + rejected > 0 {
        bail!("{} candidate(s) failed, {} upload(s) rejected", failed, rejected);
    }
    Ok(())
}
