//! docqueue-admin: operator commands for the document job queue.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use docqueue_core::{JobRepository, NewJob, NotificationChannel};
use docqueue_db::{ChannelConfig, Database};
use docqueue_jobs::{AdminService, JobProducer, LeaseManager, RecoverySweeper, WorkerConfig};
use docqueue_worker::{connect_database, telemetry::LogSettings};

#[derive(Parser)]
#[command(name = "docqueue-admin")]
#[command(author, version, about = "Operator commands for the docqueue job queue")]
#[command(propagate_version = true)]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a document for processing
    Enqueue {
        /// Document path relative to the storage root
        path: String,

        /// Display filename (default: last path component)
        #[arg(short, long)]
        filename: Option<String>,

        /// Attempt budget for the job
        #[arg(short, long, default_value_t = docqueue_core::defaults::JOB_MAX_ATTEMPTS)]
        max_attempts: i32,
    },

    /// Show progress for a job
    Status {
        /// Job ID
        job_id: Uuid,
    },

    /// Force a queued or processing job back to the queue
    Requeue {
        /// Job ID
        job_id: Uuid,

        /// Give the job a fresh attempt budget
        #[arg(long)]
        reset_attempts: bool,
    },

    /// Show counts per status and stuck jobs
    Summary,

    /// Run one recovery sweep now
    Sweep,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _file_guard = LogSettings::from_env().init("docqueue-admin.log");

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let db = connect_database().await?;
    let jobs: Arc<dyn JobRepository> = db.jobs.clone();
    let producer = producer(&db, jobs.clone());
    let admin = AdminService::new(jobs.clone(), producer.clone());

    match cli.command {
        Commands::Enqueue {
            path,
            filename,
            max_attempts,
        } => {
            let filename = filename.unwrap_or_else(|| {
                path.rsplit('/')
                    .next()
                    .filter(|name| !name.is_empty())
                    .unwrap_or(&path)
                    .to_string()
            });
            let job = producer
                .enqueue(NewJob::new(path, filename).with_max_attempts(max_attempts))
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                println!("Queued job {} ({})", job.id, job.filename);
            }
        }
        Commands::Status { job_id } => {
            let progress = admin.progress(job_id).await?;
            if cli.json {
                let mut value = serde_json::to_value(&progress)?;
                value["status_detail"] = progress.status_detail().into();
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("Job:      {}", progress.job_id);
                println!("Status:   {} ({})", progress.status, progress.status_detail());
                println!("Progress: {}%", progress.progress);
                println!("Attempts: {}/{}", progress.attempts, progress.max_attempts);
                if let Some(chunks) = progress.chunk_count {
                    println!("Chunks:   {}", chunks);
                }
                if let Some(ref error) = progress.last_error {
                    println!("Error:    {}", error);
                }
            }
        }
        Commands::Requeue {
            job_id,
            reset_attempts,
        } => {
            let job = admin.force_requeue(job_id, reset_attempts).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                println!(
                    "Requeued job {} (attempts {}/{})",
                    job.id, job.attempts, job.max_attempts
                );
            }
        }
        Commands::Summary => {
            let summary = admin.status_summary(Utc::now()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let stats = &summary.stats;
                println!("Queued:     {}", stats.queued);
                println!("Processing: {}", stats.processing);
                println!("Completed:  {}", stats.completed);
                println!("Failed:     {}", stats.failed);
                println!("Total:      {}", stats.total);
                println!("Overall:    {}%", summary.overall_progress);
                if summary.stuck.is_empty() {
                    println!("\nNo stuck jobs.");
                } else {
                    println!("\nStuck jobs ({}):", summary.stuck.len());
                    for job in &summary.stuck {
                        let started = job
                            .started_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "  {}  {}  attempt {}  {}%  started {}",
                            job.job_id, job.filename, job.attempts, job.progress, started
                        );
                    }
                }
            }
        }
        Commands::Sweep => {
            let lease_duration = WorkerConfig::from_env().lease_duration();
            let sweeper = RecoverySweeper::new(jobs.clone(), LeaseManager::new(jobs, lease_duration))
                .with_producer(producer);
            let report = sweeper.sweep_once().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Requeued {}, failed {}, skipped {}, republished {}",
                    report.requeued, report.failed, report.skipped, report.republished
                );
            }
        }
    }

    Ok(())
}

/// Producer that announces on the database channel.
fn producer(db: &Database, jobs: Arc<dyn JobRepository>) -> JobProducer {
    let channel: Arc<dyn NotificationChannel> =
        Arc::new(db.notification_channel(ChannelConfig::from_env()));
    JobProducer::new(jobs).with_channel(channel)
}
