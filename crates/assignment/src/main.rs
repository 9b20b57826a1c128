use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

/// Agent running the reward-assignment core over a records object store.
///
/// `dispatch` runs one control-loop tick; the host scheduler is expected
/// to invoke it periodically, never concurrently with itself. `assign`
/// runs a single worker, for hosts which deliver worker payloads through
/// their own invocation mechanism.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Root of the records object store.
    #[clap(long = "records-root", env = "RECORDS_BUCKET")]
    records_root: std::path::PathBuf,
    /// Path of the customization configuration document.
    #[clap(long = "config", env = "REWARD_ASSIGNMENT_CONFIG")]
    config: std::path::PathBuf,
    /// Upper bound on worker dispatches per dispatcher invocation.
    #[clap(long, env = "REWARD_ASSIGNMENT_WORKER_COUNT", default_value = "2")]
    worker_count: usize,
    /// Per-shard cool-down between reward-assignment passes, in seconds.
    #[clap(
        long,
        env = "REWARD_ASSIGNMENT_REPROCESS_SHARD_WAIT_TIME_IN_SECONDS",
        default_value = "1800"
    )]
    reprocess_wait_seconds: u64,
    /// Stale-payload size beyond which a shard is resharded, in MB.
    #[clap(long, env = "REWARD_ASSIGNMENT_WORKER_MAX_PAYLOAD_IN_MB", default_value = "100")]
    max_payload_mb: u64,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run one dispatcher tick over every configured project.
    Dispatch {
        /// Process every incoming shard, ignoring cool-downs and limits.
        #[clap(long)]
        force_processing: bool,
        /// Ask the reshard subsystem to continue unfinished splits.
        #[clap(long)]
        force_continue_reshard: bool,
    },
    /// Run one reward-assignment worker for a single shard.
    Assign {
        #[clap(long)]
        project: Option<String>,
        #[clap(long)]
        shard: String,
        /// Raw ingestion event to resolve the project from, when
        /// --project is not given.
        #[clap(long)]
        event: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // Use reasonable defaults for printing structured logs to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started!");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async_main(args));
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let config_doc = tokio::fs::read(&args.config)
        .await
        .with_context(|| format!("failed to read config {:?}", args.config))?;
    let config =
        models::Config::from_slice(&config_doc).context("failed to parse customization config")?;

    let settings = assignment::Settings::new(
        args.worker_count,
        args.reprocess_wait_seconds,
        args.max_payload_mb,
    );
    let customize = Arc::new(assignment::IdentityCustomize);

    let pipeline = Arc::new(assignment::Pipeline::new(
        Arc::new(store::FsStore::new(&args.records_root)),
        customize.clone(),
        config,
        Arc::new(assignment::LoggingResharder),
        Arc::new(assignment::IdentityFilter),
        settings,
    ));

    match args.command {
        Command::Dispatch {
            force_processing,
            force_continue_reshard,
        } => {
            let event = assignment::DispatchEvent {
                force_processing,
                force_continue_reshard,
            };
            let invoker = assignment::SpawnInvoker::new(pipeline.clone());
            pipeline
                .dispatch_reward_assignment_workers(&event, &invoker)
                .await?;
            invoker.join().await;
        }
        Command::Assign {
            project,
            shard,
            event,
        } => {
            let project = match (project, event) {
                (Some(project), _) => project,
                (None, Some(event)) => {
                    let event: serde_json::Value =
                        serde_json::from_str(&event).context("failed to parse --event")?;
                    assignment::Customize::project_name(customize.as_ref(), &event)?
                        .context("event does not name a project")?
                }
                (None, None) => anyhow::bail!("either --project or --event is required"),
            };
            let payload = assignment::WorkerPayload {
                project_name: project,
                shard_id: shard,
                last_processed_timestamp_updated: false,
            };
            pipeline.assign_rewards(&payload).await?;
        }
    }
    Ok(())
}
