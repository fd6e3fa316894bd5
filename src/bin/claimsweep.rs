//! claimsweep CLI: run workers and inspect the request ledger.

use claimsweep::config::Config;
use claimsweep::config::secrets::ExposeSecret;
use claimsweep::db::{Db, required_connections};
use claimsweep::engine::{Worker, WorkerConfig};
use claimsweep::executor::{HookConfig, HookExecutor, WorkExecutor};
use claimsweep::model::{Kind, NewRequest, RequestFilter, RequestId, Status};
use claimsweep::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "claimsweep", about = "Coordinator-free work claiming over Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run workers until interrupted
    Serve {
        /// TOML file with the [executor] hook command
        #[arg(long, default_value = "executor.toml")]
        executor: PathBuf,
        /// Independent workers to run in this process
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Enqueue a request
    Enqueue {
        /// Target entity the request concerns
        target_id: String,
        /// Enqueue a dependent request instead of a primary
        #[arg(long)]
        dependent: bool,
        /// JSON payload handed to the executor
        #[arg(long)]
        payload: Option<String>,
    },
    /// List requests
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Filter by kind
        #[arg(long)]
        kind: Option<String>,
        /// Filter by target
        #[arg(long)]
        target: Option<String>,
        /// Maximum requests to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a request
    Show {
        /// Request ID
        id: i64,
    },
    /// Count requests per status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { executor, workers } => cmd_serve(config, executor, workers).await,
        command => {
            let db = connect(&config).await?;
            match command {
                Command::Enqueue {
                    target_id,
                    dependent,
                    payload,
                } => cmd_enqueue(&db, target_id, dependent, payload).await,
                Command::List {
                    status,
                    kind,
                    target,
                    limit,
                } => cmd_list(&db, status, kind, target, limit).await,
                Command::Show { id } => cmd_show(&db, RequestId(id)).await,
                Command::Status => cmd_status(&db).await,
                Command::Serve { .. } => unreachable!("handled above"),
            }
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Db> {
    let db = Db::connect_with(config.database_url.expose_secret(), config.db_max_connections)
        .await?
        .with_wake_channel(&config.wake_channel);
    db.migrate().await?;
    Ok(db)
}

async fn cmd_serve(config: Config, executor: PathBuf, workers: usize) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "claimsweep".to_string(),
        log_level: config.log_level.clone(),
    })?;

    if workers == 0 {
        anyhow::bail!("--workers must be at least 1");
    }
    let needed = required_connections(u32::try_from(workers).unwrap_or(u32::MAX));
    if config.db_max_connections < needed {
        anyhow::bail!(
            "--workers {workers} needs DB_MAX_CONNECTIONS >= {needed} (a listener and a claim per worker, plus one), got {}",
            config.db_max_connections
        );
    }

    let db = Arc::new(connect(&config).await?);
    let executor: Arc<dyn WorkExecutor> = Arc::new(HookExecutor::new(HookConfig::load(&executor)?));

    let pool: Vec<Worker> = (0..workers)
        .map(|n| {
            Worker::new(
                Arc::clone(&db),
                Arc::clone(&executor),
                WorkerConfig {
                    name: format!("worker-{n}"),
                    poll_interval: config.poll_interval,
                    primary_error_policy: config.primary_error_policy,
                },
            )
        })
        .collect();

    let stop = pool.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        for worker in &stop {
            worker.shutdown();
        }
    });

    let mut handles = tokio::task::JoinSet::new();
    for worker in pool {
        handles.spawn(async move { worker.run().await });
    }
    while let Some(joined) = handles.join_next().await {
        joined??;
    }
    Ok(())
}

async fn cmd_enqueue(
    db: &Db,
    target_id: String,
    dependent: bool,
    payload: Option<String>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = match payload {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::json!({}),
    };
    let kind = if dependent { Kind::Dependent } else { Kind::Primary };

    let id = db
        .enqueue(NewRequest::new(kind, &target_id).payload(payload))
        .await?;
    println!("Enqueued: {id} ({kind} for {target_id})");
    Ok(())
}

async fn cmd_list(
    db: &Db,
    status: Option<String>,
    kind: Option<String>,
    target: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let filter = RequestFilter {
        status: status.map(|s| s.parse::<Status>()).transpose()?,
        kind: kind.map(|k| k.parse::<Kind>()).transpose()?,
        target_id: target,
    };

    let requests = db.list_requests(&filter, limit).await?;
    if requests.is_empty() {
        println!("No requests found.");
        return Ok(());
    }

    println!(
        "{:<10}  {:<10}  {:<12}  {:<30}  CREATED",
        "ID", "KIND", "STATUS", "TARGET"
    );
    println!("{}", "-".repeat(84));
    for request in &requests {
        let target: String = request.target_id.chars().take(30).collect();
        println!(
            "{:<10}  {:<10}  {:<12}  {:<30}  {}",
            request.id,
            request.kind,
            request.status,
            target,
            request.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} request(s)", requests.len());
    Ok(())
}

async fn cmd_show(db: &Db, id: RequestId) -> anyhow::Result<()> {
    let request = db.get_request(id).await?;

    println!("ID:         {}", request.id);
    println!("Kind:       {}", request.kind);
    println!("Status:     {}", request.status);
    println!("Target:     {}", request.target_id);
    println!(
        "Owner:      {}",
        request
            .claim_owner
            .map(|o| o.0.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Payload:    {}",
        serde_json::to_string_pretty(&request.payload)?
    );
    println!("Created:    {}", request.created_at);
    println!("Updated:    {}", request.updated_at);
    if let Some(settled) = request.settled_at {
        println!("Settled:    {settled}");
    }
    if let Some(ref error) = request.outcome_error {
        println!("Error:      {error}");
    }
    Ok(())
}

async fn cmd_status(db: &Db) -> anyhow::Result<()> {
    let counts = db.count_by_status().await?;
    if counts.is_empty() {
        println!("Ledger is empty.");
        return Ok(());
    }
    for (status, n) in counts {
        println!("{:<12}  {n}", status.to_string());
    }
    Ok(())
}
