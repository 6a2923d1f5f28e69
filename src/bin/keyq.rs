//! keyq CLI — replay a watch stream through the reconcile pipeline.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use keyq_controller::config::ControllerConfig;
use keyq_controller::controller::{Controller, PodLogger};
use keyq_controller::event::WatchEvent;
use keyq_controller::informer::{Informer, QueueHandler, Store};
use keyq_controller::model::{DynamicObject, ObjectKey};
use keyq_controller::queue::WorkQueue;
use keyq_controller::telemetry::{TelemetryConfig, init_telemetry};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "keyq", about = "Watch, enqueue, reconcile, retry")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed newline-delimited watch events to an informer and reconcile pods
    Run {
        /// Event file, or `-` for stdin
        #[arg(long, default_value = "-")]
        events: String,
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of worker loops
        #[arg(long)]
        workers: Option<usize>,
        /// Failures tolerated before a key is dropped
        #[arg(long)]
        max_retries: Option<u32>,
        /// Only track objects in this namespace
        #[arg(long)]
        namespace: Option<String>,
        /// Fail pods whose name contains this substring
        #[arg(long)]
        fail_on: Option<String>,
        /// Delay before a simulated failure is reported
        #[arg(long, default_value_t = 0)]
        failure_delay_ms: u64,
        /// Seconds to keep running after the event stream ends
        #[arg(long)]
        linger: Option<u64>,
    },
    /// Print the key of a JSON object
    Key {
        /// Object JSON, e.g. '{"metadata":{"name":"a","namespace":"default"}}'
        object: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            events,
            config,
            workers,
            max_retries,
            namespace,
            fail_on,
            failure_delay_ms,
            linger,
        } => {
            let mut config = match config {
                Some(path) => ControllerConfig::from_toml_file(&path)?,
                None => ControllerConfig::default(),
            }
            .merge_env()?;
            if let Some(n) = workers {
                config.workers = n;
            }
            if let Some(n) = max_retries {
                config.max_retries = n;
            }
            if namespace.is_some() {
                config.namespace = namespace;
            }
            config.validate()?;

            let mut logger = PodLogger::new().failure_delay(Duration::from_millis(failure_delay_ms));
            if let Some(pattern) = fail_on {
                logger = logger.fail_on(pattern);
            }

            cmd_run(config, events, logger, linger.map(Duration::from_secs)).await
        }
        Command::Key { object } => {
            let obj: DynamicObject = serde_json::from_str(&object)?;
            println!("{}", ObjectKey::of(&obj)?);
            Ok(())
        }
    }
}

async fn cmd_run(
    config: ControllerConfig,
    events: String,
    logger: PodLogger,
    linger: Option<Duration>,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "keyq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let queue = WorkQueue::new("pods", config.rate_limiter());

    let mut informer = Informer::new(Store::new()).with_handler(QueueHandler::new(queue.clone()));
    if let Some(ref ns) = config.namespace {
        informer = informer.namespace(ns.clone());
    }
    if let Some(period) = config.resync_period() {
        informer = informer.resync_every(period);
    }
    let reader = informer.reader();
    let informer_handle = informer.handle();

    let (tx, rx) = mpsc::channel(1024);
    let informer_task = tokio::spawn(informer.run(rx));

    let feed = tokio::spawn(async move {
        let result = if events == "-" {
            feed_events(tokio::io::stdin(), tx).await
        } else {
            match tokio::fs::File::open(&events).await {
                Ok(file) => feed_events(file, tx).await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = result {
            warn!("event feed stopped: {e}");
        }
    });

    let controller = Controller::new(queue, reader, logger, &config);
    let handle = controller.handle();
    let controller_task = tokio::spawn(async move { controller.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
        _ = async {
            let _ = feed.await;
            match linger {
                Some(linger) => tokio::time::sleep(linger).await,
                None => std::future::pending::<()>().await,
            }
        } => {
            info!("linger elapsed");
        }
    }

    handle.stop();
    informer_handle.shutdown();
    controller_task.await??;
    informer_task.await??;
    Ok(())
}

/// Parse watch events line by line and hand them to the informer.
/// Blank lines are skipped; malformed lines are logged and skipped.
async fn feed_events(
    input: impl AsyncRead + Unpin,
    tx: mpsc::Sender<WatchEvent>,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(input).lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match WatchEvent::from_json_line(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(line = line_no, "skipping malformed event: {e}"),
        }
    }
    info!(lines = line_no, "event stream ended");
    Ok(())
}
