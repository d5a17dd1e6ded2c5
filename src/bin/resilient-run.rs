//! Command-line runner for breaker-protected operations.
//!
//! Exits with the operation's exit signal. A terminal failure leaves a
//! failure marker behind and emits an alert; later runs refuse to start
//! until the marker is removed or `--force` is given.

use clap::{Parser, Subcommand};
use reqwest::Method;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use resilient_ops::alerts::{AlertEmitter, FailureMarker, FailureReport};
use resilient_ops::config::loader::load_or_default;
use resilient_ops::observability::logging::init_logging;
use resilient_ops::operations::{ApiRequest, DbConnection, FileOperation, FileOperationKind};
use resilient_ops::resilience::BackoffRetrier;
use resilient_ops::{ExitSignal, ResilienceConfig, ResilienceError, ResilienceResult, ResilientOps};

/// Exit code after Ctrl-C (128 + SIGINT).
const INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "resilient-run")]
#[command(about = "Run an operation behind a circuit breaker", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Failure marker path (defaults to <alerts.marker_dir>/<script-name>.failed)
    #[arg(long, global = true)]
    marker: Option<PathBuf>,

    /// Run even if a failure marker exists, clearing it first
    #[arg(long, global = true)]
    force: bool,

    /// Name used in failure reports and the default marker path
    #[arg(long, global = true)]
    script_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL to a file
    Download {
        url: String,
        output: PathBuf,
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Call an HTTP API and print the response body
    Api {
        url: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
        /// Extra header as "Name: value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Execute a SQL script with psql (password from PGPASSWORD)
    Sql {
        script: PathBuf,
        #[arg(short, long)]
        database: String,
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short = 'U', long)]
        user: Option<String>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Copy, move or delete a path once through the breaker
    File {
        verb: String,
        source: PathBuf,
        destination: Option<PathBuf>,
    },
    /// Copy, move or delete a path with exponential-backoff retries
    RetryFile {
        verb: String,
        source: PathBuf,
        destination: Option<PathBuf>,
        /// Attempts including the first (defaults to retry.max_attempts)
        #[arg(long)]
        attempts: Option<u32>,
        /// Path deleted between failed attempts
        #[arg(long)]
        cleanup: Option<PathBuf>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Download { .. } => "download",
            Commands::Api { .. } => "api",
            Commands::Sql { .. } => "sql",
            Commands::File { .. } => "file",
            Commands::RetryFile { .. } => "retry-file",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&Default::default());
            tracing::error!(error = %e, "Failed to load configuration");
            process::exit(ExitSignal::USAGE.code());
        }
    };
    init_logging(&config.observability);

    let script_name = cli
        .script_name
        .clone()
        .unwrap_or_else(|| format!("resilient-run-{}", cli.command.name()));
    let marker = match &cli.marker {
        Some(path) => FailureMarker::new(path),
        None => FailureMarker::in_dir(&config.alerts.marker_dir, &script_name),
    };

    if let Some(code) = check_marker(&marker, cli.force).await {
        process::exit(code);
    }

    tracing::info!(script = %script_name, command = cli.command.name(), "resilient-run starting");

    let ops = ResilientOps::new(config.clone());
    let outcome = tokio::select! {
        result = run(&ops, &config, cli.command) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    for (name, snapshot) in ops.registry().snapshot_all() {
        tracing::info!(
            operation = %name,
            state = %snapshot.state,
            failure_count = snapshot.failure_count,
            "Circuit status at exit"
        );
    }

    let code = match outcome {
        None => {
            tracing::warn!("Interrupted, in-flight work cancelled");
            INTERRUPTED
        }
        Some(Ok(output)) => {
            if let Some(output) = output {
                println!("{}", output);
            }
            ExitSignal::SUCCESS.code()
        }
        Some(Err(e)) => {
            tracing::error!(error = %e, "Operation failed");
            if !matches!(e, ResilienceError::InvalidInput(_)) {
                report_failure(&config, &marker, &script_name, &e).await;
            }
            e.exit_signal().code()
        }
    };
    process::exit(code);
}

/// Exit code to stop with when a marker blocks this run.
async fn check_marker(marker: &FailureMarker, force: bool) -> Option<i32> {
    match marker.check().await {
        Ok(None) => None,
        Ok(Some(report)) if !force => {
            tracing::error!(
                marker = %marker.path().display(),
                incident_id = %report.incident_id,
                previous_error = %report.error_message,
                required_action = %report.required_action,
                "Previous run failed; refusing to start (use --force to override)"
            );
            Some(ExitSignal::CIRCUIT_OPEN.code())
        }
        Err(e) if !force => {
            tracing::error!(error = %e, "Unreadable failure marker; refusing to start");
            Some(ExitSignal::CIRCUIT_OPEN.code())
        }
        Ok(Some(_)) | Err(_) => match marker.clear().await {
            Ok(_) => {
                tracing::warn!(marker = %marker.path().display(), "Forced run, marker cleared");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not clear failure marker");
                Some(ExitSignal::IO_ERROR.code())
            }
        },
    }
}

async fn report_failure(config: &ResilienceConfig, marker: &FailureMarker, script_name: &str, error: &ResilienceError) {
    let report = FailureReport::from_error(script_name, error, marker.path());
    if let Err(e) = marker.write(&report).await {
        tracing::error!(error = %e, "Could not write failure marker");
    }
    let emitter = AlertEmitter::from_config(reqwest::Client::new(), &config.alerts);
    emitter.emit(&report).await;
}

async fn run(ops: &ResilientOps, config: &ResilienceConfig, command: Commands) -> ResilienceResult<Option<String>> {
    match command {
        Commands::Download { url, output, timeout } => {
            let bytes = ops.download(&url, &output, timeout.map(Duration::from_secs)).await?;
            Ok(Some(format!("{} bytes written to {}", bytes, output.display())))
        }
        Commands::Api {
            url,
            method,
            data,
            headers,
            timeout,
        } => {
            let request = build_api_request(&url, &method, data.as_deref(), &headers)?;
            let response = ops.api_call(request, timeout.map(Duration::from_secs)).await?;
            Ok(Some(response.body))
        }
        Commands::Sql {
            script,
            database,
            host,
            port,
            user,
            timeout,
        } => {
            let connection = DbConnection {
                database,
                host,
                port,
                user,
                password: std::env::var("PGPASSWORD").ok(),
            };
            ops.execute_sql(&script, &connection, timeout.map(Duration::from_secs))
                .await?;
            Ok(None)
        }
        Commands::File {
            verb,
            source,
            destination,
        } => {
            ops.file_operation_verb(&verb, source, destination).await?;
            Ok(None)
        }
        Commands::RetryFile {
            verb,
            source,
            destination,
            attempts,
            cleanup,
        } => {
            let kind: FileOperationKind = verb.parse()?;
            let op = FileOperation::new(kind, source, destination)?;
            let retrier = BackoffRetrier::from_config(&config.retry);
            let attempts = attempts.unwrap_or(config.retry.max_attempts);
            match cleanup {
                Some(path) => {
                    let cleanup_op = FileOperation::delete(path)?;
                    retrier
                        .retry_file_operation_with_cleanup(&op, attempts, move || {
                            let cleanup_op = cleanup_op.clone();
                            async move { cleanup_op.run().await }
                        })
                        .await?;
                }
                None => retrier.retry_file_operation(&op, attempts).await?,
            }
            Ok(None)
        }
    }
}

fn build_api_request(url: &str, method: &str, data: Option<&str>, headers: &[String]) -> ResilienceResult<ApiRequest> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ResilienceError::InvalidInput(format!("invalid HTTP method: {}", method)))?;
    let mut request = ApiRequest::new(method, url);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| ResilienceError::InvalidInput(format!("header must be 'Name: value', got '{}'", header)))?;
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = data {
        let body: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| ResilienceError::InvalidInput(format!("request body is not valid JSON: {}", e)))?;
        request = request.json(&body)?;
    }
    Ok(request)
}
