use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use reqwest::StatusCode;
use restgate::api::operation::OperationRetry;
use restgate::config::ClientConfiguration;
use restgate::resource::{self, Outcome};
use restgate::ApiClient;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Drive a REST API through the resilient provider transport
#[derive(Parser, Debug)]
#[command(name = "restgate", version, about, long_about = None)]
struct Args {
    /// API endpoint (overrides config file and RESTGATE_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Upstream proxy URL
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// PEM bundle with extra trust anchors
    #[arg(long, global = true)]
    cert: Option<PathBuf>,

    /// Per-attempt timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Transport-level attempt ceiling
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Trace every request and response
    #[arg(long, global = true)]
    debug: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read one resource
    Get {
        path: String,
        #[command(flatten)]
        retry: RetryArgs,
    },
    /// List a collection, following pagination links
    List {
        path: String,
        /// Dot path to the item array inside each page
        #[arg(long, default_value = "")]
        items: String,
        #[command(flatten)]
        retry: RetryArgs,
    },
    /// Create a resource from a JSON body
    Create {
        path: String,
        /// JSON request body
        #[arg(long)]
        data: String,
        #[command(flatten)]
        retry: RetryArgs,
    },
    /// Update a resource from a JSON body
    Update {
        path: String,
        /// JSON request body
        #[arg(long)]
        data: String,
        #[command(flatten)]
        retry: RetryArgs,
    },
    /// Delete a resource
    Delete {
        path: String,
        #[command(flatten)]
        retry: RetryArgs,
    },
}

/// Operation-level retry settings for this call
#[derive(ClapArgs, Debug)]
struct RetryArgs {
    /// Statuses to retry at the operation level (e.g. 400,500)
    #[arg(long, value_delimiter = ',')]
    retry_on: Vec<u16>,

    /// Operation-level attempt count (defaults to the configured max retries)
    #[arg(long)]
    attempts: Option<u32>,

    /// Wait between operation-level attempts in milliseconds (defaults to the configured retry wait)
    #[arg(long)]
    wait_ms: Option<u64>,
}

impl RetryArgs {
    fn policy(&self, client: &ApiClient) -> Result<OperationRetry> {
        let statuses = self
            .retry_on
            .iter()
            .map(|code| {
                StatusCode::from_u16(*code).with_context(|| format!("Invalid status code {}", code))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut policy = client.retry_policy(&statuses);
        if let Some(attempts) = self.attempts {
            policy.max_attempts = attempts;
        }
        if let Some(wait_ms) = self.wait_ms {
            policy.wait = Duration::from_millis(wait_ms);
        }
        Ok(policy)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Logging disabled, cannot open {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("restgate started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("restgate").join("restgate.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".restgate").join("restgate.log");
    }
    PathBuf::from("restgate.log")
}

/// Config file < environment < command line
fn build_config(args: &Args) -> ClientConfiguration {
    let mut config = ClientConfiguration::load();

    if let Some(url) = &args.base_url {
        config.base_url = url.clone();
    }
    if let Some(proxy) = &args.proxy {
        config.proxy = Some(proxy.clone());
    }
    if let Some(cert) = &args.cert {
        config.cert_path = Some(cert.clone());
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(retries) = args.max_retries {
        config.max_retries = retries;
    }
    if args.debug {
        config.debug = true;
    }

    config
}

fn parse_body(data: &str) -> Result<Value> {
    serde_json::from_str(data).context("--data is not valid JSON")
}

async fn run(client: &ApiClient, command: &Command, cancel: &CancellationToken) -> Result<Outcome<Value>> {
    let outcome = match command {
        Command::Get { path, retry } => {
            resource::read::<Value>(client, path, &retry.policy(client)?, cancel)
                .await
                .map(|found| found.unwrap_or(Value::Null))
        }
        Command::List { path, items, retry } => {
            resource::list_all::<Value>(client, path, items, &retry.policy(client)?, cancel)
                .await
                .map(Value::Array)
        }
        Command::Create { path, data, retry } => {
            let body = parse_body(data)?;
            resource::create::<Value, _>(client, path, &body, &retry.policy(client)?, cancel).await
        }
        Command::Update { path, data, retry } => {
            let body = parse_body(data)?;
            resource::update::<Value, _>(client, path, &body, &retry.policy(client)?, cancel).await
        }
        Command::Delete { path, retry } => resource::delete(client, path, &retry.policy(client)?, cancel)
            .await
            .map(|_| Value::Null),
    };
    Ok(outcome)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let config = build_config(&args);
    let client = ApiClient::new(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight operation");
            on_interrupt.cancel();
        }
    });

    match run(&client, &args.command, &cancel).await? {
        Ok(Value::Null) => Ok(ExitCode::SUCCESS),
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(diagnostics) => {
            for diagnostic in diagnostics.iter() {
                eprintln!("Error: {}", diagnostic.summary);
                if !diagnostic.detail.is_empty() {
                    eprintln!("  {}", diagnostic.detail);
                }
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
