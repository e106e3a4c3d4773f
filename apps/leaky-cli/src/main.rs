use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use leaky_core::config::{load_config, write_schema_file, Config};
use leaky_core::{BucketError, BucketOptions, LeakyBucket, Payload};
use leaky_kernel::Kernel;
use serde_json::json;

const DEFAULT_STATE_DIR: &str = "leaky-state";
const EXIT_OVERFLOW: u8 = 3;

#[derive(Parser)]
#[command(name = "leaky", version, about = "Shared, rate-limited queue client")]
struct Cli {
    #[command(flatten)]
    bucket: BucketArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct BucketArgs {
    /// TOML config file
    #[arg(long, global = true, env = "LEAKY_CONFIG")]
    config: Option<PathBuf>,
    /// Directory holding the shared bucket database
    #[arg(long, global = true, env = "LEAKY_STATE_DIR")]
    state_dir: Option<PathBuf>,
    /// Queue name (falls back to LEAKY_QUEUE, then the config file)
    #[arg(long, short, global = true)]
    queue: Option<String>,
    /// Minimum milliseconds between successful dequeues
    #[arg(long, global = true)]
    interval_ms: Option<u64>,
    /// Maximum outstanding items
    #[arg(long, global = true)]
    limit: Option<u64>,
    /// Reject batches that would not fit entirely under the limit
    /// (`--strict-capacity=false` turns it off again)
    #[arg(
        long,
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    strict_capacity: Option<bool>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the bucket record if it does not exist yet
    Prime,
    /// Append payloads to the tail
    Push(EnqueueArgs),
    /// Prepend payloads to the head, keeping their order
    Unshift(EnqueueArgs),
    /// Remove one payload from the tail
    Pop,
    /// Remove one payload from the head
    Shift,
    /// Print the bucket record (JSON)
    Stats(StatsArgs),
    /// Print the config file JSON schema
    Schema(SchemaArgs),
}

#[derive(Args)]
struct EnqueueArgs {
    /// Payloads as JSON values, e.g. '"text"' 42 '{"k":1}'
    #[arg(required = true)]
    payloads: Vec<String>,
    /// Treat every payload as a plain string instead of JSON
    #[arg(long)]
    raw: bool,
}

#[derive(Args)]
struct StatsArgs {
    /// Summarize every bucket in the store instead of one queue
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct SchemaArgs {
    /// Write the schema to this file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    leaky_otel::init_with_default("warn");
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            let overflow = err
                .downcast_ref::<BucketError>()
                .is_some_and(BucketError::is_overflow);
            if overflow {
                ExitCode::from(EXIT_OVERFLOW)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Schema(args) = &cli.command {
        return print_schema(args);
    }
    let cfg = match &cli.bucket.config {
        Some(path) => load_config(&path.to_string_lossy())
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    let options = resolve_options(&cfg, &cli.bucket)?;
    let kernel = open_kernel(&cfg, &cli.bucket)?;
    let db = kernel.db_path().to_path_buf();

    if let Commands::Stats(StatsArgs { all: true }) = &cli.command {
        let rows = kernel.list_buckets_async().await?;
        println!("{}", serde_json::Value::Array(rows));
        return Ok(());
    }

    let bucket = LeakyBucket::new(Arc::new(kernel), options)?;
    let opts = bucket.options();
    tracing::debug!(
        db = %db.display(),
        queue = %opts.queue,
        interval_ms = opts.interval_ms,
        limit = opts.limit,
        strict_capacity = opts.strict_capacity,
        "using bucket"
    );
    match cli.command {
        Commands::Prime => {
            bucket.prime().await?;
            println!("{}", json!({"queue": bucket.queue(), "primed": true}));
        }
        Commands::Push(args) => {
            let count = bucket.push(parse_payloads(&args)?).await?;
            println!("{}", json!({ "count": count }));
        }
        Commands::Unshift(args) => {
            let count = bucket.unshift(parse_payloads(&args)?).await?;
            println!("{}", json!({ "count": count }));
        }
        Commands::Pop => print_released(bucket.pop().await?),
        Commands::Shift => print_released(bucket.shift().await?),
        Commands::Stats(_) => match bucket.snapshot().await? {
            Some(record) => println!("{}", serde_json::to_string(&record)?),
            None => println!("{}", json!({"queue": bucket.queue(), "status": "missing"})),
        },
        Commands::Schema(args) => print_schema(&args)?,
    }
    Ok(())
}

fn resolve_options(cfg: &Config, args: &BucketArgs) -> Result<BucketOptions> {
    let mut options = cfg.resolve(args.queue.as_deref())?;
    if let Some(ms) = args.interval_ms {
        options.interval_ms = ms;
    }
    if let Some(limit) = args.limit {
        options.limit = limit;
    }
    if let Some(strict) = args.strict_capacity {
        options.strict_capacity = strict;
    }
    Ok(options)
}

fn open_kernel(cfg: &Config, args: &BucketArgs) -> Result<Kernel> {
    let dir = args
        .state_dir
        .clone()
        .or_else(|| cfg.store.state_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    let kernel = match cfg.store.busy_timeout_ms {
        Some(ms) if std::env::var("LEAKY_SQLITE_BUSY_MS").is_err() => {
            Kernel::open_with_busy_timeout(&dir, ms)
        }
        _ => Kernel::open(&dir),
    };
    kernel.with_context(|| format!("opening bucket store in {}", dir.display()))
}

fn parse_payloads(args: &EnqueueArgs) -> Result<Vec<Payload>> {
    args.payloads
        .iter()
        .map(|raw| {
            if args.raw {
                Ok(Payload::String(raw.clone()))
            } else {
                serde_json::from_str(raw).with_context(|| {
                    format!("invalid JSON payload '{raw}' (use --raw for plain strings)")
                })
            }
        })
        .collect()
}

fn print_released(item: Option<Payload>) {
    match item {
        Some(item) => println!("{}", json!({"status": "ok", "item": item})),
        None => println!("{}", json!({"status": "empty"})),
    }
}

fn print_schema(args: &SchemaArgs) -> Result<()> {
    match &args.out {
        Some(path) => {
            write_schema_file(&path.to_string_lossy())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => {
            let schema = leaky_core::config::config_schema_json();
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enqueue(payloads: &[&str], raw: bool) -> EnqueueArgs {
        EnqueueArgs {
            payloads: payloads.iter().map(|s| s.to_string()).collect(),
            raw,
        }
    }

    #[test]
    fn parses_json_payloads() {
        let args = enqueue(&["\"a\"", "1", "{\"k\":[true,null]}"], false);
        let items = parse_payloads(&args).unwrap();
        assert_eq!(
            items,
            vec![json!("a"), json!(1), json!({"k": [true, null]})]
        );
    }

    #[test]
    fn raw_payloads_stay_strings() {
        let items = parse_payloads(&enqueue(&["not json", "1"], true)).unwrap();
        assert_eq!(items, vec![json!("not json"), json!("1")]);
    }

    #[test]
    fn invalid_json_mentions_raw_flag() {
        let err = parse_payloads(&enqueue(&["not json"], false)).unwrap_err();
        assert!(format!("{err:#}").contains("--raw"));
    }

    #[test]
    fn strict_capacity_flag_can_be_switched_off() {
        let parse = |args: &[&str]| Cli::try_parse_from(args).unwrap().bucket.strict_capacity;
        assert_eq!(parse(&["leaky", "pop"]), None);
        assert_eq!(parse(&["leaky", "--strict-capacity", "pop"]), Some(true));
        assert_eq!(parse(&["leaky", "pop", "--strict-capacity=false"]), Some(false));

        let mut cfg = Config::default();
        cfg.buckets.insert(
            "q".into(),
            leaky_core::config::BucketOverrides {
                strict_capacity: Some(true),
                ..Default::default()
            },
        );
        let args = Cli::try_parse_from(["leaky", "-q", "q", "--strict-capacity=false", "pop"])
            .unwrap()
            .bucket;
        assert!(!resolve_options(&cfg, &args).unwrap().strict_capacity);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
