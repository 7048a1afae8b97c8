//! ashare CLI: fetch A-share prices, factors, benchmarks and index members.
//!
//! Commands:
//! - `prices`: daily bars pivoted to one column per (symbol, field)
//! - `factors`: daily valuation indicators, same layout
//! - `benchmark`: index net value starting at 1.0
//! - `members`: union of index constituents over the window

use anyhow::{bail, Context, Result};
use ashare_core::data::{
    write_benchmark_csv, write_csv, write_parquet, DataKind, FieldSet, RateLimit, TushareClient,
    WideTable,
};
use ashare_core::{FetchStrategy, HandlerConfig, MarketDataHandler};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "ashare", about = "A-share market data handler", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// TOML config file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start date (YYYYMMDD).
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYYMMDD).
    #[arg(long)]
    end: Option<String>,

    /// Provider token. Falls back to the config file, then TUSHARE_TOKEN.
    #[arg(long)]
    token: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Sequential,
    Coalesced,
    Concurrent,
}

#[derive(Args)]
struct FetchArgs {
    /// Comma-separated symbols (e.g. 600000.SH,000001.SZ).
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Use the members of this index as the symbol list.
    #[arg(long, conflicts_with = "symbols")]
    index: Option<String>,

    /// Comma-separated field names.
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Pause after each call of a sequential fetch, in milliseconds.
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Call quota per minute. Replaces --pause-ms for per-symbol strategies.
    #[arg(long)]
    calls_per_minute: Option<NonZeroU32>,

    #[arg(long, value_enum, default_value = "sequential")]
    strategy: StrategyArg,

    /// Worker threads for the concurrent strategy.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Output file (.parquet or .csv). Omit to print a summary only.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch daily price bars.
    Prices {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Fetch daily valuation factors.
    Factors {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Compute an index's net value series.
    Benchmark {
        #[command(flatten)]
        common: CommonArgs,

        /// Index code (e.g. 000016.SH).
        #[arg(long)]
        index: Option<String>,

        /// Output CSV file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List every constituent of an index during the window.
    Members {
        #[command(flatten)]
        common: CommonArgs,

        /// Index code (e.g. 000016.SH).
        #[arg(long)]
        index: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prices { common, fetch } => run_fetch(DataKind::Price, &common, &fetch),
        Commands::Factors { common, fetch } => run_fetch(DataKind::Factor, &common, &fetch),
        Commands::Benchmark {
            common,
            index,
            output,
        } => run_benchmark(&common, index, output.as_deref()),
        Commands::Members { common, index } => run_members(&common, index),
    }
}

/// Load the config file (if any) and apply the date flags on top.
fn load_config(common: &CommonArgs) -> Result<HandlerConfig> {
    let mut cfg = match &common.config {
        Some(path) => HandlerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => match (&common.start, &common.end) {
            (Some(start), Some(end)) => HandlerConfig::new(start.clone(), end.clone()),
            _ => bail!("--start and --end are required without --config"),
        },
    };
    if let Some(start) = &common.start {
        cfg.start_date = start.clone();
    }
    if let Some(end) = &common.end {
        cfg.end_date = end.clone();
    }
    Ok(cfg)
}

fn build_handler(common: &CommonArgs) -> Result<(HandlerConfig, MarketDataHandler<TushareClient>)> {
    let cfg = load_config(common)?;
    // Window and frequency are checked before the token so a bad config never
    // needs credentials to be reported.
    cfg.date_range()?;
    cfg.frequency()?;

    let token = cfg.resolve_token(common.token.as_deref())?;
    let client = TushareClient::with_circuit_breaker(
        token,
        cfg.provider.client_settings(),
        Arc::new(cfg.provider.circuit_breaker()),
    )?;
    let handler = MarketDataHandler::from_config(client, &cfg)?;
    Ok((cfg, handler))
}

fn pick_index(flag: Option<String>, cfg: &HandlerConfig) -> Result<String> {
    match flag.or_else(|| cfg.index_code.clone()) {
        Some(index) => Ok(index),
        None => bail!("no index code: pass --index or set index_code in the config"),
    }
}

fn run_fetch(kind: DataKind, common: &CommonArgs, args: &FetchArgs) -> Result<()> {
    let (cfg, mut handler) = build_handler(common)?;
    if let Some(limit) = args.calls_per_minute {
        handler = handler.with_rate_limit(RateLimit::per_minute(limit));
    }

    let fields: Vec<String> = if !args.fields.is_empty() {
        args.fields.clone()
    } else if !cfg.fields.is_empty() {
        cfg.fields.clone()
    } else {
        kind.default_fields().iter().map(|f| f.to_string()).collect()
    };
    let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
    // Resolving an index costs a remote call; reject bad field names first.
    FieldSet::parse(kind, field_refs.iter().copied())?;

    let index = args
        .index
        .clone()
        .or_else(|| cfg.symbols.is_empty().then(|| cfg.index_code.clone()).flatten());
    let symbols = if !args.symbols.is_empty() {
        args.symbols.clone()
    } else if let Some(index) = index {
        let members = handler.index_members(&index)?;
        info!(index = %index, members = members.len(), "using index members");
        members
    } else if !cfg.symbols.is_empty() {
        cfg.symbols.clone()
    } else {
        bail!("no symbols: pass --symbols or --index, or set them in the config");
    };

    let strategy = match args.strategy {
        StrategyArg::Sequential => FetchStrategy::Sequential {
            pause: Duration::from_millis(args.pause_ms.unwrap_or(cfg.pause_ms)),
        },
        StrategyArg::Coalesced => FetchStrategy::Coalesced,
        StrategyArg::Concurrent => FetchStrategy::Concurrent {
            threads: args.threads,
        },
    };

    let Some(table) = handler.fetch(kind, &symbols, &field_refs, strategy)? else {
        eprintln!(
            "No {kind} data returned for {} symbols between {} and {}.",
            symbols.len(),
            cfg.start_date,
            cfg.end_date
        );
        std::process::exit(1);
    };

    print_summary(&table);
    if let Some(path) = &args.output {
        write_table(&table, path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn print_summary(table: &WideTable) {
    println!(
        "{} dates x {} columns ({} symbols), {} missing cells",
        table.height(),
        table.width(),
        table.symbols().len(),
        table.missing_count()
    );
    if let (Some(first), Some(last)) = (table.dates().first(), table.dates().last()) {
        println!("Range: {first} .. {last}");
    }
    println!("Fingerprint: {}", table.fingerprint());
}

fn write_table(table: &WideTable, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => write_parquet(table, path)?,
        Some("csv") => write_csv(table, path)?,
        _ => bail!(
            "unsupported output format for {} (use .parquet or .csv)",
            path.display()
        ),
    }
    Ok(())
}

fn run_benchmark(common: &CommonArgs, index: Option<String>, output: Option<&Path>) -> Result<()> {
    let (cfg, handler) = build_handler(common)?;
    let index = pick_index(index, &cfg)?;
    let series = handler.benchmark(&index)?;

    println!(
        "{index}: {} trading days, final net value {:.4}",
        series.len(),
        series.last_value().unwrap_or(1.0)
    );
    if let Some(path) = output {
        write_benchmark_csv(&series, path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn run_members(common: &CommonArgs, index: Option<String>) -> Result<()> {
    let (cfg, handler) = build_handler(common)?;
    let index = pick_index(index, &cfg)?;
    let members = handler.index_members(&index)?;

    if members.is_empty() {
        eprintln!(
            "No members found for {index} between {} and {}.",
            cfg.start_date, cfg.end_date
        );
        std::process::exit(1);
    }
    for member in &members {
        println!("{member}");
    }
    eprintln!("{} members", members.len());
    Ok(())
}
