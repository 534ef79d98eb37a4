//! `listado` — search a Mercado Libre listing surface from the terminal,
//! filter the results, and show, count or export the survivors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use listado_core::{parse_cookie_pairs, ConditionFilter, Country, FilterSpec, SearchRequest};
use listado_engine::{
    ClientSettings, ExecutionOptions, HttpSourceClient, ListadoUrlTranslator, Pipeline,
    PipelineError, PushdownFilters, RetryPolicy, RetryingClient, UrlTranslator, DEFAULT_WORKERS,
};
use tokio_util::sync::CancellationToken;

mod output;

#[derive(Debug, Parser)]
#[command(name = "listado", version)]
#[command(about = "Search, filter and export Mercado Libre listings")]
struct Cli {
    /// Keywords to search for.
    keywords: Vec<String>,

    /// Marketplace country (ar, cl, mx, co, pe).
    #[arg(long, default_value = "cl")]
    country: Country,

    /// Replay an exact search URL captured from the browser instead of
    /// building one from keywords.
    #[arg(long, value_name = "URL")]
    search_url: Option<String>,

    /// Maximum listings to show in the preview.
    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Walk every page and show every match, ignoring --limit.
    #[arg(long)]
    all_results: bool,

    /// Page budget; 0 walks until the source runs out.
    #[arg(long, default_value_t = 0)]
    max_pages: u32,

    /// Keep listings shipped from abroad.
    #[arg(long)]
    include_international: bool,

    /// Minimum price in minor units; 0 = unbounded.
    #[arg(long, default_value_t = 0)]
    min_price: u64,

    /// Maximum price in minor units; 0 = unbounded.
    #[arg(long, default_value_t = 0)]
    max_price: u64,

    /// Word the title must contain (repeatable).
    #[arg(long = "word", value_name = "WORD")]
    words: Vec<String>,

    /// Word that rejects a listing when present (repeatable).
    #[arg(long = "exclude-word", value_name = "WORD")]
    exclude_words: Vec<String>,

    /// Minimum discount percentage.
    #[arg(long, default_value_t = 0)]
    min_discount: u8,

    /// Condition filter: any, new, used, reconditioned.
    #[arg(long, default_value = "any")]
    condition: ConditionFilter,

    /// Sort results by ascending price.
    #[arg(long)]
    sort_price: bool,

    /// Count survivors exactly instead of showing them.
    #[arg(long)]
    count: bool,

    /// Estimate the count from the first page only.
    #[arg(long)]
    fast_count: bool,

    /// Export survivors to CSV; a path is optional.
    #[arg(long, value_name = "PATH")]
    export_csv: Option<Option<PathBuf>>,

    /// Concurrent detail fetches.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Raw Cookie header to send with every request.
    #[arg(long, value_name = "HEADER")]
    cookie: Option<String>,

    /// File holding the raw Cookie header.
    #[arg(long, value_name = "FILE")]
    cookie_file: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 20)]
    timeout_secs: u64,

    /// Print machine-readable JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    listado_logging::init_terminal(if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    });

    match run(cli).await {
        Ok(code) => code,
        Err(RunError::Usage(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
        Err(RunError::Other(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

enum RunError {
    /// The invocation itself was wrong; exit code 2.
    Usage(anyhow::Error),
    Other(anyhow::Error),
}

impl From<PipelineError> for RunError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidRequest(_) => RunError::Usage(err.into()),
            other => RunError::Other(other.into()),
        }
    }
}

impl From<anyhow::Error> for RunError {
    fn from(err: anyhow::Error) -> Self {
        RunError::Other(err)
    }
}

async fn run(cli: Cli) -> Result<ExitCode, RunError> {
    let request = build_request(&cli)?;
    let filter = build_filter(&cli);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received; finishing in-flight work");
            interrupt.cancel();
        }
    });

    let options = ExecutionOptions {
        max_pages: None,
        worker_count: cli.workers.max(1),
        sort_by_price: cli.sort_price,
        preview_limit: if cli.all_results { 0 } else { cli.limit },
        cancel,
        deadline: None,
    };

    let settings = ClientSettings {
        request_timeout: Duration::from_secs(cli.timeout_secs),
        pushdown: PushdownFilters::from_spec(&filter, cli.sort_price),
        ..ClientSettings::default()
    };
    let client = RetryingClient::new(
        HttpSourceClient::new(settings).map_err(|err| RunError::Other(err.into()))?,
        RetryPolicy::default(),
    );
    let pipeline = Pipeline::new(client);

    let result = if cli.fast_count {
        pipeline.run_fast_count(&request, &filter, &options).await?
    } else if cli.count {
        pipeline.run_exact_count(&request, &filter, &options).await?
    } else if let Some(dest) = cli.export_csv.clone() {
        pipeline.run_export(&request, &filter, &options, dest).await?
    } else {
        pipeline.run_preview(&request, &filter, &options).await?
    };

    let empty = output::is_empty(&result.outcome);
    if cli.json {
        println!("{}", output::to_json(&result));
    } else {
        output::print_text(&result);
    }
    Ok(if empty {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn build_request(cli: &Cli) -> Result<SearchRequest, RunError> {
    let mut request = match &cli.search_url {
        Some(url) => ListadoUrlTranslator
            .translate(url)
            .map_err(|err| RunError::Usage(err.into()))?,
        None => SearchRequest::with_keywords(cli.keywords.clone(), cli.country),
    };
    request.max_pages = cli.max_pages;
    request.include_international = cli.include_international;

    if let Some(raw) = cookie_header(cli)? {
        request.cookies = parse_cookie_pairs(&raw);
    }
    request
        .validate()
        .map_err(|err| RunError::Usage(err.into()))?;
    Ok(request)
}

fn cookie_header(cli: &Cli) -> Result<Option<String>, RunError> {
    if let Some(raw) = &cli.cookie {
        return Ok(Some(raw.clone()));
    }
    let Some(path) = &cli.cookie_file else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading cookie file {}", path.display()))
        .map_err(RunError::Usage)?;
    Ok(Some(raw.trim().to_string()))
}

fn build_filter(cli: &Cli) -> FilterSpec {
    FilterSpec {
        price_min: cli.min_price,
        price_max: cli.max_price,
        discount_min: cli.min_discount,
        condition: cli.condition,
        include_words: cli.words.clone(),
        exclude_words: cli.exclude_words.clone(),
        include_international: cli.include_international,
    }
}
