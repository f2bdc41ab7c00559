use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use remote_wiki_core::cache::{CacheStore, MemoryCache, SqliteCache};
use remote_wiki_core::config::{DEFAULT_CONFIG_PATH, RemoteWikiConfig, load_config};
use remote_wiki_core::parser_function::expand_remote_version;
use remote_wiki_core::service::{QueryKind, RemoteWiki};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_CACHE_DB: &str = ".remote_wiki/cache.sqlite3";

#[derive(Debug, Parser)]
#[command(
    name = "remote_wiki",
    version,
    about = "Query the MediaWiki version and extensions of remote wikis"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "SQLite cache database")]
    cache_db: Option<PathBuf>,
    #[arg(long, global = true, help = "Keep cached values in memory only")]
    memory_cache: bool,
    #[arg(long, global = true, help = "Render remote failures instead of empty text")]
    verbose_errors: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: PathBuf,
    cache_db: PathBuf,
    memory_cache: bool,
    verbose_errors: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
            cache_db: cli
                .cache_db
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DB)),
            memory_cache: cli.memory_cache,
            verbose_errors: cli.verbose_errors,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Print the version, extensions or extension URLs of one wiki")]
    Query(QueryArgs),
    #[command(about = "Expand {{#remote_version:...}} calls in a wikitext file")]
    Render(RenderArgs),
    Cache(CacheArgs),
}

#[derive(Debug, Args)]
struct QueryArgs {
    endpoint: String,
    #[arg(long = "type", value_enum, default_value_t = QueryType::Version)]
    kind: QueryType,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QueryType {
    Version,
    Extensions,
    ExtensionUrls,
}

impl From<QueryType> for QueryKind {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::Version => Self::Version,
            QueryType::Extensions => Self::Extensions,
            QueryType::ExtensionUrls => Self::ExtensionUrls,
        }
    }
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(value_name = "PATH", help = "Wikitext file, or - for stdin")]
    path: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Debug, Subcommand)]
enum CacheSubcommand {
    #[command(about = "Delete every cached value")]
    Clear,
    #[command(about = "Delete expired cached values")]
    Purge,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Query(args)) => run_query(&runtime, args),
        Some(Commands::Render(args)) => run_render(&runtime, args),
        Some(Commands::Cache(CacheArgs { command })) => match command {
            CacheSubcommand::Clear => run_cache_clear(&runtime),
            CacheSubcommand::Purge => run_cache_purge(&runtime),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_query(runtime: &RuntimeOptions, args: QueryArgs) -> Result<()> {
    let mut remote = build_service(runtime)?;
    let kind = QueryKind::from(args.kind);
    let rendered = remote.remote_version(&args.endpoint, Some(kind.as_str()))?;
    println!("{rendered}");
    Ok(())
}

fn run_render(runtime: &RuntimeOptions, args: RenderArgs) -> Result<()> {
    let text = match args.path.as_deref() {
        Some(path) if path.as_os_str() != "-" => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        _ => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read wikitext from stdin")?;
            buffer
        }
    };
    let mut remote = build_service(runtime)?;
    print!("{}", expand_remote_version(&text, &mut remote)?);
    Ok(())
}

fn run_cache_clear(runtime: &RuntimeOptions) -> Result<()> {
    let cache = SqliteCache::open(&runtime.cache_db)?;
    let removed = cache.clear()?;
    println!("cache_db: {}", runtime.cache_db.display());
    println!("removed: {removed}");
    Ok(())
}

fn run_cache_purge(runtime: &RuntimeOptions) -> Result<()> {
    let cache = SqliteCache::open(&runtime.cache_db)?;
    let removed = cache.purge_expired()?;
    println!("cache_db: {}", runtime.cache_db.display());
    println!("expired_removed: {removed}");
    Ok(())
}

fn build_service(runtime: &RuntimeOptions) -> Result<RemoteWiki> {
    let config = load_config(&runtime.config)?;
    debug!(
        config_path = %runtime.config.display(),
        cache_db = %runtime.cache_db.display(),
        memory_cache = runtime.memory_cache,
        cache_ttl = config.cache_ttl(),
        "resolved remote_wiki runtime"
    );
    let cache = open_cache(runtime, &config)?;
    let mut remote = RemoteWiki::new(&config, cache);
    if runtime.verbose_errors {
        remote.set_verbose(true);
    }
    Ok(remote)
}

fn open_cache(runtime: &RuntimeOptions, config: &RemoteWikiConfig) -> Result<Box<dyn CacheStore>> {
    if runtime.memory_cache || config.cache_ttl() == 0 {
        return Ok(Box::new(MemoryCache::new()));
    }
    Ok(Box::new(SqliteCache::open(&runtime.cache_db)?))
}
