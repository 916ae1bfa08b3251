//! CLI command definitions, routing, and tracing setup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use leadscore_core::pipeline::{ProgressReporter, ScoreConfig, ScoreRun};
use leadscore_core::{CallKind, LeadScorer, score_leads, sink};
use leadscore_fetcher::{ApifyFetcher, ApifyFetcherConfig};
use leadscore_shared::{AppConfig, Credentials, init_config, load_config, load_config_from};
use leadscore_storage::ResponseCache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rows shown when results go to the terminal instead of a file.
const SUMMARY_ROWS: usize = 25;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// leadscore: find likely customers among social profiles.
#[derive(Parser)]
#[command(
    name = "leadscore",
    version,
    about = "Grade social media profiles against a target audience and keep the best leads.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.leadscore/leadscore.toml.
    #[arg(long, global = true, env = "LEADSCORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Dotenv file with provider credentials. Its values win over the environment.
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch, grade and filter the profiles listed in a CSV file.
    Score(ScoreArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Response cache maintenance.
    Cache {
        /// Cache subcommand.
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Flags of `leadscore score`. Each one overrides the config file.
#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// CSV file with one identifier per row.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Where to write the qualifying leads. Prints a summary when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Name of the identifier column.
    #[arg(long)]
    pub column: Option<String>,

    /// Skip web enrichment and re-grading.
    #[arg(long)]
    pub no_web: bool,

    /// Only process the first N unique identifiers.
    #[arg(long, value_name = "N")]
    pub max: Option<usize>,

    /// Lowest score (1-5) written to the output.
    #[arg(long, value_name = "N")]
    pub min_score: Option<u8>,

    /// Profiles graded concurrently.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Identifiers per scraper job.
    #[arg(long, value_name = "N")]
    pub chunk_size: Option<usize>,

    /// Target audience description.
    #[arg(long, value_name = "TEXT")]
    pub target: Option<String>,

    /// File with example audience members, one per line.
    #[arg(long, value_name = "PATH")]
    pub examples_file: Option<PathBuf>,

    /// Cache remote responses in this database.
    #[arg(long, value_name = "PATH", conflicts_with = "no_cache")]
    pub cache: Option<PathBuf>,

    /// Disable the response cache for this run.
    #[arg(long)]
    pub no_cache: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Cache subcommands. Both work whether or not the cache is enabled.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Show where the cache lives and how many responses it holds.
    Stats,
    /// Remove cached responses.
    Clear {
        /// Only remove responses of this call kind.
        #[arg(long, value_enum)]
        kind: Option<CacheKind>,
    },
}

/// Remote call kinds as accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum CacheKind {
    Grade,
    Search,
    Rescore,
}

impl From<CacheKind> for CallKind {
    fn from(kind: CacheKind) -> Self {
        match kind {
            CacheKind::Grade => CallKind::Grade,
            CacheKind::Search => CallKind::Search,
            CacheKind::Rescore => CallKind::Rescore,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leadscore=info",
        1 => "leadscore=debug",
        _ => "leadscore=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Score(args) => cmd_score(config_path.as_deref(), &cli.env_file, args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats(config_path.as_deref()).await,
            CacheAction::Clear { kind } => cmd_cache_clear(config_path.as_deref(), kind).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

/// Read `path` as a dotenv file. A missing file is an empty map.
fn load_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) if e.not_found() => {
            debug!(path = %path.display(), "no dotenv file");
            return Ok(HashMap::new());
        }
        Err(e) => return Err(eyre!("cannot read '{}': {e}", path.display())),
    };

    let vars = entries
        .collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| eyre!("malformed '{}': {e}", path.display()))?;
    debug!(path = %path.display(), count = vars.len(), "dotenv file loaded");
    Ok(vars)
}

/// Credentials from the dotenv values, falling back to the process environment.
fn resolve_credentials(config: &AppConfig, dotenv: &HashMap<String, String>) -> Result<Credentials> {
    let credentials = Credentials::resolve(config, |name| {
        dotenv.get(name).cloned().or_else(|| std::env::var(name).ok())
    })?;
    Ok(credentials)
}

/// Merge command-line flags over the file configuration.
fn apply_overrides(config: &mut AppConfig, args: &ScoreArgs) -> Result<()> {
    if let Some(column) = &args.column {
        config.scoring.identifier_column = column.clone();
    }
    if let Some(min_score) = args.min_score {
        config.scoring.min_score = min_score;
    }
    if let Some(workers) = args.workers {
        config.scoring.workers = workers;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.apify.chunk_size = chunk_size;
    }
    if args.no_web {
        config.perplexity.enabled = false;
    }
    if let Some(target) = &args.target {
        config.target.description = target.clone();
    }
    if let Some(path) = &args.examples_file {
        config.target.examples = std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read examples file '{}': {e}", path.display()))?
            .trim()
            .to_string();
    }
    if let Some(path) = &args.cache {
        config.cache.enabled = true;
        config.cache.path = Some(path.to_string_lossy().into_owned());
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_score(config_path: Option<&Path>, env_file: &Path, args: ScoreArgs) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    apply_overrides(&mut config, &args)?;
    config.validate()?;

    // Resolve credentials before doing anything
    let dotenv = load_env_file(env_file)?;
    let credentials = resolve_credentials(&config, &dotenv)?;

    let fetcher = ApifyFetcher::new(ApifyFetcherConfig::from_app(&config, &credentials))?;
    let mut scorer = LeadScorer::from_config(&config, &credentials)?;
    if let Some(path) = config.cache_path()? {
        let cache = ResponseCache::open(&path).await?;
        info!(path = %path.display(), entries = cache.len().await?, "response cache enabled");
        scorer = scorer.with_cache(Arc::new(cache));
    }
    if !scorer.enrichment_enabled() {
        info!("web enrichment off, grading only");
    }

    let mut score_config = ScoreConfig::from_app(&config, args.input.clone());
    score_config.output = args.output.clone();
    score_config.max_identifiers = args.max;

    info!(
        input = %score_config.input.display(),
        workers = score_config.workers,
        chunk_size = score_config.chunk_size,
        min_score = score_config.min_score,
        "starting scoring run"
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing with partial results");
            interrupt.cancel();
        }
    });

    let reporter = CliProgress::new();
    let run = score_leads(&score_config, &fetcher, Arc::new(scorer), &reporter, &cancel).await?;

    print_run(&run);
    Ok(())
}

fn print_run(run: &ScoreRun) {
    println!();
    if run.interrupted {
        println!("  Run interrupted, partial results kept.");
    } else {
        println!("  Scoring complete!");
    }
    println!("  Identifiers: {}", run.identifiers);
    println!(
        "  Profiles:    {} fetched ({} chunks, {} failed), {} without text",
        run.records, run.chunks, run.failed_chunks, run.empty_records
    );
    println!("  Scored:      {} ({} failed)", run.scored, run.failed);
    println!("  Kept:        {}", run.kept.len());
    match &run.output {
        Some(path) => println!("  Output:      {}", path.display()),
        None if !run.kept.is_empty() => {
            println!();
            print!("{}", sink::summary_table(&run.kept, SUMMARY_ROWS));
        }
        None => {}
    }
    println!("  Time:        {:.1}s", run.elapsed.as_secs_f64());
    println!();
}

/// Remove cached responses at `path`. `None` when there is no cache file.
async fn clear_cache(path: &Path, kind: Option<CallKind>) -> Result<Option<u64>> {
    if !path.exists() {
        return Ok(None);
    }
    let cache = ResponseCache::open(path).await?;
    let removed = cache.clear(kind.map(|k| k.as_str())).await?;
    info!(path = %path.display(), kind = kind.map(|k| k.as_str()).unwrap_or("all"), removed, "cache cleared");
    Ok(Some(removed))
}

async fn cmd_cache_stats(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let path = config.cache_file()?;
    if !path.exists() {
        println!("No cache at {}", path.display());
        return Ok(());
    }
    let cache = ResponseCache::open(&path).await?;
    println!("Cache:     {}", path.display());
    println!("Enabled:   {}", config.cache.enabled);
    println!("Responses: {}", cache.len().await?);
    Ok(())
}

async fn cmd_cache_clear(config_path: Option<&Path>, kind: Option<CacheKind>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let path = config.cache_file()?;
    match clear_cache(&path, kind.map(CallKind::from)).await? {
        Some(removed) => println!("Removed {removed} cached responses from {}", path.display()),
        None => println!("No cache at {}", path.display()),
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner while reading and fetching, a bar once scoring starts.
struct CliProgress {
    bar: ProgressBar,
    counting: AtomicBool,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self {
            bar,
            counting: AtomicBool::new(false),
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn chunk_done(&self, current: usize, total: usize, records: Option<usize>) {
        let status = match records {
            Some(n) => format!("{n} profiles"),
            None => "failed".to_string(),
        };
        self.bar
            .set_message(format!("Fetching [{current}/{total}] last chunk: {status}"));
    }

    fn item_scored(&self, current: usize, total: usize, identifier: &str) {
        if !self.counting.swap(true, Ordering::Relaxed) {
            self.bar.set_length(total as u64);
            self.bar.set_style(
                ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
        }
        self.bar.set_position(current as u64);
        self.bar.set_message(identifier.to_string());
    }

    fn done(&self, _run: &ScoreRun) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ScoreArgs {
        let mut argv = vec!["leadscore", "score", "--input", "leads.csv"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Score(args) => args,
            Command::Config { .. } | Command::Cache { .. } => panic!("expected score"),
        }
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = AppConfig::default();
        let args = args(&[
            "--column",
            "handle",
            "--min-score",
            "4",
            "--workers",
            "3",
            "--chunk-size",
            "50",
            "--no-web",
            "--target",
            "Vienna landlords",
            "--cache",
            "/tmp/lc.db",
        ]);
        apply_overrides(&mut config, &args).unwrap();

        assert_eq!(config.scoring.identifier_column, "handle");
        assert_eq!(config.scoring.min_score, 4);
        assert_eq!(config.scoring.workers, 3);
        assert_eq!(config.apify.chunk_size, 50);
        assert!(!config.perplexity.enabled);
        assert_eq!(config.target.description, "Vienna landlords");
        assert_eq!(config.cache_path().unwrap(), Some(PathBuf::from("/tmp/lc.db")));
    }

    #[test]
    fn absent_flags_keep_defaults() {
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &args(&[])).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.scoring.workers, defaults.scoring.workers);
        assert_eq!(config.perplexity.enabled, defaults.perplexity.enabled);
        assert_eq!(config.target.examples, defaults.target.examples);
    }

    #[test]
    fn no_cache_wins_over_config_file() {
        let mut config = AppConfig::default();
        config.cache.enabled = true;
        apply_overrides(&mut config, &args(&["--no-cache"])).unwrap();
        assert_eq!(config.cache_path().unwrap(), None);
    }

    #[test]
    fn cache_and_no_cache_conflict() {
        let argv = ["leadscore", "score", "--input", "x.csv", "--cache", "a.db", "--no-cache"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn missing_examples_file_is_reported() {
        let mut config = AppConfig::default();
        let err = apply_overrides(
            &mut config,
            &args(&["--examples-file", "/definitely/not/here.txt"]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("examples file"));
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("leadscore_cli_{}_{name}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn dotenv_values_win_over_environment() {
        let path = temp_path("env");
        std::fs::write(
            &path,
            "# provider keys\nLS_TEST_OPENAI=sk-from-file\nLS_TEST_APIFY=\"apify-from-file\"\n",
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.openai.api_key_env = "LS_TEST_OPENAI".into();
        config.apify.token_env = "LS_TEST_APIFY".into();
        config.perplexity.api_key_env = "LS_TEST_PPLX_UNSET".into();

        let dotenv = load_env_file(&path).unwrap();
        let credentials = resolve_credentials(&config, &dotenv).unwrap();
        assert_eq!(credentials.openai_api_key, "sk-from-file");
        assert_eq!(credentials.apify_token, "apify-from-file");
        assert!(credentials.perplexity_api_key.is_none());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_dotenv_file_is_empty() {
        let vars = load_env_file(Path::new("/definitely/not/here/.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn missing_required_key_fails_before_any_call() {
        let mut config = AppConfig::default();
        config.openai.api_key_env = "LS_TEST_OPENAI_NEVER_SET".into();
        let err = resolve_credentials(&config, &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("LS_TEST_OPENAI_NEVER_SET"));
    }

    #[test]
    fn cache_clear_parses_kind() {
        let cli = Cli::try_parse_from(["leadscore", "cache", "clear", "--kind", "search"]).unwrap();
        match cli.command {
            Command::Cache {
                action: CacheAction::Clear { kind },
            } => assert_eq!(kind, Some(CacheKind::Search)),
            _ => panic!("expected cache clear"),
        }
        assert!(Cli::try_parse_from(["leadscore", "cache", "clear", "--kind", "bogus"]).is_err());
    }

    #[tokio::test]
    async fn clear_cache_removes_one_kind_or_all() {
        let path = temp_path("cache.db");
        assert_eq!(clear_cache(&path, None).await.unwrap(), None);
        assert!(!path.exists());

        {
            let cache = ResponseCache::open(&path).await.unwrap();
            cache.put("grade", "gpt-4o-mini", "h1", "##Score 3").await.unwrap();
            cache.put("search", "sonar", "h2", "[]").await.unwrap();
            cache.put("rescore", "gpt-4o-mini", "h3", "##Score 4").await.unwrap();
        }

        let removed = clear_cache(&path, Some(CacheKind::Search.into())).await.unwrap();
        assert_eq!(removed, Some(1));
        assert_eq!(ResponseCache::open(&path).await.unwrap().len().await.unwrap(), 2);

        assert_eq!(clear_cache(&path, None).await.unwrap(), Some(2));
        assert!(ResponseCache::open(&path).await.unwrap().is_empty().await.unwrap());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn config_path_is_global() {
        let cli = Cli::try_parse_from(["leadscore", "config", "show", "--config", "alt.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
    }
}
