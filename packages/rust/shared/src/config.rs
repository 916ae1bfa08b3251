//! Application configuration for leadscore.
//!
//! User config lives at `~/.leadscore/leadscore.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! The file only ever names the environment variables that hold provider
//! credentials. [`Credentials`] resolves them once at startup and is then
//! passed by reference to every component that needs a key.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LeadScoreError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadscore.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadscore";

/// Largest chunk the profile scraper accepts in one job.
pub const MAX_CHUNK_SIZE: usize = 500;

// ---------------------------------------------------------------------------
// Config structs (matching leadscore.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat-completion provider used for grading and re-grading.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Web-search answer provider used for enrichment.
    #[serde(default)]
    pub perplexity: PerplexityConfig,

    /// Bulk profile scraper.
    #[serde(default)]
    pub apify: ApifyConfig,

    /// Scoring run settings.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Target audience the profiles are graded against.
    #[serde(default)]
    pub target: TargetConfig,

    /// Retry policy shared by all remote calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Optional response cache.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    /// API base URL, without the `/chat/completions` suffix.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model used for all grading calls.
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Sampling temperature for the initial grade.
    #[serde(default = "default_grade_temperature")]
    pub temperature: f32,

    /// Sampling temperature for the re-grade, lower than the initial one.
    #[serde(default = "default_rescore_temperature")]
    pub rescore_temperature: f32,

    /// Maximum output tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// HTTP timeout per request in seconds.
    #[serde(default = "default_openai_timeout")]
    pub timeout_secs: u64,

    /// Minimum milliseconds between two requests from this client.
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            temperature: default_grade_temperature(),
            rescore_temperature: default_rescore_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_openai_timeout(),
            min_interval_ms: 0,
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".into()
}
fn default_grade_temperature() -> f32 {
    0.7
}
fn default_rescore_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_openai_timeout() -> u64 {
    60
}

/// `[perplexity]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerplexityConfig {
    /// Whether web enrichment runs at all (still requires the key to be set).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the env var holding the API key. The key is optional.
    #[serde(default = "default_perplexity_key_env")]
    pub api_key_env: String,

    /// API base URL, without the `/chat/completions` suffix.
    #[serde(default = "default_perplexity_base_url")]
    pub base_url: String,

    /// Search-capable model.
    #[serde(default = "default_perplexity_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_search_temperature")]
    pub temperature: f32,

    /// HTTP timeout per request in seconds.
    #[serde(default = "default_perplexity_timeout")]
    pub timeout_secs: u64,

    /// Minimum milliseconds between two requests from this client.
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl Default for PerplexityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: default_perplexity_key_env(),
            base_url: default_perplexity_base_url(),
            model: default_perplexity_model(),
            temperature: default_search_temperature(),
            timeout_secs: default_perplexity_timeout(),
            min_interval_ms: 0,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_perplexity_key_env() -> String {
    "PERPLEXITY_API_KEY".into()
}
fn default_perplexity_base_url() -> String {
    "https://api.perplexity.ai".into()
}
fn default_perplexity_model() -> String {
    "sonar".into()
}
fn default_search_temperature() -> f32 {
    0.3
}
fn default_perplexity_timeout() -> u64 {
    40
}

/// `[apify]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApifyConfig {
    /// Name of the env var holding the API token.
    #[serde(default = "default_apify_token_env")]
    pub token_env: String,

    /// API base URL (the `/v2/...` paths are appended).
    #[serde(default = "default_apify_base_url")]
    pub base_url: String,

    /// Actor that scrapes profiles by username.
    #[serde(default = "default_actor")]
    pub actor: String,

    /// Identifiers per scraper job.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Upper bound for one scraper job, in seconds.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Server-side wait per status poll, in seconds.
    #[serde(default = "default_poll_wait")]
    pub poll_wait_secs: u64,
}

impl Default for ApifyConfig {
    fn default() -> Self {
        Self {
            token_env: default_apify_token_env(),
            base_url: default_apify_base_url(),
            actor: default_actor(),
            chunk_size: default_chunk_size(),
            job_timeout_secs: default_job_timeout(),
            poll_wait_secs: default_poll_wait(),
        }
    }
}

fn default_apify_token_env() -> String {
    "APIFY_API_TOKEN".into()
}
fn default_apify_base_url() -> String {
    "https://api.apify.com".into()
}
fn default_actor() -> String {
    "apify~instagram-profile-scraper".into()
}
fn default_chunk_size() -> usize {
    100
}
fn default_job_timeout() -> u64 {
    1200
}
fn default_poll_wait() -> u64 {
    60
}

/// `[scoring]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Maximum number of profiles graded concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Results below this score are dropped from the output.
    #[serde(default = "default_min_score")]
    pub min_score: u8,

    /// Caption text is cut to this many characters before prompting.
    #[serde(default = "default_caption_chars")]
    pub caption_chars: usize,

    /// CSV column holding the identifiers.
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            min_score: default_min_score(),
            caption_chars: default_caption_chars(),
            identifier_column: default_identifier_column(),
        }
    }
}

fn default_workers() -> usize {
    10
}
fn default_min_score() -> u8 {
    1
}
fn default_caption_chars() -> usize {
    2000
}
fn default_identifier_column() -> String {
    "channelName".into()
}

/// `[target]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Short paragraph describing the audience.
    #[serde(default = "default_target_description")]
    pub description: String,

    /// Example members of the audience, one per line.
    #[serde(default = "default_target_examples")]
    pub examples: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            description: default_target_description(),
            examples: default_target_examples(),
        }
    }
}

fn default_target_description() -> String {
    "Affluent Austrians eager to buy rental real estate or invest in property in Styria.".into()
}
fn default_target_examples() -> String {
    "- Graz-based investor\n- Styrian Airbnb host".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per remote call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    2000
}

/// `[cache]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Reuse remote responses across runs.
    #[serde(default)]
    pub enabled: bool,

    /// Database path. Defaults to `~/.leadscore/cache.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl AppConfig {
    /// Check value ranges. Called once after file values and CLI flags are merged.
    pub fn validate(&self) -> Result<()> {
        let chunk = self.apify.chunk_size;
        if chunk == 0 || chunk > MAX_CHUNK_SIZE {
            return Err(LeadScoreError::config(format!(
                "apify.chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {chunk}"
            )));
        }
        if self.scoring.workers == 0 {
            return Err(LeadScoreError::config("scoring.workers must be at least 1"));
        }
        if !(1..=5).contains(&self.scoring.min_score) {
            return Err(LeadScoreError::config(format!(
                "scoring.min_score must be between 1 and 5, got {}",
                self.scoring.min_score
            )));
        }
        for (name, value) in [
            ("openai.temperature", self.openai.temperature),
            ("openai.rescore_temperature", self.openai.rescore_temperature),
            ("perplexity.temperature", self.perplexity.temperature),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LeadScoreError::config(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(LeadScoreError::config("retry.max_attempts must be at least 1"));
        }
        if self.scoring.identifier_column.trim().is_empty() {
            return Err(LeadScoreError::config(
                "scoring.identifier_column must not be empty",
            ));
        }
        for (name, base) in [
            ("openai.base_url", &self.openai.base_url),
            ("perplexity.base_url", &self.perplexity.base_url),
            ("apify.base_url", &self.apify.base_url),
        ] {
            url::Url::parse(base).map_err(|e| {
                LeadScoreError::config(format!("{name} is not a valid URL ({base}): {e}"))
            })?;
        }
        Ok(())
    }

    /// Resolved cache database path, if the cache is enabled.
    pub fn cache_path(&self) -> Result<Option<PathBuf>> {
        if !self.cache.enabled {
            return Ok(None);
        }
        self.cache_file().map(Some)
    }

    /// Cache database location, whether or not the cache is enabled.
    pub fn cache_file(&self) -> Result<PathBuf> {
        match &self.cache.path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(config_dir()?.join("cache.db")),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Provider credentials, resolved once at process start.
#[derive(Clone)]
pub struct Credentials {
    /// Chat-completion key (required).
    pub openai_api_key: String,
    /// Profile scraper token (required).
    pub apify_token: String,
    /// Web-search key. `None` disables enrichment and re-grading.
    pub perplexity_api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"<redacted>")
            .field("apify_token", &"<redacted>")
            .field(
                "perplexity_api_key",
                &self.perplexity_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials through `lookup`, which maps a variable name to its value.
    pub fn resolve(config: &AppConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let openai_api_key = non_empty(&config.openai.api_key_env).ok_or_else(|| {
            LeadScoreError::config(format!(
                "OpenAI API key not found. Set the {} environment variable.",
                config.openai.api_key_env
            ))
        })?;

        let apify_token = non_empty(&config.apify.token_env).ok_or_else(|| {
            LeadScoreError::config(format!(
                "Apify API token not found. Set the {} environment variable.",
                config.apify.token_env
            ))
        })?;

        let perplexity_api_key = non_empty(&config.perplexity.api_key_env);
        if perplexity_api_key.is_none() {
            tracing::info!(
                var = %config.perplexity.api_key_env,
                "web-search key not set, enrichment disabled"
            );
        }

        Ok(Self {
            openai_api_key,
            apify_token,
            perplexity_api_key,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leadscore/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LeadScoreError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadscore/leadscore.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeadScoreError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        LeadScoreError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LeadScoreError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LeadScoreError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LeadScoreError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("apify~instagram-profile-scraper"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[scoring]
workers = 4

[apify]
chunk_size = 250
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scoring.workers, 4);
        assert_eq!(config.scoring.min_score, 1);
        assert_eq!(config.apify.chunk_size, 250);
        assert_eq!(config.apify.job_timeout_secs, 1200);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.openai.model, "gpt-4o-mini");
        config.validate().expect("valid");
    }

    #[test]
    fn validate_rejects_oversized_chunk() {
        let mut config = AppConfig::default();
        config.apify.chunk_size = 501;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = AppConfig::default();
        config.scoring.min_score = 6;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.openai.rescore_temperature = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scoring.workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.apify.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn credentials_require_openai_and_apify() {
        let config = AppConfig::default();

        let err = Credentials::resolve(&config, env_of(&[("APIFY_API_TOKEN", "t")])).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let err =
            Credentials::resolve(&config, env_of(&[("OPENAI_API_KEY", "k")])).unwrap_err();
        assert!(err.to_string().contains("APIFY_API_TOKEN"));
    }

    #[test]
    fn search_key_is_optional() {
        let config = AppConfig::default();
        let creds = Credentials::resolve(
            &config,
            env_of(&[("OPENAI_API_KEY", "k"), ("APIFY_API_TOKEN", "t")]),
        )
        .expect("resolve");
        assert!(creds.perplexity_api_key.is_none());

        let creds = Credentials::resolve(
            &config,
            env_of(&[
                ("OPENAI_API_KEY", "k"),
                ("APIFY_API_TOKEN", "t"),
                ("PERPLEXITY_API_KEY", "  "),
            ]),
        )
        .expect("resolve");
        assert!(creds.perplexity_api_key.is_none(), "blank key counts as unset");
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials {
            openai_api_key: "sk-secret".into(),
            apify_token: "apify-secret".into(),
            perplexity_api_key: Some("pplx-secret".into()),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn cache_path_follows_config() {
        let mut config = AppConfig::default();
        assert!(config.cache_path().unwrap().is_none());

        config.cache.path = Some("/tmp/leadscore-cache.db".into());
        assert!(config.cache_path().unwrap().is_none());
        assert_eq!(config.cache_file().unwrap(), PathBuf::from("/tmp/leadscore-cache.db"));

        config.cache.enabled = true;
        config.cache.path = Some("/tmp/leadscore-cache.db".into());
        assert_eq!(
            config.cache_path().unwrap(),
            Some(PathBuf::from("/tmp/leadscore-cache.db"))
        );
    }
}
