//! Configuration loading for orgpulse.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ORGPULSE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "ORGPULSE_";

/// Application configuration derived from `ORGPULSE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_forge_api_base")]
    pub forge_api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forge_token: Option<String>,
    #[serde(default = "default_org")]
    pub default_org: String,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Tuning knobs for a single ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PipelineConfig {
    /// Page size used when listing organization members (1..=100)
    ///
    /// Environment variable: `ORGPULSE_MEMBERS_PER_PAGE`
    #[serde(default = "default_members_per_page")]
    pub members_per_page: u32,

    /// Optional hard ceiling on member pages; `None` pages until an empty or short page
    ///
    /// Environment variable: `ORGPULSE_MAX_MEMBER_PAGES`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_member_pages: Option<u32>,

    /// Page size used when listing a member's repositories (1..=100)
    ///
    /// Environment variable: `ORGPULSE_REPOS_PER_PAGE`
    #[serde(default = "default_repos_per_page")]
    pub repos_per_page: u32,

    /// Trailing window, in days, a repository update must fall into
    ///
    /// Environment variable: `ORGPULSE_RECENCY_WINDOW_DAYS`
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: u32,

    /// Maximum number of in-flight forge requests per stage
    ///
    /// Environment variable: `ORGPULSE_MAX_CONCURRENCY`
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-request timeout applied by the HTTP client
    ///
    /// Environment variable: `ORGPULSE_REQUEST_TIMEOUT_MS`
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for an entire run, all stages included
    ///
    /// Environment variable: `ORGPULSE_PIPELINE_DEADLINE_SECONDS`
    #[serde(default = "default_pipeline_deadline_seconds")]
    pub pipeline_deadline_seconds: u64,

    /// Maximum number of polls for a statistic the forge is still computing
    ///
    /// Environment variable: `ORGPULSE_STATS_MAX_POLLS`
    #[serde(default = "default_stats_max_polls")]
    pub stats_max_polls: u32,

    /// Initial delay between statistic polls; doubles per attempt
    ///
    /// Environment variable: `ORGPULSE_STATS_POLL_INTERVAL_MS`
    #[serde(default = "default_stats_poll_interval_ms")]
    pub stats_poll_interval_ms: u64,

    /// Abort the run on the first per-member or per-repository failure
    ///
    /// Environment variable: `ORGPULSE_FAIL_FAST`
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            members_per_page: default_members_per_page(),
            max_member_pages: None,
            repos_per_page: default_repos_per_page(),
            recency_window_days: default_recency_window_days(),
            max_concurrency: default_max_concurrency(),
            request_timeout_ms: default_request_timeout_ms(),
            pipeline_deadline_seconds: default_pipeline_deadline_seconds(),
            stats_max_polls: default_stats_max_polls(),
            stats_poll_interval_ms: default_stats_poll_interval_ms(),
            fail_fast: false,
        }
    }
}

impl PipelineConfig {
    /// Validate pipeline configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.members_per_page == 0 || self.members_per_page > 100 {
            return Err(ConfigError::InvalidPageSize {
                field: "members_per_page".to_string(),
                value: self.members_per_page,
            });
        }

        if self.repos_per_page == 0 || self.repos_per_page > 100 {
            return Err(ConfigError::InvalidPageSize {
                field: "repos_per_page".to_string(),
                value: self.repos_per_page,
            });
        }

        if self.max_member_pages == Some(0) {
            return Err(ConfigError::InvalidMaxMemberPages);
        }

        if self.recency_window_days == 0 {
            return Err(ConfigError::InvalidRecencyWindow {
                value: self.recency_window_days,
            });
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency {
                value: self.max_concurrency,
            });
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "request_timeout_ms".to_string(),
            });
        }

        if self.pipeline_deadline_seconds == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "pipeline_deadline_seconds".to_string(),
            });
        }

        if self.stats_max_polls == 0 {
            return Err(ConfigError::InvalidStatsMaxPolls);
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pipeline_deadline(&self) -> Duration {
        Duration::from_secs(self.pipeline_deadline_seconds)
    }

    pub fn stats_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stats_poll_interval_ms)
    }

    pub fn recency_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.recency_window_days))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            forge_api_base: default_forge_api_base(),
            forge_token: None,
            default_org: default_org(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.forge_token.is_some() {
            config.forge_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        if let Err(source) = url::Url::parse(&self.forge_api_base) {
            return Err(ConfigError::InvalidForgeApiBase {
                value: self.forge_api_base.clone(),
                source,
            });
        }

        if self.default_org.trim().is_empty() {
            return Err(ConfigError::MissingDefaultOrg);
        }

        // Anonymous access works locally but exhausts the rate limit quickly.
        if !matches!(self.profile.as_str(), "local" | "test") && self.forge_token.is_none() {
            return Err(ConfigError::MissingForgeToken);
        }

        self.pipeline.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://orgpulse.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_forge_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_org() -> String {
    "hackreactor".to_string()
}

fn default_members_per_page() -> u32 {
    100
}

fn default_repos_per_page() -> u32 {
    100
}

fn default_recency_window_days() -> u32 {
    7
}

fn default_max_concurrency() -> usize {
    16
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_pipeline_deadline_seconds() -> u64 {
    1800 // 30 minutes
}

fn default_stats_max_polls() -> u32 {
    10
}

fn default_stats_poll_interval_ms() -> u64 {
    1000
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("database URL is missing; set ORGPULSE_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("invalid forge API base '{value}': {source}")]
    InvalidForgeApiBase {
        value: String,
        source: url::ParseError,
    },
    #[error("default organization is empty; set ORGPULSE_DEFAULT_ORG")]
    MissingDefaultOrg,
    #[error("forge token is missing; set ORGPULSE_FORGE_TOKEN")]
    MissingForgeToken,
    #[error("{field} must be between 1 and 100, got {value}")]
    InvalidPageSize { field: String, value: u32 },
    #[error("max member pages must be at least 1 when set")]
    InvalidMaxMemberPages,
    #[error("recency window must be at least one day, got {value}")]
    InvalidRecencyWindow { value: u32 },
    #[error("max concurrency must be positive, got {value}")]
    InvalidConcurrency { value: usize },
    #[error("{field} must be positive")]
    InvalidTimeout { field: String },
    #[error("stats max polls must be at least 1")]
    InvalidStatsMaxPolls,
}

/// Loads configuration using layered `.env` files and `ORGPULSE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);
        let forge_api_base = take_string(&mut layered, "FORGE_API_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(default_forge_api_base);
        let forge_token = take_string(&mut layered, "FORGE_TOKEN");
        let default_org = take_string(&mut layered, "DEFAULT_ORG").unwrap_or_else(default_org);

        let pipeline = PipelineConfig {
            members_per_page: take_parsed(&mut layered, "MEMBERS_PER_PAGE")?
                .unwrap_or_else(default_members_per_page),
            max_member_pages: take_parsed(&mut layered, "MAX_MEMBER_PAGES")?,
            repos_per_page: take_parsed(&mut layered, "REPOS_PER_PAGE")?
                .unwrap_or_else(default_repos_per_page),
            recency_window_days: take_parsed(&mut layered, "RECENCY_WINDOW_DAYS")?
                .unwrap_or_else(default_recency_window_days),
            max_concurrency: take_parsed(&mut layered, "MAX_CONCURRENCY")?
                .unwrap_or_else(default_max_concurrency),
            request_timeout_ms: take_parsed(&mut layered, "REQUEST_TIMEOUT_MS")?
                .unwrap_or_else(default_request_timeout_ms),
            pipeline_deadline_seconds: take_parsed(&mut layered, "PIPELINE_DEADLINE_SECONDS")?
                .unwrap_or_else(default_pipeline_deadline_seconds),
            stats_max_polls: take_parsed(&mut layered, "STATS_MAX_POLLS")?
                .unwrap_or_else(default_stats_max_polls),
            stats_poll_interval_ms: take_parsed(&mut layered, "STATS_POLL_INTERVAL_MS")?
                .unwrap_or_else(default_stats_poll_interval_ms),
            fail_fast: take_parsed(&mut layered, "FAIL_FAST")?.unwrap_or(false),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            forge_api_base,
            forge_token,
            default_org,
            pipeline,
        };

        config.validate()?;

        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn take_parsed<T: std::str::FromStr>(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_string(layered, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{key}"),
                value: raw,
            }),
        None => Ok(None),
    }
}
