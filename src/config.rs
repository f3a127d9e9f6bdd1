use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub jira: JiraConfig,
    pub bitrix: BitrixConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct JiraConfig {
    pub url: String,
    pub user: String,
    pub token: String,
    /// Page size for every paginated source call.
    pub max_results: usize,
    pub verify_ssl: bool,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: String::new(),
            token: String::new(),
            max_results: 50,
            verify_ssl: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BitrixConfig {
    /// Inbound webhook base, e.g. `https://portal.bitrix24.com/rest/1/<token>/`.
    pub webhook: String,
    /// Department new users are placed in.
    pub department_id: u64,
}

impl Default for BitrixConfig {
    fn default() -> Self {
        Self {
            webhook: String::new(),
            department_id: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub statuses: Vec<u16>,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_ms: 1_000,
            max_backoff_ms: 120_000,
            statuses: vec![500, 502, 503, 504],
            timeout_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".jira2bitrix")
        .join("config.toml")
}

/// Load the optional TOML file, apply environment overrides, validate.
///
/// An explicitly given path must exist; the default location may be absent.
/// Overrides come from the process environment first, then from a `.env`
/// file found in the working directory or one of its parents. Source
/// credentials are only required when `needs_source` is set.
pub fn load_config(path: Option<&Path>, needs_source: bool) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => {
            let path = default_config_path();
            if path.exists() {
                read_file(&path)?
            } else {
                AppConfig::default()
            }
        }
    };
    let dotenv = dotenvy::dotenv_iter().map(env_pairs).unwrap_or_default();
    apply_env(&mut config, overlay(|name| std::env::var(name).ok(), dotenv))?;
    config.validate(needs_source)?;
    Ok(config)
}

fn env_pairs(iter: dotenvy::Iter<std::fs::File>) -> HashMap<String, String> {
    iter.filter_map(|pair| match pair {
        Ok(pair) => Some(pair),
        Err(err) => {
            tracing::warn!(error = %err, "skipping malformed .env line");
            None
        }
    })
    .collect()
}

/// Look a variable up in `primary`, falling back to `fallback` when it is
/// unset or blank there.
fn overlay(
    primary: impl Fn(&str) -> Option<String>,
    fallback: HashMap<String, String>,
) -> impl Fn(&str) -> Option<String> {
    move |name| {
        primary(name)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| fallback.get(name).cloned())
    }
}

fn read_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Overlay environment variables (looked up through `var`) onto `config`.
pub fn apply_env(config: &mut AppConfig, var: impl Fn(&str) -> Option<String>) -> Result<()> {
    let text = |name: &str| var(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = text("JIRA_URL") {
        config.jira.url = v;
    }
    if let Some(v) = text("JIRA_USER") {
        config.jira.user = v;
    }
    if let Some(v) = text("JIRA_TOKEN") {
        config.jira.token = v;
    }
    if let Some(v) = text("JIRA_VERIFY_SSL") {
        config.jira.verify_ssl = parse_bool("JIRA_VERIFY_SSL", &v)?;
    }
    if let Some(v) = text("MAX_RESULTS") {
        config.jira.max_results = parse_num("MAX_RESULTS", &v)?;
    }
    if let Some(v) = text("BITRIX_WEBHOOK") {
        config.bitrix.webhook = v;
    }
    if let Some(v) = text("BITRIX_DEPARTMENT") {
        config.bitrix.department_id = parse_num("BITRIX_DEPARTMENT", &v)?;
    }
    if let Some(v) = text("RETRY_MAX") {
        config.retry.max_retries = parse_num("RETRY_MAX", &v)?;
    }
    if let Some(v) = text("RETRY_BACKOFF_MS") {
        config.retry.backoff_ms = parse_num("RETRY_BACKOFF_MS", &v)?;
    }
    if let Some(v) = text("HTTP_TIMEOUT_SECS") {
        config.retry.timeout_secs = parse_num("HTTP_TIMEOUT_SECS", &v)?;
    }
    Ok(())
}

fn parse_num<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .with_context(|| format!("Invalid number in {name}: {raw:?}"))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("Invalid boolean in {name}: {raw:?}"),
    }
}

impl AppConfig {
    /// Check required values. Listing target workgroups never touches the
    /// source, so its credentials are optional then.
    pub fn validate(&self, needs_source: bool) -> Result<()> {
        let mut missing = Vec::new();
        if needs_source {
            if self.jira.url.is_empty() {
                missing.push("JIRA_URL");
            }
            if self.jira.user.is_empty() {
                missing.push("JIRA_USER");
            }
            if self.jira.token.is_empty() {
                missing.push("JIRA_TOKEN");
            }
        }
        if self.bitrix.webhook.is_empty() {
            missing.push("BITRIX_WEBHOOK");
        }
        if !missing.is_empty() {
            bail!("Missing configuration: {}", missing.join(", "));
        }
        if self.jira.max_results == 0 {
            bail!("MAX_RESULTS must be positive");
        }
        Ok(())
    }
}
