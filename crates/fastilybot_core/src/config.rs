use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "fastilybot/2.2 (+https://github.com/fastily/fastilybot)";
pub const DEFAULT_DOMAIN: &str = "en.wikipedia.org";
pub const DEFAULT_COMMONS_DOMAIN: &str = "commons.wikimedia.org";
pub const DEFAULT_USERNAME: &str = "FastilyBot";
pub const DEFAULT_CACHE_ROOT: &str = "/tmp/fastilybot";
pub const DEFAULT_REPORTS_URL: &str = "https://fastilybot-reports.toolforge.org/r/";
pub const DEFAULT_REPORT_TTL_HOURS: u64 = 24;
pub const DEFAULT_QUERY_TTL_MINUTES: u64 = 10;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub reports: ReportsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub domain: Option<String>,
    pub api_url: Option<String>,
    pub commons_domain: Option<String>,
    pub user_agent: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CacheSection {
    pub root: Option<PathBuf>,
    pub report_ttl_hours: Option<u64>,
    pub query_ttl_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ReportsSection {
    pub base_url: Option<String>,
}

impl BotConfig {
    pub fn domain(&self) -> String {
        self.wiki
            .domain
            .clone()
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string())
    }

    pub fn commons_domain(&self) -> String {
        self.wiki
            .commons_domain
            .clone()
            .unwrap_or_else(|| DEFAULT_COMMONS_DOMAIN.to_string())
    }

    /// Resolve the wiki API URL: env WIKI_API_URL > config > derived from the domain.
    pub fn api_url(&self) -> String {
        if let Some(value) = env_nonempty("WIKI_API_URL") {
            return value;
        }
        self.wiki
            .api_url
            .clone()
            .unwrap_or_else(|| api_url_for_domain(&self.domain()))
    }

    pub fn commons_api_url(&self) -> String {
        api_url_for_domain(&self.commons_domain())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        if let Some(value) = env_nonempty("WIKI_USER_AGENT") {
            return value;
        }
        self.wiki
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn username(&self) -> String {
        self.wiki
            .username
            .clone()
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string())
    }

    /// Resolve the remote report endpoint: env FASTILYBOT_REPORTS_URL > config > default.
    pub fn reports_url(&self) -> String {
        if let Some(value) = env_nonempty("FASTILYBOT_REPORTS_URL") {
            return value;
        }
        self.reports
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_REPORTS_URL.to_string())
    }

    pub fn report_ttl(&self) -> Duration {
        let hours = self
            .cache
            .report_ttl_hours
            .unwrap_or(DEFAULT_REPORT_TTL_HOURS);
        Duration::from_secs(hours.saturating_mul(3600))
    }

    pub fn query_ttl(&self) -> Duration {
        let minutes = self
            .cache
            .query_ttl_minutes
            .unwrap_or(DEFAULT_QUERY_TTL_MINUTES);
        Duration::from_secs(minutes.saturating_mul(60))
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn api_url_for_domain(domain: &str) -> String {
    format!("https://{}/w/api.php", domain.trim().trim_end_matches('/'))
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
