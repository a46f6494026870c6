use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::{BotConfig, DEFAULT_CACHE_ROOT, load_config};

pub const CONFIG_FILENAME: &str = "fastilybot.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config: Option<PathBuf>,
    pub cache_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedRuntime {
    pub config: BotConfig,
    pub config_path: PathBuf,
    pub cache_root: PathBuf,
    pub config_source: ValueSource,
    pub cache_source: ValueSource,
}

impl ResolvedRuntime {
    pub fn diagnostics(&self) -> String {
        [
            format!(
                "config_path={} ({})",
                normalize_for_display(&self.config_path),
                self.config_source.as_str()
            ),
            format!(
                "cache_root={} ({})",
                normalize_for_display(&self.cache_root),
                self.cache_source.as_str()
            ),
            format!("domain={}", self.config.domain()),
            format!("commons_domain={}", self.config.commons_domain()),
            format!("reports_url={}", self.config.reports_url()),
            format!("report_ttl_secs={}", self.config.report_ttl().as_secs()),
            format!("query_ttl_secs={}", self.config.query_ttl().as_secs()),
        ]
        .join("\n")
    }
}

pub fn resolve_runtime(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedRuntime> {
    resolve_runtime_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_runtime_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedRuntime>
where
    F: Fn(&str) -> Option<String>,
{
    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = nonempty(lookup_env("FASTILYBOT_CONFIG")) {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (context.cwd.join(CONFIG_FILENAME), ValueSource::Default)
    };

    let config = load_config(&config_path)?;

    let (cache_root, cache_source) = if let Some(path) = overrides.cache_root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = nonempty(lookup_env("FASTILYBOT_CACHE_ROOT")) {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else if let Some(path) = config.cache.root.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Config)
    } else {
        (PathBuf::from(DEFAULT_CACHE_ROOT), ValueSource::Default)
    };

    Ok(ResolvedRuntime {
        config,
        config_path,
        cache_root,
        config_source,
        cache_source,
    })
}

fn nonempty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
