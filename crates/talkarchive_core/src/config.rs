use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::mediawiki::WikiApi;
use crate::template::{self, TemplateError};

pub const DEFAULT_USER_AGENT: &str = "talkarchive/0.1";
pub const DEFAULT_SETTINGS_PATH: &str = ".talkarchive/config.toml";

/// Local bot settings, read from TOML with environment overrides.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotSettings {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub bot: BotSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotSection {
    /// Title of the on-wiki page holding the JSON archive config.
    pub config_page: Option<String>,
}

impl BotSettings {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn api_url(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| non_blank(self.wiki.api_url.as_deref()))
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| non_blank(self.wiki.user_agent.as_deref()))
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the config page title: env TALKARCHIVE_CONFIG_PAGE > config > None.
    pub fn config_page(&self) -> Option<String> {
        env_override("TALKARCHIVE_CONFIG_PAGE")
            .or_else(|| non_blank(self.bot.config_page.as_deref()))
    }
}

/// Settings file location: env TALKARCHIVE_CONFIG > `<cwd>/.talkarchive/config.toml`.
pub fn settings_path(cwd: &Path) -> PathBuf {
    match env_override("TALKARCHIVE_CONFIG") {
        Some(path) => cwd.join(path),
        None => cwd.join(DEFAULT_SETTINGS_PATH),
    }
}

/// Load and parse BotSettings from a TOML file. Returns default if file doesn't exist.
pub fn load_settings(path: &Path) -> Result<BotSettings> {
    if !path.exists() {
        return Ok(BotSettings::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: BotSettings =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config page {page} is empty or does not exist")]
    EmptyPage { page: String },
    #[error("config page {page} is not valid archive config JSON: {source}")]
    InvalidJson {
        page: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("config field `{field}` must not be empty")]
    EmptyField { field: &'static str },
    #[error("config field `{field}` is not a usable template: {source}")]
    InvalidTemplate {
        field: &'static str,
        #[source]
        source: TemplateError,
    },
}

/// Run configuration published on-wiki as JSON.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ArchiveConfig {
    pub enable: bool,
    pub main_page_name: String,
    /// Archive title template; `{0}` is the year and `{1}` the month.
    pub archive_page_name: String,
    /// Edit summary for the talk page; `{0}` is the archived section count.
    pub main_page_summary: String,
    /// Edit summary for the archive page; `{0}` is the archived section count.
    pub archive_page_summary: String,
}

impl ArchiveConfig {
    pub fn load<A: WikiApi>(api: &mut A, page: &str) -> Result<Self> {
        let text = api
            .read_page(page)
            .with_context(|| format!("failed to read config page {page}"))?;
        let config = Self::parse(page, &text)?;
        debug!(
            "config: {}",
            serde_json::to_string_pretty(&config).context("failed to render config")?
        );
        Ok(config)
    }

    pub fn parse(page: &str, text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Err(ConfigError::EmptyPage {
                page: page.to_string(),
            });
        }
        let config: Self =
            serde_json::from_str(text).map_err(|source| ConfigError::InvalidJson {
                page: page.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.main_page_name.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                field: "main_page_name",
            });
        }
        if self.archive_page_name.trim().is_empty() {
            return Err(ConfigError::EmptyField {
                field: "archive_page_name",
            });
        }
        for (field, value, arity) in [
            ("archive_page_name", &self.archive_page_name, 2),
            ("main_page_summary", &self.main_page_summary, 1),
            ("archive_page_summary", &self.archive_page_summary, 1),
        ] {
            template::validate(value, arity)
                .map_err(|source| ConfigError::InvalidTemplate { field, source })?;
        }
        Ok(())
    }

    pub fn archive_page_title(&self, year: i32, month: u32) -> Result<String, TemplateError> {
        template::render(
            &self.archive_page_name,
            &[i64::from(year), i64::from(month)],
        )
    }

    pub fn main_summary(&self, archived: usize) -> Result<String, TemplateError> {
        template::render(&self.main_page_summary, &[count_arg(archived)])
    }

    pub fn archive_summary(&self, archived: usize) -> Result<String, TemplateError> {
        template::render(&self.archive_page_summary, &[count_arg(archived)])
    }
}

fn count_arg(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| non_blank(Some(&value)))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
