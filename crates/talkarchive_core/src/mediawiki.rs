use std::collections::HashMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::BotSettings;

pub trait WikiApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    /// Current wikitext of `title`; a page that does not exist reads as empty.
    ///
    /// A later `write_page` of the same title fails with an edit conflict if the
    /// page changed (or was created) after this read.
    fn read_page(&mut self, title: &str) -> Result<String>;
    fn write_page(&mut self, title: &str, text: &str, summary: &str, minor: bool) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let username = required_env("WIKI_BOT_USER")?;
        let password = required_env("WIKI_BOT_PASS")?;
        Ok(Self { username, password })
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_settings(settings: &BotSettings) -> Result<Self> {
        let api_url = settings.api_url().ok_or_else(|| {
            anyhow::anyhow!("no wiki API URL configured; set [wiki].api_url or WIKI_API_URL")
        })?;
        Url::parse(&api_url).with_context(|| format!("invalid wiki API URL: {api_url}"))?;

        Ok(Self {
            api_url,
            user_agent: settings.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 0),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        })
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
    read_stamps: HashMap<String, ReadStamp>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
            read_stamps: HashMap::new(),
        })
    }

    fn request_json(&mut self, params: &[(&str, String)], method: RequestMethod) -> Result<Value> {
        let max_retries = match method {
            RequestMethod::Write => self.config.max_write_retries,
            RequestMethod::Read | RequestMethod::ReadPost => self.config.max_retries,
        };
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            pairs.push(((*key).to_string(), value.clone()));
        }

        for attempt in 0..=max_retries {
            self.apply_rate_limit(method);
            let request = match method {
                RequestMethod::Read => self.client.get(&self.config.api_url).query(&pairs),
                RequestMethod::ReadPost | RequestMethod::Write => {
                    self.client.post(&self.config.api_url).form(&pairs)
                }
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, method);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    check_api_error(&payload)?;
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, method);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, method: RequestMethod) {
        let delay = Duration::from_millis(match method {
            RequestMethod::Write => self.config.rate_limit_write_ms,
            RequestMethod::Read | RequestMethod::ReadPost => self.config.rate_limit_read_ms,
        });
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, method: RequestMethod) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if method == RequestMethod::Write { 2u64 } else { 1u64 };
        let delay = base.saturating_mul(multiplier).saturating_add(jitter);
        debug!(attempt, delay_ms = delay, "retrying MediaWiki request");
        sleep(Duration::from_millis(delay));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
            ],
            RequestMethod::Read,
        )?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
            RequestMethod::Read,
        )?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            RequestMethod::ReadPost,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                debug!(user = username, "logged in");
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn read_page(&mut self, title: &str) -> Result<String> {
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content|timestamp".to_string()),
                ("rvslots", "main".to_string()),
                ("curtimestamp", "1".to_string()),
            ],
            RequestMethod::Read,
        )?;
        let snapshot = page_snapshot_from_response(response)
            .with_context(|| format!("failed to decode page content for {title}"))?;
        self.read_stamps.insert(title.to_string(), snapshot.stamp);
        Ok(snapshot.text)
    }

    fn write_page(&mut self, title: &str, text: &str, summary: &str, minor: bool) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let params = edit_params(title, text, summary, minor, self.read_stamps.get(title), token);
        let response = self.request_json(&params, RequestMethod::Write)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        self.read_stamps.remove(title);
        debug!(title, new_revision = ?edit.newrevid, "saved page");
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestMethod {
    Read,
    /// POST that does not change wiki content (login).
    ReadPost,
    Write,
}

/// Revision state observed when a page was read, replayed on edit for conflict detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ReadStamp {
    /// Timestamp of the revision that was read; `None` when the page did not exist.
    base: Option<String>,
    /// Server time of the read.
    start: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PageSnapshot {
    text: String,
    stamp: ReadStamp,
}

fn edit_params(
    title: &str,
    text: &str,
    summary: &str,
    minor: bool,
    stamp: Option<&ReadStamp>,
    token: String,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("action", "edit".to_string()),
        ("title", title.to_string()),
        ("text", text.to_string()),
        ("summary", summary.to_string()),
        ("bot", "1".to_string()),
        (if minor { "minor" } else { "notminor" }, "1".to_string()),
    ];
    if let Some(stamp) = stamp {
        match &stamp.base {
            Some(base) => params.push(("basetimestamp", base.clone())),
            None => params.push(("createonly", "1".to_string())),
        }
        if let Some(start) = &stamp.start {
            params.push(("starttimestamp", start.clone()));
        }
    }
    params.push(("token", token));
    params
}

fn page_snapshot_from_response(response: Value) -> Result<PageSnapshot> {
    let parsed: QueryResponse = serde_json::from_value(response)?;
    let mut snapshot = PageSnapshot {
        text: String::new(),
        stamp: ReadStamp {
            base: None,
            start: parsed.curtimestamp,
        },
    };
    let Some(page) = parsed.query.pages.into_iter().next() else {
        return Ok(snapshot);
    };
    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
        return Ok(snapshot);
    }
    if let Some(revision) = page.revisions.into_iter().next() {
        snapshot.stamp.base = revision.timestamp;
        snapshot.text = revision
            .slots
            .and_then(|slots| slots.main)
            .map(|slot| slot.content)
            .unwrap_or_default();
    }
    Ok(snapshot)
}

fn check_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(())
}

fn required_env(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => bail!("{key} is required to log in"),
    }
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    curtimestamp: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: Option<String>,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    newrevid: Option<i64>,
}
