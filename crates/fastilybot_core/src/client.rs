use std::collections::HashMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::BotConfig;
use crate::title::{Namespace, Title};

const TITLE_BATCH_SIZE: usize = 50;

/// Read side of a wiki. Every call blocks until the API has answered.
pub trait WikiReadApi {
    fn domain(&self) -> &str;
    fn category_members(&mut self, title: &Title, namespaces: &[Namespace])
    -> Result<Vec<Title>>;
    fn what_transcludes_here(
        &mut self,
        title: &Title,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>>;
    /// Wikilinks on `title`. A page that does not exist has no links.
    fn links_on_page(&mut self, title: &Title, namespaces: &[Namespace]) -> Result<Vec<Title>>;
    fn exists(&mut self, titles: &[Title]) -> Result<HashMap<Title, bool>>;
    /// Categories each page is in, hidden ones included.
    fn categories_on_page(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>>;
    /// Templates each page transcludes.
    fn templates_on_page(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>>;
    /// Pages linking to each title.
    fn what_links_here(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>>;
    /// Current wikitext of each page that exists. Missing pages are left out.
    fn page_text(&mut self, titles: &[Title]) -> Result<HashMap<Title, String>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEdit {
    Replace(String),
    Append(String),
    Prepend(String),
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn edit(&mut self, title: &Title, edit: &PageEdit, summary: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub domain: String,
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
    pub fn from_config(config: &BotConfig) -> Self {
        Self::with_endpoint(&config.domain(), &config.api_url(), &config.user_agent())
    }

    pub fn commons_from_config(config: &BotConfig) -> Self {
        Self::with_endpoint(
            &config.commons_domain(),
            &config.commons_api_url(),
            &config.user_agent(),
        )
    }

    fn with_endpoint(domain: &str, api_url: &str, user_agent: &str) -> Self {
        Self {
            domain: domain.to_string(),
            api_url: api_url.to_string(),
            user_agent: user_agent.to_string(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Get,
    Post,
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
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
        })
    }

    /// One API round trip. Retryable statuses and transport errors are retried with
    /// backoff up to the read or write budget; API-level errors are never retried.
    fn request_json(
        &mut self,
        verb: Verb,
        params: &[(String, String)],
        is_write: bool,
    ) -> Result<Value> {
        let budget = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let pairs = with_format_params(params);

        let mut attempt = 0;
        loop {
            self.throttle(is_write);
            let request = match verb {
                Verb::Get => self.client.get(&self.config.api_url).query(&pairs),
                Verb::Post => self.client.post(&self.config.api_url).form(&pairs),
            };
            let failure = match request
                .header("User-Agent", self.config.user_agent.as_str())
                .send()
            {
                Ok(response) if response.status().is_success() => {
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    check_api_error(&payload)?;
                    return Ok(payload);
                }
                Ok(response) => {
                    let status = response.status();
                    if attempt >= budget || !is_retryable_status(status) {
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    format!("HTTP {status}")
                }
                Err(error) => {
                    if attempt >= budget || !is_retryable_error(&error) {
                        return Err(error).context("failed to call MediaWiki API");
                    }
                    error.to_string()
                }
            };

            let delay = self.retry_delay(attempt, is_write);
            debug!(
                "MediaWiki request failed ({failure}), retry {} in {}ms",
                attempt + 1,
                delay.as_millis()
            );
            sleep(delay);
            attempt += 1;
        }
    }

    fn get(&mut self, params: &[(String, String)]) -> Result<Value> {
        self.request_json(Verb::Get, params, false)
    }

    fn post_write(&mut self, params: &[(String, String)]) -> Result<Value> {
        self.request_json(Verb::Post, params, true)
    }

    fn throttle(&mut self, is_write: bool) {
        let gap = Duration::from_millis(if is_write {
            self.config.rate_limit_write_ms
        } else {
            self.config.rate_limit_read_ms
        });
        if let Some(elapsed) = self.last_request_at.map(|last| last.elapsed())
            && elapsed < gap
        {
            sleep(gap - elapsed);
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    /// Exponential backoff from `retry_delay_ms` plus up to 99ms of jitter. Writes wait twice
    /// as long.
    fn retry_delay(&self, attempt: usize, is_write: bool) -> Duration {
        let factor = 2u64.saturating_pow(u32::try_from(attempt).unwrap_or(16));
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(factor)
            .saturating_mul(if is_write { 2 } else { 1 });
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|now| u64::from(now.subsec_millis() % 100))
            .unwrap_or(0);
        Duration::from_millis(base.saturating_add(jitter))
    }

    fn fetch_token(&mut self, kind: &str) -> Result<String> {
        let response = self.get(&params(&[
            ("action", "query"),
            ("meta", "tokens"),
            ("type", kind),
        ]))?;
        let parsed: TokenQueryResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode {kind} token response"))?;
        let tokens = parsed.query.tokens.unwrap_or_default();
        let token = if kind == "login" {
            tokens.logintoken
        } else {
            tokens.csrftoken
        };
        token.ok_or_else(|| anyhow!("MediaWiki returned no {kind} token"))
    }

    fn csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let token = self.fetch_token("csrf")?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    /// A `prop=` query over `titles` in batches, with each page's values keyed by the title
    /// the caller asked for. Pages the API did not return map to an empty list.
    fn page_props<T>(
        &mut self,
        titles: &[Title],
        base: &[(&str, &str)],
        what: &str,
        mut extract: impl FnMut(PageQueryItem) -> Vec<T>,
    ) -> Result<HashMap<Title, Vec<T>>> {
        let mut output = HashMap::with_capacity(titles.len());
        for batch in titles.chunks(TITLE_BATCH_SIZE) {
            let joined = batch
                .iter()
                .map(Title::as_str)
                .collect::<Vec<_>>()
                .join("|");
            let mut request = params(base);
            request.push(("titles".to_string(), joined));

            let mut normalized = HashMap::new();
            let mut by_page: HashMap<String, Vec<T>> = HashMap::new();
            self.query_all(request, what, |query| {
                normalized.extend(query.normalized.into_iter().map(|item| (item.from, item.to)));
                for page in query.pages {
                    let title = page.title.clone();
                    by_page.entry(title).or_default().extend(extract(page));
                }
            })?;

            for title in batch {
                let canonical = normalized
                    .get(title.as_str())
                    .map(String::as_str)
                    .unwrap_or(title.as_str());
                let values = by_page.remove(canonical).unwrap_or_default();
                output.insert(title.clone(), values);
            }
        }
        Ok(output)
    }

    /// Run a list/prop query to exhaustion, following every `continue` block.
    fn query_all(
        &mut self,
        base: Vec<(String, String)>,
        what: &str,
        mut collect: impl FnMut(QueryPayload),
    ) -> Result<()> {
        let mut request = base.clone();
        loop {
            let response = self.get(&request)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .with_context(|| format!("failed to decode {what} API response"))?;
            collect(parsed.query);

            let continuation = match parsed.continuation {
                Some(continuation) if !continuation.is_empty() => continuation,
                _ => break,
            };
            request = base.clone();
            request.extend(
                continuation
                    .into_iter()
                    .map(|(key, value)| (key, continuation_value(value))),
            );
        }
        Ok(())
    }
}

impl WikiReadApi for MediaWikiClient {
    fn domain(&self) -> &str {
        &self.config.domain
    }

    fn category_members(
        &mut self,
        title: &Title,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>> {
        let mut request = params(&[
            ("action", "query"),
            ("list", "categorymembers"),
            ("cmtitle", title.as_str()),
            ("cmlimit", "max"),
        ]);
        if !namespaces.is_empty() {
            request.push(("cmnamespace".to_string(), namespace_param(namespaces)));
        }

        let mut titles = Vec::new();
        self.query_all(request, "categorymembers", |query| {
            titles.extend(query.categorymembers.into_iter().map(|item| Title::new(item.title)));
        })?;
        debug!("{} has {} members", title, titles.len());
        Ok(titles)
    }

    fn what_transcludes_here(
        &mut self,
        title: &Title,
        namespaces: &[Namespace],
    ) -> Result<Vec<Title>> {
        let mut request = params(&[
            ("action", "query"),
            ("list", "embeddedin"),
            ("eititle", title.as_str()),
            ("eilimit", "max"),
        ]);
        if !namespaces.is_empty() {
            request.push(("einamespace".to_string(), namespace_param(namespaces)));
        }

        let mut titles = Vec::new();
        self.query_all(request, "embeddedin", |query| {
            titles.extend(query.embeddedin.into_iter().map(|item| Title::new(item.title)));
        })?;
        Ok(titles)
    }

    fn links_on_page(&mut self, title: &Title, namespaces: &[Namespace]) -> Result<Vec<Title>> {
        let mut request = params(&[
            ("action", "query"),
            ("prop", "links"),
            ("titles", title.as_str()),
            ("pllimit", "max"),
        ]);
        if !namespaces.is_empty() {
            request.push(("plnamespace".to_string(), namespace_param(namespaces)));
        }

        let mut titles = Vec::new();
        self.query_all(request, "links", |query| {
            for page in query.pages {
                titles.extend(page.links.into_iter().map(|link| Title::new(link.title)));
            }
        })?;
        Ok(titles)
    }

    fn exists(&mut self, titles: &[Title]) -> Result<HashMap<Title, bool>> {
        let mut output = HashMap::with_capacity(titles.len());
        for batch in titles.chunks(TITLE_BATCH_SIZE) {
            let joined = batch
                .iter()
                .map(Title::as_str)
                .collect::<Vec<_>>()
                .join("|");
            let response = self.get(&params(&[("action", "query"), ("titles", joined.as_str())]))?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode page existence response")?;

            let normalized = parsed
                .query
                .normalized
                .into_iter()
                .map(|item| (item.from, item.to))
                .collect::<HashMap<_, _>>();
            let present = parsed
                .query
                .pages
                .into_iter()
                .map(|page| {
                    let exists = !page.missing.unwrap_or(false) && !page.invalid.unwrap_or(false);
                    (page.title, exists)
                })
                .collect::<HashMap<_, _>>();

            for title in batch {
                let canonical = normalized
                    .get(title.as_str())
                    .map(String::as_str)
                    .unwrap_or(title.as_str());
                let exists = present.get(canonical).copied().unwrap_or(false);
                output.insert(title.clone(), exists);
            }
        }
        Ok(output)
    }

    fn categories_on_page(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        self.page_props(
            titles,
            &[("action", "query"), ("prop", "categories"), ("cllimit", "max")],
            "categories",
            |page| page.categories.into_iter().map(|item| Title::new(item.title)).collect(),
        )
    }

    fn templates_on_page(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        self.page_props(
            titles,
            &[("action", "query"), ("prop", "templates"), ("tllimit", "max")],
            "templates",
            |page| page.templates.into_iter().map(|item| Title::new(item.title)).collect(),
        )
    }

    fn what_links_here(&mut self, titles: &[Title]) -> Result<HashMap<Title, Vec<Title>>> {
        self.page_props(
            titles,
            &[
                ("action", "query"),
                ("prop", "linkshere"),
                ("lhprop", "title"),
                ("lhlimit", "max"),
            ],
            "linkshere",
            |page| page.linkshere.into_iter().map(|item| Title::new(item.title)).collect(),
        )
    }

    fn page_text(&mut self, titles: &[Title]) -> Result<HashMap<Title, String>> {
        let texts: HashMap<Title, Vec<String>> = self.page_props(
            titles,
            &[
                ("action", "query"),
                ("prop", "revisions"),
                ("rvprop", "content"),
                ("rvslots", "main"),
            ],
            "revisions",
            |page| {
                page.revisions
                    .into_iter()
                    .filter_map(|revision| revision.slots.main.content)
                    .collect()
            },
        )?;
        Ok(texts
            .into_iter()
            .filter_map(|(title, contents)| contents.into_iter().next().map(|text| (title, text)))
            .collect())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let login_token = self.fetch_token("login")?;
        let login_response = self.post_write(&params(&[
            ("action", "login"),
            ("lgname", username),
            ("lgpassword", password),
            ("lgtoken", login_token.as_str()),
        ]))?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
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

    fn edit(&mut self, title: &Title, edit: &PageEdit, summary: &str) -> Result<()> {
        let token = self.csrf_token()?;
        let (field, text) = match edit {
            PageEdit::Replace(text) => ("text", text),
            PageEdit::Append(text) => ("appendtext", text),
            PageEdit::Prepend(text) => ("prependtext", text),
        };
        let response = self.post_write(&params(&[
            ("action", "edit"),
            ("title", title.as_str()),
            (field, text.as_str()),
            ("summary", summary),
            ("bot", "1"),
            ("token", token.as_str()),
        ]))?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let result = edit_payload
            .edit
            .ok_or_else(|| anyhow!("missing edit payload in API response"))?
            .result;
        if result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }
}

fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

fn with_format_params(params: &[(String, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push((key.clone(), value.clone()));
        }
    }
    pairs
}

fn namespace_param(namespaces: &[Namespace]) -> String {
    namespaces
        .iter()
        .map(|ns| ns.id().to_string())
        .collect::<Vec<_>>()
        .join("|")
}

fn continuation_value(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
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
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    categorymembers: Vec<TitleQueryItem>,
    #[serde(default)]
    embeddedin: Vec<TitleQueryItem>,
    #[serde(default)]
    normalized: Vec<NormalizedItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct NormalizedItem {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    links: Vec<TitleQueryItem>,
    #[serde(default)]
    categories: Vec<TitleQueryItem>,
    #[serde(default)]
    templates: Vec<TitleQueryItem>,
    #[serde(default)]
    linkshere: Vec<TitleQueryItem>,
    #[serde(default)]
    revisions: Vec<RevisionItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    #[serde(default)]
    slots: RevisionSlots,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionSlots {
    #[serde(default)]
    main: RevisionSlot,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionSlot {
    content: Option<String>,
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
}
