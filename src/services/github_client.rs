//! GitHub API client.
//!
//! HTTP client for the GitHub REST v3 issues API, with conditional requests
//! backed by the response cache, `Link` header pagination, and retry with
//! backoff driven by a shared [`RateLimitContext`]. Project-board values are
//! read through the GraphQL endpoint.

use crate::db::pool::DbPool;
use crate::db::response_cache;
use crate::error::SyncError;
use crate::models::issue::{CreatedIssue, IssueFields, IssuePatch, IssueState, RemoteIssueSnapshot};
use crate::services::rate_limit::{self, RateLimitContext, RetryPolicy};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// GitHub API client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubClientConfig {
    /// REST API root (e.g., `https://api.github.com`).
    pub base_url: String,

    /// GraphQL endpoint, used for project-board fields.
    pub graphql_url: String,

    /// Repository owner (user or organization).
    pub owner: String,

    /// Repository name.
    pub repo: String,

    /// Personal access token for authentication.
    #[serde(skip_serializing)]
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Page size for listings (max 100).
    pub per_page: u32,

    /// Projects v2 board number whose fields are pulled into front matter.
    pub project_number: Option<i64>,

    pub retry: RetryPolicy,
}

impl Default for GitHubClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            graphql_url: "https://api.github.com/graphql".to_string(),
            owner: String::new(),
            repo: String::new(),
            token: String::new(),
            timeout_secs: 30,
            per_page: 100,
            project_number: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Filter for listing issues.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueFilter {
    /// `open`, `closed` or `all` (default `all`).
    pub state: Option<String>,

    /// Only issues updated at or after this time.
    pub since: Option<DateTime<Utc>>,

    /// Only issues carrying all of these labels.
    pub labels: Vec<String>,

    pub per_page: Option<u32>,

    /// Page to start from; lets a caller restart a listing midway.
    pub start_page: Option<u32>,
}

impl IssueFilter {
    /// Filter for every issue updated since the cutoff.
    pub fn since(cutoff: Option<DateTime<Utc>>) -> Self {
        Self {
            since: cutoff,
            ..Default::default()
        }
    }
}

/// GitHub issue from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubIssue {
    pub number: i64,
    pub html_url: String,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
    pub milestone: Option<GitHubMilestone>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present when the "issue" is actually a pull request.
    pub pull_request: Option<serde_json::Value>,
}

impl GitHubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    fn fields(&self) -> IssueFields {
        IssueFields {
            title: self.title.clone(),
            body: self.body.clone().unwrap_or_default(),
            labels: self.labels.iter().map(|l| l.name.clone()).collect(),
            assignees: self.assignees.iter().map(|a| a.login.clone()).collect(),
            milestone: self.milestone.as_ref().map(|m| m.title.clone()),
            state: IssueState::from(self.state.as_str()),
            project_fields: BTreeMap::new(),
        }
        .normalized()
    }

    fn into_snapshot(self, etag: Option<String>, from_cache: bool) -> RemoteIssueSnapshot {
        RemoteIssueSnapshot {
            number: self.number,
            fields: self.fields(),
            url: self.html_url,
            updated_at: self.updated_at,
            etag,
            from_cache,
        }
    }
}

/// GitHub label from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

/// GitHub user from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

/// GitHub milestone from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubMilestone {
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub state: String,
}

/// Body of a create or update request. Unset fields are omitted.
#[derive(Debug, Default, Serialize)]
struct IssueWriteBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignees: Option<Vec<String>>,
    /// `Some(None)` serializes as `null`, which clears the milestone.
    #[serde(skip_serializing_if = "Option::is_none")]
    milestone: Option<Option<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<String>,
}

/// One page of an issue listing.
struct IssuePage {
    issues: Vec<RemoteIssueSnapshot>,
    next: Option<String>,
}

/// A response body with the validator it came with.
struct FetchedBody {
    body: String,
    etag: Option<String>,
    next_link: Option<String>,
    from_cache: bool,
}

/// Outcome of a conditional GET.
enum Conditional {
    /// 304 for the validator the caller already held in memory.
    Unchanged,
    Body(FetchedBody),
}

/// Issues decoded from one cached response, reused while its ETag holds.
#[derive(Debug, Clone)]
struct DecodedPage {
    etag: String,
    issues: Arc<Vec<RemoteIssueSnapshot>>,
    next_link: Option<String>,
}

const PROJECT_FIELDS_QUERY: &str = r#"
query($owner: String!, $repo: String!, $number: Int!) {
  repository(owner: $owner, name: $repo) {
    issue(number: $number) {
      projectItems(first: 20) {
        nodes {
          project { number }
          fieldValues(first: 50) {
            nodes {
              ... on ProjectV2ItemFieldTextValue { text field { ... on ProjectV2FieldCommon { name } } }
              ... on ProjectV2ItemFieldNumberValue { number field { ... on ProjectV2FieldCommon { name } } }
              ... on ProjectV2ItemFieldDateValue { date field { ... on ProjectV2FieldCommon { name } } }
              ... on ProjectV2ItemFieldSingleSelectValue { name field { ... on ProjectV2FieldCommon { name } } }
              ... on ProjectV2ItemFieldIterationValue { title field { ... on ProjectV2FieldCommon { name } } }
            }
          }
        }
      }
    }
  }
}
"#;

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
    cache: Option<DbPool>,
    /// Milestone title to number, loaded on first use.
    milestones: Arc<Mutex<Option<HashMap<String, i64>>>>,
    /// Decoded issue responses by URL.
    decoded: Arc<Mutex<HashMap<String, DecodedPage>>>,
}

impl GitHubClient {
    /// Create a new GitHub client.
    pub fn new(config: GitHubClientConfig) -> Result<Self, SyncError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| SyncError::authentication("Invalid token format"))?;
        headers.insert(header::AUTHORIZATION, token_value);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            header::HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("issue-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            cache: None,
            milestones: Arc::new(Mutex::new(None)),
            decoded: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Use the state store's response cache for conditional requests.
    pub fn with_response_cache(mut self, pool: DbPool) -> Self {
        self.cache = Some(pool);
        self
    }

    pub fn config(&self) -> &GitHubClientConfig {
        &self.config
    }

    /// Get the full URL for a REST path.
    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn repo_path(&self, suffix: &str) -> String {
        format!(
            "/repos/{}/{}{}",
            urlencoding::encode(&self.config.owner),
            urlencoding::encode(&self.config.repo),
            suffix
        )
    }

    fn issues_url(&self, filter: &IssueFilter) -> String {
        let per_page = filter.per_page.unwrap_or(self.config.per_page).clamp(1, 100);
        let mut url = format!(
            "{}?state={}&per_page={}&page={}",
            self.api_url(&self.repo_path("/issues")),
            urlencoding::encode(filter.state.as_deref().unwrap_or("all")),
            per_page,
            filter.start_page.unwrap_or(1)
        );
        if let Some(since) = filter.since {
            url.push_str("&since=");
            url.push_str(&urlencoding::encode(
                &since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if !filter.labels.is_empty() {
            url.push_str("&labels=");
            url.push_str(&urlencoding::encode(&filter.labels.join(",")));
        }
        url
    }

    /// Endpoint key used for rate-limit bookkeeping: the URL path without query.
    fn endpoint_of(url: &str) -> String {
        let without_query = url.split('?').next().unwrap_or(url);
        match without_query.find("://") {
            Some(idx) => {
                let rest = &without_query[idx + 3..];
                rest.find('/').map(|i| rest[i..].to_string()).unwrap_or_else(|| "/".to_string())
            }
            None => without_query.to_string(),
        }
    }

    /// Parse the `rel="next"` target out of a `Link` header.
    pub fn parse_next_link(response_headers: &header::HeaderMap) -> Option<String> {
        let link = response_headers.get(header::LINK)?.to_str().ok()?;
        link.split(',').find_map(|part| {
            let mut pieces = part.split(';');
            let target = pieces.next()?.trim();
            let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
            if is_next && target.starts_with('<') && target.ends_with('>') {
                Some(target[1..target.len() - 1].to_string())
            } else {
                None
            }
        })
    }

    /// Send a request, retrying transient failures and rate limits.
    ///
    /// `build` is called once per attempt. The returned response may be any
    /// status other than a rate limit or a server error.
    async fn send_with_retry<F>(
        &self,
        ctx: &RateLimitContext,
        endpoint: &str,
        build: F,
    ) -> Result<Response, SyncError>
    where
        F: Fn() -> RequestBuilder,
    {
        let policy = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            ctx.wait_turn(endpoint).await;

            let response = match build().send().await {
                Ok(response) => response,
                Err(e) => {
                    let err = SyncError::from(e);
                    if err.is_retryable() && policy.should_retry(attempt) {
                        let delay = policy.calculate_retry_delay(attempt);
                        log::warn!(
                            "[github] {} failed ({}), retrying in {:?} (attempt {}/{})",
                            endpoint,
                            err,
                            delay,
                            attempt + 1,
                            policy.max_attempts
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = response.status();

            if rate_limit::is_rate_limited(status, response.headers()) {
                let mandated = rate_limit::mandated_wait(response.headers());
                let wait = mandated.unwrap_or_else(|| policy.calculate_retry_delay(attempt));

                if rate_limit::primary_quota_exhausted(response.headers()) {
                    ctx.block_all(wait).await;
                } else {
                    ctx.block_endpoint(endpoint, wait).await;
                }

                if policy.should_retry(attempt) {
                    log::warn!(
                        "[github] Rate limited on {} ({}), waiting {:?} (attempt {}/{})",
                        endpoint,
                        status.as_u16(),
                        wait,
                        attempt + 1,
                        policy.max_attempts
                    );
                    attempt += 1;
                    continue;
                }

                return Err(SyncError::rate_limited(
                    format!(
                        "{} still rate limited after {} attempts",
                        endpoint, policy.max_attempts
                    ),
                    Some(wait.as_secs().max(1)),
                ));
            }

            if status.is_server_error() {
                if policy.should_retry(attempt) {
                    let delay = policy.calculate_retry_delay(attempt);
                    log::warn!(
                        "[github] {} returned {}, retrying in {:?} (attempt {}/{})",
                        endpoint,
                        status.as_u16(),
                        delay,
                        attempt + 1,
                        policy.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                return Err(SyncError::transient(format!(
                    "{} returned {} after {} attempts",
                    endpoint,
                    status.as_u16(),
                    policy.max_attempts
                )));
            }

            return Ok(response);
        }
    }

    /// Map a non-success response to an error.
    async fn error_for_response(response: Response, endpoint: &str) -> SyncError {
        let status = response.status();
        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));

        match status {
            StatusCode::UNAUTHORIZED => SyncError::authentication(
                "GitHub token missing, expired or revoked. Please re-authenticate.",
            ),
            StatusCode::NOT_FOUND => SyncError::not_found_with_id("GitHub resource", endpoint),
            StatusCode::UNPROCESSABLE_ENTITY => SyncError::validation(
                body_message.unwrap_or_else(|| "Validation failed".to_string()),
            ),
            StatusCode::FORBIDDEN => {
                SyncError::remote_api_full("Access denied", status_code, endpoint)
            }
            _ => SyncError::remote_api_full(
                body_message
                    .unwrap_or_else(|| format!("Request failed ({}): {}", status_code, body)),
                status_code,
                endpoint,
            ),
        }
    }

    /// Handle API response errors and decode a JSON body.
    async fn handle_response<T: DeserializeOwned>(
        response: Response,
        endpoint: &str,
    ) -> Result<(T, Option<String>, String), SyncError> {
        if !response.status().is_success() {
            return Err(Self::error_for_response(response, endpoint).await);
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;
        let value = serde_json::from_str::<T>(&text)
            .map_err(|e| SyncError::internal(format!("Failed to parse response: {}", e)))?;

        Ok((value, etag, text))
    }

    /// GET with `If-None-Match`.
    ///
    /// The validator is `known_etag` when the caller holds the decoded
    /// response, else the response cache entry. A 304 on `known_etag` is
    /// [`Conditional::Unchanged`] and touches no body; a 304 on the cache
    /// entry returns the cached body. A 200 with an ETag refreshes the cache.
    async fn get_conditional(
        &self,
        ctx: &RateLimitContext,
        url: &str,
        known_etag: Option<&str>,
    ) -> Result<Conditional, SyncError> {
        let endpoint = Self::endpoint_of(url);
        let cached = match (&self.cache, known_etag) {
            (Some(pool), None) => response_cache::lookup(pool, url).await?,
            _ => None,
        };
        let validator = known_etag.or(cached.as_ref().map(|entry| entry.etag.as_str()));

        let response = self
            .send_with_retry(ctx, &endpoint, || {
                let mut request = self.client.get(url);
                if let Some(etag) = validator {
                    request = request.header(header::IF_NONE_MATCH, etag);
                }
                request
            })
            .await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            if known_etag.is_some() {
                log::debug!("[github] Not modified: {}", url);
                return Ok(Conditional::Unchanged);
            }
            if let Some(entry) = cached {
                log::debug!("[github] Cache hit for {}", url);
                return Ok(Conditional::Body(FetchedBody {
                    body: entry.body,
                    etag: Some(entry.etag),
                    next_link: entry.next_link,
                    from_cache: true,
                }));
            }
            return Err(SyncError::remote_api_full(
                "Not modified without a cached response",
                304,
                endpoint,
            ));
        }

        if !response.status().is_success() {
            return Err(Self::error_for_response(response, &endpoint).await);
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let next_link = Self::parse_next_link(response.headers());
        let body = response.text().await?;

        if let (Some(pool), Some(tag)) = (&self.cache, &etag) {
            response_cache::store(pool, url, tag, &body, next_link.as_deref()).await?;
        }

        Ok(Conditional::Body(FetchedBody {
            body,
            etag,
            next_link,
            from_cache: false,
        }))
    }

    /// Conditionally fetch the issues at `url`, decoding each response once.
    ///
    /// With the response cache enabled, a decoded response is kept in memory
    /// under its ETag; a later 304 for it reuses the snapshots as cache hits
    /// without reading or parsing a body. Pull requests are dropped.
    async fn fetch_issues(
        &self,
        ctx: &RateLimitContext,
        url: &str,
        decode: fn(&str) -> serde_json::Result<Vec<GitHubIssue>>,
    ) -> Result<(Vec<RemoteIssueSnapshot>, Option<String>, Option<String>), SyncError> {
        let remembered = match &self.cache {
            Some(_) => self.decoded.lock().await.get(url).cloned(),
            None => None,
        };

        let known_etag = remembered.as_ref().map(|page| page.etag.clone());
        let response = self.get_conditional(ctx, url, known_etag.as_deref()).await?;
        let fetched = match response {
            Conditional::Body(fetched) => fetched,
            Conditional::Unchanged => {
                let Some(page) = remembered else {
                    return Err(SyncError::internal("Not modified without a decoded response"));
                };
                let issues = page
                    .issues
                    .iter()
                    .cloned()
                    .map(|issue| RemoteIssueSnapshot {
                        from_cache: true,
                        ..issue
                    })
                    .collect();
                return Ok((issues, page.next_link, Some(page.etag)));
            }
        };

        let issues: Vec<RemoteIssueSnapshot> = decode(&fetched.body)
            .map_err(|e| SyncError::internal(format!("Failed to parse issues: {}", e)))?
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .map(|issue| issue.into_snapshot(None, fetched.from_cache))
            .collect();

        if let (Some(_), Some(etag)) = (&self.cache, &fetched.etag) {
            self.decoded.lock().await.insert(
                url.to_string(),
                DecodedPage {
                    etag: etag.clone(),
                    issues: Arc::new(issues.clone()),
                    next_link: fetched.next_link.clone(),
                },
            );
        }

        Ok((issues, fetched.next_link, fetched.etag))
    }

    async fn fetch_issue_page(
        &self,
        ctx: &RateLimitContext,
        url: &str,
    ) -> Result<IssuePage, SyncError> {
        let (issues, next, _) = self
            .fetch_issues(ctx, url, |body: &str| serde_json::from_str::<Vec<GitHubIssue>>(body))
            .await?;
        Ok(IssuePage { issues, next })
    }

    /// Lazily list issues matching the filter.
    ///
    /// Pages are requested only as the stream is polled, so a caller that
    /// stops early does not pay for the remaining pages. Pull requests are
    /// skipped.
    pub fn fetch_all<'a>(
        &'a self,
        ctx: &'a RateLimitContext,
        filter: IssueFilter,
    ) -> impl Stream<Item = Result<RemoteIssueSnapshot, SyncError>> + 'a {
        let first = self.issues_url(&filter);

        stream::try_unfold(Some(first), move |next| async move {
            let Some(url) = next else {
                return Ok::<_, SyncError>(None);
            };
            let page = self.fetch_issue_page(ctx, &url).await?;
            let items = stream::iter(page.issues.into_iter().map(Ok::<_, SyncError>));
            Ok(Some((items, page.next)))
        })
        .try_flatten()
    }

    /// Fetch a single issue.
    pub async fn fetch_one(
        &self,
        ctx: &RateLimitContext,
        number: i64,
    ) -> Result<RemoteIssueSnapshot, SyncError> {
        let url = self.api_url(&self.repo_path(&format!("/issues/{}", number)));

        let decode = |body: &str| serde_json::from_str::<GitHubIssue>(body).map(|issue| vec![issue]);
        let (issues, _, etag) = match self.fetch_issues(ctx, &url, decode).await {
            Err(e) if e.is_not_found() => {
                return Err(SyncError::not_found_with_id("Issue", number.to_string()))
            }
            other => other?,
        };

        // an empty result is a pull request
        let issue = issues
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::not_found_with_id("Issue", number.to_string()))?;

        Ok(RemoteIssueSnapshot { etag, ..issue })
    }

    /// Create an issue. The receipt must be recorded by the caller right away.
    ///
    /// GitHub creates issues open; closing is a separate update.
    pub async fn create(
        &self,
        ctx: &RateLimitContext,
        fields: &IssueFields,
    ) -> Result<CreatedIssue, SyncError> {
        let fields = fields.normalized();
        if fields.title.is_empty() {
            return Err(SyncError::validation_field(
                "Issue title is required",
                "title",
            ));
        }

        let milestone = match &fields.milestone {
            Some(title) => Some(Some(self.resolve_milestone(ctx, title).await?)),
            None => None,
        };

        let body = IssueWriteBody {
            title: Some(fields.title.clone()),
            body: Some(fields.body.clone()),
            labels: Some(fields.labels.clone()),
            assignees: Some(fields.assignees.clone()),
            milestone,
            state: None,
        };

        let endpoint = self.repo_path("/issues");
        let url = self.api_url(&endpoint);
        let response = self
            .send_with_retry(ctx, &Self::endpoint_of(&url), || {
                self.client.post(&url).json(&body)
            })
            .await?;

        let (issue, etag, _): (GitHubIssue, _, _) =
            Self::handle_response(response, &endpoint).await?;

        log::info!("[github] Created issue #{} ({})", issue.number, issue.html_url);

        Ok(CreatedIssue {
            number: issue.number,
            url: issue.html_url,
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            etag,
        })
    }

    /// Send the changed fields of an issue and return its new state.
    pub async fn update(
        &self,
        ctx: &RateLimitContext,
        number: i64,
        patch: &IssuePatch,
    ) -> Result<RemoteIssueSnapshot, SyncError> {
        let milestone = match &patch.milestone {
            Some(Some(title)) => Some(Some(self.resolve_milestone(ctx, title).await?)),
            Some(None) => Some(None),
            None => None,
        };

        let body = IssueWriteBody {
            title: patch.title.clone(),
            body: patch.body.clone(),
            labels: patch.labels.clone(),
            assignees: patch.assignees.clone(),
            milestone,
            state: patch.state.map(|s| s.to_string()),
        };

        let endpoint = self.repo_path(&format!("/issues/{}", number));
        let url = self.api_url(&endpoint);
        let response = self
            .send_with_retry(ctx, &Self::endpoint_of(&url), || {
                self.client.patch(&url).json(&body)
            })
            .await?;

        let (issue, etag, text): (GitHubIssue, _, _) =
            match Self::handle_response(response, &endpoint).await {
                Err(e) if e.is_not_found() => {
                    return Err(SyncError::not_found_with_id("Issue", number.to_string()))
                }
                other => other?,
            };

        let snapshot = issue.into_snapshot(etag, false);
        if let (Some(pool), Some(tag)) = (&self.cache, &snapshot.etag) {
            response_cache::store(pool, &url, tag, &text, None).await?;
            self.decoded.lock().await.insert(
                url.clone(),
                DecodedPage {
                    etag: tag.clone(),
                    issues: Arc::new(vec![RemoteIssueSnapshot {
                        etag: None,
                        ..snapshot.clone()
                    }]),
                    next_link: None,
                },
            );
        }

        log::info!(
            "[github] Updated issue #{} ({})",
            number,
            patch.field_names().join(", ")
        );

        Ok(snapshot)
    }

    /// Fetch all pages of a listing endpoint by following `Link` headers.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        ctx: &RateLimitContext,
        endpoint: &str,
        query: &str,
    ) -> Result<Vec<T>, SyncError> {
        let mut all_data = Vec::new();
        let mut next = Some(format!(
            "{}?per_page={}&{}",
            self.api_url(endpoint),
            self.config.per_page.clamp(1, 100),
            query
        ));

        while let Some(url) = next {
            let response = self
                .send_with_retry(ctx, &Self::endpoint_of(&url), || self.client.get(&url))
                .await?;
            let link = Self::parse_next_link(response.headers());
            let (data, _, _): (Vec<T>, _, _) = Self::handle_response(response, endpoint).await?;
            all_data.extend(data);
            next = link;
        }

        Ok(all_data)
    }

    /// List every milestone of the repository, open and closed.
    pub async fn list_milestones(
        &self,
        ctx: &RateLimitContext,
    ) -> Result<Vec<GitHubMilestone>, SyncError> {
        let endpoint = self.repo_path("/milestones");
        self.get_all_pages(ctx, &endpoint, "state=all").await
    }

    /// Resolve a milestone title to the number GitHub expects on writes.
    async fn resolve_milestone(
        &self,
        ctx: &RateLimitContext,
        title: &str,
    ) -> Result<i64, SyncError> {
        let mut guard = self.milestones.lock().await;
        if guard.is_none() {
            let milestones = self.list_milestones(ctx).await?;
            *guard = Some(
                milestones
                    .into_iter()
                    .map(|m| (m.title, m.number))
                    .collect(),
            );
        }

        guard
            .as_ref()
            .and_then(|map| map.get(title).copied())
            .ok_or_else(|| {
                SyncError::validation_field(format!("Unknown milestone '{}'", title), "milestone")
            })
    }

    /// Read the configured project board's field values for an issue.
    ///
    /// Returns an empty map when no project board is configured or the issue
    /// is not on it.
    pub async fn fetch_project_fields(
        &self,
        ctx: &RateLimitContext,
        number: i64,
    ) -> Result<BTreeMap<String, String>, SyncError> {
        let Some(project_number) = self.config.project_number else {
            return Ok(BTreeMap::new());
        };

        let payload = serde_json::json!({
            "query": PROJECT_FIELDS_QUERY,
            "variables": {
                "owner": self.config.owner,
                "repo": self.config.repo,
                "number": number,
            }
        });

        let endpoint = "/graphql";
        let url = self.config.graphql_url.clone();
        let response = self
            .send_with_retry(ctx, endpoint, || self.client.post(&url).json(&payload))
            .await?;
        let (value, _, _): (serde_json::Value, _, _) =
            Self::handle_response(response, endpoint).await?;

        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(SyncError::remote_api_full(message, 200, endpoint));
            }
        }

        Ok(parse_project_fields(&value, project_number))
    }
}

/// Pull `name -> value` pairs for one project out of a GraphQL response.
fn parse_project_fields(value: &serde_json::Value, project_number: i64) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();

    let items = value
        .pointer("/data/repository/issue/projectItems/nodes")
        .and_then(|n| n.as_array());

    for item in items.into_iter().flatten() {
        let number = item.pointer("/project/number").and_then(|n| n.as_i64());
        if number != Some(project_number) {
            continue;
        }

        let values = item
            .pointer("/fieldValues/nodes")
            .and_then(|n| n.as_array());
        for node in values.into_iter().flatten() {
            let Some(name) = node.pointer("/field/name").and_then(|n| n.as_str()) else {
                continue;
            };
            let value = ["text", "date", "name", "title"]
                .iter()
                .find_map(|key| node.get(*key).and_then(|v| v.as_str()).map(str::to_string))
                .or_else(|| {
                    node.get("number").and_then(|v| v.as_f64()).map(|n| {
                        if n.fract() == 0.0 {
                            format!("{}", n as i64)
                        } else {
                            n.to_string()
                        }
                    })
                });
            if let Some(value) = value {
                fields.insert(name.to_string(), value);
            }
        }
    }

    fields
}
