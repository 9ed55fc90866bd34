//! Shared fixtures for the integration tests.
//!
//! `FakeGitHub` is an in-process stand-in for the GitHub issues API served
//! by axum on an ephemeral port. It keeps issues in memory, answers
//! conditional requests with 304, paginates with `Link` headers, and can be
//! told to fail specific requests.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use issue_sync_lib::db::local_files;
use issue_sync_lib::db::pool::DbPool;
use issue_sync_lib::models::{ConflictStrategy, SyncMode, SyncReport};
use issue_sync_lib::services::{
    GitHubClient, GitHubClientConfig, MarkdownWorkspace, RetryPolicy, SyncConfig, SyncEngine,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const OWNER: &str = "acme";
pub const REPO: &str = "kb";

/// Project board number the fake serves through GraphQL.
pub const PROJECT_NUMBER: i64 = 1;

fn now_secs() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
}

/// Next `updated_at` for an edited issue. GitHub timestamps have whole-second
/// precision, so an edit within the same second still moves forward.
fn bumped(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now_secs();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::seconds(1)
    }
}

/// An issue as the fake stores it.
#[derive(Debug, Clone)]
pub struct FakeIssue {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub state: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub milestone: Option<(i64, String)>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    version: u64,
}

impl FakeIssue {
    pub fn new(number: i64, title: &str) -> Self {
        let now = now_secs();
        Self {
            number,
            title: title.to_string(),
            body: String::new(),
            state: "open".to_string(),
            labels: Vec::new(),
            assignees: Vec::new(),
            milestone: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn updated_at(mut self, ts: &str) -> Self {
        self.updated_at = ts.parse().unwrap();
        self
    }

    fn etag(&self) -> String {
        format!("\"issue-{}-v{}\"", self.number, self.version)
    }

    fn to_json(&self) -> Value {
        json!({
            "number": self.number,
            "html_url": format!("https://github.com/{}/{}/issues/{}", OWNER, REPO, self.number),
            "title": self.title,
            "body": self.body,
            "state": self.state,
            "labels": self.labels.iter().map(|l| json!({ "name": l })).collect::<Vec<_>>(),
            "assignees": self.assignees.iter().map(|a| json!({ "login": a })).collect::<Vec<_>>(),
            "milestone": self.milestone.as_ref().map(|(number, title)| json!({
                "number": number,
                "title": title,
                "state": "open",
            })),
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }
}

/// A canned failure returned instead of the real answer.
#[derive(Debug, Clone, Copy)]
pub enum Injected {
    Unauthorized,
    ServerError,
    RateLimited { retry_after_secs: u64 },
    /// Answer 504 only after `delay_ms`, so clients with a shorter timeout give up first.
    Slow { delay_ms: u64 },
}

/// One request the fake received.
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub at: Instant,
}

struct FakeState {
    issues: BTreeMap<i64, FakeIssue>,
    milestones: Vec<(i64, String)>,
    project_fields: HashMap<i64, Vec<(String, String)>>,
    page_size: usize,
    list_version: u64,
    creates: u32,
    fail_create_at: Option<u32>,
    injected: VecDeque<(String, Injected)>,
    requests: Vec<RequestLog>,
}

impl FakeState {
    fn take_injected(&mut self, method: &str) -> Option<Injected> {
        let idx = self.injected.iter().position(|(m, _)| m == method)?;
        self.injected.remove(idx).map(|(_, injected)| injected)
    }

    fn respond(&mut self, method: &str, path: &str, response: Response) -> Response {
        self.requests.push(RequestLog {
            method: method.to_string(),
            path: path.to_string(),
            status: response.status().as_u16(),
            at: Instant::now(),
        });
        response
    }
}

fn json_response(status: StatusCode, etag: Option<&str>, link: Option<String>, body: &Value) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(etag) = etag {
        builder = builder.header(header::ETAG, etag);
    }
    if let Some(link) = link {
        builder = builder.header(header::LINK, link);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn not_modified(etag: &str) -> Response {
    Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header(header::ETAG, etag)
        .body(Body::empty())
        .unwrap()
}

fn injected_response(injected: Injected) -> Response {
    match injected {
        Injected::Unauthorized => json_response(
            StatusCode::UNAUTHORIZED,
            None,
            None,
            &json!({ "message": "Bad credentials" }),
        ),
        Injected::ServerError => json_response(
            StatusCode::BAD_GATEWAY,
            None,
            None,
            &json!({ "message": "Server Error" }),
        ),
        Injected::RateLimited { retry_after_secs } => Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("retry-after", retry_after_secs.to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "message": "You have exceeded a secondary rate limit" }).to_string(),
            ))
            .unwrap(),
        Injected::Slow { .. } => json_response(
            StatusCode::GATEWAY_TIMEOUT,
            None,
            None,
            &json!({ "message": "Gateway Timeout" }),
        ),
    }
}

async fn answer_injected(fake: &FakeGitHub, method: &str, path: &str, injected: Injected) -> Response {
    if let Injected::Slow { delay_ms } = injected {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    fake.state
        .lock()
        .unwrap()
        .respond(method, path, injected_response(injected))
}

fn if_none_match(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok())
}

/// Handle to a running fake GitHub.
#[derive(Clone)]
pub struct FakeGitHub {
    state: Arc<Mutex<FakeState>>,
    pub base_url: String,
}

impl FakeGitHub {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let fake = Self {
            state: Arc::new(Mutex::new(FakeState {
                issues: BTreeMap::new(),
                milestones: Vec::new(),
                project_fields: HashMap::new(),
                page_size: 100,
                list_version: 1,
                creates: 0,
                fail_create_at: None,
                injected: VecDeque::new(),
                requests: Vec::new(),
            })),
            base_url: format!("http://{}", addr),
        };

        let app = Router::new()
            .route(
                "/repos/{owner}/{repo}/issues",
                get(list_issues).post(create_issue),
            )
            .route(
                "/repos/{owner}/{repo}/issues/{number}",
                get(get_issue).patch(update_issue),
            )
            .route("/repos/{owner}/{repo}/milestones", get(list_milestones))
            .route("/graphql", post(graphql))
            .with_state(fake.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        fake
    }

    pub fn add_issue(&self, issue: FakeIssue) {
        let mut st = self.state.lock().unwrap();
        st.list_version += 1;
        st.issues.insert(issue.number, issue);
    }

    pub fn add_milestone(&self, number: i64, title: &str) {
        self.state
            .lock()
            .unwrap()
            .milestones
            .push((number, title.to_string()));
    }

    /// Single-select values of an issue on the project board.
    pub fn set_project_fields(&self, number: i64, fields: &[(&str, &str)]) {
        self.state.lock().unwrap().project_fields.insert(
            number,
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        );
    }

    pub fn issue(&self, number: i64) -> Option<FakeIssue> {
        self.state.lock().unwrap().issues.get(&number).cloned()
    }

    pub fn issues(&self) -> Vec<FakeIssue> {
        self.state.lock().unwrap().issues.values().cloned().collect()
    }

    /// Edit an issue out of band. `updated_at` is bumped to now unless the
    /// closure sets it.
    pub fn edit_issue(&self, number: i64, edit: impl FnOnce(&mut FakeIssue)) {
        let mut st = self.state.lock().unwrap();
        st.list_version += 1;
        let issue = st.issues.get_mut(&number).unwrap();
        issue.version += 1;
        issue.updated_at = bumped(issue.updated_at);
        edit(issue);
    }

    pub fn set_page_size(&self, size: usize) {
        let mut st = self.state.lock().unwrap();
        st.page_size = size;
        st.list_version += 1;
    }

    /// Answer the nth create (1-based, counted over the fake's lifetime) with 401.
    pub fn fail_create_at(&self, nth: u32) {
        self.state.lock().unwrap().fail_create_at = Some(nth);
    }

    pub fn clear_create_failure(&self) {
        self.state.lock().unwrap().fail_create_at = None;
    }

    /// Answer the next request with this method with a canned failure.
    pub fn inject(&self, method: &str, injected: Injected) {
        self.state
            .lock()
            .unwrap()
            .injected
            .push_back((method.to_string(), injected));
    }

    /// Number of create requests that actually created an issue.
    pub fn create_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.method == "POST" && r.status == 201)
            .count()
    }

    pub fn requests(&self) -> Vec<RequestLog> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn writes(&self) -> Vec<RequestLog> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != "GET" && r.path != "/graphql")
            .filter(|r| (200..300).contains(&r.status))
            .collect()
    }
}

async fn list_issues(
    State(fake): State<FakeGitHub>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/repos/{}/{}/issues", owner, repo);
    let injected = fake.state.lock().unwrap().take_injected("GET");
    if let Some(injected) = injected {
        return answer_injected(&fake, "GET", &path, injected).await;
    }
    let mut st = fake.state.lock().unwrap();

    let state_filter = query.get("state").cloned().unwrap_or_else(|| "open".to_string());
    let since: Option<DateTime<Utc>> = query.get("since").and_then(|s| s.parse().ok());
    let per_page: usize = query
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(30)
        .min(st.page_size)
        .max(1);
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);

    let matching: Vec<&FakeIssue> = st
        .issues
        .values()
        .filter(|i| state_filter == "all" || i.state == state_filter)
        .filter(|i| since.map_or(true, |s| i.updated_at >= s))
        .collect();

    let start = (page - 1) * per_page;
    let items: Vec<Value> = matching
        .iter()
        .skip(start)
        .take(per_page)
        .map(|i| i.to_json())
        .collect();

    let link = (start + per_page < matching.len()).then(|| {
        let mut next = format!(
            "{}{}?state={}&per_page={}&page={}",
            fake.base_url,
            path,
            state_filter,
            per_page,
            page + 1
        );
        if let Some(since) = query.get("since") {
            next.push_str("&since=");
            next.push_str(&urlencoding::encode(since));
        }
        format!("<{}>; rel=\"next\"", next)
    });

    let etag = format!("\"list-{}-{}-{}\"", st.list_version, per_page, page);
    if if_none_match(&headers) == Some(etag.as_str()) {
        return st.respond("GET", &path, not_modified(&etag));
    }

    let response = json_response(StatusCode::OK, Some(&etag), link, &Value::Array(items));
    st.respond("GET", &path, response)
}

async fn get_issue(
    State(fake): State<FakeGitHub>,
    Path((owner, repo, number)): Path<(String, String, i64)>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/repos/{}/{}/issues/{}", owner, repo, number);
    let injected = fake.state.lock().unwrap().take_injected("GET");
    if let Some(injected) = injected {
        return answer_injected(&fake, "GET", &path, injected).await;
    }
    let mut st = fake.state.lock().unwrap();

    let Some(issue) = st.issues.get(&number).cloned() else {
        let response = json_response(
            StatusCode::NOT_FOUND,
            None,
            None,
            &json!({ "message": "Not Found" }),
        );
        return st.respond("GET", &path, response);
    };

    let etag = issue.etag();
    if if_none_match(&headers) == Some(etag.as_str()) {
        return st.respond("GET", &path, not_modified(&etag));
    }

    let response = json_response(StatusCode::OK, Some(&etag), None, &issue.to_json());
    st.respond("GET", &path, response)
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn resolve_milestone(st: &FakeState, value: &Value) -> Option<(i64, String)> {
    let number = value.as_i64()?;
    st.milestones.iter().find(|(n, _)| *n == number).cloned()
}

async fn create_issue(
    State(fake): State<FakeGitHub>,
    Path((owner, repo)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let path = format!("/repos/{}/{}/issues", owner, repo);
    let injected = fake.state.lock().unwrap().take_injected("POST");
    if let Some(injected) = injected {
        return answer_injected(&fake, "POST", &path, injected).await;
    }
    let mut st = fake.state.lock().unwrap();

    st.creates += 1;
    if st.fail_create_at == Some(st.creates) {
        return st.respond("POST", &path, injected_response(Injected::Unauthorized));
    }

    let title = body["title"].as_str().unwrap_or_default().to_string();
    if title.trim().is_empty() {
        let response = json_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            None,
            None,
            &json!({ "message": "Validation Failed" }),
        );
        return st.respond("POST", &path, response);
    }

    let number = st.issues.keys().next_back().copied().unwrap_or(0) + 1;
    let mut issue = FakeIssue::new(number, &title);
    issue.body = body["body"].as_str().unwrap_or_default().to_string();
    issue.labels = string_list(&body["labels"]);
    issue.assignees = string_list(&body["assignees"]);
    issue.milestone = resolve_milestone(&st, &body["milestone"]);

    let response = json_response(
        StatusCode::CREATED,
        Some(&issue.etag()),
        None,
        &issue.to_json(),
    );
    st.list_version += 1;
    st.issues.insert(number, issue);
    st.respond("POST", &path, response)
}

async fn update_issue(
    State(fake): State<FakeGitHub>,
    Path((owner, repo, number)): Path<(String, String, i64)>,
    Json(body): Json<Value>,
) -> Response {
    let path = format!("/repos/{}/{}/issues/{}", owner, repo, number);
    let injected = fake.state.lock().unwrap().take_injected("PATCH");
    if let Some(injected) = injected {
        return answer_injected(&fake, "PATCH", &path, injected).await;
    }
    let mut st = fake.state.lock().unwrap();

    let milestone = body
        .get("milestone")
        .map(|value| resolve_milestone(&st, value));

    if !st.issues.contains_key(&number) {
        let response = json_response(
            StatusCode::NOT_FOUND,
            None,
            None,
            &json!({ "message": "Not Found" }),
        );
        return st.respond("PATCH", &path, response);
    }

    let issue = st.issues.get_mut(&number).unwrap();
    if let Some(title) = body.get("title").and_then(Value::as_str) {
        issue.title = title.to_string();
    }
    if let Some(text) = body.get("body").and_then(Value::as_str) {
        issue.body = text.to_string();
    }
    if let Some(state) = body.get("state").and_then(Value::as_str) {
        issue.state = state.to_string();
    }
    if let Some(labels) = body.get("labels") {
        issue.labels = string_list(labels);
    }
    if let Some(assignees) = body.get("assignees") {
        issue.assignees = string_list(assignees);
    }
    if let Some(milestone) = milestone {
        issue.milestone = milestone;
    }
    issue.version += 1;
    issue.updated_at = bumped(issue.updated_at);

    let response = json_response(StatusCode::OK, Some(&issue.etag()), None, &issue.to_json());
    st.list_version += 1;
    st.respond("PATCH", &path, response)
}

async fn list_milestones(
    State(fake): State<FakeGitHub>,
    Path((owner, repo)): Path<(String, String)>,
) -> Response {
    let path = format!("/repos/{}/{}/milestones", owner, repo);
    let mut st = fake.state.lock().unwrap();
    let items: Vec<Value> = st
        .milestones
        .iter()
        .map(|(number, title)| json!({ "number": number, "title": title, "state": "open" }))
        .collect();
    let response = json_response(StatusCode::OK, None, None, &Value::Array(items));
    st.respond("GET", &path, response)
}

async fn graphql(State(fake): State<FakeGitHub>, Json(body): Json<Value>) -> Response {
    let mut st = fake.state.lock().unwrap();
    let number = body["variables"]["number"].as_i64().unwrap_or_default();

    let nodes: Vec<Value> = st
        .project_fields
        .get(&number)
        .map(|fields| {
            vec![json!({
                "project": { "number": PROJECT_NUMBER },
                "fieldValues": {
                    "nodes": fields
                        .iter()
                        .map(|(name, value)| json!({ "name": value, "field": { "name": name } }))
                        .collect::<Vec<_>>(),
                },
            })]
        })
        .unwrap_or_default();

    let response = json_response(
        StatusCode::OK,
        None,
        None,
        &json!({ "data": { "repository": { "issue": { "projectItems": { "nodes": nodes } } } } }),
    );
    st.respond("POST", "/graphql", response)
}

/// A temporary knowledge base, state store and fake GitHub.
pub struct Harness {
    pub fake: FakeGitHub,
    pub pool: DbPool,
    pub root: PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = issue_sync_lib::db::get_db_path(&dir.path().join("state"));
        let pool = issue_sync_lib::db::initialize(&db_path).await.unwrap();
        let root = dir.path().join("kb");
        std::fs::create_dir_all(&root).unwrap();

        Self {
            fake: FakeGitHub::start().await,
            pool,
            root,
            _dir: dir,
        }
    }

    /// Client config pointed at the fake, with short retry delays.
    pub fn client_config(&self) -> GitHubClientConfig {
        GitHubClientConfig {
            base_url: self.fake.base_url.clone(),
            graphql_url: format!("{}/graphql", self.fake.base_url),
            owner: OWNER.to_string(),
            repo: REPO.to_string(),
            token: "test-token".to_string(),
            timeout_secs: 10,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 50,
                multiplier: 2.0,
                jitter_ratio: 0.0,
            },
            ..Default::default()
        }
    }

    pub fn client(&self) -> GitHubClient {
        GitHubClient::new(self.client_config())
            .unwrap()
            .with_response_cache(self.pool.clone())
    }

    pub fn engine(&self) -> SyncEngine<MarkdownWorkspace> {
        SyncEngine::new(
            self.pool.clone(),
            self.client(),
            MarkdownWorkspace::new(self.pool.clone(), &self.root),
        )
    }

    /// Write a markdown file under the knowledge base and register it the
    /// way the crawler would.
    pub async fn add_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        local_files::register_file(&self.pool, &self.root, &path)
            .await
            .unwrap();
        path
    }

    pub async fn sync(&self, config: &SyncConfig) -> SyncReport {
        self.engine().run(config).await
    }
}

pub fn config(mode: SyncMode, strategy: ConflictStrategy) -> SyncConfig {
    SyncConfig {
        mode,
        strategy,
        ..Default::default()
    }
}

pub fn read(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
