//! Sync engine: one complete pass between local issue files and GitHub.
//!
//! This module provides the orchestration:
//! - Run resume/start through the sync state manager
//! - Remote listing and local inventory into sync records
//! - Change detection and conflict resolution per record
//! - Bounded-concurrency processing with a single store writer
//! - Per-record checkpointing so interrupted runs resume safely
//! - Sync logging for status display

use crate::db::pool::DbPool;
use crate::db::{local_files, response_cache, sync_records};
use crate::error::SyncError;
use crate::models::conflict::{ConflictDecision, ConflictStrategy, Resolution};
use crate::models::issue::{
    CreatedIssue, IssueFields, IssuePatch, IssueState, RemoteIssueSnapshot,
};
use crate::models::sync_record::SyncRecord;
use crate::models::sync_report::{DeferredConflict, FailedRecord, RecordOutcome, SyncReport};
use crate::models::sync_run::{RunScope, RunStatus, SyncMode};
use crate::services::change_detector::{ChangeDetector, ChangeKind};
use crate::services::conflict_resolver::ConflictResolver;
use crate::services::github_client::{GitHubClient, IssueFilter};
use crate::services::markdown::IssueFrontMatter;
use crate::services::rate_limit::RateLimitContext;
use crate::services::sync_state;
use crate::services::workspace::{IssueFile, IssueWorkspace};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Maximum number of log entries to keep.
const MAX_LOG_ENTRIES: i64 = 50;

/// Cached responses older than this are purged after a completed run.
const RESPONSE_CACHE_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Sync engine configuration, one per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// `sync-down`, `push` or `sync-bidirectional`.
    pub mode: SyncMode,

    /// How records changed on both sides are resolved.
    pub strategy: ConflictStrategy,

    /// Report what would happen without writing anything.
    pub dry_run: bool,

    /// Ignore unfinished runs and rescan everything.
    pub force: bool,

    /// Only consider remote issues updated since this time.
    pub since: Option<DateTime<Utc>>,

    /// Records processed at once.
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Bidirectional,
            strategy: ConflictStrategy::TimestampBased,
            dry_run: false,
            force: false,
            since: None,
            concurrency: 4,
        }
    }
}

/// Sync log entry matching the sync_log table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SyncLogEntry {
    pub id: i64,
    pub operation: String,
    pub status: String,
    pub record_id: Option<i64>,
    pub message: Option<String>,
    pub duration_ms: Option<i64>,
    pub timestamp: i64,
}

/// One record queued for processing, with both sides as seen this run.
#[derive(Debug)]
struct WorkItem {
    record: SyncRecord,
    local: Option<IssueFile>,
    remote: Option<RemoteIssueSnapshot>,
    /// The remote issue was not in the listing and must be fetched.
    needs_fetch: bool,
    /// The record's local file is no longer listed as an issue file.
    local_missing: bool,
}

impl WorkItem {
    fn path(&self) -> Option<String> {
        self.local
            .as_ref()
            .map(|f| f.path.display().to_string())
    }
}

/// Snapshot to store as the record's new last-synced state.
#[derive(Debug)]
struct Baseline {
    fields: IssueFields,
    remote_updated_at: Option<i64>,
    remote_etag: Option<String>,
}

impl Baseline {
    fn new(fields: IssueFields, remote_updated_at: DateTime<Utc>, etag: Option<String>) -> Self {
        Self {
            fields,
            remote_updated_at: Some(remote_updated_at.timestamp()),
            remote_etag: etag,
        }
    }
}

/// What processing one record produced.
#[derive(Debug)]
struct Applied {
    outcome: RecordOutcome,
    baseline: Option<Baseline>,
    decision: Option<ConflictDecision>,
    deferred: Option<DeferredConflict>,
    /// A step that failed after the remote write had already landed.
    follow_up: Option<FailedRecord>,
}

impl Applied {
    fn outcome(outcome: RecordOutcome) -> Self {
        Self {
            outcome,
            baseline: None,
            decision: None,
            deferred: None,
            follow_up: None,
        }
    }

    fn with_baseline(outcome: RecordOutcome, baseline: Baseline) -> Self {
        Self {
            baseline: Some(baseline),
            ..Self::outcome(outcome)
        }
    }
}

/// Result of one record as merged into the report.
#[derive(Debug)]
enum ItemResult {
    /// The run was stopping before this record started.
    NotStarted,
    Done {
        outcome: RecordOutcome,
        decision: Option<ConflictDecision>,
        deferred: Option<DeferredConflict>,
        follow_up: Option<FailedRecord>,
    },
    Failed(FailedRecord),
    Fatal(SyncError),
}

/// Per-run values shared by every record task.
struct RunContext<'a> {
    config: &'a SyncConfig,
    /// `None` for dry runs, which persist nothing.
    run_id: Option<&'a str>,
    limiter: &'a RateLimitContext,
    resolver: ConflictResolver,
    /// Set once a fatal error is seen; records not yet started are left alone.
    stop: CancellationToken,
}

/// Sync engine over a workspace implementation.
pub struct SyncEngine<W: IssueWorkspace> {
    pool: DbPool,
    client: GitHubClient,
    workspace: W,
    /// Serializes store mutations made while records run concurrently.
    write_gate: Mutex<()>,
    cancel: CancellationToken,
}

impl<W: IssueWorkspace> SyncEngine<W> {
    /// Create a new sync engine.
    pub fn new(pool: DbPool, client: GitHubClient, workspace: W) -> Self {
        Self {
            pool,
            client,
            workspace,
            write_gate: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the current run between records.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    /// Run one complete pass.
    ///
    /// A report is always returned. A fatal error leaves the run
    /// `interrupted` with its checkpoint and is reported in `fatal_error`.
    pub async fn run(&self, config: &SyncConfig) -> SyncReport {
        let start = Instant::now();
        let scope = RunScope::from(config.since);
        let limiter = RateLimitContext::new();

        log::info!(
            "[sync] Starting {} (strategy={}, scope={}, dry_run={}, force={})",
            config.mode,
            config.strategy,
            scope.key(),
            config.dry_run,
            config.force
        );

        let (run_id, resumed, done) = if config.dry_run {
            (format!("dry-run-{}", uuid::Uuid::new_v4()), false, HashSet::new())
        } else {
            match self.begin(config, &scope).await {
                Ok(started) => started,
                Err(e) => {
                    log::error!("[sync] Could not start run: {}", e);
                    let mut report =
                        SyncReport::new("", config.mode, config.strategy, false, false);
                    report.status = RunStatus::Interrupted;
                    report.fatal_error = Some(e);
                    report.finished_at = Some(Utc::now());
                    return report;
                }
            }
        };

        let mut report = SyncReport::new(
            run_id.clone(),
            config.mode,
            config.strategy,
            config.dry_run,
            resumed,
        );
        report.already_done = done.len() as u32;

        let ctx = RunContext {
            config,
            run_id: (!config.dry_run).then_some(run_id.as_str()),
            limiter: &limiter,
            resolver: ConflictResolver::new(config.strategy),
            stop: CancellationToken::new(),
        };

        let result = self.execute(&ctx, &scope, &done, &mut report).await;

        match result {
            Ok(()) if self.cancel.is_cancelled() => {
                log::warn!("[sync] Run {} cancelled", run_id);
                report.status = RunStatus::Interrupted;
                if let Some(id) = ctx.run_id {
                    if let Err(e) = sync_state::interrupt_run(&self.pool, id, "cancelled").await {
                        log::warn!("[sync] Failed to mark run {} interrupted: {}", id, e);
                    }
                }
            }
            Ok(()) => {
                report.status = RunStatus::Completed;
                if let Some(id) = ctx.run_id {
                    if let Err(e) = self.finish(id).await {
                        report.status = RunStatus::Interrupted;
                        report.fatal_error = Some(e);
                    }
                }
            }
            Err(e) => {
                log::error!("[sync] Run {} aborted: {}", run_id, e);
                report.status = RunStatus::Interrupted;
                if let Some(id) = ctx.run_id {
                    if let Err(store_err) =
                        sync_state::interrupt_run(&self.pool, id, &e.to_string()).await
                    {
                        log::warn!("[sync] Failed to mark run {} interrupted: {}", id, store_err);
                    }
                }
                report.fatal_error = Some(e);
            }
        }

        report.finished_at = Some(Utc::now());

        let stats = limiter.stats().await;
        if stats.waits > 0 {
            log::info!(
                "[sync] Rate limiting held requests back {} time(s), {} ms total",
                stats.waits,
                stats.total_wait_ms
            );
        }
        log::info!("[sync] {}", report.summary());

        if !config.dry_run {
            let status = if report.fatal_error.is_none() && report.failed.is_empty() {
                "success"
            } else {
                "error"
            };
            if let Err(e) = self
                .log_sync_operation(
                    "sync_run",
                    status,
                    None,
                    Some(report.summary()),
                    Some(start.elapsed().as_millis() as i64),
                )
                .await
            {
                log::warn!("[sync] Failed to write sync log: {}", e);
            }
        }

        report
    }

    async fn begin(
        &self,
        config: &SyncConfig,
        scope: &RunScope,
    ) -> Result<(String, bool, HashSet<i64>), SyncError> {
        let (run, resumed) =
            sync_state::begin_run(&self.pool, config.mode, scope, config.strategy, config.force)
                .await?;
        let done = if resumed {
            sync_state::checkpointed_records(&self.pool, &run.id).await?
        } else {
            HashSet::new()
        };
        Ok((run.id, resumed, done))
    }

    async fn finish(&self, run_id: &str) -> Result<(), SyncError> {
        sync_state::complete_run(&self.pool, run_id).await?;
        let purged =
            response_cache::purge_older_than(&self.pool, now() - RESPONSE_CACHE_MAX_AGE_SECS)
                .await?;
        if purged > 0 {
            log::debug!("[sync] Purged {} stale cached responses", purged);
        }
        Ok(())
    }

    /// Inventory, classify and process every in-scope record.
    async fn execute(
        &self,
        ctx: &RunContext<'_>,
        scope: &RunScope,
        done: &HashSet<i64>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let files = self.workspace.list_issue_files().await?;

        let remotes: Vec<RemoteIssueSnapshot> = self
            .client
            .fetch_all(ctx.limiter, IssueFilter::since(scope.since()))
            .try_collect()
            .await?;
        log::info!(
            "[sync] {} local issue files, {} remote issues in scope",
            files.len(),
            remotes.len()
        );

        let items = self.inventory(files, remotes, scope, done, report).await?;
        let concurrency = ctx.config.concurrency.max(1);

        let mut results = stream::iter(items)
            .map(|item| self.process_item(ctx, item))
            .buffer_unordered(concurrency);

        let mut fatal: Option<SyncError> = None;
        while let Some(result) = results.next().await {
            match result {
                ItemResult::NotStarted => {}
                ItemResult::Done {
                    outcome,
                    decision,
                    deferred,
                    follow_up,
                } => {
                    report.count(outcome);
                    report.decisions.extend(decision);
                    report.deferred.extend(deferred);
                    match follow_up {
                        Some(failed) if failed.error.is_fatal() => {
                            ctx.stop.cancel();
                            fatal.get_or_insert(failed.error);
                        }
                        Some(failed) => report.failed.push(failed),
                        None => {}
                    }
                }
                ItemResult::Failed(failed) => report.failed.push(failed),
                ItemResult::Fatal(e) => {
                    ctx.stop.cancel();
                    fatal.get_or_insert(e);
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Make sure every issue file and remote issue has a sync record, then
    /// pair records with both sides.
    async fn inventory(
        &self,
        files: Vec<IssueFile>,
        remotes: Vec<RemoteIssueSnapshot>,
        scope: &RunScope,
        done: &HashSet<i64>,
        report: &mut SyncReport,
    ) -> Result<Vec<WorkItem>, SyncError> {
        let mut files_by_id: HashMap<i64, IssueFile> = HashMap::new();

        for file in files {
            let fields = file.fields();
            let ensured = sync_records::ensure_for_local_file(
                &self.pool,
                file.local_file_id,
                file.remote_number(),
                file.front_matter.url.as_deref(),
                &fields,
            )
            .await;

            match ensured {
                Ok(_) => {
                    files_by_id.insert(file.local_file_id, file);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("[sync] Skipping {}: {}", file.path.display(), e);
                    report.failed.push(FailedRecord {
                        record_id: 0,
                        remote_number: file.remote_number(),
                        path: Some(file.path.display().to_string()),
                        error: e,
                    });
                }
            }
        }

        let mut remotes_by_number: HashMap<i64, RemoteIssueSnapshot> = HashMap::new();
        for snapshot in remotes {
            sync_records::ensure_for_remote(&self.pool, &snapshot).await?;
            remotes_by_number.insert(snapshot.number, snapshot);
        }

        let records = sync_records::list_sync_records(&self.pool).await?;
        let mut items = Vec::new();

        for record in records {
            if done.contains(&record.id) {
                continue;
            }

            let local = record
                .local_file_id
                .and_then(|id| files_by_id.remove(&id));
            let local_missing = record.local_file_id.is_some() && local.is_none();
            let remote = record
                .remote_number
                .and_then(|n| remotes_by_number.remove(&n));
            let needs_fetch = remote.is_none()
                && local.is_some()
                && record.remote_number.is_some()
                && matches!(scope, RunScope::All);

            if local.is_none() && remote.is_none() {
                continue;
            }

            items.push(WorkItem {
                record,
                local,
                remote,
                needs_fetch,
                local_missing,
            });
        }

        Ok(items)
    }

    /// Process one record and persist its baseline and checkpoint.
    async fn process_item(&self, ctx: &RunContext<'_>, item: WorkItem) -> ItemResult {
        if ctx.stop.is_cancelled() || self.cancel.is_cancelled() {
            return ItemResult::NotStarted;
        }

        let record_id = item.record.id;
        let remote_number = item.record.remote_number;
        let path = item.path();

        let applied = match self.sync_record(ctx, item).await {
            Ok(applied) => applied,
            Err(e) if e.is_fatal() => return ItemResult::Fatal(e),
            Err(e) => {
                log::warn!("[sync] Record {} failed: {}", record_id, e);
                if let Some(run_id) = ctx.run_id {
                    if let Err(store_err) = self
                        .persist(Some(run_id), record_id, RecordOutcome::Failed, None)
                        .await
                    {
                        return ItemResult::Fatal(store_err);
                    }
                    self.log_record_error(record_id, &e).await;
                }
                return ItemResult::Failed(FailedRecord {
                    record_id,
                    remote_number,
                    path,
                    error: e,
                });
            }
        };

        if ctx.run_id.is_some() {
            if let Err(e) = self
                .persist(ctx.run_id, record_id, applied.outcome, applied.baseline.as_ref())
                .await
            {
                return ItemResult::Fatal(e);
            }
        }

        log::debug!("[sync] Record {}: {}", record_id, applied.outcome);

        if let Some(failed) = &applied.follow_up {
            log::warn!(
                "[sync] Record {} was {} but a later step failed: {}",
                record_id,
                applied.outcome,
                failed.error
            );
            if ctx.run_id.is_some() {
                self.log_record_error(record_id, &failed.error).await;
            }
        }

        ItemResult::Done {
            outcome: applied.outcome,
            decision: applied.decision,
            deferred: applied.deferred,
            follow_up: applied.follow_up,
        }
    }

    async fn log_record_error(&self, record_id: i64, error: &SyncError) {
        if let Err(e) = self
            .log_sync_operation(
                "sync_record",
                "error",
                Some(record_id),
                Some(error.to_string()),
                None,
            )
            .await
        {
            log::warn!("[sync] Failed to log error for record {}: {}", record_id, e);
        }
    }

    /// Commit a record's baseline together with its checkpoint.
    async fn persist(
        &self,
        run_id: Option<&str>,
        record_id: i64,
        outcome: RecordOutcome,
        baseline: Option<&Baseline>,
    ) -> Result<(), SyncError> {
        let _guard = self.write_gate.lock().await;
        let mut tx = self.pool.begin().await?;

        if let Some(baseline) = baseline {
            sync_records::save_baseline(
                &mut *tx,
                record_id,
                &baseline.fields,
                baseline.remote_updated_at,
                baseline.remote_etag.as_deref(),
            )
            .await?;
        }
        if let Some(run_id) = run_id {
            sync_state::mark_done(&mut *tx, run_id, record_id, outcome).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Decide and apply what one record needs.
    async fn sync_record(&self, ctx: &RunContext<'_>, item: WorkItem) -> Result<Applied, SyncError> {
        let WorkItem {
            record,
            local,
            remote,
            needs_fetch,
            local_missing,
        } = item;

        let remote = match (needs_fetch, record.remote_number) {
            (true, Some(number)) => Some(self.client.fetch_one(ctx.limiter, number).await?),
            _ => remote,
        };

        let local_fields = local.as_ref().map(IssueFile::fields);
        let kind = ChangeDetector::classify(&record, local_fields.as_ref(), remote.as_ref());
        let mode = ctx.config.mode;

        log::debug!(
            "[sync] Record {} (issue {:?}) classified {}",
            record.id,
            record.remote_number,
            kind
        );

        match kind {
            ChangeKind::NoChange => match (&local, &remote) {
                (Some(file), Some(snapshot)) if !record.has_baseline() => {
                    self.converge(ctx, &record, file, snapshot).await
                }
                _ => Ok(Applied::outcome(RecordOutcome::Unchanged)),
            },

            ChangeKind::LocalOnly => {
                let Some(file) = local.as_ref() else {
                    return Err(SyncError::internal("local change without a local file"));
                };
                if !mode.writes_remote() {
                    return Ok(Applied::outcome(RecordOutcome::Skipped));
                }
                match record.remote_number {
                    None => self.create_remote(ctx, &record, file).await,
                    Some(number) => {
                        self.push_update(ctx, &record, number, file, remote.as_ref())
                            .await
                    }
                }
            }

            ChangeKind::RemoteOnly => {
                let Some(snapshot) = remote.as_ref() else {
                    return Err(SyncError::internal("remote change without a remote issue"));
                };
                if !mode.writes_local() {
                    return Ok(Applied::outcome(RecordOutcome::Skipped));
                }
                if local_missing {
                    log::info!(
                        "[sync] Issue #{} changed but its local file is gone, skipping",
                        snapshot.number
                    );
                    return Ok(Applied::outcome(RecordOutcome::Skipped));
                }
                self.pull(ctx, &record, local.as_ref(), snapshot).await
            }

            ChangeKind::BothChanged => {
                let (Some(file), Some(snapshot)) = (local.as_ref(), remote.as_ref()) else {
                    return Err(SyncError::internal("conflict without both sides"));
                };

                if file.fields().same_content(&snapshot.fields) {
                    return self.converge(ctx, &record, file, snapshot).await;
                }

                let decision = ctx.resolver.resolve(&record, file.mtime, snapshot);
                log::info!(
                    "[sync] Conflict on issue #{}: {} ({})",
                    snapshot.number,
                    decision.resolution,
                    decision.rationale
                );

                let mut applied = match decision.resolution {
                    Resolution::ApplyLocal if mode.writes_remote() => {
                        self.push_update(ctx, &record, snapshot.number, file, Some(snapshot))
                            .await?
                    }
                    Resolution::ApplyRemote if mode.writes_local() => {
                        self.pull(ctx, &record, Some(file), snapshot).await?
                    }
                    Resolution::ApplyLocal | Resolution::ApplyRemote => {
                        Applied::outcome(RecordOutcome::Skipped)
                    }
                    Resolution::Defer => Applied {
                        deferred: Some(DeferredConflict {
                            record_id: record.id,
                            remote_number: Some(snapshot.number),
                            path: Some(file.path.display().to_string()),
                            local: file.fields(),
                            remote: snapshot.fields.clone(),
                            local_modified_at: file.mtime,
                            remote_updated_at: snapshot.updated_at,
                        }),
                        ..Applied::outcome(RecordOutcome::Deferred)
                    },
                };
                applied.decision = Some(decision);
                Ok(applied)
            }
        }
    }

    /// Baseline a record whose two sides already agree.
    async fn converge(
        &self,
        ctx: &RunContext<'_>,
        record: &SyncRecord,
        file: &IssueFile,
        snapshot: &RemoteIssueSnapshot,
    ) -> Result<Applied, SyncError> {
        if file.remote_number() != Some(snapshot.number)
            && ctx.config.mode.writes_local()
            && !ctx.config.dry_run
        {
            let mut front_matter = file.front_matter.clone();
            front_matter.link(snapshot.number, &snapshot.url);
            self.workspace
                .write_issue_file(&file.path, &front_matter, &file.body)
                .await?;
        }

        log::debug!(
            "[sync] Record {} already matches issue #{}",
            record.id,
            snapshot.number
        );

        Ok(Applied::with_baseline(
            RecordOutcome::Unchanged,
            Baseline::new(file.fields(), snapshot.updated_at, snapshot.etag.clone()),
        ))
    }

    /// Create the remote issue for a local-only record.
    async fn create_remote(
        &self,
        ctx: &RunContext<'_>,
        record: &SyncRecord,
        file: &IssueFile,
    ) -> Result<Applied, SyncError> {
        let fields = file.fields();
        if fields.title.trim().is_empty() {
            return Err(SyncError::validation_field(
                format!("{} has no title", file.path.display()),
                "title",
            ));
        }

        if ctx.config.dry_run {
            log::info!("[sync] Would create issue for {}", file.path.display());
            return Ok(Applied::outcome(RecordOutcome::Created));
        }

        let receipt = self.client.create(ctx.limiter, &fields).await?;

        {
            let _guard = self.write_gate.lock().await;
            sync_records::record_remote_link(&self.pool, record.id, receipt.number, &receipt.url)
                .await?;
            local_files::set_remote_link(
                &self.pool,
                file.local_file_id,
                receipt.number,
                &receipt.url,
            )
            .await?;
        }

        // Until the close lands, the baseline is the issue as GitHub created it.
        let mut as_created = fields.clone();
        as_created.state = IssueState::Open;
        let mut applied = Applied::with_baseline(
            RecordOutcome::Created,
            Baseline::new(as_created, receipt.updated_at, receipt.etag.clone()),
        );

        let finished = self.finish_create(ctx, file, &fields, &receipt).await;
        match finished {
            Ok(Some(closed)) => {
                applied.baseline = Some(Baseline::new(fields, closed.updated_at, closed.etag));
            }
            Ok(None) => {}
            Err(e) => {
                applied.follow_up = Some(FailedRecord {
                    record_id: record.id,
                    remote_number: Some(receipt.number),
                    path: Some(file.path.display().to_string()),
                    error: e,
                });
            }
        }

        Ok(applied)
    }

    /// Link the local file to a new issue and close the issue if the file
    /// says so. Returns the snapshot after closing.
    async fn finish_create(
        &self,
        ctx: &RunContext<'_>,
        file: &IssueFile,
        fields: &IssueFields,
        receipt: &CreatedIssue,
    ) -> Result<Option<RemoteIssueSnapshot>, SyncError> {
        let mut front_matter = file.front_matter.clone();
        front_matter.link(receipt.number, &receipt.url);
        self.workspace
            .write_issue_file(&file.path, &front_matter, &file.body)
            .await?;

        if fields.state != IssueState::Closed {
            return Ok(None);
        }

        let patch = IssuePatch {
            state: Some(IssueState::Closed),
            ..Default::default()
        };
        let snapshot = self.client.update(ctx.limiter, receipt.number, &patch).await?;
        Ok(Some(snapshot))
    }

    /// Push local fields to an existing remote issue.
    async fn push_update(
        &self,
        ctx: &RunContext<'_>,
        record: &SyncRecord,
        number: i64,
        file: &IssueFile,
        remote: Option<&RemoteIssueSnapshot>,
    ) -> Result<Applied, SyncError> {
        let fields = file.fields();
        let base = remote
            .map(|snapshot| &snapshot.fields)
            .unwrap_or(&record.fields);
        let patch = IssuePatch::between(base, &fields);

        if patch.is_empty() {
            let (updated_at, etag) = match remote {
                Some(snapshot) => (Some(snapshot.updated_at.timestamp()), snapshot.etag.clone()),
                None => (record.last_remote_updated_at, record.last_remote_etag.clone()),
            };
            return Ok(Applied::with_baseline(
                RecordOutcome::Unchanged,
                Baseline {
                    fields,
                    remote_updated_at: updated_at,
                    remote_etag: etag,
                },
            ));
        }

        if ctx.config.dry_run {
            log::info!(
                "[sync] Would update issue #{} ({})",
                number,
                patch.field_names().join(", ")
            );
            return Ok(Applied::outcome(RecordOutcome::UpdatedRemote));
        }

        let snapshot = self.client.update(ctx.limiter, number, &patch).await?;

        Ok(Applied::with_baseline(
            RecordOutcome::UpdatedRemote,
            Baseline::new(fields, snapshot.updated_at, snapshot.etag),
        ))
    }

    /// Write the remote issue into its local file, creating one if needed.
    async fn pull(
        &self,
        ctx: &RunContext<'_>,
        record: &SyncRecord,
        local: Option<&IssueFile>,
        snapshot: &RemoteIssueSnapshot,
    ) -> Result<Applied, SyncError> {
        let mut fields = snapshot.fields.clone();
        if self.client.config().project_number.is_some() {
            fields.project_fields = self
                .client
                .fetch_project_fields(ctx.limiter, snapshot.number)
                .await?;
        } else if let Some(file) = local {
            fields.project_fields = file.fields().project_fields;
        }

        if ctx.config.dry_run {
            log::info!("[sync] Would write issue #{} locally", snapshot.number);
            return Ok(Applied::outcome(RecordOutcome::UpdatedLocal));
        }

        match local {
            Some(file) => {
                let mut front_matter = file.front_matter.clone();
                front_matter.apply_fields(&fields);
                front_matter.link(snapshot.number, &snapshot.url);
                self.workspace
                    .write_issue_file(&file.path, &front_matter, &fields.body)
                    .await?;

                let _guard = self.write_gate.lock().await;
                local_files::touch_file(&self.pool, file.local_file_id).await?;
            }
            None => {
                let path = self
                    .workspace
                    .path_for_new_issue(snapshot.number, &fields.title);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(SyncError::local_write(
                        format!("Refusing to overwrite untracked file for issue #{}", snapshot.number),
                        path.display().to_string(),
                    ));
                }

                let mut front_matter = IssueFrontMatter::default();
                front_matter.link(snapshot.number, &snapshot.url);
                front_matter.apply_fields(&fields);
                self.workspace
                    .write_issue_file(&path, &front_matter, &fields.body)
                    .await?;

                let _guard = self.write_gate.lock().await;
                let local_file_id = self.workspace.register_new_file(&path).await?;
                local_files::set_remote_link(
                    &self.pool,
                    local_file_id,
                    snapshot.number,
                    &snapshot.url,
                )
                .await?;
                sync_records::link_local_file(&self.pool, record.id, local_file_id).await?;
            }
        }

        Ok(Applied::with_baseline(
            RecordOutcome::UpdatedLocal,
            Baseline::new(fields, snapshot.updated_at, snapshot.etag.clone()),
        ))
    }

    /// Log a sync operation to the sync_log table.
    pub async fn log_sync_operation(
        &self,
        operation: &str,
        status: &str,
        record_id: Option<i64>,
        message: Option<String>,
        duration_ms: Option<i64>,
    ) -> Result<(), SyncError> {
        let _guard = self.write_gate.lock().await;

        sqlx::query(
            r#"
            INSERT INTO sync_log (operation, status, record_id, message, duration_ms, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(operation)
        .bind(status)
        .bind(record_id)
        .bind(&message)
        .bind(duration_ms)
        .bind(now())
        .execute(&self.pool)
        .await?;

        // Keep only MAX_LOG_ENTRIES
        sqlx::query(
            r#"
            DELETE FROM sync_log WHERE id NOT IN (
                SELECT id FROM sync_log ORDER BY id DESC LIMIT ?
            )
            "#,
        )
        .bind(MAX_LOG_ENTRIES)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get recent sync log entries, newest first.
    pub async fn get_sync_log(&self, limit: i64) -> Result<Vec<SyncLogEntry>, SyncError> {
        let entries = sqlx::query_as::<_, SyncLogEntry>(
            "SELECT id, operation, status, record_id, message, duration_ms, timestamp FROM sync_log ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
