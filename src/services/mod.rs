//! Business logic services.
//!
//! This module contains the sync pipeline: the GitHub client and its shared
//! rate-limit context, the markdown workspace, change detection, conflict
//! resolution, run state and the orchestrating engine.

pub mod change_detector;
pub mod conflict_resolver;
pub mod credentials;
pub mod github_client;
pub mod markdown;
pub mod rate_limit;
pub mod sync_engine;
pub mod sync_state;
pub mod workspace;

pub use change_detector::{ChangeDetector, ChangeKind};
pub use conflict_resolver::ConflictResolver;
pub use credentials::CredentialService;
pub use github_client::{GitHubClient, GitHubClientConfig, IssueFilter};
pub use rate_limit::{RateLimitContext, RetryPolicy};
pub use sync_engine::{SyncConfig, SyncEngine, SyncLogEntry};
pub use workspace::{IssueFile, IssueWorkspace, MarkdownWorkspace};
