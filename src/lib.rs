//! Issue Sync - bidirectional sync between markdown issue files and GitHub.
//!
//! Issue-tagged markdown files registered in the local state store are
//! reconciled with the issues of one GitHub repository. The embedding
//! binary opens the store with [`db::initialize`], builds a
//! [`services::GitHubClient`] and a [`services::MarkdownWorkspace`], and
//! drives runs through [`services::SyncEngine`].

pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::SyncError;
pub use models::SyncReport;
pub use services::{SyncConfig, SyncEngine};
