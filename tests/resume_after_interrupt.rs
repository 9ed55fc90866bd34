//! Interrupted runs resume from their checkpoint.
//!
//! A 401 on the third create aborts the first run after two records were
//! checkpointed. The next invocation resumes the same run and only creates
//! the remaining issues.

mod common;

use common::{config, Harness};
use issue_sync_lib::models::sync_report::EXIT_FATAL;
use issue_sync_lib::models::{ConflictStrategy, RunStatus, SyncMode};
use issue_sync_lib::services::sync_state;
use issue_sync_lib::{SyncConfig, SyncError};
use std::collections::HashSet;

const TITLES: [&str; 5] = ["Alpha", "Bravo", "Charlie", "Delta", "Echo"];

async fn knowledge_base(h: &Harness) {
    for title in TITLES {
        let name = format!("{}.md", title.to_lowercase());
        let content = format!("---\nissue: true\ntitle: {}\n---\n\nAbout {}\n", title, title);
        h.add_file(&name, &content).await;
    }
}

fn sequential() -> SyncConfig {
    SyncConfig {
        concurrency: 1,
        ..config(SyncMode::Push, ConflictStrategy::TimestampBased)
    }
}

#[tokio::test]
async fn test_interrupted_run_resumes_without_duplicate_creates() {
    let h = Harness::new().await;
    knowledge_base(&h).await;
    h.fake.fail_create_at(3);

    let first = h.sync(&sequential()).await;

    assert_eq!(first.status, RunStatus::Interrupted);
    assert_eq!(first.exit_code(), EXIT_FATAL);
    assert!(matches!(first.fatal_error, Some(SyncError::Authentication { .. })));
    assert_eq!(first.created, 2);
    assert_eq!(h.fake.create_count(), 2);

    let run = sync_state::get_run(&h.pool, &first.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status_enum(), RunStatus::Interrupted);
    assert_eq!(
        sync_state::checkpointed_records(&h.pool, &first.run_id)
            .await
            .unwrap()
            .len(),
        2
    );

    h.fake.clear_create_failure();
    let second = h.sync(&sequential()).await;

    assert!(second.resumed);
    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.already_done, 2);
    assert_eq!(second.created, 3);
    assert_eq!(second.unchanged, 0);

    // two from the first run, three from the resume
    assert_eq!(h.fake.create_count(), 5);
    let titles: HashSet<String> = h.fake.issues().into_iter().map(|i| i.title).collect();
    assert_eq!(titles.len(), TITLES.len());

    // a completed run leaves nothing to resume
    let third = h.sync(&sequential()).await;
    assert!(!third.resumed);
    assert_eq!(third.total_writes(), 0);
    assert_eq!(h.fake.create_count(), 5);
}

#[tokio::test]
async fn test_force_abandons_the_checkpoint() {
    let h = Harness::new().await;
    knowledge_base(&h).await;
    h.fake.fail_create_at(3);

    let first = h.sync(&sequential()).await;
    assert_eq!(first.status, RunStatus::Interrupted);

    h.fake.clear_create_failure();
    let forced = h
        .sync(&SyncConfig {
            force: true,
            ..sequential()
        })
        .await;

    assert!(!forced.resumed);
    assert_ne!(forced.run_id, first.run_id);
    assert_eq!(forced.already_done, 0);
    // the two issues created before the abort are already baselined
    assert_eq!(forced.unchanged, 2);
    assert_eq!(forced.created, 3);
    assert_eq!(h.fake.create_count(), 5);

    let abandoned = sync_state::get_run(&h.pool, &first.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(abandoned.status_enum(), RunStatus::Abandoned);
}

#[tokio::test]
async fn test_other_mode_does_not_resume() {
    let h = Harness::new().await;
    knowledge_base(&h).await;
    h.fake.fail_create_at(2);

    let first = h.sync(&sequential()).await;
    assert_eq!(first.status, RunStatus::Interrupted);

    h.fake.clear_create_failure();
    let bidirectional = h
        .sync(&SyncConfig {
            concurrency: 1,
            ..config(SyncMode::Bidirectional, ConflictStrategy::TimestampBased)
        })
        .await;

    assert!(!bidirectional.resumed);
    assert_eq!(bidirectional.created, 4);

    let still_interrupted = sync_state::get_run(&h.pool, &first.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still_interrupted.status_enum(), RunStatus::Interrupted);
}
