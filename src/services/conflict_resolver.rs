//! Decide which side wins for a record changed on both sides.

use crate::models::conflict::{ConflictDecision, ConflictStrategy, Resolution};
use crate::models::issue::RemoteIssueSnapshot;
use crate::models::sync_record::SyncRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use std::cmp::Ordering;

/// Applies one strategy, fixed for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve one both-changed record.
    ///
    /// Timestamps are compared at whole-second precision, the precision
    /// GitHub reports `updated_at` in.
    pub fn resolve(
        &self,
        record: &SyncRecord,
        local_modified_at: DateTime<Utc>,
        remote: &RemoteIssueSnapshot,
    ) -> ConflictDecision {
        let remote_updated_at = remote.updated_at;

        let (resolution, rationale) = match self.strategy {
            ConflictStrategy::GithubFirst => (
                Resolution::ApplyRemote,
                "github_first: the remote side always wins".to_string(),
            ),
            ConflictStrategy::LocalFirst => (
                Resolution::ApplyLocal,
                "local_first: the local side always wins".to_string(),
            ),
            ConflictStrategy::TimestampBased => {
                match local_modified_at.timestamp().cmp(&remote_updated_at.timestamp()) {
                    Ordering::Greater => (
                        Resolution::ApplyLocal,
                        format!(
                            "timestamp_based: local modified {} is newer than remote updated {}",
                            fmt_ts(local_modified_at),
                            fmt_ts(remote_updated_at)
                        ),
                    ),
                    Ordering::Less => (
                        Resolution::ApplyRemote,
                        format!(
                            "timestamp_based: remote updated {} is newer than local modified {}",
                            fmt_ts(remote_updated_at),
                            fmt_ts(local_modified_at)
                        ),
                    ),
                    Ordering::Equal => (
                        Resolution::ApplyLocal,
                        format!(
                            "timestamp_based: both sides changed at {}, tie goes to local_first",
                            fmt_ts(local_modified_at)
                        ),
                    ),
                }
            }
            ConflictStrategy::Conservative => (
                Resolution::Defer,
                format!(
                    "conservative: local modified {} and remote updated {}, left for manual resolution",
                    fmt_ts(local_modified_at),
                    fmt_ts(remote_updated_at)
                ),
            ),
        };

        ConflictDecision {
            record_id: record.id,
            remote_number: record.remote_number.or(Some(remote.number)),
            resolution,
            strategy: self.strategy,
            local_modified_at,
            remote_updated_at,
            rationale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue::IssueFields;
    use chrono::TimeZone;

    fn record() -> SyncRecord {
        SyncRecord {
            id: 5,
            local_file_id: Some(1),
            remote_number: Some(42),
            remote_url: None,
            last_synced_hash: Some("h".to_string()),
            last_remote_updated_at: Some(0),
            last_remote_etag: None,
            fields: IssueFields::default(),
            last_synced_at: Some(0),
        }
    }

    fn remote_at(ts: DateTime<Utc>) -> RemoteIssueSnapshot {
        RemoteIssueSnapshot {
            number: 42,
            url: "https://github.com/o/r/issues/42".to_string(),
            fields: IssueFields::default(),
            updated_at: ts,
            etag: None,
            from_cache: false,
        }
    }

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_fixed_strategies() {
        let remote = remote_at(t(9));
        let github = ConflictResolver::new(ConflictStrategy::GithubFirst).resolve(&record(), t(10), &remote);
        assert_eq!(github.resolution, Resolution::ApplyRemote);

        let local = ConflictResolver::new(ConflictStrategy::LocalFirst).resolve(&record(), t(8), &remote);
        assert_eq!(local.resolution, Resolution::ApplyLocal);
        assert_eq!(local.strategy, ConflictStrategy::LocalFirst);
    }

    #[test]
    fn test_timestamp_based_newer_local_wins() {
        let resolver = ConflictResolver::new(ConflictStrategy::TimestampBased);
        let decision = resolver.resolve(&record(), t(10), &remote_at(t(9)));
        assert_eq!(decision.resolution, Resolution::ApplyLocal);
        assert!(decision.rationale.contains("2025-01-02T10:00:00Z"));
        assert!(decision.rationale.contains("2025-01-02T09:00:00Z"));
    }

    #[test]
    fn test_timestamp_based_newer_remote_wins() {
        let resolver = ConflictResolver::new(ConflictStrategy::TimestampBased);
        let decision = resolver.resolve(&record(), t(9), &remote_at(t(10)));
        assert_eq!(decision.resolution, Resolution::ApplyRemote);
    }

    #[test]
    fn test_timestamp_based_tie_goes_local() {
        let resolver = ConflictResolver::new(ConflictStrategy::TimestampBased);
        // sub-second difference still counts as a tie
        let local = t(9) + chrono::Duration::milliseconds(400);
        let decision = resolver.resolve(&record(), local, &remote_at(t(9)));
        assert_eq!(decision.resolution, Resolution::ApplyLocal);
        assert!(decision.rationale.contains("local_first"));
    }

    #[test]
    fn test_conservative_always_defers() {
        let resolver = ConflictResolver::new(ConflictStrategy::Conservative);
        for (local, remote) in [(t(10), t(9)), (t(9), t(10)), (t(9), t(9))] {
            let decision = resolver.resolve(&record(), local, &remote_at(remote));
            assert_eq!(decision.resolution, Resolution::Defer);
            assert_eq!(decision.record_id, 5);
            assert_eq!(decision.remote_number, Some(42));
        }
    }
}
