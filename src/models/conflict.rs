//! Conflict strategy and decision models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a record changed on both sides is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Remote side always wins.
    GithubFirst,
    /// Local side always wins.
    LocalFirst,
    /// The more recent side wins; an exact tie goes to the local side.
    #[default]
    TimestampBased,
    /// Never apply automatically; defer for manual resolution.
    Conservative,
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "github_first" => Ok(Self::GithubFirst),
            "local_first" => Ok(Self::LocalFirst),
            "timestamp_based" => Ok(Self::TimestampBased),
            "conservative" => Ok(Self::Conservative),
            other => Err(format!("unknown conflict strategy: {}", other)),
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GithubFirst => write!(f, "github_first"),
            Self::LocalFirst => write!(f, "local_first"),
            Self::TimestampBased => write!(f, "timestamp_based"),
            Self::Conservative => write!(f, "conservative"),
        }
    }
}

/// Which side a conflict decision applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ApplyLocal,
    ApplyRemote,
    /// Leave both sides untouched and report for manual resolution.
    Defer,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApplyLocal => write!(f, "apply_local"),
            Self::ApplyRemote => write!(f, "apply_remote"),
            Self::Defer => write!(f, "defer"),
        }
    }
}

/// Outcome of resolving one both-changed record. Lives only for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictDecision {
    pub record_id: i64,
    pub remote_number: Option<i64>,
    pub resolution: Resolution,
    pub strategy: ConflictStrategy,
    pub local_modified_at: DateTime<Utc>,
    pub remote_updated_at: DateTime<Utc>,
    /// Human-readable account of the rule applied.
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "github_first".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::GithubFirst
        );
        assert_eq!(
            "local-first".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::LocalFirst
        );
        assert_eq!(
            "TIMESTAMP_BASED".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::TimestampBased
        );
        assert_eq!(
            "conservative".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::Conservative
        );
        assert!("newest_wins".parse::<ConflictStrategy>().is_err());
    }

    #[test]
    fn test_strategy_serializes_snake_case() {
        let json = serde_json::to_string(&ConflictStrategy::TimestampBased).unwrap();
        assert_eq!(json, "\"timestamp_based\"");
        assert_eq!(Resolution::ApplyRemote.to_string(), "apply_remote");
    }
}
