//! GitHub token lookup.
//!
//! Tokens are resolved from an explicit value, then the `GITHUB_TOKEN`
//! environment variable, then the OS keychain (Keychain on macOS,
//! Credential Manager on Windows, Secret Service on Linux).

use crate::error::SyncError;
use keyring::Entry;

/// Service name used in the keychain.
const SERVICE_NAME: &str = "issue-sync";

/// Environment variable checked before the keychain.
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Credential storage operations.
pub struct CredentialService;

impl CredentialService {
    /// Store a token for a repository.
    pub fn store_token(owner: &str, repo: &str, token: &str) -> Result<(), SyncError> {
        let entry = Self::get_entry(owner, repo)?;

        entry
            .set_password(token)
            .map_err(|e| SyncError::internal(format!("Failed to store token: {}", e)))
    }

    /// Retrieve the token stored for a repository.
    pub fn get_token(owner: &str, repo: &str) -> Result<String, SyncError> {
        let entry = Self::get_entry(owner, repo)?;

        entry.get_password().map_err(|e| match e {
            keyring::Error::NoEntry => {
                SyncError::not_found_with_id("credential", account_name(owner, repo))
            }
            _ => SyncError::internal(format!("Failed to retrieve token: {}", e)),
        })
    }

    /// Delete the token for a repository. Deleting a missing token is not an error.
    pub fn delete_token(owner: &str, repo: &str) -> Result<(), SyncError> {
        let entry = Self::get_entry(owner, repo)?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SyncError::internal(format!("Failed to delete token: {}", e))),
        }
    }

    /// Resolve the token to use for a repository.
    ///
    /// Fails with an authentication error when no source has one.
    pub fn resolve_token(
        explicit: Option<&str>,
        owner: &str,
        repo: &str,
    ) -> Result<String, SyncError> {
        let from_env = std::env::var(TOKEN_ENV_VAR).ok();
        Self::resolve_token_from(explicit, from_env.as_deref(), owner, repo)
    }

    fn resolve_token_from(
        explicit: Option<&str>,
        from_env: Option<&str>,
        owner: &str,
        repo: &str,
    ) -> Result<String, SyncError> {
        let non_empty = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        };

        if let Some(token) = non_empty(explicit) {
            return Ok(token);
        }
        if let Some(token) = non_empty(from_env) {
            return Ok(token);
        }

        match Self::get_token(owner, repo) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            Ok(_) | Err(_) => Err(SyncError::authentication(format!(
                "No GitHub token for {}: pass one explicitly, set {} or store one in the keychain",
                account_name(owner, repo),
                TOKEN_ENV_VAR
            ))),
        }
    }

    /// Create a keyring entry for a repository.
    fn get_entry(owner: &str, repo: &str) -> Result<Entry, SyncError> {
        Entry::new(SERVICE_NAME, &account_name(owner, repo)).map_err(|e| {
            SyncError::internal(format!("Failed to create keyring entry: {}", e))
        })
    }
}

/// Keychain account for a repository: `owner/repo`, lowercased.
fn account_name(owner: &str, repo: &str) -> String {
    format!(
        "{}/{}",
        owner.trim().trim_matches('/'),
        repo.trim().trim_matches('/')
    )
    .to_lowercase()
}
