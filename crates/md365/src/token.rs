//! Bearer token capability.
//!
//! Acquiring and refreshing tokens happens elsewhere (an interactive login, a
//! secrets manager); this crate only asks for a currently valid token.

use crate::config::Config;
use async_trait::async_trait;
use std::collections::BTreeMap;
use sync_core::RemoteError;

/// Source of a "valid bearer token for account X"
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self, account: &str) -> Result<String, RemoteError>;
}

/// Reads tokens from environment variables.
///
/// Uses the account's `token_env` when configured, otherwise
/// `MD365_TOKEN_<ACCOUNT>` with the name upper-cased and every
/// non-alphanumeric character replaced by `_`.
pub struct EnvTokenProvider {
    variables: BTreeMap<String, String>,
}

impl EnvTokenProvider {
    pub fn from_config(config: &Config) -> Self {
        let variables = config
            .accounts
            .iter()
            .map(|(name, account)| {
                let var = account
                    .token_env
                    .clone()
                    .unwrap_or_else(|| default_token_var(name));
                (name.clone(), var)
            })
            .collect();
        Self { variables }
    }

    /// Variable consulted for `account`
    pub fn variable_for(&self, account: &str) -> String {
        self.variables
            .get(account)
            .cloned()
            .unwrap_or_else(|| default_token_var(account))
    }
}

pub fn default_token_var(account: &str) -> String {
    let suffix: String = account
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("MD365_TOKEN_{}", suffix)
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn bearer_token(&self, account: &str) -> Result<String, RemoteError> {
        let var = self.variable_for(account);
        match std::env::var(&var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(RemoteError::Auth(format!(
                "no token for account '{}' (set {})",
                account, var
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_token_var() {
        assert_eq!(default_token_var("work"), "MD365_TOKEN_WORK");
        assert_eq!(default_token_var("my-home.2"), "MD365_TOKEN_MY_HOME_2");
    }

    #[tokio::test]
    async fn test_env_provider_uses_configured_variable() {
        let config = Config::from_yaml(
            "data_dir: /x\naccounts:\n  work:\n    token_env: MD365_TEST_TOKEN_ONLY_HERE\n  home: {}\n",
        )
        .unwrap();
        let provider = EnvTokenProvider::from_config(&config);

        assert_eq!(provider.variable_for("work"), "MD365_TEST_TOKEN_ONLY_HERE");
        assert_eq!(provider.variable_for("home"), "MD365_TOKEN_HOME");

        let err = provider.bearer_token("work").await.unwrap_err();
        assert!(matches!(err, RemoteError::Auth(_)));
        assert!(err.to_string().contains("MD365_TEST_TOKEN_ONLY_HERE"));
    }
}
