//! Identity resolution from configured users.

use std::collections::HashMap;

use async_trait::async_trait;

use stepcode_core::model::Principal;
use stepcode_core::traits::IdentityProvider;

use crate::config::{StepcodeConfig, UserConfig};
use crate::error::ConfigError;

/// Resolves principals from the `[users]` table of the configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigIdentityProvider {
    users: HashMap<String, UserConfig>,
}

impl ConfigIdentityProvider {
    pub fn new(users: HashMap<String, UserConfig>) -> Self {
        Self { users }
    }

    pub fn from_config(config: &StepcodeConfig) -> Self {
        Self::new(config.users.clone())
    }

    /// The principal for a named user.
    pub fn principal_for_user(&self, name: &str) -> Result<Principal, ConfigError> {
        self.users
            .get(name)
            .map(|user| Principal {
                id: Some(name.to_string()),
                role: user.role,
            })
            .ok_or_else(|| ConfigError::UnknownUser(name.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for ConfigIdentityProvider {
    async fn principal(&self, token: Option<&str>) -> anyhow::Result<Principal> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(Principal::anonymous());
        };
        let found = self
            .users
            .iter()
            .find(|(_, user)| user.token.as_deref() == Some(token))
            .map(|(name, user)| Principal {
                id: Some(name.clone()),
                role: user.role,
            });
        Ok(found.unwrap_or_else(Principal::anonymous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepcode_core::model::Role;

    fn provider() -> ConfigIdentityProvider {
        let mut users = HashMap::new();
        users.insert(
            "alice".to_string(),
            UserConfig {
                role: Role::Student,
                token: Some("alice-token".into()),
            },
        );
        users.insert(
            "prof".to_string(),
            UserConfig {
                role: Role::Teacher,
                token: None,
            },
        );
        ConfigIdentityProvider::new(users)
    }

    #[tokio::test]
    async fn tokens_resolve_to_users() {
        let p = provider();
        let alice = p.principal(Some("alice-token")).await.unwrap();
        assert_eq!(alice, Principal::student("alice"));
        assert!(alice.is_authenticated());
    }

    #[tokio::test]
    async fn unknown_or_missing_tokens_are_anonymous() {
        let p = provider();
        assert!(!p.principal(None).await.unwrap().is_authenticated());
        assert!(!p.principal(Some("")).await.unwrap().is_authenticated());
        assert!(!p.principal(Some("forged")).await.unwrap().is_authenticated());
    }

    #[test]
    fn users_by_name() {
        let p = provider();
        assert_eq!(p.principal_for_user("prof").unwrap(), Principal::teacher("prof"));
        assert!(matches!(
            p.principal_for_user("mallory"),
            Err(ConfigError::UnknownUser(_))
        ));
    }
}
