use std::collections::HashMap;

use crate::config::schema::{str_to_hex_hash, HttpFrontend};
use crate::data_types::UserIdentity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("MISSING_TOKEN")]
    MissingToken,
    #[error("WRONG_TOKEN")]
    WrongToken,
}

/// Maps the SHA-256 hashes of bearer tokens to the identities they authenticate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    users: HashMap<String, UserIdentity>,
}

impl AccessPolicy {
    pub fn from_config(config: &HttpFrontend) -> Self {
        Self {
            users: config
                .users
                .iter()
                .map(|user| {
                    (
                        user.token_sha256.to_ascii_lowercase(),
                        UserIdentity::new(user.id, user.email.clone()),
                    )
                })
                .collect(),
        }
    }

    pub fn with_user(mut self, token: &str, user: UserIdentity) -> Self {
        self.users.insert(str_to_hex_hash(token), user);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

pub fn token_to_user(
    token: Option<String>,
    policy: &AccessPolicy,
) -> Result<UserIdentity, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    policy
        .users
        .get(&str_to_hex_hash(&token))
        .cloned()
        .ok_or(AuthError::WrongToken)
}

#[cfg(test)]
mod tests {
    use crate::config::schema::{str_to_hex_hash, HttpFrontend, HttpUser};
    use crate::data_types::UserIdentity;

    use super::{token_to_user, AccessPolicy, AuthError};

    const ADA_TOKEN: &str = "ada-token";
    const BOB_TOKEN: &str = "bob-token";

    fn policy() -> AccessPolicy {
        AccessPolicy::default()
            .with_user(ADA_TOKEN, UserIdentity::new(1, "ada@example.com"))
            .with_user(BOB_TOKEN, UserIdentity::new(2, "bob@example.com"))
    }

    #[test]
    fn test_token_maps_to_its_user() {
        assert_eq!(
            token_to_user(Some(BOB_TOKEN.to_string()), &policy()),
            Ok(UserIdentity::new(2, "bob@example.com"))
        );
    }

    #[test]
    fn test_missing_and_wrong_tokens() {
        assert_eq!(token_to_user(None, &policy()), Err(AuthError::MissingToken));
        assert_eq!(
            token_to_user(Some("nope".to_string()), &policy()),
            Err(AuthError::WrongToken)
        );
        assert_eq!(
            token_to_user(Some(ADA_TOKEN.to_string()), &AccessPolicy::default()),
            Err(AuthError::WrongToken)
        );
    }

    #[test]
    fn test_from_config_accepts_uppercase_hashes() {
        let config = HttpFrontend {
            users: vec![HttpUser {
                id: 7,
                email: "eve@example.com".to_string(),
                token_sha256: str_to_hex_hash("eve-token").to_ascii_uppercase(),
            }],
            ..Default::default()
        };
        let policy = AccessPolicy::from_config(&config);
        assert!(!policy.is_empty());
        assert_eq!(
            token_to_user(Some("eve-token".to_string()), &policy).map(|u| u.id),
            Ok(7)
        );
    }
}
