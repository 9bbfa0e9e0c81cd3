use std::collections::HashMap;

use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;

use crate::{Action, AuthAdapter, AuthError, Challenge, Password, Subject};

/// HTTP Basic authentication against a static account table.
///
/// With `anonymous_pull` enabled, requests without credentials are admitted
/// as the anonymous subject, which may pull but not push.
#[derive(Debug)]
pub struct BasicAuth {
    accounts: HashMap<String, Password>,
    anonymous_pull: bool,
}

impl BasicAuth {
    pub fn new(accounts: HashMap<String, Password>, anonymous_pull: bool) -> Self {
        Self {
            accounts,
            anonymous_pull,
        }
    }

    /// Decode `Basic <base64(user:password)>` into its parts.
    fn decode(value: &str) -> Result<(String, String), AuthError> {
        let unauthorized = |detail: &str| AuthError::Unauthorized {
            detail: Some(detail.to_string()),
        };

        let encoded = value.trim_start_matches("Basic ").trim();
        let decoded = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| unauthorized("malformed basic credentials"))?;
        let decoded =
            String::from_utf8(decoded).map_err(|_| unauthorized("malformed basic credentials"))?;
        let (user, password) = decoded
            .split_once(':')
            .ok_or_else(|| unauthorized("malformed basic credentials"))?;
        Ok((user.to_string(), password.to_string()))
    }
}

#[async_trait::async_trait]
impl AuthAdapter for BasicAuth {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn authenticate(&self, authorization: Option<&str>) -> Result<Subject, AuthError> {
        let value = match authorization {
            Some(value) => value,
            None if self.anonymous_pull => return Ok(Subject::anonymous()),
            None => return Err(AuthError::Unauthorized { detail: None }),
        };

        if !value.starts_with("Basic ") {
            let scheme = value.split_whitespace().next().unwrap_or("").to_string();
            return Err(AuthError::Unsupported { scheme });
        }

        let (user, password) = Self::decode(value)?;
        match self.accounts.get(&user) {
            Some(stored) if stored.matches(&password) => {
                tracing::debug!(%user, "authenticated");
                Ok(Subject::named(user))
            }
            _ => Err(AuthError::Unauthorized {
                detail: Some("invalid credentials".to_string()),
            }),
        }
    }

    async fn authorize(
        &self,
        subject: &Subject,
        repo: Option<&str>,
        action: Action,
    ) -> Result<(), AuthError> {
        // Named accounts have full access; the anonymous subject exists
        // only when anonymous_pull admitted it, and may only pull.
        if subject.is_anonymous() && action == Action::Push {
            return Err(AuthError::Denied {
                detail: Some(format!(
                    "anonymous access cannot push{}",
                    repo.map(|r| format!(" to {r}")).unwrap_or_default()
                )),
            });
        }
        Ok(())
    }

    fn challenge(&self, realm: &str) -> Challenge {
        Challenge::new("Basic").param("realm", realm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(anonymous_pull: bool) -> BasicAuth {
        let mut accounts = HashMap::new();
        accounts.insert("ada".to_string(), Password::new("s3cret"));
        BasicAuth::new(accounts, anonymous_pull)
    }

    fn header(user: &str, password: &str) -> String {
        format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{user}:{password}"))
        )
    }

    #[tokio::test]
    async fn valid_credentials_authenticate() {
        let subject = auth(false)
            .authenticate(Some(&header("ada", "s3cret")))
            .await
            .unwrap();
        assert_eq!(subject.name(), Some("ada"));
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let err = auth(false)
            .authenticate(Some(&header("ada", "wrong")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let err = auth(false).authenticate(None).await.unwrap_err();
        assert_eq!(err, AuthError::Unauthorized { detail: None });
    }

    #[tokio::test]
    async fn bearer_scheme_is_unsupported() {
        let err = auth(false)
            .authenticate(Some("Bearer some-token"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::Unsupported {
                scheme: "Bearer".to_string()
            }
        );
    }

    #[tokio::test]
    async fn garbage_base64_is_unauthorized() {
        let err = auth(false)
            .authenticate(Some("Basic not!base64"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized { detail: Some(_) }));
    }

    #[tokio::test]
    async fn anonymous_pull_admits_and_limits() {
        let adapter = auth(true);
        let subject = adapter.authenticate(None).await.unwrap();
        assert!(subject.is_anonymous());

        adapter
            .authorize(&subject, Some("lib/x"), Action::Pull)
            .await
            .unwrap();
        let err = adapter
            .authorize(&subject, Some("lib/x"), Action::Push)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Denied { .. }));
    }

    #[test]
    fn challenge_names_the_realm() {
        let challenge = auth(false).challenge("test-registry");
        assert_eq!(challenge.header_value(), "Basic realm=\"test-registry\"");
    }
}
