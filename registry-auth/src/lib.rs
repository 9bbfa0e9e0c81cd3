//! # Registry authentication backends
//!
//! Credential validation and per-repository authorization for the registry
//! engine, behind the [`AuthAdapter`] contract. The engine never inspects
//! `Authorization` headers itself: it hands the raw header value to the
//! adapter and receives a [`Subject`], then asks the adapter whether that
//! subject may perform an [`Action`] on a repository.
//!
//! Two backends are provided: [`Anonymous`] (every request is allowed) and
//! [`BasicAuth`] (a static account table with HTTP Basic credentials).

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

mod basic;
mod password;

#[doc(inline)]
pub use basic::BasicAuth;
#[doc(inline)]
pub use password::Password;

/// The authenticated principal of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    name: Option<String>,
}

impl Subject {
    /// A subject with no identity (unauthenticated but admitted).
    pub fn anonymous() -> Self {
        Subject { name: None }
    }

    /// A subject identified by an account name.
    pub fn named(name: impl Into<String>) -> Self {
        Subject {
            name: Some(name.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }
}

/// The action a request performs, derived from its HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pull,
    Push,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pull => "pull",
            Action::Push => "push",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures produced by an [`AuthAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Credentials are missing or invalid; the response must carry the
    /// adapter's challenge.
    #[error("authentication required")]
    Unauthorized { detail: Option<String> },

    /// The `Authorization` header used a scheme this adapter does not
    /// implement.
    #[error("unsupported authorization scheme: {scheme}")]
    Unsupported { scheme: String },

    /// The subject authenticated but may not perform the action.
    #[error("access denied")]
    Denied { detail: Option<String> },
}

impl AuthError {
    /// Human-readable detail carried into the error envelope, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            AuthError::Unauthorized { detail } | AuthError::Denied { detail } => detail.as_deref(),
            AuthError::Unsupported { .. } => None,
        }
    }
}

/// A `WWW-Authenticate` challenge: scheme plus `key="value"` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    scheme: &'static str,
    params: Vec<(&'static str, String)>,
}

impl Challenge {
    pub fn new(scheme: &'static str) -> Self {
        Challenge {
            scheme,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    /// Render the header value, e.g. `Basic realm="registry"`.
    pub fn header_value(&self) -> String {
        let mut value = self.scheme.to_string();
        for (i, (key, param)) in self.params.iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            value.push(sep);
            value.push_str(&format!("{key}=\"{param}\""));
        }
        value
    }
}

/// An authentication backend for the registry.
///
/// `authenticate` turns the raw `Authorization` header into a [`Subject`];
/// `authorize` decides whether that subject may perform an action on a
/// repository (`None` means a registry-level operation such as the
/// catalog); `challenge` produces the `WWW-Authenticate` value for 401
/// responses.
#[async_trait::async_trait]
pub trait AuthAdapter: fmt::Debug {
    fn name(&self) -> &'static str;

    async fn authenticate(&self, authorization: Option<&str>) -> Result<Subject, AuthError>;

    async fn authorize(
        &self,
        subject: &Subject,
        repo: Option<&str>,
        action: Action,
    ) -> Result<(), AuthError>;

    fn challenge(&self, realm: &str) -> Challenge;
}

/// Backend that admits every request as an anonymous subject.
#[derive(Debug, Clone, Default)]
pub struct Anonymous;

#[async_trait::async_trait]
impl AuthAdapter for Anonymous {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    async fn authenticate(&self, _authorization: Option<&str>) -> Result<Subject, AuthError> {
        Ok(Subject::anonymous())
    }

    async fn authorize(
        &self,
        _subject: &Subject,
        _repo: Option<&str>,
        _action: Action,
    ) -> Result<(), AuthError> {
        Ok(())
    }

    fn challenge(&self, realm: &str) -> Challenge {
        Challenge::new("Basic").param("realm", realm)
    }
}

/// Runtime configuration for the authentication backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthConfig {
    /// No authentication; every request is admitted.
    Anonymous,

    /// HTTP Basic against a static account table.
    Basic {
        accounts: std::collections::HashMap<String, Password>,
        /// Admit requests without credentials for pull actions.
        #[serde(default)]
        anonymous_pull: bool,
    },
}

impl AuthConfig {
    /// Build the configured backend.
    pub fn build(self) -> Auth {
        match self {
            AuthConfig::Anonymous => Anonymous.into(),
            AuthConfig::Basic {
                accounts,
                anonymous_pull,
            } => BasicAuth::new(accounts, anonymous_pull).into(),
        }
    }
}

type ArcAdapter = Arc<dyn AuthAdapter + Send + Sync>;

/// A cheaply cloneable handle to an authentication backend.
#[derive(Debug, Clone)]
pub struct Auth {
    adapter: ArcAdapter,
}

impl<A> From<A> for Auth
where
    A: AuthAdapter + Send + Sync + 'static,
{
    fn from(adapter: A) -> Self {
        Auth::new(adapter)
    }
}

impl Auth {
    pub fn new<A: AuthAdapter + Send + Sync + 'static>(adapter: A) -> Self {
        Self {
            adapter: Arc::new(adapter),
        }
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    #[tracing::instrument(skip(self, authorization), fields(adapter = self.adapter.name()))]
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Subject, AuthError> {
        self.adapter.authenticate(authorization).await
    }

    #[tracing::instrument(skip(self), fields(adapter = self.adapter.name(), subject = subject.name()))]
    pub async fn authorize(
        &self,
        subject: &Subject,
        repo: Option<&str>,
        action: Action,
    ) -> Result<(), AuthError> {
        self.adapter.authorize(subject, repo, action).await
    }

    pub fn challenge(&self, realm: &str) -> Challenge {
        self.adapter.challenge(realm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(AuthAdapter);

    #[tokio::test]
    async fn anonymous_admits_everything() {
        let auth: Auth = Anonymous.into();
        let subject = auth.authenticate(None).await.unwrap();
        assert!(subject.is_anonymous());
        auth.authorize(&subject, Some("lib/x"), Action::Push)
            .await
            .unwrap();
    }

    #[test]
    fn challenge_renders_header_value() {
        let challenge = Challenge::new("Basic").param("realm", "registry");
        assert_eq!(challenge.header_value(), "Basic realm=\"registry\"");

        let challenge = Challenge::new("Bearer")
            .param("realm", "https://auth.example.com/token")
            .param("service", "registry");
        assert_eq!(
            challenge.header_value(),
            "Bearer realm=\"https://auth.example.com/token\",service=\"registry\""
        );
    }

    #[test]
    fn config_builds_adapters() {
        assert_eq!(AuthConfig::Anonymous.build().name(), "anonymous");

        let mut accounts = std::collections::HashMap::new();
        accounts.insert("ada".to_string(), Password::new("s3cret"));
        let auth = AuthConfig::Basic {
            accounts,
            anonymous_pull: false,
        }
        .build();
        assert_eq!(auth.name(), "basic");
    }
}
