use std::fmt;

use serde::Deserialize;
use zeroize::Zeroize;

/// A stored account password.
///
/// This wrapper keeps the value out of debug reprs and zeroizes it on drop.
/// Use [`Password::matches`] to verify a candidate.
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Password(value.into())
    }

    /// Whether the candidate equals the stored password.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.0.zeroize()
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Password(value)
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Password(value.to_string())
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Password").field(&"****").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_value() {
        let password = Password::new("hunter2");
        assert_eq!(format!("{password:?}"), "Password(\"****\")");
    }

    #[test]
    fn matches_exact_value() {
        let password = Password::new("hunter2");
        assert!(password.matches("hunter2"));
        assert!(!password.matches("hunter"));
    }
}
