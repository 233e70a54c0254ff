use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("User not authenticated")]
    NotAuthenticated,
    #[error("Identity provider error: {0}")]
    Provider(String),
}

/// Stable id of a signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdentityError::NotAuthenticated);
        }
        Ok(UserId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session/user identity, supplied by the surrounding application
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user_id(&self) -> Result<UserId, IdentityError>;
}

/// Identity fixed at construction (dev tool, tests)
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user: Option<UserId>,
}

impl StaticIdentity {
    pub fn signed_in(user: UserId) -> Self {
        StaticIdentity { user: Some(user) }
    }

    pub fn signed_out() -> Self {
        StaticIdentity { user: None }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user_id(&self) -> Result<UserId, IdentityError> {
        self.user.clone().ok_or(IdentityError::NotAuthenticated)
    }
}
