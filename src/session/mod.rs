mod sqlite;

pub use sqlite::SqliteSessionStore;

use anyhow::Result;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Durable client-side session storage. Login and logout write the token;
/// everything else only reads it.
pub trait SessionStore: Send {
    /// The stored authentication token, if any.
    fn auth_token(&self) -> Result<Option<String>>;

    fn set_auth_token(&mut self, token: &str) -> Result<()>;

    fn clear_auth_token(&mut self) -> Result<()>;
}

/// Read-only view of whether the current client session is logged in.
pub trait SessionState {
    fn is_authenticated(&self) -> bool;
}

pub type SharedSession = Arc<Mutex<dyn SessionStore>>;

/// Any non-empty stored token counts as logged in.
pub fn token_is_set(token: Option<&str>) -> bool {
    token.is_some_and(|t| !t.is_empty())
}

impl<T: SessionStore + ?Sized> SessionState for Mutex<T> {
    fn is_authenticated(&self) -> bool {
        let Ok(store) = self.lock() else {
            warn!("Session store lock poisoned, treating session as anonymous");
            return false;
        };

        match store.auth_token() {
            Ok(token) => token_is_set(token.as_deref()),
            Err(err) => {
                warn!(error = %err, "Failed to read auth token, treating session as anonymous");
                false
            }
        }
    }
}

impl<T: SessionState + ?Sized> SessionState for Arc<T> {
    fn is_authenticated(&self) -> bool {
        (**self).is_authenticated()
    }
}

/// In-process store for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    token: Option<String>,
}

#[cfg(test)]
impl MemorySessionStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
        }
    }
}

#[cfg(test)]
impl SessionStore for MemorySessionStore {
    fn auth_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }

    fn set_auth_token(&mut self, token: &str) -> Result<()> {
        self.token = Some(token.to_string());
        Ok(())
    }

    fn clear_auth_token(&mut self) -> Result<()> {
        self.token = None;
        Ok(())
    }
}
