use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::storage::load_auth_storage;

pub const TOKEN_ENV_VAR: &str = "TASKFLOW_TOKEN";

/// Source of the bearer token attached to the broker CONNECT frame.
pub trait CredentialStore: Send + Sync {
    /// Current token, or `None` when the user is not signed in.
    fn token(&self) -> Option<SecretString>;
}

/// Fixed token, typically from a command-line flag.
pub struct StaticTokenStore {
    token: Option<SecretString>,
}

impl StaticTokenStore {
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self {
            token: (!token.is_empty()).then(|| SecretString::from(token)),
        }
    }

    pub fn empty() -> Self {
        Self { token: None }
    }
}

impl CredentialStore for StaticTokenStore {
    fn token(&self) -> Option<SecretString> {
        self.token
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_owned()))
    }
}

/// Reads `TASKFLOW_TOKEN` on every call.
#[derive(Default)]
pub struct EnvTokenStore {
    var: Option<String>,
}

impl EnvTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(var: impl Into<String>) -> Self {
        Self {
            var: Some(var.into()),
        }
    }
}

impl CredentialStore for EnvTokenStore {
    fn token(&self) -> Option<SecretString> {
        let var = self.var.as_deref().unwrap_or(TOKEN_ENV_VAR);
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from)
    }
}

/// Reads the token file on every call so a refreshed token is picked up by
/// the next reconnect.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CredentialStore for FileTokenStore {
    fn token(&self) -> Option<SecretString> {
        load_auth_storage(&self.path)?
            .token
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
    }
}

/// First store that yields a token wins.
#[derive(Default)]
pub struct ChainedTokenStore {
    stores: Vec<Arc<dyn CredentialStore>>,
}

impl ChainedTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.stores.push(store);
        self
    }
}

impl CredentialStore for ChainedTokenStore {
    fn token(&self) -> Option<SecretString> {
        self.stores.iter().find_map(|store| store.token())
    }
}
