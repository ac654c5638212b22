//! # taskflow-auth
//!
//! Bearer-token sources for the realtime connection. The client asks a
//! [`CredentialStore`] for a token on every connect attempt, so a token
//! refreshed on disk is picked up by the next reconnect.

pub mod errors;
pub mod storage;
pub mod store;

pub use errors::AuthError;
pub use storage::{auth_file_path, load_auth_storage, save_auth_storage, save_token, AuthStorage};
pub use store::{ChainedTokenStore, CredentialStore, EnvTokenStore, FileTokenStore, StaticTokenStore};
