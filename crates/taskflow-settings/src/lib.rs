//! # taskflow-settings
//!
//! Layered configuration for the taskflow client:
//! 1. compiled defaults ([`TaskflowSettings::default()`])
//! 2. `~/.taskflow/settings.json`, deep-merged over the defaults
//! 3. `TASKFLOW_*` environment variables

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, taskflow_dir};
pub use types::{AuthSettings, LoggingSettings, RealtimeSettings, TaskflowSettings};
