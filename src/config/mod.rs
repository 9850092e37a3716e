//! Configuration module for studio-live.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the model
//! service, the live session and the audio devices, `AppPaths` for
//! cross-platform directories, and TOML persistence via `AppConfig::load` /
//! `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioConfig, LiveConfig, ServiceConfig, API_KEY_ENV_VARS};
