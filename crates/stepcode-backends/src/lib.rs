//! stepcode-backends — Sandbox backends, persistence, and configuration.
//!
//! Implements `SandboxProvider` for the remote code-execution API and a
//! scripted mock, file-based attempt persistence, config-driven identity,
//! and the configuration that wires a backend together.

pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod mock;
pub mod store;

pub use config::{create_sandbox, load_config, load_config_from, SandboxConfig, StepcodeConfig, UserConfig};
pub use error::ConfigError;
pub use http::ExecutionApiSandbox;
pub use identity::ConfigIdentityProvider;
pub use mock::MockSandbox;
pub use store::JsonAttemptStore;
