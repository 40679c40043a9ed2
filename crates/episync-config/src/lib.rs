pub mod config;
pub mod credentials;
pub mod paths;

pub use config::{Config, SerializdConfig, SyncConfig, TraktConfig};
pub use credentials::CredentialStore;
pub use paths::{container_base_path, PathManager};
