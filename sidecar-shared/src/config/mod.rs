//! # Sidecar Configuration
//!
//! Layered configuration: built-in defaults, then an optional TOML file
//! (`SIDECAR_CONFIG_PATH`), then `SIDECAR_*` environment variables. Every
//! field has a default so an empty environment yields a working local
//! configuration.
//!
//! ```text
//! SIDECAR_GRPC__PORT=4001
//! SIDECAR_DISPATCHER__SHUTDOWN_GRACE_PERIOD_MS=600000
//! ```

mod dispatcher;
mod grpc;

pub use dispatcher::DispatcherConfig;
pub use grpc::GrpcConfig;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{SidecarError, SidecarResult};

/// Environment variable naming a TOML config file to layer in.
pub const CONFIG_PATH_ENV: &str = "SIDECAR_CONFIG_PATH";

/// Top-level sidecar configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SidecarConfig {
    #[serde(default)]
    pub grpc: GrpcConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl SidecarConfig {
    /// Load configuration from the layered sources.
    pub fn load() -> SidecarResult<Self> {
        let mut builder = Config::builder();

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&path));
        }

        builder = builder.add_source(Environment::with_prefix("SIDECAR").separator("__"));

        let config = builder
            .build()
            .map_err(|e| SidecarError::Configuration(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| SidecarError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_complete() {
        let config = SidecarConfig::default();
        assert_eq!(config.grpc.port, 4001);
        assert_eq!(config.dispatcher.history_embed_threshold_bytes, 1024);
    }
}
