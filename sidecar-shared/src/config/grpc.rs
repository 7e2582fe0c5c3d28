//! gRPC server configuration.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::error::{SidecarError, SidecarResult};

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4001
}

fn default_work_item_channel_capacity() -> usize {
    64
}

/// Listener and stream settings for the worker-facing gRPC server.
#[derive(Debug, Clone, Deserialize)]
pub struct GrpcConfig {
    /// Address the gRPC server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port the gRPC server binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capacity of the work-item stream channel between the dispatch paths
    /// and the connected worker.
    #[serde(default = "default_work_item_channel_capacity")]
    pub work_item_channel_capacity: usize,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            work_item_channel_capacity: default_work_item_channel_capacity(),
        }
    }
}

impl GrpcConfig {
    /// The socket address to bind the server on.
    pub fn socket_addr(&self) -> SidecarResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| {
                SidecarError::Configuration(format!(
                    "invalid gRPC bind address {}:{}: {e}",
                    self.bind_address, self.port
                ))
            })
    }
}
