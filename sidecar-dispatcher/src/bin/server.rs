//! # Durable Task Sidecar Server
//!
//! Thin wrapper binary hosting the sidecar: the worker-facing gRPC bridge,
//! the management surface, and the dispatcher host, backed by the
//! in-process orchestration service.
//!
//! ## Usage
//!
//! ```bash
//! # Run with defaults (listens on 127.0.0.1:4001)
//! cargo run --bin sidecar-server
//!
//! # Point at a TOML config and override through the environment
//! SIDECAR_CONFIG_PATH=sidecar.toml SIDECAR_GRPC__PORT=4200 cargo run --bin sidecar-server
//! ```

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info};

use sidecar_dispatcher::dispatch::DispatcherHost;
use sidecar_dispatcher::executor::TaskExecutor;
use sidecar_dispatcher::grpc::{BridgeState, ManagementApi, WorkerBridge};
use sidecar_dispatcher::service::{InMemoryOrchestrationService, OrchestrationService};
use sidecar_dispatcher::signal::TrafficSignal;
use sidecar_shared::config::SidecarConfig;
use sidecar_shared::proto::v1::task_hub_management_service_server::TaskHubManagementServiceServer;
use sidecar_shared::proto::v1::task_worker_service_server::TaskWorkerServiceServer;
use sidecar_shared::{logging, proto};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    info!("Starting durable task sidecar...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let config = SidecarConfig::load()?;
    let addr = config.grpc.socket_addr()?;

    let service: Arc<dyn OrchestrationService> = Arc::new(InMemoryOrchestrationService::new());
    let traffic_signal = TrafficSignal::new();
    let bridge = WorkerBridge::new(Arc::new(BridgeState::new(traffic_signal.clone(), &config)));
    let executor: Arc<dyn TaskExecutor> = Arc::new(bridge.clone());

    let host = Arc::new(DispatcherHost::new(
        service.clone(),
        executor,
        traffic_signal,
        &config.dispatcher,
    ));

    // The host waits for a worker to connect before dispatching.
    let root_cancel = CancellationToken::new();
    let host_task = {
        let host = host.clone();
        let cancel = root_cancel.clone();
        tokio::spawn(async move { host.start(&cancel).await })
    };

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<TaskWorkerServiceServer<WorkerBridge>>()
        .await;
    health_reporter
        .set_serving::<TaskHubManagementServiceServer<ManagementApi>>()
        .await;

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(proto::v1::FILE_DESCRIPTOR_SET)
        .build_v1()?;

    info!(%addr, "gRPC server listening");

    Server::builder()
        .add_service(health_service)
        .add_service(reflection_service)
        .add_service(TaskWorkerServiceServer::new(bridge))
        .add_service(TaskHubManagementServiceServer::new(ManagementApi::new(
            service.clone(),
        )))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    info!("Shutdown signal received, stopping dispatchers...");
    root_cancel.cancel();
    if let Err(join_err) = host_task.await {
        error!(error = %join_err, "Dispatcher host start task failed");
    }
    // Stop is bounded internally by the configured grace period.
    host.stop(&CancellationToken::new()).await;

    info!("Sidecar shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
