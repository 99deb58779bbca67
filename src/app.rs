use crate::codec::payload::PayloadExtractor;
use crate::config::ServiceConfig;
use crate::error::{Context, Result};
use crate::gateway::dispatcher::RequestDispatcher;
use crate::gateway::engine::MappingEngine;
use crate::handle::{HandleManager, InMemoryHandleManager};
use crate::mapping::repository::MappingRepository;
use crate::mapping::transformer::TransformerRegistry;
use crate::transport::GatewayServer;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub struct GatewayApp {
    server: GatewayServer,
    shutdown: CancellationToken,
    drain_timeout: Duration,
}

impl GatewayApp {
    /// Wire configuration, mappings, engine, and listener into a runnable app.
    pub async fn initialise(config: ServiceConfig) -> Result<Self> {
        let report = MappingRepository::load(
            Path::new(&config.mappings_dir),
            &config.mappings_suffix,
        )
        .with_context(|| format!("failed to read mappings from {}", config.mappings_dir))?;
        tracing::info!(
            target: "turnstone::app",
            event = "mappings_loaded",
            dir = %config.mappings_dir,
            loaded = report.loaded,
            skipped = report.skipped.len(),
        );

        let client = reqwest::Client::builder()
            .build()
            .context("failed to construct HTTP client")?;
        let extractor = PayloadExtractor::new(config.max_stream_bytes);
        let handles: Arc<dyn HandleManager> =
            Arc::new(InMemoryHandleManager::new(config.handle_prefix.as_str()));
        let engine = MappingEngine::new(
            client,
            TransformerRegistry::builtin(),
            handles,
            extractor,
            config.backend_timeout,
        );

        let addr = config.socket_addr()?;
        let drain_timeout = config.drain_timeout;
        let max_stream_bytes = config.max_stream_bytes;
        let service_id = config.service_id.clone();

        let dispatcher = Arc::new(RequestDispatcher::new(
            Arc::new(config),
            report.repository,
            engine,
        ));
        let server = GatewayServer::bind(addr, dispatcher, max_stream_bytes).await?;
        tracing::info!(
            target: "turnstone::app",
            event = "listener_bound",
            address = %addr,
            service_id = %service_id,
        );

        Ok(Self {
            server,
            shutdown: CancellationToken::new(),
            drain_timeout,
        })
    }

    /// Address the listener actually bound; differs from the configured one
    /// when the port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            server,
            shutdown,
            drain_timeout,
        } = self;

        let mut server_task = tokio::spawn(server.run(shutdown.clone()));

        tracing::info!("turnstone service ready; press Ctrl+C to stop");

        tokio::select! {
            res = &mut server_task => {
                tracing::warn!("listener task terminated unexpectedly");
                return match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(err),
                    Err(join_err) => Err(crate::err!("listener task join error: {join_err}")),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
        }

        shutdown.cancel();

        match timeout(drain_timeout, &mut server_task).await {
            Ok(res) => match res {
                Ok(result) => result,
                Err(join_err) => Err(crate::err!("listener task join error: {join_err}")),
            },
            Err(_) => {
                tracing::error!(
                    timeout_secs = drain_timeout.as_secs_f64(),
                    "graceful shutdown exceeded drain_timeout; forcing exit"
                );
                server_task.abort();
                Err(crate::err!(
                    "graceful shutdown timed out after {:?}",
                    drain_timeout
                ))
            }
        }
    }
}
