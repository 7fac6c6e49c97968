// Broker service main entry point.
use anyhow::{Context, Result};
use broker::auth::PrincipalAuth;
use broker::config::ServiceConfig;
use broker::directory::SessionDirectory;
use broker::observability;
use broker::server;
use broker::session::SessionContext;
use courier_broker::Registry;
use courier_transport::{TcpServer, TransportConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let metrics_handle = observability::init_observability();

    let config = ServiceConfig::from_env_or_yaml().context("load broker config")?;
    let registry = Arc::new(Registry::new(
        config.broker_config().context("build registry config")?,
    ));
    registry.start();

    let directory = Arc::new(SessionDirectory::new());
    let transport = TransportConfig {
        max_frame_bytes: config.max_frame_bytes,
    };
    let server = TcpServer::bind(config.listen_bind, transport)
        .await
        .context("bind session listener")?;
    tracing::info!(addr = %server.local_addr()?, "session listener started");

    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let ctx = SessionContext {
        registry: Arc::clone(&registry),
        directory: Arc::clone(&directory),
        auth: PrincipalAuth::new(),
        max_frame_bytes: config.max_frame_bytes,
        outbound_queue_depth: config.outbound_queue_depth,
    };
    let accept_task = tokio::spawn(async move {
        if let Err(err) = server::serve(server, ctx).await {
            tracing::warn!(error = %err, "accept loop exited");
        }
    });

    // Block until SIGINT so the process stays alive.
    let _ = tokio::signal::ctrl_c().await;
    accept_task.abort();
    directory.shutdown_all().await;
    registry.stop().await;
    metrics_task.abort();
    tracing::info!("broker stopped");
    Ok(())
}
