// TCP accept loop and per-connection session setup.
use anyhow::Result;
use courier_transport::TcpServer;

use crate::session::{SessionContext, run_session};

/// Serve incoming connections until the listener fails or the task is
/// aborted. Each accepted connection gets its own session task; a session
/// failure never takes down the accept loop.
pub async fn serve(server: TcpServer, ctx: SessionContext) -> Result<()> {
    loop {
        let connection = server.accept().await?;
        let info = connection.info().clone();
        tracing::debug!(connection = ?info.id, peer = %info.peer_addr, "accepted connection");
        let ctx = ctx.clone();
        let (read, write) = connection.into_split();
        tokio::spawn(async move {
            if let Err(err) = run_session(read, write, info.id, ctx).await {
                tracing::warn!(
                    connection = ?info.id,
                    peer = %info.peer_addr,
                    error = %err,
                    "session handler failed"
                );
            }
        });
    }
}
