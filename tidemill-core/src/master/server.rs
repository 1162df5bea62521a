use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::{Frame, FrameType, HeartbeatRequest, read_frame, write_frame};

use super::Master;

impl Master {
    /// Accept heartbeat connections on `addr` until the task is dropped.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind heartbeat listener on {addr}"))?;
        self.serve_listener(listener).await
    }

    pub async fn serve_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!("master listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let master = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = master.serve_connection(stream).await {
                    tracing::debug!("heartbeat connection from {} closed: {:#}", peer, e);
                }
            });
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let frame = read_frame(&mut stream).await?;
            let request: HeartbeatRequest = frame.message(FrameType::Heartbeat)?;
            let response = self.handle_heartbeat(&request, Instant::now());
            write_frame(&mut stream, &Frame::new(FrameType::Response, &response)?).await?;
        }
    }
}
