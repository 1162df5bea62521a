use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::master::Master;
use crate::protocol::{
    Frame, FrameType, HeartbeatRequest, HeartbeatResponse, read_frame, write_frame,
};

/// How a container reaches its master.
pub enum MasterLink {
    /// Same process. `severed` simulates a network partition.
    Local {
        master: Arc<Master>,
        severed: Arc<AtomicBool>,
    },
    /// Framed heartbeats over one TCP connection, reconnected lazily after errors.
    Tcp {
        addr: SocketAddr,
        connection: Mutex<Option<TcpStream>>,
    },
}

impl MasterLink {
    pub fn local(master: Arc<Master>) -> Self {
        MasterLink::Local {
            master,
            severed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn tcp(addr: SocketAddr) -> Self {
        MasterLink::Tcp {
            addr,
            connection: Mutex::new(None),
        }
    }

    /// Cut (or restore) a local link. Has no effect on TCP links.
    pub fn sever(&self, cut: bool) {
        if let MasterLink::Local { severed, .. } = self {
            severed.store(cut, Ordering::SeqCst);
        }
    }

    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        match self {
            MasterLink::Local { master, severed } => {
                if severed.load(Ordering::SeqCst) {
                    return Err(anyhow!("link to master is severed"));
                }
                Ok(master.handle_heartbeat(request, Instant::now()))
            }
            MasterLink::Tcp { addr, connection } => {
                let mut guard = connection.lock().await;
                if guard.is_none() {
                    let stream = TcpStream::connect(*addr)
                        .await
                        .with_context(|| format!("connect to master at {addr}"))?;
                    *guard = Some(stream);
                }
                let Some(stream) = guard.as_mut() else {
                    return Err(anyhow!("no connection to master at {addr}"));
                };
                let result = exchange(stream, request).await;
                if result.is_err() {
                    *guard = None;
                }
                result
            }
        }
    }
}

async fn exchange(stream: &mut TcpStream, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
    write_frame(stream, &Frame::new(FrameType::Heartbeat, request)?).await?;
    read_frame(stream).await?.message(FrameType::Response)
}
