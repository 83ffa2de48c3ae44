//! # TCP Transport
//!
//! Socket-channel adapter: framed bodies over TCP, each frame preceded by
//! a 4-byte big-endian length prefix. The client flavor holds a single
//! connection; the listener flavor accepts many and broadcasts outbound
//! frames to all of them.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use axopipe::body::Body;
use axopipe::node;
use axopipe::node::Node;
use axopipe::node::NodeCore;
use axopipe::registry::SourceRegistry;

use crate::transport::dispatch_inbound;
use crate::transport::Error;
use crate::transport::Result;

/// Upper bound on an inbound frame. Oversized frames drop the connection.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Connects to one remote endpoint.
pub struct TcpClientTransport {
    core: NodeCore,
    writer: Mutex<OwnedWriteHalf>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TcpClientTransport {
    /// Connects to `addr`; the transport is ready once the connection is
    /// established.
    pub async fn connect(
        name: &str,
        registry: &Arc<SourceRegistry>,
        addr: &str,
    ) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("{}: {}", addr, e)))?;
        let (read, write) = stream.into_split();
        let transport = Arc::new(Self {
            core: NodeCore::new(name, Arc::clone(registry)),
            writer: Mutex::new(write),
            reader: StdMutex::new(None),
            closed: AtomicBool::new(false),
        });
        let node: Arc<dyn Node> = Arc::clone(&transport) as Arc<dyn Node>;
        let handle = tokio::spawn(read_frames(node, read));
        if let Ok(mut slot) = transport.reader.lock() {
            *slot = Some(handle);
        }
        transport.core.set_ready();
        Ok(transport)
    }
}

#[async_trait]
impl Node for TcpClientTransport {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn is_transport(&self) -> bool {
        true
    }

    async fn receive(&self, body: Body, source: &str, target: &str) -> node::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(node::Error::Transport("transport closed".into()));
        }
        let framed = self.core.prepend_header(source, target, &body)?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut writer, &framed)
            .await
            .map_err(|e| node::Error::Transport(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.reader.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        let _ = self.writer.lock().await.shutdown().await;
    }
}

/// Accepts any number of connections and broadcasts outbound frames to
/// all of them.
pub struct TcpServerTransport {
    core: NodeCore,
    local_addr: SocketAddr,
    connections: Mutex<Vec<OwnedWriteHalf>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TcpServerTransport {
    /// Binds `port` (0 picks an ephemeral port) and starts accepting; the
    /// transport is ready once the listener is bound.
    pub async fn listen(
        name: &str,
        registry: &Arc<SourceRegistry>,
        port: u16,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        let transport = Arc::new(Self {
            core: NodeCore::new(name, Arc::clone(registry)),
            local_addr,
            connections: Mutex::new(Vec::new()),
            tasks: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        let accept = tokio::spawn(accept_loop(Arc::clone(&transport), listener));
        if let Ok(mut tasks) = transport.tasks.lock() {
            tasks.push(accept);
        }
        info!(%local_addr, "listening");
        transport.core.set_ready();
        Ok(transport)
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(transport: Arc<TcpServerTransport>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "connection accepted");
                let (read, write) = stream.into_split();
                transport.connections.lock().await.push(write);
                let node: Arc<dyn Node> = Arc::clone(&transport) as Arc<dyn Node>;
                let reader = tokio::spawn(read_frames(node, read));
                if let Ok(mut tasks) = transport.tasks.lock() {
                    tasks.push(reader);
                }
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

#[async_trait]
impl Node for TcpServerTransport {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn is_transport(&self) -> bool {
        true
    }

    /// Frames once and broadcasts to every connection, dropping the dead
    /// ones along the way.
    async fn receive(&self, body: Body, source: &str, target: &str) -> node::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(node::Error::Transport("transport closed".into()));
        }
        let framed = self.core.prepend_header(source, target, &body)?;
        let mut connections = self.connections.lock().await;
        let mut alive = Vec::with_capacity(connections.len());
        for mut writer in connections.drain(..) {
            match write_frame(&mut writer, &framed).await {
                Ok(()) => alive.push(writer),
                Err(e) => debug!(error = %e, "dropping dead connection"),
            }
        }
        *connections = alive;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        let mut connections = self.connections.lock().await;
        for mut writer in connections.drain(..) {
            let _ = writer.shutdown().await;
        }
    }
}

/// Reads length-prefixed frames until the connection ends, handing each to
/// the inbound dispatch path.
async fn read_frames(node: Arc<dyn Node>, mut read: OwnedReadHalf) {
    loop {
        let mut len_buf = [0u8; 4];
        if read.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            warn!(len, "oversized frame; connection dropped");
            break;
        }
        let mut frame = vec![0u8; len as usize];
        if read.read_exact(&mut frame).await.is_err() {
            break;
        }
        dispatch_inbound(&node, Body::Bytes(frame)).await;
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, framed: &Body) -> std::io::Result<()> {
    let bytes = match framed {
        Body::Bytes(bytes) => bytes.as_slice(),
        Body::Text(text) => text.as_bytes(),
        // prepend_header never produces an unserialized value
        Body::Value(_) => return Ok(()),
    };
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}
