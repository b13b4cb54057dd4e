//! TCP front door.
//!
//! The accept loop runs on tokio; every accepted stream is switched to
//! blocking mode and handed to [`World::create_reserved_butler`] on the
//! blocking pool, since butlers are thread-based actors. The connection slot
//! is taken on the accept loop itself, so a burst of connects cannot slip
//! past the limit.

use crate::error::ServerError;
use crate::messages::ClientEvent;
use crate::wire::{Connection, JsonLinesSink, Outbound};
use crate::world::World;
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Stops a running [`Reception`] from anywhere.
#[derive(Clone)]
pub struct ReceptionHandle {
    shutdown_sender: broadcast::Sender<()>,
}

impl ReceptionHandle {
    pub fn shutdown(&self) {
        info!("🛑 Closing reception...");
        let _ = self.shutdown_sender.send(());
    }
}

pub struct Reception {
    listener: TcpListener,
    world: Arc<World>,
    max_connections: usize,
    shutdown_sender: broadcast::Sender<()>,
    shutdown_receiver: broadcast::Receiver<()>,
}

impl Reception {
    pub async fn bind(addr: SocketAddr, world: Arc<World>, max_connections: usize) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Network(format!("Failed to bind {addr}: {e}")))?;
        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);
        Ok(Self {
            listener,
            world,
            max_connections,
            shutdown_sender,
            shutdown_receiver,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Network(e.to_string()))
    }

    pub fn handle(&self) -> ReceptionHandle {
        ReceptionHandle {
            shutdown_sender: self.shutdown_sender.clone(),
        }
    }

    /// Accepts connections until the handle asks to stop. Connections that
    /// are already open keep running.
    pub async fn run(mut self) -> Result<(), ServerError> {
        info!("🚀 Reception listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(stream, addr),
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = self.shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("✅ Reception closed");
        Ok(())
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) {
        let stream = match into_blocking(stream) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Could not prepare connection from {}: {}", addr, e);
                return;
            }
        };

        let slot = self.world.reserve_connection(self.max_connections);
        let world = Arc::clone(&self.world);
        tokio::task::spawn_blocking(move || {
            let Some(slot) = slot else {
                warn!("Connection limit reached, refusing {}", addr);
                refuse(stream, "server is full");
                return;
            };
            debug!("Accepted connection from {}", addr);
            match Connection::tcp(stream) {
                Ok(connection) => {
                    if let Err(e) = world.create_reserved_butler(connection, slot) {
                        error!("Connection error: {}", e);
                    }
                }
                Err(e) => error!("Could not set up connection from {}: {}", addr, e),
            }
        });
    }
}

fn into_blocking(stream: TcpStream) -> std::io::Result<StdTcpStream> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    Ok(stream)
}

fn refuse(stream: StdTcpStream, reason: &str) {
    let Ok(writer) = stream.try_clone() else {
        return;
    };
    let mut sink = JsonLinesSink::new(writer, Some(stream));
    let _ = sink.write_event(&ClientEvent::Disconnected {
        reason: reason.to_string(),
    });
    sink.close();
}
