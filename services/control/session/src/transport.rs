//! Communication channel between the messenger and the control service.
//!
//! The messenger only sees the [`Communication`] trait; [`TcpCommunication`]
//! is the production implementation over a tokio TCP stream.

use crate::error::ControlError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use control_wire::{FrameDecoder, DEFAULT_MAX_PACKET_SIZE};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Callback receiving each complete raw packet
pub type ReceiveHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Callback invoked once when a connection ends
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Reliable packet transport consumed by the messenger
#[async_trait]
pub trait Communication: Send + Sync {
    /// Open the connection; a no-op if already running
    async fn start(&self, address: &str, port: u16) -> Result<(), ControlError>;

    /// Close the connection; a no-op if not running
    fn stop(&self);

    /// Whether a connection is open
    fn is_running(&self) -> bool;

    /// Install the callback for incoming packets
    fn set_receive_handler(&self, handler: ReceiveHandler);

    /// Install the callback for connection loss
    fn set_disconnect_handler(&self, handler: DisconnectHandler);

    /// Queue a serialized packet for sending
    async fn send_message(&self, packet: Bytes) -> Result<(), ControlError>;
}

#[derive(Default)]
struct Handlers {
    receive: RwLock<Option<ReceiveHandler>>,
    disconnect: RwLock<Option<DisconnectHandler>>,
}

impl Handlers {
    fn deliver(&self, packet: Bytes) {
        let handler = self.receive.read().clone();
        match handler {
            Some(handler) => handler(packet),
            None => debug!("No receive handler installed, dropping {} byte packet", packet.len()),
        }
    }

    /// Fire the disconnect handler if this call is the one that closed `alive`
    fn connection_lost(&self, alive: &AtomicBool, reason: &str) {
        if !alive.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Connection closed: {}", reason);
        let handler = self.disconnect.read().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

struct Connection {
    outbound: mpsc::UnboundedSender<Bytes>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// TCP implementation of [`Communication`]
pub struct TcpCommunication {
    max_packet_size: usize,
    handlers: Arc<Handlers>,
    connection: Mutex<Option<Connection>>,
}

impl TcpCommunication {
    /// Create a transport with the default packet size limit
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Create a transport rejecting packets larger than `max_packet_size`
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            max_packet_size,
            handlers: Arc::new(Handlers::default()),
            connection: Mutex::new(None),
        }
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        max_packet_size: usize,
        handlers: Arc<Handlers>,
        alive: Arc<AtomicBool>,
    ) {
        let mut decoder = FrameDecoder::with_max_packet_size(max_packet_size);
        let mut buffer = BytesMut::with_capacity(64 * 1024);

        let reason = loop {
            match reader.read_buf(&mut buffer).await {
                Ok(0) => break "connection closed by server".to_string(),
                Ok(n) => trace!("Read {} bytes, buffer now has {} bytes", n, buffer.len()),
                Err(e) => break format!("read failed: {}", e),
            }

            let mut failure = None;
            loop {
                match decoder.next_packet(&mut buffer) {
                    Ok(Some(packet)) => handlers.deliver(packet),
                    Ok(None) => break,
                    Err(e) => {
                        failure = Some(format!("unrecoverable framing error: {}", e));
                        break;
                    }
                }
            }
            if let Some(reason) = failure {
                break reason;
            }
        };

        handlers.connection_lost(&alive, &reason);
    }

    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Bytes>,
        handlers: Arc<Handlers>,
        alive: Arc<AtomicBool>,
    ) {
        while let Some(packet) = outbound.recv().await {
            if let Err(e) = writer.write_all(&packet).await {
                warn!("Failed to write {} byte packet: {}", packet.len(), e);
                handlers.connection_lost(&alive, &format!("write failed: {}", e));
                return;
            }
            trace!("Wrote {} byte packet", packet.len());
        }
        let _ = writer.shutdown().await;
    }
}

impl Default for TcpCommunication {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Communication for TcpCommunication {
    async fn start(&self, address: &str, port: u16) -> Result<(), ControlError> {
        if self.is_running() {
            debug!("Transport already running, ignoring start");
            return Ok(());
        }

        let stream = TcpStream::connect((address, port))
            .await
            .map_err(|e| ControlError::Transport(format!("failed to connect to {}:{}: {}", address, port, e)))?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        let mut slot = self.connection.lock();
        if slot.as_ref().map_or(false, |c| c.alive.load(Ordering::Acquire)) {
            debug!("Transport started concurrently, dropping extra connection to {}", peer);
            return Ok(());
        }

        let alive = Arc::new(AtomicBool::new(true));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(Self::read_loop(
            reader,
            self.max_packet_size,
            Arc::clone(&self.handlers),
            Arc::clone(&alive),
        ));
        let writer = tokio::spawn(Self::write_loop(
            writer,
            outbound_rx,
            Arc::clone(&self.handlers),
            Arc::clone(&alive),
        ));

        *slot = Some(Connection {
            outbound,
            alive,
            reader,
            writer,
        });
        info!("Connected to control server at {}", peer);
        Ok(())
    }

    fn stop(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            self.handlers
                .connection_lost(&connection.alive, "stopped by client");
        }
    }

    fn is_running(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map_or(false, |c| c.alive.load(Ordering::Acquire))
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) {
        *self.handlers.receive.write() = Some(handler);
    }

    fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        *self.handlers.disconnect.write() = Some(handler);
    }

    async fn send_message(&self, packet: Bytes) -> Result<(), ControlError> {
        let outbound = {
            let slot = self.connection.lock();
            match slot.as_ref() {
                Some(c) if c.alive.load(Ordering::Acquire) => c.outbound.clone(),
                _ => return Err(ControlError::NotRunning),
            }
        };

        outbound
            .send(packet)
            .map_err(|_| ControlError::Transport("connection writer has stopped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_failure_leaves_transport_stopped() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpCommunication::new();
        let result = transport.start("127.0.0.1", port).await;
        assert!(matches!(result, Err(ControlError::Transport(_))));
        assert!(!transport.is_running());
        assert!(matches!(
            transport.send_message(Bytes::from_static(b"x")).await,
            Err(ControlError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_packets_are_split_and_delivered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = TcpCommunication::new();
        let (packet_tx, mut packet_rx) = mpsc::unbounded_channel();
        transport.set_receive_handler(Arc::new(move |packet| {
            let _ = packet_tx.send(packet);
        }));

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Two packets in one write: len=1 "a", len=2 "bc"
            socket
                .write_all(&[0, 0, 0, 1, b'a', 0, 0, 0, 2, b'b', b'c'])
                .await
                .unwrap();
            let mut echo = [0u8; 5];
            socket.read_exact(&mut echo).await.unwrap();
            echo
        });

        transport.start("127.0.0.1", port).await.unwrap();
        assert!(transport.is_running());

        assert_eq!(packet_rx.recv().await.unwrap(), Bytes::from_static(&[0, 0, 0, 1, b'a']));
        assert_eq!(
            packet_rx.recv().await.unwrap(),
            Bytes::from_static(&[0, 0, 0, 2, b'b', b'c'])
        );

        transport
            .send_message(Bytes::from_static(&[0, 0, 0, 1, b'z']))
            .await
            .unwrap();
        assert_eq!(server.await.unwrap(), [0, 0, 0, 1, b'z']);

        transport.stop();
    }

    #[tokio::test]
    async fn test_disconnect_fires_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = TcpCommunication::new();
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        transport.set_disconnect_handler(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        transport.start("127.0.0.1", port).await.unwrap();
        server.await.unwrap();

        for _ in 0..100 {
            if !transport.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!transport.is_running());

        // Stopping an already-closed connection does not fire again
        transport.stop();
        transport.stop();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }
}
