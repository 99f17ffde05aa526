//! UDP plumbing between the session loop and the socket
//!
//! The socket is shared by two tasks. The receiver decodes datagrams and posts
//! them into the session's channel; the sender drains a queue of encoded
//! datagrams. The session itself only ever pushes onto that queue, so a slow
//! or unreachable peer never stalls it.

use crate::protocol::{Notification, Packet, MAX_DATAGRAM};
use crate::session::SessionMessage;
use log::{debug, error, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Fire-and-forget delivery of notifications
pub trait Transport: Send {
    fn send_packet(&mut self, packet: &Packet, addr: SocketAddr);

    /// Sends a notification without a request id.
    fn send(&mut self, notification: &Notification, addr: SocketAddr) {
        self.send_packet(&Packet::new(notification.clone()), addr);
    }

    fn broadcast(&mut self, notification: &Notification, addrs: &[SocketAddr]) {
        for addr in addrs {
            self.send(notification, *addr);
        }
    }
}

/// An encoded notification waiting for the sender task
#[derive(Debug)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub addr: SocketAddr,
}

/// Queues datagrams for [`spawn_sender`]
#[derive(Debug, Clone)]
pub struct UdpTransport {
    outbox: mpsc::UnboundedSender<Datagram>,
}

impl UdpTransport {
    pub fn new(outbox: mpsc::UnboundedSender<Datagram>) -> Self {
        Self { outbox }
    }
}

impl Transport for UdpTransport {
    fn send_packet(&mut self, packet: &Packet, addr: SocketAddr) {
        let method = packet.notification.method();
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {}: {}", method, e);
                return;
            }
        };
        debug!("Queueing {} ({} bytes) for {}", method, bytes.len(), addr);
        if let Err(e) = self.outbox.send(Datagram { bytes, addr }) {
            error!("Failed to queue datagram for {}: {}", e.0.addr, e);
        }
    }
}

/// Keeps every notification in memory instead of sending it
#[derive(Debug, Default)]
pub struct MemoryTransport {
    pub sent: Vec<(Packet, SocketAddr)>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains what was sent, dropping request ids.
    pub fn take(&mut self) -> Vec<(Notification, SocketAddr)> {
        self.take_packets()
            .into_iter()
            .map(|(packet, addr)| (packet.notification, addr))
            .collect()
    }

    pub fn take_packets(&mut self) -> Vec<(Packet, SocketAddr)> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn send_packet(&mut self, packet: &Packet, addr: SocketAddr) {
        self.sent.push((packet.clone(), addr));
    }
}

/// Spawns the task that decodes inbound datagrams into `session_tx`.
///
/// Datagrams that fail to decode are logged and dropped here; the task ends
/// when the session stops listening.
pub fn spawn_receiver(socket: Arc<UdpSocket>, session_tx: mpsc::UnboundedSender<SessionMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; MAX_DATAGRAM];

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => match Packet::decode(&buffer[..len]) {
                    Ok(packet) => {
                        debug!(
                            "Received {} from {} (id {:?})",
                            packet.notification.method(),
                            addr,
                            packet.id
                        );
                        let message = SessionMessage::DatagramReceived {
                            notification: packet.notification,
                            addr,
                        };
                        if session_tx.send(message).is_err() {
                            debug!("Session closed, receiver stopping");
                            break;
                        }
                    }
                    Err(e) => warn!("Discarding datagram from {}: {}", addr, e),
                },
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

/// Spawns the task that writes queued datagrams to the socket.
pub fn spawn_sender(socket: Arc<UdpSocket>, mut outbox: mpsc::UnboundedReceiver<Datagram>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(datagram) = outbox.recv().await {
            if let Err(e) = socket.send_to(&datagram.bytes, datagram.addr).await {
                error!("Failed to send datagram to {}: {}", datagram.addr, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport_broadcast_reaches_every_address() {
        let mut transport = MemoryTransport::new();
        let addrs: Vec<SocketAddr> = vec!["127.0.0.1:2216".parse().unwrap(), "[::1]:2216".parse().unwrap()];
        let notification = Notification::PageChanged { players_page: 1 };

        transport.broadcast(&notification, &addrs);

        let sent = transport.take();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(n, _)| *n == notification));
        assert_eq!(sent[1].1, addrs[1]);
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn test_udp_transport_queues_encoded_json() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = UdpTransport::new(tx);
        let addr: SocketAddr = "127.0.0.1:2214".parse().unwrap();

        transport.send(&Notification::PageChanged { players_page: 0 }, addr);

        let datagram = rx.try_recv().unwrap();
        assert_eq!(datagram.addr, addr);
        let packet = Packet::decode(&datagram.bytes).unwrap();
        assert_eq!(packet.notification, Notification::PageChanged { players_page: 0 });
    }

    #[tokio::test]
    async fn test_receiver_and_sender_tasks_over_loopback() {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b_addr = b.local_addr().unwrap();

        let (session_tx, mut session_rx) = mpsc::unbounded_channel();
        let receiver = spawn_receiver(Arc::clone(&b), session_tx);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let sender = spawn_sender(Arc::clone(&a), out_rx);
        let mut transport = UdpTransport::new(out_tx);

        // Garbage is dropped by the receiver and never reaches the session.
        a.send_to(b"{\"method\": \"nope\"}", b_addr).await.unwrap();
        transport.send(&Notification::PageChanged { players_page: 1 }, b_addr);

        let message = tokio::time::timeout(Duration::from_secs(2), session_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match message {
            SessionMessage::DatagramReceived { notification, addr } => {
                assert_eq!(notification, Notification::PageChanged { players_page: 1 });
                assert_eq!(addr, a.local_addr().unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }

        receiver.abort();
        sender.abort();
    }
}
