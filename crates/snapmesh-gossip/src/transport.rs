use std::net::SocketAddr;

use bincode::{deserialize, serialize};
use tokio::net::UdpSocket;

use crate::error::{GossipError, Result};
use crate::message::GossipMessage;

/// UDP transport for gossip traffic.
pub struct UdpTransport {
    socket: UdpSocket,
    max_packet_size: usize,
}

impl UdpTransport {
    /// Bind a UDP socket for gossip traffic.
    pub async fn bind(bind_addr: SocketAddr, max_packet_size: usize) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| GossipError::Bind {
                addr: bind_addr,
                source,
            })?;
        Ok(Self {
            socket,
            max_packet_size,
        })
    }

    /// Returns the socket address assigned to the underlying UDP socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send a serialized message to the provided peer.
    pub async fn send(&self, message: &GossipMessage, addr: SocketAddr) -> Result<()> {
        let payload =
            serialize(message).map_err(|err| GossipError::Serialization(err.to_string()))?;
        if payload.len() > self.max_packet_size {
            return Err(GossipError::MessageTooLarge(payload.len()));
        }
        self.socket.send_to(&payload, addr).await?;
        Ok(())
    }

    /// Receive the next message from the UDP socket.
    pub async fn recv(&self) -> Result<(GossipMessage, SocketAddr)> {
        let mut buf = vec![0u8; self.max_packet_size];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        let message =
            deserialize(&buf[..len]).map_err(|err| GossipError::Serialization(err.to_string()))?;
        Ok((message, addr))
    }
}
