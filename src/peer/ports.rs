use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::peer::types::{MediaKind, PortPair};

/// A loopback socket the external media process writes RTP into.
pub struct IngressSocket {
    pub kind: MediaKind,
    pub socket: UdpSocket,
}

impl IngressSocket {
    async fn bind(kind: MediaKind) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .map_err(|source| BridgeError::Bind {
                kind: kind.as_str(),
                source,
            })?;
        Ok(Self { kind, socket })
    }

    pub fn port(&self) -> Result<u16> {
        self.socket
            .local_addr()
            .map(|addr| addr.port())
            .map_err(|source| BridgeError::Bind {
                kind: self.kind.as_str(),
                source,
            })
    }
}

/// Binds the video and audio ingress sockets on ephemeral loopback ports.
/// If the second bind fails the first socket is dropped, and thereby closed,
/// before the error is returned.
pub async fn allocate_pair() -> Result<(PortPair, IngressSocket, IngressSocket)> {
    let video = IngressSocket::bind(MediaKind::Video).await?;
    let audio = IngressSocket::bind(MediaKind::Audio).await?;
    let ports = PortPair {
        video: video.port()?,
        audio: audio.port()?,
    };
    debug!("Bound ingress ports video={} audio={}", ports.video, ports.audio);
    Ok((ports, video, audio))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ports_are_distinct_and_nonzero() {
        let (ports, video, audio) = allocate_pair().await.unwrap();
        assert_ne!(ports.video, 0);
        assert_ne!(ports.audio, 0);
        assert_ne!(ports.video, ports.audio);
        assert_eq!(video.kind, MediaKind::Video);
        assert_eq!(audio.kind, MediaKind::Audio);
        assert!(video.socket.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn sockets_receive_on_reported_ports() {
        let (ports, video, _audio) = allocate_pair().await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"rtp", ("127.0.0.1", ports.video))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let n = video.socket.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"rtp");
    }
}
