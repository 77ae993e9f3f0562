//! UDP egress and the per-stream debug snapshot sink.

use std::{
    fs, io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::streamer::data::StreamKind;

#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("failed to bind UDP socket for {target}: {source}")]
    Bind {
        target: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("UDP send to {target} failed: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Datagram sink for one stream worker.
///
/// The socket is private to its worker so sends from different streams never
/// interleave on one descriptor. Delivery is fire-and-forget; oversized
/// payloads are the transport's problem and are not retried here.
pub(crate) struct StreamTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl StreamTransport {
    pub(crate) fn bind(target: SocketAddr) -> Result<Self, TransportError> {
        let local: SocketAddr = if target.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).map_err(|source| TransportError::Bind {
            target,
            source,
        })?;
        Ok(Self { socket, target })
    }

    pub(crate) fn target(&self) -> SocketAddr {
        self.target
    }

    pub(crate) fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send_to(payload, self.target)
            .map(|_| ())
            .map_err(|source| TransportError::Send {
                target: self.target,
                source,
            })
    }
}

/// Overwrites one "latest" file per stream kind; last writer wins, nothing is
/// ever appended.
pub(crate) struct DebugSink {
    path: PathBuf,
}

impl DebugSink {
    pub(crate) fn new(dir: &Path, kind: StreamKind) -> Self {
        Self {
            path: dir.join(kind.snapshot_name()),
        }
    }

    pub(crate) fn write(&self, bytes: &[u8]) -> io::Result<()> {
        fs::write(&self.path, bytes)
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_send_reaches_loopback_receiver() {
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set timeout");
        let target = receiver.local_addr().expect("local addr");

        let transport = StreamTransport::bind(target).expect("bind transport");
        transport.send(b"round-1").expect("send failed");

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).expect("nothing received");
        assert_eq!(&buf[..len], b"round-1");
    }

    #[test]
    fn test_debug_sink_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = DebugSink::new(dir.path(), StreamKind::Raw);

        sink.write(b"first").expect("write failed");
        sink.write(b"second").expect("write failed");

        let content = fs::read(sink.path()).expect("read failed");
        assert_eq!(content, b"second");
        assert!(sink.path().ends_with("raw_stream.jpg"));
    }
}
