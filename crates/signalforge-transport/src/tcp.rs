use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// One connected TCP byte stream to or from a collector.
///
/// Implements `Read + Write`. Cloning via [`TcpLink::try_clone`]
/// produces a second handle to the same socket, which is how the read
/// loop and the writer share one connection.
#[derive(Debug)]
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    /// Connect to a collector at `host:port`, bounded by `timeout`.
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Display, timeout: Duration) -> Result<Self> {
        let addr_display = addr.to_string();
        let resolved = addr
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: addr_display.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::Unresolvable(addr_display.clone()))?;

        let stream =
            TcpStream::connect_timeout(&resolved, timeout).map_err(|source| {
                TransportError::Connect {
                    addr: addr_display.clone(),
                    source,
                }
            })?;
        stream.set_nodelay(true)?;
        debug!(addr = %addr_display, "connected to collector");
        Ok(Self { stream })
    }

    /// Set read timeout on the underlying stream.
    ///
    /// A bounded read timeout is what keeps blocking reads responsive
    /// to cancellation: callers see `WouldBlock`/`TimedOut` and can
    /// re-check their termination signal.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this link (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let stream = self.stream.try_clone()?;
        Ok(Self { stream })
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().map_err(Into::into)
    }

    /// Shut down both directions of the stream.
    ///
    /// Shutting down an already-closed socket is not an error; the
    /// session layer may close a connection from more than one path.
    pub fn shutdown(&self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        }
    }
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush()
    }
}

impl From<TcpStream> for TcpLink {
    fn from(stream: TcpStream) -> Self {
        Self { stream }
    }
}

/// Listening side of the collector protocol.
///
/// Used by the `collector` binary and by integration tests that need
/// a real remote peer for a device session.
pub struct TcpCollector {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpCollector {
    /// Bind and listen on `addr` (use port 0 for an ephemeral port).
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let addr_display = addr.to_string();
        let listener = TcpListener::bind(addr).map_err(|source| TransportError::Bind {
            addr: addr_display.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "collector listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next incoming device connection (blocking).
    pub fn accept(&self) -> Result<(TcpLink, SocketAddr)> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true).map_err(TransportError::Accept)?;
        debug!(peer = %peer, "accepted device connection");
        Ok((TcpLink::from(stream), peer))
    }

    /// The address this collector is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
