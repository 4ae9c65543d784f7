use std::{
    fmt, io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
    time::Duration,
};

use tracing::debug;

/// A resolved remote address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteAddr {
    addrs: Vec<SocketAddr>,
}

impl RemoteAddr {
    /// Resolves the given host and port.
    ///
    /// # Errors
    ///
    /// If the host cannot be resolved to at least one socket address, an error is returned describing why.
    pub fn resolve(host: &str, port: u16) -> Result<Self, String> {
        let addrs: Vec<_> = (host, port).to_socket_addrs().map_err(|e| e.to_string())?.collect();
        if addrs.is_empty() {
            return Err(format!("'{host}' did not resolve to any addresses"));
        }

        Ok(Self { addrs })
    }

    /// Returns the resolved socket addresses, in resolution order.
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Returns the transport ID for the remote address.
    pub const fn transport_id(&self) -> &'static str {
        "udp"
    }
}

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        Self { addrs: vec![addr] }
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addrs.first() {
            Some(addr) => write!(f, "udp://{addr}"),
            None => f.write_str("udp://<unresolved>"),
        }
    }
}

/// A datagram transport.
///
/// Implementations send each payload as a single datagram. They do not enforce any maximum payload length: callers
/// are trusted to respect the limit they were configured with.
///
/// `transmit` may be called concurrently from multiple threads.
pub trait Transport: Send + Sync {
    /// Sends the payload, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// If the payload could not be sent, an error is returned. Callers are expected to log and discard it.
    fn transmit(&self, payload: &[u8]) -> io::Result<usize>;
}

impl<T> Transport for std::sync::Arc<T>
where
    T: Transport + ?Sized,
{
    fn transmit(&self, payload: &[u8]) -> io::Result<usize> {
        (**self).transmit(payload)
    }
}

/// UDP transport.
///
/// Owns a socket bound to an ephemeral local port and connected to the remote address, so the kernel filters any
/// unrelated inbound traffic and each send is a single `send(2)` call.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    remote_addr: RemoteAddr,
}

impl UdpTransport {
    /// Creates a new `UdpTransport` connected to the given remote address.
    ///
    /// The write timeout bounds how long a single send may block, which protects the caller from a wedged socket.
    ///
    /// # Errors
    ///
    /// If the local socket cannot be bound, connected, or configured, an error is returned.
    pub fn connect(remote_addr: RemoteAddr, write_timeout: Duration) -> io::Result<Self> {
        let first = remote_addr
            .addrs()
            .first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no remote addresses"))?;
        let socket = if first.is_ipv4() {
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
        } else {
            UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
        };
        socket.connect(remote_addr.addrs())?;
        socket.set_write_timeout(Some(write_timeout))?;

        debug!(%remote_addr, local_addr = ?socket.local_addr().ok(), "Connected UDP transport.");
        Ok(Self { socket, remote_addr })
    }

    /// Returns the remote address this transport sends to.
    pub fn remote_addr(&self) -> &RemoteAddr {
        &self.remote_addr
    }
}

impl Transport for UdpTransport {
    fn transmit(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload)
    }
}

/// Sends the payload, discarding any error after logging it.
///
/// Nothing meaningful can be done about a lost telemetry datagram, so failures stop here instead of reaching the code
/// that recorded the points. Returns `true` if the payload was sent.
pub(crate) fn transmit_or_log<T>(transport: &T, payload: &[u8]) -> bool
where
    T: Transport + ?Sized,
{
    match transport.transmit(payload) {
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, payload_len = payload.len(), "Failed to send payload.");
            false
        }
    }
}
