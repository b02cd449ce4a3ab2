//! Transport adapter — the seam between the call plane and whatever moves
//! datagrams between nodes.
//!
//! The call plane only ever needs two operations: multicast one datagram to
//! every peer, and receive the next inbound datagram. Everything else
//! (membership, retransmission, ordering) is the transport's business.
//!
//! Two implementations ship here: [`UdpMulticastTransport`] for real LAN
//! deployments and [`LocalBus`] for several nodes inside one process.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};

use dstc_core::config::DstcConfig;

/// Datagram transport used by a [`crate::DstcNode`].
///
/// `send` is synchronous and non-blocking; delivery includes the sending
/// node itself (multicast loopback or bus fan-out) — the dispatcher drops
/// own-origin datagrams by node id, so implementations need not filter.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, datagram: Bytes) -> io::Result<()>;

    fn recv(&self) -> impl Future<Output = io::Result<(Bytes, SocketAddr)>> + Send;
}

// ── UDP multicast ─────────────────────────────────────────────────────────────

/// Largest UDP payload we will ever see: capacity plus framing headroom.
const RECV_BUF_LEN: usize = 65536;

/// IPv4 UDP multicast transport.
///
/// Split send/receive sockets: the sender carries the interface, TTL and
/// loopback options; the receiver is bound to the group port with address
/// reuse so several nodes can share one host.
pub struct UdpMulticastTransport {
    send_socket: std::net::UdpSocket,
    recv_socket: UdpSocket,
    dest: SocketAddr,
}

impl UdpMulticastTransport {
    /// Create the multicast sockets per the network section of `config`.
    ///
    /// Must be called from within a tokio runtime (the receive socket is
    /// registered with the reactor).
    pub fn bind(config: &DstcConfig) -> io::Result<Self> {
        let group: Ipv4Addr = config
            .multicast_group
            .parse()
            .map_err(|_| bad_addr("multicast_group", &config.multicast_group))?;
        let iface: Ipv4Addr = if config.multicast_iface.is_empty() {
            Ipv4Addr::UNSPECIFIED
        } else {
            config
                .multicast_iface
                .parse()
                .map_err(|_| bad_addr("multicast_iface", &config.multicast_iface))?
        };

        let send = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        send.set_multicast_if_v4(&iface)?;
        send.set_multicast_ttl_v4(config.multicast_ttl)?;
        // Loopback stays on: co-hosted nodes must hear each other. Our own
        // datagrams come back too and are dropped by origin id.
        send.set_multicast_loop_v4(true)?;

        let recv = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        recv.set_reuse_address(true)?;
        recv.set_nonblocking(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.multicast_port);
        recv.bind(&bind_addr.into())?;
        recv.join_multicast_v4(&group, &iface)?;

        tracing::info!(
            group = %group,
            port = config.multicast_port,
            ttl = config.multicast_ttl,
            "multicast transport bound"
        );

        Ok(Self {
            send_socket: send.into(),
            recv_socket: UdpSocket::from_std(recv.into())?,
            dest: SocketAddrV4::new(group, config.multicast_port).into(),
        })
    }
}

impl Transport for UdpMulticastTransport {
    fn send(&self, datagram: Bytes) -> io::Result<()> {
        self.send_socket.send_to(&datagram, self.dest)?;
        Ok(())
    }

    fn recv(&self) -> impl Future<Output = io::Result<(Bytes, SocketAddr)>> + Send {
        async {
            let mut buf = vec![0u8; RECV_BUF_LEN];
            let (len, from) = self.recv_socket.recv_from(&mut buf).await?;
            buf.truncate(len);
            Ok((Bytes::from(buf), from))
        }
    }
}

fn bad_addr(field: &str, value: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{field}: '{value}' is not an IPv4 address"),
    )
}

// ── In-process bus ────────────────────────────────────────────────────────────

/// Source address reported for bus-delivered datagrams.
const BUS_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

/// In-process broadcast bus. Every [`LocalBus::endpoint`] hears every send,
/// its own included — the same delivery shape as multicast with loopback.
///
/// Used by the integration tests and by hosts embedding several nodes in
/// one process.
pub struct LocalBus {
    tx: broadcast::Sender<Bytes>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn endpoint(&self) -> LocalEndpoint {
        LocalEndpoint {
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's attachment to a [`LocalBus`].
pub struct LocalEndpoint {
    tx: broadcast::Sender<Bytes>,
    rx: Mutex<broadcast::Receiver<Bytes>>,
}

impl Transport for LocalEndpoint {
    fn send(&self, datagram: Bytes) -> io::Result<()> {
        // Own subscription guarantees at least one receiver.
        self.tx
            .send(datagram)
            .map(|_| ())
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "bus has no receivers"))
    }

    fn recv(&self) -> impl Future<Output = io::Result<(Bytes, SocketAddr)>> + Send {
        async {
            let mut rx = self.rx.lock().await;
            loop {
                match rx.recv().await {
                    Ok(datagram) => return Ok((datagram, BUS_ADDR)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "bus receiver lagged, datagrams dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(io::Error::new(io::ErrorKind::NotConnected, "bus closed"));
                    }
                }
            }
        }
    }
}
