//! Non-blocking `std::net` transport endpoints.
//!
//! [`open_server`] and [`open_client`] create sockets in non-blocking mode;
//! every [`Transport`] call returns immediately and "would block" surfaces as
//! [`Received::NoData`] rather than an error.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, trace};

use super::error::{TransportError, TransportResult};
use crate::core::{Protocol, Received, Transport};

#[derive(Debug)]
enum Socket {
    Udp(UdpSocket),
    Listener(TcpListener),
    Stream(TcpStream),
}

/// A non-blocking OS socket.
#[derive(Debug)]
pub struct NetTransport {
    protocol: Protocol,
    local_addr: SocketAddr,
    socket: RwLock<Option<Socket>>,
}

impl NetTransport {
    fn new(protocol: Protocol, socket: Socket) -> TransportResult<Self> {
        let local_addr = match &socket {
            Socket::Udp(s) => s.local_addr()?,
            Socket::Listener(s) => s.local_addr()?,
            Socket::Stream(s) => s.local_addr()?,
        };
        Ok(Self {
            protocol,
            local_addr,
            socket: RwLock::new(Some(socket)),
        })
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn socket(&self) -> TransportResult<RwLockReadGuard<'_, Option<Socket>>> {
        let guard = self.socket.read().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            return Err(TransportError::Custom("socket closed".into()));
        }
        Ok(guard)
    }
}

impl Transport for NetTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn local_address(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn send(&self, remote: Option<SocketAddr>, bytes: &[u8]) -> TransportResult<()> {
        let guard = self.socket()?;
        match guard.as_ref() {
            Some(Socket::Udp(socket)) => {
                let remote = remote.ok_or_else(|| TransportError::Custom("no remote address".into()))?;
                loop {
                    match socket.send_to(bytes, remote) {
                        Ok(_) => return Ok(()),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        // The datagram is lost like any other; the ack engine copes.
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Some(Socket::Stream(stream)) => write_all_nonblocking(stream, bytes),
            Some(Socket::Listener(_)) => Err(TransportError::Custom("cannot send on a listening socket".into())),
            None => Err(TransportError::Custom("socket closed".into())),
        }
    }

    fn receive(&self, buf: &mut [u8]) -> TransportResult<Received> {
        let guard = self.socket()?;
        let result = match guard.as_ref() {
            Some(Socket::Udp(socket)) => socket
                .recv_from(buf)
                .map(|(len, from)| Received::Data { len, from: Some(from) }),
            Some(Socket::Stream(stream)) => {
                let mut stream: &TcpStream = stream;
                stream.read(buf).map(|len| match len {
                    0 => Received::Closed,
                    len => Received::Data { len, from: None },
                })
            }
            Some(Socket::Listener(_)) => return Ok(Received::NoData),
            None => return Err(TransportError::Custom("socket closed".into())),
        };

        match result {
            Ok(received) => Ok(received),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(Received::NoData)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn accept(&self) -> TransportResult<Option<(Arc<dyn Transport>, SocketAddr)>> {
        let guard = self.socket()?;
        let Some(Socket::Listener(listener)) = guard.as_ref() else {
            return Ok(None);
        };

        match listener.accept() {
            Ok((stream, remote)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                debug!("accepted TCP peer {}", remote);
                let transport = NetTransport::new(Protocol::Tcp, Socket::Stream(stream))?;
                Ok(Some((Arc::new(transport), remote)))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        let socket = self
            .socket
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Socket::Stream(stream)) = &socket {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if socket.is_some() {
            trace!("closed {:?} socket {}", self.protocol, self.local_addr);
        }
    }
}

/// Write all of `bytes`, spinning while the socket buffer is full.
///
/// A stream cannot drop half a packet without losing framing, so partial
/// writes are always completed.
fn write_all_nonblocking(mut stream: &TcpStream, mut bytes: &[u8]) -> TransportResult<()> {
    while !bytes.is_empty() {
        match stream.write(bytes) {
            Ok(0) => return Err(TransportError::ConnectionAborted),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                std::thread::yield_now();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Open a listening endpoint on all IPv4 interfaces.
pub fn open_server(protocol: Protocol, port: u16) -> TransportResult<Arc<NetTransport>> {
    open_server_at(protocol, SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
}

/// Open a listening endpoint on a specific address.
pub fn open_server_at(protocol: Protocol, addr: SocketAddr) -> TransportResult<Arc<NetTransport>> {
    let socket = match protocol {
        Protocol::Udp => {
            let socket = UdpSocket::bind(addr)?;
            socket.set_nonblocking(true)?;
            Socket::Udp(socket)
        }
        Protocol::Tcp => {
            let listener = TcpListener::bind(addr)?;
            listener.set_nonblocking(true)?;
            Socket::Listener(listener)
        }
    };
    let transport = NetTransport::new(protocol, socket)?;
    debug!("opened {:?} server on {}", protocol, transport.local_addr());
    Ok(Arc::new(transport))
}

/// Open an endpoint talking to `host:port`.
///
/// TCP connects synchronously and then switches to non-blocking mode. UDP
/// binds an ephemeral port of the remote's address family.
pub fn open_client(
    protocol: Protocol,
    host: &str,
    port: u16,
) -> TransportResult<(Arc<NetTransport>, SocketAddr)> {
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::HostNotFound)?
        .collect();
    let first = *candidates.first().ok_or(TransportError::HostNotFound)?;

    match protocol {
        Protocol::Udp => {
            let bind_addr = if first.is_ipv4() {
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
            } else {
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
            };
            let socket = UdpSocket::bind(bind_addr)?;
            socket.set_nonblocking(true)?;
            Ok((Arc::new(NetTransport::new(protocol, Socket::Udp(socket))?), first))
        }
        Protocol::Tcp => {
            let mut last_error = TransportError::HostNotFound;
            for remote in candidates {
                match TcpStream::connect(remote) {
                    Ok(stream) => {
                        stream.set_nonblocking(true)?;
                        stream.set_nodelay(true)?;
                        let transport = NetTransport::new(protocol, Socket::Stream(stream))?;
                        return Ok((Arc::new(transport), remote));
                    }
                    Err(e) => {
                        debug!("connecting to {} failed: {}", remote, e);
                        last_error = e.into();
                    }
                }
            }
            Err(last_error)
        }
    }
}
