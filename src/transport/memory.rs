//! In-process transport endpoints.
//!
//! A [`MemoryNetwork`] routes datagrams and byte streams between endpoints
//! living in the same process. Nothing ever blocks, every send is recorded,
//! and a per-endpoint drop filter simulates loss, which makes it the
//! transport of choice for deterministic tests of the reliability layer.

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::error::{TransportError, TransportResult};
use crate::core::{Protocol, Received, Transport};

/// Number of sent packets an endpoint remembers; older ones are forgotten.
pub const SENT_LOG_CAPACITY: usize = 1024;

/// Decides whether an outgoing packet is lost (`true`) or delivered.
pub type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Mailbox {
    datagrams: VecDeque<(Vec<u8>, SocketAddr)>,
    stream: VecDeque<u8>,
    peer_closed: bool,
    pending: VecDeque<(Arc<dyn Transport>, SocketAddr)>,
}

/// A set of endpoints that can reach each other.
#[derive(Clone)]
pub struct MemoryNetwork {
    mailboxes: Arc<Mutex<HashMap<SocketAddr, Mailbox>>>,
    next_port: Arc<AtomicU16>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self {
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
            next_port: Arc::new(AtomicU16::new(40000)),
        }
    }

    fn allocate_addr(&self) -> SocketAddr {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        SocketAddr::from((Ipv4Addr::new(10, 0, 0, 1), port))
    }

    fn endpoint(&self, protocol: Protocol, peer: Option<SocketAddr>) -> Arc<MemoryTransport> {
        let local = self.allocate_addr();
        lock(&self.mailboxes).insert(local, Mailbox::default());
        Arc::new(MemoryTransport {
            protocol,
            local,
            peer,
            network: self.clone(),
            drop_filter: Mutex::new(None),
            sent: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Bind a new endpoint at a fresh address.
    ///
    /// For TCP this is a listener: it only accepts peers created with
    /// [`MemoryNetwork::connect_stream`].
    pub fn bind(&self, protocol: Protocol) -> Arc<MemoryTransport> {
        self.endpoint(protocol, None)
    }

    /// Open a stream to `listener` and queue the server half for accept.
    pub fn connect_stream(&self, listener: &MemoryTransport) -> Arc<MemoryTransport> {
        let client_addr = self.allocate_addr();
        let server_half = self.endpoint(Protocol::Tcp, Some(client_addr));

        lock(&self.mailboxes).insert(client_addr, Mailbox::default());
        let client_half = Arc::new(MemoryTransport {
            protocol: Protocol::Tcp,
            local: client_addr,
            peer: Some(server_half.local),
            network: self.clone(),
            drop_filter: Mutex::new(None),
            sent: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        });

        if let Some(mailbox) = lock(&self.mailboxes).get_mut(&listener.local) {
            mailbox.pending.push_back((server_half as Arc<dyn Transport>, client_addr));
        }
        client_half
    }
}

/// An endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    protocol: Protocol,
    local: SocketAddr,
    peer: Option<SocketAddr>,
    network: MemoryNetwork,
    drop_filter: Mutex<Option<DropFilter>>,
    sent: Mutex<VecDeque<Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Address of this endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Install a filter deciding which outgoing packets get lost.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        *lock(&self.drop_filter) = Some(Box::new(filter));
    }

    /// Remove the drop filter; every packet is delivered again.
    pub fn clear_drop_filter(&self) {
        *lock(&self.drop_filter) = None;
    }

    /// Drain the record of everything sent, dropped packets included.
    ///
    /// Only the last [`SENT_LOG_CAPACITY`] packets are kept.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).drain(..).collect()
    }

    /// Place bytes in this endpoint's receive queue as if `from` sent them.
    pub fn inject(&self, bytes: &[u8], from: SocketAddr) {
        let mut mailboxes = lock(&self.network.mailboxes);
        if let Some(mailbox) = mailboxes.get_mut(&self.local) {
            match self.protocol {
                Protocol::Udp => mailbox.datagrams.push_back((bytes.to_vec(), from)),
                Protocol::Tcp => mailbox.stream.extend(bytes),
            }
        }
    }

    /// Check if [`Transport::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error() -> TransportError {
        TransportError::Custom("endpoint closed".into())
    }
}

impl Transport for MemoryTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn local_address(&self) -> Option<SocketAddr> {
        Some(self.local)
    }

    fn send(&self, remote: Option<SocketAddr>, bytes: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        {
            let mut sent = lock(&self.sent);
            if sent.len() == SENT_LOG_CAPACITY {
                sent.pop_front();
            }
            sent.push_back(bytes.to_vec());
        }

        let dropped = lock(&self.drop_filter)
            .as_mut()
            .is_some_and(|filter| filter(bytes));
        if dropped {
            trace!("memory transport {}: dropping {} bytes", self.local, bytes.len());
            return Ok(());
        }

        let mut mailboxes = lock(&self.network.mailboxes);
        match self.protocol {
            Protocol::Udp => {
                let target = remote
                    .or(self.peer)
                    .ok_or_else(|| TransportError::Custom("no remote address".into()))?;
                if let Some(mailbox) = mailboxes.get_mut(&target) {
                    mailbox.datagrams.push_back((bytes.to_vec(), self.local));
                }
                Ok(())
            }
            Protocol::Tcp => {
                let target = self.peer.ok_or(TransportError::ConnectionRefused)?;
                match mailboxes.get_mut(&target) {
                    Some(mailbox) if !mailbox.peer_closed => {
                        mailbox.stream.extend(bytes);
                        Ok(())
                    }
                    _ => Err(TransportError::ConnectionReset),
                }
            }
        }
    }

    fn receive(&self, buf: &mut [u8]) -> TransportResult<Received> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        let mut mailboxes = lock(&self.network.mailboxes);
        let Some(mailbox) = mailboxes.get_mut(&self.local) else {
            return Err(Self::closed_error());
        };

        match self.protocol {
            Protocol::Udp => match mailbox.datagrams.pop_front() {
                Some((datagram, from)) => {
                    let len = datagram.len().min(buf.len());
                    buf[..len].copy_from_slice(&datagram[..len]);
                    Ok(Received::Data {
                        len,
                        from: Some(from),
                    })
                }
                None => Ok(Received::NoData),
            },
            Protocol::Tcp => {
                if mailbox.stream.is_empty() {
                    return Ok(if mailbox.peer_closed {
                        Received::Closed
                    } else {
                        Received::NoData
                    });
                }
                let len = mailbox.stream.len().min(buf.len());
                for (slot, byte) in buf.iter_mut().zip(mailbox.stream.drain(..len)) {
                    *slot = byte;
                }
                Ok(Received::Data {
                    len,
                    from: self.peer,
                })
            }
        }
    }

    fn accept(&self) -> TransportResult<Option<(Arc<dyn Transport>, SocketAddr)>> {
        if self.is_closed() {
            return Err(Self::closed_error());
        }
        Ok(lock(&self.network.mailboxes)
            .get_mut(&self.local)
            .and_then(|mailbox| mailbox.pending.pop_front()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut mailboxes = lock(&self.network.mailboxes);
        mailboxes.remove(&self.local);
        if let Some(peer) = self.peer.and_then(|peer| mailboxes.get_mut(&peer)) {
            peer.peer_closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(result: TransportResult<Received>) -> (usize, Option<SocketAddr>) {
        match result.unwrap() {
            Received::Data { len, from } => (len, from),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn test_datagrams_keep_boundaries() {
        let network = MemoryNetwork::new();
        let a = network.bind(Protocol::Udp);
        let b = network.bind(Protocol::Udp);

        a.send(Some(b.local_addr()), b"one").unwrap();
        a.send(Some(b.local_addr()), b"three").unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(data(b.receive(&mut buf)), (3, Some(a.local_addr())));
        assert_eq!(data(b.receive(&mut buf)), (5, Some(a.local_addr())));
        assert_eq!(b.receive(&mut buf).unwrap(), Received::NoData);
    }

    #[test]
    fn test_stream_coalesces_and_splits() {
        let network = MemoryNetwork::new();
        let listener = network.bind(Protocol::Tcp);
        let client = network.connect_stream(&listener);
        let (server, from) = listener.accept().unwrap().unwrap();
        assert_eq!(from, client.local_addr());
        assert!(listener.accept().unwrap().is_none());

        client.send(None, b"abc").unwrap();
        client.send(None, b"defg").unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(data(server.receive(&mut buf)).0, 5);
        assert_eq!(&buf, b"abcde");
        assert_eq!(data(server.receive(&mut buf)).0, 2);
        assert_eq!(&buf[..2], b"fg");
    }

    #[test]
    fn test_stream_close_is_seen_by_peer() {
        let network = MemoryNetwork::new();
        let listener = network.bind(Protocol::Tcp);
        let client = network.connect_stream(&listener);
        let (server, _) = listener.accept().unwrap().unwrap();

        client.close();
        let mut buf = [0u8; 8];
        assert_eq!(server.receive(&mut buf).unwrap(), Received::Closed);
        assert_eq!(server.send(None, b"x"), Err(TransportError::ConnectionReset));
        assert!(client.send(None, b"x").is_err());
    }

    #[test]
    fn test_drop_filter_records_but_loses() {
        let network = MemoryNetwork::new();
        let a = network.bind(Protocol::Udp);
        let b = network.bind(Protocol::Udp);
        a.set_drop_filter(|bytes| bytes[0] == 0xFF);

        a.send(Some(b.local_addr()), &[0xFF]).unwrap();
        a.send(Some(b.local_addr()), &[0x01]).unwrap();
        assert_eq!(a.take_sent(), vec![vec![0xFF], vec![0x01]]);

        let mut buf = [0u8; 4];
        assert_eq!(data(b.receive(&mut buf)).0, 1);
        assert_eq!(buf[0], 0x01);
        assert_eq!(b.receive(&mut buf).unwrap(), Received::NoData);
    }

    #[test]
    fn test_sent_log_is_bounded() {
        let network = MemoryNetwork::new();
        let a = network.bind(Protocol::Udp);
        let b = network.bind(Protocol::Udp).local_addr();

        for i in 0..SENT_LOG_CAPACITY + 10 {
            a.send(Some(b), &(i as u32).to_ne_bytes()).unwrap();
        }
        let sent = a.take_sent();
        assert_eq!(sent.len(), SENT_LOG_CAPACITY);
        assert_eq!(sent[0], 10u32.to_ne_bytes().to_vec());
        assert!(a.take_sent().is_empty());
    }
}
