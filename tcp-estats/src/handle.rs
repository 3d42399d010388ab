use std::{fmt, net::SocketAddr, os::unix::io::RawFd, sync::Arc};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Plain,
    Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Connection oriented socket, TCP
    Stream,
    Datagram,
}

/// Shared reference to a live transport connection.
///
/// The handle never owns the socket. Whoever owns the socket keeps the
/// `SocketLease` returned by `register` next to it and drops the lease
/// before the socket is closed, after that `with_fd` returns `None`
/// and telemetry queries fail instead of touching a recycled descriptor.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

struct Inner {
    security: Security,
    transport: Transport,
    peer: Option<SocketAddr>,
    fd: RwLock<Option<RawFd>>,
}

pub struct SocketLease {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    pub fn register(
        fd: RawFd,
        security: Security,
        transport: Transport,
        peer: Option<SocketAddr>,
    ) -> (Self, SocketLease) {
        let inner = Arc::new(Inner {
            security,
            transport,
            peer,
            fd: RwLock::new(Some(fd)),
        });
        let lease = SocketLease {
            inner: inner.clone(),
        };
        (ConnectionHandle { inner }, lease)
    }

    pub fn security(&self) -> Security {
        self.inner.security
    }

    pub fn transport(&self) -> Transport {
        self.inner.transport
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Runs `f` on the descriptor while holding it open,
    /// `None` if the owner already released the socket.
    pub fn with_fd<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce(RawFd) -> T,
    {
        let fd = self.inner.fd.read();
        fd.map(f)
    }

    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_connection(other)
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("security", &self.inner.security)
            .field("transport", &self.inner.transport)
            .field("peer", &self.inner.peer)
            .field("fd", &*self.inner.fd.read())
            .finish()
    }
}

impl SocketLease {
    pub fn release(self) {}
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        // waits for in-flight queries
        *self.inner.fd.write() = None;
    }
}

impl fmt::Debug for SocketLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketLease")
            .field("fd", &*self.inner.fd.read())
            .finish()
    }
}
