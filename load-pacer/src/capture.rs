use std::{io, net::SocketAddr, sync::Arc};

use arc_swap::ArcSwapOption;
use tcp_estats::ConnectionHandle;

/// Hooks invoked while a connection is being established.
///
/// Only `got_connection` carries behavior, the rest are extension points.
pub trait ConnectionTracer: Send + Sync {
    fn dns_start(&self, _host: &str) {}

    fn dns_done(&self, _addrs: &[SocketAddr]) {}

    fn connect_start(&self, _addr: SocketAddr) {}

    fn connect_done(&self, _addr: SocketAddr, _error: Option<&io::Error>) {}

    fn tls_handshake_start(&self) {}

    /// `alpn` is the negotiated application protocol, if any
    fn tls_handshake_done(&self, _alpn: Option<&[u8]>) {}

    fn got_connection(&self, connection: ConnectionHandle);

    fn request_written(&self) {}

    fn response_ready(&self) {}
}

/// The most recently acquired connection.
/// Readers observe either the previous or the new handle, never a mix.
pub struct ConnectionSlot {
    current: ArcSwapOption<ConnectionHandle>,
}

impl Default for ConnectionSlot {
    fn default() -> Self {
        ConnectionSlot {
            current: ArcSwapOption::empty(),
        }
    }
}

impl ConnectionSlot {
    pub fn store(&self, connection: ConnectionHandle) {
        self.current.store(Some(Arc::new(connection)));
    }

    pub fn load(&self) -> Option<ConnectionHandle> {
        self.current.load_full().map(|c| ConnectionHandle::clone(&c))
    }
}

impl ConnectionTracer for ConnectionSlot {
    fn got_connection(&self, connection: ConnectionHandle) {
        self.store(connection);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
    };

    use tcp_estats::{ConnectionHandle, Security, Transport};

    use super::{ConnectionSlot, ConnectionTracer};

    fn handle(fd: i32) -> ConnectionHandle {
        let (handle, lease) =
            ConnectionHandle::register(fd, Security::Tls, Transport::Stream, None);
        // never queried, keep the fd "open"
        std::mem::forget(lease);
        handle
    }

    #[test]
    fn empty_until_acquired() {
        let slot = ConnectionSlot::default();
        assert!(slot.load().is_none());
        let a = handle(10);
        slot.got_connection(a.clone());
        assert_eq!(slot.load(), Some(a));
    }

    #[test]
    fn most_recent_connection_wins() {
        let slot = ConnectionSlot::default();
        let (a, b) = (handle(10), handle(11));
        slot.got_connection(a.clone());
        slot.got_connection(b.clone());
        let current = slot.load().unwrap();
        assert_eq!(current, b);
        assert_ne!(current, a);
    }

    #[test]
    fn concurrent_readers_see_a_or_b() {
        let slot = Arc::new(ConnectionSlot::default());
        let (a, b) = (handle(10), handle(11));
        slot.store(a.clone());

        let done = Arc::new(AtomicBool::new(false));
        let readers = (0..4)
            .map(|_| {
                let (slot, done, a, b) = (slot.clone(), done.clone(), a.clone(), b.clone());
                thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        let current = slot.load().expect("stored before readers start");
                        assert!(current == a || current == b);
                    }
                })
            })
            .collect::<Vec<_>>();

        for i in 0..10_000 {
            slot.got_connection(if i % 2 == 0 { b.clone() } else { a.clone() });
        }
        slot.got_connection(b.clone());
        done.store(true, Ordering::Release);
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(slot.load(), Some(b));
    }
}
