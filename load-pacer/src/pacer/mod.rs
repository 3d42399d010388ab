mod download;
pub use self::download::PacerDownload;

mod upload;
pub use self::upload::PacerUpload;


use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use tcp_estats::ConnectionHandle;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{
    capture::{ConnectionSlot, ConnectionTracer},
    error::PacerError,
    meter::IntervalMeter,
    verbosity::Verbosity,
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted = 0,
    Starting = 1,
    InProgress = 2,
    Completed = 3,
    Failed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::NotStarted,
            1 => SessionState::Starting,
            2 => SessionState::InProgress,
            3 => SessionState::Completed,
            _ => SessionState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Drives one long-lived transfer over a single HTTP/2 connection.
pub trait Pacer: Send + Sync {
    /// Spawns the transfer on the current tokio runtime.
    /// Returns `false` if nothing could be spawned; request failures show up later
    /// through `valid` and `in_progress`.
    fn start(&mut self, token: CancellationToken, verbosity: Verbosity) -> bool;

    /// Bytes moved since the previous call and the time it took.
    fn transferred_in_interval(&self) -> (u64, Duration);

    fn state(&self) -> SessionState;

    fn client_id(&self) -> u64;

    fn connection(&self) -> Option<ConnectionHandle>;

    fn valid(&self) -> bool {
        !matches!(self.state(), SessionState::NotStarted | SessionState::Failed)
    }

    fn in_progress(&self) -> bool {
        matches!(self.state(), SessionState::Starting | SessionState::InProgress)
    }
}

fn next_client_id() -> u64 {
    static CLIENT_ID: AtomicU64 = AtomicU64::new(1);
    CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// State shared by a pacer and its transfer task.
pub(crate) struct Session {
    state: AtomicU8,
    meter: Arc<IntervalMeter>,
    slot: ConnectionSlot,
    client_id: u64,
    verbosity: Verbosity,
}

impl Session {
    fn new(verbosity: Verbosity) -> Self {
        Session {
            state: AtomicU8::new(SessionState::NotStarted as u8),
            meter: Arc::new(IntervalMeter::new()),
            slot: ConnectionSlot::default(),
            client_id: next_client_id(),
            verbosity,
        }
    }

    /// Spawns `task` with a fresh session in `Starting` state.
    /// Without a runtime the session fails right away.
    pub(crate) fn launch<F, Fut>(
        verbosity: Verbosity,
        kind: &'static str,
        task: F,
    ) -> (Arc<Self>, bool)
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<(), PacerError>> + Send + 'static,
    {
        let session = Arc::new(Session::new(verbosity));
        session.advance(SessionState::Starting);
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                log::error!("client {}: cannot start {kind}: {err}", session.client_id);
                session.advance(SessionState::Failed);
                return (session, false);
            }
        };

        log::info!("client {}: starting {kind}", session.client_id);
        let transfer = task(session.clone());
        let s = session.clone();
        runtime.spawn(async move {
            let result = transfer.await;
            s.finish(kind, result);
        });

        (session, true)
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Terminal states are never left.
    pub(crate) fn advance(&self, next: SessionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if SessionState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            });
    }

    fn finish(&self, kind: &str, result: Result<(), PacerError>) {
        match result {
            Ok(()) => {
                log::info!("client {}: {kind} done", self.client_id);
                self.advance(SessionState::Completed);
            }
            Err(PacerError::Cancelled) => {
                log::info!("client {}: {kind} {}", self.client_id, PacerError::Cancelled);
                self.advance(SessionState::Failed);
            }
            Err(err) => {
                log::warn!("client {}: {kind} failed: {err}", self.client_id);
                self.advance(SessionState::Failed);
            }
        }
    }

    pub(crate) fn meter(&self) -> Arc<IntervalMeter> {
        self.meter.clone()
    }

    pub(crate) fn client_id(&self) -> u64 {
        self.client_id
    }

    pub(crate) fn connection(&self) -> Option<ConnectionHandle> {
        self.slot.load()
    }

    pub(crate) fn transferred_in_interval(&self) -> (u64, Duration) {
        self.meter.take_interval()
    }
}

impl ConnectionTracer for Session {
    fn dns_start(&self, host: &str) {
        if self.verbosity.is_debug() {
            log::debug!("client {}: resolving {host}", self.client_id);
        }
    }

    fn dns_done(&self, addrs: &[SocketAddr]) {
        if self.verbosity.is_debug() {
            log::debug!("client {}: resolved {addrs:?}", self.client_id);
        }
    }

    fn connect_done(&self, addr: SocketAddr, error: Option<&io::Error>) {
        if self.verbosity.is_debug() {
            match error {
                None => log::debug!("client {}: connected to {addr}", self.client_id),
                Some(err) => log::debug!("client {}: connect to {addr}: {err}", self.client_id),
            }
        }
    }

    fn tls_handshake_done(&self, alpn: Option<&[u8]>) {
        if self.verbosity.is_debug() {
            let alpn = alpn.map(String::from_utf8_lossy);
            log::debug!("client {}: tls established, alpn {alpn:?}", self.client_id);
        }
    }

    fn got_connection(&self, connection: ConnectionHandle) {
        if self.verbosity.is_debug() {
            log::debug!("client {}: got connection {connection:?}", self.client_id);
        }
        self.slot.store(connection);
    }

    fn request_written(&self) {
        if self.verbosity.is_debug() {
            log::debug!("client {}: request sent", self.client_id);
        }
    }

    fn response_ready(&self) {
        if self.verbosity.is_debug() {
            log::debug!("client {}: response head received", self.client_id);
        }
    }
}
