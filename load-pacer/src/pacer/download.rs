use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::Request;
use http_body_util::{BodyExt, Empty};
use tcp_estats::ConnectionHandle;
use tokio_util::sync::CancellationToken;

use super::{
    super::{
        body::CountingBody,
        capture::ConnectionTracer,
        connector::{Connector, Target},
        error::PacerError,
        keylog::KeyLogSink,
        verbosity::Verbosity,
    },
    Pacer, Session, SessionState,
};

/// `GET`s the target and discards the response body, counting every byte.
pub struct PacerDownload {
    url: String,
    key_log: Option<Arc<KeyLogSink>>,
    session: Option<Arc<Session>>,
}

impl PacerDownload {
    pub fn new(url: impl Into<String>) -> Self {
        PacerDownload {
            url: url.into(),
            key_log: None,
            session: None,
        }
    }

    pub fn with_key_log(self, key_log: Arc<KeyLogSink>) -> Self {
        PacerDownload {
            key_log: Some(key_log),
            ..self
        }
    }
}

async fn download(
    url: String,
    key_log: Option<Arc<KeyLogSink>>,
    session: Arc<Session>,
    token: CancellationToken,
) -> Result<(), PacerError> {
    let target = Target::parse(&url)?;
    let connector = Connector::new(key_log)?;
    let request = Request::get(target.uri().clone()).body(Empty::<Bytes>::new())?;

    // the connection closes once every sender is gone, keep it for the whole transfer
    let (_sender, response) = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(PacerError::Cancelled),
        response = async {
            let mut sender = connector.open(&target, &*session).await?;
            sender.ready().await.map_err(PacerError::Handshake)?;
            let response = sender.send_request(request);
            session.request_written();
            let response = response.await.map_err(PacerError::Transfer)?;
            Ok::<_, PacerError>((sender, response))
        } => response?,
    };
    session.response_ready();
    session.advance(SessionState::InProgress);
    if !response.status().is_success() {
        log::warn!("client {}: {target} responded {}", session.client_id(), response.status());
    }

    let mut body = CountingBody::new(response.into_body(), session.meter(), token.clone());
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = body.frame() => match frame {
                None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(PacerError::Transfer(err)),
            },
        }
    }
    log::debug!("client {}: downloaded {} bytes", session.client_id(), body.total());

    Ok(())
}

impl Pacer for PacerDownload {
    fn start(&mut self, token: CancellationToken, verbosity: Verbosity) -> bool {
        if self.session.is_some() {
            log::warn!("download to {} is already started", self.url);
            return false;
        }
        let (url, key_log) = (self.url.clone(), self.key_log.clone());
        let (session, started) = Session::launch(verbosity, "download", move |session| {
            download(url, key_log, session, token)
        });
        self.session = Some(session);
        started
    }

    fn transferred_in_interval(&self) -> (u64, Duration) {
        self.session
            .as_deref()
            .map_or((0, Duration::ZERO), Session::transferred_in_interval)
    }

    fn state(&self) -> SessionState {
        self.session
            .as_deref()
            .map_or(SessionState::NotStarted, Session::state)
    }

    fn client_id(&self) -> u64 {
        self.session.as_deref().map_or(0, Session::client_id)
    }

    fn connection(&self) -> Option<ConnectionHandle> {
        self.session.as_deref().and_then(Session::connection)
    }
}
