use std::{sync::Arc, time::Duration};

use http::{header::CONTENT_TYPE, Request};
use http_body_util::BodyExt;
use tcp_estats::ConnectionHandle;
use tokio_util::sync::CancellationToken;

use super::{
    super::{
        body::SyntheticBody,
        capture::ConnectionTracer,
        connector::{Connector, Target},
        error::PacerError,
        keylog::KeyLogSink,
        verbosity::Verbosity,
    },
    Pacer, Session, SessionState,
};

/// `POST`s an endless stream of zeroed blocks to the target.
///
/// The body declares no length. It ends when the session is cancelled,
/// when the optional limit is reached, or when the server closes the stream.
pub struct PacerUpload {
    url: String,
    key_log: Option<Arc<KeyLogSink>>,
    limit: Option<u64>,
    session: Option<Arc<Session>>,
}

impl PacerUpload {
    pub fn new(url: impl Into<String>) -> Self {
        PacerUpload {
            url: url.into(),
            key_log: None,
            limit: None,
            session: None,
        }
    }

    pub fn with_key_log(self, key_log: Arc<KeyLogSink>) -> Self {
        PacerUpload {
            key_log: Some(key_log),
            ..self
        }
    }

    /// Stop after `limit` bytes instead of running until cancelled.
    pub fn with_limit(self, limit: Option<u64>) -> Self {
        PacerUpload { limit, ..self }
    }
}

async fn upload(
    url: String,
    key_log: Option<Arc<KeyLogSink>>,
    limit: Option<u64>,
    session: Arc<Session>,
    token: CancellationToken,
) -> Result<(), PacerError> {
    let target = Target::parse(&url)?;
    let connector = Connector::new(key_log)?;
    let body = SyntheticBody::new(session.meter(), token.clone()).with_limit(limit);
    let request = Request::post(target.uri().clone())
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(body)?;

    let mut sender = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(PacerError::Cancelled),
        sender = async {
            let mut sender = connector.open::<SyntheticBody>(&target, &*session).await?;
            sender.ready().await.map_err(PacerError::Handshake)?;
            Ok::<_, PacerError>(sender)
        } => sender?,
    };
    let response = sender.send_request(request);
    session.request_written();
    // the body starts flowing as soon as the request is sent
    session.advance(SessionState::InProgress);

    let response = tokio::select! {
        biased;
        _ = token.cancelled() => return Ok(()),
        response = response => response.map_err(PacerError::Transfer)?,
    };
    session.response_ready();
    if !response.status().is_success() {
        log::warn!("client {}: {target} responded {}", session.client_id(), response.status());
    }

    let mut body = response.into_body();
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

    Ok(())
}

impl Pacer for PacerUpload {
    fn start(&mut self, token: CancellationToken, verbosity: Verbosity) -> bool {
        if self.session.is_some() {
            log::warn!("upload to {} is already started", self.url);
            return false;
        }
        let (url, key_log, limit) = (self.url.clone(), self.key_log.clone(), self.limit);
        let (session, started) = Session::launch(verbosity, "upload", move |session| {
            upload(url, key_log, limit, session, token)
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
