use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PacerError {
    #[error("invalid target {_0}: {_1}")]
    InvalidTarget(String, String),
    #[error("{_0}")]
    Request(#[from] http::Error),
    #[error("tls configuration: {_0}")]
    TlsConfig(rustls::Error),
    #[error("cannot resolve {_0}: {_1}")]
    Resolve(String, io::Error),
    #[error("cannot connect: {_0}")]
    Connect(io::Error),
    #[error("tls handshake: {_0}")]
    TlsHandshake(io::Error),
    #[error("http/2 handshake: {_0}")]
    Handshake(hyper::Error),
    #[error("transfer: {_0}")]
    Transfer(hyper::Error),
    #[error("cancelled before the transfer started")]
    Cancelled,
}

impl PacerError {
    /// The request could not even be built, no network activity happened.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            PacerError::InvalidTarget(..) | PacerError::Request(_) | PacerError::TlsConfig(_)
        )
    }
}
