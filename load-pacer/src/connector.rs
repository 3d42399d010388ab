use std::{
    error::Error as StdError,
    fmt, io,
    os::unix::io::AsRawFd,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use http::Uri;
use http_body::Body;
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{self, CryptoProvider},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, SignatureScheme,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{self, TcpStream},
};
use tokio_rustls::{client::TlsStream, TlsConnector};

use tcp_estats::{ConnectionHandle, Security, SocketLease, Transport};

use super::{capture::ConnectionTracer, error::PacerError, keylog::KeyLogSink};

#[derive(Debug, Clone)]
pub struct Target {
    uri: Uri,
    host: String,
    port: u16,
    secure: bool,
}

impl Target {
    pub fn parse(s: &str) -> Result<Self, PacerError> {
        let invalid = |reason: String| PacerError::InvalidTarget(s.to_owned(), reason);

        let uri = s.parse::<Uri>().map_err(|err| invalid(err.to_string()))?;
        let secure = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(scheme) => return Err(invalid(format!("unsupported scheme {scheme}"))),
            None => return Err(invalid("missing scheme".to_owned())),
        };
        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.trim_start_matches('[').trim_end_matches(']'),
            _ => return Err(invalid("missing host".to_owned())),
        };
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

        Ok(Target {
            host: host.to_owned(),
            port,
            secure,
            uri,
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uri.fmt(f)
    }
}

/// Accepts any server certificate, the connection only generates load.
/// Handshake signatures are still checked with the provider's algorithms.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        let algorithms = &self.0.signature_verification_algorithms;
        crypto::verify_tls12_signature(message, cert, dss, algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        let algorithms = &self.0.signature_verification_algorithms;
        crypto::verify_tls13_signature(message, cert, dss, algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

pub fn client_config(key_log: Option<Arc<KeyLogSink>>) -> Result<ClientConfig, PacerError> {
    let provider = Arc::new(crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(PacerError::TlsConfig)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];
    if let Some(key_log) = key_log {
        config.key_log = key_log;
    }

    Ok(config)
}

/// Socket of an established connection, optionally wrapped in TLS.
/// Releases the telemetry lease before the socket is closed.
pub struct Stream {
    // must be dropped before `io`
    _lease: SocketLease,
    io: Io,
}

enum Io {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().io {
            Io::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Io::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().io {
            Io::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Io::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().io {
            Io::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            Io::Tls(s) => Pin::new(&mut **s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match &self.io {
            Io::Plain(s) => s.is_write_vectored(),
            Io::Tls(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().io {
            Io::Plain(s) => Pin::new(s).poll_flush(cx),
            Io::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().io {
            Io::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Io::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }
}

/// Establishes HTTP/2 connections: TLS for `https`, prior knowledge cleartext for `http`.
pub struct Connector {
    tls: Arc<ClientConfig>,
}

impl Connector {
    pub fn new(key_log: Option<Arc<KeyLogSink>>) -> Result<Self, PacerError> {
        Ok(Connector {
            tls: Arc::new(client_config(key_log)?),
        })
    }

    pub async fn dial(
        &self,
        target: &Target,
        tracer: &dyn ConnectionTracer,
    ) -> Result<Stream, PacerError> {
        tracer.dns_start(&target.host);
        let addrs = net::lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(|err| PacerError::Resolve(target.host.clone(), err))?
            .collect::<Vec<_>>();
        tracer.dns_done(&addrs);

        let mut last_error = None;
        let mut tcp = None;
        for addr in addrs {
            tracer.connect_start(addr);
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tracer.connect_done(addr, None);
                    tcp = Some(stream);
                    break;
                }
                Err(err) => {
                    tracer.connect_done(addr, Some(&err));
                    log::debug!("{target}: cannot connect to {addr}: {err}");
                    last_error = Some(err);
                }
            }
        }
        let Some(tcp) = tcp else {
            let err = last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"));
            return Err(PacerError::Connect(err));
        };
        if let Err(err) = tcp.set_nodelay(true) {
            log::debug!("{target}: cannot set nodelay: {err}");
        }
        let peer = tcp.peer_addr().ok();
        let fd = tcp.as_raw_fd();

        let (io, security) = if target.secure {
            let name = ServerName::try_from(target.host.as_str())
                .map_err(|err| PacerError::InvalidTarget(target.to_string(), err.to_string()))?
                .to_owned();
            tracer.tls_handshake_start();
            let stream = TlsConnector::from(self.tls.clone())
                .connect(name, tcp)
                .await
                .map_err(PacerError::TlsHandshake)?;
            let alpn = stream.get_ref().1.alpn_protocol();
            tracer.tls_handshake_done(alpn);
            if alpn != Some(b"h2".as_slice()) {
                log::warn!("{target}: the server did not negotiate h2");
            }
            (Io::Tls(Box::new(stream)), Security::Tls)
        } else {
            (Io::Plain(tcp), Security::Plain)
        };

        let (handle, lease) = ConnectionHandle::register(fd, security, Transport::Stream, peer);
        tracer.got_connection(handle);

        Ok(Stream { _lease: lease, io })
    }

    /// Dials and performs the HTTP/2 handshake, the connection is driven by a spawned task.
    pub async fn open<B>(
        &self,
        target: &Target,
        tracer: &dyn ConnectionTracer,
    ) -> Result<SendRequest<B>, PacerError>
    where
        B: Body + Send + Unpin + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let stream = self.dial(target, tracer).await?;
        let (sender, connection) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
            .await
            .map_err(PacerError::Handshake)?;
        let label = target.to_string();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::debug!("{label}: http/2 connection closed: {err}");
            }
        });

        Ok(sender)
    }
}
