//! Framed transport: dialling, liveness probing, fixed16 request/response.
//!
//! One `Transport` is owned by exactly one task at a time (the actor worker,
//! or a one-off call). The read-ahead buffer holds bytes consumed by the
//! liveness probe so nothing observed on the wire is ever lost to a reader.

use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{LivestatusConfig, DEFAULT_MAX_BODY_BYTES};
use crate::error::{LivestatusError, LivestatusResult};
use crate::protocol::{parse_fixed16_header, FIXED16_HEADER_LEN, STATUS_OK};
use crate::query::LivestatusQuery;
use crate::QueryResult;

/// A connected Livestatus stream over any of the supported transports.
#[derive(Debug)]
pub(crate) enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

enum Liveness {
    Alive,
    Dead,
}

/// A persistent connection plus the read-ahead bytes observed by probes.
#[derive(Debug)]
pub(crate) struct Transport {
    stream: Stream,
    readahead: Vec<u8>,
}

/// Dials a new connection per the config, bounded by `connect_timeout`.
pub(crate) async fn connect(config: &LivestatusConfig) -> LivestatusResult<Transport> {
    let stream = if config.connect_timeout > Duration::ZERO {
        timeout(config.connect_timeout, dial(config))
            .await
            .map_err(|_| LivestatusError::Timeout {
                phase: "connect",
                after: config.connect_timeout,
            })??
    } else {
        dial(config).await?
    };
    debug!(address = %config.address, "connected to livestatus");
    Ok(Transport {
        stream,
        readahead: Vec::new(),
    })
}

/// Ensures there is a live connection, probing the existing one and dialling
/// a fresh one when it is dead or absent.
pub(crate) async fn ensure(
    config: &LivestatusConfig,
    existing: Option<Transport>,
) -> LivestatusResult<Transport> {
    if let Some(mut transport) = existing {
        match transport.probe().await {
            Liveness::Alive => return Ok(transport),
            Liveness::Dead => {
                debug!(address = %config.address, "persistent connection is dead, redialling");
            }
        }
    }
    connect(config).await
}

impl Transport {
    /// Probes connection liveness with a single poll of the read half, the
    /// async analogue of a non-consuming peek under an immediate deadline:
    /// would-block means idle-alive, available data is stashed into the
    /// read-ahead buffer, EOF or any error means dead.
    async fn probe(&mut self) -> Liveness {
        let mut byte = [0u8; 1];
        match timeout(Duration::ZERO, self.stream.read(&mut byte)).await {
            Err(_) => Liveness::Alive,
            Ok(Ok(0)) => Liveness::Dead,
            Ok(Ok(n)) => {
                self.readahead.extend_from_slice(&byte[..n]);
                Liveness::Alive
            }
            Ok(Err(_)) => Liveness::Dead,
        }
    }

    /// Sends a single query with the framing headers forced and reads the
    /// fixed16 response.
    ///
    /// The caller's `token` is raced against every phase (write, header and
    /// body reads, oversize drain), so cancellation aborts mid-phase instead
    /// of waiting out the configured bound.
    ///
    /// Returns `Ok` with the server's result (including non-200 results
    /// carrying a [`LivestatusError::Server`]); transport-phase failures come
    /// back as `Err` and mean the connection should be considered dead.
    pub(crate) async fn exec(
        &mut self,
        config: &LivestatusConfig,
        token: &CancellationToken,
        query: &LivestatusQuery,
    ) -> LivestatusResult<QueryResult> {
        // Work on a local copy: a persistent connection requires fixed16
        // framing and keep-alive no matter what the caller set.
        let mut effective = query.clone();
        effective.response_header_fixed16().keep_alive(true);
        let mut rendered = effective.build();
        if !rendered.ends_with("\n\n") {
            if !rendered.ends_with('\n') {
                rendered.push('\n');
            }
            rendered.push('\n');
        }
        debug!(query = %rendered, "exec over persistent connection");

        let write_timeout = if config.write_timeout > Duration::ZERO {
            config.write_timeout
        } else {
            config.read_timeout
        };
        self.write_all_bounded(rendered.as_bytes(), write_timeout, token)
            .await?;

        // One read deadline covers the header and the body.
        let deadline = (config.read_timeout > Duration::ZERO)
            .then(|| Instant::now() + config.read_timeout);

        let mut header = [0u8; FIXED16_HEADER_LEN];
        if let Err(e) = self
            .read_exact_bounded(&mut header, deadline, config.read_timeout, token)
            .await
        {
            warn!(error = %e, "failed reading fixed16 header");
            return Err(e);
        }
        let (code, length) = parse_fixed16_header(&header)?;

        let cap = if config.max_body_bytes > 0 {
            config.max_body_bytes
        } else {
            DEFAULT_MAX_BODY_BYTES
        };
        if length < 0 || length as usize > cap {
            // Best-effort drain of the declared body so the connection stays
            // reusable for the next request.
            self.drain_bounded(length.max(0) as u64, deadline, token)
                .await
                .map_err(|e| LivestatusError::DrainFailed {
                    length,
                    reason: e.to_string(),
                })?;
            return Err(LivestatusError::Oversize { length, cap });
        }

        let mut body = vec![0u8; length as usize];
        self.read_exact_bounded(&mut body, deadline, config.read_timeout, token)
            .await?;

        if code != STATUS_OK {
            let message = String::from_utf8_lossy(&body).trim().to_string();
            let message = if message.is_empty() {
                "livestatus error".to_string()
            } else {
                message
            };
            return Ok(QueryResult::err(
                code,
                LivestatusError::Server { code, message },
            ));
        }
        Ok(QueryResult::ok(code, body))
    }

    /// Writes all bytes under the write bound, aborting mid-write the moment
    /// the caller's token fires.
    async fn write_all_bounded(
        &mut self,
        bytes: &[u8],
        bound: Duration,
        token: &CancellationToken,
    ) -> LivestatusResult<()> {
        if token.is_cancelled() {
            return Err(LivestatusError::Cancelled);
        }
        if bound > Duration::ZERO {
            tokio::select! {
                outcome = timeout(bound, self.stream.write_all(bytes)) => {
                    outcome.map_err(|_| LivestatusError::Timeout {
                        phase: "write",
                        after: bound,
                    })??;
                    Ok(())
                }
                _ = token.cancelled() => Err(LivestatusError::Cancelled),
            }
        } else {
            tokio::select! {
                outcome = self.stream.write_all(bytes) => {
                    outcome?;
                    Ok(())
                }
                _ = token.cancelled() => Err(LivestatusError::Cancelled),
            }
        }
    }

    /// Read-exact under the shared read deadline, aborting mid-read the
    /// moment the caller's token fires.
    async fn read_exact_bounded(
        &mut self,
        buf: &mut [u8],
        deadline: Option<Instant>,
        bound: Duration,
        token: &CancellationToken,
    ) -> LivestatusResult<()> {
        if token.is_cancelled() {
            return Err(LivestatusError::Cancelled);
        }
        match deadline {
            Some(deadline) => tokio::select! {
                outcome = timeout_at(deadline, self.read_exact_buffered(buf)) => {
                    outcome.map_err(|_| LivestatusError::Timeout {
                        phase: "read",
                        after: bound,
                    })??;
                    Ok(())
                }
                _ = token.cancelled() => Err(LivestatusError::Cancelled),
            },
            None => tokio::select! {
                outcome = self.read_exact_buffered(buf) => {
                    outcome?;
                    Ok(())
                }
                _ = token.cancelled() => Err(LivestatusError::Cancelled),
            },
        }
    }

    /// Read-full semantics over the stream, consuming read-ahead bytes first.
    async fn read_exact_buffered(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let mut filled = 0;
        if !self.readahead.is_empty() {
            let n = self.readahead.len().min(buf.len());
            buf[..n].copy_from_slice(&self.readahead[..n]);
            self.readahead.drain(..n);
            filled = n;
        }
        while filled < buf.len() {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Drains exactly `remaining` bytes into the void.
    async fn drain_bounded(
        &mut self,
        mut remaining: u64,
        deadline: Option<Instant>,
        token: &CancellationToken,
    ) -> std::io::Result<()> {
        if remaining == 0 {
            return Ok(());
        }
        let buffered = self.readahead.len().min(remaining as usize);
        self.readahead.drain(..buffered);
        remaining -= buffered as u64;

        let cancelled =
            || std::io::Error::new(ErrorKind::Interrupted, "cancelled while draining");
        let mut scratch = [0u8; 8192];
        while remaining > 0 {
            if token.is_cancelled() {
                return Err(cancelled());
            }
            let want = scratch.len().min(remaining.min(usize::MAX as u64) as usize);
            let read = self.stream.read(&mut scratch[..want]);
            let n = match deadline {
                Some(deadline) => tokio::select! {
                    outcome = timeout_at(deadline, read) => outcome.map_err(|_| {
                        std::io::Error::new(ErrorKind::TimedOut, "drain timed out")
                    })??,
                    _ = token.cancelled() => return Err(cancelled()),
                },
                None => tokio::select! {
                    outcome = read => outcome?,
                    _ = token.cancelled() => return Err(cancelled()),
                },
            };
            if n == 0 {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed while draining",
                ));
            }
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Unwraps the underlying stream. Only sound on a freshly dialled
    /// transport whose read-ahead buffer is still empty.
    pub(crate) fn into_stream(self) -> Stream {
        debug_assert!(self.readahead.is_empty());
        self.stream
    }

    #[cfg(test)]
    pub(crate) fn readahead_len(&self) -> usize {
        self.readahead.len()
    }
}

async fn dial(config: &LivestatusConfig) -> LivestatusResult<Stream> {
    if config.is_unix() {
        let stream = UnixStream::connect(&config.address)
            .await
            .map_err(|e| LivestatusError::Connect(format!("{}: {e}", config.address)))?;
        return Ok(Stream::Unix(stream));
    }

    let tcp = TcpStream::connect(&config.address)
        .await
        .map_err(|e| LivestatusError::Connect(format!("{}: {e}", config.address)))?;

    if config.use_tls {
        let connector = tls_connector(config)?;
        let host = config
            .address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&config.address);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| LivestatusError::Tls(format!("invalid server name {host:?}: {e}")))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| LivestatusError::Tls(e.to_string()))?;
        return Ok(Stream::Tls(Box::new(stream)));
    }

    Ok(Stream::Tcp(tcp))
}

fn tls_connector(config: &LivestatusConfig) -> LivestatusResult<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        // Unparsable platform certificates are skipped, matching what every
        // other client on the host does with them.
        let _ = roots.add(cert);
    }
    if let Some(ca_file) = &config.ca_file {
        let pem = std::fs::read(ca_file)
            .map_err(|e| LivestatusError::Tls(format!("failed to read CA file: {e}")))?;
        let mut added = 0usize;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert
                .map_err(|e| LivestatusError::Tls(format!("failed to parse CA file: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| LivestatusError::Tls(format!("failed to add CA certificate: {e}")))?;
            added += 1;
        }
        if added == 0 {
            return Err(LivestatusError::Tls(
                "no certificates found in CA file".to_string(),
            ));
        }
    }

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| LivestatusError::Tls(e.to_string()))?;

    let builder = if config.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification { provider }))
    } else {
        builder.with_root_certificates(roots)
    };

    let client_config = match (&config.cert_file, &config.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let cert_pem = std::fs::read(cert_file).map_err(|e| {
                LivestatusError::Tls(format!("failed to read client certificate: {e}"))
            })?;
            let certs: Vec<CertificateDer<'static>> =
                rustls_pemfile::certs(&mut cert_pem.as_slice())
                    .collect::<Result<_, _>>()
                    .map_err(|e| {
                        LivestatusError::Tls(format!("failed to parse client certificate: {e}"))
                    })?;
            let key_pem = std::fs::read(key_file)
                .map_err(|e| LivestatusError::Tls(format!("failed to read key file: {e}")))?;
            let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                .map_err(|e| LivestatusError::Tls(format!("failed to parse key file: {e}")))?
                .ok_or_else(|| {
                    LivestatusError::Tls("no private key found in key file".to_string())
                })?;
            builder.with_client_auth_cert(certs, key).map_err(|e| {
                LivestatusError::Tls(format!("failed to load client certificate: {e}"))
            })?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(client_config)))
}

/// Accepts any server certificate. Only reachable through
/// `insecure_skip_verify`; signatures are still checked so a garbled
/// handshake fails loudly rather than silently.
#[derive(Debug)]
struct NoVerification {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for NoVerification {
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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
