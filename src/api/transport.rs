//! Purpose: Carry one request/response exchange to the broker over TCP or TLS.
//! Exports: `Transport`, `Connection`, `Endpoint`, `TcpTransport`, `TcpConnection`.
//! Role: Capability boundary consumed by the client; tests substitute their own.
//! Invariants: One connection per call; nothing is pooled or reused.
//! Invariants: `timeout` bounds connect and every blocking read/write step.
//! Invariants: TLS is negotiated only when the endpoint asks for it.
#![allow(clippy::result_large_err)]

use super::Config;
use crate::core::error::{Error, ErrorKind};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, Error as TlsError, RootCertStore,
    SignatureScheme, StreamOwned,
};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Copy, Debug)]
pub struct Endpoint<'a> {
    pub host: &'a str,
    pub port: u16,
    pub tls: bool,
    pub timeout: Duration,
}

pub trait Transport {
    type Connection: Connection;

    fn open(&self, endpoint: &Endpoint<'_>) -> ApiResult<Self::Connection>;
}

pub trait Connection {
    fn write_all(&mut self, bytes: &[u8]) -> ApiResult<()>;

    /// Signals that no more data follows so the broker can answer.
    fn half_close_write(&mut self) -> ApiResult<()>;

    /// Reads until the broker closes the stream.
    fn read_all(&mut self) -> ApiResult<Vec<u8>>;

    fn close(self) -> ApiResult<()>;
}

#[derive(Clone, Default)]
pub struct TcpTransport {
    tls: Option<Arc<ClientConfig>>,
}

impl TcpTransport {
    /// Plain transport; TLS endpoints fall back to the bundled web PKI roots.
    pub fn new() -> Self {
        Self { tls: None }
    }

    pub fn from_config(config: &Config) -> ApiResult<Self> {
        if !config.uses_tls() {
            return Ok(Self::new());
        }
        let tls = if config.tls_skip_verify {
            skip_verify_tls_config()
        } else {
            let roots = match &config.tls_ca_file {
                Some(path) => load_ca_file(path)?,
                None => web_pki_roots(),
            };
            verified_tls_config(roots)
        };
        Ok(Self { tls: Some(tls) })
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;

    fn open(&self, endpoint: &Endpoint<'_>) -> ApiResult<TcpConnection> {
        let sock = connect(endpoint)?;
        let stream = if endpoint.tls {
            let tls = self
                .tls
                .clone()
                .unwrap_or_else(|| verified_tls_config(web_pki_roots()));
            let server_name = ServerName::try_from(endpoint.host.to_string()).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("broker host is not a valid TLS server name")
                    .with_endpoint(endpoint.host, endpoint.port)
                    .with_source(err)
            })?;
            let conn = ClientConnection::new(tls, server_name).map_err(|err| {
                Error::new(ErrorKind::Connect)
                    .with_message("failed to start TLS session")
                    .with_endpoint(endpoint.host, endpoint.port)
                    .with_source(err)
            })?;
            tracing::debug!(host = endpoint.host, port = endpoint.port, "starting TLS session");
            Stream::Tls(Box::new(StreamOwned::new(conn, sock)))
        } else {
            Stream::Plain(sock)
        };
        Ok(TcpConnection {
            stream,
            host: endpoint.host.to_string(),
            port: endpoint.port,
        })
    }
}

pub struct TcpConnection {
    stream: Stream,
    host: String,
    port: u16,
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl TcpConnection {
    fn io_error(&self, message: &str, err: io::Error) -> Error {
        Error::new(ErrorKind::Io)
            .with_message(message)
            .with_endpoint(&self.host, self.port)
            .with_source(err)
    }

    fn socket(&self) -> &TcpStream {
        match &self.stream {
            Stream::Plain(sock) => sock,
            Stream::Tls(tls) => &tls.sock,
        }
    }
}

impl Connection for TcpConnection {
    fn write_all(&mut self, bytes: &[u8]) -> ApiResult<()> {
        let result = match &mut self.stream {
            Stream::Plain(sock) => sock.write_all(bytes).and_then(|()| sock.flush()),
            Stream::Tls(tls) => tls.write_all(bytes).and_then(|()| tls.flush()),
        };
        result.map_err(|err| self.io_error("failed to write request", err))
    }

    fn half_close_write(&mut self) -> ApiResult<()> {
        let result = match &mut self.stream {
            Stream::Plain(sock) => sock.shutdown(Shutdown::Write),
            Stream::Tls(tls) => {
                tls.conn.send_close_notify();
                tls.flush().and_then(|()| tls.sock.shutdown(Shutdown::Write))
            }
        };
        result.map_err(|err| self.io_error("failed to shut down write side", err))
    }

    fn read_all(&mut self) -> ApiResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match &mut self.stream {
            Stream::Plain(sock) => sock.read_to_end(&mut out),
            Stream::Tls(tls) => match tls.read_to_end(&mut out) {
                // Brokers commonly close without close_notify.
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(out.len()),
                other => other,
            },
        };
        result.map_err(|err| self.io_error("failed to read response", err))?;
        Ok(out)
    }

    fn close(self) -> ApiResult<()> {
        match self.socket().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(self.io_error("failed to close connection", err)),
        }
    }
}

fn connect(endpoint: &Endpoint<'_>) -> ApiResult<TcpStream> {
    let addrs = (endpoint.host, endpoint.port)
        .to_socket_addrs()
        .map_err(|err| {
            Error::new(ErrorKind::Connect)
                .with_message("failed to resolve broker address")
                .with_endpoint(endpoint.host, endpoint.port)
                .with_source(err)
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, endpoint.timeout) {
            Ok(sock) => {
                configure_socket(&sock, endpoint.timeout).map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to configure socket timeouts")
                        .with_endpoint(endpoint.host, endpoint.port)
                        .with_source(err)
                })?;
                return Ok(sock);
            }
            Err(err) => last_err = Some(err),
        }
    }

    let err = Error::new(ErrorKind::Connect)
        .with_message("failed to connect to broker")
        .with_endpoint(endpoint.host, endpoint.port);
    Err(match last_err {
        Some(source) => err.with_source(source),
        None => err.with_message("broker address resolved to nothing"),
    })
}

fn configure_socket(sock: &TcpStream, timeout: Duration) -> io::Result<()> {
    sock.set_read_timeout(Some(timeout))?;
    sock.set_write_timeout(Some(timeout))?;
    sock.set_nodelay(true)
}

fn web_pki_roots() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

fn load_ca_file(path: &Path) -> ApiResult<RootCertStore> {
    let cert_bytes = std::fs::read(path).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!(
                "failed to read TLS CA file {}",
                path.display()
            ))
            .with_source(err)
    })?;
    let mut cert_reader = io::Cursor::new(cert_bytes);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("failed to parse TLS CA file {}", path.display()))
                .with_source(err)
        })?;
    if certs.is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "TLS CA file {} contains no certificates",
            path.display()
        )));
    }

    let mut roots = RootCertStore::empty();
    let (added, _) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message(format!(
            "TLS CA file {} contains no parsable certificates",
            path.display()
        )));
    }
    Ok(roots)
}

fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn verified_tls_config(roots: RootCertStore) -> Arc<ClientConfig> {
    install_crypto_provider();
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

fn skip_verify_tls_config() -> Arc<ClientConfig> {
    install_crypto_provider();
    Arc::new(
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth(),
    )
}

/// Trusts whatever certificate the broker presents. Only installed when
/// `Config::tls_skip_verify` is set on a port-443 endpoint, for brokers behind
/// self-signed certificates.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
