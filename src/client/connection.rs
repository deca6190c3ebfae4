//! Session establishment for the NNTP connection
//!
//! This module handles TCP/TLS setup, socket tuning, the server greeting,
//! AUTHINFO and re-selecting the last group after a reconnect.

use crate::commands;
use crate::error::{NntpError, Result};
use crate::response::codes;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{Instrument, debug, warn};

use super::state::ConnectionState;
use super::{NntpConnection, Transport};

/// BufReader capacity; responses are short single lines
const BUFREADER_CAPACITY: usize = 16 * 1024;

/// Send buffer for article uploads (1MB)
const SEND_BUFFER_SIZE: usize = 1024 * 1024;

/// Idle time before the first keep-alive packet is sent
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Dangerous certificate verifier that accepts all certificates
///
/// **Security Warning:** This verifier disables all certificate validation,
/// making connections vulnerable to man-in-the-middle attacks. Only use this
/// for testing or with servers you trust on a secure network.
#[derive(Debug)]
pub(super) struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

/// Build the rustls client configuration
fn tls_config(allow_insecure: bool) -> ClientConfig {
    use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
    let _ = CryptoProvider::install_default(ring::default_provider());

    if allow_insecure {
        warn!("TLS certificate validation disabled - connection vulnerable to MITM attacks");
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    }
}

/// Open a tuned TCP socket to `addr`
async fn open_tcp(addr: SocketAddr, keep_alive: bool) -> Result<TcpStream> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Small command lines must not wait for Nagle
    socket.set_nodelay(true)?;

    if let Err(e) = socket.set_send_buffer_size(SEND_BUFFER_SIZE) {
        warn!(
            "Failed to set send buffer size to {} bytes: {}",
            SEND_BUFFER_SIZE, e
        );
    }

    if keep_alive {
        let params = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
        if let Err(e) = socket.set_tcp_keepalive(&params) {
            warn!("Failed to enable TCP keep-alive: {}", e);
        }
    }

    // socket2::Socket::connect() is blocking; connect before switching to non-blocking
    let std_stream = tokio::task::spawn_blocking(move || -> std::io::Result<std::net::TcpStream> {
        socket.connect(&addr.into())?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    })
    .await
    .map_err(|e| NntpError::ConnectFail(format!("connect task failed: {}", e)))?
    .map_err(|e| NntpError::ConnectFail(e.to_string()))?;

    Ok(TcpStream::from_std(std_stream)?)
}

impl NntpConnection {
    /// Open a session explicitly
    ///
    /// Requests connect on demand, so calling this is optional. Fails with
    /// [`NntpError::UnexpectedConnect`] if a session is already open or
    /// opening; the existing session is left alone.
    ///
    /// # Errors
    ///
    /// - [`NntpError::ConnectTimeout`] - the handshake did not finish within `connect_timeout`
    /// - [`NntpError::ConnectFail`] - transport failure or a busy greeting (400/502)
    /// - [`NntpError::BadResponse`] - unexpected greeting or rejected credentials
    pub async fn connect(&mut self) -> Result<()> {
        if self.state.is_active() {
            return Err(NntpError::UnexpectedConnect);
        }
        let span = self.span.clone();
        self.ensure_connected().instrument(span).await
    }

    /// Make sure a session is open, reconnecting up to `connect_retries` times
    pub(super) async fn ensure_connected(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected && self.stream.is_some() {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            match self.open().await {
                Ok(()) => {
                    self.stats.connects += 1;
                    return Ok(());
                }
                Err(e) => {
                    self.teardown();
                    self.stats.errors += 1;
                    if !e.is_transient() || attempt >= self.config.connect_retries {
                        warn!(
                            "Connecting to {}:{} failed: {}",
                            self.config.host, self.config.port, e
                        );
                        return Err(e);
                    }
                    attempt += 1;
                    warn!(
                        "Connecting to {}:{} failed ({}), retrying in {:?} ({}/{})",
                        self.config.host,
                        self.config.port,
                        e,
                        self.config.reconnect_delay,
                        attempt,
                        self.config.connect_retries
                    );
                    self.backoff().await;
                }
            }
        }
    }

    /// Sleep `reconnect_delay` in the `Waiting` state
    pub(super) async fn backoff(&mut self) {
        self.state = ConnectionState::Waiting;
        tokio::time::sleep(self.config.reconnect_delay).await;
        self.state = ConnectionState::Disconnected;
    }

    /// One connect attempt bounded by `connect_timeout`
    async fn open(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let limit = self.config.connect_timeout;
        timeout(limit, self.handshake())
            .await
            .map_err(|_| NntpError::ConnectTimeout)?
    }

    async fn handshake(&mut self) -> Result<()> {
        debug!(
            "Connecting to NNTP server {}:{}",
            self.config.host, self.config.port
        );

        let addr = tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| NntpError::ConnectFail(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| NntpError::ConnectFail("No address resolved".to_string()))?;

        let tcp = open_tcp(addr, self.config.keep_alive).await?;

        let transport: Box<dyn Transport> = if self.config.tls {
            let connector = TlsConnector::from(Arc::new(tls_config(
                self.config.allow_insecure_tls,
            )));
            let server_name = ServerName::try_from(self.config.host.as_str())
                .map_err(|e| NntpError::Tls(format!("Invalid domain: {}", e)))?
                .to_owned();
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| NntpError::Tls(format!("TLS handshake failed: {}", e)))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };
        self.stream = Some(BufReader::with_capacity(BUFREADER_CAPACITY, transport));

        let request_timeout = self.config.request_timeout;
        let greeting = self.read_response(request_timeout).await?;
        debug!("Server greeting: {} {}", greeting.code, greeting.message);
        match greeting.code {
            codes::READY_POSTING_ALLOWED => self.posting_allowed = true,
            codes::READY_NO_POSTING => self.posting_allowed = false,
            codes::SERVICE_UNAVAILABLE | codes::SERVICE_PERMANENTLY_UNAVAILABLE => {
                return Err(NntpError::ConnectFail(format!(
                    "{} {}",
                    greeting.code, greeting.message
                )));
            }
            _ => {
                return Err(NntpError::BadResponse {
                    code: greeting.code,
                    message: greeting.message,
                });
            }
        }

        if let Some(username) = self.config.username.clone() {
            self.state = ConnectionState::Authenticating;
            self.authenticate(&username).await?;
        }

        if let Some(group) = self.current_group.clone() {
            self.send_command(&commands::group(&group)).await?;
            let response = self.read_response(request_timeout).await?;
            match response.code {
                codes::GROUP_SELECTED => debug!("Re-selected group {}", group),
                codes::NO_SUCH_GROUP => warn!("Group {} no longer exists", group),
                _ => {
                    return Err(NntpError::BadResponse {
                        code: response.code,
                        message: response.message,
                    });
                }
            }
        }

        self.state = ConnectionState::Connected;
        debug!("Connected to {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    /// AUTHINFO USER/PASS (RFC 4643)
    async fn authenticate(&mut self, username: &str) -> Result<()> {
        let request_timeout = self.config.request_timeout;

        self.send_command(&commands::authinfo_user(username)).await?;
        let response = self.read_response(request_timeout).await?;
        match response.code {
            // Some servers accept the user without a password
            codes::AUTH_ACCEPTED => return Ok(()),
            codes::AUTH_CONTINUE => {}
            _ => {
                return Err(NntpError::BadResponse {
                    code: response.code,
                    message: response.message,
                });
            }
        }

        let password = self.config.password.clone();
        self.send_command(&commands::authinfo_pass(&password)).await?;
        let response = self.read_response(request_timeout).await?;
        if response.code != codes::AUTH_ACCEPTED {
            return Err(NntpError::BadResponse {
                code: response.code,
                message: response.message,
            });
        }
        debug!("Authenticated as {}", username);
        Ok(())
    }
}
