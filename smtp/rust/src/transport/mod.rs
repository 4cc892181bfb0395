//! Byte transport for SMTP sessions.
//!
//! [`SmtpTransport`] is a line-oriented command/reply channel that can be
//! upgraded to TLS in place. [`Connector`] opens transports; the TCP
//! connector performs the implicit-TLS handshake before handing the stream
//! over, so the greeting is always read by the session.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{SmtpConfig, TlsConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{SmtpCommand, SmtpResponse};

/// Longest reply line accepted before the server is considered broken.
const MAX_LINE_LENGTH: usize = 4096;

/// Command/reply channel to an SMTP server.
#[async_trait]
pub trait SmtpTransport: Send + fmt::Debug {
    /// Reads one (possibly multiline) reply.
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse>;

    /// Sends a command and reads its reply.
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse>;

    /// Writes a dot-stuffed message body and reads the final reply.
    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<SmtpResponse>;

    /// Upgrades the channel to TLS after a successful STARTTLS reply.
    async fn upgrade_tls(&mut self, config: &TlsConfig, server_name: &str) -> SmtpResult<()>;

    /// Returns true once TLS is active.
    fn is_tls(&self) -> bool;

    /// Sends QUIT and drops the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Opens transports for a configuration.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects, performing implicit TLS when the configuration asks for it.
    async fn connect(&self, config: &SmtpConfig) -> SmtpResult<Box<dyn SmtpTransport>>;
}

/// Connector for real servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &SmtpConfig) -> SmtpResult<Box<dyn SmtpTransport>> {
        let mut transport = TcpTransport::connect(config).await?;
        if config.tls_mode() == TlsMode::Implicit {
            transport.upgrade_tls(&config.tls, config.server_name()).await?;
        }
        Ok(Box::new(transport))
    }
}

trait BufStream: AsyncBufRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncBufRead + AsyncWrite + Unpin + Send> BufStream for T {}

enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
    /// Placeholder while the socket is handed to the TLS handshake.
    Detached,
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    stream: TransportStream,
    command_timeout: Duration,
    host: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls", &self.is_tls())
            .finish()
    }
}

impl TcpTransport {
    /// Opens the TCP connection.
    pub async fn connect(config: &SmtpConfig) -> SmtpResult<Self> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                SmtpError::timeout(
                    SmtpErrorKind::ConnectionTimeout,
                    format!("Connecting to {} timed out after {:?}", address, config.connect_timeout),
                )
            })?
            .map_err(|e| SmtpError::from_io(e, &format!("Connecting to {}", address)))?;

        stream.set_nodelay(true).ok();

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %address, "SMTP TCP connection established");

        Ok(Self {
            stream: TransportStream::Plain(BufReader::new(stream)),
            command_timeout: config.command_timeout,
            host: config.host.clone(),
        })
    }

    fn stream(&mut self) -> SmtpResult<&mut dyn BufStream> {
        match &mut self.stream {
            TransportStream::Plain(s) => Ok(s),
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(s) => Ok(s.as_mut()),
            TransportStream::Detached => Err(SmtpError::new(
                SmtpErrorKind::ConnectionUnhealthy,
                "Connection lost during TLS negotiation",
            )),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> SmtpResult<()> {
        let limit = self.command_timeout;
        let stream = self.stream()?;

        timeout(limit, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| SmtpError::timeout(SmtpErrorKind::WriteTimeout, "Write timed out"))?
        .map_err(|e| SmtpError::from_io(e, "Write failed"))
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let limit = self.command_timeout;
        let stream = self.stream()?;
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            let read = timeout(limit, stream.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::timeout(SmtpErrorKind::ReadTimeout, "Read timed out"))?
                .map_err(|e| SmtpError::from_io(e, "Read failed"))?;

            if read == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }
            if line.len() > MAX_LINE_LENGTH {
                return Err(SmtpError::protocol("Reply line too long"));
            }

            let line = line.trim_end().to_string();
            let last = SmtpResponse::is_final_line(&line);
            lines.push(line);
            if last {
                break;
            }
        }

        let response = SmtpResponse::parse(&lines)?;

        #[cfg(feature = "tracing")]
        tracing::trace!(code = response.code, message = %response.first_message(), "SMTP reply");

        Ok(response)
    }

    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        #[cfg(feature = "tracing")]
        tracing::trace!(command = %command, "SMTP command");

        let line = format!("{}\r\n", command.to_smtp_string());
        self.write_all(line.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<SmtpResponse> {
        self.write_all(data).await?;
        self.read_response().await
    }

    #[cfg(feature = "rustls-tls")]
    async fn upgrade_tls(&mut self, config: &TlsConfig, server_name: &str) -> SmtpResult<()> {
        use rustls::pki_types::ServerName;

        if self.is_tls() {
            return Ok(());
        }

        let connector = tls::connector(config)?;
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", server_name)))?;

        let tcp = match std::mem::replace(&mut self.stream, TransportStream::Detached) {
            TransportStream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(SmtpError::tls("Connection is not in plaintext mode"));
            }
        };

        let tls_stream = timeout(self.command_timeout, connector.connect(name, tcp))
            .await
            .map_err(|_| SmtpError::tls("TLS handshake timed out"))?
            .map_err(|e| SmtpError::tls(format!("TLS handshake with {} failed: {}", self.host, e)))?;

        self.stream = TransportStream::Tls(Box::new(BufReader::new(tls_stream)));

        #[cfg(feature = "tracing")]
        tracing::debug!(host = %self.host, "TLS established");

        Ok(())
    }

    #[cfg(not(feature = "rustls-tls"))]
    async fn upgrade_tls(&mut self, _config: &TlsConfig, _server_name: &str) -> SmtpResult<()> {
        Err(SmtpError::configuration("Built without TLS support"))
    }

    fn is_tls(&self) -> bool {
        match self.stream {
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(_) => true,
            _ => false,
        }
    }

    async fn close(&mut self) {
        if !matches!(self.stream, TransportStream::Detached) {
            let _ = self.send_command(&SmtpCommand::Quit).await;
            self.stream = TransportStream::Detached;
        }
    }
}

#[cfg(feature = "rustls-tls")]
mod tls {
    use std::sync::Arc;

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
    use tokio_rustls::TlsConnector;

    use crate::config::{TlsConfig, TlsVersion};
    use crate::errors::SmtpResult;

    /// Skips chain and name checks but still verifies handshake signatures.
    #[derive(Debug)]
    struct AcceptAnyCertificate(CryptoProvider);

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
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    fn versions(min: TlsVersion) -> &'static [&'static rustls::SupportedProtocolVersion] {
        static ALL: &[&rustls::SupportedProtocolVersion] =
            &[&rustls::version::TLS13, &rustls::version::TLS12];
        static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

        match min {
            TlsVersion::Tls12 => ALL,
            TlsVersion::Tls13 => TLS13_ONLY,
        }
    }

    pub(super) fn connector(config: &TlsConfig) -> SmtpResult<TlsConnector> {
        let builder = ClientConfig::builder_with_protocol_versions(versions(config.min_version));

        let client_config = if config.accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(
                    rustls::crypto::ring::default_provider(),
                )))
                .with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        };

        Ok(TlsConnector::from(Arc::new(client_config)))
    }

}
