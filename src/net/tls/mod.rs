//! TLS transport for the tunneled-in-PRELOGIN handshake (§4.1).
//!
//! [`MaybeTlsStream`] is the Channel's actual byte stream: it starts `Raw`, and `upgrade()`
//! rewires it to `Tls` once the PRELOGIN-tunneled handshake (`connection::tls_prelogin_wrapper`)
//! completes. `downgrade()` exists for the "encryption was only for login" case (§4.1,
//! `disable_ssl`): it must not perform a bidirectional TLS close handshake, so it simply
//! extracts the inner stream and throws the `rustls` session away.

use std::io;
use std::mem::replace;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Error;

#[cfg(feature = "rustls")]
mod rustls_backend;
#[cfg(feature = "rustls")]
use rustls_backend::configure_tls_connector;

#[cfg(all(feature = "native-tls", not(feature = "rustls")))]
mod native_tls_backend;
#[cfg(all(feature = "native-tls", not(feature = "rustls")))]
use native_tls_backend::configure_tls_connector;

/// X.509 certificate input, either a file path or an inline PEM blob.
#[derive(Clone, Debug)]
pub enum CertificateInput {
    Inline(Vec<u8>),
    File(PathBuf),
}

impl From<String> for CertificateInput {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        // Heuristic from RFC 7468: an inline PEM blob carries its own armor.
        if trimmed.starts_with("-----BEGIN CERTIFICATE-----")
            && trimmed.contains("-----END CERTIFICATE-----")
        {
            CertificateInput::Inline(value.into_bytes())
        } else {
            CertificateInput::File(PathBuf::from(value))
        }
    }
}

impl CertificateInput {
    pub(crate) async fn data(&self) -> Result<Vec<u8>, Error> {
        match self {
            CertificateInput::Inline(v) => Ok(v.clone()),
            CertificateInput::File(path) => tokio::fs::read(path).await.map_err(|e| {
                Error::configuration(format!(
                    "failed to read certificate file '{}': {}",
                    path.display(),
                    e
                ))
            }),
        }
    }
}

impl std::fmt::Display for CertificateInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CertificateInput::Inline(v) => write!(f, "{}", String::from_utf8_lossy(v)),
            CertificateInput::File(path) => write!(f, "file: {}", path.display()),
        }
    }
}

/// Certificate-validation policy for one `enable_ssl` call (§4.1's four validation modes).
pub(crate) struct TlsConfig<'a> {
    pub accept_invalid_certs: bool,
    pub accept_invalid_hostnames: bool,
    /// The name used for the handshake's SNI and for the driver's own DN/SAN hostname check.
    pub hostname: &'a str,
    /// `hostNameInCertificate` override: when set, matched against the cert instead of
    /// `hostname`.
    pub host_name_in_certificate: Option<&'a str>,
    pub root_cert_path: Option<&'a CertificateInput>,
    pub client_cert_path: Option<&'a CertificateInput>,
    pub client_key_path: Option<&'a CertificateInput>,
}

pub(crate) enum MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Raw(S),
    #[cfg(feature = "rustls")]
    Tls(tokio_rustls::client::TlsStream<S>),
    #[cfg(all(feature = "native-tls", not(feature = "rustls")))]
    Tls(tokio_native_tls::TlsStream<S>),
    Upgrading,
}

impl<S> MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[inline]
    pub(crate) fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub(crate) async fn upgrade(&mut self, config: TlsConfig<'_>) -> Result<(), Error> {
        let host = config.hostname.to_owned();
        let connector = configure_tls_connector(config).await?;

        let stream = match replace(self, MaybeTlsStream::Upgrading) {
            MaybeTlsStream::Raw(stream) => stream,
            MaybeTlsStream::Tls(_) => return Ok(()), // already upgraded
            MaybeTlsStream::Upgrading => {
                return Err(Error::Io(io::ErrorKind::ConnectionAborted.into()));
            }
        };

        #[cfg(feature = "rustls")]
        {
            let server_name = rustls::pki_types::ServerName::try_from(host)
                .map_err(|e| Error::tls(crate::error::TlsFailureKind::HandshakeNotStarted, e))?;
            let tls_stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| classify_handshake_io_error(e))?;
            *self = MaybeTlsStream::Tls(tls_stream);
        }

        #[cfg(all(feature = "native-tls", not(feature = "rustls")))]
        {
            let tls_stream = connector
                .connect(&host, stream)
                .await
                .map_err(|e| Error::tls(crate::error::TlsFailureKind::HandshakeNotStarted, e))?;
            *self = MaybeTlsStream::Tls(tls_stream);
        }

        Ok(())
    }

    /// Reverts to a raw stream without running TLS's bidirectional close_notify exchange —
    /// the server does not expect one when encryption only ever covered the login packet.
    pub(crate) fn downgrade(&mut self) -> Result<(), Error> {
        match replace(self, MaybeTlsStream::Upgrading) {
            MaybeTlsStream::Tls(stream) => {
                #[cfg(feature = "rustls")]
                {
                    let (raw, _client_conn) = stream.into_inner();
                    *self = MaybeTlsStream::Raw(raw);
                    Ok(())
                }
                #[cfg(all(feature = "native-tls", not(feature = "rustls")))]
                {
                    let _ = stream;
                    Err(Error::configuration(
                        "no way to downgrade a native-tls stream; use the rustls backend or never disable encryption",
                    ))
                }
            }
            MaybeTlsStream::Raw(stream) => {
                *self = MaybeTlsStream::Raw(stream);
                Ok(())
            }
            MaybeTlsStream::Upgrading => Err(Error::Io(io::ErrorKind::ConnectionAborted.into())),
        }
    }
}

#[cfg(feature = "rustls")]
fn classify_handshake_io_error(e: io::Error) -> Error {
    use crate::error::TlsFailureKind;
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::tls(TlsFailureKind::TruncatedResponse, e),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            Error::tls(TlsFailureKind::HandshakeStarted, e)
        }
        _ => Error::tls(TlsFailureKind::HandshakeNotStarted, e),
    }
}

impl<S> AsyncRead for MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Upgrading => Poll::Ready(Err(io::ErrorKind::ConnectionAborted.into())),
        }
    }
}

impl<S> AsyncWrite for MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Upgrading => Poll::Ready(Err(io::ErrorKind::ConnectionAborted.into())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Upgrading => Poll::Ready(Err(io::ErrorKind::ConnectionAborted.into())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Upgrading => Poll::Ready(Err(io::ErrorKind::ConnectionAborted.into())),
        }
    }
}

impl<S> Deref for MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Target = S;

    fn deref(&self) -> &Self::Target {
        match self {
            MaybeTlsStream::Raw(s) => s,
            #[cfg(feature = "rustls")]
            MaybeTlsStream::Tls(s) => s.get_ref().0,
            #[cfg(all(feature = "native-tls", not(feature = "rustls")))]
            MaybeTlsStream::Tls(s) => s.get_ref().get_ref().get_ref(),
            MaybeTlsStream::Upgrading => {
                panic!("{}", io::Error::from(io::ErrorKind::ConnectionAborted))
            }
        }
    }
}

impl<S> DerefMut for MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            MaybeTlsStream::Raw(s) => s,
            #[cfg(feature = "rustls")]
            MaybeTlsStream::Tls(s) => s.get_mut().0,
            #[cfg(all(feature = "native-tls", not(feature = "rustls")))]
            MaybeTlsStream::Tls(s) => s.get_mut().get_mut().get_mut(),
            MaybeTlsStream::Upgrading => {
                panic!("{}", io::Error::from(io::ErrorKind::ConnectionAborted))
            }
        }
    }
}
