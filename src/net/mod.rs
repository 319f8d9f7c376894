//! The Channel (§4.1): owns the TCP/TLS byte stream.

mod socket;
mod tls;

pub(crate) use socket::{resolve_and_connect, SocketOpenOptions};
pub use tls::CertificateInput;
pub(crate) use tls::{MaybeTlsStream, TlsConfig};
