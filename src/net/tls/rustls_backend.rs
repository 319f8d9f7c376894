//! `rustls`-backed connector, plus the driver's own certificate-subject matcher.
//!
//! `rustls`'s built-in hostname check only ever compares against the `ServerName` used for the
//! handshake. When `hostNameInCertificate` overrides the expected name, the standard check is
//! disabled (same trick as `NoHostnameTlsVerifier` below) and replaced by a manual DN/SAN
//! comparison against the override, per §4.1's canonical-DN-parsing algorithm.

use std::io::{BufReader, Cursor};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, KeyLogFile,
    RootCertStore, SignatureScheme,
};

use crate::error::Error;

use super::TlsConfig;

pub(crate) async fn configure_tls_connector(
    tls_config: TlsConfig<'_>,
) -> Result<tokio_rustls::TlsConnector, Error> {
    let builder = ClientConfig::builder();

    let builder = if tls_config.accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DummyTlsVerifier))
    } else {
        let mut cert_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect(),
        };

        if let Some(ca) = tls_config.root_cert_path {
            let data = ca.data().await?;
            let mut cursor = Cursor::new(data);
            for cert in rustls_pemfile::certs(&mut cursor) {
                let cert = cert.map_err(|e| Error::configuration(e.to_string()))?;
                cert_store
                    .add(cert)
                    .map_err(|e| Error::configuration(e.to_string()))?;
            }
        }

        if tls_config.host_name_in_certificate.is_some() || tls_config.accept_invalid_hostnames {
            let webpki_verifier = WebPkiServerVerifier::builder(Arc::new(cert_store))
                .build()
                .map_err(|e| Error::configuration(e.to_string()))?;

            if let Some(expected) = tls_config.host_name_in_certificate {
                builder.dangerous().with_custom_certificate_verifier(Arc::new(
                    HostnameInCertVerifier {
                        verifier: webpki_verifier,
                        expected: expected.to_owned(),
                    },
                ))
            } else {
                builder.dangerous().with_custom_certificate_verifier(Arc::new(
                    NoHostnameTlsVerifier {
                        verifier: webpki_verifier,
                    },
                ))
            }
        } else {
            builder.with_root_certificates(cert_store)
        }
    };

    let mut config = match (tls_config.client_cert_path, tls_config.client_key_path) {
        (Some(cert_path), Some(key_path)) => {
            let cert_chain = certs_from_pem(cert_path.data().await?)?;
            let key_der = private_key_from_pem(key_path.data().await?)?;
            builder
                .with_client_auth_cert(cert_chain, key_der)
                .map_err(|e| Error::configuration(e.to_string()))?
        }
        (None, None) => builder.with_no_client_auth(),
        (_, _) => {
            return Err(Error::configuration(
                "client certificate and key must be supplied together",
            ))
        }
    };

    // When SSLKEYLOGFILE is set, dump the session keys so a capture can be decrypted in
    // Wireshark.
    config.key_log = Arc::new(KeyLogFile::new());

    Ok(Arc::new(config).into())
}

fn certs_from_pem(pem: Vec<u8>) -> Result<Vec<CertificateDer<'static>>, Error> {
    let cur = Cursor::new(pem);
    let mut reader = BufReader::new(cur);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::configuration(e.to_string()))
}

fn private_key_from_pem(pem: Vec<u8>) -> Result<PrivateKeyDer<'static>, Error> {
    let cur = Cursor::new(pem);
    let mut reader = BufReader::new(cur);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| Error::configuration(e.to_string()))?
        {
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            None => break,
            _ => {}
        }
    }

    Err(Error::configuration(
        "no private key found in the supplied PEM file",
    ))
}

/// Accepts any certificate chain outright — `trustServerCertificate=true`.
#[derive(Debug)]
struct DummyTlsVerifier;

impl ServerCertVerifier for DummyTlsVerifier {
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
        default_verify_schemes()
    }
}

/// Validates the chain but skips `rustls`'s own hostname check — `trustServerCertificate=false`
/// with `accept_invalid_hostnames` (no `hostNameInCertificate` override given).
#[derive(Debug)]
struct NoHostnameTlsVerifier {
    verifier: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for NoHostnameTlsVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        remove_hostname_error(
            self.verifier
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now),
            ServerCertVerified::assertion(),
        )
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.verifier.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.verifier.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.verifier.supported_verify_schemes()
    }
}

/// Validates the chain, skips `rustls`'s hostname check, and substitutes the driver's own
/// canonical-DN/SAN comparison against a `hostNameInCertificate` override.
#[derive(Debug)]
struct HostnameInCertVerifier {
    verifier: Arc<WebPkiServerVerifier>,
    expected: String,
}

impl ServerCertVerifier for HostnameInCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let verified = remove_hostname_error(
            self.verifier
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now),
            ServerCertVerified::assertion(),
        )?;

        let (cn, sans) = extract_cn_and_sans(end_entity);
        if hostname_matches(cn.as_deref(), &sans, &self.expected) {
            Ok(verified)
        } else {
            Err(TlsError::InvalidCertificate(CertificateError::NotValidForName))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.verifier.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.verifier.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.verifier.supported_verify_schemes()
    }
}

fn remove_hostname_error<O>(r: Result<O, TlsError>, ok: O) -> Result<O, TlsError> {
    match r {
        Err(TlsError::InvalidCertificate(CertificateError::NotValidForName)) => Ok(ok),
        res => res,
    }
}

fn default_verify_schemes() -> Vec<SignatureScheme> {
    vec![
        SignatureScheme::RSA_PKCS1_SHA1,
        SignatureScheme::ECDSA_SHA1_Legacy,
        SignatureScheme::RSA_PKCS1_SHA256,
        SignatureScheme::ECDSA_NISTP256_SHA256,
        SignatureScheme::RSA_PKCS1_SHA384,
        SignatureScheme::ECDSA_NISTP384_SHA384,
        SignatureScheme::RSA_PKCS1_SHA512,
        SignatureScheme::ECDSA_NISTP521_SHA512,
        SignatureScheme::RSA_PSS_SHA256,
        SignatureScheme::RSA_PSS_SHA384,
        SignatureScheme::RSA_PSS_SHA512,
        SignatureScheme::ED25519,
        SignatureScheme::ED448,
    ]
}

/// Pulls the leaf's subject common name and SAN DNS entries out of the DER, for
/// [`hostname_matches`]. Returns `(None, vec![])` on a certificate whose subject can't be
/// parsed rather than failing the handshake outright — the caller falls through to a
/// "does not match" result either way.
fn extract_cn_and_sans(cert: &CertificateDer<'_>) -> (Option<String>, Vec<String>) {
    let Ok((_, parsed)) = x509_parser::parse_x509_certificate(cert.as_ref()) else {
        return (None, Vec::new());
    };

    let cn = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(|s| s.to_owned());

    let mut sans = Vec::new();
    for ext in parsed.extensions() {
        if let x509_parser::extensions::ParsedExtension::SubjectAlternativeName(san) =
            ext.parsed_extension()
        {
            for name in &san.general_names {
                if let x509_parser::extensions::GeneralName::DNSName(dns) = name {
                    sans.push((*dns).to_owned());
                }
            }
        }
    }

    (cn, sans)
}

/// Canonical-DN hostname match (§4.1): the RFC-2253 `cn=` component, lowercased and unquoted,
/// compared to the expected name; on mismatch, fall back to a case-insensitive walk of the
/// certificate's SAN DNS entries.
pub(crate) fn hostname_matches(cn: Option<&str>, sans: &[String], expected: &str) -> bool {
    let expected = expected.trim().trim_end_matches('.').to_ascii_lowercase();

    if let Some(cn) = cn {
        let cn = cn.trim().trim_matches('"').to_ascii_lowercase();
        if cn == expected {
            return true;
        }
    }

    sans.iter()
        .any(|san| san.trim().trim_end_matches('.').to_ascii_lowercase() == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_on_common_name() {
        assert!(hostname_matches(Some("db.example.com"), &[], "db.example.com"));
    }

    #[test]
    fn matches_common_name_case_insensitively_and_unquoted() {
        assert!(hostname_matches(
            Some("\"DB.Example.COM\""),
            &[],
            "db.example.com"
        ));
    }

    #[test]
    fn falls_back_to_subject_alternative_names() {
        let sans = vec!["other.example.com".to_owned(), "db.example.com".to_owned()];
        assert!(hostname_matches(Some("not-db.example.com"), &sans, "db.example.com"));
    }

    #[test]
    fn rejects_when_neither_cn_nor_san_match() {
        let sans = vec!["other.example.com".to_owned()];
        assert!(!hostname_matches(Some("not-db.example.com"), &sans, "db.example.com"));
    }

    #[test]
    fn trailing_dot_is_ignored() {
        assert!(hostname_matches(Some("db.example.com."), &[], "db.example.com"));
    }
}
