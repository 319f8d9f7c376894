//! `native-tls`-backed connector. Kept as an alternate backend for platforms that prefer the
//! system TLS library; it has no hook for a custom certificate verifier, so a
//! `hostNameInCertificate` override — which needs one — is rejected up front rather than
//! silently ignored.

use native_tls::{Certificate, Identity, TlsConnector};

use crate::error::Error;

use super::TlsConfig;

pub(crate) async fn configure_tls_connector(
    tls_config: TlsConfig<'_>,
) -> Result<tokio_native_tls::TlsConnector, Error> {
    if tls_config.host_name_in_certificate.is_some() {
        return Err(Error::UnsupportedConfig(
            "hostNameInCertificate overrides require the rustls TLS backend".into(),
        ));
    }

    let mut builder = TlsConnector::builder();
    builder
        .danger_accept_invalid_certs(tls_config.accept_invalid_certs)
        .danger_accept_invalid_hostnames(tls_config.accept_invalid_hostnames);

    if !tls_config.accept_invalid_certs {
        if let Some(ca) = tls_config.root_cert_path {
            let data = ca.data().await?;
            let cert = Certificate::from_pem(&data)
                .map_err(|e| Error::configuration(format!("invalid root certificate: {e}")))?;
            builder.add_root_certificate(cert);
        }
    }

    if let (Some(cert_path), Some(key_path)) =
        (tls_config.client_cert_path, tls_config.client_key_path)
    {
        let cert = cert_path.data().await?;
        let key = key_path.data().await?;
        let identity = Identity::from_pkcs8(&cert, &key)
            .map_err(|e| Error::configuration(format!("invalid client identity: {e}")))?;
        builder.identity(identity);
    }

    let connector = builder
        .build()
        .map_err(|e| Error::configuration(e.to_string()))?;

    Ok(connector.into())
}
