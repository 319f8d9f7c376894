//! `MssqlConnectOptions` (§6's connection-string surface): a builder-pattern struct describing
//! how to reach and authenticate against a server, parsed from a `mssql://` URL or built
//! fluently.

pub(crate) mod parse;

use std::path::Path;
use std::time::Duration;

use crate::net::CertificateInput;
use crate::protocol::pre_login::Encrypt;

/// Always Encrypted column-encryption negotiation mode (`columnEncryptionSetting`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnEncryptionSetting {
    #[default]
    Disabled,
    Enabled,
}

/// Authentication mode (`authentication`). Only the flows this driver can actually drive
/// end-to-end are modeled; `authenticationScheme` (NTLM/Kerberos SSPI negotiation) is consumed
/// as an opaque string and forwarded to federated-auth token acquisition, not reimplemented
/// here (see DESIGN.md).
#[derive(Debug, Clone, Default)]
pub enum Authentication {
    #[default]
    SqlPassword,
    ActiveDirectoryPassword,
    ActiveDirectoryIntegrated,
    /// The caller supplies an already-acquired bearer token via a callback at connect time.
    ActiveDirectoryToken,
}

#[derive(Debug, Clone)]
pub struct MssqlConnectOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) instance: Option<String>,

    pub(crate) username: String,
    pub(crate) password: Option<String>,
    pub(crate) domain: Option<String>,
    pub(crate) authentication: Authentication,

    pub(crate) database: String,

    pub(crate) encrypt: Encrypt,
    pub(crate) trust_server_certificate: bool,
    pub(crate) hostname_in_certificate: Option<String>,
    pub(crate) ssl_root_cert: Option<CertificateInput>,

    pub(crate) column_encryption_setting: ColumnEncryptionSetting,
    pub(crate) enclave_attestation_url: Option<String>,
    pub(crate) enclave_attestation_protocol: Option<String>,

    /// An already-acquired bearer token for `Authentication::ActiveDirectoryToken`. Acquiring
    /// the token itself (interactive browser flow, managed identity, client secret) is the
    /// caller's responsibility (§1) — this driver only frames it onto the wire in response to
    /// the server's FEDAUTHINFO challenge.
    pub(crate) fed_auth_token: Option<String>,

    pub(crate) login_timeout: Duration,
    pub(crate) query_timeout: Option<Duration>,
    pub(crate) cancel_query_timeout: Duration,

    pub(crate) connect_retry_count: u8,
    pub(crate) connect_retry_interval: Duration,

    pub(crate) multi_subnet_failover: bool,
    pub(crate) transparent_network_ip_resolution: bool,

    pub(crate) fips: bool,

    pub(crate) client_program_version: u32,
    pub(crate) client_pid: u32,
    pub(crate) hostname: String,
    pub(crate) app_name: String,
    pub(crate) server_name: String,
    pub(crate) client_interface_name: String,
    pub(crate) language: String,
    pub(crate) requested_packet_size: u32,
}

impl Default for MssqlConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl MssqlConnectOptions {
    pub fn new() -> Self {
        Self {
            host: String::from("localhost"),
            port: 1433,
            instance: None,

            username: String::from("sa"),
            password: None,
            domain: None,
            authentication: Authentication::SqlPassword,

            database: String::from("master"),

            encrypt: Encrypt::On,
            trust_server_certificate: false,
            hostname_in_certificate: None,
            ssl_root_cert: None,

            column_encryption_setting: ColumnEncryptionSetting::Disabled,
            enclave_attestation_url: None,
            enclave_attestation_protocol: None,
            fed_auth_token: None,

            login_timeout: Duration::from_secs(15),
            query_timeout: None,
            cancel_query_timeout: Duration::from_secs(5),

            connect_retry_count: 1,
            connect_retry_interval: Duration::from_secs(10),

            multi_subnet_failover: false,
            transparent_network_ip_resolution: true,

            fips: false,

            client_program_version: 0,
            client_pid: 0,
            hostname: String::new(),
            app_name: String::new(),
            server_name: String::new(),
            client_interface_name: String::new(),
            language: String::new(),
            requested_packet_size: 4096,
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_owned();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn instance(mut self, instance: &str) -> Self {
        self.instance = Some(instance.to_owned());
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.username = username.to_owned();
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_owned());
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_owned());
        self
    }

    pub fn authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = authentication;
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = database.to_owned();
        self
    }

    pub fn encrypt(mut self, encrypt: Encrypt) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    pub fn hostname_in_certificate(mut self, hostname: &str) -> Self {
        self.hostname_in_certificate = Some(hostname.to_owned());
        self
    }

    pub fn ssl_root_cert(mut self, cert: impl AsRef<Path>) -> Self {
        self.ssl_root_cert = Some(CertificateInput::File(cert.as_ref().to_path_buf()));
        self
    }

    pub fn column_encryption_setting(mut self, setting: ColumnEncryptionSetting) -> Self {
        self.column_encryption_setting = setting;
        self
    }

    pub fn enclave_attestation_url(mut self, url: &str) -> Self {
        self.enclave_attestation_url = Some(url.to_owned());
        self
    }

    pub fn enclave_attestation_protocol(mut self, protocol: &str) -> Self {
        self.enclave_attestation_protocol = Some(protocol.to_owned());
        self
    }

    /// Supplies an already-acquired bearer token for `Authentication::ActiveDirectoryToken`.
    pub fn fed_auth_token(mut self, token: &str) -> Self {
        self.fed_auth_token = Some(token.to_owned());
        self
    }

    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn cancel_query_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_query_timeout = timeout;
        self
    }

    /// `0..=255`; `0` disables connection resiliency.
    pub fn connect_retry_count(mut self, count: u8) -> Result<Self, Self> {
        self.connect_retry_count = count;
        Ok(self)
    }

    /// `1..=60` seconds.
    pub fn connect_retry_interval(mut self, interval: Duration) -> Result<Self, Self> {
        if interval.as_secs() < 1 || interval.as_secs() > 60 {
            return Err(self);
        }
        self.connect_retry_interval = interval;
        Ok(self)
    }

    pub fn multi_subnet_failover(mut self, enabled: bool) -> Self {
        self.multi_subnet_failover = enabled;
        self
    }

    pub fn transparent_network_ip_resolution(mut self, enabled: bool) -> Self {
        self.transparent_network_ip_resolution = enabled;
        self
    }

    /// Validates the FIPS invariant from §4.1: encryption must be required,
    /// `trust_server_certificate` must be false, and any trust-store path needs its type.
    pub fn fips(mut self, enabled: bool) -> Result<Self, crate::error::Error> {
        if enabled {
            if self.encrypt != Encrypt::Required {
                return Err(crate::error::Error::InvalidFipsConfig);
            }
            if self.trust_server_certificate {
                return Err(crate::error::Error::InvalidFipsConfig);
            }
        }
        self.fips = enabled;
        Ok(self)
    }

    pub fn client_program_version(mut self, version: u32) -> Self {
        self.client_program_version = version;
        self
    }

    pub fn client_pid(mut self, pid: u32) -> Self {
        self.client_pid = pid;
        self
    }

    pub fn hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_owned();
        self
    }

    pub fn app_name(mut self, app_name: &str) -> Self {
        self.app_name = app_name.to_owned();
        self
    }

    pub fn server_name(mut self, server_name: &str) -> Self {
        self.server_name = server_name.to_owned();
        self
    }

    pub fn client_interface_name(mut self, name: &str) -> Self {
        self.client_interface_name = name.to_owned();
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = language.to_owned();
        self
    }

    /// Size in bytes of TDS packets to exchange with the server. Must be at least 512 (§6).
    pub fn requested_packet_size(mut self, size: u32) -> Result<Self, Self> {
        if size < 512 {
            Err(self)
        } else {
            self.requested_packet_size = size;
            Ok(self)
        }
    }
}
