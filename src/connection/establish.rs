//! Drives the PRELOGIN/LOGIN7 handshake (§4.1/§4.4) to produce a ready-to-use
//! [`MssqlConnection`]: negotiates wire encryption, authenticates, confirms which LOGIN7 feature
//! extensions the server actually granted, and probes the server's engine edition.

use bytes::Buf;

use crate::connection::{MssqlConnection, MssqlStream};
use crate::error::Error;
use crate::io::{Decode, Encode};
use crate::options::{Authentication, ColumnEncryptionSetting, MssqlConnectOptions};
use crate::protocol::feature_ext::{ColumnEncryptionVersion, FedAuthFeature, FeatureExt};
use crate::protocol::feature_ext_ack::{
    FEATURE_ID_COLUMN_ENCRYPTION, FEATURE_ID_FEDAUTH, FEATURE_ID_SESSION_RECOVERY,
};
use crate::protocol::fed_auth::encode_fed_auth_token;
use crate::protocol::login::{Login7, LoginOptions};
use crate::protocol::message::Message;
use crate::protocol::packet::PacketType;
use crate::protocol::pre_login::{Encrypt, PreLogin, Version};

/// TDS 7.4, the version this driver speaks (§6). Every server this driver targets (SQL Server
/// 2012 onward, and every Azure SQL Database tier) accepts it.
const TDS_VERSION_7_4: u32 = 0x74000004;

/// A bare SQL batch body: ALL_HEADERS (empty — no active transaction yet) followed by the
/// UTF-16LE statement text, with no length prefix (the packet framing carries the length).
struct SqlBatch<'a>(&'a str);

impl Encode<'_> for SqlBatch<'_> {
    fn encode_with(&self, buf: &mut Vec<u8>, _: ()) {
        // ALL_HEADERS with zero headers: just the 4-byte total-length field.
        buf.extend(&4u32.to_le_bytes());
        for unit in self.0.encode_utf16() {
            buf.extend(&unit.to_le_bytes());
        }
    }
}

impl MssqlConnection {
    /// Establishes a connection, following a single server-initiated redirect (§4.3's ROUTING
    /// env-change, common for Azure SQL Database) against the new target before giving up.
    pub(crate) async fn establish(options: &MssqlConnectOptions) -> Result<Self, Error> {
        match Self::establish_once(options).await {
            Err(Error::Redirect { host, port }) => {
                log::info!("server redirected the connection to {host}:{port}");
                let mut redirected = options.clone();
                redirected.host = host;
                redirected.port = port;
                Self::establish_once(&redirected).await
            }
            other => other,
        }
    }

    async fn establish_once(options: &MssqlConnectOptions) -> Result<Self, Error> {
        let mut stream = MssqlStream::connect(options).await?;

        let prelogin_packet = PreLogin {
            version: Version::default(),
            encryption: options.encrypt,
            instance: options.instance.clone(),
            ..Default::default()
        };

        log::debug!("sending PRELOGIN: {prelogin_packet:?}");
        stream
            .write_packet_and_flush(PacketType::PreLogin, prelogin_packet)
            .await?;

        let (_, packet) = stream.recv_packet().await?;
        let prelogin_response = PreLogin::decode(packet)?;
        log::debug!("received PRELOGIN response: {prelogin_response:?}");

        let mut disable_encryption_after_login = false;

        match (options.encrypt, prelogin_response.encryption) {
            (Encrypt::Required | Encrypt::On, Encrypt::Required | Encrypt::On) => {
                log::trace!("login phase and data packets will be encrypted");
                stream.setup_encryption().await?;
            }
            (Encrypt::Required, Encrypt::Off | Encrypt::NotSupported) => {
                return Err(Error::tls(
                    crate::error::TlsFailureKind::HandshakeNotStarted,
                    "TLS encryption required but not supported by server",
                ));
            }
            (Encrypt::Off, _) | (_, Encrypt::Off) => {
                log::info!("login phase will be encrypted, data packets will not");
                stream.setup_encryption().await?;
                disable_encryption_after_login = true;
            }
            (Encrypt::NotSupported, _) | (_, Encrypt::NotSupported) => {
                log::warn!("connection is fully unencrypted: the login password is sent in the clear");
            }
        }

        let fed_auth_requested = !matches!(options.authentication, Authentication::SqlPassword);
        let column_encryption_requested = options.column_encryption_setting == ColumnEncryptionSetting::Enabled;

        let feature_ext = FeatureExt {
            column_encryption: column_encryption_requested.then_some(ColumnEncryptionVersion::V1),
            fed_auth: fed_auth_requested.then_some(FedAuthFeature { fed_auth_echo: false }),
            // Always requested: lets a mid-query reconnect (§4.4/§9 scenario S4) resume the same
            // server-side session instead of starting a brand new one.
            session_recovery: true,
        };

        let login_packet = Login7 {
            tds_version: TDS_VERSION_7_4,
            packet_size: options.requested_packet_size,
            client_prog_version: options.client_program_version,
            client_pid: options.client_pid,
            connection_id: 0,
            options: LoginOptions {
                integrated_security: matches!(options.authentication, Authentication::ActiveDirectoryIntegrated),
                read_only_intent: false,
            },
            client_time_zone: 0,
            client_lcid: 0x0409, // en-US; no locale negotiation is modeled (§1)
            host_name: options.hostname.clone(),
            user_name: options.username.clone(),
            password: options.password.clone().unwrap_or_default(),
            app_name: options.app_name.clone(),
            server_name: options.server_name.clone(),
            library_name: options.client_interface_name.clone(),
            language: options.language.clone(),
            database: options.database.clone(),
            client_id: [0; 6],
            feature_ext,
        };

        log::debug!("sending LOGIN7");
        stream
            .write_packet_and_flush(PacketType::Tds7Login, login_packet)
            .await?;

        if disable_encryption_after_login {
            log::debug!("downgrading to a plaintext stream after login");
            stream.downgrade_encryption()?;
        }

        let mut login_ack_seen = false;
        let mut ext_ack_seen = false;
        let mut column_encryption_enabled = false;
        let mut session_recovery_enabled = false;
        let mut fed_auth_info = None;

        loop {
            match stream.recv_message().await? {
                Message::LoginAck(ack) => {
                    log::debug!("received LOGINACK: tds_version=0x{:08x}", ack.tds_version);
                    login_ack_seen = true;
                }

                Message::FeatureExtAck(ack) => {
                    ext_ack_seen = true;
                    column_encryption_enabled = ack.has(FEATURE_ID_COLUMN_ENCRYPTION);
                    session_recovery_enabled = ack.has(FEATURE_ID_SESSION_RECOVERY);
                    if fed_auth_requested && !ack.has(FEATURE_ID_FEDAUTH) {
                        return Err(Error::Authentication(
                            "server did not acknowledge the federated-authentication feature extension".into(),
                        ));
                    }
                }

                Message::FedAuthInfo(info) => {
                    fed_auth_info = Some(info);
                }

                Message::Done(_) => {
                    log::debug!("login phase completed");
                    break;
                }

                Message::Redirect { host, port } => {
                    return Err(Error::Redirect { host, port });
                }

                other => {
                    log::trace!("ignoring message during login: {other:?}");
                }
            }
        }

        if column_encryption_requested && login_ack_seen && !ext_ack_seen {
            return Err(Error::ColumnEncryptionNotSupportedByServer);
        }

        if let Some(info) = fed_auth_info {
            Self::complete_fed_auth(&mut stream, options, &info).await?;
        }

        let (is_cloud_database, is_cloud_analytics_warehouse) = Self::probe_engine_edition(&mut stream).await?;

        Ok(Self {
            stream,
            options: options.clone(),
            is_cloud_database,
            is_cloud_analytics_warehouse,
            column_encryption_enabled,
            session_recovery_enabled,
            cek_table: None,
        })
    }

    /// Replies to a FEDAUTHINFO challenge with the bearer token the caller's authentication
    /// mode supplies, out of band, for the STS URL/SPN the server named.
    async fn complete_fed_auth(
        stream: &mut MssqlStream,
        options: &MssqlConnectOptions,
        info: &crate::protocol::fed_auth::FedAuthInfo,
    ) -> Result<(), Error> {
        log::debug!("federated auth requested; sts_url={:?} spn={:?}", info.sts_url, info.spn);

        let token = options.fed_auth_token.as_deref().ok_or_else(|| {
            Error::Authentication(
                "server requested federated authentication but no bearer token was supplied; \
                 call MssqlConnectOptions::fed_auth_token with one acquired out of band"
                    .into(),
            )
        })?;

        let mut buf = Vec::new();
        encode_fed_auth_token(&mut buf, token);
        stream.write_packet(PacketType::FedAuthToken, &buf[..]);
        stream.flush().await?;
        Ok(())
    }

    /// `SELECT CAST(SERVERPROPERTY('EngineEdition') AS INT)` (§4.4): cheap, always-available way
    /// to tell Azure SQL Database (5) and Azure Synapse Analytics (6) apart from on-prem/IaaS SQL
    /// Server (2/3/4), since a handful of statements this driver otherwise assumes are always
    /// legal (multi-statement transactions, `USE`) aren't on Synapse.
    async fn probe_engine_edition(stream: &mut MssqlStream) -> Result<(bool, bool), Error> {
        const QUERY: &str = "SELECT CAST(SERVERPROPERTY('EngineEdition') AS INT)";

        stream.pending_done_count += 1;
        stream
            .write_packet_and_flush(PacketType::SqlBatch, SqlBatch(QUERY))
            .await?;

        let mut edition: Option<i32> = None;

        loop {
            match stream.recv_message().await? {
                Message::Row(row) => {
                    if let Some(bytes) = row.values.first().and_then(|v| v.clone()) {
                        let mut b = bytes;
                        if b.len() == 4 {
                            edition = Some(b.get_i32_le());
                        }
                    }
                }
                Message::Done(done) | Message::DoneProc(done) => {
                    stream.handle_done(&done);
                    break;
                }
                Message::Redirect { host, port } => {
                    return Err(Error::Redirect { host, port });
                }
                _ => {}
            }
        }

        let edition = edition.unwrap_or(2); // default to "plain SQL Server" if the probe is inconclusive
        let is_cloud_database = matches!(edition, 5 | 6 | 8);
        let is_cloud_analytics_warehouse = edition == 6;

        Ok((is_cloud_database, is_cloud_analytics_warehouse))
    }
}
