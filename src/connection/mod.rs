//! The Connection Director (§4.1/§4.4): owns the byte stream, speaks TDS packets and tokens
//! over it, and drives the PRELOGIN/LOGIN7 handshake plus connection resiliency.

mod establish;
mod query;
mod resiliency;
mod stream;
mod timeout;
mod tls_prelogin_wrapper;

pub(crate) use resiliency::connect_with_retry;
pub(crate) use stream::MssqlStream;
pub(crate) use timeout::{CommandTimeout, InterruptFlag};

use crate::encryption::cek::CekTable;
use crate::options::MssqlConnectOptions;

/// A single connection to a server: the framed stream plus everything learned about the server
/// during login that later requests need (its engine edition, whether Always Encrypted is
/// actually available, the options used to open it so a dropped connection can be reopened).
pub struct MssqlConnection {
    pub(crate) stream: MssqlStream,
    pub(crate) options: MssqlConnectOptions,

    /// `true` once the server engine-edition probe (§4.4) reports Azure SQL Database or a
    /// managed-instance edition rather than on-prem/IaaS SQL Server.
    pub(crate) is_cloud_database: bool,
    /// `true` for Azure Synapse Analytics (engine edition 6), which rejects a handful of
    /// on-prem-only statements (e.g. multi-statement transactions) this driver otherwise assumes
    /// are always available.
    pub(crate) is_cloud_analytics_warehouse: bool,

    /// `true` once FEATURE_EXT_ACK confirmed the server actually supports column encryption;
    /// distinct from `options.column_encryption_setting`, which is only what the client asked
    /// for.
    pub(crate) column_encryption_enabled: bool,
    /// `true` once FEATURE_EXT_ACK confirmed the server granted session recovery, meaning a
    /// mid-query reconnect (§4.4/§9 scenario S4) is worth resubmitting the statement after,
    /// rather than just surfacing the broken-connection error.
    pub(crate) session_recovery_enabled: bool,
    /// The most recently received CEK table, valid for the result set currently being read.
    pub(crate) cek_table: Option<CekTable>,
}

impl MssqlConnection {
    /// Opens a connection, applying connection-resiliency retries per `options` (§4.4).
    pub async fn connect(options: &MssqlConnectOptions) -> Result<Self, crate::error::Error> {
        connect_with_retry(options).await
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    /// `true` once the server engine-edition probe identified Azure SQL Database or a managed
    /// instance rather than on-prem/IaaS SQL Server.
    pub fn is_cloud_database(&self) -> bool {
        self.is_cloud_database
    }

    /// `true` specifically for Azure Synapse Analytics, which rejects a handful of statements
    /// this driver otherwise assumes are always legal.
    pub fn is_cloud_analytics_warehouse(&self) -> bool {
        self.is_cloud_analytics_warehouse
    }

    /// `true` once the server acknowledged the Always Encrypted feature extension during login.
    pub fn column_encryption_enabled(&self) -> bool {
        self.column_encryption_enabled
    }
}
