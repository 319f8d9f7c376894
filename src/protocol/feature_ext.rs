//! The LOGIN7 feature-extension block (§4.4): a list of `{feature_id:u8, data_len:u32,
//! data:bytes}` entries terminated by `0xFF`, used to opt into column encryption and federated
//! authentication.

const FEATURE_ID_SESSION_RECOVERY: u8 = 0x01;
const FEATURE_ID_FEDAUTH: u8 = 0x02;
const FEATURE_ID_COLUMN_ENCRYPTION: u8 = 0x04;
const FEATURE_TERMINATOR: u8 = 0xFF;

/// Column-encryption versions the client is willing to speak; `1` is AEAD_AES_256_CBC_HMAC_SHA256
/// without enclave support, `2` adds enclave-computation support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnEncryptionVersion {
    V1 = 1,
    V2 = 2,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FedAuthFeature {
    /// `B_FEDAUTHLIBRARY` value; the driver only ever requests the token-already-in-hand
    /// library (`0x01`, "Security Token"), since interactive/MSI acquisition is the caller's
    /// responsibility.
    pub(crate) fed_auth_echo: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FeatureExt {
    pub(crate) column_encryption: Option<ColumnEncryptionVersion>,
    pub(crate) fed_auth: Option<FedAuthFeature>,
    /// Requested unconditionally (zero-length data, per MS-TDS) on every LOGIN7 — it costs
    /// nothing to ask, and a server that grants it lets a broken mid-query connection resume
    /// without losing its session state. This driver doesn't itself restore that state; it only
    /// uses the server's ack to decide whether resubmitting a statement after a reconnect is
    /// worth attempting (see `connection/query.rs`'s reconnect-and-resubmit path).
    pub(crate) session_recovery: bool,
}

impl FeatureExt {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        if self.session_recovery {
            buf.push(FEATURE_ID_SESSION_RECOVERY);
            buf.extend(&0u32.to_le_bytes());
        }

        if let Some(version) = self.column_encryption {
            buf.push(FEATURE_ID_COLUMN_ENCRYPTION);
            buf.extend(&1u32.to_le_bytes());
            buf.push(version as u8);
        }

        if let Some(fed_auth) = &self.fed_auth {
            // FEDAUTH feature data: 1-byte options (library id in high nibble, echo bit in bit
            // 0) followed by a 4-byte nonce when a security token is supplied out of band by
            // the caller; this driver always uses the "security token" library (0x01 << 1).
            buf.push(FEATURE_ID_FEDAUTH);
            buf.extend(&1u32.to_le_bytes());

            let mut options = 0x01u8 << 1; // B_FEDAUTHLIBRARY = SECURITYTOKEN
            if fed_auth.fed_auth_echo {
                options |= 0x01;
            }
            buf.push(options);
        }

        buf.push(FEATURE_TERMINATOR);
    }
}
