//! Per-column crypto metadata (§3): what a single encrypted column needs to decrypt/encrypt its
//! values — which CEK table entry protects it, which algorithm, and whether it's comparable.

use bytes::{Buf, Bytes};

use crate::encryption::aead::EncryptionType;
use crate::error::Error;
use crate::protocol::get_b_varchar;
use crate::protocol::type_info::TypeInfo;

/// Index into the connection's current CEK table, as carried on the wire (`USHORT`).
pub(crate) type CekTableOrdinal = u16;

#[derive(Debug, Clone)]
pub(crate) struct CryptoMetadata {
    /// The column's type as it appears in plaintext (what the caller sees after decryption).
    pub(crate) base_type_info: TypeInfo,
    pub(crate) cek_table_ordinal: CekTableOrdinal,
    pub(crate) algorithm_id: u8,
    /// Only present when `algorithm_id` is the custom/extensible marker (`0`); otherwise the
    /// algorithm is implied by `algorithm_id` and this is `None`.
    pub(crate) algorithm_name: Option<String>,
    pub(crate) encryption_type: EncryptionType,
    pub(crate) normalization_rule_version: u8,
    pub(crate) ordinal: u16,
}

/// The one built-in algorithm this driver's AEAD layer implements; `algorithm_id == 0` is the
/// wire's "custom algorithm, name follows" marker, never emitted by this driver.
pub(crate) const ALGORITHM_ID_AEAD_AES_256_CBC_HMAC_SHA256: u8 = 2;

impl CryptoMetadata {
    pub(crate) fn encryption_type_from_wire(byte: u8) -> EncryptionType {
        match byte {
            1 => EncryptionType::Deterministic,
            2 => EncryptionType::Randomized,
            _ => EncryptionType::Plaintext,
        }
    }

    fn encryption_type_to_wire(encryption_type: EncryptionType) -> u8 {
        match encryption_type {
            EncryptionType::Deterministic => 1,
            EncryptionType::Randomized => 2,
            EncryptionType::Plaintext => 0,
        }
    }

    /// Encodes a parameter's crypto metadata the same way COLMETADATA carries a column's: right
    /// after the (encrypted-wire-form) `TYPE_INFO`, before the parameter's value bytes. Used when
    /// sending an encrypted RPC parameter, the mirror image of [`Self::get`].
    pub(crate) fn put(&self, buf: &mut Vec<u8>) {
        self.base_type_info.put(buf);
        buf.extend(&self.cek_table_ordinal.to_le_bytes());
        buf.push(self.algorithm_id);
        if let Some(name) = &self.algorithm_name {
            crate::protocol::put_b_varchar(buf, name);
        }
        buf.push(Self::encryption_type_to_wire(self.encryption_type));
        buf.push(self.normalization_rule_version);
        buf.extend(&self.ordinal.to_le_bytes());
    }

    /// Decodes a COLMETADATA column's crypto metadata, present only when `ColumnFlags::ENCRYPTED`
    /// is set, immediately after that column's (encrypted-wire-form) `TYPE_INFO` and before its
    /// name. Field order matches §3's CryptoMetadata data model.
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let base_type_info = TypeInfo::get(buf)?;
        let cek_table_ordinal = buf.get_u16_le();
        let algorithm_id = buf.get_u8();
        let algorithm_name = if algorithm_id == 0 {
            Some(get_b_varchar(buf)?)
        } else {
            None
        };
        let encryption_type = Self::encryption_type_from_wire(buf.get_u8());
        let normalization_rule_version = buf.get_u8();
        let ordinal = buf.get_u16_le();

        Ok(Self {
            base_type_info,
            cek_table_ordinal,
            algorithm_id,
            algorithm_name,
            encryption_type,
            normalization_rule_version,
            ordinal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::type_info::DataType;

    fn encode_type_info(ty: DataType, size: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        TypeInfo::new(ty, size).put(&mut buf);
        buf
    }

    #[test]
    fn decodes_a_deterministic_entry_with_a_builtin_algorithm() {
        let mut buf = Vec::new();
        buf.extend(encode_type_info(DataType::IntN, 4));
        buf.extend(&7u16.to_le_bytes()); // cek_table_ordinal
        buf.push(2); // algorithm_id: not the custom marker, so no name follows
        buf.push(1); // encryption_type: deterministic
        buf.push(1); // normalization_rule_version
        buf.extend(&3u16.to_le_bytes()); // ordinal

        let mut bytes = Bytes::from(buf);
        let metadata = CryptoMetadata::get(&mut bytes).unwrap();

        assert_eq!(metadata.cek_table_ordinal, 7);
        assert_eq!(metadata.algorithm_name, None);
        assert_eq!(metadata.encryption_type, EncryptionType::Deterministic);
        assert_eq!(metadata.ordinal, 3);
    }

    #[test]
    fn decodes_a_custom_algorithm_name() {
        let mut buf = Vec::new();
        buf.extend(encode_type_info(DataType::IntN, 4));
        buf.extend(&0u16.to_le_bytes());
        buf.push(0); // algorithm_id: custom marker
        crate::protocol::put_b_varchar(&mut buf, "MY_CUSTOM_ALGO");
        buf.push(2); // randomized
        buf.push(1);
        buf.extend(&0u16.to_le_bytes());

        let mut bytes = Bytes::from(buf);
        let metadata = CryptoMetadata::get(&mut bytes).unwrap();

        assert_eq!(metadata.algorithm_name.as_deref(), Some("MY_CUSTOM_ALGO"));
        assert_eq!(metadata.encryption_type, EncryptionType::Randomized);
    }
}
