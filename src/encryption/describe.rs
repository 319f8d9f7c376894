//! Parses the two result sets `sp_describe_parameter_encryption` returns (§4.5): first the CEK
//! table (one row per encrypted-key blob, grouped by `cek_id`/`cek_version`), then one row per
//! parameter carrying the crypto metadata needed to encrypt it before sending the actual RPC.

use bytes::Buf;

use crate::encryption::aead::EncryptionType;
use crate::encryption::cek::{CekTableEntry, EncryptedCek};
use crate::encryption::crypto_metadata::CryptoMetadata;
use crate::error::Error;
use crate::protocol::col_meta_data::MssqlColumn;
use crate::protocol::row::Row;

/// Column order the server is contractually required to use for the CEK metadata result set.
/// Any deviation means we're talking to a server version this driver doesn't understand well
/// enough to proceed safely.
const CEK_METADATA_COLUMNS: &[&str] = &[
    "KeyOrdinal",
    "DbId",
    "KeyId",
    "KeyVersion",
    "KeyMdVersion",
    "EncryptedKey",
    "ProviderName",
    "KeyPath",
    "KeyEncryptionAlgorithm",
];

fn check_schema(columns: &[MssqlColumn], expected: &[&str]) -> Result<(), Error> {
    if columns.len() < expected.len() {
        return Err(Error::UnexpectedServerSchema(format!(
            "expected at least {} columns, got {}",
            expected.len(),
            columns.len()
        )));
    }

    for (column, name) in columns.iter().zip(expected) {
        if column.name != *name {
            return Err(Error::UnexpectedServerSchema(format!(
                "expected column `{name}`, got `{}`",
                column.name
            )));
        }
    }

    Ok(())
}

fn decode_i32(value: &Option<bytes::Bytes>, column: &str) -> Result<i32, Error> {
    let bytes = value
        .as_ref()
        .ok_or_else(|| Error::protocol(format!("unexpected NULL in `{column}`")))?;
    let mut buf = bytes.clone();
    match buf.len() {
        4 => Ok(buf.get_i32_le()),
        2 => Ok(i32::from(buf.get_i16_le())),
        1 => Ok(i32::from(buf.get_u8())),
        n => Err(Error::protocol(format!(
            "unexpected integer width {n} in `{column}`"
        ))),
    }
}

fn decode_bytes(value: &Option<bytes::Bytes>, column: &str) -> Result<Vec<u8>, Error> {
    value
        .as_ref()
        .map(|b| b.to_vec())
        .ok_or_else(|| Error::protocol(format!("unexpected NULL in `{column}`")))
}

fn decode_nvarchar(value: &Option<bytes::Bytes>, column: &str) -> Result<String, Error> {
    let bytes = value
        .as_ref()
        .ok_or_else(|| Error::protocol(format!("unexpected NULL in `{column}`")))?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| Error::protocol(format!("invalid UTF-16 in `{column}`")))
}

/// Groups the CEK metadata rows into entries keyed by `(DbId, KeyId, KeyVersion)`, in the order
/// their first row appears — that order is what `cek_table_ordinal` on later crypto metadata
/// refers to.
pub(crate) fn parse_cek_table(columns: &[MssqlColumn], rows: &[Row]) -> Result<Vec<CekTableEntry>, Error> {
    check_schema(columns, CEK_METADATA_COLUMNS)?;

    let mut entries: Vec<CekTableEntry> = Vec::new();

    for row in rows {
        let v = &row.values;
        let database_id = decode_i32(&v[1], "DbId")?;
        let cek_id = decode_i32(&v[2], "KeyId")?;
        let cek_version = decode_i32(&v[3], "KeyVersion")?;
        let cek_md_version = decode_bytes(&v[4], "KeyMdVersion")?;

        let candidate = EncryptedCek {
            ciphertext: decode_bytes(&v[5], "EncryptedKey")?,
            key_store_name: decode_nvarchar(&v[6], "ProviderName")?,
            key_path: decode_nvarchar(&v[7], "KeyPath")?,
            algorithm_name: decode_nvarchar(&v[8], "KeyEncryptionAlgorithm")?,
        };

        match entries
            .iter_mut()
            .find(|e| e.database_id == database_id && e.cek_id == cek_id && e.cek_version == cek_version)
        {
            Some(entry) => entry.candidates.push(candidate),
            None => entries.push(CekTableEntry::new(
                database_id,
                cek_id,
                cek_version,
                cek_md_version,
                vec![candidate],
            )),
        }
    }

    Ok(entries)
}

/// This result set's column order has no grounding source this crate could retrieve (neither
/// spec.md nor a kept `original_source/` file names it — see `DESIGN.md`); it's this crate's own
/// contract, modeled on the CEK metadata result set directly above and checked positionally the
/// same way, so a server that doesn't match it fails `UnexpectedServerSchema` rather than having
/// unrelated bytes silently misread as crypto metadata.
const PARAM_METADATA_COLUMNS: &[&str] = &[
    "ParameterOrdinal",
    "ParameterCekOrdinal",
    "ParameterEncryptionAlgorithm",
    "ParameterEncryptionAlgorithmName",
    "ParameterEncryptionType",
    "ParameterNormalizationRuleVersion",
];

/// One parameter's crypto metadata from `sp_describe_parameter_encryption`'s second result set —
/// the per-parameter counterpart of the per-column [`crate::encryption::crypto_metadata::CryptoMetadata`]
/// COLMETADATA carries, minus `base_type_info` (the parameter's declared type is already known to
/// the caller building the RPC, not something the server needs to tell it back).
#[derive(Debug, Clone)]
pub(crate) struct ParamCryptoMetadata {
    pub(crate) ordinal: u16,
    pub(crate) cek_table_ordinal: u16,
    pub(crate) algorithm_id: u8,
    pub(crate) algorithm_name: Option<String>,
    pub(crate) encryption_type: EncryptionType,
    pub(crate) normalization_rule_version: u8,
}

pub(crate) fn parse_param_metadata(columns: &[MssqlColumn], rows: &[Row]) -> Result<Vec<ParamCryptoMetadata>, Error> {
    check_schema(columns, PARAM_METADATA_COLUMNS)?;

    rows.iter()
        .map(|row| {
            let v = &row.values;
            let ordinal = decode_i32(&v[0], "ParameterOrdinal")? as u16;
            let cek_table_ordinal = decode_i32(&v[1], "ParameterCekOrdinal")? as u16;
            let algorithm_id = decode_i32(&v[2], "ParameterEncryptionAlgorithm")? as u8;
            let algorithm_name = if v[3].is_some() {
                Some(decode_nvarchar(&v[3], "ParameterEncryptionAlgorithmName")?)
            } else {
                None
            };
            let encryption_type =
                CryptoMetadata::encryption_type_from_wire(decode_i32(&v[4], "ParameterEncryptionType")? as u8);
            let normalization_rule_version = decode_i32(&v[5], "ParameterNormalizationRuleVersion")? as u8;

            Ok(ParamCryptoMetadata {
                ordinal,
                cek_table_ordinal,
                algorithm_id,
                algorithm_name,
                encryption_type,
                normalization_rule_version,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::col_meta_data::ColumnFlags;
    use crate::protocol::type_info::{DataType, TypeInfo};
    use bytes::Bytes;

    fn column(name: &str) -> MssqlColumn {
        MssqlColumn {
            name: name.to_string(),
            ordinal: 0,
            user_type: 0,
            flags: ColumnFlags::empty(),
            type_info: TypeInfo::new(DataType::IntN, 4),
            crypto_metadata: None,
        }
    }

    #[test]
    fn rejects_unexpected_schema() {
        let columns = vec![column("NotKeyOrdinal")];
        assert!(matches!(
            parse_cek_table(&columns, &[]),
            Err(Error::UnexpectedServerSchema(_))
        ));
    }

    #[test]
    fn groups_multiple_candidates_into_one_entry() {
        let columns: Vec<MssqlColumn> = CEK_METADATA_COLUMNS.iter().map(|n| column(n)).collect();

        let row = |provider: &str| Row {
            values: vec![
                Some(Bytes::from_static(&[0])),
                Some(Bytes::copy_from_slice(&1i32.to_le_bytes())),
                Some(Bytes::copy_from_slice(&2i32.to_le_bytes())),
                Some(Bytes::copy_from_slice(&1i32.to_le_bytes())),
                Some(Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 1])),
                Some(Bytes::from_static(&[0xAB; 16])),
                Some(Bytes::from(
                    provider
                        .encode_utf16()
                        .flat_map(|u| u.to_le_bytes())
                        .collect::<Vec<u8>>(),
                )),
                Some(Bytes::from(
                    "keypath"
                        .encode_utf16()
                        .flat_map(|u| u.to_le_bytes())
                        .collect::<Vec<u8>>(),
                )),
                Some(Bytes::from(
                    "RSA_OAEP"
                        .encode_utf16()
                        .flat_map(|u| u.to_le_bytes())
                        .collect::<Vec<u8>>(),
                )),
            ],
        };

        let rows = vec![row("MSSQL_CERTIFICATE_STORE"), row("AZURE_KEY_VAULT")];

        let entries = parse_cek_table(&columns, &rows).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].candidates.len(), 2);
    }

    #[test]
    fn param_metadata_rejects_unexpected_schema() {
        let columns = vec![column("NotParameterOrdinal")];
        assert!(matches!(
            parse_param_metadata(&columns, &[]),
            Err(Error::UnexpectedServerSchema(_))
        ));
    }

    #[test]
    fn parses_one_deterministic_parameter() {
        let columns: Vec<MssqlColumn> = PARAM_METADATA_COLUMNS.iter().map(|n| column(n)).collect();

        let row = Row {
            values: vec![
                Some(Bytes::copy_from_slice(&1i32.to_le_bytes())),
                Some(Bytes::copy_from_slice(&0i32.to_le_bytes())),
                Some(Bytes::copy_from_slice(&2i32.to_le_bytes())),
                None,
                Some(Bytes::copy_from_slice(&1i32.to_le_bytes())),
                Some(Bytes::copy_from_slice(&1i32.to_le_bytes())),
            ],
        };

        let parsed = parse_param_metadata(&columns, &[row]).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].ordinal, 1);
        assert_eq!(parsed[0].cek_table_ordinal, 0);
        assert_eq!(parsed[0].encryption_type, EncryptionType::Deterministic);
        assert_eq!(parsed[0].algorithm_name, None);
    }
}
