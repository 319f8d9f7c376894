//! A decoded result-set row (§3): the column descriptions COLMETADATA delivered, paired with
//! the values ROW/NBCROW carried for one row.

use std::sync::Arc;

use bytes::Bytes;

use crate::encryption::aead::{self, EncryptionType};
use crate::encryption::cek::CekTable;
use crate::error::{err_protocol, Error};
use crate::protocol::col_meta_data::MssqlColumn;
use crate::protocol::row::Row as WireRow;
use crate::value::MssqlValue;

/// One row of a result set. Column metadata is shared (`Arc`) across every row of the same
/// result set rather than cloned per row, since COLMETADATA is sent once for the whole set.
#[derive(Debug, Clone)]
pub struct MssqlRow {
    columns: Arc<[MssqlColumn]>,
    values: Vec<MssqlValue>,
}

impl MssqlRow {
    /// Builds a row from its wire values, decrypting any `ENCRYPTED`-flagged column against
    /// `cek_table` (§4.5). A column whose crypto metadata reports `EncryptionType::Plaintext`
    /// carries its base-typed value as-is — the server marks a column encryptable without every
    /// row in it actually being encrypted.
    pub(crate) fn new(
        columns: Arc<[MssqlColumn]>,
        wire: WireRow,
        cek_table: Option<&CekTable>,
    ) -> Result<Self, Error> {
        let mut values = Vec::with_capacity(columns.len());

        for (column, data) in columns.iter().zip(wire.values) {
            let (type_info, data) = match (&column.crypto_metadata, &data) {
                (Some(crypto), Some(ciphertext)) if crypto.encryption_type != EncryptionType::Plaintext => {
                    let cek_table = cek_table.ok_or_else(|| {
                        err_protocol!("server sent an encrypted column but no CEK table was ever loaded")
                    })?;
                    let key = cek_table.get(crypto.cek_table_ordinal)?.resolve()?;
                    let plaintext = aead::decrypt(&key, ciphertext)?;
                    (crypto.base_type_info.clone(), Some(Bytes::from(plaintext)))
                }
                (Some(crypto), _) => (crypto.base_type_info.clone(), data),
                (None, _) => (column.type_info.clone(), data),
            };

            values.push(MssqlValue { type_info, data });
        }

        Ok(Self { columns, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.name.as_str())
    }

    pub fn try_get(&self, index: usize) -> Result<&MssqlValue, Error> {
        self.values
            .get(index)
            .ok_or_else(|| err_protocol!("column index {} out of range (row has {} columns)", index, self.values.len()))
    }

    pub fn try_get_named(&self, name: &str) -> Result<&MssqlValue, Error> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| err_protocol!("no column named `{}` in this result set", name))?;

        self.try_get(index)
    }
}
