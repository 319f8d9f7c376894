//! The COLMETADATA token (§4.2): describes the columns of the result set that follows, which
//! the ROW/NBCROW decoder needs in hand before it can interpret any row bytes.

use std::collections::HashMap;

use bytes::{Buf, Bytes};

use crate::encryption::crypto_metadata::CryptoMetadata;
use crate::error::Error;
use crate::protocol::get_b_varchar;
use crate::protocol::type_info::TypeInfo;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub(crate) struct ColumnFlags: u16 {
        const NULLABLE = 1 << 0;
        const CASE_SENSITIVE = 1 << 1;
        const UPDATEABLE = 1 << 2;
        const UPDATEABLE_UNKNOWN = 1 << 3;
        const IDENTITY = 1 << 4;
        const COMPUTED = 1 << 5;
        const FIXED_LEN_CLR_TYPE = 1 << 8;
        const SPARSE_COLUMN_SET = 1 << 9;
        const ENCRYPTED = 1 << 10;
        const HIDDEN = 1 << 13;
        const KEY = 1 << 14;
        const NULLABLE_UNKNOWN = 1 << 15;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MssqlColumn {
    pub(crate) name: String,
    pub(crate) ordinal: usize,
    pub(crate) user_type: u32,
    pub(crate) flags: ColumnFlags,
    pub(crate) type_info: TypeInfo,
    /// Present only when `flags` contains `ENCRYPTED`; tells the row decoder which CEK table
    /// entry and algorithm to use to recover the plaintext.
    pub(crate) crypto_metadata: Option<CryptoMetadata>,
}

impl MssqlColumn {
    pub(crate) fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }
}

pub(crate) struct ColMetaData;

impl ColMetaData {
    pub(crate) fn get(
        buf: &mut Bytes,
        columns: &mut Vec<MssqlColumn>,
        column_names: &mut HashMap<String, usize>,
    ) -> Result<(), Error> {
        columns.clear();
        column_names.clear();

        let count = buf.get_u16_le();

        // 0xFFFF signals "no metadata" (used by some RPCs that return no result set).
        if count == 0xFFFF {
            return Ok(());
        }

        for ordinal in 0..(count as usize) {
            let user_type = buf.get_u32_le();
            let flags = ColumnFlags::from_bits_truncate(buf.get_u16_le());
            let type_info = TypeInfo::get(buf)?;

            let crypto_metadata = if flags.contains(ColumnFlags::ENCRYPTED) {
                Some(CryptoMetadata::get(buf)?)
            } else {
                None
            };

            let name = get_b_varchar(buf)?;

            column_names.insert(name.clone(), ordinal);
            columns.push(MssqlColumn {
                name,
                ordinal,
                user_type,
                flags,
                type_info,
                crypto_metadata,
            });
        }

        Ok(())
    }
}
