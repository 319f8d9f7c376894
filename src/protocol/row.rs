//! ROW and NBCROW tokens (§4.2): one row of a result set, decoded against the column
//! descriptions COLMETADATA already delivered. NBCROW prefixes a null bitmap so that NULL
//! columns cost one bit instead of a per-value length prefix.

use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::protocol::col_meta_data::MssqlColumn;

#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub(crate) values: Vec<Option<Bytes>>,
}

impl Row {
    pub(crate) fn get(buf: &mut Bytes, nbc: bool, columns: &[MssqlColumn]) -> Result<Self, Error> {
        if nbc {
            Self::get_nbc(buf, columns)
        } else {
            Self::get_plain(buf, columns)
        }
    }

    fn get_plain(buf: &mut Bytes, columns: &[MssqlColumn]) -> Result<Self, Error> {
        let mut values = Vec::with_capacity(columns.len());

        for column in columns {
            values.push(column.type_info.get_value(buf));
        }

        Ok(Self { values })
    }

    fn get_nbc(buf: &mut Bytes, columns: &[MssqlColumn]) -> Result<Self, Error> {
        let bitmap_bytes = columns.len().div_ceil(8);
        let bitmap = buf.split_to(bitmap_bytes);

        let mut values = Vec::with_capacity(columns.len());

        for (i, column) in columns.iter().enumerate() {
            let byte = bitmap[i / 8];
            let is_null = byte & (1 << (i % 8)) != 0;

            if is_null {
                values.push(None);
            } else {
                values.push(column.type_info.get_value(buf));
            }
        }

        Ok(Self { values })
    }
}
