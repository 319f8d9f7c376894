//! The TDS wire protocol: packet framing, the PRELOGIN/LOGIN7 handshake messages, and the
//! token stream a `TabularResult` packet carries (§3/§4.2).

pub(crate) mod col_meta_data;
pub(crate) mod done;
pub(crate) mod env_change;
pub(crate) mod error_token;
pub(crate) mod fed_auth;
pub(crate) mod feature_ext;
pub(crate) mod feature_ext_ack;
pub(crate) mod info;
pub(crate) mod login;
pub(crate) mod login_ack;
pub(crate) mod message;
pub(crate) mod order;
pub(crate) mod packet;
pub(crate) mod pre_login;
pub(crate) mod return_status;
pub(crate) mod return_value;
pub(crate) mod row;
pub(crate) mod rpc;
pub(crate) mod sql_text;
#[cfg(feature = "chrono")]
pub(crate) mod temporal;
pub(crate) mod type_info;

use bytes::{Buf, Bytes};

use crate::error::Error;

/// `B_VARCHAR`: a byte-length-prefixed UTF-16LE string (length counted in UTF-16 code units).
pub(crate) fn get_b_varchar(buf: &mut Bytes) -> Result<String, Error> {
    let len = buf.get_u8() as usize;
    get_utf16_string(buf, len)
}

/// `US_VARCHAR`: a `u16`-length-prefixed UTF-16LE string (length counted in UTF-16 code units).
pub(crate) fn get_us_varchar(buf: &mut Bytes) -> Result<String, Error> {
    let len = buf.get_u16_le() as usize;
    get_utf16_string(buf, len)
}

fn get_utf16_string(buf: &mut Bytes, len_units: usize) -> Result<String, Error> {
    let mut units = Vec::with_capacity(len_units);
    for _ in 0..len_units {
        units.push(buf.get_u16_le());
    }
    String::from_utf16(&units)
        .map_err(|_| crate::error::err_protocol!("invalid UTF-16 in wire string"))
}

pub(crate) fn put_b_varchar(buf: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    buf.push(u8::try_from(units.len()).expect("b_varchar too long"));
    for unit in units {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
}

pub(crate) fn put_us_varchar(buf: &mut Vec<u8>, s: &str) {
    let units: Vec<u16> = s.encode_utf16().collect();
    buf.extend_from_slice(&(u16::try_from(units.len()).expect("us_varchar too long")).to_le_bytes());
    for unit in units {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
}

/// A multi-part object name (1 to 4 parts: `[server.][database.][schema.]object`), as used by
/// the RETURNVALUE and COLINFO tokens to name the object a value or column came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SqlIdentifier {
    pub(crate) server: Option<String>,
    pub(crate) database: Option<String>,
    pub(crate) schema: Option<String>,
    pub(crate) object: String,
}

/// `u8` part count, then that many `B_VARCHAR` strings, assigned right-to-left: the last part
/// read is always the object name, the ones before it (if present) are schema/database/server.
pub(crate) fn get_sql_identifier(buf: &mut Bytes) -> Result<SqlIdentifier, Error> {
    let count = buf.get_u8();
    if !(1..=4).contains(&count) {
        return Err(crate::error::err_protocol!(
            "SQL identifier has {} parts, expected 1-4",
            count
        ));
    }

    let mut parts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        parts.push(get_b_varchar(buf)?);
    }

    let object = parts.pop().expect("count >= 1 checked above");
    let schema = parts.pop();
    let database = parts.pop();
    let server = parts.pop();

    Ok(SqlIdentifier {
        server,
        database,
        schema,
        object,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_a_bare_object_name() {
        let mut buf = Vec::new();
        buf.push(1u8);
        put_b_varchar(&mut buf, "Orders");
        let mut bytes = Bytes::from(buf);

        let id = get_sql_identifier(&mut bytes).unwrap();
        assert_eq!(id.object, "Orders");
        assert_eq!(id.schema, None);
    }

    #[test]
    fn assigns_parts_right_to_left() {
        let mut buf = Vec::new();
        buf.push(3u8);
        put_b_varchar(&mut buf, "mydb");
        put_b_varchar(&mut buf, "dbo");
        put_b_varchar(&mut buf, "Orders");
        let mut bytes = Bytes::from(buf);

        let id = get_sql_identifier(&mut bytes).unwrap();
        assert_eq!(id.database.as_deref(), Some("mydb"));
        assert_eq!(id.schema.as_deref(), Some("dbo"));
        assert_eq!(id.object, "Orders");
        assert_eq!(id.server, None);
    }

    #[test]
    fn rejects_a_zero_part_count() {
        let mut bytes = Bytes::from_static(&[0]);
        assert!(get_sql_identifier(&mut bytes).is_err());
    }
}
