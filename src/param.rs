//! Caller-supplied values for a parameterized batch (§4.4): each [`MssqlParam`] maps to one
//! `@pN` RPC parameter of an `sp_executesql` call, matching the positional-name and
//! variable-declaration convention ADO.NET/ODBC drivers use for ad-hoc parameterized SQL. The
//! public variants deliberately don't expose this crate's internal `DataType`/`TypeInfo` wire
//! types; they're a closed set of SQL types a caller can bind without reaching into the wire
//! layer at all.

use crate::protocol::type_info::{DataType, TypeInfo};

/// One bound value for a parameterized `execute`/`fetch_all` call.
///
/// Each variant carries its own SQL type; there's no separate "declare the type, then supply a
/// value" step. Integers and floats are always sent through their nullable (`*N`) wire type so
/// [`MssqlParam::Null`] can stand in for any of them.
#[derive(Debug, Clone, PartialEq)]
pub enum MssqlParam {
    Null,
    Bit(bool),
    TinyInt(u8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Float(f64),
    /// Sent as `NVARCHAR` sized to the UTF-16 byte length of `value`.
    Str(String),
    /// Sent as `VARBINARY` sized to `value`'s length.
    Bytes(Vec<u8>),
}

impl MssqlParam {
    pub(crate) fn type_info(&self) -> TypeInfo {
        match self {
            MssqlParam::Null => TypeInfo::new(DataType::IntN, 4),
            MssqlParam::Bit(_) => TypeInfo::new(DataType::BitN, 1),
            MssqlParam::TinyInt(_) => TypeInfo::new(DataType::IntN, 1),
            MssqlParam::SmallInt(_) => TypeInfo::new(DataType::IntN, 2),
            MssqlParam::Int(_) => TypeInfo::new(DataType::IntN, 4),
            MssqlParam::BigInt(_) => TypeInfo::new(DataType::IntN, 8),
            MssqlParam::Real(_) => TypeInfo::new(DataType::FloatN, 4),
            MssqlParam::Float(_) => TypeInfo::new(DataType::FloatN, 8),
            MssqlParam::Str(s) => TypeInfo::new(DataType::NVarChar, (s.encode_utf16().count() * 2) as u32),
            MssqlParam::Bytes(b) => TypeInfo::new(DataType::VarBinary, b.len() as u32),
        }
    }

    /// The `TYPE_INFO`-compatible type name used in `sp_executesql`'s `@params` declaration
    /// string, e.g. `"int"`, `"nvarchar(13)"`.
    pub(crate) fn declared_sql_type(&self) -> String {
        match self {
            MssqlParam::Null | MssqlParam::Int(_) => "int".to_string(),
            MssqlParam::Bit(_) => "bit".to_string(),
            MssqlParam::TinyInt(_) => "tinyint".to_string(),
            MssqlParam::SmallInt(_) => "smallint".to_string(),
            MssqlParam::BigInt(_) => "bigint".to_string(),
            MssqlParam::Real(_) => "real".to_string(),
            MssqlParam::Float(_) => "float".to_string(),
            MssqlParam::Str(s) => {
                let units = s.encode_utf16().count().max(1);
                format!("nvarchar({units})")
            }
            MssqlParam::Bytes(b) => format!("varbinary({})", b.len().max(1)),
        }
    }

    pub(crate) fn wire_value(&self) -> Option<Vec<u8>> {
        match self {
            MssqlParam::Null => None,
            MssqlParam::Bit(v) => Some(vec![u8::from(*v)]),
            MssqlParam::TinyInt(v) => Some(vec![*v]),
            MssqlParam::SmallInt(v) => Some(v.to_le_bytes().to_vec()),
            MssqlParam::Int(v) => Some(v.to_le_bytes().to_vec()),
            MssqlParam::BigInt(v) => Some(v.to_le_bytes().to_vec()),
            MssqlParam::Real(v) => Some(v.to_le_bytes().to_vec()),
            MssqlParam::Float(v) => Some(v.to_le_bytes().to_vec()),
            MssqlParam::Str(s) => Some(s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()),
            MssqlParam::Bytes(b) => Some(b.clone()),
        }
    }
}

impl From<i32> for MssqlParam {
    fn from(value: i32) -> Self {
        MssqlParam::Int(value)
    }
}

impl From<i64> for MssqlParam {
    fn from(value: i64) -> Self {
        MssqlParam::BigInt(value)
    }
}

impl From<bool> for MssqlParam {
    fn from(value: bool) -> Self {
        MssqlParam::Bit(value)
    }
}

impl From<&str> for MssqlParam {
    fn from(value: &str) -> Self {
        MssqlParam::Str(value.to_string())
    }
}

impl From<String> for MssqlParam {
    fn from(value: String) -> Self {
        MssqlParam::Str(value)
    }
}

impl From<Vec<u8>> for MssqlParam {
    fn from(value: Vec<u8>) -> Self {
        MssqlParam::Bytes(value)
    }
}

impl<T> From<Option<T>> for MssqlParam
where
    T: Into<MssqlParam>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => MssqlParam::Null,
        }
    }
}

/// Builds the positional `@p1 int, @p2 nvarchar(5), ...` declaration string `sp_executesql`'s
/// second argument needs, matching the ordinal names [`crate::connection::MssqlConnection`]'s
/// parameterized methods give each bound value.
pub(crate) fn declarations(params: &[MssqlParam]) -> String {
    let mut out = String::new();
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str("@p");
        out.push_str(&(i + 1).to_string());
        out.push(' ');
        out.push_str(&param.declared_sql_type());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_carries_no_wire_value() {
        assert_eq!(MssqlParam::Null.wire_value(), None);
    }

    #[test]
    fn str_is_sized_to_its_utf16_byte_length() {
        let param = MssqlParam::Str("hi".to_string());
        assert_eq!(param.type_info().size, 4);
        assert_eq!(param.declared_sql_type(), "nvarchar(2)");
    }

    #[test]
    fn declarations_lists_params_in_order() {
        let params = vec![MssqlParam::Int(1), MssqlParam::Str("a".to_string())];
        assert_eq!(declarations(&params), "@p1 int,@p2 nvarchar(1)");
    }

    #[test]
    fn option_none_converts_to_null() {
        let param: MssqlParam = Option::<i32>::None.into();
        assert_eq!(param, MssqlParam::Null);
    }

    #[test]
    fn option_some_converts_to_the_inner_value() {
        let param: MssqlParam = Some(7i32).into();
        assert_eq!(param, MssqlParam::Int(7));
    }
}
