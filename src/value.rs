//! A single column value from a result-set row (§3/§4.2): the raw wire bytes COLMETADATA's
//! TYPE_INFO already told the row decoder how to split off, paired with that same TYPE_INFO so
//! the value can be interpreted on demand instead of up front.

use bytes::{Buf, Bytes};

use crate::error::{err_protocol, Error};
use crate::protocol::type_info::{DataType, TypeInfo};

/// One column's value. Holding one costs only the bytes already buffered for its row; the
/// `try_*` accessors do the actual interpretation, so a caller who only wants column 0 never
/// pays to decode the rest.
#[derive(Debug, Clone)]
pub struct MssqlValue {
    pub(crate) type_info: TypeInfo,
    pub(crate) data: Option<Bytes>,
}

impl MssqlValue {
    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    /// The server-facing SQL type name (`"INT"`, `"NVARCHAR"`, ...), independent of nullability.
    pub fn type_name(&self) -> &'static str {
        self.type_info.name()
    }

    pub fn try_bool(&self) -> Result<Option<bool>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::Bit | DataType::BitN => Ok(Some(data[0] != 0)),
            ty => Err(err_protocol!("cannot read {:?} as BIT", ty)),
        }
    }

    /// Reads any fixed- or variable-width integer column, widening to `i64`. `TINYINT` is
    /// unsigned on the wire (a single byte, 0-255); every other integer width is signed LE.
    pub fn try_i64(&self) -> Result<Option<i64>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::TinyInt => Ok(Some(i64::from(data[0]))),
            DataType::SmallInt => Ok(Some(i64::from(read_le::<2>(data) as i16))),
            DataType::Int => Ok(Some(i64::from(read_le::<4>(data) as i32))),
            DataType::BigInt => Ok(Some(read_le::<8>(data) as i64)),
            DataType::IntN => Ok(Some(match data.len() {
                1 => i64::from(data[0]),
                2 => i64::from(read_le::<2>(data) as i16),
                4 => i64::from(read_le::<4>(data) as i32),
                8 => read_le::<8>(data) as i64,
                n => return Err(err_protocol!("unexpected INTN width {}", n)),
            })),
            ty => Err(err_protocol!("cannot read {:?} as an integer", ty)),
        }
    }

    pub fn try_i32(&self) -> Result<Option<i32>, Error> {
        Ok(self.try_i64()?.map(|v| v as i32))
    }

    pub fn try_f64(&self) -> Result<Option<f64>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::Real => Ok(Some(f64::from(f32::from_le_bytes(
                data.as_ref().try_into().map_err(|_| err_protocol!("short REAL value"))?,
            )))),
            DataType::Float => Ok(Some(f64::from_le_bytes(
                data.as_ref().try_into().map_err(|_| err_protocol!("short FLOAT value"))?,
            ))),
            DataType::FloatN => Ok(Some(match data.len() {
                4 => f64::from(f32::from_le_bytes(data.as_ref().try_into().unwrap())),
                8 => f64::from_le_bytes(data.as_ref().try_into().unwrap()),
                n => return Err(err_protocol!("unexpected FLOATN width {}", n)),
            })),
            ty => Err(err_protocol!("cannot read {:?} as a float", ty)),
        }
    }

    pub fn try_str(&self) -> Result<Option<String>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        let (decoded, _, had_errors) = self.type_info.encoding()?.decode(data);
        if had_errors {
            return Err(err_protocol!("invalid character data in {:?} column", self.type_info.ty));
        }
        Ok(Some(decoded.into_owned()))
    }

    pub fn try_bytes(&self) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.data.as_ref().map(|b| b.to_vec()))
    }

    #[cfg(feature = "chrono")]
    pub fn try_date(&self) -> Result<Option<chrono::NaiveDate>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::DateN => {
                let mut buf = data.clone();
                Ok(Some(crate::protocol::temporal::read_date(&mut buf)?))
            }
            ty => Err(err_protocol!("cannot read {:?} as DATE", ty)),
        }
    }

    #[cfg(feature = "chrono")]
    pub fn try_time(&self) -> Result<Option<chrono::NaiveTime>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::TimeN => {
                let mut buf = data.clone();
                Ok(Some(crate::protocol::temporal::read_time(&mut buf, self.type_info.scale)?))
            }
            ty => Err(err_protocol!("cannot read {:?} as TIME", ty)),
        }
    }

    /// Reads `DATETIME`/`SMALLDATETIME`/`DATETIME2` columns. `DATETIMEOFFSET` has its own
    /// accessor since it also carries a minutes-offset the caller needs.
    #[cfg(feature = "chrono")]
    pub fn try_datetime(&self) -> Result<Option<chrono::NaiveDateTime>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        let mut buf = data.clone();
        match self.type_info.ty {
            DataType::DateTime2N => Ok(Some(crate::protocol::temporal::read_datetime2(&mut buf, self.type_info.scale)?)),
            DataType::DateTime => Ok(Some(crate::protocol::temporal::read_datetime(&mut buf)?)),
            DataType::DateTimeN if self.type_info.size == 8 => {
                Ok(Some(crate::protocol::temporal::read_datetime(&mut buf)?))
            }
            DataType::SmallDateTime => Ok(Some(crate::protocol::temporal::read_smalldatetime(&mut buf)?)),
            DataType::DateTimeN if self.type_info.size == 4 => {
                Ok(Some(crate::protocol::temporal::read_smalldatetime(&mut buf)?))
            }
            ty => Err(err_protocol!("cannot read {:?} as a datetime", ty)),
        }
    }

    /// The UTC wall-clock reading plus the signed minutes-offset the server sent alongside it.
    #[cfg(feature = "chrono")]
    pub fn try_datetimeoffset(&self) -> Result<Option<(chrono::NaiveDateTime, i16)>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::DateTimeOffsetN => {
                let mut buf = data.clone();
                Ok(Some(crate::protocol::temporal::read_datetimeoffset(
                    &mut buf,
                    self.type_info.scale,
                )?))
            }
            ty => Err(err_protocol!("cannot read {:?} as DATETIMEOFFSET", ty)),
        }
    }

    /// `UNIQUEIDENTIFIER`: 16 bytes in .NET's mixed-endian `Guid` layout (the first three fields
    /// little-endian, the trailing 8-byte node/clock-sequence field byte-for-byte).
    pub fn try_guid(&self) -> Result<Option<uuid::Uuid>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::Guid => {
                if data.len() != 16 {
                    return Err(err_protocol!("GUID value must be 16 bytes, got {}", data.len()));
                }
                let d1 = u32::from_le_bytes(data[0..4].try_into().unwrap());
                let d2 = u16::from_le_bytes(data[4..6].try_into().unwrap());
                let d3 = u16::from_le_bytes(data[6..8].try_into().unwrap());
                let mut d4 = [0u8; 8];
                d4.copy_from_slice(&data[8..16]);
                Ok(Some(uuid::Uuid::from_fields(d1, d2, d3, &d4)))
            }
            ty => Err(err_protocol!("cannot read {:?} as UNIQUEIDENTIFIER", ty)),
        }
    }

    /// `MONEY`/`SMALLMONEY`: returned as the raw ten-thousandths integer the wire carries (MONEY
    /// is fixed-point with an implicit scale of 4) — e.g. `$12.3450` reads back as `123450`.
    /// Use [`Self::try_decimal`]/[`Self::try_bigdecimal`] (when enabled) on the caller side to
    /// turn that into a scaled decimal if a typed currency value is wanted.
    pub fn try_money(&self) -> Result<Option<i64>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::Money => Ok(Some(read_money_8(data)?)),
            DataType::SmallMoney => Ok(Some(i64::from(read_le::<4>(data) as i32))),
            DataType::MoneyN => match data.len() {
                4 => Ok(Some(i64::from(read_le::<4>(data) as i32))),
                8 => Ok(Some(read_money_8(data)?)),
                n => Err(err_protocol!("unexpected MONEYN width {}", n)),
            },
            ty => Err(err_protocol!("cannot read {:?} as MONEY", ty)),
        }
    }

    /// `DECIMAL`/`NUMERIC`: the wire's sign byte plus little-endian unsigned mantissa, scaled
    /// per the column's `TYPE_INFO` scale. `rust_decimal::Decimal` caps scale at 28 and its
    /// mantissa at 96 bits; a column declared with a larger precision/scale than that will fail
    /// to parse here — use [`Self::try_bigdecimal`] (the `bigdecimal` feature) for those.
    #[cfg(feature = "decimal")]
    pub fn try_decimal(&self) -> Result<Option<rust_decimal::Decimal>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::Decimal | DataType::Numeric | DataType::DecimalN | DataType::NumericN => {
                let text = decimal_string(data, self.type_info.scale)?;
                Ok(Some(text.parse().map_err(|_| {
                    err_protocol!("DECIMAL value does not fit rust_decimal's 96-bit mantissa/28-scale limit")
                })?))
            }
            ty => Err(err_protocol!("cannot read {:?} as DECIMAL", ty)),
        }
    }

    /// `DECIMAL`/`NUMERIC`, decoded to an arbitrary-precision `bigdecimal::BigDecimal` — unlike
    /// [`Self::try_decimal`], every precision/scale TDS can carry (up to 38 digits) round-trips
    /// exactly.
    #[cfg(feature = "bigdecimal")]
    pub fn try_bigdecimal(&self) -> Result<Option<bigdecimal_::BigDecimal>, Error> {
        let Some(data) = &self.data else { return Ok(None) };
        match self.type_info.ty {
            DataType::Decimal | DataType::Numeric | DataType::DecimalN | DataType::NumericN => {
                let text = decimal_string(data, self.type_info.scale)?;
                Ok(Some(
                    text.parse()
                        .map_err(|_| err_protocol!("invalid DECIMAL wire value"))?,
                ))
            }
            ty => Err(err_protocol!("cannot read {:?} as DECIMAL", ty)),
        }
    }
}

/// MONEY's 8-byte wire form: a big-half/little-half pair of 4-byte integers — the high-order
/// (signed) 32 bits first, the low-order (unsigned) 32 bits second — concatenated into one
/// 64-bit ten-thousandths value.
fn read_money_8(data: &Bytes) -> Result<i64, Error> {
    if data.len() != 8 {
        return Err(err_protocol!("unexpected MONEY width {}", data.len()));
    }
    let high = i32::from_le_bytes(data[0..4].try_into().unwrap());
    let low = u32::from_le_bytes(data[4..8].try_into().unwrap());
    Ok((i64::from(high) << 32) | i64::from(low))
}

/// Renders a DECIMAL/NUMERIC wire value (1-byte sign + little-endian unsigned mantissa) as a
/// plain base-10 decimal string (`"-123.45"`), for handoff to a `FromStr`-based decimal type.
#[cfg(any(feature = "decimal", feature = "bigdecimal"))]
fn decimal_string(data: &Bytes, scale: u8) -> Result<String, Error> {
    if data.is_empty() {
        return Err(err_protocol!("empty DECIMAL value"));
    }
    let negative = data[0] == 0;
    let mut mantissa: u128 = 0;
    for &byte in data[1..].iter().rev() {
        mantissa = (mantissa << 8) | u128::from(byte);
    }

    let digits = mantissa.to_string();
    let scale = scale as usize;
    let mut out = String::new();
    if negative && mantissa != 0 {
        out.push('-');
    }
    if scale == 0 {
        out.push_str(&digits);
    } else if digits.len() <= scale {
        out.push_str("0.");
        out.push_str(&"0".repeat(scale - digits.len()));
        out.push_str(&digits);
    } else {
        let split = digits.len() - scale;
        out.push_str(&digits[..split]);
        out.push('.');
        out.push_str(&digits[split..]);
    }
    Ok(out)
}

fn read_le<const N: usize>(data: &Bytes) -> u64 {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&data[..N]);
    let mut widened = [0u8; 8];
    widened[..N].copy_from_slice(&buf);
    u64::from_le_bytes(widened)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(ty: DataType, size: u32, bytes: &[u8]) -> MssqlValue {
        MssqlValue {
            type_info: TypeInfo::new(ty, size),
            data: Some(Bytes::copy_from_slice(bytes)),
        }
    }

    #[test]
    fn null_value_reports_null_for_every_accessor() {
        let v = MssqlValue { type_info: TypeInfo::new(DataType::IntN, 4), data: None };
        assert!(v.is_null());
        assert_eq!(v.try_i64().unwrap(), None);
    }

    #[test]
    fn widens_a_small_int_column_to_i64() {
        let v = value(DataType::SmallInt, 2, &(-5i16).to_le_bytes());
        assert_eq!(v.try_i64().unwrap(), Some(-5));
    }

    #[test]
    fn tinyint_is_read_as_unsigned() {
        let v = value(DataType::TinyInt, 1, &[250]);
        assert_eq!(v.try_i64().unwrap(), Some(250));
    }

    #[test]
    fn reads_a_four_byte_float_column() {
        let v = value(DataType::Real, 4, &1.5f32.to_le_bytes());
        assert_eq!(v.try_f64().unwrap(), Some(1.5));
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn reads_a_date_column() {
        let v = value(DataType::DateN, 3, &[0, 0, 0]);
        assert_eq!(
            v.try_date().unwrap(),
            Some(chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap())
        );
    }

    #[cfg(feature = "chrono")]
    #[test]
    fn rejects_a_date_read_as_time() {
        let v = value(DataType::DateN, 3, &[0, 0, 0]);
        assert!(v.try_time().is_err());
    }

    #[test]
    fn reads_a_guid_in_mixed_endian_order() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&0x04030201u32.to_le_bytes());
        wire.extend_from_slice(&0x0605u16.to_le_bytes());
        wire.extend_from_slice(&0x0807u16.to_le_bytes());
        wire.extend_from_slice(&[0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10]);

        let v = value(DataType::Guid, 16, &wire);
        let expected = uuid::Uuid::from_fields(
            0x04030201,
            0x0605,
            0x0807,
            &[0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10],
        );
        assert_eq!(v.try_guid().unwrap(), Some(expected));
    }

    #[test]
    fn reads_money_as_ten_thousandths() {
        // $1.2345 => 12345 ten-thousandths, split into high/low 32-bit halves.
        let raw: i64 = 12345;
        let mut wire = Vec::new();
        wire.extend_from_slice(&((raw >> 32) as i32).to_le_bytes());
        wire.extend_from_slice(&(raw as u32).to_le_bytes());

        let v = value(DataType::Money, 8, &wire);
        assert_eq!(v.try_money().unwrap(), Some(12345));
    }

    #[test]
    fn reads_smallmoney_directly_as_an_i32() {
        let v = value(DataType::SmallMoney, 4, &12345i32.to_le_bytes());
        assert_eq!(v.try_money().unwrap(), Some(12345));
    }

    #[cfg(feature = "decimal")]
    #[test]
    fn reads_a_negative_decimal_with_scale() {
        // -123.45 with scale 2: mantissa 12345, sign byte 0 (negative).
        let mut wire = vec![0u8];
        wire.extend_from_slice(&12345u32.to_le_bytes());
        let ty = TypeInfo {
            ty: DataType::DecimalN,
            size: wire.len() as u32,
            scale: 2,
            precision: 10,
            collation: None,
        };
        let v = MssqlValue { type_info: ty, data: Some(Bytes::copy_from_slice(&wire)) };
        assert_eq!(v.try_decimal().unwrap(), Some("-123.45".parse().unwrap()));
    }

    #[cfg(feature = "bigdecimal")]
    #[test]
    fn reads_a_bigdecimal_with_scale() {
        let mut wire = vec![1u8];
        wire.extend_from_slice(&12345u32.to_le_bytes());
        let ty = TypeInfo {
            ty: DataType::DecimalN,
            size: wire.len() as u32,
            scale: 2,
            precision: 10,
            collation: None,
        };
        let v = MssqlValue { type_info: ty, data: Some(Bytes::copy_from_slice(&wire)) };
        assert_eq!(v.try_bigdecimal().unwrap(), Some("123.45".parse().unwrap()));
    }
}
