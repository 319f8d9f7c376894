//! TYPE_INFO (§4.2/§3): the wire description of a column's or parameter's SQL type, and the
//! length-prefix convention used to read/write the value that follows it.

use bitflags::bitflags;
use bytes::{Buf, Bytes};
use encoding_rs::Encoding;

use crate::error::{err_protocol, Error};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub(crate) struct CollationFlags: u8 {
        const IGNORE_CASE = 1 << 0;
        const IGNORE_ACCENT = 1 << 1;
        const IGNORE_WIDTH = 1 << 2;
        const IGNORE_KANA = 1 << 3;
        const BINARY = 1 << 4;
        const BINARY2 = 1 << 5;
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) struct Collation {
    pub(crate) locale: u32,
    pub(crate) flags: CollationFlags,
    pub(crate) sort: u8,
    pub(crate) version: u8,
}

impl Collation {
    pub(crate) fn get(buf: &mut Bytes) -> Collation {
        let locale_sort_version = buf.get_u32_le();
        let locale = locale_sort_version & 0xfffff;
        let flags = CollationFlags::from_bits_truncate(((locale_sort_version >> 20) & 0xFF) as u8);
        let version = (locale_sort_version >> 28) as u8;
        let sort = buf.get_u8();

        Collation {
            locale,
            flags,
            sort,
            version,
        }
    }

    pub(crate) fn put(&self, buf: &mut Vec<u8>) {
        let locale_sort_version =
            self.locale | ((self.flags.bits() as u32) << 20) | ((self.version as u32) << 28);
        buf.extend(&locale_sort_version.to_le_bytes());
        buf.push(self.sort);
    }
}

/// https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-tds/ce3183a6-9d89-47e8-a02f-de5a1a1303de
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub(crate) enum DataType {
    // fixed-length
    Null = 0x1f,
    TinyInt = 0x30,
    Bit = 0x32,
    SmallInt = 0x34,
    Int = 0x38,
    SmallDateTime = 0x3a,
    Real = 0x3b,
    Money = 0x3c,
    DateTime = 0x3d,
    Float = 0x3e,
    SmallMoney = 0x7a,
    BigInt = 0x7f,

    // variable-length, byte length
    Guid = 0x24,
    IntN = 0x26,
    Decimal = 0x37,
    Numeric = 0x3f,
    BitN = 0x68,
    DecimalN = 0x6a,
    NumericN = 0x6c,
    FloatN = 0x6d,
    MoneyN = 0x6e,
    DateTimeN = 0x6f,
    DateN = 0x28,
    TimeN = 0x29,
    DateTime2N = 0x2a,
    DateTimeOffsetN = 0x2b,
    Char = 0x2f,
    VarChar = 0x27,
    Binary = 0x2d,
    VarBinary = 0x25,

    // variable-length, short length
    BigVarBinary = 0xa5,
    BigVarChar = 0xa7,
    BigBinary = 0xad,
    BigChar = 0xaf,
    NVarChar = 0xe7,
    NChar = 0xef,
    Xml = 0xf1,
    UserDefined = 0xf0,

    // variable-length, long length
    Text = 0x23,
    Image = 0x22,
    NText = 0x63,
    Variant = 0x62,
}

impl DataType {
    fn get(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(match buf.get_u8() {
            0x1f => DataType::Null,
            0x30 => DataType::TinyInt,
            0x32 => DataType::Bit,
            0x34 => DataType::SmallInt,
            0x38 => DataType::Int,
            0x3a => DataType::SmallDateTime,
            0x3b => DataType::Real,
            0x3c => DataType::Money,
            0x3d => DataType::DateTime,
            0x3e => DataType::Float,
            0x7a => DataType::SmallMoney,
            0x7f => DataType::BigInt,
            0x24 => DataType::Guid,
            0x26 => DataType::IntN,
            0x37 => DataType::Decimal,
            0x3f => DataType::Numeric,
            0x68 => DataType::BitN,
            0x6a => DataType::DecimalN,
            0x6c => DataType::NumericN,
            0x6d => DataType::FloatN,
            0x6e => DataType::MoneyN,
            0x6f => DataType::DateTimeN,
            0x28 => DataType::DateN,
            0x29 => DataType::TimeN,
            0x2a => DataType::DateTime2N,
            0x2b => DataType::DateTimeOffsetN,
            0x2f => DataType::Char,
            0x27 => DataType::VarChar,
            0x2d => DataType::Binary,
            0x25 => DataType::VarBinary,
            0xa5 => DataType::BigVarBinary,
            0xa7 => DataType::BigVarChar,
            0xad => DataType::BigBinary,
            0xaf => DataType::BigChar,
            0xe7 => DataType::NVarChar,
            0xef => DataType::NChar,
            0xf1 => DataType::Xml,
            0xf0 => DataType::UserDefined,
            0x23 => DataType::Text,
            0x22 => DataType::Image,
            0x63 => DataType::NText,
            0x62 => DataType::Variant,
            ty => return Err(err_protocol!("unknown TDS data type 0x{:02x}", ty)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypeInfo {
    pub(crate) ty: DataType,
    pub(crate) size: u32,
    pub(crate) scale: u8,
    pub(crate) precision: u8,
    pub(crate) collation: Option<Collation>,
}

impl TypeInfo {
    pub(crate) const fn new(ty: DataType, size: u32) -> Self {
        Self {
            ty,
            size,
            scale: 0,
            precision: 0,
            collation: None,
        }
    }

    /// Column character encoding, derived from the collation's Windows LCID for the
    /// non-Unicode string types; `NVARCHAR`/`NCHAR` are always UTF-16LE.
    pub(crate) fn encoding(&self) -> Result<&'static Encoding, Error> {
        match self.ty {
            DataType::NChar | DataType::NVarChar => Ok(encoding_rs::UTF_16LE),

            DataType::VarChar | DataType::Char | DataType::BigChar | DataType::BigVarChar => {
                let lcid = self
                    .collation
                    .ok_or_else(|| err_protocol!("character column is missing a collation"))?
                    .locale;

                Ok(match lcid {
                    0x0401 | 0x3801 | 0x3C01 | 0x1401 | 0x0C01 | 0x0801 | 0x2C01 | 0x3401
                    | 0x3001 | 0x1001 | 0x1801 | 0x2001 | 0x4001 | 0x2801 | 0x1C01 | 0x2401
                    | 0x0429 | 0x0492 | 0x0846 | 0x048C | 0x0859 | 0x0420 | 0x0820 | 0x045F
                    | 0x0480 => encoding_rs::WINDOWS_1256,

                    0x0804 | 0x50804 | 0x20804 | 0x1004 | 0x51004 | 0x21004 => encoding_rs::GBK,
                    0x0C04 | 0x40C04 | 0x1404 | 0x41404 | 0x21404 | 0x0404 | 0x30404 | 0x40404 => {
                        encoding_rs::BIG5
                    }

                    0x082C | 0x046D | 0x0423 | 0x0402 | 0x201A | 0x0440 | 0x042F | 0x0450
                    | 0x0419 | 0x0819 | 0x0485 | 0x0428 | 0x0444 | 0x0422 | 0x0843 | 0x281A
                    | 0x1C1A | 0x301A => encoding_rs::WINDOWS_1251,

                    0x141A | 0x0405 | 0x041A | 0x101A | 0x040E | 0x1040E | 0x0415 | 0x0418
                    | 0x0818 | 0x041B | 0x0424 | 0x041C | 0x241A | 0x181A | 0x2C1A | 0x0442 => {
                        encoding_rs::WINDOWS_1250
                    }

                    0x0425 | 0x0427 | 0x0426 => encoding_rs::WINDOWS_1257,
                    0x0408 => encoding_rs::WINDOWS_1253,
                    0x040D => encoding_rs::WINDOWS_1255,
                    0x0411 | 0x40411 => encoding_rs::SHIFT_JIS,
                    0x0412 => encoding_rs::EUC_KR,
                    0x041E => encoding_rs::WINDOWS_874,
                    0x042C | 0x041F | 0x0443 => encoding_rs::WINDOWS_1254,
                    0x042A => encoding_rs::WINDOWS_1258,

                    _ => encoding_rs::WINDOWS_1252,
                })
            }

            _ => Ok(encoding_rs::UTF_8),
        }
    }

    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let ty = DataType::get(buf)?;

        Ok(match ty {
            DataType::Null => Self::new(ty, 0),
            DataType::TinyInt | DataType::Bit => Self::new(ty, 1),
            DataType::SmallInt => Self::new(ty, 2),
            DataType::Int | DataType::SmallDateTime | DataType::Real | DataType::SmallMoney => {
                Self::new(ty, 4)
            }
            DataType::BigInt | DataType::Money | DataType::DateTime | DataType::Float => {
                Self::new(ty, 8)
            }
            DataType::DateN => Self::new(ty, 3),

            DataType::TimeN | DataType::DateTime2N | DataType::DateTimeOffsetN => {
                let scale = buf.get_u8();

                let mut size = match scale {
                    0..=2 => 3,
                    3..=4 => 4,
                    5..=7 => 5,
                    scale => return Err(err_protocol!("invalid scale {} for type {:?}", scale, ty)),
                };

                match ty {
                    DataType::DateTime2N => size += 3,
                    DataType::DateTimeOffsetN => size += 5,
                    _ => {}
                }

                Self {
                    scale,
                    size,
                    ty,
                    precision: 0,
                    collation: None,
                }
            }

            DataType::Guid
            | DataType::IntN
            | DataType::BitN
            | DataType::FloatN
            | DataType::MoneyN
            | DataType::DateTimeN
            | DataType::Char
            | DataType::VarChar
            | DataType::Binary
            | DataType::VarBinary => Self::new(ty, buf.get_u8() as u32),

            DataType::Decimal | DataType::Numeric | DataType::DecimalN | DataType::NumericN => {
                let size = buf.get_u8() as u32;
                let precision = buf.get_u8();
                let scale = buf.get_u8();

                Self {
                    size,
                    precision,
                    scale,
                    ty,
                    collation: None,
                }
            }

            DataType::BigVarBinary | DataType::BigBinary => Self::new(ty, buf.get_u16_le() as u32),

            DataType::BigVarChar | DataType::BigChar | DataType::NVarChar | DataType::NChar => {
                let size = buf.get_u16_le() as u32;
                let collation = Collation::get(buf);

                Self {
                    ty,
                    size,
                    collation: Some(collation),
                    scale: 0,
                    precision: 0,
                }
            }

            DataType::Xml | DataType::UserDefined | DataType::Text | DataType::Image
            | DataType::NText | DataType::Variant => {
                return Err(err_protocol!("unsupported column data type {:?}", ty));
            }
        })
    }

    pub(crate) fn put(&self, buf: &mut Vec<u8>) {
        buf.push(self.ty as u8);

        match self.ty {
            DataType::Null
            | DataType::TinyInt
            | DataType::Bit
            | DataType::SmallInt
            | DataType::Int
            | DataType::SmallDateTime
            | DataType::Real
            | DataType::SmallMoney
            | DataType::BigInt
            | DataType::Money
            | DataType::DateTime
            | DataType::Float => {}

            DataType::TimeN | DataType::DateTime2N | DataType::DateTimeOffsetN => {
                buf.push(self.scale);
            }

            DataType::Guid
            | DataType::IntN
            | DataType::BitN
            | DataType::FloatN
            | DataType::MoneyN
            | DataType::DateTimeN
            | DataType::DateN
            | DataType::Char
            | DataType::VarChar
            | DataType::Binary
            | DataType::VarBinary => {
                buf.push(u8::try_from(self.size).unwrap());
            }

            DataType::Decimal | DataType::Numeric | DataType::DecimalN | DataType::NumericN => {
                buf.push(u8::try_from(self.size).unwrap());
                buf.push(self.precision);
                buf.push(self.scale);
            }

            DataType::BigVarBinary | DataType::BigBinary => {
                buf.extend(&u16::try_from(self.size).unwrap().to_le_bytes());
            }

            DataType::BigVarChar | DataType::BigChar | DataType::NVarChar | DataType::NChar => {
                buf.extend(&u16::try_from(self.size).unwrap().to_le_bytes());

                if let Some(collation) = &self.collation {
                    collation.put(buf);
                } else {
                    buf.extend(&0_u32.to_le_bytes());
                    buf.push(0);
                }
            }

            DataType::Xml | DataType::UserDefined | DataType::Text | DataType::Image
            | DataType::NText | DataType::Variant => {
                log::error!("unsupported mssql data type in parameter encoding: {:?}", self.ty);
            }
        }
    }

    pub(crate) fn is_null(&self) -> bool {
        matches!(self.ty, DataType::Null)
    }

    /// Reads this type's length prefix and the value bytes that follow, per §4.2's
    /// byte-length/short-length/long-length conventions. `None` means SQL NULL.
    pub(crate) fn get_value(&self, buf: &mut Bytes) -> Option<Bytes> {
        match self.ty {
            DataType::Null
            | DataType::TinyInt
            | DataType::Bit
            | DataType::SmallInt
            | DataType::Int
            | DataType::SmallDateTime
            | DataType::Real
            | DataType::Money
            | DataType::DateTime
            | DataType::Float
            | DataType::SmallMoney
            | DataType::BigInt => Some(buf.split_to(self.size as usize)),

            DataType::Guid
            | DataType::IntN
            | DataType::Decimal
            | DataType::Numeric
            | DataType::BitN
            | DataType::DecimalN
            | DataType::NumericN
            | DataType::FloatN
            | DataType::MoneyN
            | DataType::DateN
            | DataType::DateTimeN
            | DataType::TimeN
            | DataType::DateTime2N
            | DataType::DateTimeOffsetN => {
                let size = buf.get_u8();
                if size == 0 || size == 0xFF {
                    None
                } else {
                    Some(buf.split_to(size as usize))
                }
            }

            DataType::Char | DataType::VarChar | DataType::Binary | DataType::VarBinary => {
                let size = buf.get_u8();
                if size == 0xFF {
                    None
                } else {
                    Some(buf.split_to(size as usize))
                }
            }

            DataType::BigVarBinary
            | DataType::BigVarChar
            | DataType::BigBinary
            | DataType::BigChar
            | DataType::NVarChar
            | DataType::NChar
            | DataType::Xml
            | DataType::UserDefined => {
                if self.size == 0xffff {
                    self.get_big_blob(buf)
                } else {
                    let size = buf.get_u16_le();
                    if size == 0xFF_FF {
                        None
                    } else {
                        Some(buf.split_to(size as usize))
                    }
                }
            }

            DataType::Text | DataType::Image | DataType::NText | DataType::Variant => {
                let size = buf.get_u32_le();
                if size == 0xFFFF_FFFF {
                    None
                } else {
                    Some(buf.split_to(size as usize))
                }
            }
        }
    }

    pub(crate) fn get_big_blob(&self, buf: &mut Bytes) -> Option<Bytes> {
        let len = buf.get_u64_le();

        let mut data = match len {
            0xffff_ffff_ffff_ffff => return None,
            0xffff_ffff_ffff_fffe => Vec::new(),
            _ => Vec::with_capacity(usize::try_from(len).unwrap_or(0)),
        };

        loop {
            let chunk_size = buf.get_u32_le() as usize;
            if chunk_size == 0 {
                break;
            }
            let chunk = buf.split_to(chunk_size);
            data.extend_from_slice(&chunk);
        }

        Some(data.into())
    }

    /// Writes a parameter value already serialized to raw bytes (`None` for SQL NULL), using
    /// this type's length-prefix convention. Used by the RPC parameter encoder, where values
    /// have already been produced by the caller (including, for encrypted columns, by the AEAD
    /// layer) rather than by a generic value-to-wire binding.
    pub(crate) fn put_value(&self, buf: &mut Vec<u8>, value: Option<&[u8]>) {
        match self.ty {
            DataType::Null
            | DataType::TinyInt
            | DataType::Bit
            | DataType::SmallInt
            | DataType::Int
            | DataType::SmallDateTime
            | DataType::Real
            | DataType::Money
            | DataType::DateTime
            | DataType::DateN
            | DataType::Float
            | DataType::SmallMoney
            | DataType::BigInt => {
                buf.extend_from_slice(value.unwrap_or(&[]));
            }

            DataType::Guid
            | DataType::IntN
            | DataType::Decimal
            | DataType::Numeric
            | DataType::BitN
            | DataType::DecimalN
            | DataType::NumericN
            | DataType::FloatN
            | DataType::MoneyN
            | DataType::DateTimeN
            | DataType::TimeN
            | DataType::DateTime2N
            | DataType::DateTimeOffsetN
            | DataType::Char
            | DataType::VarChar
            | DataType::Binary
            | DataType::VarBinary => match value {
                Some(bytes) => {
                    buf.push(u8::try_from(bytes.len()).expect("value too large for byte-len type"));
                    buf.extend_from_slice(bytes);
                }
                None => buf.push(0xFF),
            },

            DataType::BigVarBinary
            | DataType::BigVarChar
            | DataType::BigBinary
            | DataType::BigChar
            | DataType::NVarChar
            | DataType::NChar
            | DataType::Xml
            | DataType::UserDefined => match value {
                Some(bytes) => {
                    buf.extend(&u16::try_from(bytes.len()).expect("value too large").to_le_bytes());
                    buf.extend_from_slice(bytes);
                }
                None => buf.extend(&0xFFFF_u16.to_le_bytes()),
            },

            DataType::Text | DataType::Image | DataType::NText | DataType::Variant => match value {
                Some(bytes) => {
                    buf.extend(&u32::try_from(bytes.len()).expect("value too large").to_le_bytes());
                    buf.extend_from_slice(bytes);
                }
                None => buf.extend(&0xFFFF_FFFF_u32.to_le_bytes()),
            },
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self.ty {
            DataType::Null => "NULL",
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::Real => "REAL",
            DataType::Float => "FLOAT",
            DataType::IntN => match self.size {
                1 => "TINYINT",
                2 => "SMALLINT",
                4 => "INT",
                _ => "BIGINT",
            },
            DataType::FloatN => match self.size {
                4 => "REAL",
                _ => "FLOAT",
            },
            DataType::VarChar => "VARCHAR",
            DataType::NVarChar => "NVARCHAR",
            DataType::BigVarChar => "BIGVARCHAR",
            DataType::Char => "CHAR",
            DataType::BigChar => "BIGCHAR",
            DataType::NChar => "NCHAR",
            DataType::VarBinary => "VARBINARY",
            DataType::BigVarBinary => "BIGVARBINARY",
            DataType::Binary => "BINARY",
            DataType::BigBinary => "BIGBINARY",
            DataType::DateN => "DATE",
            DataType::DateTimeN => "DATETIME",
            DataType::DateTime2N => "DATETIME2",
            DataType::DateTimeOffsetN => "DATETIMEOFFSET",
            DataType::Bit => "BIT",
            DataType::SmallDateTime => "SMALLDATETIME",
            DataType::Money => "MONEY",
            DataType::DateTime => "DATETIME",
            DataType::SmallMoney => "SMALLMONEY",
            DataType::Guid => "UNIQUEIDENTIFIER",
            DataType::Decimal => "DECIMAL",
            DataType::Numeric => "NUMERIC",
            DataType::BitN => "BIT",
            DataType::DecimalN => "DECIMAL",
            DataType::NumericN => "NUMERIC",
            DataType::MoneyN => "MONEY",
            DataType::TimeN => "TIME",
            DataType::Xml => "XML",
            DataType::UserDefined => "USER_DEFINED_TYPE",
            DataType::Text => "TEXT",
            DataType::Image => "IMAGE",
            DataType::NText => "NTEXT",
            DataType::Variant => "SQL_VARIANT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fixed_length_int() {
        let mut buf = Bytes::from_static(&[0x38]);
        let ty = TypeInfo::get(&mut buf).unwrap();
        assert_eq!(ty.ty, DataType::Int);
        assert_eq!(ty.size, 4);
    }

    #[test]
    fn decodes_nvarchar_with_collation() {
        let mut buf = Bytes::from_static(&[
            0xe7, // NVarChar
            0x20, 0x00, // size = 32
            0x09, 0x04, 0x00, 0x00, // locale_sort_version (locale 0x0409 = en-US)
            0x00, // sort
        ]);
        let ty = TypeInfo::get(&mut buf).unwrap();
        assert_eq!(ty.ty, DataType::NVarChar);
        assert_eq!(ty.size, 32);
        assert!(ty.collation.is_some());
    }

    #[test]
    fn byte_len_value_round_trips_through_put_value_and_get_value() {
        let ty = TypeInfo::new(DataType::IntN, 4);
        let mut buf = Vec::new();
        ty.put_value(&mut buf, Some(&42i32.to_le_bytes()));

        let mut bytes = Bytes::from(buf);
        let value = ty.get_value(&mut bytes).unwrap();
        assert_eq!(i32::from_le_bytes(value.as_ref().try_into().unwrap()), 42);
    }

    #[test]
    fn byte_len_null_round_trips() {
        let ty = TypeInfo::new(DataType::IntN, 4);
        let mut buf = Vec::new();
        ty.put_value(&mut buf, None);

        let mut bytes = Bytes::from(buf);
        assert!(ty.get_value(&mut bytes).is_none());
    }
}
