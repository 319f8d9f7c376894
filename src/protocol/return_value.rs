//! The RETURNVALUE token (§4.2): an output parameter value, or a stored procedure's own
//! single scalar return value, carried back from an RPC call.

use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::protocol::get_b_varchar;
use crate::protocol::type_info::TypeInfo;

#[derive(Debug, Clone)]
pub(crate) struct ReturnValue {
    pub(crate) param_ordinal: u16,
    pub(crate) param_name: String,
    pub(crate) status: u8,
    pub(crate) user_type: u32,
    pub(crate) flags: u16,
    pub(crate) type_info: TypeInfo,
    pub(crate) value: Option<Bytes>,
}

impl ReturnValue {
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let param_ordinal = buf.get_u16_le();
        let param_name = get_b_varchar(buf)?;
        let status = buf.get_u8();
        let user_type = buf.get_u32_le();
        let flags = buf.get_u16_le();
        let type_info = TypeInfo::get(buf)?;
        let value = type_info.get_value(buf);

        Ok(Self {
            param_ordinal,
            param_name,
            status,
            user_type,
            flags,
            type_info,
            value,
        })
    }
}
