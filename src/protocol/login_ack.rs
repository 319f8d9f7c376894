//! The LOGINACK token (§4.2): the server's acknowledgment of a successful LOGIN7, carrying the
//! negotiated TDS version.

use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::protocol::get_b_varchar;

#[derive(Debug, Clone)]
pub(crate) struct LoginAck {
    pub(crate) interface: u8,
    pub(crate) tds_version: u32,
    pub(crate) prog_name: String,
    pub(crate) prog_version: u32,
}

impl LoginAck {
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let _length = buf.get_u16_le();

        let interface = buf.get_u8();
        let tds_version = buf.get_u32_le();
        let prog_name = get_b_varchar(buf)?;
        let prog_version = buf.get_u32_le();

        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }
}
