//! The ERROR token (§4.2): a server-reported error, carried alongside (not instead of) the
//! DONE token that ends the failed command.

use bytes::{Buf, Bytes};

use crate::error::{Error, ServerMessage};
use crate::protocol::{get_b_varchar, get_us_varchar};

pub(crate) struct ErrorToken(pub(crate) ServerMessage);

impl ErrorToken {
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let _length = buf.get_u16_le();

        let number = buf.get_i32_le();
        let state = buf.get_u8();
        let class = buf.get_u8();

        let message = get_us_varchar(buf)?;
        let server_name = get_b_varchar(buf)?;
        let procedure_name = get_b_varchar(buf)?;
        let line_number = buf.get_u32_le();

        Ok(Self(ServerMessage {
            number,
            state,
            class,
            message,
            server_name,
            procedure_name,
            line_number,
        }))
    }
}
