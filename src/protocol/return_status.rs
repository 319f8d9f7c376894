//! The RETURNSTATUS token (§4.2): the integer return code of a stored procedure call, sent
//! before any RETURNVALUE or DONEPROC tokens for that call.

use bytes::{Buf, Bytes};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReturnStatus(pub(crate) i32);

impl ReturnStatus {
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(Self(buf.get_i32_le()))
    }
}
