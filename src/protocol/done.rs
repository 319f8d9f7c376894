//! DONE / DONEPROC / DONEINPROC tokens (§4.2): mark the completion of a SQL batch, a stored
//! procedure, or a statement nested inside one.

use bitflags::bitflags;
use bytes::{Buf, Bytes};

use crate::error::Error;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub(crate) struct Status: u16 {
        /// More results follow in the same command (e.g. more statements in a batch).
        const DONE_MORE = 0x0001;
        /// The command ended in an error.
        const DONE_ERROR = 0x0002;
        /// A transaction is in progress.
        const DONE_INXACT = 0x0004;
        /// `row_count` is valid.
        const DONE_COUNT = 0x0010;
        /// The command acknowledges a client ATTENTION.
        const DONE_ATTN = 0x0020;
        /// A server error aborted the current command.
        const DONE_SRVERROR = 0x0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Done {
    pub(crate) status: Status,
    pub(crate) cur_cmd: u16,
    pub(crate) row_count: u64,
}

impl Done {
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let status = Status::from_bits_truncate(buf.get_u16_le());
        let cur_cmd = buf.get_u16_le();
        let row_count = buf.get_u64_le();

        Ok(Self {
            status,
            cur_cmd,
            row_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_done_with_row_count() {
        let mut buf = Bytes::from(
            [
                Status::DONE_COUNT.bits().to_le_bytes().to_vec(),
                0u16.to_le_bytes().to_vec(),
                5u64.to_le_bytes().to_vec(),
            ]
            .concat(),
        );

        let done = Done::get(&mut buf).unwrap();
        assert!(done.status.contains(Status::DONE_COUNT));
        assert!(!done.status.contains(Status::DONE_MORE));
        assert_eq!(done.row_count, 5);
    }
}
