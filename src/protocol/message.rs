//! The token-type dispatch used by `recv_message`: peeks the next token's type byte off the
//! current `TabularResult` buffer and decodes the matching token.

use bytes::{Buf, Bytes};

use crate::error::{err_protocol, Error};
use crate::protocol::done::Done;
use crate::protocol::fed_auth::FedAuthInfo;
use crate::protocol::feature_ext_ack::FeatureExtAck;
use crate::protocol::login_ack::LoginAck;
use crate::protocol::order::Order;
use crate::protocol::return_status::ReturnStatus;
use crate::protocol::return_value::ReturnValue;
use crate::protocol::row::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageType {
    EnvChange,
    Info,
    Error,
    Row,
    NbcRow,
    LoginAck,
    ReturnStatus,
    ReturnValue,
    Done,
    DoneInProc,
    DoneProc,
    Order,
    ColMetaData,
    FeatureExtAck,
    FedAuthInfo,
    Sspi,
    /// Sent only for `FOR BROWSE`/cursor metadata queries this driver never issues; drained and
    /// discarded rather than decoded.
    ColInfo,
    /// Same treatment as `ColInfo` — base table name(s) for a `FOR BROWSE` result set.
    TabName,
}

impl MessageType {
    /// Reads (and consumes) the next token-type byte from `buf`.
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        Ok(match buf.get_u8() {
            0xE3 => MessageType::EnvChange,
            0xAB => MessageType::Info,
            0xAA => MessageType::Error,
            0xD1 => MessageType::Row,
            0xD2 => MessageType::NbcRow,
            0xAD => MessageType::LoginAck,
            0x79 => MessageType::ReturnStatus,
            0xAC => MessageType::ReturnValue,
            0xFD => MessageType::Done,
            0xFF => MessageType::DoneInProc,
            0xFE => MessageType::DoneProc,
            0xA9 => MessageType::Order,
            0x81 => MessageType::ColMetaData,
            0xAE => MessageType::FeatureExtAck,
            0xEE => MessageType::FedAuthInfo,
            0xED => MessageType::Sspi,
            0xA5 => MessageType::ColInfo,
            0xA4 => MessageType::TabName,
            ty => return Err(err_protocol!("unsupported TDS token type 0x{:02x}", ty)),
        })
    }
}

/// A single item produced by the token stream that the connection surfaces to its caller;
/// tokens the driver fully handles internally (`EnvChange`, `Info`, `ColMetaData`) never reach
/// this enum — see `MssqlStream::recv_message`.
#[derive(Debug)]
pub(crate) enum Message {
    Row(Row),
    LoginAck(LoginAck),
    ReturnStatus(ReturnStatus),
    ReturnValue(ReturnValue),
    Done(Done),
    DoneInProc(Done),
    DoneProc(Done),
    Order(Order),
    FeatureExtAck(FeatureExtAck),
    FedAuthInfo(FedAuthInfo),
    /// A ROUTING env-change (the Azure SQL Database redirect token). Per §4.3, receiving one
    /// aborts further token-stream parsing — the caller must reopen the connection against
    /// `host`/`port` instead of continuing to read from this one.
    Redirect { host: String, port: u16 },
}
