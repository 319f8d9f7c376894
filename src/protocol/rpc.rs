//! The RPC request message (§4.4/§4.5, `PacketType::Rpc`): invokes a stored procedure — either
//! a user procedure by name or a well-known system procedure by numeric id (most commonly
//! `sp_executesql`, id 10, which is how this driver sends ad-hoc SQL batches with parameters).

use crate::encryption::crypto_metadata::CryptoMetadata;
use crate::protocol::type_info::TypeInfo;

/// Well-known system stored procedure ids (`NameLenProcID` form, avoiding a name round trip).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum SystemProcId {
    Cursor = 1,
    CursorOpen = 2,
    CursorPrepare = 3,
    CursorExecute = 4,
    CursorPrepExec = 5,
    CursorUnprepare = 6,
    CursorFetch = 7,
    CursorOption = 8,
    CursorClose = 9,
    ExecuteSql = 10,
    Prepare = 11,
    Execute = 12,
    PrepExec = 13,
    PrepExecRpc = 14,
    Unprepare = 15,
}

#[derive(Debug, Clone)]
pub(crate) enum ProcIdentifier {
    Name(String),
    System(SystemProcId),
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct ParamStatus: u8 {
        const BY_REF_OUTPUT = 1 << 0;
        const DEFAULT_VALUE = 1 << 1;
        const ENCRYPTED = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RpcParam {
    pub(crate) name: String,
    pub(crate) status: ParamStatus,
    pub(crate) type_info: TypeInfo,
    pub(crate) value: Option<Vec<u8>>,
    /// Present only when `status` contains `ENCRYPTED`; encoded right after `type_info` and
    /// before `value`, mirroring how COLMETADATA attaches crypto metadata to an encrypted column.
    pub(crate) crypto_metadata: Option<CryptoMetadata>,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct RpcOptionFlags: u16 {
        const WITH_RECOMPILE = 1 << 0;
        const NO_METADATA = 1 << 1;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RpcRequest {
    pub(crate) transaction_descriptor: u64,
    pub(crate) outstanding_request_count: u32,
    pub(crate) proc: ProcIdentifier,
    pub(crate) options: RpcOptionFlags,
    pub(crate) params: Vec<RpcParam>,
}

impl RpcRequest {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        self.encode_all_headers(buf);

        match &self.proc {
            ProcIdentifier::Name(name) => crate::protocol::put_us_varchar(buf, name),
            ProcIdentifier::System(id) => {
                buf.extend(&0xFFFFu16.to_le_bytes());
                buf.extend(&(*id as u16).to_le_bytes());
            }
        }

        buf.extend(&self.options.bits().to_le_bytes());

        for param in &self.params {
            buf.push(u8::try_from(param.name.encode_utf16().count()).expect("param name too long"));
            for unit in param.name.encode_utf16() {
                buf.extend(&unit.to_le_bytes());
            }

            buf.push(param.status.bits());
            param.type_info.put(buf);
            if let Some(crypto_metadata) = &param.crypto_metadata {
                crypto_metadata.put(buf);
            }
            param.type_info.put_value(buf, param.value.as_deref());
        }
    }

    /// ALL_HEADERS: one `Transaction Descriptor` header so the server associates this RPC with
    /// the connection's current (possibly nested) transaction.
    fn encode_all_headers(&self, buf: &mut Vec<u8>) {
        const HEADER_TYPE_TRANSACTION_DESCRIPTOR: u16 = 2;

        let header_len: u32 = 4 + 2 + 8 + 4;
        let total_len: u32 = 4 + header_len;

        buf.extend(&total_len.to_le_bytes());
        buf.extend(&header_len.to_le_bytes());
        buf.extend(&HEADER_TYPE_TRANSACTION_DESCRIPTOR.to_le_bytes());
        buf.extend(&self.transaction_descriptor.to_le_bytes());
        buf.extend(&self.outstanding_request_count.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::type_info::DataType;

    #[test]
    fn encodes_execute_sql_with_one_parameter() {
        let request = RpcRequest {
            transaction_descriptor: 0,
            outstanding_request_count: 1,
            proc: ProcIdentifier::System(SystemProcId::ExecuteSql),
            options: RpcOptionFlags::empty(),
            params: vec![RpcParam {
                name: "@p1".to_string(),
                status: ParamStatus::empty(),
                type_info: TypeInfo::new(DataType::IntN, 4),
                value: Some(7i32.to_le_bytes().to_vec()),
                crypto_metadata: None,
            }],
        };

        let mut buf = Vec::new();
        request.encode(&mut buf);

        // ALL_HEADERS total length (4) + header length (4) = 18, then NameLenProcID marker.
        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 18);
        assert_eq!(u16::from_le_bytes(buf[18..20].try_into().unwrap()), 0xFFFF);
        assert_eq!(
            u16::from_le_bytes(buf[20..22].try_into().unwrap()),
            SystemProcId::ExecuteSql as u16
        );
    }
}
