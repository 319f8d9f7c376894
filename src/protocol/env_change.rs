//! The ENVCHANGE token (§4.2): the server's way of announcing session-state changes —
//! database switches, packet-size renegotiation, transaction begin/commit/rollback, and
//! connection redirection (`ROUTING`, used by Azure SQL).

use bytes::{Buf, Bytes};

use crate::error::{err_protocol, Error};
use crate::protocol::get_b_varchar;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EnvChange {
    Database(String),
    PacketSize(u32),
    BeginTransaction(u64),
    CommitTransaction(u64),
    RollbackTransaction(u64),
    Routing { host: String, port: u16 },
    /// Any other environment change this driver doesn't act on (language, collation, …).
    Other { env_type: u8 },
}

impl EnvChange {
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let length = buf.get_u16_le() as usize;
        if buf.remaining() < length {
            return Err(err_protocol!(
                "ENVCHANGE: length {} exceeds remaining buffer ({})",
                length,
                buf.remaining()
            ));
        }

        let mut body = buf.split_to(length);
        let env_type = body.get_u8();

        Ok(match env_type {
            1 => {
                let new_value = get_b_varchar(&mut body)?;
                let _old_value = get_b_varchar(&mut body)?;
                EnvChange::Database(new_value)
            }

            4 => {
                let new_value = get_b_varchar(&mut body)?;
                let _old_value = get_b_varchar(&mut body)?;
                let size: u32 = new_value
                    .parse()
                    .map_err(|_| err_protocol!("ENVCHANGE: invalid packet size {:?}", new_value))?;
                EnvChange::PacketSize(size)
            }

            8 | 11 => {
                let descriptor = get_binary_env_value(&mut body)?;
                let _old = get_binary_env_value(&mut body)?;
                EnvChange::BeginTransaction(descriptor)
            }

            9 => {
                let descriptor = get_binary_env_value(&mut body)?;
                let _old = get_binary_env_value(&mut body)?;
                EnvChange::CommitTransaction(descriptor)
            }

            10 => {
                let descriptor = get_binary_env_value(&mut body)?;
                let _old = get_binary_env_value(&mut body)?;
                EnvChange::RollbackTransaction(descriptor)
            }

            20 => {
                let (host, port) = get_routing_value(&mut body)?;
                EnvChange::Routing { host, port }
            }

            other => EnvChange::Other { env_type: other },
        })
    }
}

/// Transaction-descriptor env-change values are length-prefixed opaque binary (8-byte little
/// endian descriptor, in practice), not strings.
fn get_binary_env_value(buf: &mut Bytes) -> Result<u64, Error> {
    let len = buf.get_u8() as usize;
    if len == 0 {
        return Ok(0);
    }
    if len > 8 {
        return Err(err_protocol!(
            "ENVCHANGE: transaction descriptor longer than 8 bytes ({})",
            len
        ));
    }

    let mut raw = [0u8; 8];
    for byte in raw.iter_mut().take(len) {
        *byte = buf.get_u8();
    }
    Ok(u64::from_le_bytes(raw))
}

fn get_routing_value(buf: &mut Bytes) -> Result<(String, u16), Error> {
    let _routing_len = buf.get_u16_le();
    let _protocol = buf.get_u8();
    let port = buf.get_u16_le();
    let server_len = buf.get_u16_le() as usize;

    let mut units = Vec::with_capacity(server_len);
    for _ in 0..server_len {
        units.push(buf.get_u16_le());
    }
    let host = String::from_utf16(&units)
        .map_err(|_| err_protocol!("ENVCHANGE: invalid UTF-16 in routing hostname"))?;

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_database_change() {
        let mut buf = Vec::new();
        let mut body = Vec::new();
        body.push(1u8); // env_type = Database
        crate::protocol::put_b_varchar(&mut body, "new_db");
        crate::protocol::put_b_varchar(&mut body, "old_db");

        buf.extend((body.len() as u16).to_le_bytes());
        buf.extend(body);

        let mut bytes = Bytes::from(buf);
        let change = EnvChange::get(&mut bytes).unwrap();
        assert_eq!(change, EnvChange::Database("new_db".to_string()));
    }

    #[test]
    fn decodes_routing() {
        let mut body = Vec::new();
        body.push(20u8); // env_type = Routing

        let host: Vec<u16> = "redirect.example.com".encode_utf16().collect();
        let mut routing_value = Vec::new();
        routing_value.push(0u8); // protocol
        routing_value.extend(1433u16.to_le_bytes());
        routing_value.extend((host.len() as u16).to_le_bytes());
        for unit in &host {
            routing_value.extend(unit.to_le_bytes());
        }

        body.extend((routing_value.len() as u16).to_le_bytes());
        body.extend(routing_value);

        let mut buf = Vec::new();
        buf.extend((body.len() as u16).to_le_bytes());
        buf.extend(body);

        let mut bytes = Bytes::from(buf);
        let change = EnvChange::get(&mut bytes).unwrap();
        assert_eq!(
            change,
            EnvChange::Routing {
                host: "redirect.example.com".to_string(),
                port: 1433,
            }
        );
    }
}
