//! TDS packet header (§4.2): the 8-byte frame every PRELOGIN/LOGIN7/SQL-batch/TDS-response
//! message is chunked into.

use bitflags::bitflags;
use bytes::{Buf, Bytes};

use crate::error::{err_protocol, Error};
use crate::io::{Decode, Encode};

pub(crate) const PACKET_HEADER_SIZE: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PacketType {
    SqlBatch = 1,
    PreTds7Login = 2,
    Rpc = 3,
    TabularResult = 4,
    AttentionSignal = 6,
    BulkLoadData = 7,
    FedAuthToken = 8,
    TransactionManagerRequest = 14,
    Tds7Login = 16,
    Sspi = 17,
    PreLogin = 18,
}

impl PacketType {
    fn try_from_u8(b: u8) -> Result<Self, Error> {
        Ok(match b {
            1 => PacketType::SqlBatch,
            2 => PacketType::PreTds7Login,
            3 => PacketType::Rpc,
            4 => PacketType::TabularResult,
            6 => PacketType::AttentionSignal,
            7 => PacketType::BulkLoadData,
            8 => PacketType::FedAuthToken,
            14 => PacketType::TransactionManagerRequest,
            16 => PacketType::Tds7Login,
            17 => PacketType::Sspi,
            18 => PacketType::PreLogin,
            _ => return Err(err_protocol!("unknown TDS packet type 0x{:02x}", b)),
        })
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub(crate) struct Status: u8 {
        const NORMAL = 0x00;
        const END_OF_MESSAGE = 0x01;
        const IGNORE_EVENT = 0x02;
        const RESET_CONNECTION = 0x08;
        const RESET_CONNECTION_SKIP_TRAN = 0x10;
    }
}

/// The packet header. `length` is the *whole* packet's length, header included.
#[derive(Debug, Copy, Clone)]
pub(crate) struct PacketHeader {
    pub(crate) r#type: PacketType,
    pub(crate) status: Status,
    pub(crate) length: u16,
    pub(crate) server_process_id: u16,
    pub(crate) packet_id: u8,
}

impl<'de> Decode<'de> for PacketHeader {
    fn decode_with(mut buf: Bytes, _: ()) -> Result<Self, Error> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(err_protocol!(
                "TDS packet header too short: {} bytes",
                buf.len()
            ));
        }

        let r#type = PacketType::try_from_u8(buf.get_u8())?;
        let status = Status::from_bits_truncate(buf.get_u8());
        let length = buf.get_u16();
        let server_process_id = buf.get_u16();
        let packet_id = buf.get_u8();
        let _window = buf.get_u8();

        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(err_protocol!(
                "TDS packet length {} is smaller than the header itself",
                length
            ));
        }

        Ok(Self {
            r#type,
            status,
            length,
            server_process_id,
            packet_id,
        })
    }
}

impl Encode<'_> for PacketHeader {
    fn encode_with(&self, buf: &mut Vec<u8>, _: ()) {
        buf.push(self.r#type as u8);
        buf.push(self.status.bits());
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.extend_from_slice(&self.server_process_id.to_be_bytes());
        buf.push(self.packet_id);
        buf.push(0); // window, unused
    }
}

/// Splits `payload` into one or more TDS packets of at most `max_packet_size` bytes (header
/// included), writing the headers and EOM flag, and appends the whole framed message to
/// `buffer`. `buffer` must be empty on entry.
pub(crate) fn write_packets<'en, T: Encode<'en>>(
    buffer: &mut Vec<u8>,
    max_packet_size: usize,
    ty: PacketType,
    payload: T,
) {
    assert!(buffer.is_empty());

    let mut packet_header = [0u8; PACKET_HEADER_SIZE].to_vec();
    buffer.extend_from_slice(&packet_header);

    payload.encode(buffer);

    let len = buffer.len() - PACKET_HEADER_SIZE;

    let max_packet_contents_size = max_packet_size - PACKET_HEADER_SIZE;
    let mut packet_count = len / max_packet_contents_size;
    let last_packet_contents_size = len % max_packet_contents_size;
    if last_packet_contents_size > 0 {
        packet_count += 1;
    }
    if packet_count == 0 {
        packet_count = 1;
    }

    buffer.resize(len + PACKET_HEADER_SIZE * packet_count, 0);

    for packet_index in (0..packet_count).rev() {
        let header_start = packet_index * max_packet_size;
        let target_contents_start = header_start + PACKET_HEADER_SIZE;
        let is_last = packet_index + 1 == packet_count;
        let packet_contents_size = if is_last && last_packet_contents_size > 0 {
            last_packet_contents_size
        } else {
            max_packet_contents_size
        };
        let packet_size = packet_contents_size + PACKET_HEADER_SIZE;
        let current_contents_start = PACKET_HEADER_SIZE + packet_index * max_packet_contents_size;
        let current_contents_end = current_contents_start + packet_contents_size;

        if current_contents_start != target_contents_start {
            assert!(current_contents_start < target_contents_start);
            buffer.copy_within(
                current_contents_start..current_contents_end,
                target_contents_start,
            );
        }

        packet_header.truncate(0);
        PacketHeader {
            r#type: ty,
            status: if is_last {
                Status::END_OF_MESSAGE
            } else {
                Status::NORMAL
            },
            length: u16::try_from(packet_size).expect("packet size impossibly large"),
            server_process_id: 0,
            // Sequence numbers start at 1 and wrap modulo 256 (§3's packet-chain invariant).
            packet_id: (packet_index as u8).wrapping_add(1),
        }
        .encode(&mut packet_header);
        assert_eq!(packet_header.len(), PACKET_HEADER_SIZE);
        buffer[header_start..target_contents_start].copy_from_slice(&packet_header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_packets_splits_across_packet_boundaries() {
        let mut buffer = Vec::<u8>::new();
        write_packets(
            &mut buffer,
            PACKET_HEADER_SIZE + 4,
            PacketType::Rpc,
            &b"123456789"[..],
        );
        let expected = b"\
            \x03\x00\x00\x0C\x00\x00\x01\x00\
            1234\
            \x03\x00\x00\x0C\x00\x00\x02\x00\
            5678\
            \x03\x01\x00\x09\x00\x00\x03\x00\
            9";
        assert_eq!(buffer, expected);
    }

    #[test]
    fn write_packets_exact_multiple_of_packet_size() {
        let mut buffer = Vec::<u8>::new();
        write_packets(
            &mut buffer,
            PACKET_HEADER_SIZE + 4,
            PacketType::Rpc,
            &b"12345678"[..],
        );
        let expected = b"\
            \x03\x00\x00\x0C\x00\x00\x01\x00\
            1234\
            \x03\x01\x00\x0C\x00\x00\x02\x00\
            5678";
        assert_eq!(buffer, expected);
    }

    #[test]
    fn write_packets_assigns_contiguous_sequence_numbers() {
        let mut buffer = Vec::<u8>::new();
        write_packets(
            &mut buffer,
            PACKET_HEADER_SIZE + 4,
            PacketType::Rpc,
            &b"ABCDEFGHIJKLMNOPQRST"[..], // 20 bytes => 5 packets of 4 content bytes each
        );

        let packet_size = PACKET_HEADER_SIZE + 4;
        let packet_ids: Vec<u8> = (0..5)
            .map(|i| buffer[i * packet_size + 6])
            .collect();
        assert_eq!(packet_ids, vec![1, 2, 3, 4, 5]);

        // Only the last packet carries EOM.
        for (i, chunk) in buffer.chunks(packet_size).enumerate() {
            let is_last = i == 4;
            assert_eq!(chunk[1] & 0x01 != 0, is_last);
        }
    }

    #[test]
    fn write_packets_wraps_sequence_numbers_modulo_256() {
        // Force 257 one-byte packets so the sequence counter wraps past 255 back to 0.
        let payload = vec![b'x'; 257];
        let mut buffer = Vec::<u8>::new();
        write_packets(&mut buffer, PACKET_HEADER_SIZE + 1, PacketType::Rpc, &payload[..]);

        let packet_size = PACKET_HEADER_SIZE + 1;
        let packet_ids: Vec<u8> = (0..257).map(|i| buffer[i * packet_size + 6]).collect();

        assert_eq!(packet_ids[0], 1);
        assert_eq!(packet_ids[254], 255);
        assert_eq!(packet_ids[255], 0);
        assert_eq!(packet_ids[256], 1);
    }

    #[test]
    fn header_round_trips() {
        let header = PacketHeader {
            r#type: PacketType::TabularResult,
            status: Status::END_OF_MESSAGE,
            length: 4096,
            server_process_id: 52,
            packet_id: 1,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);

        let decoded = PacketHeader::decode(Bytes::from(buf)).unwrap();
        assert_eq!(decoded.length, 4096);
        assert_eq!(decoded.server_process_id, 52);
        assert!(decoded.status.contains(Status::END_OF_MESSAGE));
    }
}
