//! The LOGIN7 message (§4.4, PKT_LOGON70 = 0x10): the fixed-offset, variable-length login
//! packet sent once PRELOGIN (and, if negotiated, TLS) have completed.

use crate::protocol::feature_ext::FeatureExt;

/// `OptionFlags1`/`OptionFlags2`/`TypeFlags` bits this driver actually sets. The rest of the
/// LOGIN7 option-flag surface (e.g. `fUserType`, `fSQLType`) is left at its zero default, which
/// matches every server this driver targets.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LoginOptions {
    pub(crate) integrated_security: bool,
    pub(crate) read_only_intent: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Login7 {
    pub(crate) tds_version: u32,
    pub(crate) packet_size: u32,
    pub(crate) client_prog_version: u32,
    pub(crate) client_pid: u32,
    pub(crate) connection_id: u32,
    pub(crate) options: LoginOptions,
    pub(crate) client_time_zone: i32,
    pub(crate) client_lcid: u32,

    pub(crate) host_name: String,
    pub(crate) user_name: String,
    pub(crate) password: String,
    pub(crate) app_name: String,
    pub(crate) server_name: String,
    pub(crate) library_name: String,
    pub(crate) language: String,
    pub(crate) database: String,
    pub(crate) client_id: [u8; 6],

    pub(crate) feature_ext: FeatureExt,
}

impl Login7 {
    /// Encodes the fixed header, the variable-length data block (in the LOGIN7 field order:
    /// host name, user name, password, app name, server name, <unused>, library name, language,
    /// database), and the feature-extension block the server-edition probe/AE/FedAuth layers
    /// populated.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        // The total-length field is patched in after the rest of the message is written.
        let length_pos = buf.len();
        buf.extend(&0u32.to_le_bytes());

        buf.extend(&self.tds_version.to_le_bytes());
        buf.extend(&self.packet_size.to_le_bytes());
        buf.extend(&self.client_prog_version.to_le_bytes());
        buf.extend(&self.client_pid.to_le_bytes());
        buf.extend(&self.connection_id.to_le_bytes());

        let mut option_flags1 = 0u8;
        option_flags1 |= 1 << 4; // fUseDB: change database to the one requested
        option_flags1 |= 1 << 5; // fSetLang
        buf.push(option_flags1);

        let mut option_flags2 = 0u8;
        if self.options.integrated_security {
            option_flags2 |= 1 << 7; // fIntSecurity
        }
        buf.push(option_flags2);

        let mut type_flags = 0u8;
        type_flags |= 1 << 5; // fOLEDB, matching sqlx's own LOGIN7 encoder
        buf.push(type_flags);

        let mut option_flags3 = 0u8;
        if self.options.read_only_intent {
            option_flags3 |= 1 << 5; // fReadOnlyIntent
        }
        buf.push(option_flags3);

        buf.extend(&self.client_time_zone.to_le_bytes());
        buf.extend(&self.client_lcid.to_le_bytes());

        // Variable-length data block: 5-byte (offset:u16, length:u16-in-chars) slots, patched
        // once every field's position relative to the block start is known.
        let offsets_pos = buf.len();
        const NUM_IDENT_FIELDS: usize = 9;
        buf.resize(buf.len() + NUM_IDENT_FIELDS * 4, 0);

        buf.extend(&self.client_id);

        // Two more offset/length slots (SSPI, AtchDBFile) plus the change-password slot plus
        // the unused-long-SSPI-length field, all zeroed since this driver doesn't use them.
        buf.extend(&0u32.to_le_bytes()); // cbSSPI offset/length
        buf.extend(&0u32.to_le_bytes()); // cbAtchDBFile offset/length
        buf.extend(&0u32.to_le_bytes()); // cbChangePassword offset/length
        buf.extend(&0u32.to_le_bytes()); // cbSSPILong

        let data_start = buf.len();
        let mut slot = offsets_pos;

        let put_field = |buf: &mut Vec<u8>, slot: &mut usize, data_start: usize, s: &str| {
            let units: Vec<u16> = s.encode_utf16().collect();
            let char_len = u16::try_from(units.len()).expect("LOGIN7 field too long");
            let rel_offset = u16::try_from(buf.len() - data_start).unwrap();

            buf[*slot..*slot + 2].copy_from_slice(&rel_offset.to_le_bytes());
            buf[*slot + 2..*slot + 4].copy_from_slice(&char_len.to_le_bytes());
            *slot += 4;

            for unit in units {
                buf.extend_from_slice(&unit.to_le_bytes());
            }
        };

        put_field(buf, &mut slot, data_start, &self.host_name);
        put_field(buf, &mut slot, data_start, &self.user_name);

        // Password: XOR 0xA5 with nibble-swap obfuscation (§4.4), written byte-for-byte rather
        // than through `put_field`'s straight UTF-16 copy.
        {
            let rel_offset = u16::try_from(buf.len() - data_start).unwrap();
            let units: Vec<u16> = self.password.encode_utf16().collect();
            let char_len = u16::try_from(units.len()).expect("password too long");
            buf[slot..slot + 2].copy_from_slice(&rel_offset.to_le_bytes());
            buf[slot + 2..slot + 4].copy_from_slice(&char_len.to_le_bytes());
            slot += 4;

            for unit in units {
                for byte in unit.to_le_bytes() {
                    let scrambled = byte ^ 0xA5;
                    let swapped = (scrambled << 4) | (scrambled >> 4);
                    buf.push(swapped);
                }
            }
        }

        put_field(buf, &mut slot, data_start, &self.app_name);
        put_field(buf, &mut slot, data_start, &self.server_name);

        // Unused reserved field (`cbExtension` in newer servers; empty here).
        put_field(buf, &mut slot, data_start, "");

        put_field(buf, &mut slot, data_start, &self.library_name);
        put_field(buf, &mut slot, data_start, &self.language);
        put_field(buf, &mut slot, data_start, &self.database);

        self.feature_ext.encode(buf);

        let total_len = u32::try_from(buf.len() - length_pos).expect("LOGIN7 message too large");
        buf[length_pos..length_pos + 4].copy_from_slice(&total_len.to_le_bytes());
    }
}
