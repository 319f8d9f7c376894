//! Ad-hoc SQL batch execution (§3/§4.2/§4.4): sends a `SqlBatch` packet, drains its token stream,
//! and enforces the connection's cooperative query timeout by racing the token reader against
//! the command's timer and sending an ATTENTION signal on expiry.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::connection::MssqlConnection;
use crate::encryption::aead;
use crate::encryption::cek::CekTable;
use crate::encryption::crypto_metadata::{CryptoMetadata, ALGORITHM_ID_AEAD_AES_256_CBC_HMAC_SHA256};
use crate::encryption::describe;
use crate::error::Error;
use crate::io::Encode;
use crate::param::{self, MssqlParam};
use crate::protocol::col_meta_data::MssqlColumn;
use crate::protocol::done::Status as DoneStatus;
use crate::protocol::message::Message;
use crate::protocol::packet::PacketType;
use crate::protocol::row::Row as WireRow;
use crate::protocol::rpc::{ParamStatus, ProcIdentifier, RpcOptionFlags, RpcParam, RpcRequest, SystemProcId};
use crate::protocol::type_info::{DataType, TypeInfo};
use crate::query_result::MssqlQueryResult;
use crate::row::MssqlRow;
use crate::statement::Command;

struct SqlBatch<'a>(&'a str);

impl Encode<'_> for SqlBatch<'_> {
    fn encode_with(&self, buf: &mut Vec<u8>, _: ()) {
        // ALL_HEADERS with no headers present is just its own 4-byte total-length field.
        buf.extend(&4u32.to_le_bytes());
        for unit in self.0.encode_utf16() {
            buf.extend(&unit.to_le_bytes());
        }
    }
}

impl MssqlConnection {
    /// Runs `sql` as a single ad-hoc batch and returns the number of rows it affected. Any
    /// result set the batch produces is drained but not collected; use [`Self::fetch_all`] when
    /// the rows themselves are wanted.
    pub async fn execute(&mut self, sql: &str) -> Result<MssqlQueryResult, Error> {
        let (_, result) = match self.run_batch(sql, false).await {
            Err(e) if e.is_broken_connection() => {
                self.reconnect_mid_query().await?;
                self.run_batch(sql, false).await?
            }
            other => other?,
        };
        Ok(result)
    }

    /// Runs `sql` as a single ad-hoc batch and collects every row of its result set.
    pub async fn fetch_all(&mut self, sql: &str) -> Result<Vec<MssqlRow>, Error> {
        let (rows, _) = match self.run_batch(sql, true).await {
            Err(e) if e.is_broken_connection() => {
                self.reconnect_mid_query().await?;
                self.run_batch(sql, true).await?
            }
            other => other?,
        };
        Ok(rows)
    }

    /// Runs `sql` via `sp_executesql` with `params` bound positionally as `@p1, @p2, ...`, and
    /// returns the number of rows it affected. When column encryption is enabled, each parameter
    /// is encrypted before it's sent if `sp_describe_parameter_encryption` reports the column
    /// it's bound to is encrypted (§4.5).
    pub async fn execute_with_params(&mut self, sql: &str, params: &[MssqlParam]) -> Result<MssqlQueryResult, Error> {
        let (_, result) = match self.run_rpc_batch(sql, params, false).await {
            Err(e) if e.is_broken_connection() => {
                self.reconnect_mid_query().await?;
                self.run_rpc_batch(sql, params, false).await?
            }
            other => other?,
        };
        Ok(result)
    }

    /// Runs `sql` via `sp_executesql` with `params` bound positionally, collecting every row of
    /// its result set. See [`Self::execute_with_params`] for the encryption behavior.
    pub async fn fetch_all_with_params(&mut self, sql: &str, params: &[MssqlParam]) -> Result<Vec<MssqlRow>, Error> {
        let (rows, _) = match self.run_rpc_batch(sql, params, true).await {
            Err(e) if e.is_broken_connection() => {
                self.reconnect_mid_query().await?;
                self.run_rpc_batch(sql, params, true).await?
            }
            other => other?,
        };
        Ok(rows)
    }

    /// Runs `USE [database]` to restore the session's current database after a mid-query
    /// reconnect, bracket-escaping the name so an adversarial database name can't break out of
    /// the statement.
    pub(super) async fn switch_database(&mut self, database: &str) -> Result<(), Error> {
        let escaped = database.replace(']', "]]");
        let (_, _) = self.run_batch(&format!("USE [{escaped}]"), false).await?;
        Ok(())
    }

    async fn run_batch(
        &mut self,
        sql: &str,
        collect_rows: bool,
    ) -> Result<(Vec<MssqlRow>, MssqlQueryResult), Error> {
        self.stream.wait_until_ready().await?;

        let mut command = Command::new(self.options.query_timeout, self.options.cancel_query_timeout);
        let timed_out = Arc::new(Notify::new());
        let on_expire = Arc::clone(&timed_out);
        command.arm_timeout(move || on_expire.notify_one());

        self.stream.pending_done_count += 1;
        self.stream
            .write_packet_and_flush(PacketType::SqlBatch, SqlBatch(sql))
            .await?;
        command.begin_response_reading();

        let mut rows = Vec::new();
        let mut rows_affected = 0u64;
        let mut columns: Option<Arc<[MssqlColumn]>> = None;

        loop {
            let message = tokio::select! {
                biased;
                _ = timed_out.notified() => {
                    self.cancel_command(&command).await?;
                    return Err(Error::Timeout(
                        self.options.query_timeout.unwrap_or_else(|| command.cancel_query_timeout()),
                    ));
                }
                message = self.stream.recv_message() => message?,
            };

            match message {
                Message::Row(row) => {
                    if collect_rows {
                        let columns = columns
                            .get_or_insert_with(|| Arc::from(self.stream.columns.clone()))
                            .clone();
                        rows.push(MssqlRow::new(columns, row, self.cek_table.as_ref())?);
                    }
                }
                Message::Done(done) | Message::DoneProc(done) | Message::DoneInProc(done) => {
                    if done.status.contains(DoneStatus::DONE_COUNT) {
                        rows_affected = done.row_count;
                    }
                    if !done.status.contains(DoneStatus::DONE_MORE) {
                        self.stream.handle_done(&done);
                        break;
                    }
                }
                Message::Redirect { host, port } => {
                    return Err(Error::Redirect { host, port });
                }
                _ => {}
            }
        }

        command.disarm_timeout();
        Ok((rows, MssqlQueryResult::new(rows_affected)))
    }

    /// Sends an ATTENTION signal and drains the token stream until the server's DONE(ATTN)
    /// acknowledges it, bounded by `cancel_query_timeout` — a server that never acknowledges an
    /// attention is treated as unreachable rather than waited on forever.
    async fn cancel_command(&mut self, command: &Command) -> Result<(), Error> {
        command.interrupt("query timeout elapsed");
        self.stream
            .write_packet_and_flush(PacketType::AttentionSignal, &[][..])
            .await?;

        let wait = tokio::time::timeout(command.cancel_query_timeout(), async {
            loop {
                match self.stream.recv_message().await? {
                    Message::Done(done) | Message::DoneProc(done) | Message::DoneInProc(done) => {
                        let acknowledged = done.status.contains(DoneStatus::DONE_ATTN);
                        if !done.status.contains(DoneStatus::DONE_MORE) {
                            self.stream.handle_done(&done);
                        }
                        if acknowledged {
                            return Ok(());
                        }
                    }
                    Message::Redirect { host, port } => {
                        return Err(Error::Redirect { host, port });
                    }
                    _ => {}
                }
            }
        });

        match wait.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Runs `sql` through `sp_executesql`, first running `sp_describe_parameter_encryption` and
    /// encrypting any parameter it reports is bound to an encrypted column — only when the
    /// server actually granted the column-encryption feature extension at login.
    async fn run_rpc_batch(
        &mut self,
        sql: &str,
        params: &[MssqlParam],
        collect_rows: bool,
    ) -> Result<(Vec<MssqlRow>, MssqlQueryResult), Error> {
        let rpc_params = if self.column_encryption_enabled {
            let param_metadata = self.run_describe(sql, params).await?;
            self.encrypt_params(params, &param_metadata)?
        } else {
            params
                .iter()
                .enumerate()
                .map(|(i, param)| RpcParam {
                    name: format!("@p{}", i + 1),
                    status: ParamStatus::empty(),
                    type_info: param.type_info(),
                    value: param.wire_value(),
                    crypto_metadata: None,
                })
                .collect()
        };

        let declarations = param::declarations(params);
        let mut all_params = Vec::with_capacity(rpc_params.len() + 2);
        all_params.push(Self::nvarchar_literal_param(sql));
        if !declarations.is_empty() {
            all_params.push(Self::nvarchar_literal_param(&declarations));
        }
        all_params.extend(rpc_params);

        let request = RpcRequest {
            transaction_descriptor: self.stream.transaction_descriptor,
            outstanding_request_count: 1,
            proc: ProcIdentifier::System(SystemProcId::ExecuteSql),
            options: RpcOptionFlags::empty(),
            params: all_params,
        };

        self.stream.wait_until_ready().await?;

        let mut command = Command::new(self.options.query_timeout, self.options.cancel_query_timeout);
        let timed_out = Arc::new(Notify::new());
        let on_expire = Arc::clone(&timed_out);
        command.arm_timeout(move || on_expire.notify_one());

        let mut buf = Vec::new();
        request.encode(&mut buf);

        self.stream.pending_done_count += 1;
        self.stream
            .write_packet_and_flush(PacketType::Rpc, &buf[..])
            .await?;
        command.begin_response_reading();

        let mut rows = Vec::new();
        let mut rows_affected = 0u64;
        let mut columns: Option<Arc<[MssqlColumn]>> = None;

        loop {
            let message = tokio::select! {
                biased;
                _ = timed_out.notified() => {
                    self.cancel_command(&command).await?;
                    return Err(Error::Timeout(
                        self.options.query_timeout.unwrap_or_else(|| command.cancel_query_timeout()),
                    ));
                }
                message = self.stream.recv_message() => message?,
            };

            match message {
                Message::Row(row) => {
                    if collect_rows {
                        let columns = columns
                            .get_or_insert_with(|| Arc::from(self.stream.columns.clone()))
                            .clone();
                        rows.push(MssqlRow::new(columns, row, self.cek_table.as_ref())?);
                    }
                }
                Message::Done(done) | Message::DoneProc(done) | Message::DoneInProc(done) => {
                    if done.status.contains(DoneStatus::DONE_COUNT) {
                        rows_affected = done.row_count;
                    }
                    if !done.status.contains(DoneStatus::DONE_MORE) {
                        self.stream.handle_done(&done);
                        break;
                    }
                }
                Message::Redirect { host, port } => {
                    return Err(Error::Redirect { host, port });
                }
                _ => {}
            }
        }

        command.disarm_timeout();
        Ok((rows, MssqlQueryResult::new(rows_affected)))
    }

    fn nvarchar_literal_param(text: &str) -> RpcParam {
        RpcParam {
            name: String::new(),
            status: ParamStatus::empty(),
            type_info: TypeInfo::new(DataType::NVarChar, (text.encode_utf16().count() * 2) as u32),
            value: Some(text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()),
            crypto_metadata: None,
        }
    }

    /// Runs `sp_describe_parameter_encryption` for `sql`/`params`, loading the returned CEK table
    /// into `self.cek_table` and returning the per-parameter crypto metadata the real
    /// `sp_executesql` call needs to encrypt values before sending them.
    async fn run_describe(
        &mut self,
        sql: &str,
        params: &[MssqlParam],
    ) -> Result<Vec<describe::ParamCryptoMetadata>, Error> {
        let declarations = param::declarations(params);
        let mut rpc_params = vec![Self::nvarchar_literal_param(sql)];
        if !declarations.is_empty() {
            rpc_params.push(Self::nvarchar_literal_param(&declarations));
        }

        let request = RpcRequest {
            transaction_descriptor: self.stream.transaction_descriptor,
            outstanding_request_count: 1,
            proc: ProcIdentifier::Name("sp_describe_parameter_encryption".to_string()),
            options: RpcOptionFlags::empty(),
            params: rpc_params,
        };

        let mut result_sets = self.run_rpc(request).await?;
        let (cek_columns, cek_rows) = if result_sets.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            result_sets.remove(0)
        };
        let cek_entries = describe::parse_cek_table(&cek_columns, &cek_rows)?;
        self.cek_table = Some(CekTable::new(cek_entries));

        let (param_columns, param_rows) = if result_sets.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            result_sets.remove(0)
        };
        describe::parse_param_metadata(&param_columns, &param_rows)
    }

    /// Encrypts each parameter whose ordinal `sp_describe_parameter_encryption` reported as
    /// encrypted, leaving the rest untouched.
    fn encrypt_params(
        &self,
        params: &[MssqlParam],
        param_metadata: &[describe::ParamCryptoMetadata],
    ) -> Result<Vec<RpcParam>, Error> {
        let cek_table = self.cek_table.as_ref();

        params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let ordinal = (i + 1) as u16;
                let metadata = param_metadata.iter().find(|m| m.ordinal == ordinal);

                match metadata {
                    Some(metadata) if metadata.encryption_type != aead::EncryptionType::Plaintext => {
                        let cek_table = cek_table.ok_or_else(|| {
                            Error::protocol("server reported an encrypted parameter but no CEK table was loaded")
                        })?;
                        let key = cek_table.get(metadata.cek_table_ordinal)?.resolve()?;
                        let plaintext = param.wire_value().unwrap_or_default();
                        let ciphertext = aead::encrypt(&key, metadata.encryption_type, &plaintext)?;

                        Ok(RpcParam {
                            name: format!("@p{}", i + 1),
                            status: ParamStatus::ENCRYPTED,
                            type_info: TypeInfo::new(DataType::VarBinary, ciphertext.len() as u32),
                            value: Some(ciphertext),
                            crypto_metadata: Some(CryptoMetadata {
                                base_type_info: param.type_info(),
                                cek_table_ordinal: metadata.cek_table_ordinal,
                                algorithm_id: ALGORITHM_ID_AEAD_AES_256_CBC_HMAC_SHA256,
                                algorithm_name: None,
                                encryption_type: metadata.encryption_type,
                                normalization_rule_version: metadata.normalization_rule_version,
                                ordinal: 0,
                            }),
                        })
                    }
                    _ => Ok(RpcParam {
                        name: format!("@p{}", i + 1),
                        status: ParamStatus::empty(),
                        type_info: param.type_info(),
                        value: param.wire_value(),
                        crypto_metadata: None,
                    }),
                }
            })
            .collect()
    }

    /// Sends `request` and collects every result set it returns, grouped by COLMETADATA
    /// generation (`sp_describe_parameter_encryption` returns two: the CEK table, then the
    /// per-parameter crypto metadata).
    async fn run_rpc(&mut self, request: RpcRequest) -> Result<Vec<(Vec<MssqlColumn>, Vec<WireRow>)>, Error> {
        self.stream.wait_until_ready().await?;

        let mut buf = Vec::new();
        request.encode(&mut buf);

        self.stream.pending_done_count += 1;
        self.stream
            .write_packet_and_flush(PacketType::Rpc, &buf[..])
            .await?;

        let mut result_sets: Vec<(Vec<MssqlColumn>, Vec<WireRow>)> = Vec::new();
        let mut current_generation = None;

        loop {
            match self.stream.recv_message().await? {
                Message::Row(row) => {
                    let generation = self.stream.col_meta_data_generation;
                    if current_generation != Some(generation) {
                        result_sets.push((self.stream.columns.clone(), Vec::new()));
                        current_generation = Some(generation);
                    }
                    result_sets.last_mut().expect("just pushed").1.push(row);
                }
                Message::Done(done) | Message::DoneProc(done) | Message::DoneInProc(done) => {
                    if !done.status.contains(DoneStatus::DONE_MORE) {
                        self.stream.handle_done(&done);
                        break;
                    }
                }
                Message::Redirect { host, port } => {
                    return Err(Error::Redirect { host, port });
                }
                _ => {}
            }
        }

        Ok(result_sets)
    }
}
