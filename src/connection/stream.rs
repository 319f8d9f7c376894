//! The framed, message-aware byte stream a connection drives: reads/writes whole TDS packets
//! and reassembles them into the token stream (§4.2).

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::connection::tls_prelogin_wrapper::TlsPreloginWrapper;
use crate::error::{err_protocol, Error};
use crate::io::{BufStream, Encode};
use crate::net::{resolve_and_connect, MaybeTlsStream, SocketOpenOptions, TlsConfig};
use crate::options::MssqlConnectOptions;
use crate::protocol::col_meta_data::{ColMetaData, MssqlColumn};
use crate::protocol::done::{Done, Status as DoneStatus};
use crate::protocol::env_change::EnvChange;
use crate::protocol::error_token::ErrorToken;
use crate::protocol::info::Info;
use crate::protocol::login_ack::LoginAck;
use crate::protocol::message::{Message, MessageType};
use crate::protocol::order::Order;
use crate::protocol::packet::{write_packets, PacketHeader, PacketType, Status};
use crate::protocol::return_status::ReturnStatus;
use crate::protocol::return_value::ReturnValue;
use crate::protocol::row::Row;
use crate::error::MssqlDatabaseError;

pub(crate) struct MssqlStream {
    inner: BufStream<MaybeTlsStream<TlsPreloginWrapper<TcpStream>>>,

    /// Number of outstanding DONE (or ERROR) tokens the caller is waiting on.
    pub(crate) pending_done_count: usize,

    /// Set from ENVCHANGE on `BEGIN TRAN`, reset to `0` on commit/rollback.
    pub(crate) transaction_descriptor: u64,
    pub(crate) transaction_depth: usize,

    /// Current `TabularResult` payload being iterated over.
    response: Option<(PacketHeader, Bytes)>,

    /// Most recent column descriptions from COLMETADATA; needed to decode the rows that follow.
    pub(crate) columns: Vec<MssqlColumn>,
    pub(crate) column_names: HashMap<String, usize>,
    /// Incremented every time a COLMETADATA token is parsed; lets a multi-result-set RPC
    /// response (e.g. `sp_describe_parameter_encryption`) tell when the rows being drained have
    /// crossed into the next result set.
    pub(crate) col_meta_data_generation: u64,

    /// Size of packets to send to the server, possibly renegotiated by an ENVCHANGE.
    pub(crate) max_packet_size: usize,

    /// The first ERROR token seen since the last terminal DONE (§4.3: "first error wins"). An
    /// ERROR token is always followed by more of the message, up to and including a DONE that
    /// isn't `DONE_MORE`; only then is the remembered error actually raised.
    pending_error: Option<ErrorToken>,

    /// Database named by the most recent `database`-change ENVCHANGE, so a mid-query reconnect
    /// (§4.4/§9 scenario S4) can restore the session to the same database it was using.
    pub(crate) current_database: Option<String>,

    options: MssqlConnectOptions,
}

impl MssqlStream {
    pub(crate) async fn connect(options: &MssqlConnectOptions) -> Result<Self, Error> {
        let socket_opts = SocketOpenOptions {
            host: options.host.clone(),
            port: options.port,
            login_timeout: options.login_timeout,
            use_parallel: options.multi_subnet_failover,
            use_tnir: options.transparent_network_ip_resolution,
            is_tnir_first_attempt: true,
            full_timeout: options.login_timeout,
        };

        let tcp_stream = resolve_and_connect(&socket_opts).await?;
        tcp_stream.set_nodelay(true).ok();

        let wrapped_stream = TlsPreloginWrapper::new(tcp_stream);
        let inner = BufStream::new(MaybeTlsStream::Raw(wrapped_stream));

        Ok(Self {
            inner,
            columns: Vec::new(),
            column_names: HashMap::new(),
            col_meta_data_generation: 0,
            response: None,
            pending_done_count: 0,
            transaction_descriptor: 0,
            transaction_depth: 0,
            max_packet_size: options
                .requested_packet_size
                .try_into()
                .unwrap_or(usize::MAX),
            pending_error: None,
            current_database: Some(options.database.clone()).filter(|d| !d.is_empty()),
            options: options.clone(),
        })
    }

    /// Writes the packet out to the write buffer, but does not flush. If the payload is large
    /// over an encrypted connection, the caller needs `write_packet_and_flush` instead, which
    /// flushes each TDS packet individually to the TLS layer.
    pub(crate) fn write_packet<'en, T: Encode<'en>>(&mut self, ty: PacketType, payload: T) {
        write_packets(&mut self.inner.wbuf, self.max_packet_size, ty, payload)
    }

    pub(crate) async fn write_packet_and_flush<'en, T: Encode<'en>>(
        &mut self,
        ty: PacketType,
        payload: T,
    ) -> Result<(), Error> {
        if !self.inner.wbuf.is_empty() {
            self.flush().await?;
        }
        self.write_packet(ty, payload);
        self.flush().await?;
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> Result<(), Error> {
        if self.inner.wbuf.len() > self.max_packet_size {
            for chunk in self.inner.wbuf.chunks(self.max_packet_size) {
                self.inner.stream.write_all(chunk).await?;
                self.inner.stream.flush().await?;
            }
            self.inner.wbuf.clear();
        } else {
            self.inner.flush().await?;
        }
        Ok(())
    }

    /// Reads the next packet from the server, blocking until one is available.
    pub(crate) async fn recv_packet(&mut self) -> Result<(PacketHeader, Bytes), Error> {
        let mut header: PacketHeader = self.inner.read(8).await?;

        if !matches!(header.r#type, PacketType::TabularResult) {
            return Err(err_protocol!(
                "received unexpected packet: {:?}",
                header.r#type
            ));
        }

        let mut payload = BytesMut::new();

        loop {
            self.inner
                .read_raw_into(&mut payload, (header.length - 8) as usize)
                .await?;

            if header.status.contains(Status::END_OF_MESSAGE) {
                break;
            }

            header = self.inner.read(8).await?;
        }

        Ok((header, payload.freeze()))
    }

    /// Peeks the next token-stream item's type byte without consuming it (§4.2's
    /// `peek_token_type`). `None` means every token in the currently buffered response has
    /// already been consumed; the caller must pull another packet, which `recv_message` does
    /// automatically.
    pub(crate) fn peek_token_type(&self) -> Option<u8> {
        self.response.as_ref().and_then(|(_, buf)| buf.first().copied())
    }

    /// Bytes left in the currently buffered `TabularResult` response, without blocking on the
    /// transport (§4.2's `available_current_packet`). Lower-level, transport-wide lookahead is
    /// `self.available()`, inherited from the underlying `BufStream`.
    pub(crate) fn available_current_packet(&self) -> usize {
        self.response.as_ref().map_or(0, |(_, buf)| buf.len())
    }

    /// Reads the next token-stream item, pulling more packets from the server as needed.
    /// Tokens the driver handles internally (ENVCHANGE, INFO, COLMETADATA) never reach the
    /// caller — they update connection state and the loop continues.
    pub(crate) async fn recv_message(&mut self) -> Result<Message, Error> {
        loop {
            while self.response.as_ref().is_some_and(|r| !r.1.is_empty()) {
                let buf = match self.response.as_mut() {
                    Some((_, buf)) => buf,
                    None => break,
                };

                let ty = MessageType::get(buf)?;

                let message = match ty {
                    MessageType::EnvChange => match EnvChange::get(buf)? {
                        EnvChange::Database(name) => {
                            self.current_database = Some(name);
                            continue;
                        }
                        EnvChange::BeginTransaction(desc) => {
                            self.transaction_descriptor = desc;
                            continue;
                        }
                        EnvChange::CommitTransaction(_) | EnvChange::RollbackTransaction(_) => {
                            self.transaction_descriptor = 0;
                            continue;
                        }
                        EnvChange::PacketSize(size) => {
                            self.max_packet_size = size.clamp(512, 32767).try_into().unwrap_or(usize::MAX);
                            continue;
                        }
                        // Aborts the token stream rather than `continue`-ing: the caller must stop
                        // reading from this connection and reopen one against the new target.
                        EnvChange::Routing { host, port } => Message::Redirect { host, port },
                        _ => continue,
                    },

                    MessageType::Info => {
                        let _ = Info::get(buf)?;
                        continue;
                    }

                    MessageType::Row => Message::Row(Row::get(buf, false, &self.columns)?),
                    MessageType::NbcRow => Message::Row(Row::get(buf, true, &self.columns)?),
                    MessageType::LoginAck => Message::LoginAck(LoginAck::get(buf)?),
                    MessageType::ReturnStatus => Message::ReturnStatus(ReturnStatus::get(buf)?),
                    MessageType::ReturnValue => Message::ReturnValue(ReturnValue::get(buf)?),
                    MessageType::Done => {
                        let done = Done::get(buf)?;
                        if let Some(error) = self.take_pending_error(&done) {
                            return Err(error);
                        }
                        Message::Done(done)
                    }
                    MessageType::DoneInProc => {
                        let done = Done::get(buf)?;
                        if let Some(error) = self.take_pending_error(&done) {
                            return Err(error);
                        }
                        Message::DoneInProc(done)
                    }
                    MessageType::DoneProc => {
                        let done = Done::get(buf)?;
                        if let Some(error) = self.take_pending_error(&done) {
                            return Err(error);
                        }
                        Message::DoneProc(done)
                    }
                    MessageType::Order => Message::Order(Order::get(buf)?),

                    // ERROR is sent IN ADDITION TO the DONE that follows it, not instead of it
                    // (§4.3). The first ERROR wins; parsing keeps draining the message until the
                    // terminal DONE, which is when the remembered error actually gets raised.
                    MessageType::Error => {
                        let error = ErrorToken::get(buf)?;
                        self.pending_error.get_or_insert(error);
                        continue;
                    }

                    MessageType::ColMetaData => {
                        ColMetaData::get(buf, &mut self.columns, &mut self.column_names)?;
                        self.col_meta_data_generation += 1;
                        continue;
                    }

                    MessageType::FeatureExtAck => {
                        Message::FeatureExtAck(crate::protocol::feature_ext_ack::FeatureExtAck::get(buf)?)
                    }

                    MessageType::FedAuthInfo => {
                        Message::FedAuthInfo(crate::protocol::fed_auth::FedAuthInfo::get(buf)?)
                    }

                    // SSPI (NTLM/Kerberos) continuation tokens aren't driven by this client;
                    // drain the length-prefixed payload and keep going.
                    MessageType::Sspi => {
                        let len = bytes::Buf::get_u16_le(buf) as usize;
                        let _ = buf.split_to(len);
                        continue;
                    }

                    // `FOR BROWSE`/cursor metadata this driver never requests; drain and ignore.
                    MessageType::ColInfo | MessageType::TabName => {
                        let len = bytes::Buf::get_u16_le(buf) as usize;
                        let _ = buf.split_to(len);
                        continue;
                    }
                };

                return Ok(message);
            }

            self.response = Some(self.recv_packet().await?);
        }
    }

    pub(crate) fn handle_done(&mut self, _done: &Done) {
        self.pending_done_count -= 1;
    }

    /// On a terminal DONE (one without `DONE_MORE`), takes and returns the first ERROR token
    /// remembered since the last terminal DONE, if any. Accounts for the DONE itself, since the
    /// caller won't see it to do so.
    fn take_pending_error(&mut self, done: &Done) -> Option<Error> {
        if done.status.contains(DoneStatus::DONE_MORE) {
            return None;
        }
        let error = self.pending_error.take()?;
        self.pending_done_count -= 1;
        Some(MssqlDatabaseError(error.0).into())
    }

    pub(crate) async fn wait_until_ready(&mut self) -> Result<(), Error> {
        if !self.inner.wbuf.is_empty() {
            self.flush().await?;
        }

        while self.pending_done_count > 0 {
            let message = self.recv_message().await?;

            if let Message::DoneProc(done) | Message::Done(done) = message {
                if !done.status.contains(DoneStatus::DONE_MORE) {
                    self.handle_done(&done);
                }
            }
        }

        Ok(())
    }

    pub(crate) async fn setup_encryption(&mut self) -> Result<(), Error> {
        let tls_config = TlsConfig {
            accept_invalid_certs: self.options.trust_server_certificate,
            hostname: self
                .options
                .hostname_in_certificate
                .as_deref()
                .unwrap_or(&self.options.host),
            accept_invalid_hostnames: self.options.hostname_in_certificate.is_none(),
            root_cert_path: self.options.ssl_root_cert.as_ref(),
            client_cert_path: None,
            client_key_path: None,
        };
        self.inner.deref_mut().start_handshake();
        self.inner.upgrade(tls_config).await?;
        self.inner.deref_mut().handshake_complete();
        Ok(())
    }

    /// Reverts to a raw stream once the PRELOGIN-only encryption ("login packet encrypted,
    /// rest plaintext") case has been negotiated (§4.1).
    pub(crate) fn downgrade_encryption(&mut self) -> Result<(), Error> {
        self.inner.deref_mut().downgrade()
    }
}

impl Deref for MssqlStream {
    type Target = BufStream<MaybeTlsStream<TlsPreloginWrapper<TcpStream>>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for MssqlStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
