//! A TDS (Tabular Data Stream) driver core for Microsoft SQL Server.
//!
//! This crate speaks the wire protocol directly: packet framing, the PRELOGIN/LOGIN7 handshake
//! (with TLS tunneled through PRELOGIN when negotiated), the token stream a query's response is
//! made of, and the Always Encrypted column-encryption layer. It does not implement a
//! higher-level query-builder or connection-pool API — see `DESIGN.md` for what is and isn't in
//! scope.
#![warn(future_incompatible, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod connection;
mod encryption;
mod error;
mod io;
mod net;
mod options;
mod param;
mod protocol;
mod query_result;
mod row;
mod statement;
mod value;

pub use connection::MssqlConnection;
pub use encryption::{register_provider, KeyStoreProvider};
pub use error::{Error, MssqlDatabaseError, ServerMessage, TlsFailureKind};
pub use net::CertificateInput;
pub use options::{Authentication, ColumnEncryptionSetting, MssqlConnectOptions};
pub use param::MssqlParam;
pub use query_result::MssqlQueryResult;
pub use row::MssqlRow;
pub use value::MssqlValue;
