//! Pure-Rust Oracle client protocol core.
//!
//! Speaks the TNS/TTC wire protocol directly over TCP (or a caller-supplied
//! TLS transport); no Oracle native libraries are involved. The crate covers
//! the protocol engine: packet framing, the connection-establishment and
//! statement-execution state machines, and the per-connection request queue
//! with cancellation and deferred server-resource cleanup. Row cells and
//! bind values stay raw bytes; typed encode/decode belongs to the layer
//! above.
//!
//! # Example
//!
//! ```no_run
//! use oracle_wire_rs::{Connection, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let conn = Connection::connect_simple(
//!         "localhost:1521/FREEPDB1",
//!         "username",
//!         "password",
//!     )
//!     .await?;
//!
//!     let mut results = conn.query("SELECT user FROM DUAL", vec![]).await?;
//!     while let Some(row) = results.rows.next_row().await {
//!         let row = row?;
//!         println!("{:?}", row.get(0));
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
mod dispatcher;
pub mod error;
pub mod protocol;
pub mod statement;
pub mod stream;

pub use config::{Address, AddressList, Description, Protocol, Purity, ServiceTarget, TlsParameters};
pub use connection::Connection;
pub use error::{BatchError, Error, Result, ServerError};
pub use protocol::auth::{AuthenticationMode, Credentials, SessionData};
pub use protocol::exec::QueryOptions;
pub use protocol::packet::{TlsUpgrader, TnsStream, Transport};
pub use protocol::types::{DataRow, LobLocator, OracleColumn, OracleDataType, Variable};
pub use statement::{BindDirection, BindInfo, Statement, StatementKind};
pub use stream::{AdaptiveRowBuffer, CancelHandle, QueryResults, RowStream};
