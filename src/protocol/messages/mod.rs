//! Outbound TNS message encodings.
//!
//! Each message implements the [`Message`](crate::protocol::message::Message)
//! trait for single-allocation serialization.

pub mod auth;
pub mod connect;
pub mod data_types;
pub mod execute;
pub mod fetch;
pub mod piggyback;

pub use auth::{AuthPhaseOneMessage, AuthPhaseTwoMessage, ClientInfo};
pub use connect::{ConnectMessage, MarkerMessage, ProtocolMessage};
pub use data_types::DataTypesMessage;
pub use execute::{ExecuteMessage, ReexecuteMessage};
pub use fetch::FetchMessage;
pub use piggyback::{
    CloseCursorsPiggyback, CreateTempLobMessage, FreeTempLobsPiggyback, SessionReleasePiggyback,
    SimpleFunctionMessage,
};
