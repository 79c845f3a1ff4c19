//! A client implementation of the Stratum V1 mining protocol.
//!
//! The stack is layered bottom to top: [`transport`] owns the raw TCP
//! socket, [`rpc`] frames newline-delimited JSON-RPC off it, [`protocol`]
//! interprets Stratum's method set and keeps the job/extranonce/difficulty
//! state machine, [`job`] turns a notification into a hashable header, and
//! [`io_task`] drives all of that on its own Tokio task behind the
//! [`client::Connection`] façade that callers actually hold.
//!
//! This crate does not initialize a logger; it only emits records via the
//! `log` facade under the `"stratum"` target, for the embedding
//! application to route as it sees fit.

mod client;
mod error;
mod hexutil;
mod io_task;
mod job;
mod protocol;
mod rpc;
mod transport;

pub use client::{Connection, ConnectionConfig, ConnectionParams, ConnectionStats};
pub use error::{Error, Result};
pub use job::{Job, JobResult};
pub use protocol::JobNotification;
