//! TCP transport: owns the single outbound socket for a connection.
//!
//! This is the lowest layer in the stack (spec layering: TCP transport →
//! line/RPC framer → Stratum protocol → job builder → client façade). It
//! knows nothing about JSON, line framing, or the Stratum method set — it
//! only moves bytes.

use std::net::{SocketAddr, ToSocketAddrs};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};

use crate::error::{Error, Result};

/// One outbound TCP connection, split into independent read/write halves.
pub struct Transport {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl Transport {
    /// Opens a new connection to `(host, port)` and enables `TCP_NODELAY`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = resolve(host, port)?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Transport(format!("connect to {addr} failed: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Transport(format!("set_nodelay failed: {e}")))?;

        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    pub fn reader(&mut self) -> &mut OwnedReadHalf {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut OwnedWriteHalf {
        &mut self.writer
    }

    pub fn into_parts(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Transport(format!("failed to resolve {host}:{port} - {e}")))?
        .next()
        .ok_or_else(|| Error::Transport(format!("no addresses for {host}:{port}")))
}
