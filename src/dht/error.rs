use std::net::SocketAddr;

use thiserror::Error;

use super::krpc::KrpcError;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("krpc error: {0}")]
    Krpc(#[from] KrpcError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid node id length: {0}")]
    InvalidNodeId(usize),

    #[error("invalid compact node info length: {0}")]
    InvalidCompactInfo(usize),

    #[error("unsupported address family: {0}")]
    UnsupportedAddress(SocketAddr),

    #[error("no reply from {addr} after {attempts} attempts")]
    Timeout { addr: SocketAddr, attempts: usize },

    #[error("send to {addr} failed: {source}")]
    SendAborted {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no free transaction id")]
    TransactionIdsExhausted,

    #[error("config error: {0}")]
    Config(String),
}
