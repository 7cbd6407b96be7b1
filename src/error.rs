//! Error types for the interception engine.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed DNS packet: {0}")]
    Decode(&'static str),

    #[error("DNS packet has no question")]
    NoQuestion,

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("fake IP block exhausted")]
    FakeIpExhausted,

    #[error("no free query ID")]
    QueryTableFull,

    #[error("not an IPv4/UDP packet")]
    NotUdp,

    #[error("engine stopped")]
    Stopped,

    #[error("failed to protect upstream socket: {0}")]
    Protect(io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
