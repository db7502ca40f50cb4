//! Wire message model and codec contracts.
//!
//! A [`MessageCodec`] frames one logical [`Message`] at a time and never
//! consumes input itself: `decode_one` reads from a byte slice and reports
//! how much it used, so a failed attempt cannot corrupt the caller's read
//! position. [`count::CountCodec`] layers multi-message draining on top.

mod count;
mod wire;

pub use count::CountCodec;
pub use wire::WireCodec;

use std::net::SocketAddr;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::error::{RpcError, RpcErrorKind};
use crate::invocation::{Invocation, RpcOutcome};
use crate::url::Url;

/// Codec-facing view of a connection: the url carries codec options
/// (payload limit, serialization name), `remote` the peer address if known.
#[derive(Debug, Clone)]
pub struct Channel {
    pub url: Url,
    pub remote: Option<SocketAddr>,
}

impl Channel {
    pub fn new(url: Url) -> Self {
        Self { url, remote: None }
    }
}

/// Response status carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Ok,
    ClientError,
    ServiceError,
    ServerError,
}

impl ResponseStatus {
    pub fn code(self) -> u8 {
        match self {
            ResponseStatus::Ok => 20,
            ResponseStatus::ClientError => 40,
            ResponseStatus::ServiceError => 70,
            ResponseStatus::ServerError => 80,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, CodecError> {
        match code {
            20 => Ok(ResponseStatus::Ok),
            40 => Ok(ResponseStatus::ClientError),
            70 => Ok(ResponseStatus::ServiceError),
            80 => Ok(ResponseStatus::ServerError),
            _ => UnknownStatusSnafu { code }.fail(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub two_way: bool,
    /// Heartbeats and other link events; event requests carry an empty body.
    pub event: bool,
    pub invocation: Invocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub status: ResponseStatus,
    pub event: bool,
    pub outcome: RpcOutcome,
}

/// One logical wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Outcome of a single-message decode attempt. `Decoded.consumed` is the
/// number of bytes the message occupied; the caller advances the buffer.
#[derive(Debug)]
pub enum SingleDecode {
    NeedMoreInput,
    Decoded { message: Message, consumed: usize },
}

/// Outcome of draining a buffer through [`CountCodec`].
#[derive(Debug)]
pub enum DecodeOutcome {
    NeedMoreInput,
    One(Message),
    /// Two or more messages, in wire order.
    Batch(Vec<Message>),
}

pub trait MessageCodec: Send + Sync {
    fn encode(&self, channel: &Channel, buf: &mut BytesMut, message: &Message)
    -> Result<(), CodecError>;

    /// Attempt to decode one message from the start of `src` without
    /// consuming it.
    fn decode_one(&self, channel: &Channel, src: &[u8]) -> Result<SingleDecode, CodecError>;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    #[snafu(display("bad frame magic 0x{found:04x}"))]
    BadMagic { found: u16 },

    #[snafu(display("payload of {size} bytes exceeds limit of {limit}"))]
    PayloadTooLarge { size: usize, limit: usize },

    #[snafu(display("body codec error: {source}"))]
    Body { source: serde_json::Error },

    #[snafu(display("unknown response status code {code}"))]
    UnknownStatus { code: u8 },
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        RpcError::with_source(RpcErrorKind::Serialization, err.to_string(), err)
    }
}
