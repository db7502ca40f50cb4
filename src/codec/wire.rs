//! Default frame codec: fixed header plus JSON body.
//!
//! Header layout (16 bytes, big-endian):
//! magic u16 | flags u8 | status u8 | request id u64 | body length u32.
//! Flag bits: 0x80 request, 0x40 two-way, 0x20 event. Event frames carry an
//! empty body. The `payload` url parameter bounds the body length on both
//! encode and decode.

use bytes::{Buf, BufMut, BytesMut};
use snafu::ResultExt;

use super::{
    BadMagicSnafu, BodySnafu, Channel, CodecError, Message, MessageCodec, PayloadTooLargeSnafu,
    Request, Response, ResponseStatus, SingleDecode,
};
use crate::invocation::{Invocation, RpcOutcome};

const MAGIC: u16 = 0x4c52;
const HEADER_LEN: usize = 16;

const FLAG_REQUEST: u8 = 0x80;
const FLAG_TWO_WAY: u8 = 0x40;
const FLAG_EVENT: u8 = 0x20;

/// Default payload bound, overridable via the `payload` url parameter.
pub const DEFAULT_PAYLOAD: usize = 8 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct WireCodec;

impl WireCodec {
    pub fn new() -> Self {
        Self
    }

    fn payload_limit(channel: &Channel) -> usize {
        channel.url.u64_parameter("payload", DEFAULT_PAYLOAD as u64) as usize
    }
}

impl MessageCodec for WireCodec {
    fn encode(
        &self,
        channel: &Channel,
        buf: &mut BytesMut,
        message: &Message,
    ) -> Result<(), CodecError> {
        let limit = Self::payload_limit(channel);
        let (flags, status, id, body) = match message {
            Message::Request(request) => {
                let mut flags = FLAG_REQUEST;
                if request.two_way {
                    flags |= FLAG_TWO_WAY;
                }
                if request.event {
                    flags |= FLAG_EVENT;
                }
                let body = if request.event {
                    Vec::new()
                } else {
                    serde_json::to_vec(&request.invocation).context(BodySnafu)?
                };
                (flags, 0u8, request.id, body)
            }
            Message::Response(response) => {
                let mut flags = 0u8;
                if response.event {
                    flags |= FLAG_EVENT;
                }
                let body = if response.event {
                    Vec::new()
                } else {
                    serde_json::to_vec(&response.outcome).context(BodySnafu)?
                };
                (flags, response.status.code(), response.id, body)
            }
        };

        if body.len() > limit {
            return PayloadTooLargeSnafu {
                size: body.len(),
                limit,
            }
            .fail();
        }

        buf.reserve(HEADER_LEN + body.len());
        buf.put_u16(MAGIC);
        buf.put_u8(flags);
        buf.put_u8(status);
        buf.put_u64(id);
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        Ok(())
    }

    fn decode_one(&self, channel: &Channel, src: &[u8]) -> Result<SingleDecode, CodecError> {
        if src.len() < HEADER_LEN {
            return Ok(SingleDecode::NeedMoreInput);
        }

        let mut header = &src[..HEADER_LEN];
        let magic = header.get_u16();
        if magic != MAGIC {
            return BadMagicSnafu { found: magic }.fail();
        }
        let flags = header.get_u8();
        let status = header.get_u8();
        let id = header.get_u64();
        let body_len = header.get_u32() as usize;

        let limit = Self::payload_limit(channel);
        if body_len > limit {
            return PayloadTooLargeSnafu {
                size: body_len,
                limit,
            }
            .fail();
        }
        if src.len() < HEADER_LEN + body_len {
            return Ok(SingleDecode::NeedMoreInput);
        }

        let body = &src[HEADER_LEN..HEADER_LEN + body_len];
        let event = flags & FLAG_EVENT != 0;
        let message = if flags & FLAG_REQUEST != 0 {
            let invocation = if event {
                Invocation::new("", Vec::new())
            } else {
                serde_json::from_slice(body).context(BodySnafu)?
            };
            Message::Request(Request {
                id,
                two_way: flags & FLAG_TWO_WAY != 0,
                event,
                invocation,
            })
        } else {
            let outcome = if event {
                RpcOutcome::empty()
            } else {
                serde_json::from_slice(body).context(BodySnafu)?
            };
            Message::Response(Response {
                id,
                status: ResponseStatus::from_code(status)?,
                event,
                outcome,
            })
        };

        Ok(SingleDecode::Decoded {
            message,
            consumed: HEADER_LEN + body_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::Url;
    use serde_json::json;

    fn channel() -> Channel {
        Channel::new(Url::new("larch", "127.0.0.1", 20880))
    }

    fn request(id: u64) -> Message {
        Message::Request(Request {
            id,
            two_way: true,
            event: false,
            invocation: Invocation::new("echo", vec![json!("hi")]),
        })
    }

    #[test]
    fn encode_decode_request() {
        let codec = WireCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&channel(), &mut buf, &request(7)).unwrap();

        match codec.decode_one(&channel(), &buf).unwrap() {
            SingleDecode::Decoded { message, consumed } => {
                assert_eq!(consumed, buf.len());
                match message {
                    Message::Request(req) => {
                        assert_eq!(req.id, 7);
                        assert!(req.two_way);
                        assert_eq!(req.invocation.method(), "echo");
                    }
                    other => panic!("expected request, got {other:?}"),
                }
            }
            other => panic!("expected decode, got {other:?}"),
        }
    }

    #[test]
    fn short_header_needs_more_input() {
        let codec = WireCodec::new();
        assert!(matches!(
            codec.decode_one(&channel(), &[0x4c; 4]).unwrap(),
            SingleDecode::NeedMoreInput
        ));
    }

    #[test]
    fn wrong_magic_is_an_error() {
        let codec = WireCodec::new();
        let err = codec.decode_one(&channel(), &[0u8; HEADER_LEN]).unwrap_err();
        assert!(matches!(err, CodecError::BadMagic { .. }));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let codec = WireCodec::new();
        let small = Channel::new(Url::new("larch", "127.0.0.1", 20880).with_parameter("payload", "8"));
        let mut buf = BytesMut::new();
        let err = codec.encode(&small, &mut buf, &request(1)).unwrap_err();
        assert!(matches!(err, CodecError::PayloadTooLarge { .. }));
    }
}
