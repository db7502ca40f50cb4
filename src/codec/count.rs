//! Multi-message draining codec.
//!
//! Wraps a [`MessageCodec`] and decodes as many complete messages as the
//! buffer holds in one pass. Bytes belonging to a trailing partial message
//! are left in the buffer for the next read.

use bytes::{Buf, BytesMut};

use super::{Channel, CodecError, DecodeOutcome, Message, MessageCodec, SingleDecode};
use crate::invocation::{INPUT_KEY, OUTPUT_KEY};

pub struct CountCodec<C> {
    inner: C,
}

impl<C: MessageCodec> CountCodec<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn encode(
        &self,
        channel: &Channel,
        buf: &mut BytesMut,
        message: &Message,
    ) -> Result<(), CodecError> {
        self.inner.encode(channel, buf, message)
    }

    /// Drain complete messages from `buf`.
    ///
    /// The buffer is only advanced past fully decoded messages, so after any
    /// outcome (including an error) it starts at the last known-good resume
    /// point. Each decoded request records its consumed byte count in the
    /// `input` attachment, each response in the `output` attachment, for the
    /// monitoring layer.
    pub fn decode(
        &self,
        channel: &Channel,
        buf: &mut BytesMut,
    ) -> Result<DecodeOutcome, CodecError> {
        let mut messages = Vec::new();
        let mut consumed_total = 0;

        loop {
            let attempt = self.inner.decode_one(channel, &buf[consumed_total..]);
            match attempt {
                Ok(SingleDecode::NeedMoreInput) => break,
                Ok(SingleDecode::Decoded {
                    mut message,
                    consumed,
                }) => {
                    record_message_length(&mut message, consumed);
                    consumed_total += consumed;
                    messages.push(message);
                }
                Err(err) => {
                    buf.advance(consumed_total);
                    return Err(err);
                }
            }
        }

        buf.advance(consumed_total);
        Ok(match messages.len() {
            0 => DecodeOutcome::NeedMoreInput,
            // Skip the batch wrapper for the common single-message read.
            1 => DecodeOutcome::One(messages.pop().expect("one message")),
            _ => DecodeOutcome::Batch(messages),
        })
    }
}

fn record_message_length(message: &mut Message, bytes: usize) {
    if bytes == 0 {
        return;
    }
    match message {
        Message::Request(request) => {
            request.invocation.set_attachment(INPUT_KEY, bytes.to_string());
        }
        Message::Response(response) => {
            response.outcome.set_attachment(OUTPUT_KEY, bytes.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Request, Response, ResponseStatus, WireCodec};
    use crate::invocation::{Invocation, RpcOutcome};
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
            invocation: Invocation::new("echo", vec![json!(id)]),
        })
    }

    fn response(id: u64) -> Message {
        Message::Response(Response {
            id,
            status: ResponseStatus::Ok,
            event: false,
            outcome: RpcOutcome::from_value(json!("pong")),
        })
    }

    #[test]
    fn empty_buffer_needs_more_input() {
        let codec = CountCodec::new(WireCodec::new());
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.decode(&channel(), &mut buf).unwrap(),
            DecodeOutcome::NeedMoreInput
        ));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn partial_tail_is_preserved() {
        let codec = CountCodec::new(WireCodec::new());
        let channel = channel();

        let mut buf = BytesMut::new();
        codec.encode(&channel, &mut buf, &request(1)).unwrap();
        codec.encode(&channel, &mut buf, &request(2)).unwrap();
        let complete_len = buf.len();
        codec.encode(&channel, &mut buf, &request(3)).unwrap();

        // Truncate the third message mid-body.
        let partial_len = buf.len() - complete_len;
        buf.truncate(complete_len + partial_len / 2);
        let partial = buf[complete_len..].to_vec();

        match codec.decode(&channel, &mut buf).unwrap() {
            DecodeOutcome::Batch(messages) => {
                let ids: Vec<u64> = messages
                    .iter()
                    .map(|m| match m {
                        Message::Request(r) => r.id,
                        Message::Response(r) => r.id,
                    })
                    .collect();
                assert_eq!(ids, vec![1, 2]);
            }
            other => panic!("expected batch, got {other:?}"),
        }
        // Read position sits at the start of the partial third message.
        assert_eq!(&buf[..], &partial[..]);
    }

    #[test]
    fn single_message_is_unwrapped() {
        let codec = CountCodec::new(WireCodec::new());
        let channel = channel();
        let mut buf = BytesMut::new();
        codec.encode(&channel, &mut buf, &request(9)).unwrap();

        match codec.decode(&channel, &mut buf).unwrap() {
            DecodeOutcome::One(Message::Request(req)) => assert_eq!(req.id, 9),
            other => panic!("expected single request, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn records_consumed_bytes_in_attachments() {
        let codec = CountCodec::new(WireCodec::new());
        let channel = channel();

        let mut buf = BytesMut::new();
        codec.encode(&channel, &mut buf, &request(1)).unwrap();
        let request_len = buf.len();
        codec.encode(&channel, &mut buf, &response(1)).unwrap();
        let response_len = buf.len() - request_len;

        match codec.decode(&channel, &mut buf).unwrap() {
            DecodeOutcome::Batch(messages) => {
                match &messages[0] {
                    Message::Request(req) => {
                        assert_eq!(req.invocation.attachment("input"), Some(request_len.to_string().as_str()));
                    }
                    other => panic!("expected request, got {other:?}"),
                }
                match &messages[1] {
                    Message::Response(resp) => {
                        assert_eq!(resp.outcome.attachment("output"), Some(response_len.to_string().as_str()));
                    }
                    other => panic!("expected response, got {other:?}"),
                }
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn error_keeps_resume_point_after_good_messages() {
        let codec = CountCodec::new(WireCodec::new());
        let channel = channel();

        let mut buf = BytesMut::new();
        codec.encode(&channel, &mut buf, &request(1)).unwrap();
        buf.extend_from_slice(&[0u8; 16]); // bad magic frame

        assert!(codec.decode(&channel, &mut buf).is_err());
        // The good message was consumed; the buffer resumes at the bad frame.
        assert_eq!(buf.len(), 16);
    }
}
