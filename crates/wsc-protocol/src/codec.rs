//! Tokio codec for framed helper RPC messages

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, RequestId, MAX_PAYLOAD_SIZE};
use crate::message::RpcMessage;

/// One request or response together with its correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct RpcFrame {
    pub request_id: RequestId,
    pub message: RpcMessage,
}

impl RpcFrame {
    pub fn new(request_id: RequestId, message: RpcMessage) -> Self {
        Self {
            request_id,
            message,
        }
    }
}

/// Length-prefixed bincode framing for [`RpcFrame`]s
#[derive(Debug, Default)]
pub struct RpcCodec {
    /// Header of a frame whose payload has not fully arrived
    awaiting_payload: Option<FrameHeader>,
}

impl RpcCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_header(&mut self, src: &mut BytesMut) -> Result<Option<FrameHeader>, ProtocolError> {
        match self.awaiting_payload.take() {
            Some(header) => Ok(Some(header)),
            None => FrameHeader::decode(src),
        }
    }
}

fn ensure_fits(size: usize) -> Result<u32, ProtocolError> {
    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(size as u32)
}

impl Decoder for RpcCodec {
    type Item = RpcFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RpcFrame>, ProtocolError> {
        let Some(header) = self.next_header(src)? else {
            return Ok(None);
        };
        let needed = header.payload_length as usize;
        ensure_fits(needed)?;

        if let Some(missing) = needed.checked_sub(src.len()).filter(|m| *m > 0) {
            src.reserve(missing);
            self.awaiting_payload = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(needed);
        let message: RpcMessage = bincode::deserialize(&payload)?;
        let actual = message.message_type();
        if actual != header.message_type {
            return Err(ProtocolError::TypeMismatch {
                header: header.message_type,
                payload: actual,
            });
        }

        Ok(Some(RpcFrame::new(header.request_id, message)))
    }
}

impl Encoder<RpcFrame> for RpcCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: RpcFrame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = bincode::serialize(&frame.message)?;
        let length = ensure_fits(payload.len())?;

        FrameHeader::new(frame.request_id, frame.message.message_type(), length).encode(dst);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::SshDestination;
    use crate::frame::HEADER_SIZE;
    use crate::message::{MessageType, RpcErrorCode};

    #[test]
    fn test_codec_resolve_request() {
        let mut codec = RpcCodec::new();

        let frame = RpcFrame::new(
            RequestId::new(3),
            RpcMessage::ResolveSshConnection {
                workspace_id: "amber-llama-x1y2".to_string(),
                instance_id: "7c1d0e4f".to_string(),
                debug: false,
            },
        );

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_connection_response_keeps_absent_fields() {
        let mut codec = RpcCodec::new();

        let frame = RpcFrame::new(
            RequestId::new(9),
            RpcMessage::SshConnection {
                destination: SshDestination::new("amber-llama-x1y2"),
                generated_config_path: "/tmp/wsc/ssh_config".to_string(),
            },
        );

        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        match codec.decode(&mut buf).unwrap().unwrap().message {
            RpcMessage::SshConnection { destination, .. } => {
                assert_eq!(destination.user, None);
                assert_eq!(destination.port, None);
            }
            other => panic!("Expected SshConnection, got {:?}", other),
        }
    }

    #[test]
    fn test_codec_waits_for_full_payload() {
        let mut codec = RpcCodec::new();

        let frame = RpcFrame::new(
            RequestId::new(1),
            RpcMessage::Error {
                code: RpcErrorCode::Unavailable,
                message: "warming up".to_string(),
            },
        );

        let mut rest = BytesMut::new();
        codec.encode(frame, &mut rest).unwrap();

        // Header plus one payload byte: the header is kept until the rest arrives
        let mut buf = rest.split_to(HEADER_SIZE + 1);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 1);

        buf.extend_from_slice(&rest);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.request_id, RequestId::new(1));
        assert_eq!(decoded.message.message_type(), MessageType::Error);
    }

    #[test]
    fn test_codec_rejects_mismatched_type() {
        let mut codec = RpcCodec::new();

        let payload = bincode::serialize(&RpcMessage::Ack).unwrap();
        let mut buf = BytesMut::new();
        FrameHeader::new(RequestId::new(1), MessageType::Pong, payload.len() as u32)
            .encode(&mut buf);
        buf.extend_from_slice(&payload);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::TypeMismatch { .. })
        ));
    }
}
