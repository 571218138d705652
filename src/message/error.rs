use thiserror::Error;

use crate::amf::{AmfDecodeError, AmfEncodeError};

#[derive(Debug, Error)]
pub enum MessageCodecError {
    #[error("message payload ended early while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("SetChunkSize payload has its high bit set: {raw:#010x}")]
    SetChunkSizeHighBitSet { raw: u32 },

    #[error("unknown UserControl event type {event_type:#06x}")]
    UnknownUserControlEvent { event_type: u16 },

    #[error("unknown SetPeerBandwidth limit type {limit_type}")]
    UnknownLimitType { limit_type: u8 },

    #[error("command message is missing its command name or transaction id")]
    MalformedCommand,

    #[error("unknown RTMP message type id {type_id}")]
    UnknownMessageType { type_id: u8 },

    #[error(transparent)]
    AmfDecode(#[from] AmfDecodeError),

    #[error(transparent)]
    AmfEncode(#[from] AmfEncodeError),
}

pub type MessageCodecResult<T> = Result<T, MessageCodecError>;
