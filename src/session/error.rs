use thiserror::Error;

use crate::chunk::ChunkError;
use crate::handshake::HandshakeError;
use crate::message::MessageCodecError;

/// Fatal errors that end a session. Semantic anomalies (unknown message
/// type, unhandled command in the current stage) are logged and dropped
/// instead of surfacing here.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    MessageCodec(#[from] MessageCodecError),

    #[error("request {request_id} is not pending")]
    UnknownRequest { request_id: u32 },
}

pub type SessionResult<T> = Result<T, SessionError>;
