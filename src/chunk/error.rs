use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk stream id {csid} used chunk format {fmt} before any Type-0 chunk established its context")]
    NoContextForContinuation { csid: u32, fmt: u8 },

    #[error("message on chunk stream id {csid} exceeds the maximum message length (16MiB)")]
    MessageTooLarge { csid: u32 },

    #[error(
        "chunk stream id {csid} received a new Type-{fmt} header while a message was still \
         being reassembled on it ({buffered} of {declared_length} bytes buffered)"
    )]
    MessageReplacedMidReassembly { csid: u32, fmt: u8, buffered: usize, declared_length: usize },

    #[error("outbound chunk size must be at least 1 and fit in 31 bits, got {size}")]
    InvalidChunkSize { size: u32 },
}

pub type ChunkResult<T> = Result<T, ChunkError>;
