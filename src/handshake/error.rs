use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("unsupported RTMP version byte {version:#04x}, only the plain-text version 3 is supported")]
    UnsupportedVersion { version: u8 },

    #[error("bytes received after the handshake already completed")]
    AlreadyDone,
}

pub type HandshakeResult<T> = Result<T, HandshakeError>;
