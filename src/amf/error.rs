// AMF0/AMF3 codec errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AmfDecodeError {
    #[error("buffer ended while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("unknown AMF0 marker byte: {marker:#04x}")]
    UnknownAmf0Marker { marker: u8 },

    #[error("unknown AMF3 marker byte: {marker:#04x}")]
    UnknownAmf3Marker { marker: u8 },

    #[error("invalid UTF-8 in AMF string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("AMF0 reference index {index} out of range")]
    OutOfRangeReference { index: usize },

    #[error("AMF3 reference index {index} out of range for {table}")]
    OutOfRangeAmf3Reference { index: usize, table: &'static str },

    #[error("AMF3 reference index {index} points at a value still being decoded (circular reference)")]
    CircularReference { index: usize },

    #[error("AMF3 U29 value does not fit in 29 bits")]
    U29OutOfRange,

    #[error("AMF3 externalizable trait for class {name:?} is not supported")]
    UnsupportedExternalizable { name: Option<String> },

    #[error("object terminator missing where expected")]
    MissingObjectEnd,
}

#[derive(Debug, Error)]
pub enum AmfEncodeError {
    #[error("I/O error while encoding AMF value: {0}")]
    Io(#[from] std::io::Error),

    #[error("AMF3 U29 value {value} exceeds 29 bits")]
    U29OutOfRange { value: u32 },

    #[error("AMF3 size {value} exceeds what a U29 size header can carry")]
    SizeOutOfRange { value: usize },
}

pub type AmfDecodeResult<T> = Result<T, AmfDecodeError>;
pub type AmfEncodeResult<T> = Result<T, AmfEncodeError>;
