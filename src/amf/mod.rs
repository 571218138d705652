// AMF0/AMF3 value encoding

mod amf0;
mod amf3;
mod error;

pub use amf0::*;
pub use amf3::*;
pub use error::*;
