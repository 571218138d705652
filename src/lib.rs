// RTMP session engine: handshake, chunk stream, AMF0/AMF3, and message
// codecs, composed into a per-connection session state machine.
//
// This crate is transport- and I/O-agnostic. A caller owns the socket (or
// any other byte-duplex transport), feeds inbound bytes to a `Session` via
// `feed_inbound`, and drains bytes to send via `drain_outbound`. See
// `session::Session` for the entry point.

pub mod amf;
pub mod chunk;
pub mod handshake;
pub mod log;
pub mod message;
pub mod session;
