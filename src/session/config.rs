// Session configuration: the values an application must supply before a
// session can respond to `connect`. There are no safe defaults at this layer
// (see SPEC_FULL.md S6) -- a binary built on top of this crate is expected to
// source these the way the teacher's own configuration structs do, e.g. from
// environment variables, and hand the result in.

/// Configuration needed to answer a peer's `connect` request.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Outbound chunk size announced (via SetChunkSize) right after connect.
    pub chunk_size: u32,

    /// Outbound window acknowledgement size announced after connect.
    pub window_ack_size: u32,

    /// Value sent in SetPeerBandwidth after connect.
    pub peer_bandwidth: u32,

    /// String placed in the connect `_result` command_object's `fmsVer`.
    pub fms_version: String,
}
