// Application-visible events produced by the session processor.

/// Events the core surfaces to the Application. Responses (outbound RTMP
/// messages) are kept separate from these; see `Output`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A peer sent `connect`. The Application must eventually call
    /// `accept_request` or `reject_request` with this `request_id`.
    ConnectionRequested { request_id: u32, app_name: String },

    /// The peer changed its outbound chunk size (our inbound chunk size).
    /// The Transport driver must apply this to its `Deframer` before parsing
    /// any further chunks.
    PeerChunkSizeChanged { size: u32 },

    /// A protocol violation ended the session. No further bytes will be
    /// accepted; the Transport should close the connection.
    SessionClosed { reason: String },
}
