// Session-level state machine (C5). See SPEC_FULL.md S3 and S4.5.

use std::collections::HashMap;

use crate::session::config::SessionConfig;
use crate::session::request::PendingRequest;

/// Coarse session stage. `awaiting-application-decision` in the spec prose is
/// not a separate variant here: it is `Started` with a non-empty
/// `active_requests`, since the spec's own data model places "current_stage"
/// in exactly these four values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Handshaking,
    Started,
    Connected,
    Closed,
}

/// All mutable state for one session, independent of the bytes currently in
/// flight on the wire (that lives in the `Deframer`/`Framer`/`Handshake`).
#[derive(Debug, Clone)]
pub struct SessionState {
    pub stage: Stage,
    pub peer_window_ack_size: Option<u64>,
    pub peer_bytes_received: u64,
    pub last_acknowledgement_sent_at: u64,
    pub config: SessionConfig,
    pub active_requests: HashMap<u32, PendingRequest>,
    pub last_request_id: u32,
    pub connected_app_name: Option<String>,
    pub outbound_chunk_size: u32,
    pub inbound_chunk_size: u32,
}

impl SessionState {
    pub fn new(config: SessionConfig) -> SessionState {
        SessionState {
            stage: Stage::Started,
            peer_window_ack_size: None,
            peer_bytes_received: 0,
            last_acknowledgement_sent_at: 0,
            config,
            active_requests: HashMap::new(),
            last_request_id: 0,
            connected_app_name: None,
            outbound_chunk_size: crate::chunk::DEFAULT_CHUNK_SIZE,
            inbound_chunk_size: crate::chunk::DEFAULT_CHUNK_SIZE,
        }
    }

    fn next_request_id(&mut self) -> u32 {
        self.last_request_id += 1;
        self.last_request_id
    }

    pub(super) fn queue_request(&mut self, request: PendingRequest) -> u32 {
        let id = self.next_request_id();
        self.active_requests.insert(id, request);
        id
    }
}
