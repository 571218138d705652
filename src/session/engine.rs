// Thin driver composing the handshake FSM, chunk deframer/framer, message
// codec, and session processor into the single `feed_inbound`/
// `drain_outbound` contract SPEC_FULL.md S6 asks the core to expose. The four
// state machines it composes do not share mutable state with each other.

use crate::chunk::{Deframer, Framer, RawMessage};
use crate::handshake::{Handshake, HandshakeOutcome};
use crate::log::Logger;
use crate::message::Message;

use super::config::SessionConfig;
use super::error::SessionResult;
use super::event::Event;
use super::output::Output;
use super::processor::Processor;

enum Phase {
    Handshaking(Handshake),
    Running(Processor),
    Closed,
}

/// One RTMP connection's worth of protocol state. Owns no socket: the caller
/// feeds it inbound bytes and drains outbound bytes, per SPEC_FULL.md S6.
pub struct Session {
    phase: Phase,
    deframer: Deframer,
    framer: Framer,
    config: SessionConfig,
    logger: Logger,
    outbound: Vec<u8>,
}

impl Session {
    /// Starts a new session, seeding S0+S1 onto the outbound buffer.
    pub fn new(config: SessionConfig, logger: Logger) -> Session {
        let (handshake, initial_bytes) = Handshake::new();
        Session {
            phase: Phase::Handshaking(handshake),
            deframer: Deframer::new(),
            framer: Framer::new(crate::chunk::DEFAULT_CHUNK_SIZE),
            config,
            logger,
            outbound: initial_bytes,
        }
    }

    /// Feeds newly received bytes from the transport. Returns the application
    /// events produced, in order. Outbound protocol responses this produced
    /// are queued internally; collect them with `drain_outbound`.
    pub fn feed_inbound(&mut self, bytes: &[u8]) -> Vec<Event> {
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Handshaking(handshake) => self.advance_handshake(handshake, bytes),
            Phase::Running(processor) => {
                self.phase = Phase::Running(processor);
                self.process_chunk_bytes(bytes)
            }
            Phase::Closed => Vec::new(),
        }
    }

    fn advance_handshake(&mut self, handshake: Handshake, bytes: &[u8]) -> Vec<Event> {
        match handshake.process_bytes(bytes) {
            (handshake, HandshakeOutcome::Incomplete) => {
                self.phase = Phase::Handshaking(handshake);
                Vec::new()
            }
            (_, HandshakeOutcome::Failure(err)) => self.close(format!("handshake failed: {err}")),
            (_, HandshakeOutcome::Success { bytes_to_send, remaining, .. }) => {
                self.outbound.extend_from_slice(&bytes_to_send);
                self.phase = Phase::Running(Processor::new(
                    self.config.clone(),
                    self.logger.make_child_logger("[PROCESSOR] "),
                ));
                self.process_chunk_bytes(&remaining)
            }
        }
    }

    /// Drives the deframer one message at a time rather than draining the
    /// whole batch up front: a `SetChunkSize` message must change the
    /// deframer's chunk size (via `apply_outputs`) before the next chunk
    /// header in this same batch is parsed, not only on the next call.
    fn process_chunk_bytes(&mut self, bytes: &[u8]) -> Vec<Event> {
        self.deframer.push_bytes(bytes);
        let mut events = Vec::new();
        loop {
            match self.deframer.try_next_message() {
                Ok(Some(raw)) => events.extend(self.process_raw_message(raw)),
                Ok(None) => break,
                Err(err) => {
                    events.extend(self.close(format!("chunk stream protocol violation: {err}")));
                    break;
                }
            }
        }
        events
    }

    fn process_raw_message(&mut self, raw: RawMessage) -> Vec<Event> {
        let message = match Message::parse(&raw) {
            Ok(message) => message,
            Err(err) => {
                let logger = &self.logger;
                crate::log_debug!(
                    logger,
                    format!("dropping malformed message (type {}): {err}", raw.message_type_id)
                );
                return Vec::new();
            }
        };

        let outputs = match &mut self.phase {
            Phase::Running(processor) => processor.handle(message),
            _ => return Vec::new(),
        };
        self.apply_outputs(outputs)
    }

    /// Notifies the session that `n` more bytes arrived from the peer, for
    /// window-acknowledgement bookkeeping. Any Acknowledgement this produces
    /// is queued onto `drain_outbound`.
    pub fn notify_bytes_received(&mut self, n: u64) {
        if let Phase::Running(processor) = &mut self.phase {
            let outputs = processor.notify_bytes_received(n);
            self.apply_outputs(outputs);
        }
    }

    /// Accepts a pending request (see `Event::ConnectionRequested`).
    pub fn accept_request(&mut self, request_id: u32) -> SessionResult<()> {
        match &mut self.phase {
            Phase::Running(processor) => {
                let outputs = processor.accept_request(request_id)?;
                self.apply_outputs(outputs);
                Ok(())
            }
            _ => Err(super::error::SessionError::UnknownRequest { request_id }),
        }
    }

    /// Rejects a pending request (see `Event::ConnectionRequested`).
    pub fn reject_request(&mut self, request_id: u32, reason: &str) -> SessionResult<()> {
        match &mut self.phase {
            Phase::Running(processor) => {
                let outputs = processor.reject_request(request_id, reason)?;
                self.apply_outputs(outputs);
                Ok(())
            }
            _ => Err(super::error::SessionError::UnknownRequest { request_id }),
        }
    }

    /// Drains bytes queued for the transport to send.
    pub fn drain_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    fn apply_outputs(&mut self, outputs: Vec<Output>) -> Vec<Event> {
        let mut events = Vec::new();
        for output in outputs {
            match output {
                Output::Response(message) => self.send(message),
                Output::Event(event) => {
                    if let Event::PeerChunkSizeChanged { size } = &event {
                        if let Err(err) = self.deframer.set_chunk_size(*size) {
                            events.extend(self.close(format!("peer sent invalid chunk size: {err}")));
                            continue;
                        }
                    }
                    events.push(event);
                }
            }
        }
        events
    }

    fn send(&mut self, message: Message) {
        let (type_id, payload) = match message.serialize() {
            Ok(parts) => parts,
            Err(err) => {
                let logger = &self.logger;
                crate::log_debug!(logger, format!("failed to encode outbound message: {err}"));
                return;
            }
        };
        let chunk_stream_id = message.default_chunk_stream_id();
        let raw = RawMessage { message_type_id: type_id, timestamp: 0, stream_id: 0, chunk_stream_id, payload };
        self.outbound.extend(self.framer.frame(&raw));
        if let Message::SetChunkSize(size) = message {
            self.framer.set_chunk_size(size);
        }
    }

    fn close(&mut self, reason: String) -> Vec<Event> {
        let logger = &self.logger;
        crate::log_error!(logger, &reason);
        self.phase = Phase::Closed;
        vec![Event::SessionClosed { reason }]
    }
}
