// Drives the session-level state machine: turns inbound messages into
// outbound messages and application-visible events (C5). See
// SPEC_FULL.md S4.5.

use crate::log::Logger;
use crate::message::{
    AmfEncoding, Command, Message, PeerBandwidthLimitType, UserControlEvent,
};
use crate::amf::Amf0Value;

use super::config::SessionConfig;
use super::error::{SessionError, SessionResult};
use super::event::Event;
use super::output::Output;
use super::request::PendingRequest;
use super::state::{SessionState, Stage};

/// Owns the session state machine and exposes the operations named in
/// SPEC_FULL.md S4.5. Does not know about chunking, framing, or the
/// handshake -- those are the driver's job (`crate::session::Session`).
pub struct Processor {
    pub state: SessionState,
    logger: Logger,
}

impl Processor {
    pub fn new(config: SessionConfig, logger: Logger) -> Processor {
        Processor { state: SessionState::new(config), logger }
    }

    /// Accounts for `n` newly received bytes and emits an Acknowledgement for
    /// every window-size threshold crossed since the last one. A single call
    /// spanning multiple thresholds (a large read, or a small window) emits
    /// one Acknowledgement per threshold, each carrying the cumulative byte
    /// count at that threshold -- not just at the end of the batch.
    pub fn notify_bytes_received(&mut self, n: u64) -> Vec<Output> {
        self.state.peer_bytes_received += n;
        let mut outputs = Vec::new();

        let window = match self.state.peer_window_ack_size {
            Some(w) if w > 0 => w,
            _ => return outputs,
        };

        while self.state.peer_bytes_received - self.state.last_acknowledgement_sent_at >= window {
            self.state.last_acknowledgement_sent_at += window;
            outputs.push(Output::response(Message::Acknowledgement {
                sequence_number: self.state.last_acknowledgement_sent_at as u32,
            }));
        }

        outputs
    }

    /// Dispatches one decoded message. Malformed content that already made it
    /// past the message codec (e.g. a command missing its `app` property) is
    /// a semantic anomaly, not a fatal error: it is logged and dropped.
    pub fn handle(&mut self, message: Message) -> Vec<Output> {
        let type_id = message.type_id();
        match message {
            Message::SetChunkSize(size) => {
                vec![Output::event(Event::PeerChunkSizeChanged { size })]
            }
            Message::WindowAcknowledgementSize(size) => {
                self.state.peer_window_ack_size = Some(size as u64);
                Vec::new()
            }
            Message::Command(cmd) => self.handle_command(cmd),
            Message::Abort { .. }
            | Message::Acknowledgement { .. }
            | Message::UserControl(_)
            | Message::SetPeerBandwidth { .. }
            | Message::AudioData(_)
            | Message::VideoData(_)
            | Message::Data { .. } => {
                self.log_anomaly(&format!(
                    "ignoring message type {type_id} in stage {:?} (not yet handled by this core)",
                    self.state.stage
                ));
                Vec::new()
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) -> Vec<Output> {
        if self.state.stage == Stage::Started && cmd.name == "connect" {
            return self.handle_connect(cmd);
        }

        self.log_anomaly(&format!(
            "ignoring command {:?} in stage {:?}",
            cmd.name, self.state.stage
        ));
        Vec::new()
    }

    fn handle_connect(&mut self, cmd: Command) -> Vec<Output> {
        let app_name = match cmd.command_object.get_property("app").and_then(Amf0Value::get_string) {
            Some(app) => app.to_string(),
            None => {
                self.log_anomaly("connect command is missing its \"app\" property");
                return Vec::new();
            }
        };

        let request_id = self.state.queue_request(PendingRequest::Connect {
            app_name: app_name.clone(),
            transaction_id: cmd.transaction_id,
        });

        vec![
            Output::response(Message::SetPeerBandwidth {
                size: self.state.config.peer_bandwidth,
                limit_type: PeerBandwidthLimitType::Hard,
            }),
            Output::response(Message::WindowAcknowledgementSize(self.state.config.window_ack_size)),
            Output::response(Message::SetChunkSize(self.state.config.chunk_size)),
            Output::response(Message::UserControl(UserControlEvent::StreamBegin { stream_id: 0 })),
            Output::event(Event::ConnectionRequested { request_id, app_name }),
        ]
    }

    /// Accepts a pending request, removing it from `active_requests`.
    pub fn accept_request(&mut self, request_id: u32) -> SessionResult<Vec<Output>> {
        let request = self
            .state
            .active_requests
            .remove(&request_id)
            .ok_or(SessionError::UnknownRequest { request_id })?;

        match request {
            PendingRequest::Connect { app_name, transaction_id } => {
                self.state.stage = Stage::Connected;
                self.state.connected_app_name = Some(app_name);
                self.state.outbound_chunk_size = self.state.config.chunk_size;
                Ok(vec![Output::response(Message::Command(connect_result(
                    transaction_id,
                    &self.state.config,
                )))])
            }
        }
    }

    /// Rejects a pending request, removing it from `active_requests`.
    pub fn reject_request(&mut self, request_id: u32, reason: &str) -> SessionResult<Vec<Output>> {
        let request = self
            .state
            .active_requests
            .remove(&request_id)
            .ok_or(SessionError::UnknownRequest { request_id })?;

        match request {
            PendingRequest::Connect { transaction_id, .. } => {
                Ok(vec![Output::response(Message::Command(connect_error(transaction_id, reason)))])
            }
        }
    }

    fn log_anomaly(&self, message: &str) {
        let logger = &self.logger;
        crate::log_debug!(logger, message);
    }
}

fn connect_result(transaction_id: f64, config: &SessionConfig) -> Command {
    Command {
        name: "_result".to_string(),
        transaction_id,
        command_object: Amf0Value::object(vec![
            ("fmsVer", Amf0Value::String(config.fms_version.clone())),
            ("capabilities", Amf0Value::Number(31.0)),
        ]),
        additional_values: vec![Amf0Value::object(vec![
            ("level", Amf0Value::String("status".to_string())),
            ("code", Amf0Value::String("NetConnection.Connect.Success".to_string())),
            ("description", Amf0Value::String("Connection succeeded".to_string())),
            ("objectEncoding", Amf0Value::Number(0.0)),
        ])],
        encoding: AmfEncoding::Amf0,
    }
}

fn connect_error(transaction_id: f64, reason: &str) -> Command {
    Command {
        name: "_error".to_string(),
        transaction_id,
        command_object: Amf0Value::Null,
        additional_values: vec![Amf0Value::object(vec![
            ("level", Amf0Value::String("error".to_string())),
            ("code", Amf0Value::String("NetConnection.Connect.Rejected".to_string())),
            ("description", Amf0Value::String(reason.to_string())),
        ])],
        encoding: AmfEncoding::Amf0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            chunk_size: 4096,
            window_ack_size: 2_500_000,
            peer_bandwidth: 2_500_000,
            fms_version: "FMS/3,5,7,7009".to_string(),
        }
    }

    fn connect_command(app: &str, transaction_id: f64) -> Message {
        Message::Command(Command {
            name: "connect".to_string(),
            transaction_id,
            command_object: Amf0Value::object(vec![
                ("app", Amf0Value::String(app.to_string())),
                ("tcUrl", Amf0Value::String("rtmp://h/live".to_string())),
            ]),
            additional_values: vec![],
            encoding: AmfEncoding::Amf0,
        })
    }

    #[test]
    fn connect_produces_four_responses_then_an_event() {
        let mut processor = Processor::new(config(), Logger::new_disabled());
        let outputs = processor.handle(connect_command("live", 1.0));
        assert_eq!(outputs.len(), 5);
        assert!(matches!(outputs[0], Output::Response(Message::SetPeerBandwidth { .. })));
        assert!(matches!(outputs[1], Output::Response(Message::WindowAcknowledgementSize(_))));
        assert!(matches!(outputs[2], Output::Response(Message::SetChunkSize(_))));
        assert!(matches!(outputs[3], Output::Response(Message::UserControl(UserControlEvent::StreamBegin { stream_id: 0 }))));
        match &outputs[4] {
            Output::Event(Event::ConnectionRequested { request_id, app_name }) => {
                assert_eq!(*request_id, 1);
                assert_eq!(app_name, "live");
            }
            _ => panic!("expected ConnectionRequested event"),
        }
    }

    #[test]
    fn accept_request_transitions_to_connected_and_echoes_transaction_id() {
        let mut processor = Processor::new(config(), Logger::new_disabled());
        processor.handle(connect_command("live", 1.0));
        let outputs = processor.accept_request(1).unwrap();
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            Output::Response(Message::Command(cmd)) => {
                assert_eq!(cmd.name, "_result");
                assert_eq!(cmd.transaction_id, 1.0);
                assert_eq!(
                    cmd.command_object.get_property("fmsVer").and_then(Amf0Value::get_string),
                    Some("FMS/3,5,7,7009")
                );
                assert_eq!(
                    cmd.additional_values[0].get_property("code").and_then(Amf0Value::get_string),
                    Some("NetConnection.Connect.Success")
                );
            }
            _ => panic!("expected _result command"),
        }
        assert_eq!(processor.state.stage, Stage::Connected);
        assert_eq!(processor.state.connected_app_name.as_deref(), Some("live"));
    }

    #[test]
    fn accept_request_removes_it_and_a_second_call_fails() {
        let mut processor = Processor::new(config(), Logger::new_disabled());
        processor.handle(connect_command("live", 1.0));
        processor.accept_request(1).unwrap();
        assert!(processor.state.active_requests.get(&1).is_none());
        let err = processor.accept_request(1).unwrap_err();
        assert!(matches!(err, SessionError::UnknownRequest { request_id: 1 }));
    }

    #[test]
    fn reject_request_emits_error_command_with_same_transaction_id() {
        let mut processor = Processor::new(config(), Logger::new_disabled());
        processor.handle(connect_command("live", 3.0));
        let outputs = processor.reject_request(1, "invalid key").unwrap();
        match &outputs[0] {
            Output::Response(Message::Command(cmd)) => {
                assert_eq!(cmd.name, "_error");
                assert_eq!(cmd.transaction_id, 3.0);
            }
            _ => panic!("expected _error command"),
        }
        assert_eq!(processor.state.stage, Stage::Started);
    }

    #[test]
    fn acknowledgement_cadence_matches_floor_of_bytes_over_window() {
        let mut processor = Processor::new(config(), Logger::new_disabled());
        processor.state.peer_window_ack_size = Some(2_500_000);

        let mut acks = Vec::new();
        for chunk in [1_000_000u64, 4_000_000, 2_500_000] {
            for output in processor.notify_bytes_received(chunk) {
                if let Output::Response(Message::Acknowledgement { sequence_number }) = output {
                    acks.push(sequence_number);
                }
            }
        }
        assert_eq!(acks, vec![2_500_000, 5_000_000, 7_500_000]);
    }

    #[test]
    fn connect_outside_started_stage_is_ignored() {
        let mut processor = Processor::new(config(), Logger::new_disabled());
        processor.handle(connect_command("live", 1.0));
        processor.accept_request(1).unwrap();
        let outputs = processor.handle(connect_command("live", 2.0));
        assert!(outputs.is_empty());
    }

    #[test]
    fn set_chunk_size_surfaces_an_event_with_no_response() {
        let mut processor = Processor::new(config(), Logger::new_disabled());
        let outputs = processor.handle(Message::SetChunkSize(4096));
        assert_eq!(outputs, vec![Output::event(Event::PeerChunkSizeChanged { size: 4096 })]);
    }
}
