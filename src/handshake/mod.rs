// RTMP handshake FSM (simple/old format only: C0/C1/C2 <-> S0/S1/S2)

mod error;

pub use error::{HandshakeError, HandshakeResult};

use rand::RngCore;

pub const RTMP_VERSION: u8 = 0x03;
pub const HANDSHAKE_SIG_SIZE: usize = 1536;

#[derive(Debug)]
enum State {
    WaitingForC0C1 { s1: Vec<u8> },
    WaitingForC2 { peer_start_timestamp: u32, s2: Vec<u8> },
    Complete,
    Failed,
}

/// Drives the plain-text RTMP handshake for one connection. Each endpoint
/// (here, the server side) runs its own instance; the FSM is purely local
/// bookkeeping over a byte stream, with no knowledge of the transport.
#[derive(Debug)]
pub struct Handshake {
    state: State,
    buffer: Vec<u8>,
}

/// Result of feeding bytes into the handshake.
pub enum HandshakeOutcome {
    /// Still waiting for more input; nothing new to send.
    Incomplete,
    /// Handshake just completed. `bytes_to_send` carries any handshake bytes
    /// still queued (e.g. S2, if it had not been sent yet), and `remaining`
    /// is the leftover input past the handshake boundary, to be handed to
    /// the chunk deframer.
    Success { peer_start_timestamp: u32, bytes_to_send: Vec<u8>, remaining: Vec<u8> },
    Failure(HandshakeError),
}

impl Handshake {
    /// Seeds S0+S1 on the outbound queue and returns the bytes to send immediately.
    pub fn new() -> (Handshake, Vec<u8>) {
        let s1 = make_s1();
        let mut bytes_to_send = Vec::with_capacity(1 + HANDSHAKE_SIG_SIZE);
        bytes_to_send.push(RTMP_VERSION);
        bytes_to_send.extend_from_slice(&s1);
        let fsm = Handshake { state: State::WaitingForC0C1 { s1 }, buffer: Vec::new() };
        (fsm, bytes_to_send)
    }

    /// Feeds newly received bytes into the FSM, returning the outcome. Once a
    /// `Success` or `Failure` outcome has been produced, further calls return
    /// `Failure(HandshakeError::AlreadyDone)`.
    pub fn process_bytes(mut self, incoming: &[u8]) -> (Handshake, HandshakeOutcome) {
        self.buffer.extend_from_slice(incoming);
        match self.state {
            State::WaitingForC0C1 { .. } => self.advance_from_waiting_for_c0c1(),
            State::WaitingForC2 { .. } => self.advance_from_waiting_for_c2(),
            State::Complete | State::Failed => {
                let outcome = HandshakeOutcome::Failure(HandshakeError::AlreadyDone);
                (self, outcome)
            }
        }
    }

    fn advance_from_waiting_for_c0c1(mut self) -> (Handshake, HandshakeOutcome) {
        let needed = 1 + HANDSHAKE_SIG_SIZE;
        if self.buffer.len() < needed {
            return (self, HandshakeOutcome::Incomplete);
        }
        let c0 = self.buffer[0];
        if c0 != RTMP_VERSION {
            self.state = State::Failed;
            return (self, HandshakeOutcome::Failure(HandshakeError::UnsupportedVersion { version: c0 }));
        }
        let c1 = self.buffer[1..needed].to_vec();
        self.buffer.drain(0..needed);

        let peer_start_timestamp = u32::from_be_bytes([c1[0], c1[1], c1[2], c1[3]]);
        let s2 = c1;
        self.state = State::WaitingForC2 { peer_start_timestamp, s2 };
        self.advance_from_waiting_for_c2()
    }

    fn advance_from_waiting_for_c2(mut self) -> (Handshake, HandshakeOutcome) {
        let (peer_start_timestamp, s2) = match &self.state {
            State::WaitingForC2 { peer_start_timestamp, s2 } => (*peer_start_timestamp, s2.clone()),
            _ => unreachable!("advance_from_waiting_for_c2 called outside WaitingForC2"),
        };
        if self.buffer.len() < HANDSHAKE_SIG_SIZE {
            return (self, HandshakeOutcome::Incomplete);
        }
        let remaining = self.buffer.split_off(HANDSHAKE_SIG_SIZE);
        self.buffer.clear();
        self.state = State::Complete;
        (self, HandshakeOutcome::Success { peer_start_timestamp, bytes_to_send: s2, remaining })
    }
}

fn make_s1() -> Vec<u8> {
    let mut s1 = vec![0u8; HANDSHAKE_SIG_SIZE];
    // First 4 bytes: our start timestamp. Zero is a valid, commonly used choice
    // since peers do not validate it in the simple handshake.
    s1[0..4].copy_from_slice(&0u32.to_be_bytes());
    // Next 4 bytes are the zero block per the plain-text handshake layout.
    rand::rng().fill_bytes(&mut s1[8..]);
    s1
}
