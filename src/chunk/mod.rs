// Chunk stream deframing and framing (RTMP chunk format)

mod error;

pub use error::{ChunkError, ChunkResult};

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

pub const DEFAULT_CHUNK_SIZE: u32 = 128;
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;
const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;
const EXTENDED_TIMESTAMP_MARKER: u32 = 0xFFFFFF;

/// A fully reassembled RTMP message, as handed off to the message codec.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub message_type_id: u8,
    pub timestamp: u32,
    pub stream_id: u32,
    pub chunk_stream_id: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct ChunkStreamState {
    message_type_id: u8,
    stream_id: u32,
    message_length: usize,
    timestamp: u32,
    timestamp_delta: u32,
    extended_timestamp: bool,
    /// Bytes collected so far for the message currently being reassembled.
    in_progress: Vec<u8>,
    has_context: bool,
}

/// Reassembles a byte stream into `RawMessage`s, tracking per-chunk-stream
/// state so Type-1/2/3 chunk headers can inherit the fields they omit.
pub struct Deframer {
    streams: HashMap<u32, ChunkStreamState>,
    chunk_size: u32,
    pending: Vec<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Deframer { streams: HashMap::new(), chunk_size: DEFAULT_CHUNK_SIZE, pending: Vec::new() }
    }

    /// Changes the inbound chunk size. Takes effect starting with the next
    /// chunk header parsed; a SetChunkSize message itself is read at the
    /// size in force when it arrived.
    pub fn set_chunk_size(&mut self, size: u32) -> ChunkResult<()> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(ChunkError::InvalidChunkSize { size });
        }
        self.chunk_size = size;
        Ok(())
    }

    /// Buffers newly received bytes without parsing them yet. Callers that
    /// need to react to a completed message (e.g. apply a SetChunkSize)
    /// before the next chunk header is parsed should use this with
    /// `try_next_message` instead of `feed`.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Parses and consumes buffered chunks until one completes a message or
    /// the buffer runs out. `set_chunk_size` calls made between successive
    /// calls to this method take effect on the very next chunk header it
    /// parses, since no look-ahead past one message is ever buffered inside
    /// a single call.
    pub fn try_next_message(&mut self) -> ChunkResult<Option<RawMessage>> {
        loop {
            match self.try_read_one()? {
                Some((consumed, message)) => {
                    self.pending.drain(0..consumed);
                    if let Some(message) = message {
                        return Ok(Some(message));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    /// Feeds newly received bytes and drains as many complete messages as
    /// the buffered input allows. Leftover partial chunk data stays buffered
    /// for the next call.
    ///
    /// This parses the whole buffer before returning, so a `SetChunkSize`
    /// message and the chunks that follow it within the same call are both
    /// read at the chunk size in force when `feed` was entered. Callers that
    /// need a `set_chunk_size` to take effect partway through one batch of
    /// bytes (as the session driver does) should drive `push_bytes` +
    /// `try_next_message` instead.
    pub fn feed(&mut self, bytes: &[u8]) -> ChunkResult<Vec<RawMessage>> {
        self.push_bytes(bytes);
        let mut messages = Vec::new();
        while let Some(message) = self.try_next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Attempts to parse and apply a single chunk from the front of `pending`.
    /// Returns `Ok(None)` if there are not yet enough bytes buffered.
    /// On success, returns how many bytes were consumed and, if the chunk
    /// completed a message, the reassembled `RawMessage`.
    fn try_read_one(&mut self) -> ChunkResult<Option<(usize, Option<RawMessage>)>> {
        let buf = &self.pending;
        if buf.is_empty() {
            return Ok(None);
        }

        let basic_header_byte = buf[0];
        let fmt = basic_header_byte >> 6;
        let maybe_csid = basic_header_byte & 0x3F;

        let (csid, basic_header_len) = match maybe_csid {
            0 => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                (64 + buf[1] as u32, 2)
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                (64 + buf[1] as u32 + buf[2] as u32 * 256, 3)
            }
            other => (other as u32, 1),
        };

        let message_header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            3 => 0,
            _ => unreachable!("fmt is 2 bits, always 0..=3"),
        };

        let has_context = self.streams.get(&csid).map(|s| s.has_context).unwrap_or(false);
        if fmt != 0 && !has_context {
            return Err(ChunkError::NoContextForContinuation { csid, fmt });
        }

        let header_end = basic_header_len + message_header_len;
        if buf.len() < header_end {
            return Ok(None);
        }

        let mut timestamp_field: u32 = 0;
        let mut message_length: usize = 0;
        let mut message_type_id: u8 = 0;
        let mut stream_id: u32 = 0;

        let mh = &buf[basic_header_len..header_end];
        if fmt <= 2 {
            timestamp_field = BigEndian::read_u24(&mh[0..3]);
        }
        if fmt <= 1 {
            message_length = BigEndian::read_u24(&mh[3..6]) as usize;
            message_type_id = mh[6];
        }
        if fmt == 0 {
            stream_id = LittleEndian::read_u32(&mh[7..11]);
        }

        let uses_extended_timestamp = fmt != 3 && timestamp_field == EXTENDED_TIMESTAMP_MARKER;
        let state_extended = self.streams.get(&csid).map(|s| s.extended_timestamp).unwrap_or(false);
        let needs_extended_read = uses_extended_timestamp || (fmt == 3 && state_extended);

        let mut offset = header_end;
        let mut extended_timestamp: u32 = 0;
        if needs_extended_read {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            extended_timestamp = BigEndian::read_u32(&buf[offset..offset + 4]);
            offset += 4;
        }

        // Establish/refresh per-chunk-stream fields per the inheritance rules.
        let entry = self.streams.entry(csid).or_insert_with(ChunkStreamState::default);

        // A Type-0/1/2 header starts a new message on this chunk stream id; one may
        // not arrive while a previous message on the same id is still being
        // reassembled (ordering guarantee in SPEC_FULL.md S4.3, monotonicity
        // invariant in S3).
        if fmt != 3 && !entry.in_progress.is_empty() {
            return Err(ChunkError::MessageReplacedMidReassembly {
                csid,
                fmt,
                buffered: entry.in_progress.len(),
                declared_length: entry.message_length,
            });
        }

        match fmt {
            0 => {
                entry.message_type_id = message_type_id;
                entry.stream_id = stream_id;
                entry.message_length = message_length;
                entry.timestamp = if uses_extended_timestamp { extended_timestamp } else { timestamp_field };
                entry.timestamp_delta = 0;
                entry.extended_timestamp = uses_extended_timestamp;
                entry.in_progress.clear();
            }
            1 => {
                entry.message_type_id = message_type_id;
                entry.message_length = message_length;
                let delta = if uses_extended_timestamp { extended_timestamp } else { timestamp_field };
                entry.timestamp = entry.timestamp.wrapping_add(delta);
                entry.timestamp_delta = delta;
                entry.extended_timestamp = uses_extended_timestamp;
                entry.in_progress.clear();
            }
            2 => {
                let delta = if uses_extended_timestamp { extended_timestamp } else { timestamp_field };
                entry.timestamp = entry.timestamp.wrapping_add(delta);
                entry.timestamp_delta = delta;
                entry.extended_timestamp = uses_extended_timestamp;
                entry.in_progress.clear();
            }
            3 => {
                if entry.in_progress.is_empty() {
                    // First chunk of a message inheriting everything, including delta.
                    entry.timestamp = entry.timestamp.wrapping_add(entry.timestamp_delta);
                }
            }
            _ => unreachable!(),
        }
        if message_length > MAX_MESSAGE_LENGTH {
            return Err(ChunkError::MessageTooLarge { csid });
        }
        entry.has_context = true;

        let remaining_for_message = entry.message_length.saturating_sub(entry.in_progress.len());
        let take = remaining_for_message.min(self.chunk_size as usize);
        if buf.len() < offset + take {
            return Ok(None);
        }

        entry.in_progress.extend_from_slice(&buf[offset..offset + take]);
        offset += take;

        let message = if entry.in_progress.len() >= entry.message_length {
            let payload = std::mem::take(&mut entry.in_progress);
            Some(RawMessage {
                message_type_id: entry.message_type_id,
                timestamp: entry.timestamp,
                stream_id: entry.stream_id,
                chunk_stream_id: csid,
                payload,
            })
        } else {
            None
        };

        Ok(Some((offset, message)))
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes outbound messages into chunks. Always emits a Type-0 header
/// chunk followed by Type-3 continuations; never reuses a prior chunk's
/// header fields via Type-1/2.
pub struct Framer {
    chunk_size: u32,
}

impl Framer {
    pub fn new(chunk_size: u32) -> Self {
        Framer { chunk_size: chunk_size.max(1) }
    }

    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.max(1);
    }

    pub fn frame(&self, message: &RawMessage) -> Vec<u8> {
        let use_extended_timestamp = message.timestamp >= EXTENDED_TIMESTAMP_MARKER;
        let basic_header_0 = serialize_basic_header(0, message.chunk_stream_id);
        let basic_header_3 = serialize_basic_header(3, message.chunk_stream_id);

        let mut out = Vec::with_capacity(message.payload.len() + 32);
        out.extend_from_slice(&basic_header_0);
        write_type0_message_header(&mut out, message, use_extended_timestamp);
        if use_extended_timestamp {
            out.extend_from_slice(&message.timestamp.to_be_bytes());
        }

        let chunk_size = self.chunk_size as usize;
        let mut offset = 0;
        let total = message.payload.len();
        while offset < total {
            let end = (offset + chunk_size).min(total);
            out.extend_from_slice(&message.payload[offset..end]);
            offset = end;
            if offset < total {
                out.extend_from_slice(&basic_header_3);
                if use_extended_timestamp {
                    out.extend_from_slice(&message.timestamp.to_be_bytes());
                }
            }
        }
        out
    }
}

fn serialize_basic_header(fmt: u8, csid: u32) -> Vec<u8> {
    if csid >= 64 + 255 {
        let v = csid - 64;
        vec![(fmt << 6) | 1, v as u8, (v >> 8) as u8]
    } else if csid >= 64 {
        vec![fmt << 6, (csid - 64) as u8]
    } else {
        vec![(fmt << 6) | csid as u8]
    }
}

fn write_type0_message_header(out: &mut Vec<u8>, message: &RawMessage, use_extended_timestamp: bool) {
    let timestamp_field = if use_extended_timestamp { EXTENDED_TIMESTAMP_MARKER } else { message.timestamp };
    let mut ts_bytes = [0u8; 4];
    BigEndian::write_u32(&mut ts_bytes, timestamp_field);
    out.extend_from_slice(&ts_bytes[1..]);

    let mut len_bytes = [0u8; 4];
    BigEndian::write_u32(&mut len_bytes, message.payload.len() as u32);
    out.extend_from_slice(&len_bytes[1..]);

    out.push(message.message_type_id);

    let mut stream_id_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut stream_id_bytes, message.stream_id);
    out.extend_from_slice(&stream_id_bytes);
}

/// Reads just the basic header's chunk stream id and format from a buffer,
/// returning the id, the format, and how many bytes the basic header used.
/// Used by callers that need to peek at framing without a full `Deframer`.
pub fn peek_basic_header(buf: &[u8]) -> Option<(u32, u8, usize)> {
    let mut cursor = std::io::Cursor::new(buf);
    let b0 = cursor.read_u8().ok()?;
    let fmt = b0 >> 6;
    match b0 & 0x3F {
        0 => {
            let b1 = cursor.read_u8().ok()?;
            Some((64 + b1 as u32, fmt, 2))
        }
        1 => {
            let b1 = cursor.read_u8().ok()?;
            let b2 = cursor.read_u8().ok()?;
            Some((64 + b1 as u32 + b2 as u32 * 256, fmt, 3))
        }
        other => Some((other as u32, fmt, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(csid: u32, stream_id: u32, timestamp: u32, payload: Vec<u8>) -> RawMessage {
        RawMessage { message_type_id: 20, timestamp, stream_id, chunk_stream_id: csid, payload }
    }

    #[test]
    fn single_chunk_round_trip() {
        let framer = Framer::new(128);
        let msg = sample_message(3, 1, 0, b"hello".to_vec());
        let bytes = framer.frame(&msg);

        let mut deframer = Deframer::new();
        let messages = deframer.feed(&bytes).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, b"hello");
        assert_eq!(messages[0].message_type_id, 20);
        assert_eq!(messages[0].stream_id, 1);
    }

    #[test]
    fn multi_chunk_message_reassembles() {
        let framer = Framer::new(8);
        let payload = (0u8..40).collect::<Vec<u8>>();
        let msg = sample_message(5, 1, 10, payload.clone());
        let bytes = framer.frame(&msg);

        let mut deframer = Deframer::new();
        deframer.set_chunk_size(8).unwrap();
        let messages = deframer.feed(&bytes).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload, payload);
    }

    #[test]
    fn interleaved_chunk_streams_each_reassemble_independently() {
        let framer = Framer::new(128);
        let msg_a = sample_message(3, 1, 0, b"AAAA".to_vec());
        let msg_b = sample_message(4, 1, 0, b"BBBB".to_vec());

        let mut bytes = framer.frame(&msg_a);
        bytes.extend(framer.frame(&msg_b));

        let mut deframer = Deframer::new();
        let messages = deframer.feed(&bytes).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, b"AAAA");
        assert_eq!(messages[1].payload, b"BBBB");
    }

    #[test]
    fn feeding_byte_by_byte_still_reassembles() {
        let framer = Framer::new(16);
        let payload = (0u8..50).collect::<Vec<u8>>();
        let msg = sample_message(6, 1, 0, payload.clone());
        let bytes = framer.frame(&msg);

        let mut deframer = Deframer::new();
        deframer.set_chunk_size(16).unwrap();
        let mut collected = Vec::new();
        for b in &bytes {
            collected.extend(deframer.feed(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].payload, payload);
    }

    #[test]
    fn extended_timestamp_round_trips() {
        let framer = Framer::new(128);
        let msg = sample_message(3, 2, 0x0100_0001, b"x".to_vec());
        let bytes = framer.frame(&msg);

        let mut deframer = Deframer::new();
        let messages = deframer.feed(&bytes).unwrap();
        assert_eq!(messages[0].timestamp, 0x0100_0001);
    }

    #[test]
    fn continuation_without_prior_context_is_an_error() {
        let mut deframer = Deframer::new();
        let err = deframer.feed(&[0xC3]).unwrap_err();
        assert!(matches!(err, ChunkError::NoContextForContinuation { .. }));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut deframer = Deframer::new();
        assert!(matches!(deframer.set_chunk_size(0), Err(ChunkError::InvalidChunkSize { size: 0 })));
    }

    #[test]
    fn new_header_mid_reassembly_is_an_error() {
        let mut deframer = Deframer::new();
        deframer.set_chunk_size(128).unwrap();

        // Type-0 header announcing a 1000-byte message, but only one 128-byte
        // continuation chunk of it ever arrives.
        let partial = sample_message(4, 1, 0, vec![0xAA; 1000]);
        let framed = Framer::new(128).frame(&partial);
        let first_chunk_and_one_continuation = &framed[..(1 + 11) + 128];
        let messages = deframer.feed(first_chunk_and_one_continuation).unwrap();
        assert!(messages.is_empty());

        // A fresh Type-0 header on the same chunk stream id, announcing a
        // shorter 50-byte message, must not be silently accepted.
        let replacement = sample_message(4, 1, 0, vec![0xBB; 50]);
        let err = deframer.feed(&Framer::new(128).frame(&replacement)).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::MessageReplacedMidReassembly { csid: 4, fmt: 0, buffered: 128, declared_length: 1000 }
        ));
    }

    #[test]
    fn message_sequence_round_trips_at_every_configured_chunk_size() {
        let messages = vec![
            sample_message(3, 1, 0, b"connect".to_vec()),
            sample_message(4, 1, 100, (0u8..250).collect()),
            sample_message(4, 1, 200, b"short".to_vec()),
            sample_message(5, 1, 0, vec![0xAB; 5000]),
        ];

        for &chunk_size in &[128u32, 4096, MAX_CHUNK_SIZE - 1] {
            let framer = Framer::new(chunk_size);
            let mut deframer = Deframer::new();
            deframer.set_chunk_size(chunk_size).unwrap();

            let mut received = Vec::new();
            for msg in &messages {
                let bytes = framer.frame(msg);
                received.extend(deframer.feed(&bytes).unwrap());
            }

            assert_eq!(received.len(), messages.len(), "chunk_size {chunk_size}");
            for (expected, actual) in messages.iter().zip(received.iter()) {
                assert_eq!(actual.payload, expected.payload, "chunk_size {chunk_size}");
                assert_eq!(actual.chunk_stream_id, expected.chunk_stream_id, "chunk_size {chunk_size}");
                assert_eq!(actual.stream_id, expected.stream_id, "chunk_size {chunk_size}");
            }
        }
    }

    #[test]
    fn try_next_message_lets_a_chunk_size_change_apply_mid_batch() {
        let mut deframer = Deframer::new();
        let small_framer = Framer::new(128);
        let big_framer = Framer::new(4096);

        let set_chunk_size_msg = RawMessage {
            message_type_id: crate::message::TYPE_SET_CHUNK_SIZE,
            timestamp: 0,
            stream_id: 0,
            chunk_stream_id: 2,
            payload: 4096u32.to_be_bytes().to_vec(),
        };
        let big_payload = vec![0xCDu8; 1000];
        let big_msg = sample_message(4, 1, 0, big_payload.clone());

        let mut batch = small_framer.frame(&set_chunk_size_msg);
        batch.extend(big_framer.frame(&big_msg));

        deframer.push_bytes(&batch);
        let first = deframer.try_next_message().unwrap().expect("SetChunkSize message");
        assert_eq!(first.message_type_id, crate::message::TYPE_SET_CHUNK_SIZE);
        deframer.set_chunk_size(4096).unwrap();

        let second = deframer.try_next_message().unwrap().expect("big message");
        assert_eq!(second.payload, big_payload);
    }
}
