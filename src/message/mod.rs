// Decoded RTMP message types, one level above raw chunk-stream bytes.

mod error;

pub use error::{MessageCodecError, MessageCodecResult};

use byteorder::{BigEndian, ByteOrder};

use crate::amf::Amf0Value;
use crate::chunk::RawMessage;

pub const TYPE_SET_CHUNK_SIZE: u8 = 1;
pub const TYPE_ABORT: u8 = 2;
pub const TYPE_ACKNOWLEDGEMENT: u8 = 3;
pub const TYPE_USER_CONTROL: u8 = 4;
pub const TYPE_WINDOW_ACK_SIZE: u8 = 5;
pub const TYPE_SET_PEER_BANDWIDTH: u8 = 6;
pub const TYPE_AUDIO: u8 = 8;
pub const TYPE_VIDEO: u8 = 9;
pub const TYPE_DATA_AMF3: u8 = 15;
pub const TYPE_COMMAND_AMF3: u8 = 17;
pub const TYPE_DATA_AMF0: u8 = 18;
pub const TYPE_COMMAND_AMF0: u8 = 20;

pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_AUDIO: u32 = 4;
pub const CSID_VIDEO: u32 = 5;
pub const CSID_DATA: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBandwidthLimitType {
    Hard,
    Soft,
    Dynamic,
}

impl PeerBandwidthLimitType {
    fn from_u8(v: u8) -> MessageCodecResult<Self> {
        match v {
            0 => Ok(PeerBandwidthLimitType::Hard),
            1 => Ok(PeerBandwidthLimitType::Soft),
            2 => Ok(PeerBandwidthLimitType::Dynamic),
            other => Err(MessageCodecError::UnknownLimitType { limit_type: other }),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PeerBandwidthLimitType::Hard => 0,
            PeerBandwidthLimitType::Soft => 1,
            PeerBandwidthLimitType::Dynamic => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserControlEvent {
    StreamBegin { stream_id: u32 },
    StreamEof { stream_id: u32 },
    StreamDry { stream_id: u32 },
    SetBufferLength { stream_id: u32, buffer_length: u32 },
    StreamIsRecorded { stream_id: u32 },
    PingRequest { timestamp: u32 },
    PingResponse { timestamp: u32 },
}

const EVENT_STREAM_BEGIN: u16 = 0;
const EVENT_STREAM_EOF: u16 = 1;
const EVENT_STREAM_DRY: u16 = 2;
const EVENT_SET_BUFFER_LENGTH: u16 = 3;
const EVENT_STREAM_IS_RECORDED: u16 = 4;
const EVENT_PING_REQUEST: u16 = 6;
const EVENT_PING_RESPONSE: u16 = 7;

/// Whether a Command/Data message's body is AMF0 or AMF3 encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmfEncoding {
    Amf0,
    Amf3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub command_object: Amf0Value,
    pub additional_values: Vec<Amf0Value>,
    pub encoding: AmfEncoding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SetChunkSize(u32),
    Abort { chunk_stream_id: u32 },
    Acknowledgement { sequence_number: u32 },
    UserControl(UserControlEvent),
    WindowAcknowledgementSize(u32),
    SetPeerBandwidth { size: u32, limit_type: PeerBandwidthLimitType },
    AudioData(Vec<u8>),
    VideoData(Vec<u8>),
    Data { values: Vec<Amf0Value>, encoding: AmfEncoding },
    Command(Command),
}

impl Message {
    pub fn parse(raw: &RawMessage) -> MessageCodecResult<Message> {
        let payload = &raw.payload;
        match raw.message_type_id {
            TYPE_SET_CHUNK_SIZE => {
                let raw_size = read_u32(payload, "SetChunkSize")?;
                if raw_size & 0x8000_0000 != 0 {
                    return Err(MessageCodecError::SetChunkSizeHighBitSet { raw: raw_size });
                }
                Ok(Message::SetChunkSize(raw_size))
            }
            TYPE_ABORT => Ok(Message::Abort { chunk_stream_id: read_u32(payload, "Abort")? }),
            TYPE_ACKNOWLEDGEMENT => {
                Ok(Message::Acknowledgement { sequence_number: read_u32(payload, "Acknowledgement")? })
            }
            TYPE_USER_CONTROL => parse_user_control(payload).map(Message::UserControl),
            TYPE_WINDOW_ACK_SIZE => {
                Ok(Message::WindowAcknowledgementSize(read_u32(payload, "WindowAcknowledgementSize")?))
            }
            TYPE_SET_PEER_BANDWIDTH => {
                if payload.len() < 5 {
                    return Err(MessageCodecError::UnexpectedEof { context: "SetPeerBandwidth" });
                }
                let size = BigEndian::read_u32(&payload[0..4]);
                let limit_type = PeerBandwidthLimitType::from_u8(payload[4])?;
                Ok(Message::SetPeerBandwidth { size, limit_type })
            }
            TYPE_AUDIO => Ok(Message::AudioData(payload.clone())),
            TYPE_VIDEO => Ok(Message::VideoData(payload.clone())),
            TYPE_DATA_AMF0 => Ok(Message::Data { values: Amf0Value::decode_all(payload)?, encoding: AmfEncoding::Amf0 }),
            TYPE_DATA_AMF3 => {
                // AMF3 data messages carry one leading format byte (historically used
                // to distinguish Flex byte-codes) before the AMF0-encoded values.
                let body = skip_amf3_envelope_byte(payload, "AMF3 Data message")?;
                Ok(Message::Data { values: Amf0Value::decode_all(body)?, encoding: AmfEncoding::Amf3 })
            }
            TYPE_COMMAND_AMF0 => parse_command(payload, AmfEncoding::Amf0),
            TYPE_COMMAND_AMF3 => {
                // Same leading format byte as TYPE_DATA_AMF3, ahead of the command.
                let body = skip_amf3_envelope_byte(payload, "AMF3 Command message")?;
                parse_command(body, AmfEncoding::Amf3)
            }
            other => Err(MessageCodecError::UnknownMessageType { type_id: other }),
        }
    }

    /// Returns the type_id and payload bytes this message serializes to.
    pub fn serialize(&self) -> MessageCodecResult<(u8, Vec<u8>)> {
        let payload = match self {
            Message::SetChunkSize(size) => size.to_be_bytes().to_vec(),
            Message::Abort { chunk_stream_id } => chunk_stream_id.to_be_bytes().to_vec(),
            Message::Acknowledgement { sequence_number } => sequence_number.to_be_bytes().to_vec(),
            Message::UserControl(event) => serialize_user_control(event),
            Message::WindowAcknowledgementSize(size) => size.to_be_bytes().to_vec(),
            Message::SetPeerBandwidth { size, limit_type } => {
                let mut buf = size.to_be_bytes().to_vec();
                buf.push(limit_type.as_u8());
                buf
            }
            Message::AudioData(bytes) => bytes.clone(),
            Message::VideoData(bytes) => bytes.clone(),
            Message::Data { values, encoding } => {
                let mut buf = amf3_envelope_byte(*encoding);
                buf.extend(Amf0Value::encode_all(values)?);
                buf
            }
            Message::Command(cmd) => {
                let mut values = vec![
                    Amf0Value::String(cmd.name.clone()),
                    Amf0Value::Number(cmd.transaction_id),
                    cmd.command_object.clone(),
                ];
                values.extend(cmd.additional_values.iter().cloned());
                let mut buf = amf3_envelope_byte(cmd.encoding);
                buf.extend(Amf0Value::encode_all(&values)?);
                buf
            }
        };
        Ok((self.type_id(), payload))
    }

    pub fn type_id(&self) -> u8 {
        match self {
            Message::SetChunkSize(_) => TYPE_SET_CHUNK_SIZE,
            Message::Abort { .. } => TYPE_ABORT,
            Message::Acknowledgement { .. } => TYPE_ACKNOWLEDGEMENT,
            Message::UserControl(_) => TYPE_USER_CONTROL,
            Message::WindowAcknowledgementSize(_) => TYPE_WINDOW_ACK_SIZE,
            Message::SetPeerBandwidth { .. } => TYPE_SET_PEER_BANDWIDTH,
            Message::AudioData(_) => TYPE_AUDIO,
            Message::VideoData(_) => TYPE_VIDEO,
            Message::Data { encoding: AmfEncoding::Amf0, .. } => TYPE_DATA_AMF0,
            Message::Data { encoding: AmfEncoding::Amf3, .. } => TYPE_DATA_AMF3,
            Message::Command(cmd) => match cmd.encoding {
                AmfEncoding::Amf0 => TYPE_COMMAND_AMF0,
                AmfEncoding::Amf3 => TYPE_COMMAND_AMF3,
            },
        }
    }

    /// Chunk stream id a message is conventionally sent on, absent an
    /// application override.
    pub fn default_chunk_stream_id(&self) -> u32 {
        match self {
            Message::SetChunkSize(_)
            | Message::Abort { .. }
            | Message::Acknowledgement { .. }
            | Message::UserControl(_)
            | Message::WindowAcknowledgementSize(_)
            | Message::SetPeerBandwidth { .. } => CSID_PROTOCOL_CONTROL,
            Message::AudioData(_) => CSID_AUDIO,
            Message::VideoData(_) => CSID_VIDEO,
            Message::Data { .. } => CSID_DATA,
            Message::Command(_) => CSID_COMMAND,
        }
    }
}

fn read_u32(payload: &[u8], context: &'static str) -> MessageCodecResult<u32> {
    if payload.len() < 4 {
        return Err(MessageCodecError::UnexpectedEof { context });
    }
    Ok(BigEndian::read_u32(&payload[0..4]))
}

/// Strips the one-byte format marker AMF3 Data/Command messages carry ahead
/// of their AMF0-encoded values (see `examples/AgustinSRG-rtmp-server-rs/src/
/// session/handle_invoke.rs`'s `RTMP_TYPE_FLEX_MESSAGE` offset).
fn skip_amf3_envelope_byte<'a>(payload: &'a [u8], context: &'static str) -> MessageCodecResult<&'a [u8]> {
    payload.get(1..).ok_or(MessageCodecError::UnexpectedEof { context })
}

/// The AMF3 envelope byte to prepend on encode, mirroring `skip_amf3_envelope_byte`.
fn amf3_envelope_byte(encoding: AmfEncoding) -> Vec<u8> {
    match encoding {
        AmfEncoding::Amf0 => Vec::new(),
        AmfEncoding::Amf3 => vec![0x00],
    }
}

fn parse_user_control(payload: &[u8]) -> MessageCodecResult<UserControlEvent> {
    if payload.len() < 2 {
        return Err(MessageCodecError::UnexpectedEof { context: "UserControl event type" });
    }
    let event_type = BigEndian::read_u16(&payload[0..2]);
    let body = &payload[2..];
    let read_stream_id = |context| -> MessageCodecResult<u32> { read_u32(body, context) };
    match event_type {
        EVENT_STREAM_BEGIN => Ok(UserControlEvent::StreamBegin { stream_id: read_stream_id("StreamBegin")? }),
        EVENT_STREAM_EOF => Ok(UserControlEvent::StreamEof { stream_id: read_stream_id("StreamEOF")? }),
        EVENT_STREAM_DRY => Ok(UserControlEvent::StreamDry { stream_id: read_stream_id("StreamDry")? }),
        EVENT_SET_BUFFER_LENGTH => {
            if body.len() < 8 {
                return Err(MessageCodecError::UnexpectedEof { context: "SetBufferLength" });
            }
            Ok(UserControlEvent::SetBufferLength {
                stream_id: BigEndian::read_u32(&body[0..4]),
                buffer_length: BigEndian::read_u32(&body[4..8]),
            })
        }
        EVENT_STREAM_IS_RECORDED => {
            Ok(UserControlEvent::StreamIsRecorded { stream_id: read_stream_id("StreamIsRecorded")? })
        }
        EVENT_PING_REQUEST => Ok(UserControlEvent::PingRequest { timestamp: read_stream_id("PingRequest")? }),
        EVENT_PING_RESPONSE => Ok(UserControlEvent::PingResponse { timestamp: read_stream_id("PingResponse")? }),
        other => Err(MessageCodecError::UnknownUserControlEvent { event_type: other }),
    }
}

fn serialize_user_control(event: &UserControlEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    let write_event_type = |buf: &mut Vec<u8>, t: u16| buf.extend_from_slice(&t.to_be_bytes());
    match event {
        UserControlEvent::StreamBegin { stream_id } => {
            write_event_type(&mut buf, EVENT_STREAM_BEGIN);
            buf.extend_from_slice(&stream_id.to_be_bytes());
        }
        UserControlEvent::StreamEof { stream_id } => {
            write_event_type(&mut buf, EVENT_STREAM_EOF);
            buf.extend_from_slice(&stream_id.to_be_bytes());
        }
        UserControlEvent::StreamDry { stream_id } => {
            write_event_type(&mut buf, EVENT_STREAM_DRY);
            buf.extend_from_slice(&stream_id.to_be_bytes());
        }
        UserControlEvent::SetBufferLength { stream_id, buffer_length } => {
            write_event_type(&mut buf, EVENT_SET_BUFFER_LENGTH);
            buf.extend_from_slice(&stream_id.to_be_bytes());
            buf.extend_from_slice(&buffer_length.to_be_bytes());
        }
        UserControlEvent::StreamIsRecorded { stream_id } => {
            write_event_type(&mut buf, EVENT_STREAM_IS_RECORDED);
            buf.extend_from_slice(&stream_id.to_be_bytes());
        }
        UserControlEvent::PingRequest { timestamp } => {
            write_event_type(&mut buf, EVENT_PING_REQUEST);
            buf.extend_from_slice(&timestamp.to_be_bytes());
        }
        UserControlEvent::PingResponse { timestamp } => {
            write_event_type(&mut buf, EVENT_PING_RESPONSE);
            buf.extend_from_slice(&timestamp.to_be_bytes());
        }
    }
    buf
}

fn parse_command(payload: &[u8], encoding: AmfEncoding) -> MessageCodecResult<Message> {
    let values = Amf0Value::decode_all(payload)?;
    let mut iter = values.into_iter();
    let name = iter.next().and_then(|v| v.get_string().map(str::to_string)).ok_or(MessageCodecError::MalformedCommand)?;
    let transaction_id = iter.next().and_then(|v| v.get_number()).ok_or(MessageCodecError::MalformedCommand)?;
    let command_object = iter.next().unwrap_or(Amf0Value::Null);
    let additional_values = iter.collect();
    Ok(Message::Command(Command { name, transaction_id, command_object, additional_values, encoding }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(type_id: u8, payload: Vec<u8>) -> RawMessage {
        RawMessage { message_type_id: type_id, timestamp: 0, stream_id: 0, chunk_stream_id: 2, payload }
    }

    #[test]
    fn set_chunk_size_round_trip() {
        let msg = Message::SetChunkSize(4096);
        let (type_id, payload) = msg.serialize().unwrap();
        assert_eq!(type_id, TYPE_SET_CHUNK_SIZE);
        assert_eq!(Message::parse(&raw(type_id, payload)).unwrap(), msg);
    }

    #[test]
    fn set_chunk_size_rejects_high_bit() {
        let err = Message::parse(&raw(TYPE_SET_CHUNK_SIZE, vec![0x80, 0, 0, 0])).unwrap_err();
        assert!(matches!(err, MessageCodecError::SetChunkSizeHighBitSet { .. }));
    }

    #[test]
    fn set_peer_bandwidth_round_trip() {
        let msg = Message::SetPeerBandwidth { size: 2_500_000, limit_type: PeerBandwidthLimitType::Dynamic };
        let (type_id, payload) = msg.serialize().unwrap();
        assert_eq!(Message::parse(&raw(type_id, payload)).unwrap(), msg);
    }

    #[test]
    fn user_control_stream_begin_round_trip() {
        let msg = Message::UserControl(UserControlEvent::StreamBegin { stream_id: 1 });
        let (type_id, payload) = msg.serialize().unwrap();
        assert_eq!(Message::parse(&raw(type_id, payload)).unwrap(), msg);
    }

    #[test]
    fn user_control_ping_round_trip() {
        let msg = Message::UserControl(UserControlEvent::PingRequest { timestamp: 12345 });
        let (type_id, payload) = msg.serialize().unwrap();
        assert_eq!(Message::parse(&raw(type_id, payload)).unwrap(), msg);
    }

    #[test]
    fn connect_command_round_trips() {
        let msg = Message::Command(Command {
            name: "connect".to_string(),
            transaction_id: 1.0,
            command_object: Amf0Value::object(vec![("app", Amf0Value::String("live".to_string()))]),
            additional_values: vec![],
            encoding: AmfEncoding::Amf0,
        });
        let (type_id, payload) = msg.serialize().unwrap();
        assert_eq!(Message::parse(&raw(type_id, payload)).unwrap(), msg);
    }

    #[test]
    fn amf3_command_round_trips_and_carries_one_leading_envelope_byte() {
        let msg = Message::Command(Command {
            name: "connect".to_string(),
            transaction_id: 1.0,
            command_object: Amf0Value::object(vec![("app", Amf0Value::String("live".to_string()))]),
            additional_values: vec![],
            encoding: AmfEncoding::Amf3,
        });
        let (type_id, payload) = msg.serialize().unwrap();
        assert_eq!(type_id, TYPE_COMMAND_AMF3);
        assert_eq!(payload[0], 0x00);
        assert_eq!(Message::parse(&raw(type_id, payload)).unwrap(), msg);
    }

    #[test]
    fn amf3_data_round_trips_and_carries_one_leading_envelope_byte() {
        let msg = Message::Data {
            values: vec![Amf0Value::String("onStatus".to_string())],
            encoding: AmfEncoding::Amf3,
        };
        let (type_id, payload) = msg.serialize().unwrap();
        assert_eq!(type_id, TYPE_DATA_AMF3);
        assert_eq!(payload[0], 0x00);
        assert_eq!(Message::parse(&raw(type_id, payload)).unwrap(), msg);
    }

    #[test]
    fn default_chunk_stream_ids_match_convention() {
        assert_eq!(Message::SetChunkSize(1).default_chunk_stream_id(), CSID_PROTOCOL_CONTROL);
        assert_eq!(Message::AudioData(vec![]).default_chunk_stream_id(), CSID_AUDIO);
        assert_eq!(Message::VideoData(vec![]).default_chunk_stream_id(), CSID_VIDEO);
    }
}
