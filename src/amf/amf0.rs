// AMF0 value tree: encode/decode

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::amf3::Amf3Value;
use super::error::{AmfDecodeError, AmfDecodeResult, AmfEncodeError, AmfEncodeResult};

mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const REFERENCE: u8 = 0x07;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const STRICT_ARRAY: u8 = 0x0A;
    pub const DATE: u8 = 0x0B;
    pub const LONG_STRING: u8 = 0x0C;
    pub const TYPED_OBJECT: u8 = 0x10;
    pub const AVMPLUS_OBJECT: u8 = 0x11;
}

/// A decoded AMF0 value. Objects and the ECMA array carry their key/value pairs
/// in the order they were read: AMF0 does not define key ordering, but RTMP
/// command objects are conventionally read and re-emitted in the order senders
/// wrote them.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object { entries: Vec<(String, Amf0Value)> },
    Null,
    Undefined,
    EcmaArray { entries: Vec<(String, Amf0Value)> },
    StrictArray(Vec<Amf0Value>),
    Date { millis: f64 },
    LongString(String),
    TypedObject { class_name: String, entries: Vec<(String, Amf0Value)> },
    Amf3(Box<Amf3Value>),
}

impl Amf0Value {
    pub fn get_string(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) | Amf0Value::LongString(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_number(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn get_property(&self, name: &str) -> Option<&Amf0Value> {
        match self {
            Amf0Value::Object { entries }
            | Amf0Value::EcmaArray { entries }
            | Amf0Value::TypedObject { entries, .. } => {
                entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn object(entries: Vec<(&str, Amf0Value)>) -> Amf0Value {
        Amf0Value::Object {
            entries: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    /// Decodes a sequence of top-level AMF0 values from a buffer, as carried by a
    /// single RTMP Data or Command message.
    pub fn decode_all(buf: &[u8]) -> AmfDecodeResult<Vec<Amf0Value>> {
        let mut decoder = Decoder::new(buf);
        let mut values = Vec::new();
        while decoder.has_remaining() {
            values.push(decoder.read_value()?);
        }
        Ok(values)
    }

    pub fn encode(&self) -> AmfEncodeResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn encode_all(values: &[Amf0Value]) -> AmfEncodeResult<Vec<u8>> {
        let mut buf = Vec::new();
        for v in values {
            v.write_to(&mut buf)?;
        }
        Ok(buf)
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> AmfEncodeResult<()> {
        match self {
            Amf0Value::Number(n) => {
                buf.write_u8(marker::NUMBER)?;
                buf.write_f64::<BigEndian>(*n)?;
            }
            Amf0Value::Boolean(b) => {
                buf.write_u8(marker::BOOLEAN)?;
                buf.write_u8(*b as u8)?;
            }
            Amf0Value::String(s) => write_string(buf, s)?,
            Amf0Value::LongString(s) => {
                buf.write_u8(marker::LONG_STRING)?;
                write_long_string_body(buf, s)?;
            }
            Amf0Value::Object { entries } => {
                buf.write_u8(marker::OBJECT)?;
                write_pairs(buf, entries)?;
            }
            Amf0Value::Null => buf.write_u8(marker::NULL)?,
            Amf0Value::Undefined => buf.write_u8(marker::UNDEFINED)?,
            Amf0Value::EcmaArray { entries } => {
                buf.write_u8(marker::ECMA_ARRAY)?;
                buf.write_u32::<BigEndian>(entries.len() as u32)?;
                write_pairs(buf, entries)?;
            }
            Amf0Value::StrictArray(items) => {
                buf.write_u8(marker::STRICT_ARRAY)?;
                buf.write_u32::<BigEndian>(items.len() as u32)?;
                for item in items {
                    item.write_to(buf)?;
                }
            }
            Amf0Value::Date { millis } => {
                buf.write_u8(marker::DATE)?;
                buf.write_f64::<BigEndian>(*millis)?;
                buf.write_i16::<BigEndian>(0)?;
            }
            Amf0Value::TypedObject { class_name, entries } => {
                buf.write_u8(marker::TYPED_OBJECT)?;
                write_short_string(buf, class_name)?;
                write_pairs(buf, entries)?;
            }
            Amf0Value::Amf3(value) => {
                buf.write_u8(marker::AVMPLUS_OBJECT)?;
                value.write_to(buf)?;
            }
        }
        Ok(())
    }
}

fn write_short_string(buf: &mut Vec<u8>, s: &str) -> AmfEncodeResult<()> {
    buf.write_u16::<BigEndian>(s.len() as u16)?;
    buf.write_all(s.as_bytes())?;
    Ok(())
}

fn write_long_string_body(buf: &mut Vec<u8>, s: &str) -> AmfEncodeResult<()> {
    buf.write_u32::<BigEndian>(s.len() as u32)?;
    buf.write_all(s.as_bytes())?;
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> AmfEncodeResult<()> {
    if s.len() > 0xFFFF {
        buf.write_u8(marker::LONG_STRING)?;
        write_long_string_body(buf, s)
    } else {
        buf.write_u8(marker::STRING)?;
        write_short_string(buf, s)
    }
}

fn write_pairs(buf: &mut Vec<u8>, entries: &[(String, Amf0Value)]) -> AmfEncodeResult<()> {
    for (key, value) in entries {
        write_short_string(buf, key)?;
        value.write_to(buf)?;
    }
    buf.write_u16::<BigEndian>(0)?;
    buf.write_u8(marker::OBJECT_END)?;
    Ok(())
}

/// Decode-local state: a single complex-object reference table, scoped to one
/// `decode_all` call. Never surfaces in the decoded value tree.
struct Decoder<'a> {
    cursor: Cursor<&'a [u8]>,
    objects: Vec<Amf0Value>,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Decoder { cursor: Cursor::new(buf), objects: Vec::new() }
    }

    fn has_remaining(&self) -> bool {
        (self.cursor.position() as usize) < self.cursor.get_ref().len()
    }

    fn eof(context: &'static str) -> AmfDecodeError {
        AmfDecodeError::UnexpectedEof { context }
    }

    fn read_value(&mut self) -> AmfDecodeResult<Amf0Value> {
        let marker = self.cursor.read_u8().map_err(|_| Self::eof("marker"))?;
        match marker {
            marker::NUMBER => Ok(Amf0Value::Number(
                self.cursor.read_f64::<BigEndian>().map_err(|_| Self::eof("number"))?,
            )),
            marker::BOOLEAN => Ok(Amf0Value::Boolean(
                self.cursor.read_u8().map_err(|_| Self::eof("boolean"))? != 0,
            )),
            marker::STRING => Ok(Amf0Value::String(self.read_short_string("string")?)),
            marker::LONG_STRING => Ok(Amf0Value::LongString(self.read_long_string("long string")?)),
            marker::NULL => Ok(Amf0Value::Null),
            marker::UNDEFINED => Ok(Amf0Value::Undefined),
            marker::REFERENCE => self.read_reference(),
            marker::OBJECT => self.read_and_record(|me| {
                let entries = me.read_pairs()?;
                Ok(Amf0Value::Object { entries })
            }),
            marker::ECMA_ARRAY => self.read_and_record(|me| {
                let _count_hint = me.cursor.read_u32::<BigEndian>().map_err(|_| Self::eof("ecma array count"))?;
                let entries = me.read_pairs()?;
                Ok(Amf0Value::EcmaArray { entries })
            }),
            marker::STRICT_ARRAY => self.read_and_record(|me| {
                let count = me.cursor.read_u32::<BigEndian>().map_err(|_| Self::eof("strict array count"))?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(me.read_value()?);
                }
                Ok(Amf0Value::StrictArray(items))
            }),
            marker::DATE => {
                let millis = self.cursor.read_f64::<BigEndian>().map_err(|_| Self::eof("date"))?;
                let _tz = self.cursor.read_i16::<BigEndian>().map_err(|_| Self::eof("date timezone"))?;
                Ok(Amf0Value::Date { millis })
            }
            marker::TYPED_OBJECT => self.read_and_record(|me| {
                let class_name = me.read_short_string("typed object class name")?;
                let entries = me.read_pairs()?;
                Ok(Amf0Value::TypedObject { class_name, entries })
            }),
            marker::AVMPLUS_OBJECT => {
                let value = super::amf3::decode_one(&mut self.cursor)?;
                Ok(Amf0Value::Amf3(Box::new(value)))
            }
            other => Err(AmfDecodeError::UnknownAmf0Marker { marker: other }),
        }
    }

    fn read_short_string(&mut self, context: &'static str) -> AmfDecodeResult<String> {
        let len = self.cursor.read_u16::<BigEndian>().map_err(|_| Self::eof(context))? as usize;
        self.read_utf8(len, context)
    }

    fn read_long_string(&mut self, context: &'static str) -> AmfDecodeResult<String> {
        let len = self.cursor.read_u32::<BigEndian>().map_err(|_| Self::eof(context))? as usize;
        self.read_utf8(len, context)
    }

    fn read_utf8(&mut self, len: usize, context: &'static str) -> AmfDecodeResult<String> {
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes).map_err(|_| Self::eof(context))?;
        Ok(String::from_utf8(bytes)?)
    }

    fn read_pairs(&mut self) -> AmfDecodeResult<Vec<(String, Amf0Value)>> {
        let mut entries = Vec::new();
        loop {
            let key_len = self.cursor.read_u16::<BigEndian>().map_err(|_| Self::eof("object key length"))? as usize;
            if key_len == 0 {
                let end_marker = self.cursor.read_u8().map_err(|_| Self::eof("object end marker"))?;
                if end_marker != marker::OBJECT_END {
                    return Err(AmfDecodeError::MissingObjectEnd);
                }
                return Ok(entries);
            }
            let key = self.read_utf8(key_len, "object key")?;
            let value = self.read_value()?;
            entries.push((key, value));
        }
    }

    fn read_reference(&mut self) -> AmfDecodeResult<Amf0Value> {
        let index = self.cursor.read_u16::<BigEndian>().map_err(|_| Self::eof("reference index"))? as usize;
        match self.objects.get(index) {
            None => Err(AmfDecodeError::OutOfRangeReference { index }),
            Some(Amf0Value::Null) => Err(AmfDecodeError::CircularReference { index }),
            Some(value) => Ok(value.clone()),
        }
    }

    /// Pushes a placeholder so a circular reference to the value being decoded
    /// is detectable, then patches the real value in once decoding completes.
    fn read_and_record<F>(&mut self, build: F) -> AmfDecodeResult<Amf0Value>
    where
        F: FnOnce(&mut Self) -> AmfDecodeResult<Amf0Value>,
    {
        let index = self.objects.len();
        self.objects.push(Amf0Value::Null);
        let value = build(self)?;
        self.objects[index] = value.clone();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_round_trip() {
        let v = Amf0Value::Number(3.5);
        let bytes = v.encode().unwrap();
        assert_eq!(Amf0Value::decode_all(&bytes).unwrap(), vec![v]);
    }

    #[test]
    fn string_round_trip() {
        let v = Amf0Value::String("hello".to_string());
        let bytes = v.encode().unwrap();
        assert_eq!(bytes, [&[0x02, 0x00, 0x05][..], b"hello"].concat());
        assert_eq!(Amf0Value::decode_all(&bytes).unwrap(), vec![v]);
    }

    #[test]
    fn object_preserves_insertion_order() {
        let v = Amf0Value::object(vec![
            ("app", Amf0Value::String("live".to_string())),
            ("flashVer", Amf0Value::String("FMLE/3.0".to_string())),
        ]);
        let bytes = v.encode().unwrap();
        let decoded = Amf0Value::decode_all(&bytes).unwrap();
        match &decoded[0] {
            Amf0Value::Object { entries } => {
                assert_eq!(entries[0].0, "app");
                assert_eq!(entries[1].0, "flashVer");
            }
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn command_sequence_round_trip() {
        let values = vec![
            Amf0Value::String("connect".to_string()),
            Amf0Value::Number(1.0),
            Amf0Value::object(vec![("app", Amf0Value::String("live".to_string()))]),
        ];
        let bytes = Amf0Value::encode_all(&values).unwrap();
        assert_eq!(Amf0Value::decode_all(&bytes).unwrap(), values);
    }

    #[test]
    fn reference_resolves_to_referenced_value() {
        let shared = Amf0Value::object(vec![("k", Amf0Value::Number(1.0))]);
        let mut buf = Vec::new();
        buf.write_u8(marker::STRICT_ARRAY).unwrap();
        buf.write_u32::<BigEndian>(2).unwrap();
        buf.extend(shared.encode().unwrap());
        buf.write_u8(marker::REFERENCE).unwrap();
        buf.write_u16::<BigEndian>(1).unwrap();

        let decoded = Amf0Value::decode_all(&buf).unwrap();
        match &decoded[0] {
            Amf0Value::StrictArray(items) => {
                assert_eq!(items[0], shared);
                assert_eq!(items[1], shared);
            }
            _ => panic!("expected strict array"),
        }
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let err = Amf0Value::decode_all(&[0x00, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, AmfDecodeError::UnexpectedEof { .. }));
    }

    #[test]
    fn unknown_marker_is_an_error() {
        let err = Amf0Value::decode_all(&[0xFE]).unwrap_err();
        assert!(matches!(err, AmfDecodeError::UnknownAmf0Marker { marker: 0xFE }));
    }
}
