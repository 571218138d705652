// AMF3 value tree: encode/decode, including the U29 variable-length integer.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::error::{AmfDecodeError, AmfDecodeResult, AmfEncodeError, AmfEncodeResult};

mod marker {
    pub const UNDEFINED: u8 = 0x00;
    pub const NULL: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TRUE: u8 = 0x03;
    pub const INTEGER: u8 = 0x04;
    pub const DOUBLE: u8 = 0x05;
    pub const STRING: u8 = 0x06;
    pub const XML_DOC: u8 = 0x07;
    pub const DATE: u8 = 0x08;
    pub const ARRAY: u8 = 0x09;
    pub const OBJECT: u8 = 0x0A;
    pub const XML: u8 = 0x0B;
    pub const BYTE_ARRAY: u8 = 0x0C;
}

/// A decoded AMF3 value. `Array`/`Object` entries preserve read order.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf3Value {
    Undefined,
    Null,
    Boolean(bool),
    /// Reinterpreted as signed 29-bit for values >= 2^28, per the AMF3 spec.
    Integer(i32),
    Double(f64),
    String(String),
    XmlDoc(String),
    Date { millis: f64 },
    Array { assoc_entries: Vec<(String, Amf3Value)>, dense_entries: Vec<Amf3Value> },
    Object { class_name: Option<String>, sealed_field_names: Vec<String>, entries: Vec<(String, Amf3Value)> },
    Xml(String),
    ByteArray(Vec<u8>),
}

impl Amf3Value {
    pub fn decode(buf: &[u8]) -> AmfDecodeResult<Amf3Value> {
        let mut cursor = Cursor::new(buf);
        decode_one(&mut cursor)
    }

    pub fn encode(&self) -> AmfEncodeResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    pub(super) fn write_to(&self, buf: &mut Vec<u8>) -> AmfEncodeResult<()> {
        match self {
            Amf3Value::Undefined => buf.write_u8(marker::UNDEFINED)?,
            Amf3Value::Null => buf.write_u8(marker::NULL)?,
            Amf3Value::Boolean(false) => buf.write_u8(marker::FALSE)?,
            Amf3Value::Boolean(true) => buf.write_u8(marker::TRUE)?,
            Amf3Value::Integer(value) => {
                buf.write_u8(marker::INTEGER)?;
                write_u29(buf, to_u29(*value))?;
            }
            Amf3Value::Double(value) => {
                buf.write_u8(marker::DOUBLE)?;
                buf.write_f64::<BigEndian>(*value)?;
            }
            Amf3Value::String(s) => {
                buf.write_u8(marker::STRING)?;
                write_utf8(buf, s)?;
            }
            Amf3Value::XmlDoc(s) => {
                buf.write_u8(marker::XML_DOC)?;
                write_complex_literal(buf, s.as_bytes())?;
            }
            Amf3Value::Date { millis } => {
                buf.write_u8(marker::DATE)?;
                write_size(buf, 0)?;
                buf.write_f64::<BigEndian>(*millis)?;
            }
            Amf3Value::Array { assoc_entries, dense_entries } => {
                buf.write_u8(marker::ARRAY)?;
                write_size(buf, dense_entries.len())?;
                write_pairs(buf, assoc_entries)?;
                for v in dense_entries {
                    v.write_to(buf)?;
                }
            }
            Amf3Value::Object { class_name, sealed_field_names, entries } => {
                buf.write_u8(marker::OBJECT)?;
                write_object_body(buf, class_name, sealed_field_names, entries)?;
            }
            Amf3Value::Xml(s) => {
                buf.write_u8(marker::XML)?;
                write_complex_literal(buf, s.as_bytes())?;
            }
            Amf3Value::ByteArray(bytes) => {
                buf.write_u8(marker::BYTE_ARRAY)?;
                write_complex_literal(buf, bytes)?;
            }
        }
        Ok(())
    }
}

fn to_u29(value: i32) -> u32 {
    if value >= 0 { value as u32 } else { ((1i64 << 29) + value as i64) as u32 }
}

fn from_u29(u29: u32) -> i32 {
    if u29 >= (1 << 28) { (u29 as i64 - (1i64 << 29)) as i32 } else { u29 as i32 }
}

fn write_u29(buf: &mut Vec<u8>, u29: u32) -> AmfEncodeResult<()> {
    match u29 {
        v if v < 0x80 => buf.write_u8(v as u8)?,
        v if v < 0x4000 => {
            buf.write_u8(((v >> 7) | 0x80) as u8)?;
            buf.write_u8((v & 0x7F) as u8)?;
        }
        v if v < 0x20_0000 => {
            buf.write_u8(((v >> 14) | 0x80) as u8)?;
            buf.write_u8(((v >> 7) | 0x80) as u8)?;
            buf.write_u8((v & 0x7F) as u8)?;
        }
        v if v < 0x4000_0000 => {
            buf.write_u8(((v >> 22) | 0x80) as u8)?;
            buf.write_u8(((v >> 15) | 0x80) as u8)?;
            buf.write_u8(((v >> 8) | 0x80) as u8)?;
            buf.write_u8((v & 0xFF) as u8)?;
        }
        v => return Err(AmfEncodeError::U29OutOfRange { value: v }),
    }
    Ok(())
}

fn write_size(buf: &mut Vec<u8>, size: usize) -> AmfEncodeResult<()> {
    if size >= (1 << 28) {
        return Err(AmfEncodeError::SizeOutOfRange { value: size });
    }
    write_u29(buf, ((size << 1) | 1) as u32)
}

fn write_utf8(buf: &mut Vec<u8>, s: &str) -> AmfEncodeResult<()> {
    write_size(buf, s.len())?;
    buf.write_all(s.as_bytes())?;
    Ok(())
}

/// Writes a literal complex-object-table value (XmlDoc, Xml, ByteArray, ...):
/// a U29 size header followed by raw bytes. Same wire shape as `write_utf8`'s
/// string-table literal, but kept distinct because the two headers are read
/// back against different reference tables on decode (see `read_and_record`
/// vs. `read_utf8`).
fn write_complex_literal(buf: &mut Vec<u8>, bytes: &[u8]) -> AmfEncodeResult<()> {
    write_size(buf, bytes.len())?;
    buf.write_all(bytes)?;
    Ok(())
}

fn write_pairs(buf: &mut Vec<u8>, entries: &[(String, Amf3Value)]) -> AmfEncodeResult<()> {
    for (key, value) in entries {
        write_utf8(buf, key)?;
        value.write_to(buf)?;
    }
    write_utf8(buf, "")
}

fn write_object_body(
    buf: &mut Vec<u8>,
    class_name: &Option<String>,
    sealed_field_names: &[String],
    entries: &[(String, Amf3Value)],
) -> AmfEncodeResult<()> {
    let sealed_count = sealed_field_names.len();
    let is_dynamic = (entries.len() > sealed_count) as u32;
    let header = ((sealed_count as u32) << 3) | (is_dynamic << 2) | 1;
    write_size(buf, header as usize)?;
    write_utf8(buf, class_name.as_deref().unwrap_or(""))?;
    for name in sealed_field_names {
        write_utf8(buf, name)?;
    }
    for (_, value) in entries.iter().take(sealed_count) {
        value.write_to(buf)?;
    }
    if entries.len() > sealed_count {
        write_pairs(buf, &entries[sealed_count..])?;
    }
    Ok(())
}

enum SizeOrIndex {
    Size(usize),
    Index(usize),
}

struct Amf3Decoder<'a, 'b> {
    cursor: &'a mut Cursor<&'b [u8]>,
    strings: Vec<String>,
    traits: Vec<Amf3Trait>,
    objects: Vec<Amf3Value>,
}

#[derive(Clone)]
struct Amf3Trait {
    class_name: Option<String>,
    is_dynamic: bool,
    fields: Vec<String>,
}

pub(super) fn decode_one(cursor: &mut Cursor<&[u8]>) -> AmfDecodeResult<Amf3Value> {
    let mut decoder = Amf3Decoder { cursor, strings: Vec::new(), traits: Vec::new(), objects: Vec::new() };
    decoder.read_value()
}

fn eof(context: &'static str) -> AmfDecodeError {
    AmfDecodeError::UnexpectedEof { context }
}

impl<'a, 'b> Amf3Decoder<'a, 'b> {
    fn read_u29(&mut self) -> AmfDecodeResult<u32> {
        let mut result: u32 = 0;
        for _ in 0..3 {
            let byte = self.cursor.read_u8().map_err(|_| eof("u29"))?;
            result = (result << 7) | (byte as u32 & 0x7F);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        let byte = self.cursor.read_u8().map_err(|_| eof("u29"))?;
        Ok((result << 8) | byte as u32)
    }

    fn read_size_or_index(&mut self) -> AmfDecodeResult<SizeOrIndex> {
        let u29 = self.read_u29()?;
        if u29 & 1 == 0 {
            Ok(SizeOrIndex::Index((u29 >> 1) as usize))
        } else {
            Ok(SizeOrIndex::Size((u29 >> 1) as usize))
        }
    }

    fn read_utf8(&mut self, context: &'static str) -> AmfDecodeResult<String> {
        match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => self
                .strings
                .get(index)
                .cloned()
                .ok_or(AmfDecodeError::OutOfRangeAmf3Reference { index, table: "string" }),
            SizeOrIndex::Size(len) => {
                let mut bytes = vec![0u8; len];
                self.cursor.read_exact(&mut bytes).map_err(|_| eof(context))?;
                let s = String::from_utf8(bytes)?;
                if !s.is_empty() {
                    self.strings.push(s.clone());
                }
                Ok(s)
            }
        }
    }

    fn read_value(&mut self) -> AmfDecodeResult<Amf3Value> {
        let marker = self.cursor.read_u8().map_err(|_| eof("marker"))?;
        match marker {
            marker::UNDEFINED => Ok(Amf3Value::Undefined),
            marker::NULL => Ok(Amf3Value::Null),
            marker::FALSE => Ok(Amf3Value::Boolean(false)),
            marker::TRUE => Ok(Amf3Value::Boolean(true)),
            marker::INTEGER => Ok(Amf3Value::Integer(from_u29(self.read_u29()?))),
            marker::DOUBLE => Ok(Amf3Value::Double(self.cursor.read_f64::<BigEndian>().map_err(|_| eof("double"))?)),
            marker::STRING => Ok(Amf3Value::String(self.read_utf8("string")?)),
            marker::XML_DOC => self.read_and_record(|me| {
                let len = match me.read_size_or_index()? {
                    SizeOrIndex::Index(index) => {
                        return me
                            .objects
                            .get(index)
                            .cloned()
                            .ok_or(AmfDecodeError::OutOfRangeAmf3Reference { index, table: "object" });
                    }
                    SizeOrIndex::Size(len) => len,
                };
                let mut bytes = vec![0u8; len];
                me.cursor.read_exact(&mut bytes).map_err(|_| eof("xml doc"))?;
                Ok(Amf3Value::XmlDoc(String::from_utf8(bytes)?))
            }),
            marker::DATE => self.read_and_record(|me| {
                match me.read_size_or_index()? {
                    SizeOrIndex::Index(index) => me
                        .objects
                        .get(index)
                        .cloned()
                        .ok_or(AmfDecodeError::OutOfRangeAmf3Reference { index, table: "object" }),
                    SizeOrIndex::Size(_) => {
                        let millis = me.cursor.read_f64::<BigEndian>().map_err(|_| eof("date"))?;
                        Ok(Amf3Value::Date { millis })
                    }
                }
            }),
            marker::ARRAY => self.read_and_record(|me| {
                let dense_len = match me.read_size_or_index()? {
                    SizeOrIndex::Index(index) => {
                        return me
                            .objects
                            .get(index)
                            .cloned()
                            .ok_or(AmfDecodeError::OutOfRangeAmf3Reference { index, table: "object" });
                    }
                    SizeOrIndex::Size(len) => len,
                };
                let assoc_entries = me.read_pairs()?;
                let mut dense_entries = Vec::with_capacity(dense_len);
                for _ in 0..dense_len {
                    dense_entries.push(me.read_value()?);
                }
                Ok(Amf3Value::Array { assoc_entries, dense_entries })
            }),
            marker::OBJECT => self.read_and_record(|me| me.read_object()),
            marker::XML => self.read_and_record(|me| {
                let len = match me.read_size_or_index()? {
                    SizeOrIndex::Index(index) => {
                        return me
                            .objects
                            .get(index)
                            .cloned()
                            .ok_or(AmfDecodeError::OutOfRangeAmf3Reference { index, table: "object" });
                    }
                    SizeOrIndex::Size(len) => len,
                };
                let mut bytes = vec![0u8; len];
                me.cursor.read_exact(&mut bytes).map_err(|_| eof("xml"))?;
                Ok(Amf3Value::Xml(String::from_utf8(bytes)?))
            }),
            marker::BYTE_ARRAY => self.read_and_record(|me| {
                let len = match me.read_size_or_index()? {
                    SizeOrIndex::Index(index) => {
                        return me
                            .objects
                            .get(index)
                            .cloned()
                            .ok_or(AmfDecodeError::OutOfRangeAmf3Reference { index, table: "object" });
                    }
                    SizeOrIndex::Size(len) => len,
                };
                let mut bytes = vec![0u8; len];
                me.cursor.read_exact(&mut bytes).map_err(|_| eof("byte array"))?;
                Ok(Amf3Value::ByteArray(bytes))
            }),
            other => Err(AmfDecodeError::UnknownAmf3Marker { marker: other }),
        }
    }

    fn read_pairs(&mut self) -> AmfDecodeResult<Vec<(String, Amf3Value)>> {
        let mut entries = Vec::new();
        loop {
            let key = self.read_utf8("pair key")?;
            if key.is_empty() {
                return Ok(entries);
            }
            let value = self.read_value()?;
            entries.push((key, value));
        }
    }

    fn read_trait(&mut self, header: u32) -> AmfDecodeResult<Amf3Trait> {
        if header & 1 == 0 {
            let index = (header >> 1) as usize;
            return self
                .traits
                .get(index)
                .cloned()
                .ok_or(AmfDecodeError::OutOfRangeAmf3Reference { index, table: "trait" });
        }
        if header & 2 != 0 {
            let class_name = self.read_utf8("externalizable class name")?;
            return Err(AmfDecodeError::UnsupportedExternalizable {
                name: if class_name.is_empty() { None } else { Some(class_name) },
            });
        }
        let is_dynamic = header & 4 != 0;
        let field_count = (header >> 3) as usize;
        let class_name = self.read_utf8("trait class name")?;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(self.read_utf8("trait field name")?);
        }
        let t = Amf3Trait {
            class_name: if class_name.is_empty() { None } else { Some(class_name) },
            is_dynamic,
            fields,
        };
        self.traits.push(t.clone());
        Ok(t)
    }

    fn read_object(&mut self) -> AmfDecodeResult<Amf3Value> {
        let header = match self.read_size_or_index()? {
            SizeOrIndex::Index(index) => {
                return self
                    .objects
                    .get(index)
                    .cloned()
                    .ok_or(AmfDecodeError::OutOfRangeAmf3Reference { index, table: "object" });
            }
            SizeOrIndex::Size(raw) => (raw << 1 | 1) as u32,
        };
        let t = self.read_trait(header)?;
        let mut entries = Vec::with_capacity(t.fields.len());
        for name in &t.fields {
            let value = self.read_value()?;
            entries.push((name.clone(), value));
        }
        if t.is_dynamic {
            entries.extend(self.read_pairs()?);
        }
        Ok(Amf3Value::Object { class_name: t.class_name.clone(), sealed_field_names: t.fields.clone(), entries })
    }

    /// Pushes a placeholder so self-referential objects/arrays are detectable,
    /// then patches the real value in once decoding completes.
    fn read_and_record<F>(&mut self, build: F) -> AmfDecodeResult<Amf3Value>
    where
        F: FnOnce(&mut Self) -> AmfDecodeResult<Amf3Value>,
    {
        let index = self.objects.len();
        self.objects.push(Amf3Value::Null);
        let value = build(self)?;
        self.objects[index] = value.clone();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Amf3Value) {
        let bytes = v.encode().unwrap();
        assert_eq!(Amf3Value::decode(&bytes).unwrap(), v);
    }

    #[test]
    fn u29_boundary_values_have_expected_lengths() {
        let cases: &[(i32, usize)] = &[
            (0, 1),
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            (2097151, 3),
            (2097152, 4),
            (268435455, 4),
        ];
        for &(value, expected_len) in cases {
            let encoded = Amf3Value::Integer(value).encode().unwrap();
            assert_eq!(encoded.len(), expected_len + 1, "value {value}");
            assert_eq!(Amf3Value::decode(&encoded).unwrap(), Amf3Value::Integer(value));
        }
    }

    #[test]
    fn negative_integer_round_trips() {
        round_trip(Amf3Value::Integer(-1));
        round_trip(Amf3Value::Integer(-0x1000_0000));
    }

    #[test]
    fn string_and_double_round_trip() {
        round_trip(Amf3Value::String("hello".to_string()));
        round_trip(Amf3Value::Double(3.5));
    }

    #[test]
    fn repeated_string_uses_reference_table() {
        let arr = Amf3Value::Array {
            assoc_entries: vec![],
            dense_entries: vec![
                Amf3Value::String("same".to_string()),
                Amf3Value::String("same".to_string()),
            ],
        };
        round_trip(arr);
    }

    #[test]
    fn dynamic_object_round_trips() {
        let obj = Amf3Value::Object {
            class_name: None,
            sealed_field_names: vec![],
            entries: vec![
                ("app".to_string(), Amf3Value::String("live".to_string())),
                ("level".to_string(), Amf3Value::Integer(2)),
            ],
        };
        round_trip(obj);
    }

    #[test]
    fn byte_array_round_trips() {
        round_trip(Amf3Value::ByteArray(vec![1, 2, 3, 4]));
    }

    #[test]
    fn xml_doc_and_xml_round_trip() {
        round_trip(Amf3Value::XmlDoc("<a/>".to_string()));
        round_trip(Amf3Value::Xml("<b/>".to_string()));
    }

    #[test]
    fn repeated_xml_doc_resolves_via_the_object_table_not_the_string_table() {
        // A string read first occupies index 0 of the *string* table; an XmlDoc
        // with the same contents, read second, must not collide with it and
        // must instead be resolvable by a later back-reference into the
        // *object* table.
        let arr = Amf3Value::Array {
            assoc_entries: vec![],
            dense_entries: vec![
                Amf3Value::String("<a/>".to_string()),
                Amf3Value::XmlDoc("<a/>".to_string()),
                Amf3Value::XmlDoc("<a/>".to_string()),
            ],
        };
        let bytes = arr.encode().unwrap();
        let decoded = Amf3Value::decode(&bytes).unwrap();
        match decoded {
            Amf3Value::Array { dense_entries, .. } => {
                assert_eq!(dense_entries[0], Amf3Value::String("<a/>".to_string()));
                assert_eq!(dense_entries[1], Amf3Value::XmlDoc("<a/>".to_string()));
                assert_eq!(dense_entries[2], Amf3Value::XmlDoc("<a/>".to_string()));
            }
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn out_of_range_reference_is_an_error() {
        let mut buf = Vec::new();
        buf.write_u8(marker::ARRAY).unwrap();
        write_size(&mut buf, 0).unwrap();
        write_utf8(&mut buf, "").unwrap();
        buf.write_u8(marker::STRING).unwrap();
        write_u29(&mut buf, (5usize << 1) as u32).unwrap();
        let err = Amf3Value::decode(&buf).unwrap_err();
        assert!(matches!(err, AmfDecodeError::OutOfRangeAmf3Reference { table: "string", .. }));
    }
}
