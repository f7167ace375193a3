//! The metadata tag type-length-value encoding used by the cube container
//! header.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::Result;

const MAX_NAME_FIELD: usize = 255;
const VECTOR_FLAG: u16 = 0x80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
enum TagKind {
    Double = 1,
    UInt64 = 2,
    Int64 = 3,
    Bool = 4,
    String = 5,
    Date = 6,
    EndHeader = 7,
    Metadata = 8,
}

/// The payload of one metadata tag. `UInt64Vec` is the one vector payload
/// this format uses (the time-bin axis).
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Double(f64),
    UInt64(u64),
    Int64(i64),
    Bool(bool),
    String(String),
    /// ISO-8601 local time, `"%FT%T"`.
    Date(String),
    UInt64Vec(Vec<u64>),
    /// Opaque byte blob for the catch-all `Metadata` kind.
    Metadata(Vec<u8>),
    /// The `EndHeader` sentinel carries no payload.
    EndHeader,
}

impl TagValue {
    fn kind(&self) -> TagKind {
        match self {
            TagValue::Double(_) => TagKind::Double,
            TagValue::UInt64(_) | TagValue::UInt64Vec(_) => TagKind::UInt64,
            TagValue::Int64(_) => TagKind::Int64,
            TagValue::Bool(_) => TagKind::Bool,
            TagValue::String(_) => TagKind::String,
            TagValue::Date(_) => TagKind::Date,
            TagValue::Metadata(_) => TagKind::Metadata,
            TagValue::EndHeader => TagKind::EndHeader,
        }
    }

    fn is_vector(&self) -> bool {
        matches!(self, TagValue::UInt64Vec(_))
    }

    fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            TagValue::Double(v) => buf.write_f64::<LittleEndian>(*v).unwrap(),
            TagValue::UInt64(v) => buf.write_u64::<LittleEndian>(*v).unwrap(),
            TagValue::Int64(v) => buf.write_i64::<LittleEndian>(*v).unwrap(),
            TagValue::Bool(v) => buf.write_u8(u8::from(*v)).unwrap(),
            TagValue::String(s) => buf.extend_from_slice(s.as_bytes()),
            TagValue::Date(s) => buf.extend_from_slice(s.as_bytes()),
            TagValue::UInt64Vec(values) => {
                for v in values {
                    buf.write_u64::<LittleEndian>(*v).unwrap();
                }
            }
            TagValue::Metadata(bytes) => buf.extend_from_slice(bytes),
            TagValue::EndHeader => {}
        }
        buf
    }

    fn decode(kind: TagKind, is_vector: bool, payload: &[u8]) -> Result<Self> {
        Ok(match (kind, is_vector) {
            (TagKind::Double, _) => TagValue::Double(f64::from_le_bytes(payload[0..8].try_into().unwrap())),
            (TagKind::UInt64, true) => {
                let values = payload
                    .chunks_exact(8)
                    .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                TagValue::UInt64Vec(values)
            }
            (TagKind::UInt64, false) => {
                TagValue::UInt64(u64::from_le_bytes(payload[0..8].try_into().unwrap()))
            }
            (TagKind::Int64, _) => TagValue::Int64(i64::from_le_bytes(payload[0..8].try_into().unwrap())),
            (TagKind::Bool, _) => TagValue::Bool(payload.first().copied().unwrap_or(0) != 0),
            (TagKind::String, _) => TagValue::String(String::from_utf8_lossy(payload).into_owned()),
            (TagKind::Date, _) => TagValue::Date(String::from_utf8_lossy(payload).into_owned()),
            (TagKind::Metadata, _) => TagValue::Metadata(payload.to_vec()),
            (TagKind::EndHeader, _) => TagValue::EndHeader,
        })
    }
}

/// One `name_length/name/type/length/payload` metadata tag.
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    pub name: String,
    pub value: TagValue,
}

impl Tag {
    #[must_use]
    pub fn new(name: impl Into<String>, value: TagValue) -> Self {
        Self { name: name.into(), value }
    }

    #[must_use]
    pub fn end_header() -> Self {
        Self { name: String::new(), value: TagValue::EndHeader }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let raw_name = self.name.as_bytes();
        let name_field_len = (raw_name.len() + 1).min(MAX_NAME_FIELD);
        let mut name_bytes = vec![0u8; name_field_len];
        let copy_len = name_field_len - 1;
        name_bytes[..copy_len].copy_from_slice(&raw_name[..copy_len.min(raw_name.len())]);

        out.write_u32::<LittleEndian>(name_field_len as u32)?;
        out.write_all(&name_bytes)?;

        let type_value = self.value.kind() as u16 | if self.value.is_vector() { VECTOR_FLAG } else { 0 };
        out.write_u16::<LittleEndian>(type_value)?;

        let payload = self.value.encode_payload();
        out.write_u32::<LittleEndian>(payload.len() as u32)?;
        out.write_all(&payload)?;
        Ok(())
    }

    pub fn read_from<R: Read>(input: &mut R) -> Result<Self> {
        let name_field_len = input.read_u32::<LittleEndian>()? as usize;
        let mut name_bytes = vec![0u8; name_field_len];
        input.read_exact(&mut name_bytes)?;
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

        let type_value = input.read_u16::<LittleEndian>()?;
        let is_vector = type_value & VECTOR_FLAG != 0;
        let kind = decode_kind(type_value & !VECTOR_FLAG)?;

        let length = input.read_u32::<LittleEndian>()? as usize;
        let mut payload = vec![0u8; length];
        input.read_exact(&mut payload)?;

        let value = TagValue::decode(kind, is_vector, &payload)?;
        Ok(Self { name, value })
    }
}

fn decode_kind(raw: u16) -> Result<TagKind> {
    Ok(match raw {
        1 => TagKind::Double,
        2 => TagKind::UInt64,
        3 => TagKind::Int64,
        4 => TagKind::Bool,
        5 => TagKind::String,
        6 => TagKind::Date,
        7 => TagKind::EndHeader,
        8 => TagKind::Metadata,
        other => {
            return Err(crate::error::CubeError::UnrecognizedFormat(format!(
                "unknown metadata tag kind {other}"
            )))
        }
    })
}
