//! Reads back a cube container written by [`crate::output::writer::CubeWriter`].
//!
//! The read side was not an original design requirement, but a round trip
//! through `CubeWriter` is a useful sanity check to have in the suite, so
//! this exists to make that checkable. Grounded on the same symmetric
//! byteorder-based parsing `fmf::reader::FMFReader` uses to undo its own
//! writer's header.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;

use crate::cube::model::CubeElement;
use crate::error::{CubeError, Result};
use crate::output::tag::{Tag, TagValue};
use crate::output::writer::{CompanionImage, ZSliceDims};

const MAGIC: u32 = 0x0000_C0BE;
const FORMAT_VERSION: u32 = 2;

/// Everything [`CubeReader::read`] recovers from a container file.
#[derive(Clone, Debug)]
pub struct CubeFile<T> {
    pub dims: ZSliceDims,
    pub timepoints_ps: Vec<u64>,
    pub data: Vec<T>,
    pub creation_date: String,
    pub original_tags: Vec<(String, String)>,
    pub companions: Vec<CompanionImage>,
}

pub struct CubeReader;

impl CubeReader {
    pub fn read<T: CubeElement, R: Read + Seek>(input: &mut R) -> Result<CubeFile<T>> {
        let magic = input.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(CubeError::UnrecognizedFormat(format!("bad magic 0x{magic:08X}")));
        }
        let version = input.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(CubeError::UnrecognizedFormat(format!(
                "unsupported format_version {version}"
            )));
        }
        let data_pos = u64::from(input.read_u32::<LittleEndian>()?);

        let mut n_t = None;
        let mut n_x = None;
        let mut n_y = None;
        let mut n_chan = None;
        let mut timepoints_ps = None;
        let mut data_type = None;
        let mut creation_date = String::new();
        let mut compressed_size = None;
        let mut next_block: u64 = 0;
        let mut original_tags = Vec::new();

        loop {
            let tag = Tag::read_from(input)?;
            match (tag.name.as_str(), tag.value) {
                (_, TagValue::EndHeader) => break,
                ("NumTimeBins", TagValue::UInt64(v)) => n_t = Some(v as u32),
                ("NumX", TagValue::UInt64(v)) => n_x = Some(v as u32),
                ("NumY", TagValue::UInt64(v)) => n_y = Some(v as u32),
                ("NumChannels", TagValue::UInt64(v)) => n_chan = Some(v as u32),
                ("CompressedSize", TagValue::UInt64(v)) => compressed_size = Some(v),
                ("NextBlock", TagValue::UInt64(v)) => next_block = v,
                ("TimeBins", TagValue::UInt64Vec(v)) => timepoints_ps = Some(v),
                ("DataType", TagValue::String(s)) => data_type = Some(s),
                ("CreationDate", TagValue::Date(s)) => creation_date = s,
                (name, TagValue::String(s)) if name.starts_with("OriginalTags_") => {
                    original_tags.push((name["OriginalTags_".len()..].to_string(), s));
                }
                _ => {}
            }
        }

        let n_t = n_t.ok_or_else(|| missing("NumTimeBins"))?;
        let n_x = n_x.ok_or_else(|| missing("NumX"))?;
        let n_y = n_y.ok_or_else(|| missing("NumY"))?;
        let n_chan = n_chan.ok_or_else(|| missing("NumChannels"))?;
        let compressed_size = compressed_size.ok_or_else(|| missing("CompressedSize"))?;

        if let Some(found) = &data_type {
            let expected = T::DATA_TYPE.to_string();
            if *found != expected {
                return Err(CubeError::UnrecognizedFormat(format!(
                    "cube data type is {found}, expected {expected}"
                )));
            }
        }

        input.seek(SeekFrom::Start(data_pos))?;
        let mut compressed = vec![0u8; compressed_size as usize];
        input.read_exact(&mut compressed)?;

        let mut raw = Vec::new();
        ZlibDecoder::new(&compressed[..])
            .read_to_end(&mut raw)
            .map_err(|e| CubeError::CompressionError(e.to_string()))?;

        let data: Vec<T> = raw.chunks_exact(T::BYTE_WIDTH).map(T::read_le).collect();

        let companions = read_companion_chain(input, next_block)?;

        Ok(CubeFile {
            dims: ZSliceDims { n_t, n_chan, n_y, n_x },
            timepoints_ps: timepoints_ps.unwrap_or_default(),
            data,
            creation_date,
            original_tags,
            companions,
        })
    }
}

fn read_companion_chain<R: Read + Seek>(input: &mut R, mut next: u64) -> Result<Vec<CompanionImage>> {
    let mut companions = Vec::new();

    while next != 0 {
        input.seek(SeekFrom::Start(next))?;

        let mut name = String::new();
        let mut format_tag = String::new();
        let mut width = None;
        let mut height = None;
        let mut data_length = None;
        let mut block_next: u64 = 0;

        loop {
            let tag = Tag::read_from(input)?;
            match (tag.name.as_str(), tag.value) {
                (_, TagValue::EndHeader) => break,
                ("BlockDescription", TagValue::String(s)) => name = s,
                ("ImageFormat", TagValue::String(s)) => format_tag = s,
                ("ImageWidth", TagValue::UInt64(v)) => width = Some(v as u32),
                ("ImageHeight", TagValue::UInt64(v)) => height = Some(v as u32),
                ("ImageDataLength", TagValue::UInt64(v)) => data_length = Some(v as usize),
                ("NextBlock", TagValue::UInt64(v)) => block_next = v,
                _ => {}
            }
        }

        let data_length = data_length.ok_or_else(|| missing("ImageDataLength"))?;
        let mut bytes = vec![0u8; data_length];
        input.read_exact(&mut bytes)?;

        companions.push(CompanionImage {
            name,
            format_tag,
            width: width.unwrap_or(0),
            height: height.unwrap_or(0),
            bytes,
        });

        next = block_next;
    }

    Ok(companions)
}

fn missing(field: &str) -> CubeError {
    CubeError::UnrecognizedFormat(format!("missing required tag {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::writer::CubeWriter;
    use chrono::{DateTime, Local};
    use std::io::Cursor;

    #[test]
    fn round_trips_a_cube_with_one_companion_image() {
        let data: Vec<f32> = (0..32).map(|v| v as f32).collect();
        let dims = ZSliceDims { n_t: 8, n_chan: 1, n_y: 2, n_x: 2 };
        let timepoints: Vec<u64> = (0..8).map(|i| i * 250).collect();
        let companion = CompanionImage {
            name: "intensity".to_string(),
            format_tag: "raw_u16".to_string(),
            width: 2,
            height: 2,
            bytes: vec![1, 0, 2, 0, 3, 0, 4, 0],
        };
        let created_at = DateTime::<Local>::from(std::time::UNIX_EPOCH);

        let mut buf = Cursor::new(Vec::new());
        CubeWriter::write(
            &mut buf,
            dims,
            &data,
            &timepoints,
            &[("shifts.1".to_string(), "0".to_string())],
            created_at,
            std::slice::from_ref(&companion),
        )
        .unwrap();

        buf.set_position(0);
        let read_back: CubeFile<f32> = CubeReader::read(&mut buf).unwrap();

        assert_eq!(read_back.dims.n_t, dims.n_t);
        assert_eq!(read_back.dims.n_chan, dims.n_chan);
        assert_eq!(read_back.dims.n_x, dims.n_x);
        assert_eq!(read_back.dims.n_y, dims.n_y);
        assert_eq!(read_back.data, data);
        assert_eq!(read_back.timepoints_ps, timepoints);
        assert_eq!(read_back.companions.len(), 1);
        assert_eq!(read_back.companions[0].bytes, companion.bytes);
        assert_eq!(read_back.original_tags, vec![("shifts.1".to_string(), "0".to_string())]);
    }
}
