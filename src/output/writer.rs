//! Serializes a cube Z-slice, its metadata, and any companion images into
//! the self-describing binary container.
//!
//! The back-patch pattern below — write a placeholder, remember its
//! offset, come back once the real value is known — is the same one
//! `fmf::FMFWriter` uses for a simpler header elsewhere in this ecosystem.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Local};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::cube::model::CubeElement;
use crate::error::{CubeError, Result};
use crate::output::tag::{Tag, TagValue};

const MAGIC: u32 = 0x0000_C0BE;
const FORMAT_VERSION: u32 = 2;

/// Create the output file for a cube container, mapping the open failure to
/// [`CubeError::WriteOpenFailed`] so callers can distinguish "couldn't open
/// the destination" from the write/compression errors that can occur once
/// the file is already open (matching the writer's "no partial output is
/// left on failure" contract at the point that's cheapest to guarantee it).
pub fn create_output_file(path: &Path) -> Result<File> {
    File::create(path).map_err(|source| CubeError::WriteOpenFailed {
        path: path.display().to_string(),
        source,
    })
}

/// Dimensions of the single Z-slice being written; the cube itself may
/// have more Z planes, but one file holds one slice.
#[derive(Clone, Copy, Debug)]
pub struct ZSliceDims {
    pub n_t: u32,
    pub n_chan: u32,
    pub n_y: u32,
    pub n_x: u32,
}

/// An appended companion image block. Encoding the image bytes
/// themselves is the caller's concern — this crate only places the bytes
/// it is given into the chained block format.
#[derive(Clone, Debug)]
pub struct CompanionImage {
    pub name: String,
    pub format_tag: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Serializes one cube Z-slice to the container format.
pub struct CubeWriter;

impl CubeWriter {
    /// Write `data` (row-major, innermost `x`, length
    /// `dims.n_t * dims.n_chan * dims.n_y * dims.n_x`) plus its metadata.
    pub fn write<T: CubeElement, W: Write + Seek>(
        out: &mut W,
        dims: ZSliceDims,
        data: &[T],
        timepoints_ps: &[u64],
        original_tags: &[(String, String)],
        created_at: DateTime<Local>,
        companions: &[CompanionImage],
    ) -> Result<()> {
        out.write_u32::<LittleEndian>(MAGIC)?;
        out.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        let data_pos_field = out.stream_position()?;
        out.write_u32::<LittleEndian>(0)?;

        Tag::new("NumTimeBins", TagValue::UInt64(u64::from(dims.n_t))).write_to(out)?;
        Tag::new("NumX", TagValue::UInt64(u64::from(dims.n_x))).write_to(out)?;
        Tag::new("NumY", TagValue::UInt64(u64::from(dims.n_y))).write_to(out)?;
        Tag::new("NumChannels", TagValue::UInt64(u64::from(dims.n_chan))).write_to(out)?;
        Tag::new("TimeBins", TagValue::UInt64Vec(timepoints_ps.to_vec())).write_to(out)?;
        Tag::new("DataType", TagValue::String(T::DATA_TYPE.to_string())).write_to(out)?;
        Tag::new("CreationDate", TagValue::Date(created_at.format("%FT%T").to_string())).write_to(out)?;
        Tag::new("Compressed", TagValue::Bool(true)).write_to(out)?;

        let compressed = deflate(data)?;
        Tag::new("CompressedSize", TagValue::UInt64(compressed.len() as u64)).write_to(out)?;

        for (key, value) in original_tags {
            Tag::new(format!("OriginalTags_{key}"), TagValue::String(value.clone())).write_to(out)?;
        }

        let next_block_field = out.stream_position()?;
        Tag::new("NextBlock", TagValue::UInt64(0)).write_to(out)?;

        Tag::end_header().write_to(out)?;

        let data_pos = out.stream_position()?;
        out.write_all(&compressed)?;

        backpatch_u32(out, data_pos_field, data_pos as u32)?;

        let mut chain_field = next_block_field;
        for image in companions {
            let block_start = out.stream_position()?;
            backpatch_tag(out, chain_field, &Tag::new("NextBlock", TagValue::UInt64(block_start)))?;
            chain_field = write_companion_block(out, image)?;
        }

        Ok(())
    }
}

fn write_companion_block<W: Write + Seek>(out: &mut W, image: &CompanionImage) -> Result<u64> {
    Tag::new("BlockType", TagValue::String("Image".to_string())).write_to(out)?;
    Tag::new("BlockDescription", TagValue::String(image.name.clone())).write_to(out)?;
    Tag::new("ImageFormat", TagValue::String(image.format_tag.clone())).write_to(out)?;
    Tag::new("ImageWidth", TagValue::UInt64(u64::from(image.width))).write_to(out)?;
    Tag::new("ImageHeight", TagValue::UInt64(u64::from(image.height))).write_to(out)?;
    Tag::new("ImageDataLength", TagValue::UInt64(image.bytes.len() as u64)).write_to(out)?;

    let next_block_field = out.stream_position()?;
    Tag::new("NextBlock", TagValue::UInt64(0)).write_to(out)?;

    Tag::end_header().write_to(out)?;
    out.write_all(&image.bytes)?;

    Ok(next_block_field)
}

fn backpatch_u32<W: Write + Seek>(out: &mut W, field_start: u64, value: u32) -> Result<()> {
    let resume = out.stream_position()?;
    out.seek(SeekFrom::Start(field_start))?;
    out.write_u32::<LittleEndian>(value)?;
    out.seek(SeekFrom::Start(resume))?;
    Ok(())
}

fn backpatch_tag<W: Write + Seek>(out: &mut W, field_start: u64, tag: &Tag) -> Result<()> {
    let resume = out.stream_position()?;
    out.seek(SeekFrom::Start(field_start))?;
    tag.write_to(out)?;
    out.seek(SeekFrom::Start(resume))?;
    Ok(())
}

/// zlib-deflate `data` at default compression, pre-sizing the output
/// buffer to the worst-case expansion for this configuration.
fn deflate<T: CubeElement>(data: &[T]) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(data.len() * T::BYTE_WIDTH);
    for value in data {
        value.write_le(&mut raw);
    }

    let n = raw.len();
    let worst_case = n + 6 + n.div_ceil(16384) * 5;
    let mut compressed = Vec::with_capacity(worst_case);

    let mut encoder = ZlibEncoder::new(&mut compressed, Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| CubeError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CubeError::CompressionError(e.to_string()))?;

    Ok(compressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writes_header_tags_and_nonzero_data_pos() {
        let data: Vec<u16> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let dims = ZSliceDims { n_t: 2, n_chan: 1, n_y: 2, n_x: 2 };
        let mut buf = Cursor::new(Vec::new());
        let created_at = DateTime::<Local>::from(std::time::UNIX_EPOCH);

        CubeWriter::write(&mut buf, dims, &data, &[0, 250], &[], created_at, &[]).unwrap();

        let bytes = buf.into_inner();
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(magic, MAGIC);
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(version, FORMAT_VERSION);
        let data_pos = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        assert!(data_pos > 12);
        assert!((data_pos as usize) < bytes.len());
    }

    #[test]
    fn create_output_file_reports_write_open_failed_for_a_bad_path() {
        let path = Path::new("/nonexistent-dir-for-flim-cube-tests/cube.bin");
        match create_output_file(path) {
            Err(CubeError::WriteOpenFailed { path: reported, .. }) => {
                assert_eq!(reported, path.display().to_string());
            }
            other => panic!("expected WriteOpenFailed, got {other:?}"),
        }
    }
}
