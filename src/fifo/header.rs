//! Parses the PicoQuant T3 file header down to the one thing the rest of
//! the pipeline needs from it: the absolute byte offset where T3 records
//! begin.
//!
//! The field layout below mirrors the classic PicoHarp T3 (`.pt3`) file
//! header: a fixed run of identification/acquisition fields, followed by a
//! per-board "special" header whose length in 4-byte words is given by
//! `spec_header_length`. Only `spec_header_length`, `n_x`, and `n_y` are
//! kept; everything else is read only to advance the cursor by the right
//! number of bytes.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::Result;

const IDENT_LEN: usize = 16;
const FORMAT_VERSION_LEN: usize = 6;
const CREATOR_NAME_LEN: usize = 18;
const CREATOR_VERSION_LEN: usize = 12;
const FILE_TIME_LEN: usize = 18;
const COMMENT_LEN: usize = 256;
const SCRIPT_NAME_LEN: usize = 20;

/// What this crate actually uses from the PicoQuant T3 header: the
/// imaging-mode grid dimensions it happens to carry (used as hints, not
/// overrides, for calibration), the number of routed detector channels, and
/// the absolute offset of the first record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PicoquantT3Header {
    pub n_x: Option<u32>,
    pub n_y: Option<u32>,
    pub routing_channels: u32,
    pub data_offset: u64,
}

/// Read and discard a fixed-size ASCII field.
fn skip_bytes<R: Read>(reader: &mut R, n: usize) -> Result<()> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf)?;
    Ok(())
}

impl PicoquantT3Header {
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        skip_bytes(reader, IDENT_LEN)?;
        skip_bytes(reader, FORMAT_VERSION_LEN)?;
        skip_bytes(reader, CREATOR_NAME_LEN)?;
        skip_bytes(reader, CREATOR_VERSION_LEN)?;
        skip_bytes(reader, FILE_TIME_LEN)?;
        skip_bytes(reader, COMMENT_LEN)?;

        // n_curves, bits_per_record.
        for _ in 0..2 {
            reader.read_i32::<LittleEndian>()?;
        }
        let routing_channels = reader.read_i32::<LittleEndian>()?;
        // n_boards, active_curve, measurement_mode, sub_mode, range_no,
        // offset, acq_time, stop_at, stop_on_overflow, restart.
        for _ in 0..10 {
            reader.read_i32::<LittleEndian>()?;
        }

        // repeat_mode, repeats_per_curve, repeat_time, repeat_wait_time.
        for _ in 0..4 {
            reader.read_i32::<LittleEndian>()?;
        }
        skip_bytes(reader, SCRIPT_NAME_LEN)?;

        // input0_countrate, input1_countrate, stop_after, stop_reason,
        // n_records.
        for _ in 0..5 {
            reader.read_i32::<LittleEndian>()?;
        }
        let spec_header_length = reader.read_i32::<LittleEndian>()?;

        let _dimensions = reader.read_i32::<LittleEndian>()?;
        let _imaging_ident = reader.read_i32::<LittleEndian>()?;
        let n_x = reader.read_i32::<LittleEndian>()?;
        let n_y = reader.read_i32::<LittleEndian>()?;

        let fixed_len: u64 = (IDENT_LEN
            + FORMAT_VERSION_LEN
            + CREATOR_NAME_LEN
            + CREATOR_VERSION_LEN
            + FILE_TIME_LEN
            + COMMENT_LEN
            + 13 * 4
            + 4 * 4
            + SCRIPT_NAME_LEN
            + 5 * 4
            + 5 * 4) as u64;

        let special_header_bytes = i64::from(spec_header_length.max(0)) as u64 * 4;
        skip_bytes(reader, special_header_bytes as usize)?;

        Ok(Self {
            n_x: u32::try_from(n_x).ok().filter(|&v| v > 0),
            n_y: u32::try_from(n_y).ok().filter(|&v| v > 0),
            routing_channels: u32::try_from(routing_channels).unwrap_or(0),
            data_offset: fixed_len + special_header_bytes,
        })
    }
}

/// Builds a well-formed header byte string for tests elsewhere in this crate
/// that need a real file on disk to exercise [`crate::fifo::source::PicoquantT3Reader`].
#[cfg(test)]
pub(crate) fn synthetic_header_bytes(n_x: i32, n_y: i32, spec_header_words: i32) -> Vec<u8> {
    tests::synthetic_header(n_x, n_y, spec_header_words)
}
