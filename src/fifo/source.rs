//! Byte-level access to a FIFO file: the thing that owns the file handle and
//! hands out raw, undecoded records.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{CubeError, Result};
use crate::fifo::format::RecordFormat;
use crate::fifo::header::PicoquantT3Header;
use crate::types::MarkerMask;

/// A single undecoded record, as read off the wire. Only the PicoQuant T3,
/// 32-bit variant is wired to a concrete source at present; wider
/// variants would widen this alias along with [`RecordFormat`].
pub type RawRecord = u32;

/// Byte-level reader producing raw records from a file, restartable.
///
/// Implementors own the input handle; callers must not interleave two
/// iterations over the same source. [`EventSource::set_to_start`]
/// rewinds to the data offset established once, at construction, by the
/// header parse — re-parsing the header on every restart is not part of
/// this contract.
pub trait EventSource {
    fn set_to_start(&mut self) -> Result<()>;
    fn has_more(&mut self) -> Result<bool>;
    fn next_raw(&mut self) -> Result<RawRecord>;
}

/// Capability a format-specific reader exposes to the rest of the pipeline:
/// parse its own header, hand back an [`EventSource`] positioned at the
/// first record, and report the marker configuration the header implied.
///
/// Treats "reader for format X" as a capability rather than a plugin slot:
/// this crate stays closed to general plugin loading — dispatch on file
/// extension, and format-sniffing itself, are the caller's concern. Only
/// [`PicoquantT3Source`] implements it today.
pub trait FifoSource {
    type Source: EventSource;

    /// Parse the file header and position the returned source at the first
    /// data record.
    fn read_header(path: &Path) -> Result<Self>
    where
        Self: Sized;

    fn produce_events(&mut self) -> &mut Self::Source;

    /// Marker bit configuration implied by the header.
    fn marker_mask(&self) -> MarkerMask;
}

/// Raw reader over a PicoQuant T3, 32-bit little-endian record stream.
///
/// Holds the file handle and the data offset found by the header parse, so
/// [`EventSource::set_to_start`] is a cheap seek rather than a re-parse.
pub struct PicoquantT3Source {
    reader: BufReader<File>,
    data_offset: u64,
    format: RecordFormat,
}

impl PicoquantT3Source {
    /// `data_offset` is the absolute byte offset of the first record, as
    /// established by whatever header parse constructed this source.
    pub fn new(path: &Path, data_offset: u64, format: RecordFormat) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        reader.seek(SeekFrom::Start(data_offset))?;
        Ok(Self { reader, data_offset, format })
    }

    #[must_use]
    pub fn format(&self) -> RecordFormat {
        self.format
    }
}

/// Parses a PicoQuant T3 file header and positions an [`EventSource`] at the
/// first record.
///
/// The header carries `n_x`/`n_y` imaging hints (see
/// [`crate::fifo::header::PicoquantT3Header`]) but nothing that pins down
/// which external-marker bit plays which semantic role (pixel clock, line
/// start/end, frame); that assignment is a per-acquisition hardware setting,
/// not part of the record stream. [`PicoquantT3Reader::read_header`] falls
/// back to this crate's own marker bit convention ([`crate::types::Marks`]);
/// callers that know their acquisition's actual marker wiring should build
/// the `PicoquantT3Reader` with [`PicoquantT3Reader::with_marker_mask`]
/// instead of trusting the default.
pub struct PicoquantT3Reader {
    source: PicoquantT3Source,
    marker_mask: MarkerMask,
    pub n_x_hint: Option<u32>,
    pub n_y_hint: Option<u32>,
    pub routing_channels: u32,
}

const DEFAULT_MARKER_MASK: MarkerMask = MarkerMask {
    pixel: 0,
    line_start: 0b0010,
    line_end: 0b0100,
    frame: 0b1000,
};

impl PicoquantT3Reader {
    #[must_use]
    pub fn with_marker_mask(mut self, marker_mask: MarkerMask) -> Self {
        self.marker_mask = marker_mask;
        self
    }
}

impl FifoSource for PicoquantT3Reader {
    type Source = PicoquantT3Source;

    fn read_header(path: &Path) -> Result<Self> {
        let header = PicoquantT3Header::read(path)?;
        let source = PicoquantT3Source::new(path, header.data_offset, RecordFormat::PICOQUANT_T3_32)?;
        Ok(Self {
            source,
            marker_mask: DEFAULT_MARKER_MASK,
            n_x_hint: header.n_x,
            n_y_hint: header.n_y,
            routing_channels: header.routing_channels,
        })
    }

    fn produce_events(&mut self) -> &mut Self::Source {
        &mut self.source
    }

    fn marker_mask(&self) -> MarkerMask {
        self.marker_mask
    }
}

impl EventSource for PicoquantT3Source {
    fn set_to_start(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(self.data_offset))?;
        Ok(())
    }

    fn has_more(&mut self) -> Result<bool> {
        let buf = self.reader.fill_buf()?;
        Ok(!buf.is_empty())
    }

    fn next_raw(&mut self) -> Result<RawRecord> {
        let mut bytes = [0u8; 4];
        match self.reader.read_exact(&mut bytes) {
            Ok(()) => Ok(u32::from_le_bytes(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(CubeError::UnexpectedEof),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_records(records: &[u32]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for r in records {
            f.write_all(&r.to_le_bytes()).unwrap();
        }
        f
    }

    #[test]
    fn reads_records_in_order_and_restarts() {
        let file = write_records(&[1, 2, 3]);
        let mut src = PicoquantT3Source::new(file.path(), 0, RecordFormat::PICOQUANT_T3_32).unwrap();

        assert!(src.has_more().unwrap());
        assert_eq!(src.next_raw().unwrap(), 1);
        assert_eq!(src.next_raw().unwrap(), 2);
        assert_eq!(src.next_raw().unwrap(), 3);
        assert!(!src.has_more().unwrap());

        src.set_to_start().unwrap();
        assert_eq!(src.next_raw().unwrap(), 1);
    }

    #[test]
    fn truncated_record_is_unexpected_eof() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0u8, 1, 2]).unwrap();
        let mut src = PicoquantT3Source::new(file.path(), 0, RecordFormat::PICOQUANT_T3_32).unwrap();
        match src.next_raw() {
            Err(CubeError::UnexpectedEof) => {}
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }

    #[test]
    fn reads_header_and_positions_at_first_record() {
        use crate::fifo::header::synthetic_header_bytes;

        let mut file = NamedTempFile::new().unwrap();
        let mut bytes = synthetic_header_bytes(64, 32, 0);
        bytes.extend_from_slice(&photon_record_bytes(3, 100, 42));
        file.write_all(&bytes).unwrap();

        let mut reader = PicoquantT3Reader::read_header(file.path()).unwrap();
        assert_eq!(reader.n_x_hint, Some(64));
        assert_eq!(reader.n_y_hint, Some(32));
        assert_eq!(reader.routing_channels, 2);
        assert_eq!(reader.marker_mask(), DEFAULT_MARKER_MASK);

        let source = reader.produce_events();
        assert!(source.has_more().unwrap());
        assert_eq!(source.next_raw().unwrap(), u32::from_le_bytes(photon_record_bytes(3, 100, 42)));
    }

    fn photon_record_bytes(channel: u32, dtime: u32, nsync: u32) -> [u8; 4] {
        let raw = (channel << 28) | (dtime << 16) | nsync;
        raw.to_le_bytes()
    }
}
