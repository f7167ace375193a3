//! Groups the decoded event stream into per-frame windows using frame/line
//! markers.

use crate::calibration::SyncCalibration;
use crate::error::Result;
use crate::fifo::decoder::EventDecoder;
use crate::fifo::source::EventSource;
use crate::types::{EventKind, FifoEvent, MarkerMask};

/// Pulls events from a decoded stream and buffers exactly one frame's worth
/// at a time.
///
/// A frame boundary is the next frame marker, or, for acquisitions with no
/// frame marker at all, the point after `n_y` line-starts have been seen.
/// When a frame marker ends a frame it is carried over as the leading event
/// of the next one, so callers that look for a frame marker at the start of
/// [`FrameAssembler::current_frame`] see it there.
pub struct FrameAssembler<'a> {
    source: &'a mut dyn EventSource,
    decoder: &'a mut EventDecoder,
    marker_mask: MarkerMask,
    has_frame_marker: bool,
    n_y: u32,
    buffer: Vec<FifoEvent>,
    pending: Option<FifoEvent>,
    frame_index: u32,
    finished: bool,
}

impl<'a> FrameAssembler<'a> {
    #[must_use]
    pub fn new(
        source: &'a mut dyn EventSource,
        decoder: &'a mut EventDecoder,
        calibration: &SyncCalibration,
        marker_mask: MarkerMask,
    ) -> Self {
        Self {
            source,
            decoder,
            marker_mask,
            has_frame_marker: calibration.has_initial_frame_marker,
            n_y: calibration.n_y,
            buffer: Vec::new(),
            pending: None,
            frame_index: 0,
            finished: false,
        }
    }

    /// Pull events until the next frame boundary. Returns `false` once the
    /// stream is exhausted and no further frame was produced.
    pub fn load_next(&mut self) -> Result<bool> {
        self.buffer.clear();

        if self.finished {
            return Ok(false);
        }

        if let Some(carried) = self.pending.take() {
            self.buffer.push(carried);
        }

        let mut lines_in_frame: u32 = 0;

        loop {
            if !self.source.has_more()? {
                self.finished = true;
                break;
            }
            let event = self.decoder.next_event(self.source)?;

            let is_frame_boundary = self.has_frame_marker
                && event.kind == EventKind::Marker
                && self.marker_mask.is_frame(event.mark)
                && !self.buffer.is_empty();

            if is_frame_boundary {
                self.pending = Some(event);
                break;
            }

            if event.kind == EventKind::Marker && self.marker_mask.is_line_start(event.mark) {
                lines_in_frame += 1;
            }
            self.buffer.push(event);

            if !self.has_frame_marker && lines_in_frame >= self.n_y {
                break;
            }
        }

        if self.buffer.is_empty() {
            return Ok(false);
        }

        self.frame_index += 1;
        Ok(true)
    }

    #[must_use]
    pub fn current_frame(&self) -> &[FifoEvent] {
        &self.buffer
    }

    /// 1-based index of the frame currently buffered, matching the count of
    /// [`FrameAssembler::load_next`] calls that returned `true` so far.
    #[must_use]
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }
}
