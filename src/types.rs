//! Common, normalized types shared across stages of the FIFO decode →
//! calibrate → map → histogram pipeline.

use bitflags::bitflags;

bitflags! {
    /// External marker bits carried by a [`FifoEvent`] of kind [`EventKind::Marker`].
    ///
    /// The raw bit position of each semantic marker is hardware- and
    /// configuration-dependent; see [`MarkerMask`], which maps the semantic
    /// names below onto the raw nibble a given acquisition actually uses.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Marks: u8 {
        const PIXEL      = 0b0001;
        const LINE_START = 0b0010;
        const LINE_END   = 0b0100;
        const FRAME      = 0b1000;
    }
}

/// Maps semantic scan markers onto the raw bit positions a particular
/// acquisition encodes them with. Any field may be `0`, meaning that marker
/// is absent from the stream (the calibrator and mapper fall back
/// accordingly; see [`crate::calibration`] and [`crate::mapper`]).
///
/// Computed once from the file header and passed by value to every
/// consumer; there is deliberately no process-wide singleton for this
/// configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarkerMask {
    pub pixel: u8,
    pub line_start: u8,
    pub line_end: u8,
    pub frame: u8,
}

impl MarkerMask {
    #[must_use]
    pub fn new(pixel: u8, line_start: u8, line_end: u8, frame: u8) -> Self {
        Self {
            pixel,
            line_start,
            line_end,
            frame,
        }
    }

    #[must_use]
    pub fn is_pixel(&self, raw_mark: u8) -> bool {
        self.pixel != 0 && (raw_mark & self.pixel) != 0
    }

    #[must_use]
    pub fn is_line_start(&self, raw_mark: u8) -> bool {
        self.line_start != 0 && (raw_mark & self.line_start) != 0
    }

    #[must_use]
    pub fn is_line_end(&self, raw_mark: u8) -> bool {
        self.line_end != 0 && (raw_mark & self.line_end) != 0
    }

    #[must_use]
    pub fn is_frame(&self, raw_mark: u8) -> bool {
        self.frame != 0 && (raw_mark & self.frame) != 0
    }

    /// Whether this acquisition has no frame marker at all, so the frame
    /// boundary must be inferred from a fixed line count instead.
    #[must_use]
    pub fn has_no_frame_marker(&self) -> bool {
        self.frame == 0
    }
}

/// A single decoded event from the FIFO stream.
///
/// `valid = false` marks padding/gap events that callers must skip but that
/// are still yielded so stream position bookkeeping stays correct (see
/// [`crate::fifo::decoder`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FifoEvent {
    pub valid: bool,
    pub kind: EventKind,
    /// Cumulative coarse time in sync-clock ticks, wrap-corrected across
    /// overflow markers. Monotonically non-decreasing across the stream.
    pub macro_time: u64,
    /// Fine-grained delay from the preceding sync pulse, in native
    /// time-resolution units. Only meaningful for [`EventKind::Photon`].
    pub micro_time: u16,
    /// Detector channel. Only meaningful for [`EventKind::Photon`].
    pub channel: u8,
    /// Raw external marker bits. Only nonzero for [`EventKind::Marker`].
    pub mark: u8,
}

impl FifoEvent {
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            valid: false,
            kind: EventKind::Invalid,
            macro_time: 0,
            micro_time: 0,
            channel: 0,
            mark: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Photon,
    Marker,
    Overflow,
    Invalid,
}

/// A photon placed onto the pixel grid by [`crate::mapper::PhotonMapper`].
///
/// Coordinates are guaranteed in-range `[0, n_x) x [0, n_y)`; the mapper
/// discards out-of-range photons silently rather than constructing one of
/// these for them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Photon {
    pub frame: u32,
    pub z: u16,
    pub y: u16,
    pub x: u16,
    pub channel: u8,
    pub micro_time: u16,
}
