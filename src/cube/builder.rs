//! Accumulates mapped photons into a time-resolved cube, with downsampling,
//! per-channel time shifts, and channel masking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cube::axis::{TimeAxis, TimeShifts};
use crate::cube::model::{Cube, CubeDims, CubeElement};
use crate::types::Photon;

/// A published intensity (sum-over-time) preview of one output frame,
/// shaped `[n_z, n_y, n_x]`, flattened row-major.
///
/// This is the shared `frames` buffer: written by [`CubeBuilder`], read by
/// an optional [`crate::cube::worker::RealignmentWorker`].
#[derive(Clone, Debug)]
pub struct IntensityFrame {
    pub output_frame_index: u32,
    pub pixels: Vec<u64>,
}

/// Parameters a [`CubeBuilder`] is constructed with. `dims.n_t` must
/// already reflect the downsampling shift (see [`TimeAxis::n_t`]); the
/// builder itself only shifts incoming micro-times, it does not derive the
/// bin count.
pub struct CubeBuilderConfig {
    pub dims: CubeDims,
    pub downsampling_shift: u32,
    pub time_shifts: TimeShifts,
    /// Indexed by raw detector channel; `true` keeps the channel.
    pub channel_mask: Vec<bool>,
    pub t_rep_resunit: u64,
    pub frame_binning: u32,
}

/// Accumulates photons into a dense histogram while publishing an
/// intensity preview after every completed (and binned) output frame.
pub struct CubeBuilder<T: CubeElement> {
    histogram: Cube<T>,
    scratch: Vec<u64>,
    config: CubeBuilderConfig,
    /// Maps a raw channel id to its compact output index, or `None` if the
    /// channel is masked out.
    channel_indices: Vec<Option<u32>>,
    raw_frames_in_group: u32,
    next_output_frame: u32,
    frames: Arc<Mutex<Vec<IntensityFrame>>>,
    terminate: Arc<AtomicBool>,
}

impl<T: CubeElement> CubeBuilder<T> {
    #[must_use]
    pub fn new(config: CubeBuilderConfig) -> Self {
        let mut next_index = 0u32;
        let channel_indices = config
            .channel_mask
            .iter()
            .map(|&enabled| {
                if enabled {
                    let idx = next_index;
                    next_index += 1;
                    Some(idx)
                } else {
                    None
                }
            })
            .collect();

        let histogram = Cube::zeros(config.dims);
        let scratch_len =
            config.dims.n_z as usize * config.dims.n_y as usize * config.dims.n_x as usize;

        Self {
            histogram,
            scratch: vec![0u64; scratch_len],
            config,
            channel_indices,
            raw_frames_in_group: 0,
            next_output_frame: 0,
            frames: Arc::new(Mutex::new(Vec::new())),
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The shared intensity-frame buffer, handed to a
    /// [`crate::cube::worker::RealignmentWorker`] on setup.
    #[must_use]
    pub fn frames_handle(&self) -> Arc<Mutex<Vec<IntensityFrame>>> {
        Arc::clone(&self.frames)
    }

    /// The shared termination flag, handed to a
    /// [`crate::cube::worker::RealignmentWorker`] on setup, and set by
    /// whatever owns this builder on teardown.
    #[must_use]
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    /// Accumulate one photon into the histogram and the
    /// current intensity scratch.
    pub fn add_photon(&mut self, photon: Photon) {
        let Some(Some(c_idx)) = self.channel_indices.get(photon.channel as usize).copied() else {
            return;
        };

        let m: u64 = if self.config.t_rep_resunit > 0 {
            let shift = self.config.time_shifts.for_channel(photon.channel as usize);
            let rep = self.config.t_rep_resunit as i64;
            let mut m = (i64::from(photon.micro_time) + shift) % rep;
            if m < 0 {
                m += rep;
            }
            m as u64
        } else {
            u64::from(photon.micro_time)
        };

        let tb = (m >> self.config.downsampling_shift) as u32;
        if tb >= self.histogram.dims.n_t {
            return;
        }

        self.histogram.increment(tb, c_idx, u32::from(photon.z), u32::from(photon.y), u32::from(photon.x));

        let scratch_idx = (photon.z as usize * self.histogram.dims.n_y as usize + photon.y as usize)
            * self.histogram.dims.n_x as usize
            + photon.x as usize;
        if let Some(slot) = self.scratch.get_mut(scratch_idx) {
            *slot += 1;
        }
    }

    /// Mark one raw (possibly sub-stacked) frame as complete. Returns
    /// `false` once `terminate` has been observed, at which point the
    /// caller should stop pulling further frames; partial intensity-frame
    /// state is discarded.
    pub fn finish_frame(&mut self) -> bool {
        if self.terminate.load(Ordering::Acquire) {
            if let Ok(mut frames) = self.frames.lock() {
                frames.clear();
            }
            return false;
        }

        self.raw_frames_in_group += 1;
        let group_size = self.config.dims.n_z.max(1) * self.config.frame_binning.max(1);
        if self.raw_frames_in_group >= group_size {
            self.flush_intensity_frame();
            self.raw_frames_in_group = 0;
        }
        true
    }

    fn flush_intensity_frame(&mut self) {
        let frame = IntensityFrame {
            output_frame_index: self.next_output_frame,
            pixels: std::mem::replace(&mut self.scratch, vec![0u64; self.scratch.len()]),
        };
        self.next_output_frame += 1;
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(frame);
        }
    }

    /// Consume the builder, returning the finished histogram.
    #[must_use]
    pub fn into_cube(self) -> Cube<T> {
        self.histogram
    }

    #[must_use]
    pub fn cube(&self) -> &Cube<T> {
        &self.histogram
    }
}

/// Derive a [`CubeBuilderConfig`]'s spatial/channel/time dims from a
/// [`TimeAxis`] and the number of enabled channels, a convenience for
/// callers that already built the axis.
#[must_use]
pub fn dims_from_axis(axis: &TimeAxis, n_chan: u32, n_z: u32, n_y: u32, n_x: u32) -> CubeDims {
    CubeDims { n_t: axis.n_t(), n_chan, n_z, n_y, n_x }
}
