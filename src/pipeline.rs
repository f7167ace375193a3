//! Wires the individual stages — FIFO source, decoder, calibrator, frame
//! assembler, photon mapper, and cube builder — into a single pass over one
//! acquisition file.
//!
//! This is the orchestration glue the `flim_cube` binary calls; nothing here
//! is reachable from outside the crate that a caller couldn't assemble by
//! hand from the individual modules, but most callers want the common path
//! done once correctly rather than five times slightly differently.

use std::path::Path;
use std::sync::atomic::Ordering;

use chrono::Local;

use crate::calibration::{CalibrationConfig, SyncCalibration, SyncCalibrator};
use crate::cube::axis::{TimeAxis, TimeShifts};
use crate::cube::builder::{dims_from_axis, CubeBuilder, CubeBuilderConfig};
use crate::cube::model::{Cube, CubeElement};
use crate::cube::worker::RealignmentWorker;
use crate::error::Result;
use crate::fifo::decoder::EventDecoder;
use crate::fifo::format::RecordFormat;
use crate::fifo::source::{FifoSource, PicoquantT3Reader};
use crate::frame::FrameAssembler;
use crate::mapper::PhotonMapper;
use crate::settings::{ChannelSelection, SidecarShifts};
use crate::types::MarkerMask;

/// Everything a caller needs to pick to turn one FIFO file into one cube,
/// beyond what the file header itself supplies.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Overrides the default marker-bit assignment this crate falls back to
    /// when the header gives no better answer (see
    /// [`crate::fifo::source::PicoquantT3Reader`]).
    pub marker_mask: Option<MarkerMask>,
    pub line_averaging: u32,
    /// Overrides the header's `n_x`/`n_y` imaging hints, if present.
    pub n_x: Option<u32>,
    pub n_y: Option<u32>,
    pub n_z: u32,
    pub frame_binning: u32,
    pub downsampling_shift: u32,
    /// Laser repetition period in picoseconds; `0` if the acquisition is not
    /// periodic (no time-shift wraparound is applied in that case).
    pub t_rep_ps: u64,
    /// Channels to keep; empty means all channels detected in the record
    /// format. See [`ChannelSelection`].
    pub requested_channels: Vec<u32>,
    /// Spawn a [`RealignmentWorker`] over the builder's published intensity
    /// frames while the pipeline runs.
    pub realign_in_flight: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            marker_mask: None,
            line_averaging: 1,
            n_x: None,
            n_y: None,
            n_z: 1,
            frame_binning: 1,
            downsampling_shift: 0,
            t_rep_ps: 0,
            requested_channels: Vec::new(),
            realign_in_flight: false,
        }
    }
}

/// The finished product of one run: the histogram cube itself, plus the
/// metadata a caller needs to serialize it with [`crate::output::writer::CubeWriter`].
pub struct PipelineOutput<T: CubeElement> {
    pub cube: Cube<T>,
    pub calibration: SyncCalibration,
    pub timepoints_ps: Vec<u64>,
    pub original_tags: Vec<(String, String)>,
}

/// Build a cube from a PicoQuant T3 FIFO file in one pass (plus the
/// unavoidable calibration pre-pass, see [`SyncCalibrator`]).
///
/// `T` selects the cube's element width (`u16`, `f32`, or `f64`); callers
/// pick whichever matches the expected photon counts per bin.
pub fn build_cube_from_file<T: CubeElement>(
    path: &Path,
    config: &PipelineConfig,
) -> Result<PipelineOutput<T>> {
    let format = RecordFormat::PICOQUANT_T3_32;
    let mut reader = PicoquantT3Reader::read_header(path)?;
    if let Some(mask) = config.marker_mask {
        reader = reader.with_marker_mask(mask);
    }
    let marker_mask = reader.marker_mask();
    let n_x_hint = config.n_x.or(reader.n_x_hint);
    let n_y_hint = config.n_y.or(reader.n_y_hint);
    let n_chan_detected = if reader.routing_channels > 0 {
        reader.routing_channels
    } else {
        format.special_channel_value()
    };

    let sidecar = SidecarShifts::load_next_to(path);

    let calibration_config = CalibrationConfig {
        marker_mask,
        line_averaging: config.line_averaging,
        n_x: n_x_hint,
        n_y: n_y_hint,
    };
    let calibrator = SyncCalibrator::new(calibration_config);

    let source = reader.produce_events();
    let mut decoder = EventDecoder::new(format);
    let calibration = calibrator.calibrate(&mut *source, &mut decoder)?;

    source.set_to_start()?;
    decoder.reset();

    let selection = ChannelSelection::validate(&config.requested_channels, n_chan_detected, 0);
    let channel_mask = selection.to_channel_mask(n_chan_detected);

    let native_bin_count = 1u32 << format.dtime_bits;
    let axis = TimeAxis::new(native_bin_count, 1, config.t_rep_ps)?
        .with_downsampling(config.downsampling_shift)?;

    let time_shifts = TimeShifts::new(sidecar.shifts_ps.iter().map(|&ps| ps as i64).collect());

    let dims = dims_from_axis(
        &axis,
        selection.channels.len() as u32,
        config.n_z,
        calibration.n_y,
        calibration.n_x,
    );
    let builder_config = CubeBuilderConfig {
        dims,
        downsampling_shift: axis.shift(),
        time_shifts,
        channel_mask,
        t_rep_resunit: axis.t_rep_resunit(),
        frame_binning: config.frame_binning,
    };
    let mut builder: CubeBuilder<T> = CubeBuilder::new(builder_config);

    let _worker = if config.realign_in_flight {
        Some(RealignmentWorker::spawn(
            builder.frames_handle(),
            builder.terminate_handle(),
        )?)
    } else {
        None
    };

    let terminate = builder.terminate_handle();
    let mut raw_frame_index: u32 = 0;

    {
        let mut assembler = FrameAssembler::new(&mut *source, &mut decoder, &calibration, marker_mask);
        while assembler.load_next()? {
            if terminate.load(Ordering::Acquire) {
                break;
            }

            let z = (raw_frame_index % config.n_z.max(1)) as u16;
            let frame_number = raw_frame_index / (config.n_z.max(1) * config.frame_binning.max(1));
            let mut mapper = PhotonMapper::new(
                assembler.current_frame(),
                calibration,
                marker_mask,
                frame_number,
                z,
            );
            while let Some(photon) = mapper.next_photon() {
                builder.add_photon(photon);
            }

            if !builder.finish_frame() {
                break;
            }
            raw_frame_index += 1;
        }
    }

    let original_tags = vec![
        ("shifts.1".to_string(), sidecar.shifts_ps[0].to_string()),
        ("shifts.2".to_string(), sidecar.shifts_ps[1].to_string()),
        ("shifts.3".to_string(), sidecar.shifts_ps[2].to_string()),
        ("shifts.4".to_string(), sidecar.shifts_ps[3].to_string()),
    ];

    Ok(PipelineOutput {
        timepoints_ps: axis.timepoints_ps(),
        cube: builder.into_cube(),
        calibration,
        original_tags,
    })
}

/// Current local time, used as a container's `CreationDate` tag when the
/// caller has no better timestamp in mind.
#[must_use]
pub fn now_local() -> chrono::DateTime<Local> {
    Local::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::header::synthetic_header_bytes;
    use tempfile::NamedTempFile;

    fn marker_record(mark_bits: u32, nsync: u32) -> u32 {
        (15u32 << 28) | (mark_bits << 16) | nsync
    }

    fn photon_record(channel: u32, dtime: u32, nsync: u32) -> u32 {
        (channel << 28) | (dtime << 16) | nsync
    }

    const LINE_START: u32 = 0b0010;
    const LINE_END: u32 = 0b0100;
    const FRAME: u32 = 0b1000;

    fn write_fifo_file(path: &Path, records: &[u32]) {
        let mut bytes = synthetic_header_bytes(2, 2, 0);
        for r in records {
            bytes.extend_from_slice(&r.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn builds_a_cube_from_a_two_frame_synthetic_file() {
        let file = NamedTempFile::new().unwrap();
        let records = vec![
            marker_record(FRAME, 0),
            marker_record(LINE_START, 10),
            photon_record(0, 0, 10),
            photon_record(0, 0, 60),
            marker_record(LINE_END, 110),
            marker_record(LINE_START, 160),
            photon_record(0, 0, 160),
            photon_record(0, 0, 210),
            marker_record(LINE_END, 260),
            marker_record(FRAME, 400),
            marker_record(LINE_START, 410),
            photon_record(0, 0, 410),
            photon_record(0, 0, 460),
            marker_record(LINE_END, 510),
            marker_record(LINE_START, 560),
            photon_record(0, 0, 560),
            photon_record(0, 0, 610),
            marker_record(LINE_END, 660),
        ];
        write_fifo_file(file.path(), &records);

        let config = PipelineConfig { n_z: 1, frame_binning: 1, ..PipelineConfig::default() };
        let output: PipelineOutput<u16> = build_cube_from_file(file.path(), &config).unwrap();

        assert_eq!(output.calibration.n_x, 2);
        assert_eq!(output.calibration.n_y, 2);
        assert_eq!(output.cube.total_count(), 8);
    }
}
