//! Maps each photon event in a frame to a pixel coordinate using the
//! calibrated sync counts.

use crate::calibration::SyncCalibration;
use crate::types::{EventKind, FifoEvent, MarkerMask, Photon};

/// Bidirectional-scan detection tolerance against the ratio
/// `counts_interline / count_per_line`. There's no exact constant for
/// "close to 1" to draw on; a 15% relative band catches the
/// flyback-corrected ratios real scanners produce without mistaking a
/// genuinely unidirectional raster for a bidirectional one.
const BIDIRECTIONAL_RATIO_TOLERANCE: f64 = 0.15;

/// Lazy, stateful traversal of one frame's events.
///
/// Walks `ly` (current line index) and `t_line` (current line's start time)
/// forward as line-start markers are encountered, and turns each photon
/// encountered while a line is active into a [`Photon`] in pixel space.
/// Every photon produced is stamped with the `frame`/`z` the caller supplies
/// at construction — [`PhotonMapper`] itself has no notion of frame
/// counting or z-stacking policy, which is the [`crate::cube::builder::CubeBuilder`]'s
/// job.
pub struct PhotonMapper<'a> {
    events: &'a [FifoEvent],
    pos: usize,
    calibration: SyncCalibration,
    marker_mask: MarkerMask,
    bidirectional: bool,
    frame: u32,
    z: u16,
    ly: Option<u32>,
    line_counter: u32,
    t_line: u64,
}

impl<'a> PhotonMapper<'a> {
    #[must_use]
    pub fn new(
        events: &'a [FifoEvent],
        calibration: SyncCalibration,
        marker_mask: MarkerMask,
        frame: u32,
        z: u16,
    ) -> Self {
        let ratio = calibration.counts_interline / calibration.count_per_line;
        let bidirectional =
            marker_mask.pixel == 0 && (ratio - 1.0).abs() <= BIDIRECTIONAL_RATIO_TOLERANCE;

        Self {
            events,
            pos: 0,
            calibration,
            marker_mask,
            bidirectional,
            frame,
            z,
            ly: None,
            line_counter: 0,
            t_line: 0,
        }
    }

    /// Pull the next in-grid photon, advancing past any markers and
    /// out-of-range photons along the way. Returns `None` once the frame's
    /// events are exhausted.
    pub fn next_photon(&mut self) -> Option<Photon> {
        while self.pos < self.events.len() {
            let event = self.events[self.pos];
            self.pos += 1;

            match event.kind {
                EventKind::Marker if self.marker_mask.is_line_start(event.mark) => {
                    let line_averaging = self.calibration.line_averaging.max(1);
                    self.ly = Some(self.line_counter / line_averaging);
                    self.line_counter += 1;
                    self.t_line = event.macro_time;
                }
                EventKind::Photon => {
                    if let Some(photon) = self.map_photon(&event) {
                        return Some(photon);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn map_photon(&self, event: &FifoEvent) -> Option<Photon> {
        let ly = self.ly?;
        if ly as usize >= self.calibration.n_y as usize {
            return None;
        }

        let dt = event.macro_time.saturating_sub(self.t_line) as f64;
        let u = dt / self.calibration.count_per_line;
        let lx_f = (u * f64::from(self.calibration.n_x)).floor();
        if lx_f < 0.0 {
            return None;
        }

        let n_x = i64::from(self.calibration.n_x);
        let mut lx = lx_f as i64;
        if self.bidirectional && ly % 2 == 1 {
            lx = n_x - 1 - lx;
        }

        if lx < 0 || lx >= n_x {
            return None;
        }

        Some(Photon {
            frame: self.frame,
            z: self.z,
            y: ly as u16,
            x: lx as u16,
            channel: event.channel,
            micro_time: event.micro_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: u8 = 0b0001;
    const LINE_START: u8 = 0b0010;
    const LINE_END: u8 = 0b0100;
    const FRAME_MARK: u8 = 0b1000;

    fn calibration(count_per_line: f64, counts_interline: f64, n_x: u32, n_y: u32, line_averaging: u32) -> SyncCalibration {
        SyncCalibration {
            count_per_line,
            counts_interline,
            counts_interframe: 0.0,
            n_x,
            n_y,
            n_line: n_y * line_averaging,
            n_frame: 1,
            has_initial_frame_marker: true,
            line_averaging,
        }
    }

    fn line_start(t: u64) -> FifoEvent {
        FifoEvent { valid: true, kind: EventKind::Marker, macro_time: t, micro_time: 0, channel: 0, mark: LINE_START }
    }

    fn line_end(t: u64) -> FifoEvent {
        FifoEvent { valid: true, kind: EventKind::Marker, macro_time: t, micro_time: 0, channel: 0, mark: LINE_END }
    }

    fn photon(t: u64, micro_time: u16, channel: u8) -> FifoEvent {
        FifoEvent { valid: true, kind: EventKind::Photon, macro_time: t, micro_time, channel, mark: 0 }
    }

    #[test]
    fn maps_diagonal_2x2_grid() {
        let calib = calibration(100.0, 150.0, 2, 2, 1);
        let mask = MarkerMask::new(PIXEL, LINE_START, LINE_END, FRAME_MARK);
        let events = vec![
            line_start(0),
            photon(0, 0, 0),
            photon(50, 250, 0),
            line_end(100),
            line_start(150),
            photon(150, 500, 0),
            photon(200, 750, 0),
            line_end(250),
        ];
        let mut mapper = PhotonMapper::new(&events, calib, mask, 0, 0);
        let mut pixels = Vec::new();
        while let Some(p) = mapper.next_photon() {
            pixels.push((p.y, p.x));
        }
        assert_eq!(pixels, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn line_averaging_collapses_pairs_of_lines_to_one_row() {
        let calib = calibration(100.0, 150.0, 2, 2, 2);
        let mask = MarkerMask::new(PIXEL, LINE_START, LINE_END, FRAME_MARK);
        let events = vec![
            line_start(0),
            photon(0, 0, 0),
            line_end(100),
            line_start(150),
            photon(150, 0, 0),
            line_end(250),
            line_start(400),
            photon(400, 0, 0),
            line_end(500),
            line_start(550),
            photon(550, 0, 0),
            line_end(650),
        ];
        let mut mapper = PhotonMapper::new(&events, calib, mask, 0, 0);
        let mut rows = Vec::new();
        while let Some(p) = mapper.next_photon() {
            rows.push(p.y);
        }
        assert_eq!(rows, vec![0, 0, 1, 1]);
    }

    #[test]
    fn bidirectional_scan_mirrors_odd_lines() {
        // counts_interline == count_per_line triggers the bidirectional path.
        let calib = calibration(100.0, 100.0, 4, 2, 1);
        let mask = MarkerMask::new(0, LINE_START, LINE_END, FRAME_MARK);
        let events = vec![
            line_start(0),
            photon(50, 0, 0), // u = 0.5, lx = 2
            line_end(100),
            line_start(150),
            photon(200, 0, 0), // u = 0.5, lx = 2, mirrored -> 1
            line_end(250),
        ];
        let mut mapper = PhotonMapper::new(&events, calib, mask, 0, 0);
        let first = mapper.next_photon().unwrap();
        assert_eq!((first.y, first.x), (0, 2));
        let second = mapper.next_photon().unwrap();
        assert_eq!((second.y, second.x), (1, 1));
    }

    #[test]
    fn drops_photons_before_any_line_start() {
        let calib = calibration(100.0, 150.0, 2, 2, 1);
        let mask = MarkerMask::new(PIXEL, LINE_START, LINE_END, FRAME_MARK);
        let events = vec![photon(0, 0, 0)];
        let mut mapper = PhotonMapper::new(&events, calib, mask, 0, 0);
        assert!(mapper.next_photon().is_none());
    }
}
