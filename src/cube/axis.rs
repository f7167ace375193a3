//! The native and downsampled time axis of a cube.

use crate::error::{CubeError, Result};

/// `native_timepoints[i] = i * time_resolution_native_ps` for
/// `i in [0, n_native_bins)`, plus whatever downsampling shift is currently
/// applied.
///
/// Downsampling is always computed from the native axis using the *total*
/// shift accumulated so far, rather than by re-binning an already-binned
/// axis. That is what makes [`TimeAxis::with_downsampling`] composable:
/// `axis.with_downsampling(s1)?.with_downsampling(s2)?` and
/// `axis.with_downsampling(s1 + s2)?` both recompute from the same native
/// base with total shift `s1 + s2`, so they agree exactly. The outer bin
/// count is always the one this type reports — there's no inner-scope
/// shadow copy for a caller to accidentally read a stale value from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeAxis {
    n_native_bins: u32,
    time_resolution_native_ps: u64,
    /// Laser repetition period in picoseconds, or `0` if none is known.
    t_rep_ps: u64,
    shift: u32,
    n_t: u32,
}

impl TimeAxis {
    /// Construct the native (unshifted) axis. Fails the same way
    /// [`TimeAxis::with_downsampling`] would if the native bin count itself
    /// is somehow zero.
    pub fn new(n_native_bins: u32, time_resolution_native_ps: u64, t_rep_ps: u64) -> Result<Self> {
        Self::at_shift(n_native_bins, time_resolution_native_ps, t_rep_ps, 0)
    }

    fn at_shift(
        n_native_bins: u32,
        time_resolution_native_ps: u64,
        t_rep_ps: u64,
        shift: u32,
    ) -> Result<Self> {
        let n_t = Self::compute_n_t(n_native_bins, time_resolution_native_ps, t_rep_ps, shift);
        if n_t == 0 {
            return Err(CubeError::InvalidDownsampling { shift });
        }
        Ok(Self { n_native_bins, time_resolution_native_ps, t_rep_ps, shift, n_t })
    }

    fn compute_n_t(n_native_bins: u32, time_resolution_native_ps: u64, t_rep_ps: u64, shift: u32) -> u32 {
        let by_native = n_native_bins >> shift;
        if t_rep_ps == 0 {
            return by_native;
        }
        let resunit_ps = time_resolution_native_ps << shift;
        if resunit_ps == 0 {
            return 0;
        }
        let by_repetition = (t_rep_ps / resunit_ps) as u32;
        by_native.min(by_repetition)
    }

    /// Apply an *additional* downsampling shift on top of whatever is
    /// already applied, recomputed from the native axis so repeated calls
    /// compose.
    pub fn with_downsampling(&self, additional_shift: u32) -> Result<Self> {
        Self::at_shift(
            self.n_native_bins,
            self.time_resolution_native_ps,
            self.t_rep_ps,
            self.shift + additional_shift,
        )
    }

    #[must_use]
    pub fn shift(&self) -> u32 {
        self.shift
    }

    #[must_use]
    pub fn n_t(&self) -> u32 {
        self.n_t
    }

    #[must_use]
    pub fn time_resolution_resunit_ps(&self) -> u64 {
        self.time_resolution_native_ps << self.shift
    }

    /// `t_rep_resunit`: the laser repetition period expressed in the
    /// current (possibly downsampled) time-bin resolution, or `0` if no
    /// repetition period is set.
    #[must_use]
    pub fn t_rep_resunit(&self) -> u64 {
        if self.t_rep_ps == 0 {
            0
        } else {
            self.t_rep_ps / self.time_resolution_resunit_ps().max(1)
        }
    }

    /// The picosecond timestamp of each time bin at the current shift.
    #[must_use]
    pub fn timepoints_ps(&self) -> Vec<u64> {
        (0..u64::from(self.n_t))
            .map(|i| (i << self.shift) * self.time_resolution_native_ps)
            .collect()
    }
}

/// Per-channel integer time-shift offsets, in native time-resolution units,
/// applied modulo `t_rep_resunit` before histogramming.
#[derive(Clone, Debug, Default)]
pub struct TimeShifts {
    per_channel: Vec<i64>,
}

impl TimeShifts {
    #[must_use]
    pub fn new(per_channel: Vec<i64>) -> Self {
        Self { per_channel }
    }

    #[must_use]
    pub fn for_channel(&self, channel: usize) -> i64 {
        self.per_channel.get(channel).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsampling_past_repetition_matches_scenario() {
        let axis = TimeAxis::new(100_000, 1, 12_500).unwrap();
        let shifted = axis.with_downsampling(4).unwrap();
        assert_eq!(shifted.n_t(), 781);
    }

    #[test]
    fn downsampling_is_idempotent_under_composition() {
        let axis = TimeAxis::new(4096, 25, 0).unwrap();
        let composed = axis.with_downsampling(1).unwrap().with_downsampling(2).unwrap();
        let direct = axis.with_downsampling(3).unwrap();
        assert_eq!(composed, direct);
    }

    #[test]
    fn zero_bins_is_invalid_downsampling() {
        let axis = TimeAxis::new(4, 1, 0).unwrap();
        match axis.with_downsampling(4) {
            Err(CubeError::InvalidDownsampling { shift }) => assert_eq!(shift, 4),
            other => panic!("expected InvalidDownsampling, got {other:?}"),
        }
    }
}
