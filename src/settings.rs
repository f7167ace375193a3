//! Small pieces of acquisition configuration that live outside the FIFO file
//! itself: a sidecar shift-calibration file sitting next to the data, and
//! the rules for turning a user's requested channel list into one this
//! crate's [`crate::cube::builder::CubeBuilder`] can act on.

use std::fs;
use std::path::{Path, PathBuf};

/// Per-channel time shifts, in picoseconds, read from a
/// `PicoquantLoaderSettings.info` file next to the data file, if one exists.
///
/// The upstream acquisition tooling writes this as a `boost::property_tree`
/// INFO file with a `shifts` section; all this crate ever reads back out of
/// it is `shifts.1`..`shifts.4`, so the parser below only understands
/// flat `key = value` lines, not INFO's nested-section syntax in general.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SidecarShifts {
    pub shifts_ps: [f64; 4],
}

const SIDECAR_FILE_NAME: &str = "PicoquantLoaderSettings.info";

impl SidecarShifts {
    /// Look for `PicoquantLoaderSettings.info` next to `data_path` and parse
    /// it if present. Returns the all-zero default when the file is absent;
    /// a sidecar file is an optional refinement, not a requirement.
    #[must_use]
    pub fn load_next_to(data_path: &Path) -> Self {
        let sidecar_path = sidecar_path(data_path);
        match fs::read_to_string(&sidecar_path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => Self::default(),
        }
    }

    /// Parse the handful of `shifts.N = value` lines this crate cares about
    /// out of an INFO-style document, ignoring everything else (sections,
    /// comments, unrecognised keys).
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let mut shifts_ps = [0.0f64; 4];
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else { continue };
            let key = key.trim();
            let Some(index) = shift_index(key) else { continue };
            if let Ok(parsed) = value.trim().parse::<f64>() {
                shifts_ps[index] = parsed;
            }
        }
        Self { shifts_ps }
    }
}

fn sidecar_path(data_path: &Path) -> PathBuf {
    let parent = data_path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(SIDECAR_FILE_NAME)
}

fn shift_index(key: &str) -> Option<usize> {
    match key {
        "shifts.1" => Some(0),
        "shifts.2" => Some(1),
        "shifts.3" => Some(2),
        "shifts.4" => Some(3),
        _ => None,
    }
}

/// Resolves a user-requested channel list against the number of channels the
/// acquisition actually has.
///
/// An empty request means "all channels". Requested channels beyond the
/// detected count are dropped rather than rejected, since a channel list
/// copied from a different acquisition shouldn't fail the whole run.
/// `n_chan_stride` is widened (never narrowed) to fit the resulting
/// selection, mirroring how the stride is only ever a lower bound on how
/// many channels the caller's buffers must hold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSelection {
    pub channels: Vec<u32>,
    pub n_chan_stride: u32,
}

impl ChannelSelection {
    /// `requested` is the user's channel list, possibly empty.
    /// `n_chan_detected` is how many channels the hardware/header reports.
    /// `n_chan_stride` is the caller's current idea of the stride, or `0` to
    /// mean "not yet fixed".
    #[must_use]
    pub fn validate(requested: &[u32], n_chan_detected: u32, mut n_chan_stride: u32) -> Self {
        let channels: Vec<u32> = if requested.is_empty() {
            (0..n_chan_detected).collect()
        } else {
            requested.iter().copied().filter(|&c| c < n_chan_detected).collect()
        };

        if n_chan_stride < channels.len() as u32 {
            n_chan_stride = channels.len() as u32;
        }

        Self { channels, n_chan_stride }
    }

    /// A dense `channel_mask` indexed by raw detector channel, suitable for
    /// [`crate::cube::builder::CubeBuilderConfig::channel_mask`].
    #[must_use]
    pub fn to_channel_mask(&self, n_chan_detected: u32) -> Vec<bool> {
        let mut mask = vec![false; n_chan_detected as usize];
        for &c in &self.channels {
            if let Some(slot) = mask.get_mut(c as usize) {
                *slot = true;
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognised_shift_keys_and_ignores_the_rest() {
        let contents = "\
shifts\n\
{\n\
  1 = 12.5\n\
  shifts.1 = 12.5\n\
  shifts.2 = -3\n\
  shifts.4 = 0.25\n\
  unrelated.key = 99\n\
}\n";
        let parsed = SidecarShifts::parse(contents);
        assert_eq!(parsed.shifts_ps, [12.5, -3.0, 0.0, 0.25]);
    }

    #[test]
    fn missing_sidecar_file_yields_zero_shifts() {
        let parsed = SidecarShifts::load_next_to(Path::new("/nonexistent/path/data.pt3"));
        assert_eq!(parsed.shifts_ps, [0.0; 4]);
    }

    #[test]
    fn empty_channel_request_selects_all_channels() {
        let selection = ChannelSelection::validate(&[], 3, 0);
        assert_eq!(selection.channels, vec![0, 1, 2]);
        assert_eq!(selection.n_chan_stride, 3);
    }

    #[test]
    fn out_of_range_requested_channels_are_dropped() {
        let selection = ChannelSelection::validate(&[0, 5, 2], 3, 0);
        assert_eq!(selection.channels, vec![0, 2]);
        assert_eq!(selection.n_chan_stride, 2);
    }

    #[test]
    fn stride_is_widened_but_never_narrowed() {
        let selection = ChannelSelection::validate(&[0], 3, 4);
        assert_eq!(selection.n_chan_stride, 4);
    }

    #[test]
    fn channel_mask_marks_only_selected_channels() {
        let selection = ChannelSelection::validate(&[0, 2], 3, 0);
        assert_eq!(selection.to_channel_mask(3), vec![true, false, true]);
    }
}
