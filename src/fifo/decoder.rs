//! Turns raw records into a typed [`FifoEvent`] stream with monotonically
//! reconstructed macro-time.

use crate::error::Result;
use crate::fifo::format::RecordFormat;
use crate::fifo::source::EventSource;
use crate::types::{EventKind, FifoEvent};

/// Stateful decoder sitting directly on top of an [`EventSource`].
///
/// Holds the one piece of state the decode step needs across records: the
/// accumulated overflow base added to every subsequent `nsync` field. This
/// makes `macro_time` monotone non-decreasing across overflow wraps without
/// the caller having to track anything.
pub struct EventDecoder {
    format: RecordFormat,
    overflow_base: u64,
}

impl EventDecoder {
    #[must_use]
    pub fn new(format: RecordFormat) -> Self {
        Self { format, overflow_base: 0 }
    }

    /// Reset decode state, e.g. after rewinding the underlying source with
    /// [`EventSource::set_to_start`].
    pub fn reset(&mut self) {
        self.overflow_base = 0;
    }

    /// Decode the next record from `source`.
    ///
    /// Invalid events (currently only [`EventKind::Overflow`]) are still
    /// returned rather than skipped, so callers that track stream position
    /// alongside decoded events see every record; filtering is the caller's
    /// job.
    pub fn next_event(&mut self, source: &mut dyn EventSource) -> Result<FifoEvent> {
        let raw = source.next_raw()?;
        let fields = self.format.split(raw);

        if fields.special {
            if fields.dtime == 0 {
                self.overflow_base += self.format.overflow_increment;
                return Ok(FifoEvent {
                    valid: false,
                    kind: EventKind::Overflow,
                    macro_time: self.overflow_base,
                    micro_time: 0,
                    channel: 0,
                    mark: 0,
                });
            }

            let mark = (fields.dtime & 0b1111) as u8;
            return Ok(FifoEvent {
                valid: true,
                kind: EventKind::Marker,
                macro_time: self.overflow_base + u64::from(fields.nsync),
                micro_time: 0,
                channel: 0,
                mark,
            });
        }

        Ok(FifoEvent {
            valid: true,
            kind: EventKind::Photon,
            macro_time: self.overflow_base + u64::from(fields.nsync),
            micro_time: fields.dtime as u16,
            channel: fields.channel as u8,
            mark: 0,
        })
    }
}
