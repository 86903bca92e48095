use crate::core::{FrameIndex, Sensor, TimeUnits};
use crate::error::{DvsError, DvsResult};
use crate::event::Event;
use crate::frame::Frame;
use crate::tables::PEAK_INTENSITY;

/// Single-threaded integrator that turns the event stream into closed frames.
///
/// The live grids are never cleared; each closed frame is a snapshot of the running state at its
/// boundary, so decay continues smoothly across frames.
#[derive(Debug)]
pub struct FrameAccumulator {
    live: Frame,
    interval: TimeUnits,
    next_boundary: Option<TimeUnits>,
    next_index: FrameIndex,
    events_seen: u64,
    qualifying_events: u64,
    events_since_close: u64,
}

/// Totals reported once the input stream is exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccumulatorSummary {
    pub events_seen: u64,
    pub qualifying_events: u64,
    pub frames_closed: u64,
    /// Events that landed after the last boundary and were never emitted.
    pub unflushed_events: u64,
}

impl FrameAccumulator {
    pub fn new(sensor: Sensor, interval: TimeUnits) -> DvsResult<Self> {
        if interval <= 0 {
            return Err(DvsError::validation("frame interval must be > 0"));
        }
        Ok(Self {
            live: Frame::new(sensor, interval),
            interval,
            next_boundary: None,
            next_index: FrameIndex(0),
            events_seen: 0,
            qualifying_events: 0,
            events_since_close: 0,
        })
    }

    /// The boundary the live frame will close at, once the first event has been seen.
    pub fn next_boundary(&self) -> Option<TimeUnits> {
        self.next_boundary
    }

    pub fn live(&self) -> &Frame {
        &self.live
    }

    /// Integrate one event.
    ///
    /// Every boundary at or before `event.timestamp` closes a frame first; `close` receives the
    /// live state stamped with the frame index and boundary and must copy what it needs. The
    /// first event anchors the boundary grid one interval after its timestamp.
    pub fn push<F>(&mut self, event: &Event, mut close: F) -> DvsResult<()>
    where
        F: FnMut(&Frame) -> DvsResult<()>,
    {
        let sensor = self.live.sensor();
        if !sensor.contains(event.x, event.y) {
            return Err(DvsError::validation(format!(
                "event at ({}, {}) is outside the {}x{} sensor",
                event.x, event.y, sensor.width, sensor.height
            )));
        }

        let mut boundary = match self.next_boundary {
            Some(b) => b,
            None => {
                let b = advance(event.timestamp, self.interval)?;
                self.next_boundary = Some(b);
                b
            }
        };

        while event.timestamp >= boundary {
            self.live.index = self.next_index;
            self.live.boundary = boundary;
            close(&self.live)?;
            tracing::trace!(index = self.next_index.0, boundary, "frame closed");

            self.next_index = self.next_index.next();
            self.events_since_close = 0;
            boundary = advance(boundary, self.interval)?;
            self.next_boundary = Some(boundary);
        }

        self.events_seen += 1;
        self.events_since_close += 1;
        if event.polarity.is_qualifying() {
            self.qualifying_events += 1;
            self.live.mark(event.x, event.y, PEAK_INTENSITY, event.timestamp);
        }
        Ok(())
    }

    /// End of stream. Whatever accumulated after the last boundary is dropped.
    pub fn finish(self) -> AccumulatorSummary {
        AccumulatorSummary {
            events_seen: self.events_seen,
            qualifying_events: self.qualifying_events,
            frames_closed: self.next_index.0,
            unflushed_events: self.events_since_close,
        }
    }
}

fn advance(boundary: TimeUnits, interval: TimeUnits) -> DvsResult<TimeUnits> {
    boundary.checked_add(interval).ok_or_else(|| {
        DvsError::validation(format!(
            "timestamp out of range: no frame boundary after {boundary}"
        ))
    })
}
