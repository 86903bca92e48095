use std::ops::{Deref, DerefMut};

use crossbeam_channel::{Receiver, Sender};

use crate::core::{FrameIndex, Sensor, TimeUnits};
use crate::error::{DvsError, DvsResult};

/// `last_event` value for pixels that never saw a qualifying event.
pub const NEVER: TimeUnits = TimeUnits::MIN;

/// Per-pixel accumulation state, snapshotted at every frame boundary.
///
/// Grids are row-major, `sensor.width * sensor.height` long.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub index: FrameIndex,
    pub boundary: TimeUnits,
    pub interval: TimeUnits,
    sensor: Sensor,
    intensity: Vec<f64>,
    last_event: Vec<TimeUnits>,
}

impl Frame {
    /// Create a frame with zero intensity and no event history.
    pub fn new(sensor: Sensor, interval: TimeUnits) -> Self {
        let n = sensor.pixel_count();
        Self {
            index: FrameIndex(0),
            boundary: 0,
            interval,
            sensor,
            intensity: vec![0.0; n],
            last_event: vec![NEVER; n],
        }
    }

    /// Grid dimensions this buffer was allocated for.
    pub fn sensor(&self) -> Sensor {
        self.sensor
    }

    /// Row-major intensity grid.
    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    /// Row-major timestamps of the last ON event per pixel, [`NEVER`] if none.
    pub fn last_event(&self) -> &[TimeUnits] {
        &self.last_event
    }

    /// Intensity of pixel `(x, y)`. Panics outside the sensor.
    pub fn intensity_at(&self, x: u32, y: u32) -> f64 {
        self.intensity[self.sensor.offset(x, y)]
    }

    pub fn last_event_at(&self, x: u32, y: u32) -> TimeUnits {
        self.last_event[self.sensor.offset(x, y)]
    }

    /// Zero-sized stand-in left behind when a pooled buffer goes home.
    fn detached() -> Self {
        Self {
            index: FrameIndex(0),
            boundary: 0,
            interval: 0,
            sensor: Sensor {
                width: 0,
                height: 0,
            },
            intensity: Vec::new(),
            last_event: Vec::new(),
        }
    }

    pub(crate) fn mark(&mut self, x: u32, y: u32, intensity: f64, timestamp: TimeUnits) {
        let i = self.sensor.offset(x, y);
        self.intensity[i] = intensity;
        self.last_event[i] = timestamp;
    }

    /// Overwrite this buffer with `src` without reallocating.
    pub fn copy_from(&mut self, src: &Frame) -> DvsResult<()> {
        if self.sensor != src.sensor {
            return Err(DvsError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                src.sensor.width, src.sensor.height, self.sensor.width, self.sensor.height
            )));
        }
        self.index = src.index;
        self.boundary = src.boundary;
        self.interval = src.interval;
        self.intensity.copy_from_slice(&src.intensity);
        self.last_event.copy_from_slice(&src.last_event);
        Ok(())
    }
}

/// Fixed-capacity free list of preallocated [`Frame`] buffers.
///
/// Checkout blocks while every buffer is in flight; this is what stalls ingestion when the
/// colorizers fall behind. Buffers come back when their [`PooledFrame`] is dropped.
#[derive(Clone)]
pub struct FramePool {
    free_tx: Sender<Frame>,
    free_rx: Receiver<Frame>,
    capacity: usize,
}

impl FramePool {
    /// Preallocate `capacity` frames of `sensor` size.
    pub fn new(capacity: usize, sensor: Sensor, interval: TimeUnits) -> DvsResult<Self> {
        if capacity == 0 {
            return Err(DvsError::validation("frame pool capacity must be >= 1"));
        }
        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity);
        for _ in 0..capacity {
            free_tx
                .send(Frame::new(sensor, interval))
                .map_err(|_| DvsError::pipeline("frame pool free list closed during setup"))?;
        }
        Ok(Self {
            free_tx,
            free_rx,
            capacity,
        })
    }

    /// Total buffers owned by the pool, checked out or not.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers currently sitting in the free list.
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Block until a buffer is free.
    pub fn acquire(&self) -> DvsResult<PooledFrame> {
        let frame = self
            .free_rx
            .recv()
            .map_err(|_| DvsError::pipeline("frame pool free list disconnected"))?;
        Ok(self.wrap(frame))
    }

    /// Block until a buffer is free or `cancel` disconnects, whichever happens first.
    pub fn acquire_or_cancel<T>(&self, cancel: &Receiver<T>) -> Option<PooledFrame> {
        crossbeam_channel::select! {
            recv(self.free_rx) -> frame => frame.ok().map(|f| self.wrap(f)),
            recv(cancel) -> _ => None,
        }
    }

    /// Take a free buffer if there is one, without blocking.
    pub fn try_acquire(&self) -> Option<PooledFrame> {
        self.free_rx.try_recv().ok().map(|f| self.wrap(f))
    }

    /// Hand a buffer back explicitly. Equivalent to dropping it.
    pub fn release(&self, frame: PooledFrame) {
        drop(frame);
    }

    fn wrap(&self, frame: Frame) -> PooledFrame {
        PooledFrame {
            frame,
            home: self.free_tx.clone(),
        }
    }
}

/// Exclusive checkout of a pool buffer. Returns itself to the pool on drop.
pub struct PooledFrame {
    frame: Frame,
    home: Sender<Frame>,
}

impl Deref for PooledFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        let frame = std::mem::replace(&mut self.frame, Frame::detached());
        // Cannot be full: at most `capacity` buffers exist.
        let _ = self.home.try_send(frame);
    }
}

impl std::fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFrame")
            .field("index", &self.index)
            .field("boundary", &self.boundary)
            .finish()
    }
}
