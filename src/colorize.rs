use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::core::{FrameIndex, Rgb8, Sensor};
use crate::error::{DvsError, DvsResult};
use crate::frame::{Frame, PooledFrame};
use crate::tables::LookupTables;

/// A frame whose pixels have been mapped onto the shared color ramp.
///
/// Cells are indices into the [`ColorTable`](crate::tables::ColorTable) held by `tables`; color
/// data is never copied per pixel.
#[derive(Clone, Debug)]
pub struct ColoredFrame {
    pub index: FrameIndex,
    sensor: Sensor,
    tables: Arc<LookupTables>,
    cells: Vec<u16>,
}

impl ColoredFrame {
    pub fn sensor(&self) -> Sensor {
        self.sensor
    }

    pub fn tables(&self) -> &LookupTables {
        &self.tables
    }

    pub fn color_index_at(&self, x: u32, y: u32) -> u16 {
        self.cells[self.sensor.offset(x, y)]
    }

    pub fn color_at(&self, x: u32, y: u32) -> &Rgb8 {
        self.tables.colors().color(self.color_index_at(x, y))
    }

    /// Color indices of scanline `y`.
    pub fn row(&self, y: u32) -> &[u16] {
        let w = self.sensor.width as usize;
        let start = y as usize * w;
        &self.cells[start..start + w]
    }
}

/// Map every pixel of `frame` to its decayed color.
pub fn colorize(frame: &Frame, tables: &Arc<LookupTables>) -> ColoredFrame {
    debug_assert_eq!(frame.interval, tables.frame_interval());
    let boundary = frame.boundary;
    let cells = frame
        .last_event()
        .iter()
        .map(|&t| tables.color_index(boundary, t))
        .collect();
    ColoredFrame {
        index: frame.index,
        sensor: frame.sensor(),
        tables: Arc::clone(tables),
        cells,
    }
}

/// Colorizer worker loop.
///
/// Runs until `frames` is drained and disconnected. Each pooled buffer goes back to the pool as
/// soon as it has been read, before the colored result is queued.
pub(crate) fn run_colorizer(
    worker: usize,
    frames: Receiver<PooledFrame>,
    out: Sender<ColoredFrame>,
    tables: Arc<LookupTables>,
) -> DvsResult<u64> {
    tracing::debug!(worker, "colorizer started");
    let mut done = 0u64;
    for pooled in frames.iter() {
        let colored = colorize(&pooled, &tables);
        drop(pooled);
        out.send(colored).map_err(|_| DvsError::hangup("colorizer"))?;
        done += 1;
    }
    tracing::debug!(worker, frames = done, "colorizer drained");
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePool;

    fn tables() -> Arc<LookupTables> {
        Arc::new(LookupTables::new(100, 0.5).unwrap())
    }

    #[test]
    fn untouched_pixels_are_background() {
        let lt = tables();
        let mut f = Frame::new(Sensor::new(4, 2).unwrap(), 100);
        f.boundary = 1_000;
        let c = colorize(&f, &lt);
        for y in 0..2 {
            assert!(c.row(y).iter().all(|i| *i == 0));
        }
        assert_eq!(*c.color_at(0, 0), lt.colors().background());
    }

    #[test]
    fn recent_pixels_take_ramp_colors() {
        let lt = tables();
        let mut f = Frame::new(Sensor::new(4, 2).unwrap(), 100);
        f.mark(2, 1, 500.0, 950);
        f.mark(3, 1, 500.0, 0);
        f.boundary = 1_000;
        f.index = FrameIndex(9);

        let c = colorize(&f, &lt);
        assert_eq!(c.index, FrameIndex(9));
        assert_eq!(c.color_index_at(2, 1), 500);
        assert_eq!(c.color_index_at(3, 1), lt.color_index(1_000, 0));
        assert_eq!(c.color_at(2, 1), lt.colors().color(500));
    }

    #[test]
    fn worker_releases_frames_and_drains() {
        let lt = tables();
        let sensor = Sensor::new(4, 2).unwrap();
        let pool = FramePool::new(2, sensor, 100).unwrap();
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(2);
        let (out_tx, out_rx) = crossbeam_channel::bounded(4);

        for i in 0..2u64 {
            let mut f = pool.acquire().unwrap();
            f.index = FrameIndex(i);
            f.boundary = 100 * (i as i64 + 1);
            frame_tx.send(f).unwrap();
        }
        drop(frame_tx);
        assert_eq!(pool.available(), 0);

        let n = run_colorizer(0, frame_rx, out_tx, lt).unwrap();
        assert_eq!(n, 2);
        assert_eq!(pool.available(), 2);
        let got: Vec<_> = out_rx.iter().map(|c| c.index.0).collect();
        assert_eq!(got, vec![0, 1]);
    }

    #[test]
    fn worker_reports_hangup_when_output_is_gone() {
        let lt = tables();
        let sensor = Sensor::new(4, 2).unwrap();
        let pool = FramePool::new(1, sensor, 100).unwrap();
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(1);
        let (out_tx, out_rx) = crossbeam_channel::bounded(1);
        drop(out_rx);

        frame_tx.send(pool.acquire().unwrap()).unwrap();
        drop(frame_tx);
        let err = run_colorizer(0, frame_rx, out_tx, lt).unwrap_err();
        assert!(err.is_hangup());
        assert_eq!(pool.available(), 1);
    }
}
