use crossbeam_channel::{Receiver, Sender};

use crate::colorize::ColoredFrame;
use crate::core::FrameIndex;
use crate::error::{DvsError, DvsResult};
use crate::gather::Gather;

/// A fully materialized frame, tightly packed row-major RGB8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    pub index: FrameIndex,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Raster {
    /// RGB bytes of pixel `(x, y)`. Panics outside the raster.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Scanline-parallel expansion of [`ColoredFrame`]s into [`Raster`]s.
///
/// Every scanline is one unit of work on the rayon pool and writes straight into its own row of
/// the output buffer, walking the `interlace` column phases (`x ≡ phase mod interlace`) in turn.
/// [`Rasterizer::rasterize`] submits all rows and blocks on a [`Gather`] until each has reported.
#[derive(Debug)]
pub struct Rasterizer {
    pool: rayon::ThreadPool,
    interlace: u32,
}

impl Rasterizer {
    /// Create a rasterizer with its own rayon pool. `None` lets rayon pick the thread count.
    pub fn new(threads: Option<usize>, interlace: u32) -> DvsResult<Self> {
        if interlace == 0 {
            return Err(DvsError::validation("interlace must be >= 1"));
        }
        Ok(Self {
            pool: build_thread_pool(threads)?,
            interlace,
        })
    }

    /// Worker threads in the row pool.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Column phases per scanline.
    pub fn interlace(&self) -> u32 {
        self.interlace
    }

    /// Expand `colored` into RGB, one pool task per scanline.
    ///
    /// Fails if the interlace factor is wider than the frame.
    pub fn rasterize(&self, colored: &ColoredFrame) -> DvsResult<Raster> {
        let sensor = colored.sensor();
        let (w, h) = (sensor.width as usize, sensor.height as usize);
        let k = self.interlace as usize;
        if k > w {
            return Err(DvsError::validation(format!(
                "interlace {k} exceeds raster width {w}"
            )));
        }

        let stride = w * 3;
        let mut data = vec![0u8; stride * h];
        let gather = Gather::<()>::new(h);
        self.pool.in_place_scope(|s| {
            for (y, row) in data.chunks_mut(stride).enumerate() {
                let gather = &gather;
                s.spawn(move |_| {
                    render_row(colored, y as u32, row, k);
                    gather.complete(y, ());
                });
            }
            gather.wait();
        });

        Ok(Raster {
            index: colored.index,
            width: sensor.width,
            height: sensor.height,
            data,
        })
    }
}

/// Fill scanline `y` in place, one column phase (`x ≡ phase mod interlace`) at a time.
fn render_row(colored: &ColoredFrame, y: u32, out: &mut [u8], interlace: usize) {
    let colors = colored.tables().colors();
    let row = colored.row(y);
    for phase in 0..interlace {
        for x in (phase..row.len()).step_by(interlace) {
            out[x * 3..x * 3 + 3].copy_from_slice(&colors.color(row[x]).to_array());
        }
    }
}

/// Raster dispatcher loop: one colored frame at a time, rows fanned out to the pool.
pub(crate) fn run_dispatcher(
    id: usize,
    rasterizer: &Rasterizer,
    colored: Receiver<ColoredFrame>,
    out: Sender<Raster>,
) -> DvsResult<u64> {
    tracing::debug!(dispatcher = id, "raster dispatcher started");
    let mut done = 0u64;
    for frame in colored.iter() {
        let raster = rasterizer.rasterize(&frame)?;
        out.send(raster)
            .map_err(|_| DvsError::hangup("raster dispatcher"))?;
        done += 1;
    }
    tracing::debug!(dispatcher = id, frames = done, "raster dispatcher drained");
    Ok(done)
}

fn build_thread_pool(threads: Option<usize>) -> DvsResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(DvsError::validation(
            "raster threads must be >= 1 when set",
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new()
        .thread_name(|i| format!("dvs-raster-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| DvsError::pipeline(format!("failed to build rayon thread pool: {e}")))
}
