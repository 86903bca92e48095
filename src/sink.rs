use std::path::{Path, PathBuf};

use crate::core::FrameIndex;
use crate::error::{DvsError, DvsResult};
use crate::raster::Raster;

/// Configuration handed to a [`RasterSink`] before the first frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    /// Raster width in pixels (the sensor width).
    pub width: u32,
    /// Raster height in pixels (the sensor height).
    pub height: u32,
    /// Output frames per second.
    pub fps: u32,
}

/// Consumer of finished rasters.
///
/// Ordering contract: `push_frame` is called with indices `0, 1, 2, ...` with no gaps and no
/// repeats. `end` is called once after the last frame, and only if every frame was delivered.
pub trait RasterSink: Send {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> DvsResult<()>;
    /// Push one frame in strictly increasing order.
    fn push_frame(&mut self, idx: FrameIndex, raster: &Raster) -> DvsResult<()>;
    /// Called once after the last frame is pushed.
    fn end(&mut self) -> DvsResult<()>;
}

impl<S: RasterSink + ?Sized> RasterSink for &mut S {
    fn begin(&mut self, cfg: SinkConfig) -> DvsResult<()> {
        (**self).begin(cfg)
    }

    fn push_frame(&mut self, idx: FrameIndex, raster: &Raster) -> DvsResult<()> {
        (**self).push_frame(idx, raster)
    }

    fn end(&mut self) -> DvsResult<()> {
        (**self).end()
    }
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<Raster>,
    ended: bool,
}

impl InMemorySink {
    /// Create a new in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }

    /// Frames in the order they were delivered.
    pub fn frames(&self) -> &[Raster] {
        &self.frames
    }

    /// Consume the sink and return the collected frames.
    pub fn into_frames(self) -> Vec<Raster> {
        self.frames
    }

    /// Whether `end` was called since the last `begin`.
    pub fn ended(&self) -> bool {
        self.ended
    }
}

impl RasterSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> DvsResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        self.ended = false;
        Ok(())
    }

    fn push_frame(&mut self, _idx: FrameIndex, raster: &Raster) -> DvsResult<()> {
        self.frames.push(raster.clone());
        Ok(())
    }

    fn end(&mut self) -> DvsResult<()> {
        self.ended = true;
        Ok(())
    }
}

/// Keeps a single frame and discards the rest.
#[derive(Debug)]
pub struct FrameCaptureSink {
    target: FrameIndex,
    captured: Option<Raster>,
    seen: u64,
}

impl FrameCaptureSink {
    /// Create a sink that keeps only frame `target`.
    pub fn new(target: FrameIndex) -> Self {
        Self {
            target,
            captured: None,
            seen: 0,
        }
    }

    /// The captured frame, if the run reached it.
    pub fn captured(&self) -> Option<&Raster> {
        self.captured.as_ref()
    }

    /// Consume the sink and return the captured frame.
    pub fn into_captured(self) -> Option<Raster> {
        self.captured
    }

    /// Total frames delivered, captured or not.
    pub fn frames_seen(&self) -> u64 {
        self.seen
    }
}

impl RasterSink for FrameCaptureSink {
    fn begin(&mut self, _cfg: SinkConfig) -> DvsResult<()> {
        self.captured = None;
        self.seen = 0;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, raster: &Raster) -> DvsResult<()> {
        self.seen += 1;
        if idx == self.target {
            self.captured = Some(raster.clone());
        }
        Ok(())
    }

    fn end(&mut self) -> DvsResult<()> {
        Ok(())
    }
}

/// Forwards every frame to `primary` and every `every`-th frame to `mirror`.
pub struct TeeSink<P, M> {
    primary: P,
    mirror: M,
    every: u64,
}

impl<P: RasterSink, M: RasterSink> TeeSink<P, M> {
    /// Create a tee. `every` must be at least 1.
    pub fn new(primary: P, mirror: M, every: u64) -> DvsResult<Self> {
        if every == 0 {
            return Err(DvsError::validation("tee interval must be >= 1"));
        }
        Ok(Self {
            primary,
            mirror,
            every,
        })
    }

    /// Split back into `(primary, mirror)`.
    pub fn into_inner(self) -> (P, M) {
        (self.primary, self.mirror)
    }
}

impl<P: RasterSink, M: RasterSink> RasterSink for TeeSink<P, M> {
    fn begin(&mut self, cfg: SinkConfig) -> DvsResult<()> {
        self.primary.begin(cfg)?;
        self.mirror.begin(cfg)
    }

    fn push_frame(&mut self, idx: FrameIndex, raster: &Raster) -> DvsResult<()> {
        self.primary.push_frame(idx, raster)?;
        if idx.0.is_multiple_of(self.every) {
            self.mirror.push_frame(idx, raster)?;
        }
        Ok(())
    }

    fn end(&mut self) -> DvsResult<()> {
        self.primary.end()?;
        self.mirror.end()
    }
}

/// Writes each frame it receives as `<dir>/frame_<index>.png` at sensor resolution.
#[derive(Debug)]
pub struct PngSequenceSink {
    dir: PathBuf,
    written: u64,
}

impl PngSequenceSink {
    /// Create a sink writing into `dir`. The directory is created in `begin`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: 0,
        }
    }

    /// Where frame `idx` is written.
    pub fn frame_path(&self, idx: FrameIndex) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", idx.0))
    }

    /// PNGs written since the last `begin`.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl RasterSink for PngSequenceSink {
    fn begin(&mut self, _cfg: SinkConfig) -> DvsResult<()> {
        use anyhow::Context as _;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create preview directory '{}'", self.dir.display()))?;
        self.written = 0;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, raster: &Raster) -> DvsResult<()> {
        write_png(&self.frame_path(idx), raster)?;
        self.written += 1;
        Ok(())
    }

    fn end(&mut self) -> DvsResult<()> {
        tracing::debug!(dir = %self.dir.display(), frames = self.written, "png sequence written");
        Ok(())
    }
}

/// Save a raster as an RGB8 PNG, creating parent directories as needed.
pub fn write_png(path: &Path, raster: &Raster) -> DvsResult<()> {
    use anyhow::Context as _;
    crate::encode_ffmpeg::ensure_parent_dir(path)?;
    image::save_buffer_with_format(
        path,
        &raster.data,
        raster.width,
        raster.height,
        image::ColorType::Rgb8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("failed to write png '{}'", path.display()))?;
    Ok(())
}
