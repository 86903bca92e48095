use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Sensor, TimeUnits};
use crate::error::{DvsError, DvsResult};
use crate::postprocess::validate_ksize;

pub const MAX_FRAME_RATE: u32 = 120;

/// Tuning for [`DecayPipeline`](crate::pipeline::DecayPipeline).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub sensor: Sensor,
    /// Output frames per second, `1..=120`.
    pub frame_rate: u32,
    /// Fraction of intensity lost per frame interval, strictly between 0 and 1.
    pub decay_rate: f64,
    pub colorizer_workers: usize,
    /// Row pool size; rayon picks when unset.
    pub raster_threads: Option<usize>,
    pub raster_dispatchers: usize,
    /// Column phases each scanline is split into.
    pub interlace: u32,
    /// Frame buffers in flight; `3 * frame_rate` when unset.
    pub pool_capacity: Option<usize>,
    /// Depth of every inter-stage queue; `3 * frame_rate` when unset.
    pub queue_depth: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sensor: Sensor::DAVIS346,
            frame_rate: 60,
            decay_rate: 0.15,
            colorizer_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            raster_threads: None,
            raster_dispatchers: 2,
            interlace: 1,
            pool_capacity: None,
            queue_depth: None,
        }
    }
}

impl PipelineConfig {
    /// Time units between frame boundaries.
    pub fn frame_interval(&self) -> TimeUnits {
        1_000_000 / TimeUnits::from(self.frame_rate.max(1))
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
            .unwrap_or(3 * self.frame_rate as usize)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(3 * self.frame_rate as usize)
    }

    pub fn validate(&self) -> DvsResult<()> {
        Sensor::new(self.sensor.width, self.sensor.height)?;
        if !(1..=MAX_FRAME_RATE).contains(&self.frame_rate) {
            return Err(DvsError::validation(format!(
                "frame rate must be in 1..={MAX_FRAME_RATE}, got {}",
                self.frame_rate
            )));
        }
        if !(self.decay_rate > 0.0 && self.decay_rate < 1.0) {
            return Err(DvsError::validation(format!(
                "decay rate must be strictly between 0 and 1, got {}",
                self.decay_rate
            )));
        }
        if self.colorizer_workers == 0 {
            return Err(DvsError::validation("colorizer workers must be >= 1"));
        }
        if self.raster_threads == Some(0) {
            return Err(DvsError::validation("raster threads must be >= 1 when set"));
        }
        if self.raster_dispatchers == 0 {
            return Err(DvsError::validation("raster dispatchers must be >= 1"));
        }
        if self.interlace == 0 || self.interlace > self.sensor.width {
            return Err(DvsError::validation(format!(
                "interlace must be in 1..={}, got {}",
                self.sensor.width, self.interlace
            )));
        }
        if self.pool_capacity() == 0 {
            return Err(DvsError::validation("frame pool capacity must be >= 1"));
        }
        if self.queue_depth() == 0 {
            return Err(DvsError::validation("queue depth must be >= 1"));
        }
        Ok(())
    }
}

/// Encoded video geometry and denoising.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Encoded width; height follows the sensor aspect ratio.
    pub width: u32,
    /// Median window edge, odd.
    pub median_blur: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 600,
            median_blur: 5,
        }
    }
}

impl OutputConfig {
    pub fn validate(&self) -> DvsResult<()> {
        if self.width < 2 || !self.width.is_multiple_of(2) {
            return Err(DvsError::validation(format!(
                "output width must be even and >= 2, got {}",
                self.width
            )));
        }
        validate_ksize(self.median_blur)
    }
}

/// Everything a run can be configured with from a file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
}

impl RunConfig {
    pub fn from_json_str(s: &str) -> DvsResult<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| DvsError::validation(format!("invalid config json: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: &Path) -> DvsResult<Self> {
        use anyhow::Context as _;
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        Self::from_json_str(&s)
    }

    pub fn validate(&self) -> DvsResult<()> {
        self.pipeline.validate()?;
        self.output.validate()
    }
}
