use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::config::OutputConfig;
use crate::core::FrameIndex;
use crate::error::{DvsError, DvsResult};
use crate::postprocess::{median_blur_rgb8, resize_rgb8, scaled_height, validate_ksize};
use crate::raster::Raster;
use crate::sink::{RasterSink, SinkConfig};

/// Options for [`FfmpegSink`] MP4 output.
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    pub out_path: PathBuf,
    /// Overwrite the output file if it already exists.
    pub overwrite: bool,
    /// Encoded frame width and median window.
    pub output: OutputConfig,
}

impl FfmpegSinkOpts {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            overwrite: true,
            output: OutputConfig::default(),
        }
    }
}

/// Spawns the system `ffmpeg` and streams post-processed RGB24 frames to its stdin.
///
/// Each raster is resized to the configured width, median-filtered, then written as one raw
/// frame; ffmpeg encodes H.264/yuv420p into an MP4.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    cfg: Option<SinkConfig>,
    out_size: (u32, u32),
    last_idx: Option<FrameIndex>,
}

impl FfmpegSink {
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            cfg: None,
            out_size: (0, 0),
            last_idx: None,
        }
    }

    /// Encoded frame size, known after `begin`.
    pub fn output_size(&self) -> (u32, u32) {
        self.out_size
    }
}

impl RasterSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> DvsResult<()> {
        if cfg.fps == 0 {
            return Err(DvsError::validation("fps must be non-zero"));
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(DvsError::validation(
                "ffmpeg sink width/height must be non-zero",
            ));
        }
        let out_w = self.opts.output.width;
        if out_w < 2 || !out_w.is_multiple_of(2) {
            return Err(DvsError::validation(
                "output width must be even and >= 2 (required for yuv420p mp4 output)",
            ));
        }
        validate_ksize(self.opts.output.median_blur)?;
        let out_h = scaled_height(cfg.width, cfg.height, out_w);

        ensure_parent_dir(&self.opts.out_path)?;
        if !self.opts.overwrite && self.opts.out_path.exists() {
            return Err(DvsError::validation(format!(
                "output file '{}' already exists",
                self.opts.out_path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(DvsError::encode(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.arg(if self.opts.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
            &format!("{out_w}x{out_h}"),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ]);
        cmd.arg(&self.opts.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            DvsError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DvsError::encode("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DvsError::encode("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        tracing::info!(
            out = %self.opts.out_path.display(),
            width = out_w,
            height = out_h,
            fps = cfg.fps,
            "ffmpeg encoder started"
        );

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.out_size = (out_w, out_h);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, raster: &Raster) -> DvsResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| DvsError::encode("ffmpeg sink not started"))?;
        if let Some(last) = self.last_idx
            && idx <= last
        {
            return Err(DvsError::encode(
                "ffmpeg sink received out-of-order frame index",
            ));
        }
        self.last_idx = Some(idx);

        if raster.width != cfg.width || raster.height != cfg.height {
            return Err(DvsError::validation(format!(
                "raster size mismatch: got {}x{}, expected {}x{}",
                raster.width, raster.height, cfg.width, cfg.height
            )));
        }

        let (out_w, out_h) = self.out_size;
        let scaled = resize_rgb8(&raster.data, raster.width, raster.height, out_w, out_h)?;
        let frame = median_blur_rgb8(&scaled, out_w, out_h, self.opts.output.median_blur)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(DvsError::encode("ffmpeg sink is already finalized"));
        };

        use std::io::Write as _;
        stdin
            .write_all(&frame)
            .map_err(|e| DvsError::encode(format!("failed to write frame to ffmpeg stdin: {e}")))?;
        Ok(())
    }

    fn end(&mut self) -> DvsResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| DvsError::encode("ffmpeg sink not started"))?;

        let status = child
            .wait()
            .map_err(|e| DvsError::encode(format!("failed to wait for ffmpeg to finish: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| DvsError::encode("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| DvsError::encode(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(DvsError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }

        self.cfg = None;
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        // Aborted run: close the pipe and reap the child so no zombie is left behind.
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> DvsResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
