use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dvs_decay::{
    CsvEventReader, DecayPipeline, DecodeOptions, FfmpegSink, FfmpegSinkOpts, FrameCaptureSink,
    FrameIndex, PipelineStats, PngSequenceSink, RasterSink, RunConfig, TeeSink,
};

#[derive(Parser, Debug)]
#[command(
    name = "dvs-decay",
    version,
    about = "Render DVS event logs as decaying false-color video"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the whole event log to an MP4 (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Render a single frame as a PNG at sensor resolution.
    Frame(FrameArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Input CSV event log.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// JSON config file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fraction of intensity lost per frame interval.
    #[arg(long)]
    decay_rate: Option<f64>,

    /// Output frames per second.
    #[arg(long)]
    frame_rate: Option<u32>,

    /// Sensor width in pixels.
    #[arg(long)]
    sensor_width: Option<u32>,

    /// Sensor height in pixels.
    #[arg(long)]
    sensor_height: Option<u32>,

    /// Colorizer worker threads.
    #[arg(long)]
    colorizers: Option<usize>,

    /// Row pool threads.
    #[arg(long)]
    raster_threads: Option<usize>,

    /// Column phases per scanline.
    #[arg(long)]
    interlace: Option<u32>,

    /// Keep log coordinates as-is instead of mirroring both axes.
    #[arg(long)]
    no_flip: bool,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Encoded width (height follows the sensor aspect ratio).
    #[arg(long)]
    width: Option<u32>,

    /// Median filter window (odd).
    #[arg(long)]
    median_blur: Option<u32>,

    /// Also write every `--preview-every`-th frame as a PNG into this directory.
    #[arg(long)]
    preview_dir: Option<PathBuf>,

    /// Preview sampling interval, in frames.
    #[arg(long, default_value_t = 30)]
    preview_every: u64,

    /// Fail instead of overwriting an existing output file.
    #[arg(long)]
    no_overwrite: bool,
}

#[derive(Args, Debug)]
struct FrameArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Frame index (0-based).
    #[arg(long)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Frame(args) => cmd_frame(args),
    }
}

fn load_config(args: &CommonArgs) -> anyhow::Result<RunConfig> {
    let mut cfg = match &args.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };
    let p = &mut cfg.pipeline;
    if let Some(v) = args.decay_rate {
        p.decay_rate = v;
    }
    if let Some(v) = args.frame_rate {
        p.frame_rate = v;
    }
    if let Some(v) = args.sensor_width {
        p.sensor.width = v;
    }
    if let Some(v) = args.sensor_height {
        p.sensor.height = v;
    }
    if let Some(v) = args.colorizers {
        p.colorizer_workers = v;
    }
    if args.raster_threads.is_some() {
        p.raster_threads = args.raster_threads;
    }
    if let Some(v) = args.interlace {
        p.interlace = v;
    }
    Ok(cfg)
}

fn open_events(
    args: &CommonArgs,
    cfg: &RunConfig,
) -> anyhow::Result<CsvEventReader<BufReader<File>>> {
    let opts = DecodeOptions {
        sensor: cfg.pipeline.sensor,
        flip: !args.no_flip,
    };
    Ok(CsvEventReader::open(&args.in_path, opts)?)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut cfg = load_config(&args.common)?;
    if let Some(v) = args.width {
        cfg.output.width = v;
    }
    if let Some(v) = args.median_blur {
        cfg.output.median_blur = v;
    }
    cfg.validate()?;

    let pipeline = DecayPipeline::new(cfg.pipeline.clone())?;
    let events = open_events(&args.common, &cfg)?;

    let mut opts = FfmpegSinkOpts::new(&args.out);
    opts.overwrite = !args.no_overwrite;
    opts.output = cfg.output;
    let mut video = FfmpegSink::new(opts);

    let stats = match &args.preview_dir {
        Some(dir) => {
            let preview = PngSequenceSink::new(dir);
            let mut tee = TeeSink::new(&mut video, preview, args.preview_every)?;
            pipeline.run(events, &mut tee as &mut dyn RasterSink)?
        }
        None => pipeline.run(events, &mut video)?,
    };
    report(&stats, &args.out);
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let cfg = load_config(&args.common)?;
    cfg.pipeline.validate()?;

    let pipeline = DecayPipeline::new(cfg.pipeline.clone())?;
    let events = open_events(&args.common, &cfg)?;
    let mut capture = FrameCaptureSink::new(FrameIndex(args.frame));
    let stats = pipeline.run(events, &mut capture)?;

    let raster = capture.into_captured().with_context(|| {
        format!(
            "frame {} not produced; the log only covers {} frames",
            args.frame, stats.frames_emitted
        )
    })?;
    dvs_decay::write_png(&args.out, &raster)?;
    report(&stats, &args.out);
    Ok(())
}

fn report(stats: &PipelineStats, out: &Path) {
    tracing::info!(
        events = stats.events_read,
        qualifying = stats.qualifying_events,
        frames = stats.frames_emitted,
        discarded_tail_events = stats.unflushed_events,
        out = %out.display(),
        "done"
    );
}
