#![forbid(unsafe_code)]

pub mod accumulate;
pub mod colorize;
pub mod config;
pub mod core;
pub mod decode;
pub mod encode_ffmpeg;
pub mod error;
pub mod event;
pub mod frame;
pub mod gather;
pub mod pipeline;
pub mod postprocess;
pub mod raster;
pub mod sequencer;
pub mod sink;
pub mod tables;

pub use accumulate::{AccumulatorSummary, FrameAccumulator};
pub use colorize::{ColoredFrame, colorize};
pub use config::{OutputConfig, PipelineConfig, RunConfig};
pub use core::{FrameIndex, Rgb8, Sensor, TimeUnits};
pub use decode::{CsvEventReader, DecodeOptions};
pub use encode_ffmpeg::{FfmpegSink, FfmpegSinkOpts, is_ffmpeg_on_path};
pub use error::{DvsError, DvsResult};
pub use event::{Event, Polarity};
pub use frame::{Frame, FramePool, NEVER, PooledFrame};
pub use pipeline::{DecayPipeline, PipelineStats};
pub use raster::{Raster, Rasterizer};
pub use sequencer::{Sequencer, SequencerStats};
pub use sink::{
    FrameCaptureSink, InMemorySink, PngSequenceSink, RasterSink, SinkConfig, TeeSink, write_png,
};
pub use tables::{ColorTable, DecayTable, LookupTables};
