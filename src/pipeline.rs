use std::sync::Arc;
use std::thread::ScopedJoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::accumulate::{AccumulatorSummary, FrameAccumulator};
use crate::colorize::{ColoredFrame, run_colorizer};
use crate::config::PipelineConfig;
use crate::error::{DvsError, DvsResult};
use crate::event::Event;
use crate::frame::{FramePool, PooledFrame};
use crate::raster::{Raster, Rasterizer, run_dispatcher};
use crate::sequencer::{SequencerStats, run_sequencer};
use crate::sink::{RasterSink, SinkConfig};
use crate::tables::LookupTables;

/// Counters reported by a completed [`DecayPipeline::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub events_read: u64,
    pub qualifying_events: u64,
    pub frames_emitted: u64,
    /// Events after the last boundary; their frame never closed and was discarded.
    pub unflushed_events: u64,
    /// Most rasters parked at once waiting for an earlier frame.
    pub reorder_high_water: usize,
}

/// Event stream to ordered false-color rasters.
///
/// Stages, each connected by a bounded queue:
///
/// 1. ingest (calling thread): accumulate events, snapshot each closed frame into a pool buffer
/// 2. colorizers (`colorizer_workers` threads): map each pixel to a color index
/// 3. raster dispatchers (`raster_dispatchers` threads): expand rows on the shared rayon pool
/// 4. sequencer (one thread): restore frame order and feed the sink
///
/// A stopped stage disconnects its queues, which winds down every stage upstream of it.
#[derive(Debug)]
pub struct DecayPipeline {
    cfg: PipelineConfig,
    tables: Arc<LookupTables>,
    rasterizer: Rasterizer,
}

impl DecayPipeline {
    pub fn new(cfg: PipelineConfig) -> DvsResult<Self> {
        cfg.validate()?;
        let tables = Arc::new(LookupTables::new(cfg.frame_interval(), cfg.decay_rate)?);
        let rasterizer = Rasterizer::new(cfg.raster_threads, cfg.interlace)?;
        Ok(Self {
            cfg,
            tables,
            rasterizer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn tables(&self) -> &Arc<LookupTables> {
        &self.tables
    }

    /// Drive `events` through every stage into `sink`.
    ///
    /// The first error from `events` is fatal. Frames already closed are still delivered to the
    /// sink before the error is returned.
    #[tracing::instrument(
        skip_all,
        fields(
            fps = self.cfg.frame_rate,
            decay = self.cfg.decay_rate,
            colorizers = self.cfg.colorizer_workers,
            dispatchers = self.cfg.raster_dispatchers,
        )
    )]
    pub fn run<I>(&self, events: I, sink: &mut dyn RasterSink) -> DvsResult<PipelineStats>
    where
        I: IntoIterator<Item = DvsResult<Event>>,
    {
        let sensor = self.cfg.sensor;
        let interval = self.cfg.frame_interval();
        let depth = self.cfg.queue_depth();
        let pool = FramePool::new(self.cfg.pool_capacity(), sensor, interval)?;
        let mut acc = FrameAccumulator::new(sensor, interval)?;
        let sink_cfg = SinkConfig {
            width: sensor.width,
            height: sensor.height,
            fps: self.cfg.frame_rate,
        };

        tracing::info!(
            width = sensor.width,
            height = sensor.height,
            interval,
            pool = pool.capacity(),
            depth,
            decay_entries = self.tables.decay().len(),
            "pipeline starting"
        );

        let (ingest_res, seq_res) = std::thread::scope(|scope| {
            let (frame_tx, frame_rx) = crossbeam_channel::bounded::<PooledFrame>(depth);
            let (colored_tx, colored_rx) = crossbeam_channel::bounded::<ColoredFrame>(depth);
            let (raster_tx, raster_rx) = crossbeam_channel::bounded::<Raster>(depth);
            // Never carries a message; disconnects once every downstream thread has exited.
            let (alive_tx, alive_rx) = crossbeam_channel::bounded::<()>(0);

            let sequencer = {
                let alive = alive_tx.clone();
                scope.spawn(move || {
                    let _alive = alive;
                    run_sequencer(raster_rx, sink, sink_cfg)
                })
            };

            let dispatchers: Vec<ScopedJoinHandle<'_, DvsResult<u64>>> = (0..self
                .cfg
                .raster_dispatchers)
                .map(|id| {
                    let rx = colored_rx.clone();
                    let tx = raster_tx.clone();
                    let alive = alive_tx.clone();
                    let rasterizer = &self.rasterizer;
                    scope.spawn(move || {
                        let _alive = alive;
                        run_dispatcher(id, rasterizer, rx, tx)
                    })
                })
                .collect();
            drop(colored_rx);
            drop(raster_tx);

            let colorizers: Vec<ScopedJoinHandle<'_, DvsResult<u64>>> = (0..self
                .cfg
                .colorizer_workers)
                .map(|worker| {
                    let rx = frame_rx.clone();
                    let tx = colored_tx.clone();
                    let alive = alive_tx.clone();
                    let tables = Arc::clone(&self.tables);
                    scope.spawn(move || {
                        let _alive = alive;
                        run_colorizer(worker, rx, tx, tables)
                    })
                })
                .collect();
            drop(frame_rx);
            drop(colored_tx);
            drop(alive_tx);

            let ingest_res = ingest(events, &mut acc, &pool, &frame_tx, &alive_rx);
            drop(frame_tx);

            let mut stage_errs = Vec::new();
            for (stage, handles) in [("colorizer", colorizers), ("raster dispatcher", dispatchers)] {
                for h in handles {
                    if let Err(e) = join_stage(h, stage) {
                        stage_errs.push(e);
                    }
                }
            }
            let seq_res = join_stage(sequencer, "sequencer");
            (ingest_res, pick_root_cause(seq_res, stage_errs))
        });

        let summary = acc.finish();
        if summary.unflushed_events > 0 {
            tracing::warn!(
                events = summary.unflushed_events,
                "input ended inside a frame; the partial frame was discarded"
            );
        }

        let seq_stats = match (ingest_res, seq_res) {
            (Err(e), Err(other)) if e.is_hangup() => return Err(other),
            (Err(e), _) => return Err(e),
            (Ok(()), res) => res?,
        };
        let stats = build_stats(summary, seq_stats);
        tracing::info!(
            events = stats.events_read,
            qualifying = stats.qualifying_events,
            frames = stats.frames_emitted,
            reorder_high_water = stats.reorder_high_water,
            "pipeline finished"
        );
        Ok(stats)
    }
}

fn ingest<I>(
    events: I,
    acc: &mut FrameAccumulator,
    pool: &FramePool,
    frames: &Sender<PooledFrame>,
    alive: &Receiver<()>,
) -> DvsResult<()>
where
    I: IntoIterator<Item = DvsResult<Event>>,
{
    for event in events {
        let event = event?;
        acc.push(&event, |live| {
            let mut slot = pool
                .acquire_or_cancel(alive)
                .ok_or_else(|| DvsError::hangup("ingest"))?;
            slot.copy_from(live)?;
            frames.send(slot).map_err(|_| DvsError::hangup("ingest"))
        })?;
    }
    Ok(())
}

fn join_stage<T>(handle: ScopedJoinHandle<'_, DvsResult<T>>, stage: &str) -> DvsResult<T> {
    handle
        .join()
        .map_err(|_| DvsError::pipeline(format!("{stage} thread panicked")))?
}

/// The sequencer's own error wins over worker errors; real failures win over hangups.
fn pick_root_cause(
    seq_res: DvsResult<SequencerStats>,
    stage_errs: Vec<DvsError>,
) -> DvsResult<SequencerStats> {
    let root = stage_errs.into_iter().find(|e| !e.is_hangup());
    match (seq_res, root) {
        (Err(e), Some(root)) if e.is_hangup() => Err(root),
        (Err(e), _) => Err(e),
        (Ok(_), Some(root)) => Err(root),
        (Ok(stats), None) => Ok(stats),
    }
}

fn build_stats(summary: AccumulatorSummary, seq: SequencerStats) -> PipelineStats {
    PipelineStats {
        events_read: summary.events_seen,
        qualifying_events: summary.qualifying_events,
        frames_emitted: seq.forwarded,
        unflushed_events: summary.unflushed_events,
        reorder_high_water: seq.high_water,
    }
}
