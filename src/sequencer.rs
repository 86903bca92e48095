use std::collections::HashMap;

use crossbeam_channel::Receiver;

use crate::core::FrameIndex;
use crate::error::{DvsError, DvsResult};
use crate::raster::Raster;
use crate::sink::{RasterSink, SinkConfig};

/// Restores frame order between the raster dispatchers and the sink.
///
/// Rasters arrive in any order; they are parked until every lower index has been forwarded.
pub struct Sequencer<S> {
    sink: S,
    next: FrameIndex,
    pending: HashMap<u64, Raster>,
    high_water: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequencerStats {
    pub forwarded: u64,
    /// Most rasters ever parked at once.
    pub high_water: usize,
}

impl<S: RasterSink> Sequencer<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next: FrameIndex(0),
            pending: HashMap::new(),
            high_water: 0,
        }
    }

    pub fn next_expected(&self) -> FrameIndex {
        self.next
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, raster: Raster) -> DvsResult<()> {
        let idx = raster.index;
        if idx < self.next || self.pending.contains_key(&idx.0) {
            return Err(DvsError::pipeline(format!(
                "duplicate frame {} (next expected {})",
                idx.0, self.next.0
            )));
        }
        if idx != self.next {
            self.pending.insert(idx.0, raster);
            self.high_water = self.high_water.max(self.pending.len());
            return Ok(());
        }

        self.forward(&raster)?;
        while let Some(r) = self.pending.remove(&self.next.0) {
            self.forward(&r)?;
        }
        Ok(())
    }

    fn forward(&mut self, raster: &Raster) -> DvsResult<()> {
        self.sink.push_frame(self.next, raster)?;
        self.next = self.next.next();
        Ok(())
    }

    /// Input is exhausted. Fails if any frame never showed up.
    pub fn finish(self) -> DvsResult<(S, SequencerStats)> {
        if !self.pending.is_empty() {
            let mut parked: Vec<_> = self.pending.keys().copied().collect();
            parked.sort_unstable();
            return Err(DvsError::pipeline(format!(
                "frame {} never arrived; {} later frames still pending (first {})",
                self.next.0,
                parked.len(),
                parked[0]
            )));
        }
        let stats = SequencerStats {
            forwarded: self.next.0,
            high_water: self.high_water,
        };
        Ok((self.sink, stats))
    }
}

/// Sequencer thread body: brackets the sink with `begin`/`end` around the ordered stream.
pub(crate) fn run_sequencer(
    rasters: Receiver<Raster>,
    sink: &mut dyn RasterSink,
    cfg: SinkConfig,
) -> DvsResult<SequencerStats> {
    sink.begin(cfg)?;
    let mut seq = Sequencer::new(&mut *sink);
    for raster in rasters.iter() {
        seq.push(raster)?;
    }
    let (_, stats) = seq.finish()?;
    sink.end()?;
    tracing::debug!(
        frames = stats.forwarded,
        high_water = stats.high_water,
        "sequencer drained"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;

    fn raster(i: u64) -> Raster {
        Raster {
            index: FrameIndex(i),
            width: 1,
            height: 1,
            data: vec![i as u8; 3],
        }
    }

    fn indices(sink: &InMemorySink) -> Vec<u64> {
        sink.frames().iter().map(|r| r.index.0).collect()
    }

    #[test]
    fn out_of_order_arrivals_are_forwarded_in_order() {
        let mut seq = Sequencer::new(InMemorySink::new());
        seq.push(raster(2)).unwrap();
        assert_eq!(seq.pending(), 1);
        seq.push(raster(0)).unwrap();
        assert_eq!(seq.next_expected(), FrameIndex(1));
        seq.push(raster(3)).unwrap();
        seq.push(raster(1)).unwrap();
        assert_eq!(seq.pending(), 0);

        let (sink, stats) = seq.finish().unwrap();
        assert_eq!(indices(&sink), vec![0, 1, 2, 3]);
        assert_eq!(stats.forwarded, 4);
        assert_eq!(stats.high_water, 2);
    }

    #[test]
    fn in_order_arrivals_never_park() {
        let mut seq = Sequencer::new(InMemorySink::new());
        for i in 0..5 {
            seq.push(raster(i)).unwrap();
        }
        let (_, stats) = seq.finish().unwrap();
        assert_eq!(stats.high_water, 0);
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut seq = Sequencer::new(InMemorySink::new());
        seq.push(raster(0)).unwrap();
        assert!(seq.push(raster(0)).is_err());
        seq.push(raster(3)).unwrap();
        assert!(seq.push(raster(3)).is_err());
    }

    #[test]
    fn gaps_fail_at_finish() {
        let mut seq = Sequencer::new(InMemorySink::new());
        seq.push(raster(0)).unwrap();
        seq.push(raster(2)).unwrap();
        let err = seq.finish().err().unwrap();
        assert!(err.to_string().contains("frame 1 never arrived"));
    }

    #[test]
    fn run_sequencer_brackets_the_sink() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        for i in [1, 0, 2] {
            tx.send(raster(i)).unwrap();
        }
        drop(tx);
        let mut sink = InMemorySink::new();
        let cfg = SinkConfig {
            width: 1,
            height: 1,
            fps: 10,
        };
        let stats = run_sequencer(rx, &mut sink, cfg).unwrap();
        assert_eq!(stats.forwarded, 3);
        assert!(sink.ended());
        assert_eq!(sink.config(), Some(cfg));
        assert_eq!(indices(&sink), vec![0, 1, 2]);
    }
}
