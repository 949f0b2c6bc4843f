//! Live console view of per-slot RSRP.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use gnbwatch_telemetry::{FrameSource, SlotHistory};

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Samples kept per slot, which is also the sparkline width.
pub const HISTORY_LEN: usize = 40;

/// Periodically pulls new frames from a [`FrameSource`] and redraws.
pub struct LiveRenderer<W> {
    source: Arc<dyn FrameSource>,
    history: SlotHistory,
    cursor: usize,
    interval: Duration,
    out: W,
}

impl<W: Write> LiveRenderer<W> {
    pub fn new(source: Arc<dyn FrameSource>, interval: Duration, out: W) -> Self {
        Self {
            source,
            history: SlotHistory::new(HISTORY_LEN),
            cursor: 0,
            interval,
            out,
        }
    }

    /// Ingests frames appended since the last tick and draws one block.
    /// Returns the number of new frames.
    pub fn tick(&mut self) -> io::Result<usize> {
        let frames = self.source.snapshot_since(self.cursor);
        self.cursor += frames.len();
        for frame in &frames {
            self.history.process_frame(frame);
        }
        self.draw()?;
        Ok(frames.len())
    }

    fn draw(&mut self) -> io::Result<()> {
        writeln!(
            self.out,
            "── {} frames, {} UE slots ──",
            self.history.frames_seen(),
            self.history.slot_count()
        )?;
        for slot in 0..self.history.slot_count() {
            let Some(latest) = self.history.latest(slot) else {
                continue;
            };
            let rnti = latest.rnti.as_deref().unwrap_or("-");
            let rsrp = latest
                .rsrp
                .map(|v| format!("{v:>7.1} dBm"))
                .unwrap_or_else(|| format!("{:>11}", "n/a"));
            let values: Vec<f64> = self
                .history
                .history(slot)
                .map(|h| h.iter().copied().collect())
                .unwrap_or_default();
            writeln!(
                self.out,
                "slot {slot:>2}  rnti {rnti:<8} {rsrp}  {}",
                sparkline(&values)
            )?;
        }
        self.out.flush()
    }

    /// Redraws every interval until `cancel` fires, then draws once more.
    pub async fn run(mut self, cancel: CancellationToken) -> io::Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick()?;
                }
            }
        }
        let last = self.tick()?;
        debug!(frames = self.cursor, last, "live renderer stopped");
        Ok(())
    }
}

/// One block character per value, scaled between the series min and max.
pub fn sparkline(values: &[f64]) -> String {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = max - min;
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return ' ';
            }
            if span <= f64::EPSILON {
                return SPARK[SPARK.len() / 2];
            }
            let idx = ((v - min) / span * (SPARK.len() - 1) as f64).round() as usize;
            SPARK[idx.min(SPARK.len() - 1)]
        })
        .collect()
}
