//! Timestamp synchronization tracker (C1).
//!
//! A bounded, append-only log of camera/stimulus timestamp pairs used to
//! prove sync quality. Stale samples (likely crossing a phase boundary)
//! are rejected rather than erroring; rejection is logged.

use isi_types::SyncSample;
use parking_lot::Mutex;
use serde::Serialize;

/// Samples whose `|cam_ts - stim_ts|` meets or exceeds this are stale and
/// rejected — they almost certainly originate from a prior stimulus phase.
pub const MAX_SYNC_AGE_US: i64 = 100_000;

const DEFAULT_MAX_HISTORY: usize = 100_000;
const HISTOGRAM_BINS: usize = 50;

/// Windowed statistics over signed delta (camera - stimulus), in
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStats {
    pub count: usize,
    pub matched_count: usize,
    pub mean_diff_ms: f64,
    pub std_diff_ms: f64,
    pub min_diff_ms: f64,
    pub max_diff_ms: f64,
    pub histogram: Vec<u32>,
    pub bin_edges: Vec<f64>,
}

impl SyncStats {
    fn empty(count: usize) -> Self {
        Self {
            count,
            matched_count: 0,
            mean_diff_ms: 0.0,
            std_diff_ms: 0.0,
            min_diff_ms: 0.0,
            max_diff_ms: 0.0,
            histogram: Vec::new(),
            bin_edges: Vec::new(),
        }
    }
}

struct Inner {
    history: Vec<SyncSample>,
    max_history: usize,
    enabled: bool,
}

/// Bounded ring buffer of `(cam_ts, stim_ts, frame_id)` samples with
/// windowed statistics. A single lock protects the history; no blocking
/// I/O is ever performed while it is held.
pub struct SyncTracker {
    inner: Mutex<Inner>,
}

impl Default for SyncTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl SyncTracker {
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                history: Vec::new(),
                max_history,
                enabled: false,
            }),
        }
    }

    pub fn enable(&self) {
        self.inner.lock().enabled = true;
        log::info!("sync tracker enabled");
    }

    pub fn disable(&self) {
        self.inner.lock().enabled = false;
        log::info!("sync tracker disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let n = inner.history.len();
        inner.history.clear();
        log::info!("sync history cleared ({n} entries removed)");
    }

    /// Record one candidate sync sample.
    ///
    /// Dropped (not an error, just logged) if the tracker is disabled, if
    /// `stim_ts` is absent, or if the sample is stale
    /// (`|cam_ts - stim_ts| >= MAX_SYNC_AGE_US`).
    pub fn record(&self, cam_ts: i64, stim_ts: Option<i64>, frame_id: u64) {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            log::debug!("sync tracking disabled, skipping cam_ts={cam_ts}");
            return;
        }
        let Some(stim_ts) = stim_ts else {
            log::debug!("no stimulus timestamp, skipping cam_ts={cam_ts}");
            return;
        };
        let age = (cam_ts - stim_ts).abs();
        if age >= MAX_SYNC_AGE_US {
            log::info!(
                "rejected stale sync sample: age {:.1}ms exceeds {:.0}ms (cam={cam_ts}, stim={stim_ts})",
                age as f64 / 1000.0,
                MAX_SYNC_AGE_US as f64 / 1000.0
            );
            return;
        }
        inner.history.push(SyncSample::new(cam_ts, stim_ts, frame_id));
        let count = inner.history.len();
        if count % 100 == 0 {
            log::info!("sync history: {count} entries recorded");
        }
        if count > inner.max_history {
            inner.history.remove(0);
            log::warn!("sync history limit ({}) reached, dropped oldest entry", inner.max_history);
        }
    }

    /// Samples with `cam_ts >= latest_cam_ts - window_seconds * 1e6`.
    ///
    /// Anchored on the latest sample's timestamp, not wall clock: with no
    /// new samples arriving the window freezes rather than emptying out,
    /// so a UI plot does not flush during baselines.
    pub fn window(&self, window_seconds: f64) -> Vec<SyncSample> {
        let inner = self.inner.lock();
        Self::window_locked(&inner.history, window_seconds)
    }

    fn window_locked(history: &[SyncSample], window_seconds: f64) -> Vec<SyncSample> {
        let Some(latest) = history.last() else {
            return Vec::new();
        };
        let threshold = latest.camera_timestamp_us - (window_seconds * 1_000_000.0) as i64;
        history
            .iter()
            .filter(|s| s.camera_timestamp_us >= threshold)
            .copied()
            .collect()
    }

    /// Statistics (count, matched count, delta mean/std/min/max, 50-bin
    /// histogram) over the same frozen window `window()` uses.
    pub fn stats(&self, window_seconds: f64) -> SyncStats {
        let inner = self.inner.lock();
        let recent = Self::window_locked(&inner.history, window_seconds);
        let count = recent.len();
        if recent.is_empty() {
            return SyncStats::empty(0);
        }

        let diffs_ms: Vec<f64> = recent
            .iter()
            .map(|s| s.signed_delta_us as f64 / 1000.0)
            .collect();

        let matched_count = diffs_ms.len();
        let mean = diffs_ms.iter().sum::<f64>() / matched_count as f64;
        let variance =
            diffs_ms.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / matched_count as f64;
        let std = variance.sqrt();
        let min = diffs_ms.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = diffs_ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let (histogram, bin_edges) = histogram_50(&diffs_ms, min, max);

        SyncStats {
            count,
            matched_count,
            mean_diff_ms: mean,
            std_diff_ms: std,
            min_diff_ms: min,
            max_diff_ms: max,
            histogram,
            bin_edges,
        }
    }
}

/// A 50-bin histogram over `values`, matching numpy's `histogram(..., bins=50)`
/// edge-case handling: when every value is identical, the range is widened
/// to `[v - 0.5, v + 0.5]` so bin edges are well-defined.
fn histogram_50(values: &[f64], min: f64, max: f64) -> (Vec<u32>, Vec<f64>) {
    let (lo, hi) = if (max - min).abs() < f64::EPSILON {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    };
    let bin_width = (hi - lo) / HISTOGRAM_BINS as f64;
    let mut counts = vec![0u32; HISTOGRAM_BINS];
    for &v in values {
        let mut idx = ((v - lo) / bin_width) as isize;
        if idx < 0 {
            idx = 0;
        }
        if idx as usize >= HISTOGRAM_BINS {
            idx = HISTOGRAM_BINS as isize - 1;
        }
        counts[idx as usize] += 1;
    }
    let edges: Vec<f64> = (0..=HISTOGRAM_BINS)
        .map(|i| lo + bin_width * i as f64)
        .collect();
    (counts, edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracker_drops_samples() {
        let t = SyncTracker::default();
        t.record(1_000_000, Some(1_000_000), 1);
        assert!(t.window(5.0).is_empty());
    }

    #[test]
    fn stale_sample_rejected() {
        let t = SyncTracker::default();
        t.enable();
        // S4: age is exactly 200ms, well past the 100ms threshold.
        t.record(10_000_000, Some(10_000_000 - 200_000), 1);
        assert!(t.window(5.0).is_empty());
    }

    #[test]
    fn boundary_age_is_rejected_not_accepted() {
        let t = SyncTracker::default();
        t.enable();
        t.record(1_100_000, Some(1_000_000), 1); // exactly 100_000us: ">=", rejected
        assert!(t.window(5.0).is_empty());
        t.record(1_099_999, Some(1_000_000), 2); // just under threshold: accepted
        assert_eq!(t.window(5.0).len(), 1);
    }

    #[test]
    fn missing_stimulus_timestamp_dropped() {
        let t = SyncTracker::default();
        t.enable();
        t.record(1_000_000, None, 1);
        assert!(t.window(5.0).is_empty());
    }

    #[test]
    fn window_freezes_on_latest_sample_not_wall_clock() {
        let t = SyncTracker::default();
        t.enable();
        t.record(1_000_000, Some(1_000_000 - 10), 1);
        let first = t.window(5.0);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = t.window(5.0);
        assert_eq!(first, second);
    }

    #[test]
    fn stats_over_uniform_noise() {
        let t = SyncTracker::default();
        t.enable();
        // S3: 1000 samples with delta in [-5000, 5000] us, uniformly spread.
        for i in 0..1000i64 {
            let delta = -5000 + (i * 10) % 10000;
            let cam = 1_000_000_000 + i * 1000;
            t.record(cam, Some(cam - delta), i as u64);
        }
        let stats = t.stats(5.0);
        assert_eq!(stats.matched_count, 1000);
        assert!(stats.mean_diff_ms.abs() < 1.0);
        assert_eq!(stats.histogram.len(), 50);
    }

    #[test]
    fn clear_resets_history() {
        let t = SyncTracker::default();
        t.enable();
        t.record(1_000_000, Some(1_000_000), 1);
        t.clear();
        assert!(t.window(5.0).is_empty());
    }

    #[test]
    fn max_history_evicts_oldest() {
        let t = SyncTracker::new(3);
        t.enable();
        for i in 0..5i64 {
            let cam = 1_000_000 + i * 1000;
            t.record(cam, Some(cam), i as u64);
        }
        let w = t.window(1000.0);
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].frame_id, 2);
    }
}
