// =============================================================================
// Bar Cache — per (symbol, timeframe) history with feed-gap detection
// =============================================================================
//
// The trading loop polls the adapter for recent bars every cycle and feeds
// them through this cache. The cache keeps a bounded ring of closed bars per
// series so indicators always see a contiguous window, and it flags any
// non-contiguous `open_time` step so the regime classifier can degrade to
// `unknown` instead of classifying over a hole in the feed.
//
// Owned exclusively by the trading loop; readers get snapshots.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::types::{Bar, Timeframe};

/// Composite key identifying one bar series.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SeriesKey {
    pub symbol: String,
    pub tf: Timeframe,
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.tf)
    }
}

/// Result of ingesting one adapter batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Bars appended (previously unseen `open_time`s).
    pub appended: usize,
    /// True when a hole was detected between consecutive bars.
    pub feed_gap: bool,
}

/// Bounded per-series bar history.
pub struct BarCache {
    series: HashMap<SeriesKey, VecDeque<Bar>>,
    /// Keys whose most recent ingest detected a gap.
    gap_flags: HashMap<SeriesKey, bool>,
    max_bars: usize,
}

impl BarCache {
    pub fn new(max_bars: usize) -> Self {
        Self {
            series: HashMap::new(),
            gap_flags: HashMap::new(),
            max_bars,
        }
    }

    /// Merge an adapter batch (ordered ascending by `open_time`) into the
    /// cache. Bars older than the newest cached bar are ignored; the newest
    /// cached bar is overwritten when the adapter re-reports it (the broker
    /// finalises the last bar late).
    pub fn ingest(&mut self, key: SeriesKey, batch: &[Bar]) -> IngestReport {
        let step = key.tf.seconds();
        let ring = self
            .series
            .entry(key.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.max_bars + 1));

        let mut appended = 0;
        let mut feed_gap = false;

        for bar in batch {
            match ring.back() {
                None => {
                    ring.push_back(bar.clone());
                    appended += 1;
                }
                Some(last) => {
                    let delta = (bar.open_time - last.open_time).num_seconds();
                    if delta < 0 {
                        continue; // stale bar from an overlapping fetch
                    }
                    if delta == 0 {
                        *ring.back_mut().expect("ring is non-empty") = bar.clone();
                        continue;
                    }
                    if delta > step {
                        feed_gap = true;
                        warn!(
                            series = %key,
                            expected_step_secs = step,
                            actual_step_secs = delta,
                            "feed gap detected"
                        );
                    }
                    ring.push_back(bar.clone());
                    appended += 1;
                }
            }
        }

        while ring.len() > self.max_bars {
            ring.pop_front();
        }

        self.gap_flags.insert(key.clone(), feed_gap);

        debug!(series = %key, appended, feed_gap, cached = ring.len(), "bars ingested");
        IngestReport { appended, feed_gap }
    }

    /// Most recent `count` bars for the series, oldest first.
    pub fn recent(&self, key: &SeriesKey, count: usize) -> Vec<Bar> {
        match self.series.get(key) {
            Some(ring) => {
                let skip = ring.len().saturating_sub(count);
                ring.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn latest(&self, key: &SeriesKey) -> Option<&Bar> {
        self.series.get(key)?.back()
    }

    /// Whether the last ingest for the series saw a hole.
    pub fn has_feed_gap(&self, key: &SeriesKey) -> bool {
        self.gap_flags.get(key).copied().unwrap_or(false)
    }

    pub fn len(&self, key: &SeriesKey) -> usize {
        self.series.get(key).map_or(0, |r| r.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn key() -> SeriesKey {
        SeriesKey {
            symbol: "EURUSD".into(),
            tf: Timeframe::M5,
        }
    }

    fn mk_bars(start_idx: i64, n: i64) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        (start_idx..start_idx + n)
            .map(|i| Bar {
                symbol: "EURUSD".into(),
                tf: Timeframe::M5,
                open_time: t0 + Duration::minutes(5 * i),
                open: 1.0,
                high: 1.1,
                low: 0.9,
                close: 1.0 + i as f64 * 0.001,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn contiguous_ingest_has_no_gap() {
        let mut cache = BarCache::new(100);
        let report = cache.ingest(key(), &mk_bars(0, 10));
        assert_eq!(report.appended, 10);
        assert!(!report.feed_gap);
        assert!(!cache.has_feed_gap(&key()));
    }

    #[test]
    fn hole_raises_feed_gap_flag() {
        let mut cache = BarCache::new(100);
        cache.ingest(key(), &mk_bars(0, 5));
        // Skip bars 5..8 — next batch starts at index 8.
        let report = cache.ingest(key(), &mk_bars(8, 3));
        assert!(report.feed_gap);
        assert!(cache.has_feed_gap(&key()));
        // A clean follow-up batch clears the flag.
        let report = cache.ingest(key(), &mk_bars(11, 2));
        assert!(!report.feed_gap);
        assert!(!cache.has_feed_gap(&key()));
    }

    #[test]
    fn rereported_last_bar_overwrites_in_place() {
        let mut cache = BarCache::new(100);
        cache.ingest(key(), &mk_bars(0, 5));
        let mut dup = mk_bars(4, 1);
        dup[0].close = 9.9;
        let report = cache.ingest(key(), &dup);
        assert_eq!(report.appended, 0);
        assert_eq!(cache.len(&key()), 5);
        assert!((cache.latest(&key()).unwrap().close - 9.9).abs() < 1e-12);
    }

    #[test]
    fn overlapping_fetch_skips_stale_bars() {
        let mut cache = BarCache::new(100);
        cache.ingest(key(), &mk_bars(0, 10));
        // Re-fetch of the same window appends nothing new.
        let report = cache.ingest(key(), &mk_bars(0, 10));
        assert_eq!(report.appended, 0);
        assert_eq!(cache.len(&key()), 10);
    }

    #[test]
    fn ring_is_bounded() {
        let mut cache = BarCache::new(20);
        cache.ingest(key(), &mk_bars(0, 50));
        assert_eq!(cache.len(&key()), 20);
        // Oldest retained bar is index 30.
        let bars = cache.recent(&key(), 100);
        assert!((bars[0].close - 1.030).abs() < 1e-9);
    }

    #[test]
    fn recent_returns_tail_oldest_first() {
        let mut cache = BarCache::new(100);
        cache.ingest(key(), &mk_bars(0, 10));
        let tail = cache.recent(&key(), 3);
        assert_eq!(tail.len(), 3);
        assert!(tail[0].open_time < tail[2].open_time);
    }
}
