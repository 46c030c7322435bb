//! Bar series - parallel OHLCV arrays for one timeframe

use chrono::{Duration, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::VenueTime;

/// OHLCV series. All arrays always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bars {
    /// Minutes per bar
    pub timeframe: u32,
    time: Vec<VenueTime>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
}

/// One bar, used for construction and iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub time: VenueTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Which rule a batch merge applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Nothing was there yet
    Initial,
    /// Batch ends before existing data begins
    IgnoredOlder,
    /// Joined at the first timestamp both series share
    Spliced,
    /// No shared timestamp; existing data discarded
    Replaced,
    Empty,
}

impl Bars {
    pub fn new(timeframe: u32) -> Self {
        Self {
            timeframe,
            ..Default::default()
        }
    }

    pub fn from_bars(timeframe: u32, bars: impl IntoIterator<Item = Bar>) -> Self {
        let mut out = Self::new(timeframe);
        for bar in bars {
            out.push(bar);
        }
        out
    }

    pub fn push(&mut self, bar: Bar) {
        self.time.push(bar.time);
        self.open.push(bar.open);
        self.high.push(bar.high);
        self.low.push(bar.low);
        self.close.push(bar.close);
        self.volume.push(bar.volume);
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn bar(&self, i: usize) -> Option<Bar> {
        if i >= self.len() {
            return None;
        }
        Some(Bar {
            time: self.time[i],
            open: self.open[i],
            high: self.high[i],
            low: self.low[i],
            close: self.close[i],
            volume: self.volume[i],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Bar> + '_ {
        (0..self.len()).filter_map(move |i| self.bar(i))
    }

    pub fn times(&self) -> &[VenueTime] {
        &self.time
    }

    pub fn closes(&self) -> &[f64] {
        &self.close
    }

    pub fn highs(&self) -> &[f64] {
        &self.high
    }

    pub fn lows(&self) -> &[f64] {
        &self.low
    }

    pub fn first_time(&self) -> Option<VenueTime> {
        self.time.first().copied()
    }

    pub fn last_time(&self) -> Option<VenueTime> {
        self.time.last().copied()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied()
    }

    fn truncate(&mut self, len: usize) {
        self.time.truncate(len);
        self.open.truncate(len);
        self.high.truncate(len);
        self.low.truncate(len);
        self.close.truncate(len);
        self.volume.truncate(len);
    }

    fn extend_from(&mut self, other: &Bars, from: usize) {
        for bar in other.iter().skip(from) {
            self.push(bar);
        }
    }

    /// Drop bars older than `cutoff`.
    pub fn purge_before(&mut self, cutoff: VenueTime) {
        let keep_from = self.time.partition_point(|t| *t < cutoff);
        if keep_from == 0 {
            return;
        }
        let rest = Bars::from_bars(self.timeframe, self.iter().skip(keep_from));
        *self = rest;
    }

    /// Merge a freshly retrieved batch into this series.
    ///
    /// Older non-overlapping batches are ignored. A batch sharing a timestamp
    /// with the existing data replaces the bars inside its own time range and
    /// leaves the rest; with no shared timestamp the existing data is replaced.
    pub fn merge(&mut self, batch: Bars) -> MergeKind {
        let (Some(batch_first), Some(batch_last)) = (batch.first_time(), batch.last_time()) else {
            return MergeKind::Empty;
        };
        let (Some(first), Some(last)) = (self.first_time(), self.last_time()) else {
            *self = batch;
            return MergeKind::Initial;
        };

        if batch_last < first {
            return MergeKind::IgnoredOlder;
        }

        let shares_time = batch.time.iter().any(|t| self.time.binary_search(t).is_ok());

        if shares_time {
            // Keep ours before the batch and past its end; the batch wins in between
            let head = self.time.partition_point(|t| *t < batch_first);
            let tail_from = self.time.partition_point(|t| *t <= batch_last);
            let tail = Bars::from_bars(self.timeframe, self.iter().skip(tail_from));
            self.truncate(head);
            self.extend_from(&batch, 0);
            self.extend_from(&tail, 0);
            return MergeKind::Spliced;
        }

        if batch_first <= last {
            warn!(
                existing_first = %first,
                existing_last = %last,
                batch_first = %batch_first,
                batch_last = %batch_last,
                "bar batch overlaps without a shared timestamp, replacing series"
            );
        }
        let timeframe = self.timeframe;
        *self = batch;
        self.timeframe = timeframe;
        MergeKind::Replaced
    }

    /// Aggregate into a coarser timeframe. Buckets are aligned to midnight.
    pub fn compress(&self, timeframe: u32) -> Bars {
        if timeframe <= self.timeframe || timeframe == 0 {
            let mut copy = self.clone();
            copy.timeframe = self.timeframe.max(timeframe);
            return copy;
        }
        let mut out = Bars::new(timeframe);
        let mut current: Option<Bar> = None;
        for bar in self.iter() {
            let bucket = bucket_start(bar.time, timeframe);
            match current.as_mut() {
                Some(acc) if acc.time == bucket => {
                    acc.high = acc.high.max(bar.high);
                    acc.low = acc.low.min(bar.low);
                    acc.close = bar.close;
                    acc.volume += bar.volume;
                }
                _ => {
                    if let Some(done) = current.take() {
                        out.push(done);
                    }
                    current = Some(Bar { time: bucket, ..bar });
                }
            }
        }
        if let Some(done) = current {
            out.push(done);
        }
        out
    }
}

fn bucket_start(t: VenueTime, timeframe: u32) -> VenueTime {
    let minutes = t.time().num_seconds_from_midnight() / 60;
    let start = minutes - minutes % timeframe;
    let midnight = t.date().and_time(NaiveTime::MIN);
    midnight + Duration::minutes(start as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> VenueTime {
        NaiveDate::from_ymd_opt(2026, 10, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn series(minutes: &[(u32, u32)], close_base: f64) -> Bars {
        Bars::from_bars(
            1,
            minutes.iter().enumerate().map(|(i, (h, m))| Bar {
                time: at(*h, *m),
                open: close_base + i as f64,
                high: close_base + i as f64 + 1.0,
                low: close_base + i as f64 - 1.0,
                close: close_base + i as f64,
                volume: 10.0,
            }),
        )
    }

    #[test]
    fn test_merge_into_empty() {
        let mut bars = Bars::new(1);
        assert_eq!(bars.merge(series(&[(10, 0), (10, 1)], 100.0)), MergeKind::Initial);
        assert_eq!(bars.len(), 2);
    }

    #[test]
    fn test_merge_ignores_older_batch() {
        let mut bars = series(&[(10, 0), (10, 1)], 100.0);
        let before = bars.clone();
        assert_eq!(bars.merge(series(&[(9, 0), (9, 1)], 50.0)), MergeKind::IgnoredOlder);
        assert_eq!(bars, before);
    }

    #[test]
    fn test_merge_splices_tail() {
        let mut bars = series(&[(10, 0), (10, 1), (10, 2)], 100.0);
        let kind = bars.merge(series(&[(10, 1), (10, 2), (10, 3)], 200.0));
        assert_eq!(kind, MergeKind::Spliced);
        assert_eq!(bars.len(), 4);
        assert_eq!(bars.closes(), &[100.0, 200.0, 201.0, 202.0]);
    }

    #[test]
    fn test_merge_prepends_earlier_batch() {
        let mut bars = series(&[(10, 2), (10, 3), (10, 4)], 100.0);
        let kind = bars.merge(series(&[(10, 0), (10, 1), (10, 2)], 50.0));
        assert_eq!(kind, MergeKind::Spliced);
        assert_eq!(bars.len(), 5);
        assert_eq!(bars.first_time(), Some(at(10, 0)));
        assert_eq!(bars.closes()[3], 101.0);
    }

    #[test]
    fn test_merge_batch_starting_between_bars_keeps_older_history() {
        let mut bars = series(&[(10, 0), (10, 2), (10, 3)], 100.0);
        let kind = bars.merge(series(&[(10, 1), (10, 2), (10, 4)], 200.0));
        assert_eq!(kind, MergeKind::Spliced);
        assert_eq!(bars.first_time(), Some(at(10, 0)));
        assert_eq!(bars.len(), 4);
        assert_eq!(bars.closes(), &[100.0, 200.0, 201.0, 202.0]);
    }

    #[test]
    fn test_merge_batch_inside_range_keeps_newer_bars() {
        let mut bars = series(&[(10, 0), (10, 1), (10, 2), (10, 3)], 100.0);
        let kind = bars.merge(series(&[(10, 1), (10, 2)], 200.0));
        assert_eq!(kind, MergeKind::Spliced);
        assert_eq!(bars.closes(), &[100.0, 200.0, 201.0, 103.0]);
    }

    #[test]
    fn test_merge_without_common_timestamp_replaces() {
        let mut bars = series(&[(10, 0), (10, 2)], 100.0);
        let kind = bars.merge(series(&[(10, 1), (10, 3)], 300.0));
        assert_eq!(kind, MergeKind::Replaced);
        assert_eq!(bars.closes(), &[300.0, 301.0]);
    }

    #[test]
    fn test_compress_to_five_minutes() {
        let bars = series(&[(10, 0), (10, 1), (10, 4), (10, 5), (10, 9)], 100.0);
        let five = bars.compress(5);
        assert_eq!(five.len(), 2);
        assert_eq!(five.timeframe, 5);
        let first = five.bar(0).unwrap();
        assert_eq!(first.open, 100.0);
        assert_eq!(first.close, 102.0);
        assert_eq!(first.high, 103.0);
        assert_eq!(first.low, 99.0);
        assert_eq!(first.volume, 30.0);
        // source untouched
        assert_eq!(bars.len(), 5);
    }
}
