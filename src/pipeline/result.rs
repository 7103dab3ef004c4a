//! Per-acquisition statistics and the final query result record.

use crate::algorithm::AlgorithmKind;
use crate::query::BoundingBox;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Clean-pixel counts keyed by acquisition time. Merges are additive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionRecords {
    counts: BTreeMap<DateTime<Utc>, u64>,
}

impl AcquisitionRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `clean_pixels` to the count for `date`.
    pub fn record(&mut self, date: DateTime<Utc>, clean_pixels: u64) {
        *self.counts.entry(date).or_insert(0) += clean_pixels;
    }

    pub fn merge(&mut self, other: &AcquisitionRecords) {
        for (date, n) in &other.counts {
            self.record(*date, *n);
        }
    }

    pub fn get(&self, date: &DateTime<Utc>) -> Option<u64> {
        self.counts.get(date).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Newest-first summaries with the clean share of `pixel_count`.
    pub fn summaries(&self, pixel_count: usize) -> Vec<AcquisitionSummary> {
        self.counts
            .iter()
            .rev()
            .map(|(date, n)| AcquisitionSummary {
                date: *date,
                clean_pixels: *n,
                clean_percent: percent(*n as usize, pixel_count),
            })
            .collect()
    }
}

/// Share of `part` in `whole` as a percentage; 0 when `whole` is 0.
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub date: DateTime<Utc>,
    pub clean_pixels: u64,
    pub clean_percent: f64,
}

/// Metadata saved for a successfully completed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: String,
    pub algorithm: AlgorithmKind,

    /// Bounds covered by the output grid
    pub bounds: BoundingBox,

    pub rows: usize,
    pub cols: usize,

    /// Acquisitions that took part in the query
    pub total_scenes: usize,

    /// Valid pixels in the final mosaic
    pub clean_pixels: usize,
    pub clean_percent: f64,

    /// Newest first
    pub acquisitions: Vec<AcquisitionSummary>,

    /// Files produced by the raster writer
    pub outputs: Vec<PathBuf>,

    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_merge_is_additive() {
        let mut a = AcquisitionRecords::new();
        a.record(date(1), 4);
        a.record(date(2), 1);

        let mut b = AcquisitionRecords::new();
        b.record(date(1), 6);
        b.record(date(3), 2);

        a.merge(&b);
        assert_eq!(a.get(&date(1)), Some(10));
        assert_eq!(a.get(&date(2)), Some(1));
        assert_eq!(a.get(&date(3)), Some(2));
    }

    #[test]
    fn test_summaries_newest_first() {
        let mut r = AcquisitionRecords::new();
        r.record(date(1), 5);
        r.record(date(9), 10);

        let s = r.summaries(20);
        assert_eq!(s[0].date, date(9));
        assert_eq!(s[0].clean_percent, 50.0);
        assert_eq!(s[1].clean_percent, 25.0);
        assert_eq!(r.summaries(0)[0].clean_percent, 0.0);
    }
}
