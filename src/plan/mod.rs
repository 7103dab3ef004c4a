//! Chunk planning: turn a query into geo chunks × time groups.
//!
//! Planning is pure and deterministic. The same inputs always produce the same chunk
//! and group sequences, which lets progress totals be fixed before any work starts.

pub mod geo_grid;
pub mod time_groups;

pub use geo_grid::{GeoChunk, GeoGrid};
pub use time_groups::TimeGroup;

use crate::algorithm::AlgorithmConfig;
use crate::error::MosaicError;
use crate::query::{BoundingBox, TimeRange};
use chrono::{DateTime, Utc};
use std::fmt;

/// One unit of concurrent dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub time_index: usize,
    pub geo_index: usize,
}

/// Everything the orchestrator needs to dispatch a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub grid: GeoGrid,
    pub geo_chunks: Vec<GeoChunk>,
    pub time_groups: Vec<TimeGroup>,
}

impl ChunkPlan {
    /// |time groups| × |geo chunks|; fixed for the query's lifetime.
    pub fn total_work_units(&self) -> usize {
        self.time_groups.len() * self.geo_chunks.len()
    }

    /// Work units in dispatch order: group by group, chunks in planner order.
    pub fn work_units(&self) -> impl Iterator<Item = WorkUnit> + '_ {
        self.time_groups.iter().flat_map(move |group| {
            self.geo_chunks.iter().map(move |chunk| WorkUnit {
                time_index: group.index,
                geo_index: chunk.index,
            })
        })
    }

    pub fn acquisition_count(&self) -> usize {
        self.time_groups.iter().map(|g| g.len()).sum()
    }
}

impl fmt::Display for ChunkPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Grid: {}x{} pixels at {} deg, {}px cells",
            self.grid.extent.rows,
            self.grid.extent.cols,
            self.grid.extent.resolution,
            self.grid.cell_pixels
        )?;
        writeln!(
            f,
            "Geo chunks: {} ({} rows x {} cols)",
            self.geo_chunks.len(),
            self.grid.row_chunks,
            self.grid.col_chunks
        )?;
        for chunk in &self.geo_chunks {
            writeln!(
                f,
                "  [{}] lat {:.4}..{:.4} lon {:.4}..{:.4} ({}x{} px)",
                chunk.index,
                chunk.lat_range.0,
                chunk.lat_range.1,
                chunk.lon_range.0,
                chunk.lon_range.1,
                chunk.rows,
                chunk.cols
            )?;
        }
        writeln!(f, "Time groups: {}", self.time_groups.len())?;
        for group in &self.time_groups {
            let first = group.acquisitions.first().map(|t| t.format("%Y-%m-%d").to_string());
            let last = group.acquisitions.last().map(|t| t.format("%Y-%m-%d").to_string());
            writeln!(
                f,
                "  [{}] {} acquisitions ({} .. {})",
                group.index,
                group.len(),
                first.unwrap_or_default(),
                last.unwrap_or_default()
            )?;
        }
        write!(f, "Total work units: {}", self.total_work_units())
    }
}

/// Partition a query into geographic chunks and time groups.
///
/// Acquisitions outside `time_range` are dropped; the rest are sorted and
/// de-duplicated before grouping. Fails with [`MosaicError::InsufficientData`] when
/// nothing remains.
pub fn plan(
    bbox: &BoundingBox,
    time_range: &TimeRange,
    acquisitions: &[DateTime<Utc>],
    resolution: f64,
    config: &AlgorithmConfig,
) -> anyhow::Result<ChunkPlan> {
    config.validate()?;
    if !(resolution > 0.0) {
        anyhow::bail!("product resolution must be positive, got {}", resolution);
    }

    let mut dates: Vec<DateTime<Utc>> = acquisitions
        .iter()
        .filter(|t| time_range.contains(t))
        .copied()
        .collect();
    dates.sort();
    dates.dedup();

    if dates.is_empty() {
        return Err(MosaicError::InsufficientData(format!(
            "no acquisitions between {} and {}",
            time_range.start.format("%Y-%m-%d"),
            time_range.end.format("%Y-%m-%d")
        ))
        .into());
    }

    let grid = GeoGrid::new(*bbox, resolution, config.geo_chunk_size);
    let geo_chunks: Vec<GeoChunk> = grid.enumerate_chunks().collect();
    let time_groups = time_groups::partition(&dates, config.time_chunk_count, config.reverse_time);

    tracing::info!(
        "Planned {} geo chunks x {} time groups for {} acquisitions ({})",
        geo_chunks.len(),
        time_groups.len(),
        dates.len(),
        config.kind
    );

    Ok(ChunkPlan {
        grid,
        geo_chunks,
        time_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::AlgorithmKind;
    use chrono::TimeZone;

    fn date(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, m, d, 0, 0, 0).unwrap()
    }

    fn year() -> TimeRange {
        TimeRange::new(date(1, 1), date(12, 31))
    }

    #[test]
    fn test_plan_is_deterministic() {
        let bbox = BoundingBox::new(0.0, 1.3, 5.0, 6.1);
        let acq: Vec<_> = (1..=9).map(|d| date(3, d)).collect();
        let config = AlgorithmKind::MostRecent.config();

        let a = plan(&bbox, &year(), &acq, 0.05, &config).unwrap();
        let b = plan(&bbox, &year(), &acq, 0.05, &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.acquisition_count(), 9);
        assert_eq!(a.total_work_units(), a.geo_chunks.len() * 5);
        assert_eq!(a.work_units().count(), a.total_work_units());
    }

    #[test]
    fn test_plan_filters_sorts_and_dedupes() {
        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 1.0);
        let acq = vec![
            date(5, 1),
            date(2, 1),
            date(5, 1),
            Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
        ];
        let config = AlgorithmKind::Median.config();
        let p = plan(&bbox, &year(), &acq, 0.01, &config).unwrap();
        assert_eq!(p.time_groups.len(), 1);
        assert_eq!(p.time_groups[0].acquisitions, vec![date(2, 1), date(5, 1)]);
    }

    #[test]
    fn test_empty_acquisitions_is_insufficient_data() {
        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 1.0);
        let config = AlgorithmKind::MostRecent.config();
        let err = plan(&bbox, &year(), &[], 0.1, &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_most_recent_single_chunk_scenario() {
        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 1.0);
        let acq = vec![date(1, 10), date(2, 10), date(3, 10)];
        let mut config = AlgorithmKind::MostRecent.config();
        config.geo_chunk_size = 1.0;
        config.time_chunk_count = Some(1);

        let p = plan(&bbox, &year(), &acq, 0.1, &config).unwrap();
        assert_eq!(p.geo_chunks.len(), 1);
        assert_eq!(
            p.time_groups[0].acquisitions,
            vec![date(3, 10), date(2, 10), date(1, 10)]
        );
        assert_eq!(p.total_work_units(), 1);
    }
}
