//! Compositing algorithm variants and their chunking configuration.

use crate::transform::combine::CombinationStrategy;
use crate::transform::kernels::ProcessingMethod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of supported compositors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    MostRecent,
    LeastRecent,
    Median,
    MaxNdvi,
    MinNdvi,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 5] = [
        AlgorithmKind::MostRecent,
        AlgorithmKind::LeastRecent,
        AlgorithmKind::Median,
        AlgorithmKind::MaxNdvi,
        AlgorithmKind::MinNdvi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::MostRecent => "most_recent",
            AlgorithmKind::LeastRecent => "least_recent",
            AlgorithmKind::Median => "median",
            AlgorithmKind::MaxNdvi => "max_ndvi",
            AlgorithmKind::MinNdvi => "min_ndvi",
        }
    }

    /// Built-in configuration for this variant.
    pub fn config(&self) -> AlgorithmConfig {
        match self {
            AlgorithmKind::MostRecent => AlgorithmConfig {
                kind: *self,
                geo_chunk_size: 0.5,
                time_chunk_count: Some(5),
                time_slices_per_iteration: Some(5),
                reverse_time: true,
                combination: CombinationStrategy::FillNodata,
                processing: ProcessingMethod::Iterative,
            },
            AlgorithmKind::LeastRecent => AlgorithmConfig {
                kind: *self,
                geo_chunk_size: 0.5,
                time_chunk_count: Some(5),
                time_slices_per_iteration: Some(1),
                reverse_time: false,
                combination: CombinationStrategy::FillNodata,
                processing: ProcessingMethod::Iterative,
            },
            AlgorithmKind::Median => AlgorithmConfig {
                kind: *self,
                geo_chunk_size: 0.01,
                time_chunk_count: None,
                time_slices_per_iteration: None,
                reverse_time: false,
                combination: CombinationStrategy::FillNodata,
                processing: ProcessingMethod::Median,
            },
            AlgorithmKind::MaxNdvi => AlgorithmConfig {
                kind: *self,
                geo_chunk_size: 0.5,
                time_chunk_count: Some(5),
                time_slices_per_iteration: Some(5),
                reverse_time: false,
                combination: CombinationStrategy::MaxValue,
                processing: ProcessingMethod::MaxNdvi,
            },
            AlgorithmKind::MinNdvi => AlgorithmConfig {
                kind: *self,
                geo_chunk_size: 0.5,
                time_chunk_count: Some(5),
                time_slices_per_iteration: Some(5),
                reverse_time: false,
                combination: CombinationStrategy::MinValue,
                processing: ProcessingMethod::MinNdvi,
            },
        }
    }

    /// Built-in configuration with optional overrides applied.
    pub fn config_with(&self, tuning: Option<&AlgorithmTuning>) -> AlgorithmConfig {
        let mut config = self.config();
        if let Some(t) = tuning {
            if let Some(size) = t.geo_chunk_size {
                config.geo_chunk_size = size;
            }
            if t.time_chunk_count.is_some() {
                config.time_chunk_count = t.time_chunk_count;
            }
            if t.time_slices_per_iteration.is_some() {
                config.time_slices_per_iteration = t.time_slices_per_iteration;
            }
        }
        config
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlgorithmKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown algorithm '{}'", s))
    }
}

/// Per-variant overrides read from the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmTuning {
    #[serde(default)]
    pub geo_chunk_size: Option<f64>,
    #[serde(default)]
    pub time_chunk_count: Option<usize>,
    #[serde(default)]
    pub time_slices_per_iteration: Option<usize>,
}

/// Chunking and strategy selection for one query. Immutable once chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlgorithmConfig {
    pub kind: AlgorithmKind,
    /// Side of a geographic chunk in degrees
    pub geo_chunk_size: f64,
    /// Number of time groups; `None` means one group with every acquisition
    pub time_chunk_count: Option<usize>,
    /// Slices fetched per worker iteration; `None` means all remaining
    pub time_slices_per_iteration: Option<usize>,
    /// Traverse acquisitions newest first
    pub reverse_time: bool,
    pub combination: CombinationStrategy,
    pub processing: ProcessingMethod,
}

impl AlgorithmConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.geo_chunk_size > 0.0) {
            anyhow::bail!("{}: geo_chunk_size must be positive", self.kind);
        }
        if self.time_chunk_count == Some(0) {
            anyhow::bail!("{}: time_chunk_count must be at least 1", self.kind);
        }
        if self.time_slices_per_iteration == Some(0) {
            anyhow::bail!("{}: time_slices_per_iteration must be at least 1", self.kind);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        let most = AlgorithmKind::MostRecent.config();
        assert!(most.reverse_time);
        assert_eq!(most.time_slices_per_iteration, Some(5));
        assert_eq!(most.combination, CombinationStrategy::FillNodata);

        let least = AlgorithmKind::LeastRecent.config();
        assert!(!least.reverse_time);
        assert_eq!(least.time_slices_per_iteration, Some(1));

        let median = AlgorithmKind::Median.config();
        assert_eq!(median.time_chunk_count, None);
        assert_eq!(median.time_slices_per_iteration, None);
        assert_eq!(median.geo_chunk_size, 0.01);

        assert_eq!(AlgorithmKind::MaxNdvi.config().combination, CombinationStrategy::MaxValue);
        assert_eq!(AlgorithmKind::MinNdvi.config().processing, ProcessingMethod::MinNdvi);

        for kind in AlgorithmKind::ALL {
            kind.config().validate().unwrap();
        }
    }

    #[test]
    fn test_tuning_overrides() {
        let tuning = AlgorithmTuning {
            geo_chunk_size: Some(2.0),
            time_chunk_count: Some(1),
            time_slices_per_iteration: None,
        };
        let config = AlgorithmKind::MostRecent.config_with(Some(&tuning));
        assert_eq!(config.geo_chunk_size, 2.0);
        assert_eq!(config.time_chunk_count, Some(1));
        assert_eq!(config.time_slices_per_iteration, Some(5));
    }

    #[test]
    fn test_parse_names() {
        for kind in AlgorithmKind::ALL {
            assert_eq!(kind.as_str().parse::<AlgorithmKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<AlgorithmKind>().is_err());
    }
}
