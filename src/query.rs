//! Query descriptors: what area, which dates, which compositor.

use crate::algorithm::AlgorithmKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Geographic bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    /// Height in degrees.
    pub fn height(&self) -> f64 {
        self.lat_max - self.lat_min
    }

    /// Width in degrees.
    pub fn width(&self) -> f64 {
        self.lon_max - self.lon_min
    }

    /// Check that the box is non-empty and inside WGS84 limits.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.lat_min < self.lat_max) {
            anyhow::bail!(
                "lat_min ({}) must be less than lat_max ({})",
                self.lat_min,
                self.lat_max
            );
        }
        if !(self.lon_min < self.lon_max) {
            anyhow::bail!(
                "lon_min ({}) must be less than lon_max ({})",
                self.lon_min,
                self.lon_max
            );
        }
        if self.lat_min < -90.0 || self.lat_max > 90.0 {
            anyhow::bail!("latitude must be within [-90, 90]");
        }
        if self.lon_min < -180.0 || self.lon_max > 180.0 {
            anyhow::bail!("longitude must be within [-180, 180]");
        }
        Ok(())
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lat [{:.4}, {:.4}] lon [{:.4}, {:.4}]",
            self.lat_min, self.lat_max, self.lon_min, self.lon_max
        )
    }
}

/// Inclusive acquisition time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        *t >= self.start && *t <= self.end
    }
}

/// An immutable mosaic request. Owned by the caller, read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    /// Satellite platform, e.g. "LANDSAT_7"
    pub platform: String,

    /// Product name in the scene catalog
    pub product: String,

    /// Requested area
    pub bbox: BoundingBox,

    /// Requested acquisition window
    pub time_range: TimeRange,

    /// Compositing algorithm
    pub algorithm: AlgorithmKind,

    /// Bands to load. The quality band is added by the worker if missing.
    #[serde(default = "default_measurements")]
    pub measurements: Vec<String>,
}

fn default_measurements() -> Vec<String> {
    ["blue", "green", "red", "nir", "swir1", "swir2", "cf_mask"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl QueryDescriptor {
    /// Stable identifier derived from every parameter that affects the result.
    ///
    /// Identical requests map to the same id, which is how repeat submissions are
    /// recognised.
    pub fn query_id(&self) -> String {
        let mut measurements: Vec<&str> = self.measurements.iter().map(String::as_str).collect();
        measurements.sort_unstable();
        measurements.dedup();

        format!(
            "{}-{}-{}-{}-{}-{}-{}-{}-{}-{}",
            self.time_range.start.format("%Y-%m-%d"),
            self.time_range.end.format("%Y-%m-%d"),
            self.bbox.lat_max,
            self.bbox.lat_min,
            self.bbox.lon_max,
            self.bbox.lon_min,
            self.platform,
            self.product,
            self.algorithm.as_str(),
            measurements.join("+"),
        )
    }

    /// Load a descriptor from a YAML or JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let descriptor: QueryDescriptor = match ext {
            "json" => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(descriptor)
    }

    /// Validate the descriptor.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bbox.validate()?;
        if self.time_range.start > self.time_range.end {
            anyhow::bail!("time range start must not be after end");
        }
        if self.measurements.is_empty() {
            anyhow::bail!("at least one measurement is required");
        }
        if self.platform.is_empty() || self.product.is_empty() {
            anyhow::bail!("platform and product are required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn descriptor() -> QueryDescriptor {
        QueryDescriptor {
            platform: "LANDSAT_7".to_string(),
            product: "ls7_ledaps".to_string(),
            bbox: BoundingBox::new(0.0, 1.0, 10.0, 11.5),
            time_range: TimeRange::new(
                Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2015, 12, 31, 0, 0, 0).unwrap(),
            ),
            algorithm: AlgorithmKind::MostRecent,
            measurements: default_measurements(),
        }
    }

    #[test]
    fn test_query_id_is_deterministic() {
        let a = descriptor();
        let b = descriptor();
        assert_eq!(a.query_id(), b.query_id());
        assert_eq!(
            a.query_id(),
            "2015-01-01-2015-12-31-1-0-11.5-10-LANDSAT_7-ls7_ledaps-most_recent-\
             blue+cf_mask+green+nir+red+swir1+swir2"
        );
    }

    #[test]
    fn test_query_id_changes_with_algorithm() {
        let a = descriptor();
        let mut b = descriptor();
        b.algorithm = AlgorithmKind::Median;
        assert_ne!(a.query_id(), b.query_id());
    }

    #[test]
    fn test_query_id_follows_measurement_set() {
        let a = descriptor();
        let mut reordered = descriptor();
        reordered.measurements.reverse();
        assert_eq!(a.query_id(), reordered.query_id());

        let mut fewer = descriptor();
        fewer.measurements.retain(|m| m != "swir2");
        assert_ne!(a.query_id(), fewer.query_id());
    }

    #[test]
    fn test_validate() {
        assert!(descriptor().validate().is_ok());

        let mut bad = descriptor();
        bad.bbox = BoundingBox::new(1.0, 0.0, 10.0, 11.0);
        assert!(bad.validate().is_err());

        let mut bad = descriptor();
        bad.time_range = TimeRange::new(bad.time_range.end, bad.time_range.start);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_parse_yaml_with_default_measurements() {
        let yaml = r#"
platform: LANDSAT_7
product: ls7_ledaps
bbox: { lat_min: 0.0, lat_max: 1.0, lon_min: 0.0, lon_max: 1.0 }
time_range: { start: "2015-01-01T00:00:00Z", end: "2015-06-01T00:00:00Z" }
algorithm: max_ndvi
"#;
        let parsed: QueryDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.algorithm, AlgorithmKind::MaxNdvi);
        assert_eq!(parsed.measurements.len(), 7);
        assert!(parsed.measurements.contains(&"cf_mask".to_string()));
    }
}
