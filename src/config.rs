//! Configuration for the mosaic service.

use crate::algorithm::{AlgorithmKind, AlgorithmTuning};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration for the mosaic service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scene catalog configuration
    pub catalog: CatalogConfig,

    /// Scratch space for chunk mosaics
    #[serde(default)]
    pub scratch: ScratchConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Optional per-algorithm chunking overrides
    #[serde(default)]
    pub algorithms: BTreeMap<AlgorithmKind, AlgorithmTuning>,
}

/// Scene catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Path to the catalog manifest (YAML or JSON)
    pub manifest_path: PathBuf,
}

/// Scratch directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchConfig {
    /// Root directory; each query gets its own subdirectory
    #[serde(default = "default_scratch_root")]
    pub root: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: default_scratch_root(),
        }
    }
}

/// Raster formats a writer may be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Geotiff,
    Netcdf,
    Png,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Geotiff => "geotiff",
            OutputFormat::Netcdf => "netcdf",
            OutputFormat::Png => "png",
        };
        f.write_str(name)
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for result files
    #[serde(default = "default_output_root")]
    pub root: PathBuf,

    /// Formats written for each completed query
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,

    /// PNG preview rendering
    #[serde(default)]
    pub png: PngConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            formats: default_formats(),
            png: PngConfig::default(),
        }
    }
}

/// PNG preview rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PngConfig {
    /// Bands mapped to red, green and blue
    #[serde(default = "default_rgb_bands")]
    pub rgb_bands: [String; 3],

    /// Colour for nodata pixels in the `_filled` image
    #[serde(default = "default_fill_color")]
    pub fill_color: [u8; 3],

    /// Band value rendered as full intensity
    #[serde(default = "default_scale_max")]
    pub scale_max: f32,
}

impl Default for PngConfig {
    fn default() -> Self {
        Self {
            rgb_bands: default_rgb_bands(),
            fill_color: default_fill_color(),
            scale_max: default_scale_max(),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Chunk workers running at once
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Rayon thread pool size for pixel kernels
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Band holding the cloud/quality classification
    #[serde(default = "default_quality_band")]
    pub quality_band: String,

    /// Enable metrics reporting
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after a query completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_concurrency: default_chunk_concurrency(),
            worker_threads: None,
            rayon_threads: None,
            quality_band: default_quality_band(),
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

impl Config {
    /// Configuration with defaults and the given catalog manifest.
    pub fn with_manifest(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog: CatalogConfig {
                manifest_path: manifest_path.into(),
            },
            scratch: ScratchConfig::default(),
            output: OutputConfig::default(),
            processing: ProcessingConfig::default(),
            algorithms: BTreeMap::new(),
        }
    }

    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Overrides for one algorithm, if configured.
    pub fn tuning(&self, kind: AlgorithmKind) -> Option<&AlgorithmTuning> {
        self.algorithms.get(&kind)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.processing.chunk_concurrency == 0 {
            anyhow::bail!("chunk_concurrency must be > 0");
        }
        if self.processing.quality_band.is_empty() {
            anyhow::bail!("quality_band must not be empty");
        }
        if self.processing.enable_metrics && self.processing.metrics_interval_secs == 0 {
            anyhow::bail!("metrics_interval_secs must be > 0 when metrics are enabled");
        }
        if self.output.formats.is_empty() {
            anyhow::bail!("At least one output format is required");
        }
        if !(self.output.png.scale_max > 0.0) {
            anyhow::bail!("png.scale_max must be positive");
        }
        if self.scratch.root == self.output.root {
            anyhow::bail!("scratch.root and output.root must differ");
        }
        for (kind, tuning) in &self.algorithms {
            kind.config_with(Some(tuning)).validate()?;
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_scratch_root() -> PathBuf { PathBuf::from("./scratch") }
fn default_output_root() -> PathBuf { PathBuf::from("./results") }
fn default_formats() -> Vec<OutputFormat> { vec![OutputFormat::Png] }
fn default_rgb_bands() -> [String; 3] { ["red".to_string(), "green".to_string(), "blue".to_string()] }
fn default_fill_color() -> [u8; 3] { [0, 0, 0] }
fn default_scale_max() -> f32 { 4096.0 }
fn default_chunk_concurrency() -> usize { 8 }
fn default_quality_band() -> String { "cf_mask".to_string() }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }
