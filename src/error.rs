//! Typed failures that change how a query terminates.
//!
//! Most of the crate works in `anyhow::Result`. The variants here are the ones the
//! orchestrator needs to tell apart, so they are raised as `MosaicError` and recovered
//! with `anyhow::Error::downcast_ref`.

use thiserror::Error;

/// Failures with query-level meaning.
#[derive(Debug, Error)]
pub enum MosaicError {
    /// Nothing to composite: no acquisitions, or no chunk produced a mosaic.
    #[error("{0}")]
    NoData(String),

    /// The planner was handed an empty acquisition list.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A fetched sub-range lacks bands the worker needs (usually the quality band).
    #[error("missing bands: {}", .0.join(", "))]
    MissingBands(Vec<String>),

    /// Cooperative cancellation was observed.
    #[error("query {0} was cancelled")]
    Cancelled(String),

    /// The bundled writer cannot encode this format.
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// Two rasters that must align do not.
    #[error("shape mismatch for band '{band}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        band: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// The progress ledger rejected a state change.
    #[error("invalid ledger transition: {0}")]
    LedgerTransition(String),
}

impl MosaicError {
    /// Whether this failure means "the query had no usable data" rather than a fault.
    pub fn is_no_data(&self) -> bool {
        matches!(self, MosaicError::NoData(_) | MosaicError::InsufficientData(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bands_display() {
        let err = MosaicError::MissingBands(vec!["cf_mask".to_string(), "nir".to_string()]);
        assert_eq!(err.to_string(), "missing bands: cf_mask, nir");
    }

    #[test]
    fn test_no_data_classification() {
        assert!(MosaicError::NoData("none".into()).is_no_data());
        assert!(MosaicError::InsufficientData("empty".into()).is_no_data());
        assert!(!MosaicError::Cancelled("q".into()).is_no_data());
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = MosaicError::Cancelled("q1".into()).into();
        assert!(matches!(
            err.downcast_ref::<MosaicError>(),
            Some(MosaicError::Cancelled(id)) if id == "q1"
        ));
    }
}
