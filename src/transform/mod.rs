//! Pixel transforms: per-chunk kernels, combination strategies and tile assembly.

pub mod assemble;
pub mod combine;
pub mod kernels;

pub use assemble::assemble_group;
pub use combine::{CombinationStrategy, CRITERION_BAND};
pub use kernels::{clean_counts, clean_pixel_mask, ProcessingMethod};
