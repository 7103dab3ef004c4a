//! Collaborators at the edge of the pipeline: scene access, records, scratch, output.

pub mod catalog;
pub mod records;
pub mod scratch;
mod store;
pub mod writer;

pub use catalog::{
    CatalogManifest, FetchWindow, MemoryCatalog, ProductInfo, Scene, SceneCatalog, SceneMetadata,
};
pub use records::{InMemoryRecordStore, RecordStore};
pub use scratch::{ScratchLocation, ScratchStore};
pub use store::create_local_store;
pub use writer::{LocalRasterWriter, RasterWriter};
