//! Per-query scratch space for chunk mosaics.
//!
//! Chunk results are written under `<root>/<query_id>/geo_chunk_<t>_<g>.bin` so the
//! orchestrator can reload them at the time-group barrier. A query's directory is
//! exclusive to that query and is removed when the query terminates.

use crate::io::store::create_local_store;
use crate::raster::RasterDataset;
use anyhow::{Context, Result};
use futures::TryStreamExt;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Address of one persisted chunk mosaic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScratchLocation {
    pub query_id: String,
    pub time_index: usize,
    pub geo_index: usize,
}

impl ScratchLocation {
    pub fn new(query_id: &str, time_index: usize, geo_index: usize) -> Self {
        Self {
            query_id: query_id.to_string(),
            time_index,
            geo_index,
        }
    }

    fn store_path(&self) -> StorePath {
        StorePath::from(format!(
            "{}/geo_chunk_{}_{}.bin",
            self.query_id, self.time_index, self.geo_index
        ))
    }
}

impl std::fmt::Display for ScratchLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.store_path())
    }
}

/// Scratch area backed by a local object store.
pub struct ScratchStore {
    root: PathBuf,
    store: Arc<dyn ObjectStore>,
}

impl ScratchStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let store = create_local_store(&root)?;
        Ok(Self { root, store })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write_chunk(&self, location: &ScratchLocation, dataset: &RasterDataset) -> Result<()> {
        let bytes = bincode::serialize(dataset).context("Failed to encode chunk mosaic")?;
        self.store
            .put(&location.store_path(), PutPayload::from(bytes))
            .await
            .with_context(|| format!("Failed to write scratch chunk {}", location))?;
        Ok(())
    }

    pub async fn read_chunk(&self, location: &ScratchLocation) -> Result<RasterDataset> {
        let bytes = self
            .store
            .get(&location.store_path())
            .await
            .with_context(|| format!("Failed to read scratch chunk {}", location))?
            .bytes()
            .await?;
        let dataset = bincode::deserialize(&bytes).context("Failed to decode chunk mosaic")?;
        Ok(dataset)
    }

    /// Scratch files currently held for a query.
    pub async fn list_query_files(&self, query_id: &str) -> Result<Vec<String>> {
        let prefix = StorePath::from(query_id);
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        Ok(objects.into_iter().map(|o| o.location.to_string()).collect())
    }

    /// Delete every scratch file of a query and its directory. Missing state is fine.
    pub async fn remove_query(&self, query_id: &str) -> Result<()> {
        let prefix = StorePath::from(query_id);
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        for object in &objects {
            self.store.delete(&object.location).await?;
        }

        let dir = self.root.join(query_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", dir.display()))
            }
        }

        tracing::debug!("Removed {} scratch files for query {}", objects.len(), query_id);
        Ok(())
    }
}
