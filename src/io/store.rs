//! Object store construction for scratch and output areas.

use anyhow::{Context, Result};
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;

/// Create a local filesystem store rooted at `root`, creating the directory if needed.
pub fn create_local_store(root: &Path) -> Result<Arc<dyn ObjectStore>> {
    if !root.exists() {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create directory {}", root.display()))?;
    }
    tracing::debug!("Creating LocalFileSystem store at: {}", root.display());
    let store = LocalFileSystem::new_with_prefix(root)
        .with_context(|| format!("Failed to open local store at {}", root.display()))?;
    Ok(Arc::new(store))
}
