/// Source file discovery
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{GridError, Result};

/// Regular files directly inside `dir`, sorted by path
pub fn discover_sources<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(GridError::ResourceNotFound(format!(
            "input directory {} was not found",
            dir.display()
        )));
    }

    let mut sources = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            sources.push(path);
        }
    }
    sources.sort();

    debug!("Discovered {} sources in {}", sources.len(), dir.display());
    Ok(sources)
}

/// `<base>_<resolution>.csv`, with any `.csv` suffix on the base removed
pub fn output_path(base: &str, resolution: u32) -> PathBuf {
    let base = base.strip_suffix(".csv").unwrap_or(base);
    PathBuf::from(format!("{}_{}.csv", base, resolution))
}
