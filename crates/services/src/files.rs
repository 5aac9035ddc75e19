use serde::Serialize;
use std::path::{Path, PathBuf};

/// Pretty-print `value` into `dir/name`, creating `dir` if needed.
pub(crate) async fn write_json<T: Serialize>(
    dir: &Path,
    name: &str,
    value: &T,
) -> std::io::Result<PathBuf> {
    let body = serde_json::to_string_pretty(value)?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, body).await?;
    Ok(path)
}
