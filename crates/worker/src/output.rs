//! Writing job outputs to disk.

use std::path::{Path, PathBuf};

use comfybot_core::types::Artifacts;

/// File name for the `index`-th output of `node`, with an extension
/// sniffed from the data. Unrecognised data gets `.bin`.
pub fn file_name(stem: &str, node: &str, index: usize, data: &[u8]) -> String {
    let ext = image::guess_format(data)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin");
    format!("{stem}_{node}_{index}.{ext}")
}

/// Write every artifact under `dir` and return the paths written.
pub async fn write_artifacts(
    dir: &Path,
    stem: &str,
    artifacts: &Artifacts,
) -> std::io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (node, files) in artifacts {
        for (index, data) in files.iter().enumerate() {
            let path = dir.join(file_name(stem, node, index, data));
            tokio::fs::write(&path, data).await?;
            written.push(path);
        }
    }
    Ok(written)
}
