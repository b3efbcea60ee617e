//! Fetch a finished prompt's outputs.

use comfybot_comfyui::ComfyUIApi;
use comfybot_core::types::Artifacts;

use crate::error::RetrievalError;

/// Download every output file recorded for `prompt_id`, grouped by the
/// node that produced it.
///
/// Every node listed in the history appears in the result, including
/// nodes with no files. Files keep the order the backend listed them.
/// The first failed download aborts the whole retrieval.
pub async fn retrieve_artifacts(
    api: &ComfyUIApi,
    prompt_id: &str,
) -> Result<Artifacts, RetrievalError> {
    let mut history = api
        .get_history(prompt_id)
        .await
        .map_err(RetrievalError::History)?;

    let entry = history
        .remove(prompt_id)
        .ok_or_else(|| RetrievalError::MissingHistory(prompt_id.to_string()))?;

    let mut artifacts = Artifacts::new();
    for (node_id, output) in entry.outputs {
        let mut files = Vec::new();
        for descriptor in output.descriptors() {
            let bytes = api
                .view(descriptor)
                .await
                .map_err(|source| RetrievalError::Artifact {
                    filename: descriptor.filename.clone(),
                    source,
                })?;
            tracing::debug!(
                prompt_id,
                node = %node_id,
                filename = %descriptor.filename,
                size = bytes.len(),
                "Downloaded output",
            );
            files.push(bytes);
        }
        artifacts.insert(node_id, files);
    }

    Ok(artifacts)
}
