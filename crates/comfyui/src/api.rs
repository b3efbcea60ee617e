//! HTTP side of the backend: queueing prompts, reading their history,
//! downloading output files and listing the installed node classes.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::history::{History, OutputDescriptor};

#[derive(Clone)]
pub struct ComfyUIApi {
    http: reqwest::Client,
    base_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct QueuedPrompt {
    pub prompt_id: String,
    /// Queue position at submission time. Older backends omit it.
    #[serde(default)]
    pub number: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The backend could not be reached or the body could not be read.
    #[error("Request to backend failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("Backend answered {status}: {body}")]
    ApiError { status: u16, body: String },
}

impl ComfyUIApi {
    /// `base_url` is the backend's HTTP root, e.g. `http://127.0.0.1:8188`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn api_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Queue a workflow under `client_id`, so that its events are sent
    /// to the stream opened with the same id.
    pub async fn queue_prompt(
        &self,
        prompt: &serde_json::Value,
        client_id: &str,
    ) -> Result<QueuedPrompt, ComfyUIApiError> {
        let body = serde_json::json!({ "prompt": prompt, "client_id": client_id });
        read_json(self.http.post(self.url("/prompt")).json(&body)).await
    }

    /// History for one prompt. A prompt the backend has no record of
    /// yields an empty document rather than an error.
    pub async fn get_history(&self, prompt_id: &str) -> Result<History, ComfyUIApiError> {
        read_json(self.http.get(self.url(&format!("/history/{prompt_id}")))).await
    }

    /// Raw bytes of one output file.
    pub async fn view(&self, output: &OutputDescriptor) -> Result<Bytes, ComfyUIApiError> {
        let request = self.http.get(self.url("/view")).query(&[
            ("filename", output.filename.as_str()),
            ("subfolder", output.subfolder.as_str()),
            ("type", output.storage_type.as_str()),
        ]);
        Ok(send_checked(request).await?.bytes().await?)
    }

    /// Node-class listing from `GET /object_info`.
    pub async fn system_info(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        read_json(self.http.get(self.url("/object_info"))).await
    }
}

async fn send_checked(
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ComfyUIApiError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ComfyUIApiError::ApiError {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, ComfyUIApiError> {
    Ok(send_checked(request).await?.json::<T>().await?)
}

/// Checkpoint file names offered by the `CheckpointLoaderSimple` node.
pub fn checkpoint_names(object_info: &serde_json::Value) -> Vec<String> {
    let Some(names) = object_info
        .pointer("/CheckpointLoaderSimple/input/required/ckpt_name/0")
        .and_then(serde_json::Value::as_array)
    else {
        return Vec::new();
    };
    names
        .iter()
        .filter_map(|name| name.as_str().map(str::to_string))
        .collect()
}
