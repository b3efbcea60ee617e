//! Decoding of event-stream frames.
//!
//! Text frames carry `{"type": "<kind>", "data": {...}}`. Binary frames
//! carry a preview image behind a fixed header. Only the kinds that drive
//! a job's lifecycle are decoded; everything else (`status`, `executed`,
//! custom node chatter) is skipped.

use bytes::Bytes;
use serde::Deserialize;

/// Bytes of event-type and image-format fields ahead of the image in a
/// binary preview frame.
pub const PREVIEW_HEADER_LEN: usize = 8;

#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// `execution_start`
    ExecutionStart(PromptStarted),
    /// `execution_cached`
    ExecutionCached(CachedNodes),
    /// `executing`; `node == None` marks the end of the prompt.
    Executing(NodeExecuting),
    /// `progress`
    Progress(StepProgress),
    /// `execution_error`
    ExecutionError(ExecutionFailed),
}

impl ComfyUIMessage {
    /// The prompt this message belongs to, when the backend tagged it.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionStart(m) => Some(&m.prompt_id),
            Self::ExecutionCached(m) => Some(&m.prompt_id),
            Self::Executing(m) => Some(&m.prompt_id),
            Self::Progress(m) => m.prompt_id.as_deref(),
            Self::ExecutionError(m) => Some(&m.prompt_id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptStarted {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CachedNodes {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeExecuting {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Sampler step counter for the node currently running.
///
/// Older backends send no `prompt_id`; such samples can only be
/// attributed by the receiver's own state.
#[derive(Debug, Clone, Deserialize)]
pub struct StepProgress {
    pub value: i64,
    pub max: i64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl StepProgress {
    /// `value / max` clamped into `[0.0, 1.0]`; `0.0` when `max` is not
    /// positive.
    pub fn fraction(&self) -> f32 {
        if self.max <= 0 {
            return 0.0;
        }
        (self.value as f64 / self.max as f64).clamp(0.0, 1.0) as f32
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionFailed {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// Decode a text frame.
///
/// `Ok(None)` for well-formed messages of a kind nobody consumes; `Err`
/// for invalid JSON or a consumed kind whose `data` does not fit.
pub fn parse_message(text: &str) -> Result<Option<ComfyUIMessage>, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;
    let message = match kind.as_str() {
        "execution_start" => ComfyUIMessage::ExecutionStart(serde_json::from_value(data)?),
        "execution_cached" => ComfyUIMessage::ExecutionCached(serde_json::from_value(data)?),
        "executing" => ComfyUIMessage::Executing(serde_json::from_value(data)?),
        "progress" => ComfyUIMessage::Progress(serde_json::from_value(data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(serde_json::from_value(data)?),
        _ => return Ok(None),
    };
    Ok(Some(message))
}

/// Image bytes of a binary preview frame, or `None` if the frame holds
/// nothing past the header.
pub fn preview_payload(frame: &Bytes) -> Option<Bytes> {
    (frame.len() > PREVIEW_HEADER_LEN).then(|| frame.slice(PREVIEW_HEADER_LEN..))
}
