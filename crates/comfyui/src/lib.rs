//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, the shared event-stream transport
//! with its listener registry and reconnection policy, and HTTP API
//! wrappers for submitting prompts and fetching their outputs.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod reconnect;
pub mod registry;
pub mod transport;

pub use api::{ComfyUIApi, ComfyUIApiError};
pub use client::{ComfyUIClient, ComfyUIClientError, EventSource, Frame, FrameStream, KeepAliveConfig};
pub use registry::{FrameListener, ListenerError, ListenerGuard, ListenerId};
pub use transport::Transport;
