//! Error taxonomy shared by the playback and capture pipelines.
//!
//! Every variant is handled at session scope: it ends (or, for the
//! recoverable ones, merely annotates) the current play/record session and
//! never crosses the engine boundary.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Connect/open failure of the fetch or upload transport, or a send error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status or malformed response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unparseable or padding frame; the frame is skipped.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Ring push timed out with the buffer full; the remainder was dropped.
    #[error("Ring buffer overflow, dropped {dropped} bytes")]
    OverflowDrop { dropped: usize },

    #[error("Timeout: {0}")]
    Timeout(String),

    /// No upload destination configured. Rejects the trigger press.
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Another session holds the device; the start request is a no-op.
    #[error("Device busy with another audio session")]
    Busy,

    /// Sink or microphone failure.
    #[error("Audio device error: {0}")]
    Device(String),
}

impl StreamError {
    /// Recoverable errors let the enclosing loop continue with the next step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::Decode(_) | StreamError::OverflowDrop { .. } | StreamError::Timeout(_)
        )
    }
}

impl From<alsa::Error> for StreamError {
    fn from(e: alsa::Error) -> Self {
        StreamError::Device(e.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                StreamError::Timeout(e.to_string())
            }
            _ => StreamError::Transport(e.to_string()),
        }
    }
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;
