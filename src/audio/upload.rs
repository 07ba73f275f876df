//! Upload side of a recording: transport seams and per-session accounting.

use std::time::Duration;
use url::Url;

use super::wav::{self, WavFormat, WAV_HEADER_LEN};
use crate::error::{StreamError, StreamResult};

/// An established upload connection. Every call carries its own timeout.
pub trait UploadTransport: Send {
    fn send_binary(&mut self, data: &[u8], timeout: Duration) -> StreamResult<()>;

    /// Closing is the end-of-stream signal for the remote side.
    fn close(&mut self, timeout: Duration);
}

/// Result of waiting on a connection attempt.
pub enum ConnectPoll {
    Pending,
    Ready(Box<dyn UploadTransport>),
    Failed(StreamError),
}

/// A connection attempt running in the background.
pub trait PendingUpload: Send {
    /// Wait at most `timeout` for the attempt to settle.
    fn wait(&mut self, timeout: Duration) -> ConnectPoll;
}

pub trait UploadConnector: Send {
    /// Start connecting without blocking the caller.
    fn connect(&mut self, url: &Url) -> Box<dyn PendingUpload>;
}

/// Build `<recorder>/ws-stream?chatId=..&auth=..`, mapping `https` to `wss`
/// and `http` (or no scheme) to `ws`.
pub fn upload_url(recorder_url: &str, channel_id: &str, auth_token: &str) -> StreamResult<Url> {
    let (scheme, rest) = if let Some(rest) = recorder_url.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = recorder_url.strip_prefix("http://") {
        ("ws", rest)
    } else {
        ("ws", recorder_url)
    };
    let mut url = Url::parse(&format!("{}://{}/ws-stream", scheme, rest.trim_end_matches('/')))
        .map_err(|e| StreamError::Misconfiguration(format!("recorder url '{}': {}", recorder_url, e)))?;
    url.query_pairs_mut()
        .append_pair("chatId", channel_id)
        .append_pair("auth", auth_token);
    Ok(url)
}

/// One recording's upload: transport, container header and byte accounting.
///
/// The header declares `max_bytes` as its payload length. The real length is
/// unknown when the header goes out, so the remote side must tolerate a
/// shorter stream that ends with the connection close.
pub struct UploadSession {
    transport: Box<dyn UploadTransport>,
    header: [u8; WAV_HEADER_LEN],
    header_sent: bool,
    sent: usize,
    max_bytes: usize,
    send_timeout: Duration,
}

impl UploadSession {
    pub fn new(
        transport: Box<dyn UploadTransport>,
        format: WavFormat,
        max_bytes: usize,
        send_timeout: Duration,
    ) -> Self {
        let declared = u32::try_from(max_bytes).unwrap_or(u32::MAX);
        Self {
            transport,
            header: wav::build_header(&format, declared),
            header_sent: false,
            sent: 0,
            max_bytes,
            send_timeout,
        }
    }

    pub fn send_header(&mut self) -> StreamResult<()> {
        if self.header_sent {
            return Ok(());
        }
        self.transport.send_binary(&self.header, self.send_timeout)?;
        self.header_sent = true;
        Ok(())
    }

    /// Send one PCM chunk, preceded by the header if it has not gone out yet.
    pub fn send_chunk(&mut self, pcm: &[u8]) -> StreamResult<()> {
        self.send_header()?;
        if pcm.is_empty() {
            return Ok(());
        }
        self.transport.send_binary(pcm, self.send_timeout)?;
        self.sent += pcm.len();
        Ok(())
    }

    /// Payload bytes sent so far, header excluded.
    pub fn payload_bytes(&self) -> usize {
        self.sent
    }

    /// Bytes still allowed before the duration cap.
    pub fn remaining(&self) -> usize {
        self.max_bytes.saturating_sub(self.sent)
    }

    pub fn cap_reached(&self) -> bool {
        self.sent >= self.max_bytes
    }

    /// Close the transport and return the payload byte count.
    pub fn close(mut self) -> usize {
        self.transport.close(self.send_timeout);
        self.sent
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transports for exercising the capture pipeline.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Instant;

    #[derive(Default)]
    pub struct WireLog {
        pub urls: Vec<String>,
        pub messages: Vec<Vec<u8>>,
        pub closed: bool,
    }

    impl WireLog {
        pub fn payload_bytes(&self) -> usize {
            self.messages.iter().skip(1).map(Vec::len).sum()
        }
    }

    pub struct RecordingTransport {
        pub log: Arc<Mutex<WireLog>>,
        pub fail_after: Option<usize>,
    }

    impl UploadTransport for RecordingTransport {
        fn send_binary(&mut self, data: &[u8], _timeout: Duration) -> StreamResult<()> {
            let mut log = self.log.lock();
            if let Some(n) = self.fail_after {
                if log.messages.len() >= n {
                    return Err(StreamError::Transport("connection reset".into()));
                }
            }
            log.messages.push(data.to_vec());
            Ok(())
        }

        fn close(&mut self, _timeout: Duration) {
            self.log.lock().closed = true;
        }
    }

    /// How a scripted connection attempt behaves.
    #[derive(Clone, Copy)]
    pub enum ConnectScript {
        /// Ready after the given delay.
        ReadyAfter(Duration),
        Never,
        Refused,
    }

    pub struct ScriptedConnector {
        pub script: ConnectScript,
        pub log: Arc<Mutex<WireLog>>,
        pub fail_after: Option<usize>,
    }

    struct ScriptedPending {
        ready_at: Option<Instant>,
        refused: bool,
        transport: Option<RecordingTransport>,
    }

    impl PendingUpload for ScriptedPending {
        fn wait(&mut self, timeout: Duration) -> ConnectPoll {
            if self.refused {
                return ConnectPoll::Failed(StreamError::Transport("connection refused".into()));
            }
            let Some(ready_at) = self.ready_at else {
                std::thread::sleep(timeout);
                return ConnectPoll::Pending;
            };
            let now = Instant::now();
            if now + timeout < ready_at {
                std::thread::sleep(timeout);
                return ConnectPoll::Pending;
            }
            std::thread::sleep(ready_at.saturating_duration_since(now));
            match self.transport.take() {
                Some(t) => ConnectPoll::Ready(Box::new(t)),
                None => ConnectPoll::Failed(StreamError::Transport("already taken".into())),
            }
        }
    }

    impl UploadConnector for ScriptedConnector {
        fn connect(&mut self, url: &Url) -> Box<dyn PendingUpload> {
            self.log.lock().urls.push(url.to_string());
            let (ready_at, refused) = match self.script {
                ConnectScript::ReadyAfter(d) => (Some(Instant::now() + d), false),
                ConnectScript::Never => (None, false),
                ConnectScript::Refused => (None, true),
            };
            Box::new(ScriptedPending {
                ready_at,
                refused,
                transport: Some(RecordingTransport {
                    log: self.log.clone(),
                    fail_after: self.fail_after,
                }),
            })
        }
    }
}
