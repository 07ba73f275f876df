//! Websocket upload transport for recordings.
//!
//! The connection lives on the tokio runtime; the capture-upload thread
//! drives it through a runtime handle with a timeout on every call.

use futures_util::SinkExt;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::audio::{ConnectPoll, PendingUpload, UploadConnector, UploadTransport};
use crate::error::{StreamError, StreamResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnector {
    handle: Handle,
}

impl WsConnector {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl UploadConnector for WsConnector {
    fn connect(&mut self, url: &Url) -> Box<dyn PendingUpload> {
        let (tx, rx) = std_mpsc::sync_channel(1);
        let target = url.to_string();
        let task = self.handle.spawn(async move {
            let result = connect_async(target.as_str())
                .await
                .map(|(ws, _)| ws)
                .map_err(|e| StreamError::Transport(e.to_string()));
            let _ = tx.send(result);
        });
        Box::new(WsPending {
            handle: self.handle.clone(),
            rx,
            task,
        })
    }
}

struct WsPending {
    handle: Handle,
    rx: std_mpsc::Receiver<StreamResult<WsStream>>,
    task: JoinHandle<()>,
}

impl PendingUpload for WsPending {
    fn wait(&mut self, timeout: Duration) -> ConnectPoll {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(stream)) => {
                log::info!("Upload websocket connected");
                ConnectPoll::Ready(Box::new(WsTransport {
                    handle: self.handle.clone(),
                    stream,
                }))
            }
            Ok(Err(e)) => ConnectPoll::Failed(e),
            Err(std_mpsc::RecvTimeoutError::Timeout) => ConnectPoll::Pending,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                ConnectPoll::Failed(StreamError::Transport("connect task ended".into()))
            }
        }
    }
}

impl Drop for WsPending {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct WsTransport {
    handle: Handle,
    stream: WsStream,
}

impl UploadTransport for WsTransport {
    fn send_binary(&mut self, data: &[u8], timeout: Duration) -> StreamResult<()> {
        let send = self.stream.send(Message::Binary(data.to_vec().into()));
        // The timer has to be created inside the runtime, not on this thread.
        match self.handle.block_on(async { tokio::time::timeout(timeout, send).await }) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StreamError::Transport(e.to_string())),
            Err(_) => Err(StreamError::Timeout(format!(
                "websocket send of {} B exceeded {} ms",
                data.len(),
                timeout.as_millis()
            ))),
        }
    }

    fn close(&mut self, timeout: Duration) {
        let close = self.stream.close(None);
        match self.handle.block_on(async { tokio::time::timeout(timeout, close).await }) {
            Ok(Ok(())) => log::info!("Upload websocket closed"),
            Ok(Err(e)) => log::warn!("Websocket close: {}", e),
            Err(_) => log::warn!("Websocket close timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{CaptureOutcome, MicInput};
    use crate::audio::{Activity, CaptureEngine, EngineContext};
    use crate::config::{CaptureConfig, ConfigStore, NetworkConfig};
    use crate::gui_bridge::testing::RecordingDisplay;
    use futures_util::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn collect_binary(listener: TcpListener, tx: std_mpsc::Sender<Vec<Vec<u8>>>) -> impl Future<Output = ()> {
        async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut got = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Binary(b) => got.push(b.to_vec()),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            let _ = tx.send(got);
        }
    }

    /// Stereo mic producing a fixed number of frames, then silence.
    struct FixedMic {
        frames_left: usize,
        delivered: Arc<AtomicUsize>,
    }

    impl MicInput for FixedMic {
        fn start(&mut self) -> StreamResult<()> {
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], timeout: Duration) -> StreamResult<usize> {
            if self.frames_left == 0 {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                return Ok(0);
            }
            let frames = (buf.len() / 4).min(self.frames_left);
            buf[..frames * 4].fill(7);
            self.frames_left -= frames;
            self.delivered.fetch_add(frames * 2, Ordering::SeqCst);
            Ok(frames * 4)
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn uploads_binary_messages_until_close() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = std_mpsc::channel();
        rt.spawn(collect_binary(listener, tx));

        let mut connector = WsConnector::new(rt.handle().clone());
        let url = Url::parse(&format!("ws://127.0.0.1:{}/ws-stream?chatId=c&auth=k", port)).unwrap();
        let mut pending = connector.connect(&url);
        let mut transport = match pending.wait(Duration::from_secs(5)) {
            ConnectPoll::Ready(t) => t,
            _ => panic!("websocket did not connect"),
        };
        transport.send_binary(&[1, 2, 3], Duration::from_secs(1)).unwrap();
        transport.send_binary(&[4, 5], Duration::from_secs(1)).unwrap();
        transport.close(Duration::from_secs(1));

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, vec![vec![1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn refused_connection_fails_the_attempt() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut connector = WsConnector::new(rt.handle().clone());
        let url = Url::parse(&format!("ws://127.0.0.1:{}/ws-stream", port)).unwrap();
        let mut pending = connector.connect(&url);
        assert!(matches!(
            pending.wait(Duration::from_secs(5)),
            ConnectPoll::Failed(StreamError::Transport(_))
        ));
    }

    #[test]
    fn capture_worker_streams_over_a_real_websocket() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = std_mpsc::channel();
        rt.spawn(collect_binary(listener, tx));

        let activity = Arc::new(Activity::new());
        let ctx = EngineContext {
            activity: activity.clone(),
            display: Arc::new(RecordingDisplay::default()),
            config: ConfigStore::new(NetworkConfig {
                device_id: "doll".into(),
                recorder_url: format!("http://127.0.0.1:{}", port),
                auth_token: "k".into(),
                channel_id: "c".into(),
                ..Default::default()
            }),
        };
        let delivered = Arc::new(AtomicUsize::new(0));
        let mic = FixedMic {
            frames_left: 4000,
            delivered: delivered.clone(),
        };
        let cfg = CaptureConfig {
            pop_timeout: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let (engine, workers) = CaptureEngine::new(
            cfg,
            Box::new(mic),
            Box::new(WsConnector::new(rt.handle().clone())),
            ctx,
        );
        workers.spawn().unwrap();

        engine.on_trigger_press().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while delivered.load(Ordering::SeqCst) < 8000 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(engine.on_trigger_release());
        assert!(engine.wait_idle(Duration::from_secs(10)));

        let stats = engine.last_stats().unwrap();
        assert_eq!(stats.outcome, CaptureOutcome::Completed);
        assert_eq!(stats.bytes_sent, 8000);
        assert!(!activity.is_recording());

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got[0].len(), crate::audio::wav::WAV_HEADER_LEN);
        let payload: Vec<u8> = got[1..].concat();
        assert_eq!(payload, vec![7u8; 8000]);
    }
}
