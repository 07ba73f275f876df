use crate::config::BridgeConfig;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Screen states the display process knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    /// Connected and idle
    Idle,
    Recording,
    Playing,
    Processing,
    Error,
}

/// The "report a state/label" collaborator used by both engines.
pub trait StatusReporter: Send + Sync {
    fn set_state(&self, state: DisplayState, label: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayUpdate {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub state: DisplayState,
    pub text: String,
}

impl DisplayUpdate {
    pub fn new(state: DisplayState, text: &str) -> Self {
        Self {
            msg_type: "state",
            state,
            text: text.to_string(),
        }
    }
}

/// Engine-side handle. Never blocks: a full queue drops the update, the next
/// transition overwrites it on screen anyway.
#[derive(Clone)]
pub struct DisplayHandle {
    tx: mpsc::Sender<DisplayUpdate>,
}

impl DisplayHandle {
    pub fn new(tx: mpsc::Sender<DisplayUpdate>) -> Self {
        Self { tx }
    }
}

impl StatusReporter for DisplayHandle {
    fn set_state(&self, state: DisplayState, label: &str) {
        if let Err(e) = self.tx.try_send(DisplayUpdate::new(state, label)) {
            log::warn!("Display update dropped ({:?}): {}", state, e);
        }
    }
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &BridgeConfig) -> anyhow::Result<Self> {
        let socket =
            UdpSocket::bind(format!("{}:{}", config.local_ip, config.local_port)).await?;
        let target_addr = format!("{}:{}", config.remote_ip, config.remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
        })
    }

    /// Forward display updates to the GUI process until every handle is dropped.
    pub async fn run(&self, mut rx: mpsc::Receiver<DisplayUpdate>) -> anyhow::Result<()> {
        while let Some(update) = rx.recv().await {
            let msg = serde_json::to_string(&update)?;
            if let Err(e) = self.send_message(&msg).await {
                log::warn!("Failed to send to GUI: {}", e);
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_serializes_for_gui() {
        let json = serde_json::to_string(&DisplayUpdate::new(DisplayState::Playing, "Playing...")).unwrap();
        assert_eq!(json, r#"{"type":"state","state":"playing","text":"Playing..."}"#);
    }

    #[tokio::test]
    async fn handle_never_blocks_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = DisplayHandle::new(tx);
        handle.set_state(DisplayState::Recording, "Recording...");
        handle.set_state(DisplayState::Idle, "dropped");
        let first = rx.recv().await.unwrap();
        assert_eq!(first.state, DisplayState::Recording);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bridge_forwards_updates_over_udp() {
        let gui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = gui.local_addr().unwrap().port();
        let cfg = BridgeConfig {
            local_port: 0,
            remote_port: port,
            local_ip: "127.0.0.1",
            remote_ip: "127.0.0.1",
            buffer_size: 1024,
        };
        let bridge = GuiBridge::new(&cfg).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        DisplayHandle::new(tx).set_state(DisplayState::Processing, "Downloading...");
        bridge.run(rx).await.unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = gui.recv_from(&mut buf).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(v["state"], "processing");
        assert_eq!(v["text"], "Downloading...");
    }
}
