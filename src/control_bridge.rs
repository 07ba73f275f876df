use crate::config::BridgeConfig;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Message(String),
}

/// UDP link to the dispatcher process: MQTT audio events, button edges and
/// chat link changes come in, status reports go out.
pub struct ControlBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<ControlEvent>,
    buffer_size: usize,
}

impl ControlBridge {
    pub async fn new(config: &BridgeConfig, tx: mpsc::Sender<ControlEvent>) -> anyhow::Result<Self> {
        let socket =
            UdpSocket::bind(format!("{}:{}", config.local_ip, config.local_port)).await?;
        let target_addr = format!("{}:{}", config.remote_ip, config.remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
            buffer_size: config.buffer_size,
        })
    }

    pub fn local_port(&self) -> anyhow::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            match std::str::from_utf8(&buf[..len]) {
                Ok(msg) => {
                    if let Err(e) = self.tx.send(ControlEvent::Message(msg.to_string())).await {
                        log::error!("Failed to forward control event: {}", e);
                        break;
                    }
                }
                Err(_) => log::warn!("Dropping non-UTF-8 control datagram ({} bytes)", len),
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
