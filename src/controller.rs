use crate::audio::{Activity, CaptureEngine, PlaybackEngine};
use crate::config::ConfigStore;
use crate::control_bridge::{ControlBridge, ControlEvent};
use crate::gui_bridge::{DisplayState, StatusReporter};
use crate::protocol::{ControlMessage, StatusReport};
use std::sync::Arc;

/// Routes dispatcher and button events to the audio engines.
pub struct CoreController {
    config: ConfigStore,
    activity: Arc<Activity>,
    display: Arc<dyn StatusReporter>,
    playback: PlaybackEngine,
    capture: CaptureEngine,
    control_bridge: Arc<ControlBridge>,
}

impl CoreController {
    pub fn new(
        config: ConfigStore,
        activity: Arc<Activity>,
        display: Arc<dyn StatusReporter>,
        playback: PlaybackEngine,
        capture: CaptureEngine,
        control_bridge: Arc<ControlBridge>,
    ) -> Self {
        Self {
            config,
            activity,
            display,
            playback,
            capture,
            control_bridge,
        }
    }

    pub async fn handle_control_event(&mut self, event: ControlEvent) {
        let ControlEvent::Message(text) = event;
        let msg: ControlMessage = match serde_json::from_str(&text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Ignoring malformed control message ({}): {}", e, text);
                return;
            }
        };

        match (msg.msg_type.as_str(), msg.action.as_deref()) {
            ("audio", Some("play" | "replay")) => match msg.message_id.as_deref() {
                Some(id) if !id.is_empty() => {
                    log::info!("Play request for {}", id);
                    // The recording owns the screen until it ends.
                    if !self.activity.is_recording() {
                        self.display
                            .set_state(DisplayState::Processing, "New message!\nDownloading...");
                    }
                    if !self.playback.enqueue(id) {
                        self.restore_idle();
                    }
                }
                _ => log::warn!("Play request without messageId"),
            },
            ("audio", Some("stop")) => {
                log::info!("Stop requested");
                self.playback.stop();
            }
            ("button", Some("press")) => {
                if let Err(e) = self.capture.on_trigger_press() {
                    log::info!("Trigger press rejected: {}", e);
                }
            }
            ("button", Some("release")) => {
                self.capture.on_trigger_release();
            }
            ("chat", Some("link")) => match msg.chat_id.as_deref() {
                Some(chat) if !chat.is_empty() => {
                    log::info!("Linked to chat {}", chat);
                    self.config.set_channel(Some(chat));
                    self.restore_idle();
                }
                _ => log::warn!("Chat link without chatId"),
            },
            ("chat", Some("unlink")) => {
                log::info!("Chat unlinked");
                self.config.set_channel(None);
                self.restore_idle();
            }
            ("system", Some("status")) => self.publish_status().await,
            (other, action) => {
                log::debug!("Unhandled control message: {} {:?}", other, action);
            }
        }
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::new(self.activity.is_playing(), self.activity.is_recording())
    }

    pub async fn publish_status(&self) {
        let report = match serde_json::to_string(&self.status()) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode status: {}", e);
                return;
            }
        };
        if let Err(e) = self.control_bridge.send_message(&report).await {
            log::warn!("Failed to send status: {}", e);
        }
    }

    /// Stop whatever session is running so the workers can wind down.
    pub fn shutdown(&self) {
        self.playback.stop();
        self.capture.on_trigger_release();
    }

    // Only redraw when no session owns the screen.
    fn restore_idle(&self) {
        if self.activity.is_playing() || self.activity.is_recording() {
            return;
        }
        let net = self.config.get_config();
        self.display.set_state(DisplayState::Idle, &net.idle_label());
    }
}
