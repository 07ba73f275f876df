use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Remote endpoints and identity. The only part of the configuration that can
/// change while the device runs (chat link/unlink).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    pub device_id: String,
    /// Base URL of the message API (`<server>/messages/<id>/audio`)
    pub server_url: String,
    /// Base URL of the stream recorder (`<recorder>/ws-stream`)
    pub recorder_url: String,
    pub auth_token: String,
    /// Chat the device is linked to; empty means no upload destination.
    pub channel_id: String,
}

impl NetworkConfig {
    pub fn has_upload_destination(&self) -> bool {
        !self.channel_id.is_empty() && !self.recorder_url.is_empty()
    }

    /// Text shown by the display when no session is active.
    pub fn idle_label(&self) -> String {
        let doll: String = self.device_id.chars().take(36).collect();
        if self.channel_id.is_empty() {
            format!("Doll ID:\n{}\nNo chat linked", doll)
        } else {
            let chat: String = self.channel_id.chars().take(36).collect();
            format!("Doll ID:\n{}\nChat ID:\n{}", doll, chat)
        }
    }
}

/// Local UDP bridge endpoints (GUI process, control process).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub local_port: u16,
    pub remote_port: u16,
    pub local_ip: &'static str,
    pub remote_ip: &'static str,
    pub buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// ALSA playback device name
    pub device: String,
    /// Depth of the pending play request queue
    pub queue_depth: usize,
    /// Message ids are truncated to `max_id_len - 1` bytes
    pub max_id_len: usize,
    /// Compressed-byte accumulation buffer capacity
    pub accum_bytes: usize,
    pub write_timeout: Duration,
    /// Pause before closing the sink so queued samples can play out
    pub drain_delay: Duration,
    pub fetch_connect_timeout: Duration,
    /// Bounds a whole download; also the longest message that can play
    pub fetch_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            queue_depth: 4,
            max_id_len: 80,
            accum_bytes: 8192,
            write_timeout: Duration::from_millis(2000),
            drain_delay: Duration::from_millis(150),
            fetch_connect_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// ALSA capture device name
    pub device: String,
    pub sample_rate: u32,
    /// Channels delivered by the mic interface (interleaved)
    pub mic_channels: u32,
    /// Channel index kept when downmixing to mono
    pub keep_channel: u32,
    pub max_seconds: u32,
    /// Recordings shorter than this only produce an advisory
    pub min_seconds: u32,
    pub read_bytes: usize,
    pub ring_bytes: usize,
    pub send_chunk: usize,
    pub push_timeout: Duration,
    pub pop_timeout: Duration,
    pub send_timeout: Duration,
    pub connect_timeout: Duration,
    pub reader_grace: Duration,
}

impl CaptureConfig {
    /// Mono 16-bit bytes per second of audio.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * 2
    }

    /// Duration cap in bytes, also the declared length of the upload header.
    pub fn max_bytes(&self) -> usize {
        self.max_seconds as usize * self.bytes_per_second()
    }

    pub fn min_bytes(&self) -> usize {
        self.min_seconds as usize * self.bytes_per_second()
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 16000,
            mic_channels: 2,
            keep_channel: 1,
            max_seconds: 20,
            min_seconds: 1,
            read_bytes: 2048,
            ring_bytes: 128 * 1024,
            send_chunk: 4096,
            push_timeout: Duration::from_millis(50),
            pop_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(10000),
            reader_grace: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub gui: BridgeConfig,
    pub control: BridgeConfig,
    pub playback: PlaybackConfig,
    pub capture: CaptureConfig,
}

fn parse<T: std::str::FromStr>(value: &'static str, name: &'static str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Failed to parse {}", name))
}

fn millis(value: &'static str, name: &'static str) -> Result<Duration, String> {
    parse::<u64>(value, name).map(Duration::from_millis)
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, String> {
        Ok(Self {
            network: NetworkConfig {
                device_id: env!("DEVICE_ID").to_string(),
                server_url: env!("SERVER_URL").to_string(),
                recorder_url: env!("RECORDER_URL").to_string(),
                auth_token: env!("AUTH_TOKEN").to_string(),
                channel_id: env!("CHANNEL_ID").to_string(),
            },
            gui: BridgeConfig {
                local_port: parse(env!("GUI_LOCAL_PORT"), "GUI_LOCAL_PORT")?,
                remote_port: parse(env!("GUI_REMOTE_PORT"), "GUI_REMOTE_PORT")?,
                local_ip: env!("GUI_LOCAL_IP"),
                remote_ip: env!("GUI_REMOTE_IP"),
                buffer_size: parse(env!("GUI_BUFFER_SIZE"), "GUI_BUFFER_SIZE")?,
            },
            control: BridgeConfig {
                local_port: parse(env!("CONTROL_LOCAL_PORT"), "CONTROL_LOCAL_PORT")?,
                remote_port: parse(env!("CONTROL_REMOTE_PORT"), "CONTROL_REMOTE_PORT")?,
                local_ip: env!("CONTROL_LOCAL_IP"),
                remote_ip: env!("CONTROL_REMOTE_IP"),
                buffer_size: parse(env!("CONTROL_BUFFER_SIZE"), "CONTROL_BUFFER_SIZE")?,
            },
            playback: PlaybackConfig {
                device: env!("PLAYBACK_DEVICE").to_string(),
                queue_depth: parse(env!("PLAYBACK_QUEUE_DEPTH"), "PLAYBACK_QUEUE_DEPTH")?,
                max_id_len: parse(env!("PLAYBACK_MAX_ID_LEN"), "PLAYBACK_MAX_ID_LEN")?,
                accum_bytes: parse(env!("PLAYBACK_ACCUM_BYTES"), "PLAYBACK_ACCUM_BYTES")?,
                write_timeout: millis(env!("PLAYBACK_WRITE_TIMEOUT_MS"), "PLAYBACK_WRITE_TIMEOUT_MS")?,
                drain_delay: millis(env!("PLAYBACK_DRAIN_MS"), "PLAYBACK_DRAIN_MS")?,
                fetch_connect_timeout: millis(
                    env!("PLAYBACK_FETCH_CONNECT_TIMEOUT_MS"),
                    "PLAYBACK_FETCH_CONNECT_TIMEOUT_MS",
                )?,
                fetch_timeout: millis(env!("PLAYBACK_FETCH_TIMEOUT_MS"), "PLAYBACK_FETCH_TIMEOUT_MS")?,
            },
            capture: CaptureConfig {
                device: env!("CAPTURE_DEVICE").to_string(),
                sample_rate: parse(env!("CAPTURE_SAMPLE_RATE"), "CAPTURE_SAMPLE_RATE")?,
                mic_channels: parse(env!("CAPTURE_MIC_CHANNELS"), "CAPTURE_MIC_CHANNELS")?,
                keep_channel: parse(env!("CAPTURE_KEEP_CHANNEL"), "CAPTURE_KEEP_CHANNEL")?,
                max_seconds: parse(env!("CAPTURE_MAX_SECONDS"), "CAPTURE_MAX_SECONDS")?,
                min_seconds: parse(env!("CAPTURE_MIN_SECONDS"), "CAPTURE_MIN_SECONDS")?,
                read_bytes: parse(env!("CAPTURE_READ_BYTES"), "CAPTURE_READ_BYTES")?,
                ring_bytes: parse(env!("CAPTURE_RING_BYTES"), "CAPTURE_RING_BYTES")?,
                send_chunk: parse(env!("CAPTURE_SEND_CHUNK"), "CAPTURE_SEND_CHUNK")?,
                push_timeout: millis(env!("CAPTURE_PUSH_TIMEOUT_MS"), "CAPTURE_PUSH_TIMEOUT_MS")?,
                pop_timeout: millis(env!("CAPTURE_POP_TIMEOUT_MS"), "CAPTURE_POP_TIMEOUT_MS")?,
                send_timeout: millis(env!("CAPTURE_SEND_TIMEOUT_MS"), "CAPTURE_SEND_TIMEOUT_MS")?,
                connect_timeout: millis(env!("CAPTURE_CONNECT_TIMEOUT_MS"), "CAPTURE_CONNECT_TIMEOUT_MS")?,
                reader_grace: millis(env!("CAPTURE_READER_GRACE_MS"), "CAPTURE_READER_GRACE_MS")?,
            },
        })
    }
}

/// Shared, runtime-updatable view of the network configuration.
///
/// Engines call [`ConfigStore::get_config`] at session start and work on the
/// snapshot for the rest of the session.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<NetworkConfig>>,
}

impl ConfigStore {
    pub fn new(network: NetworkConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(network)),
        }
    }

    pub fn get_config(&self) -> NetworkConfig {
        self.inner.read().clone()
    }

    /// Link the device to a chat, or unlink it with `None`.
    pub fn set_channel(&self, channel_id: Option<&str>) {
        let mut cfg = self.inner.write();
        cfg.channel_id = channel_id.unwrap_or_default().to_string();
    }
}
