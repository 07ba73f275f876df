use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    device: Device,
    network: Network,
    gui: Bridge,
    control: Bridge,
    playback: Playback,
    capture: Capture,
}

#[derive(Deserialize)]
struct Device {
    device_id: String,
}

#[derive(Deserialize)]
struct Network {
    server_url: String,
    recorder_url: String,
    auth_token: String,
    channel_id: String,
}

#[derive(Deserialize)]
struct Bridge {
    local_port: u16,
    remote_port: u16,
    local_ip: String,
    remote_ip: String,
    buffer_size: usize,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    queue_depth: usize,
    max_id_len: usize,
    accum_bytes: usize,
    write_timeout_ms: u64,
    drain_ms: u64,
    fetch_connect_timeout_ms: u64,
    fetch_timeout_ms: u64,
}

#[derive(Deserialize)]
struct Capture {
    device: String,
    sample_rate: u32,
    mic_channels: u32,
    keep_channel: u32,
    max_seconds: u32,
    min_seconds: u32,
    read_bytes: usize,
    ring_bytes: usize,
    send_chunk: usize,
    push_timeout_ms: u64,
    pop_timeout_ms: u64,
    send_timeout_ms: u64,
    connect_timeout_ms: u64,
    reader_grace_ms: u64,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=DEVICE_ID={}", config.device.device_id);

    // 网络配置
    println!("cargo:rustc-env=SERVER_URL={}", config.network.server_url);
    println!("cargo:rustc-env=RECORDER_URL={}", config.network.recorder_url);
    println!("cargo:rustc-env=AUTH_TOKEN={}", config.network.auth_token);
    println!("cargo:rustc-env=CHANNEL_ID={}", config.network.channel_id);

    // GUI 配置
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);
    println!("cargo:rustc-env=GUI_LOCAL_IP={}", config.gui.local_ip);
    println!("cargo:rustc-env=GUI_REMOTE_IP={}", config.gui.remote_ip);
    println!("cargo:rustc-env=GUI_BUFFER_SIZE={}", config.gui.buffer_size);

    // 控制进程配置 (MQTT dispatcher + button)
    println!("cargo:rustc-env=CONTROL_LOCAL_PORT={}", config.control.local_port);
    println!("cargo:rustc-env=CONTROL_REMOTE_PORT={}", config.control.remote_port);
    println!("cargo:rustc-env=CONTROL_LOCAL_IP={}", config.control.local_ip);
    println!("cargo:rustc-env=CONTROL_REMOTE_IP={}", config.control.remote_ip);
    println!("cargo:rustc-env=CONTROL_BUFFER_SIZE={}", config.control.buffer_size);

    // 播放配置
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=PLAYBACK_QUEUE_DEPTH={}", config.playback.queue_depth);
    println!("cargo:rustc-env=PLAYBACK_MAX_ID_LEN={}", config.playback.max_id_len);
    println!("cargo:rustc-env=PLAYBACK_ACCUM_BYTES={}", config.playback.accum_bytes);
    println!("cargo:rustc-env=PLAYBACK_WRITE_TIMEOUT_MS={}", config.playback.write_timeout_ms);
    println!("cargo:rustc-env=PLAYBACK_DRAIN_MS={}", config.playback.drain_ms);
    println!("cargo:rustc-env=PLAYBACK_FETCH_CONNECT_TIMEOUT_MS={}", config.playback.fetch_connect_timeout_ms);
    println!("cargo:rustc-env=PLAYBACK_FETCH_TIMEOUT_MS={}", config.playback.fetch_timeout_ms);

    // 录音配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.capture.device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.capture.sample_rate);
    println!("cargo:rustc-env=CAPTURE_MIC_CHANNELS={}", config.capture.mic_channels);
    println!("cargo:rustc-env=CAPTURE_KEEP_CHANNEL={}", config.capture.keep_channel);
    println!("cargo:rustc-env=CAPTURE_MAX_SECONDS={}", config.capture.max_seconds);
    println!("cargo:rustc-env=CAPTURE_MIN_SECONDS={}", config.capture.min_seconds);
    println!("cargo:rustc-env=CAPTURE_READ_BYTES={}", config.capture.read_bytes);
    println!("cargo:rustc-env=CAPTURE_RING_BYTES={}", config.capture.ring_bytes);
    println!("cargo:rustc-env=CAPTURE_SEND_CHUNK={}", config.capture.send_chunk);
    println!("cargo:rustc-env=CAPTURE_PUSH_TIMEOUT_MS={}", config.capture.push_timeout_ms);
    println!("cargo:rustc-env=CAPTURE_POP_TIMEOUT_MS={}", config.capture.pop_timeout_ms);
    println!("cargo:rustc-env=CAPTURE_SEND_TIMEOUT_MS={}", config.capture.send_timeout_ms);
    println!("cargo:rustc-env=CAPTURE_CONNECT_TIMEOUT_MS={}", config.capture.connect_timeout_ms);
    println!("cargo:rustc-env=CAPTURE_READER_GRACE_MS={}", config.capture.reader_grace_ms);
}
