mod audio;
mod config;
mod control_bridge;
mod controller;
mod error;
mod gui_bridge;
mod message_fetch;
mod protocol;
mod upload_link;

use audio::{
    Activity, AlsaMic, AlsaOutput, CaptureEngine, DecodeSession, EngineContext, Mp3Decoder,
    PlaybackEngine,
};
use config::{Config, ConfigStore};
use control_bridge::{ControlBridge, ControlEvent};
use controller::CoreController;
use gui_bridge::{DisplayHandle, DisplayState, DisplayUpdate, GuiBridge, StatusReporter};
use message_fetch::HttpFetcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use upload_link::WsConnector;

/// Activity status is pushed to the control peer at this interval.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;
    let store = ConfigStore::new(config.network.clone());
    log::info!(
        "Doll {} starting, server {}, recorder {}",
        config.network.device_id,
        config.network.server_url,
        config.network.recorder_url
    );

    // 显示进程通道，引擎线程通过 DisplayHandle 非阻塞投递
    let (tx_display, rx_display) = mpsc::channel::<DisplayUpdate>(32);
    let gui_bridge = Arc::new(GuiBridge::new(&config.gui).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run(rx_display).await {
            log::error!("GuiBridge error: {}", e);
        }
    });
    let display: Arc<dyn StatusReporter> = Arc::new(DisplayHandle::new(tx_display));

    // 控制进程通道（MQTT 分发、按键、聊天绑定）
    let (tx_control_event, mut rx_control_event) = mpsc::channel::<ControlEvent>(100);
    let control_bridge = Arc::new(ControlBridge::new(&config.control, tx_control_event).await?);
    log::info!("Control bridge listening on port {}", control_bridge.local_port()?);
    let control_bridge_clone = control_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = control_bridge_clone.run().await {
            log::error!("ControlBridge error: {}", e);
        }
    });

    let activity = Arc::new(Activity::new());
    let ctx = EngineContext {
        activity: activity.clone(),
        display: display.clone(),
        config: store.clone(),
    };

    // 播放线程：HTTP 拉流 → MP3 解码 → ALSA
    let session = DecodeSession::new(Box::new(Mp3Decoder::new()), config.playback.accum_bytes);
    let fetcher = HttpFetcher::new(
        config.playback.fetch_connect_timeout,
        config.playback.fetch_timeout,
    );
    let (playback, play_worker) = PlaybackEngine::new(
        config.playback.clone(),
        session,
        Box::new(fetcher),
        Box::new(AlsaOutput::new(&config.playback.device)),
        ctx.clone(),
    );
    let play_handle = play_worker.spawn()?;

    // 录音线程对：采集 → 环形缓冲 → WebSocket 上传
    let mic = AlsaMic::new(
        &config.capture.device,
        config.capture.sample_rate,
        config.capture.mic_channels,
        config.capture.read_bytes,
    );
    let connector = WsConnector::new(tokio::runtime::Handle::current());
    let (capture, capture_workers) =
        CaptureEngine::new(config.capture.clone(), Box::new(mic), Box::new(connector), ctx);
    let (reader_handle, upload_handle) = capture_workers.spawn()?;

    display.set_state(DisplayState::Idle, &store.get_config().idle_label());

    let mut controller = CoreController::new(
        store,
        activity,
        display,
        playback,
        capture,
        control_bridge,
    );
    let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
    log::info!("Audio core started");

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            Some(event) = rx_control_event.recv() => {
                controller.handle_control_event(event).await;
            }

            _ = status_tick.tick() => {
                controller.publish_status().await;
            }
        }
    }

    // 结束当前会话并关闭请求通道，工作线程随之退出
    controller.shutdown();
    drop(controller);
    let joined = tokio::task::spawn_blocking(move || {
        for handle in [play_handle, reader_handle, upload_handle] {
            if handle.join().is_err() {
                log::error!("Audio worker panicked");
            }
        }
    });
    if tokio::time::timeout(Duration::from_secs(15), joined).await.is_err() {
        log::warn!("Audio workers did not exit in time");
    }
    Ok(())
}
