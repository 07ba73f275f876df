//! Capture pipeline: trigger press → microphone → RingStream → websocket upload.
//!
//! Two long-lived threads with different timing classes. `capture-reader`
//! reads the mic at a fixed cadence and never waits on the network; it only
//! pushes into the ring with a short bounded wait and drops what does not
//! fit. `capture-upload` owns the connection: it waits for the link while the
//! reader pre-buffers, then drains the ring into the transport.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::activity::{EngineContext, Pipeline};
use super::ring_stream::RingStream;
use super::upload::{ConnectPoll, PendingUpload, UploadConnector, UploadSession, upload_url};
use super::wav::WavFormat;
use crate::config::{CaptureConfig, NetworkConfig};
use crate::error::{StreamError, StreamResult};
use crate::gui_bridge::DisplayState;

/// Upper bound on one blocking mic read.
const MIC_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Microphone input channel delivering interleaved S16LE frames.
pub trait MicInput: Send {
    fn start(&mut self) -> StreamResult<()>;

    /// Fill `buf` with whole interleaved frames, waiting at most `timeout`.
    /// Returns the number of bytes written, 0 if nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> StreamResult<usize>;

    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    /// Mic running, upload link not ready yet
    Prebuffering,
    Streaming,
    /// Reader stopped, flushing what is left in the ring
    Draining,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Trigger released and the ring drained
    Completed,
    /// Duration cap reached while the trigger was still held
    CapReached,
    Aborted(StreamError),
}

/// Summary of the last recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    pub outcome: CaptureOutcome,
    /// Payload bytes sent after the header
    pub bytes_sent: usize,
    /// Bytes waiting in the ring when the link came up
    pub prebuffered: usize,
    /// Bytes the reader dropped because the ring was full
    pub reader_dropped: usize,
    /// Shorter than the advisory minimum; sent anyway
    pub too_short: bool,
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self {
            outcome: CaptureOutcome::Completed,
            bytes_sent: 0,
            prebuffered: 0,
            reader_dropped: 0,
            too_short: false,
        }
    }
}

/// Keep one channel of interleaved 16-bit frames, compacting in place.
/// Returns the mono byte count at the front of `buf`.
pub fn downmix_in_place(buf: &mut [u8], channels: usize, keep: usize) -> usize {
    let frame_bytes = channels.max(1) * 2;
    let keep = keep.min(channels.max(1) - 1);
    let frames = buf.len() / frame_bytes;
    for i in 0..frames {
        let src = i * frame_bytes + keep * 2;
        buf.copy_within(src..src + 2, i * 2);
    }
    frames * 2
}

/// State shared by the engine handle and both workers.
struct Shared {
    ring: RingStream,
    state: Mutex<CaptureState>,
    state_changed: Condvar,
    /// Cleared by trigger release
    held: AtomicBool,
    /// Reader keeps reading while set
    reading: AtomicBool,
    reader_busy: Mutex<bool>,
    reader_idle: Condvar,
    mic_failed: AtomicBool,
    dropped: AtomicUsize,
    last: Mutex<Option<CaptureStats>>,
}

impl Shared {
    fn set_state(&self, state: CaptureState) {
        *self.state.lock() = state;
        self.state_changed.notify_all();
    }

    fn mark_reader_idle(&self) {
        *self.reader_busy.lock() = false;
        self.reader_idle.notify_all();
    }
}

/// Cloneable front end used by the trigger collaborator.
#[derive(Clone)]
pub struct CaptureEngine {
    shared: Arc<Shared>,
    reader_tx: mpsc::Sender<()>,
    upload_tx: mpsc::Sender<NetworkConfig>,
    ctx: EngineContext,
}

impl CaptureEngine {
    /// Build the engine handle and its two (not yet started) workers.
    pub fn new(
        cfg: CaptureConfig,
        mic: Box<dyn MicInput>,
        connector: Box<dyn UploadConnector>,
        ctx: EngineContext,
    ) -> (Self, CaptureWorkers) {
        let shared = Arc::new(Shared {
            ring: RingStream::new(cfg.ring_bytes),
            state: Mutex::new(CaptureState::Idle),
            state_changed: Condvar::new(),
            held: AtomicBool::new(false),
            reading: AtomicBool::new(false),
            reader_busy: Mutex::new(false),
            reader_idle: Condvar::new(),
            mic_failed: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
            last: Mutex::new(None),
        });
        let (reader_tx, reader_rx) = mpsc::channel(1);
        let (upload_tx, upload_rx) = mpsc::channel(1);

        let reader = CaptureReader {
            buf: vec![0u8; cfg.read_bytes],
            cfg: cfg.clone(),
            mic,
            rx: reader_rx,
            shared: shared.clone(),
        };
        let uploader = CaptureUploader {
            send_buf: vec![0u8; cfg.send_chunk],
            cfg,
            connector,
            rx: upload_rx,
            shared: shared.clone(),
            ctx: ctx.clone(),
        };
        let engine = Self {
            shared,
            reader_tx,
            upload_tx,
            ctx,
        };
        (engine, CaptureWorkers { reader, uploader })
    }

    /// Start a recording. Rejected with no side effects when no upload
    /// destination is configured or another session holds the device.
    pub fn on_trigger_press(&self) -> StreamResult<()> {
        let net = self.ctx.config.get_config();
        if !net.has_upload_destination() {
            log::warn!("No chat linked, ignoring trigger press");
            return Err(StreamError::Misconfiguration("no upload destination configured".into()));
        }
        if !self.ctx.activity.try_begin(Pipeline::Capture) {
            log::warn!("Device busy, ignoring trigger press");
            return Err(StreamError::Busy);
        }

        let s = &self.shared;
        s.ring.reset();
        s.dropped.store(0, Ordering::SeqCst);
        s.mic_failed.store(false, Ordering::SeqCst);
        s.held.store(true, Ordering::SeqCst);
        s.reading.store(true, Ordering::SeqCst);
        *s.reader_busy.lock() = true;
        s.set_state(CaptureState::Prebuffering);
        self.ctx.display.set_state(DisplayState::Recording, "Recording...");

        if self.reader_tx.try_send(()).is_err() {
            s.mark_reader_idle();
            return Err(self.rollback("capture reader not accepting sessions"));
        }
        if self.upload_tx.try_send(net).is_err() {
            return Err(self.rollback("upload worker not accepting sessions"));
        }
        log::info!("Recording started");
        Ok(())
    }

    fn rollback(&self, why: &str) -> StreamError {
        log::error!("Recording not started: {}", why);
        self.shared.reading.store(false, Ordering::SeqCst);
        self.shared.held.store(false, Ordering::SeqCst);
        self.shared.set_state(CaptureState::Idle);
        self.ctx.activity.end(Pipeline::Capture);
        let net = self.ctx.config.get_config();
        self.ctx.display.set_state(DisplayState::Idle, &net.idle_label());
        StreamError::Transport(why.to_string())
    }

    /// Finish the active recording. Returns false if none is active.
    pub fn on_trigger_release(&self) -> bool {
        if self.state() == CaptureState::Idle {
            return false;
        }
        if self.shared.held.swap(false, Ordering::SeqCst) {
            log::info!("Trigger released");
        }
        true
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock()
    }

    #[cfg(test)]
    pub fn last_stats(&self) -> Option<CaptureStats> {
        self.shared.last.lock().clone()
    }

    /// Block until no recording is active. Returns false on timeout.
    #[cfg(test)]
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        !self
            .shared
            .state_changed
            .wait_while_for(&mut state, |s| *s != CaptureState::Idle, timeout)
            .timed_out()
    }
}

/// The reader and upload workers, started once at init.
pub struct CaptureWorkers {
    reader: CaptureReader,
    uploader: CaptureUploader,
}

impl CaptureWorkers {
    pub fn spawn(self) -> std::io::Result<(JoinHandle<()>, JoinHandle<()>)> {
        let reader = self.reader;
        let uploader = self.uploader;
        let r = thread::Builder::new()
            .name("capture-reader".into())
            .spawn(move || reader.run())?;
        let u = thread::Builder::new()
            .name("capture-upload".into())
            .spawn(move || uploader.run())?;
        Ok((r, u))
    }
}

// ======================== Reader ========================

struct CaptureReader {
    cfg: CaptureConfig,
    mic: Box<dyn MicInput>,
    rx: mpsc::Receiver<()>,
    shared: Arc<Shared>,
    buf: Vec<u8>,
}

impl CaptureReader {
    fn run(mut self) {
        while let Some(()) = self.rx.blocking_recv() {
            self.capture();
            self.shared.mark_reader_idle();
        }
        log::info!("Capture reader exiting");
    }

    fn capture(&mut self) {
        if let Err(e) = self.mic.start() {
            log::error!("Mic start failed: {}", e);
            self.shared.mic_failed.store(true, Ordering::SeqCst);
            return;
        }
        log::info!("Mic capture started at {} Hz", self.cfg.sample_rate);

        let channels = self.cfg.mic_channels as usize;
        let keep = self.cfg.keep_channel as usize;
        while self.shared.reading.load(Ordering::SeqCst) {
            let got = match self.mic.read(&mut self.buf, MIC_READ_TIMEOUT) {
                Ok(n) => n,
                Err(e) if e.is_recoverable() => {
                    log::warn!("Mic read: {}", e);
                    continue;
                }
                Err(e) => {
                    log::error!("Mic read failed: {}", e);
                    self.shared.mic_failed.store(true, Ordering::SeqCst);
                    break;
                }
            };
            if got == 0 {
                continue;
            }

            let mono = downmix_in_place(&mut self.buf[..got], channels, keep);
            let accepted = self.shared.ring.push(&self.buf[..mono], self.cfg.push_timeout);
            if accepted < mono {
                let dropped = mono - accepted;
                self.shared.dropped.fetch_add(dropped, Ordering::SeqCst);
                log::warn!("{}", StreamError::OverflowDrop { dropped });
            }
        }
        self.mic.stop();
    }
}

// ======================== Upload ========================

/// How the live phase ended when it ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LiveEnd {
    Released,
    CapReached,
}

struct CaptureUploader {
    cfg: CaptureConfig,
    connector: Box<dyn UploadConnector>,
    rx: mpsc::Receiver<NetworkConfig>,
    shared: Arc<Shared>,
    ctx: EngineContext,
    send_buf: Vec<u8>,
}

impl CaptureUploader {
    fn run(mut self) {
        log::info!(
            "Capture ready: {} s max, {} KB ring",
            self.cfg.max_seconds,
            self.cfg.ring_bytes / 1024
        );
        while let Some(net) = self.rx.blocking_recv() {
            let stats = self.record(&net);
            self.finish(stats);
        }
        log::info!("Upload worker exiting");
    }

    /// Run one recording from connect to close. Never returns early with
    /// the reader still running.
    fn record(&mut self, net: &NetworkConfig) -> CaptureStats {
        let started = Instant::now();
        let mut stats = CaptureStats::default();
        let mut upload: Option<UploadSession> = None;
        let mut pending: Option<Box<dyn PendingUpload>> = None;

        let live = match upload_url(&net.recorder_url, &net.channel_id, &net.auth_token) {
            Ok(url) => {
                log::info!("Connecting upload link to {}", url.host_str().unwrap_or("?"));
                let p = pending.insert(self.connector.connect(&url));
                self.stream_live(&mut **p, started, &mut upload, &mut stats)
            }
            Err(e) => Err(e),
        };

        self.shared.set_state(CaptureState::Draining);
        self.stop_reader();

        let result = match live {
            Ok(end) => self.drain(end, pending.as_deref_mut(), started, &mut upload, &mut stats),
            Err(e) => Err(e),
        };
        if let Some(session) = upload.take() {
            stats.bytes_sent = session.close();
        }
        stats.reader_dropped = self.shared.dropped.load(Ordering::SeqCst);

        let secs = stats.bytes_sent as f32 / self.cfg.bytes_per_second() as f32;
        stats.outcome = match result {
            Ok(outcome) => {
                log::info!("Streamed {:.1} s ({} B mono)", secs, stats.bytes_sent);
                if stats.bytes_sent < self.cfg.min_bytes() {
                    stats.too_short = true;
                    log::warn!("Recording too short ({:.1} s), the recorder may discard it", secs);
                }
                outcome
            }
            Err(e) => {
                log::error!("Recording aborted after {} B: {}", stats.bytes_sent, e);
                self.shared.set_state(CaptureState::Aborted);
                CaptureOutcome::Aborted(e)
            }
        };
        if stats.reader_dropped > 0 {
            log::warn!("Reader dropped {} B on a full ring", stats.reader_dropped);
        }
        stats
    }

    /// Pre-buffer until the link is up, then stream until release or cap.
    fn stream_live(
        &mut self,
        pending: &mut dyn PendingUpload,
        started: Instant,
        upload: &mut Option<UploadSession>,
        stats: &mut CaptureStats,
    ) -> StreamResult<LiveEnd> {
        loop {
            if self.shared.mic_failed.load(Ordering::SeqCst) {
                return Err(StreamError::Device("microphone stopped".into()));
            }
            let held = self.shared.held.load(Ordering::SeqCst);

            if let Some(session) = upload.as_mut() {
                if session.cap_reached() {
                    log::info!("Duration cap of {} s reached", self.cfg.max_seconds);
                    return Ok(LiveEnd::CapReached);
                }
                if !held {
                    return Ok(LiveEnd::Released);
                }
                let want = self.cfg.send_chunk.min(session.remaining());
                let n = self.shared.ring.pop(&mut self.send_buf[..want], self.cfg.pop_timeout);
                if n > 0 {
                    session.send_chunk(&self.send_buf[..n])?;
                }
                continue;
            }

            if !held {
                return Ok(LiveEnd::Released);
            }
            match pending.wait(self.cfg.pop_timeout) {
                ConnectPoll::Ready(transport) => {
                    let mut session = self.open_session(transport, stats);
                    session.send_header()?;
                    *upload = Some(session);
                }
                ConnectPoll::Failed(e) => return Err(e),
                ConnectPoll::Pending => {
                    if started.elapsed() >= self.cfg.connect_timeout {
                        return Err(self.connect_timeout());
                    }
                }
            }
        }
    }

    /// Flush the ring after the reader has stopped. A link still pending
    /// gets the rest of its connect budget first.
    fn drain(
        &mut self,
        end: LiveEnd,
        pending: Option<&mut (dyn PendingUpload + 'static)>,
        started: Instant,
        upload: &mut Option<UploadSession>,
        stats: &mut CaptureStats,
    ) -> StreamResult<CaptureOutcome> {
        if upload.is_none() {
            let Some(pending) = pending else {
                return Err(StreamError::Transport("no upload link".into()));
            };
            let transport = loop {
                let left = self.cfg.connect_timeout.saturating_sub(started.elapsed());
                if left.is_zero() {
                    return Err(self.connect_timeout());
                }
                match pending.wait(left) {
                    ConnectPoll::Ready(t) => break t,
                    ConnectPoll::Failed(e) => return Err(e),
                    ConnectPoll::Pending => {}
                }
            };
            let mut session = self.open_session(transport, stats);
            session.send_header()?;
            *upload = Some(session);
        }
        let Some(session) = upload.as_mut() else {
            return Err(StreamError::Transport("no upload link".into()));
        };

        let mut outcome = match end {
            LiveEnd::Released => CaptureOutcome::Completed,
            LiveEnd::CapReached => CaptureOutcome::CapReached,
        };
        loop {
            if session.cap_reached() {
                outcome = CaptureOutcome::CapReached;
                let leftover = self.shared.ring.available();
                if leftover > 0 {
                    log::warn!("Discarding {} B past the duration cap", leftover);
                }
                break;
            }
            let want = self.cfg.send_chunk.min(session.remaining());
            let n = self.shared.ring.pop(&mut self.send_buf[..want], Duration::ZERO);
            if n == 0 {
                break;
            }
            session.send_chunk(&self.send_buf[..n])?;
        }
        Ok(outcome)
    }

    fn open_session(
        &self,
        transport: Box<dyn super::upload::UploadTransport>,
        stats: &mut CaptureStats,
    ) -> UploadSession {
        let prebuf = self.shared.ring.available();
        stats.prebuffered = prebuf;
        log::info!(
            "Upload connected, {} B pre-buffered ({:.1} s)",
            prebuf,
            prebuf as f32 / self.cfg.bytes_per_second() as f32
        );
        self.shared.set_state(CaptureState::Streaming);
        self.ctx
            .display
            .set_state(DisplayState::Recording, "Recording...\nRelease to stop");
        UploadSession::new(
            transport,
            WavFormat::mono16(self.cfg.sample_rate),
            self.cfg.max_bytes(),
            self.cfg.send_timeout,
        )
    }

    fn connect_timeout(&self) -> StreamError {
        StreamError::Timeout(format!(
            "upload link not ready after {} ms",
            self.cfg.connect_timeout.as_millis()
        ))
    }

    /// Ask the reader to stop and give it a short grace period to exit.
    fn stop_reader(&self) {
        self.shared.reading.store(false, Ordering::SeqCst);
        let mut busy = self.shared.reader_busy.lock();
        let waited = self
            .shared
            .reader_idle
            .wait_while_for(&mut busy, |b| *b, self.cfg.reader_grace);
        if waited.timed_out() {
            log::warn!("Capture reader still busy after {:?}", self.cfg.reader_grace);
        }
    }

    fn finish(&mut self, stats: CaptureStats) {
        *self.shared.last.lock() = Some(stats);
        self.shared.held.store(false, Ordering::SeqCst);
        let net = self.ctx.config.get_config();
        self.ctx.display.set_state(DisplayState::Idle, &net.idle_label());

        // Release the device only while the state already reads Idle.
        let mut state = self.shared.state.lock();
        *state = CaptureState::Idle;
        self.ctx.activity.end(Pipeline::Capture);
        drop(state);
        self.shared.state_changed.notify_all();
    }
}
