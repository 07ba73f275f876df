//! Playback pipeline: play requests → streaming fetch → frame decode → speaker.
//!
//! One long-lived `audio-play` thread serves a bounded request queue, one
//! request at a time. The blocking sink write is the only flow control: the
//! speaker drains at real-time rate, which paces download and decode.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::activity::{EngineContext, Pipeline};
use super::decode_session::{DecodeSession, DecodeStep};
use crate::config::{NetworkConfig, PlaybackConfig};
use crate::error::{StreamError, StreamResult};
use crate::gui_bridge::DisplayState;

/// Consecutive read timeouts tolerated before the session is abandoned.
const MAX_READ_TIMEOUTS: u32 = 3;

/// Hardware output channel, always two interleaved channels.
pub trait AudioSink: Send {
    /// Write interleaved stereo samples, waiting at most `timeout`.
    /// Returns the number of frames accepted.
    fn write(&mut self, pcm: &[i16], timeout: std::time::Duration) -> StreamResult<usize>;

    /// Let everything already written play out, then wait `grace` more.
    fn drain(&mut self, grace: std::time::Duration);

    /// Stop output immediately, discarding queued samples.
    fn close(&mut self);
}

/// Opens a sink once the stream's sample rate is known.
pub trait SinkFactory: Send {
    fn open(&mut self, sample_rate: u32) -> StreamResult<Box<dyn AudioSink>>;
}

/// Opens the compressed audio body of a message.
pub trait AudioFetcher: Send {
    fn open(&mut self, cfg: &NetworkConfig, message_id: &str) -> StreamResult<Box<dyn Read + Send>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRequest {
    pub message_id: String,
}

/// Why a play session ended, when it ran to completion or was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayEnd {
    Finished,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayStats {
    pub end: PlayEnd,
    pub frames_written: usize,
    pub frames_skipped: usize,
    pub sample_rate: Option<u32>,
}

/// Cheap, cloneable front end used by the dispatcher.
#[derive(Clone)]
pub struct PlaybackEngine {
    tx: mpsc::Sender<PlayRequest>,
    stop: Arc<AtomicBool>,
    max_id_len: usize,
}

impl PlaybackEngine {
    /// Build the engine handle and its (not yet started) worker.
    pub fn new(
        cfg: PlaybackConfig,
        session: DecodeSession,
        fetcher: Box<dyn AudioFetcher>,
        sinks: Box<dyn SinkFactory>,
        ctx: EngineContext,
    ) -> (Self, PlaybackWorker) {
        let (tx, rx) = mpsc::channel(cfg.queue_depth.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let engine = Self {
            tx,
            stop: stop.clone(),
            max_id_len: cfg.max_id_len,
        };
        let worker = PlaybackWorker {
            cfg,
            rx,
            stop,
            session,
            fetcher,
            sinks,
            ctx,
        };
        (engine, worker)
    }

    /// Queue a message for playback. Returns false, without error, if the
    /// queue is full; the newest request is the one dropped.
    pub fn enqueue(&self, message_id: &str) -> bool {
        let req = PlayRequest {
            message_id: truncate_id(message_id, self.max_id_len.saturating_sub(1)).to_string(),
        };
        match self.tx.try_send(req) {
            Ok(()) => true,
            Err(TrySendError::Full(req)) => {
                log::warn!("Play queue full, dropping {}", req.message_id);
                false
            }
            Err(TrySendError::Closed(req)) => {
                log::warn!("Playback worker gone, dropping {}", req.message_id);
                false
            }
        }
    }

    /// End the active session at its next loop iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn truncate_id(id: &str, max: usize) -> &str {
    if id.len() <= max {
        return id;
    }
    let mut end = max;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    &id[..end]
}

pub struct PlaybackWorker {
    cfg: PlaybackConfig,
    rx: mpsc::Receiver<PlayRequest>,
    stop: Arc<AtomicBool>,
    session: DecodeSession,
    fetcher: Box<dyn AudioFetcher>,
    sinks: Box<dyn SinkFactory>,
    ctx: EngineContext,
}

impl PlaybackWorker {
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("audio-play".into())
            .spawn(move || self.run())
    }

    /// Serve requests until every engine handle is dropped.
    pub fn run(mut self) {
        log::info!("Playback worker ready (queue depth {})", self.cfg.queue_depth);
        while let Some(req) = self.rx.blocking_recv() {
            let _ = self.play(&req);
        }
        log::info!("Playback worker exiting");
    }

    /// Run one complete session. Every outcome leaves the device idle.
    pub fn play(&mut self, req: &PlayRequest) -> StreamResult<PlayStats> {
        if !self.ctx.activity.try_begin(Pipeline::Playback) {
            log::warn!("Device busy, skipping playback of {}", req.message_id);
            return Err(StreamError::Busy);
        }
        self.stop.store(false, Ordering::SeqCst);

        let result = self.stream(req);
        match &result {
            Ok(stats) => log::info!(
                "Playback of {} ended ({:?}): {} frames at {:?} Hz, {} skipped",
                req.message_id,
                stats.end,
                stats.frames_written,
                stats.sample_rate,
                stats.frames_skipped
            ),
            Err(e) => log::error!("Playback of {} aborted: {}", req.message_id, e),
        }

        self.ctx.activity.end(Pipeline::Playback);
        let net = self.ctx.config.get_config();
        self.ctx.display.set_state(DisplayState::Idle, &net.idle_label());
        result
    }

    fn stream(&mut self, req: &PlayRequest) -> StreamResult<PlayStats> {
        let net = self.ctx.config.get_config();
        let mut body = self.fetcher.open(&net, &req.message_id)?;

        log::info!("Streaming audio for msg {}", req.message_id);
        self.session.begin();
        self.ctx.display.set_state(DisplayState::Playing, "Playing...");

        let mut sink: Option<Box<dyn AudioSink>> = None;
        let mut stats = PlayStats {
            end: PlayEnd::Finished,
            frames_written: 0,
            frames_skipped: 0,
            sample_rate: None,
        };
        let result = self.decode_loop(&mut *body, &mut sink, &mut stats);

        if let Some(mut sink) = sink {
            if result.is_ok() && stats.end == PlayEnd::Finished {
                sink.drain(self.cfg.drain_delay);
            }
            sink.close();
        }
        result.map(|()| stats)
    }

    fn decode_loop(
        &mut self,
        body: &mut (dyn Read + Send),
        sink: &mut Option<Box<dyn AudioSink>>,
        stats: &mut PlayStats,
    ) -> StreamResult<()> {
        let mut exhausted = false;
        let mut read_timeouts = 0u32;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                stats.end = PlayEnd::Stopped;
                return Ok(());
            }

            if !exhausted && !self.session.is_full() {
                match self.session.fill_from(&mut *body) {
                    Ok(0) => exhausted = true,
                    Ok(_) => read_timeouts = 0,
                    Err(e) => match StreamError::from(e) {
                        StreamError::Timeout(msg) if read_timeouts + 1 < MAX_READ_TIMEOUTS => {
                            read_timeouts += 1;
                            log::warn!("Audio read timed out ({}), retrying", msg);
                        }
                        err => return Err(err),
                    },
                }
            }

            match self.session.decode_next() {
                DecodeStep::NeedMore => {
                    if exhausted {
                        return Ok(());
                    }
                    if self.session.is_full() {
                        let junk = self.session.buffered();
                        log::warn!("{}", StreamError::Decode(format!("no frame in {} buffered bytes, discarding", junk)));
                        self.session.discard_buffered();
                    }
                }
                DecodeStep::Skipped(info) => {
                    stats.frames_skipped += 1;
                    log::debug!("Skipping {}-byte frame without samples", info.frame_bytes);
                }
                DecodeStep::Frame(info) => {
                    if sink.is_none() {
                        *sink = Some(self.sinks.open(info.sample_rate)?);
                        stats.sample_rate = Some(info.sample_rate);
                        log::info!("Speaker opened at {} Hz ({} ch source)", info.sample_rate, info.channels);
                    }
                    let Some(out) = sink.as_mut() else {
                        continue;
                    };
                    let pcm = self.session.stereo_output(&info);
                    match out.write(pcm, self.cfg.write_timeout) {
                        Ok(_) => stats.frames_written += 1,
                        Err(e) if e.is_recoverable() => log::warn!("Speaker write: {}", e),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}
