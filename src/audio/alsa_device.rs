//! ALSA PCM device wrappers for the speaker sink and the microphone input.

use alsa::pcm::{Access, Format, HwParams, PCM, State};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};
use std::thread;
use std::time::{Duration, Instant};

use super::capture::MicInput;
use super::playback::{AudioSink, SinkFactory};
use crate::error::{StreamError, StreamResult};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Playback, sample_rate, channels, "Playback")
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((
        pcm,
        AlsaParams {
            sample_rate: actual_rate,
            channels: actual_channels,
            period_size,
        },
    ))
}

fn remaining_ms(deadline: Instant) -> u32 {
    deadline
        .saturating_duration_since(Instant::now())
        .as_millis()
        .min(u32::MAX as u128) as u32
}

// ======================== Speaker ========================

/// Upper bound on waiting for queued playback to finish.
const MAX_DRAIN: Duration = Duration::from_secs(2);

/// Opens the speaker at the rate of the first decoded frame.
pub struct AlsaOutput {
    device: String,
}

impl AlsaOutput {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }
}

impl SinkFactory for AlsaOutput {
    fn open(&mut self, sample_rate: u32) -> StreamResult<Box<dyn AudioSink>> {
        let (pcm, params) = open_playback(&self.device, sample_rate, 2)
            .map_err(|e| StreamError::Device(format!("{:#}", e)))?;
        if params.channels != 2 {
            return Err(StreamError::Device(format!(
                "playback device negotiated {} channels, need 2",
                params.channels
            )));
        }
        Ok(Box::new(AlsaSink {
            pcm,
            sample_rate: params.sample_rate,
        }))
    }
}

pub struct AlsaSink {
    pcm: PCM,
    sample_rate: u32,
}

impl AudioSink for AlsaSink {
    fn write(&mut self, pcm_data: &[i16], timeout: Duration) -> StreamResult<usize> {
        let deadline = Instant::now() + timeout;
        let io = self.pcm.io_i16()?;
        let total_frames = pcm_data.len() / 2;
        let mut frames_written = 0;
        let mut retry_count = 0u32;

        while frames_written < total_frames {
            if !self.pcm.wait(Some(remaining_ms(deadline)))? {
                return Err(StreamError::Timeout(format!(
                    "sink write: {} of {} frames written",
                    frames_written, total_frames
                )));
            }
            match io.writei(&pcm_data[frames_written * 2..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    self.pcm.prepare()?;
                    // 熔断器：底层持续跟不上写入速度时，丢弃剩余帧防止死循环
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            total_frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
        Ok(frames_written)
    }

    fn drain(&mut self, grace: Duration) {
        // A stream that never crossed its start threshold would hold its
        // samples forever.
        if self.pcm.state() == State::Prepared {
            if let Err(e) = self.pcm.start() {
                log::warn!("ALSA playback start before drain failed: {}", e);
            }
        }
        let queued = match self.pcm.delay() {
            Ok(frames) => frames.max(0) as u64,
            Err(e) => {
                log::warn!("ALSA delay query failed: {}", e);
                0
            }
        };
        let play_out = Duration::from_micros(queued * 1_000_000 / u64::from(self.sample_rate.max(1)));
        log::debug!("Draining {} queued frames ({:?})", queued, play_out);
        thread::sleep(play_out.min(MAX_DRAIN) + grace);
    }

    fn close(&mut self) {
        if let Err(e) = self.pcm.drop() {
            log::warn!("ALSA playback stop failed: {}", e);
        }
    }
}

// ======================== Microphone ========================

/// Recover from an overrun. A prepared capture stream stays silent until it
/// is started again.
fn restart_capture(pcm: &PCM, e: alsa::Error) -> StreamResult<()> {
    log::warn!("ALSA capture error: {}, recovering...", e);
    pcm.prepare()?;
    pcm.start()?;
    Ok(())
}

/// Interleaved S16LE capture from the mic codec.
pub struct AlsaMic {
    device: String,
    sample_rate: u32,
    channels: u32,
    pcm: Option<PCM>,
    scratch: Vec<i16>,
}

impl AlsaMic {
    pub fn new(device: &str, sample_rate: u32, channels: u32, read_bytes: usize) -> Self {
        Self {
            device: device.to_string(),
            sample_rate,
            channels,
            pcm: None,
            scratch: vec![0i16; read_bytes / 2],
        }
    }
}

impl MicInput for AlsaMic {
    fn start(&mut self) -> StreamResult<()> {
        let (pcm, params) = open_capture(&self.device, self.sample_rate, self.channels)
            .map_err(|e| StreamError::Device(format!("{:#}", e)))?;
        if params.channels != self.channels {
            return Err(StreamError::Device(format!(
                "capture device negotiated {} channels, need {}",
                params.channels, self.channels
            )));
        }
        pcm.start()?;
        self.pcm = Some(pcm);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> StreamResult<usize> {
        let Some(pcm) = self.pcm.as_ref() else {
            return Err(StreamError::Device("capture not started".into()));
        };
        match pcm.wait(Some(timeout.as_millis().min(u32::MAX as u128) as u32)) {
            Ok(true) => {}
            Ok(false) => return Ok(0),
            Err(e) => {
                restart_capture(pcm, e)?;
                return Ok(0);
            }
        }
        let samples = (buf.len() / 2).min(self.scratch.len());
        let frames = samples / self.channels as usize;
        let io = pcm.io_i16()?;
        match io.readi(&mut self.scratch[..frames * self.channels as usize]) {
            Ok(n) => {
                let got = n * self.channels as usize;
                for (dst, s) in buf.chunks_exact_mut(2).zip(&self.scratch[..got]) {
                    dst.copy_from_slice(&s.to_le_bytes());
                }
                Ok(got * 2)
            }
            Err(e) => {
                restart_capture(pcm, e)?;
                Ok(0)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(pcm) = self.pcm.take() {
            if let Err(e) = pcm.drop() {
                log::warn!("ALSA capture stop failed: {}", e);
            }
            log::info!("Mic capture stopped");
        }
    }
}
