//! Safe wrapper around the minimp3 frame decoder.

use minimp3_sys as ffi;

use super::stream_decoder::{FrameDecoder, FrameInfo};

/// Samples (all channels) one MPEG audio frame can decode to.
pub const MAX_SAMPLES_PER_FRAME: usize = ffi::MINIMP3_MAX_SAMPLES_PER_FRAME as usize;

pub struct Mp3Decoder {
    state: Box<ffi::mp3dec_t>,
}

impl Mp3Decoder {
    pub fn new() -> Self {
        // mp3dec_t is plain C data; all-zero is a valid pre-init value.
        let mut state: Box<ffi::mp3dec_t> = Box::new(unsafe { std::mem::zeroed() });
        unsafe { ffi::mp3dec_init(&mut *state) };
        Self { state }
    }
}

impl Default for Mp3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for Mp3Decoder {
    fn reset(&mut self) {
        unsafe { ffi::mp3dec_init(&mut *self.state) };
    }

    fn decode_frame(&mut self, input: &[u8], pcm: &mut [i16]) -> FrameInfo {
        if input.is_empty() || pcm.len() < MAX_SAMPLES_PER_FRAME {
            return FrameInfo::default();
        }
        let mut info: ffi::mp3dec_frame_info_t = unsafe { std::mem::zeroed() };
        let samples = unsafe {
            ffi::mp3dec_decode_frame(
                &mut *self.state,
                input.as_ptr(),
                input.len() as _,
                pcm.as_mut_ptr(),
                &mut info,
            )
        };
        FrameInfo {
            frame_bytes: info.frame_bytes.max(0) as usize,
            samples: samples.max(0) as usize,
            channels: info.channels.max(0) as u32,
            sample_rate: info.hz.max(0) as u32,
        }
    }

    fn max_frame_samples(&self) -> usize {
        MAX_SAMPLES_PER_FRAME * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_input_yields_no_frame() {
        let mut dec = Mp3Decoder::new();
        let mut pcm = vec![0i16; dec.max_frame_samples()];
        let info = dec.decode_frame(&[0u8; 16], &mut pcm);
        assert_eq!(info.samples, 0);
        let info = dec.decode_frame(&[], &mut pcm);
        assert!(!info.parsed());
    }
}
