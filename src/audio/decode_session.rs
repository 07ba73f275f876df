//! Decoder state plus the scratch buffers reused by every play request.

use std::io::{self, Read};

use super::accum::AccumBuffer;
use super::stream_decoder::{FrameDecoder, FrameInfo};

/// Outcome of one decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// No complete frame in the buffered bytes.
    NeedMore,
    /// A frame was parsed but produced no samples (ID3 tag, padding).
    Skipped(FrameInfo),
    /// A frame with samples is ready in the PCM buffer.
    Frame(FrameInfo),
}

/// Duplicate each mono sample into both channels of `out`.
///
/// `out` must hold at least `2 * mono.len()` samples.
pub fn expand_mono_to_stereo(mono: &[i16], out: &mut [i16]) {
    for (pair, &s) in out.chunks_exact_mut(2).zip(mono) {
        pair[0] = s;
        pair[1] = s;
    }
}

pub struct DecodeSession {
    decoder: Box<dyn FrameDecoder>,
    accum: AccumBuffer,
    pcm: Vec<i16>,
    stereo: Vec<i16>,
}

impl DecodeSession {
    pub fn new(decoder: Box<dyn FrameDecoder>, accum_bytes: usize) -> Self {
        let frame_samples = decoder.max_frame_samples();
        Self {
            decoder,
            accum: AccumBuffer::new(accum_bytes),
            pcm: vec![0i16; frame_samples],
            stereo: vec![0i16; frame_samples],
        }
    }

    /// Reinitialize decoder state and drop leftover input from the last request.
    pub fn begin(&mut self) {
        self.decoder.reset();
        self.accum.clear();
    }

    /// Drop buffered bytes that hold no decodable frame.
    pub fn discard_buffered(&mut self) {
        self.accum.clear();
    }

    pub fn buffered(&self) -> usize {
        self.accum.len()
    }

    pub fn is_full(&self) -> bool {
        self.accum.is_full()
    }

    /// One read from the transport into the accumulation buffer.
    pub fn fill_from<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<usize> {
        self.accum.fill_from(src)
    }

    /// Try to decode one frame from the front of the buffered bytes. The
    /// parsed frame's bytes are consumed whether or not it had samples.
    pub fn decode_next(&mut self) -> DecodeStep {
        if self.accum.is_empty() {
            return DecodeStep::NeedMore;
        }
        let info = self.decoder.decode_frame(self.accum.peek(), &mut self.pcm);
        if !info.parsed() {
            return DecodeStep::NeedMore;
        }
        self.accum.commit(info.frame_bytes);
        if info.samples == 0 || info.channels == 0 {
            DecodeStep::Skipped(info)
        } else {
            DecodeStep::Frame(info)
        }
    }

    /// Interleaved stereo PCM for the last decoded frame.
    pub fn stereo_output(&mut self, info: &FrameInfo) -> &[i16] {
        let samples = info.samples.min(self.pcm.len() / info.channels.max(1) as usize);
        if info.channels == 1 {
            let samples = samples.min(self.stereo.len() / 2);
            expand_mono_to_stereo(&self.pcm[..samples], &mut self.stereo[..samples * 2]);
            &self.stereo[..samples * 2]
        } else {
            &self.pcm[..samples * info.channels as usize]
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{SyntheticDecoder, frame};
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decodes_and_consumes_frames() {
        let mut session = DecodeSession::new(Box::new(SyntheticDecoder::new()), 64);
        session.begin();
        let mut stream = frame(2, 44100, &[1, -1, 2, -2]);
        stream.extend(frame(1, 44100, &[]));
        let mut src: &[u8] = &stream;
        session.fill_from(&mut src).unwrap();

        match session.decode_next() {
            DecodeStep::Frame(info) => {
                assert_eq!(info.samples, 2);
                assert_eq!(session.stereo_output(&info), &[1, -1, 2, -2]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(session.decode_next(), DecodeStep::Skipped(_)));
        assert_eq!(session.buffered(), 0);
        assert_eq!(session.decode_next(), DecodeStep::NeedMore);
    }

    #[test]
    fn test_partial_frame_needs_more() {
        let mut session = DecodeSession::new(Box::new(SyntheticDecoder::new()), 64);
        let f = frame(1, 16000, &[7, 8, 9]);
        let mut src: &[u8] = &f[..6];
        session.fill_from(&mut src).unwrap();
        assert_eq!(session.decode_next(), DecodeStep::NeedMore);
        assert_eq!(session.buffered(), 6);

        let mut rest: &[u8] = &f[6..];
        session.fill_from(&mut rest).unwrap();
        let DecodeStep::Frame(info) = session.decode_next() else {
            panic!("frame expected");
        };
        assert_eq!(session.stereo_output(&info), &[7, 7, 8, 8, 9, 9]);
    }

    #[test]
    fn test_begin_clears_leftovers() {
        let mut session = DecodeSession::new(Box::new(SyntheticDecoder::new()), 16);
        let mut src: &[u8] = &[0xFF, 1, 0];
        session.fill_from(&mut src).unwrap();
        session.begin();
        assert_eq!(session.buffered(), 0);
    }

    proptest! {
        #[test]
        fn mono_expansion_duplicates_every_sample(mono in prop::collection::vec(any::<i16>(), 0..600)) {
            let mut out = vec![0i16; mono.len() * 2];
            expand_mono_to_stereo(&mono, &mut out);
            for (i, &s) in mono.iter().enumerate() {
                prop_assert_eq!(out[2 * i], s);
                prop_assert_eq!(out[2 * i + 1], s);
            }
        }
    }
}
